//! Schema creation and additive repair for the local store.

use log::debug;
use rusqlite::Connection;
use std::path::Path;

use crate::errors::Result;

/// Opens a connection to the store file. Callers release it at the end of
/// their operation.
pub fn open(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(conn)
}

/// Creates the schema and applies additive column repair. Safe to call on
/// every startup; existing data is never touched.
pub fn initialize(db_path: &Path) -> Result<()> {
    let conn = open(db_path)?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS attendance_events (
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL DEFAULT '',
            person_id TEXT NOT NULL,
            person_name TEXT NOT NULL DEFAULT '',
            event_type TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            location TEXT NOT NULL DEFAULT '',
            site_id TEXT,
            sector_id INTEGER,
            status TEXT NOT NULL DEFAULT 'Pendente',
            synced INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_attendance_person_ts
            ON attendance_events(person_id, timestamp);
        CREATE INDEX IF NOT EXISTS idx_attendance_synced
            ON attendance_events(synced);

        CREATE TABLE IF NOT EXISTS biometrics (
            id TEXT PRIMARY KEY,
            person_id TEXT NOT NULL,
            person_name TEXT NOT NULL DEFAULT '',
            finger_index INTEGER NOT NULL DEFAULT 0,
            template_hash TEXT NOT NULL DEFAULT '',
            template BLOB NOT NULL,
            created_at TEXT NOT NULL,
            synced INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_biometrics_person
            ON biometrics(person_id);
        CREATE INDEX IF NOT EXISTS idx_biometrics_synced
            ON biometrics(synced);

        CREATE TABLE IF NOT EXISTS sectors (
            id INTEGER NOT NULL,
            site_id TEXT NOT NULL,
            name TEXT NOT NULL,
            last_sync_time TEXT,
            PRIMARY KEY (id, site_id)
        );

        CREATE TABLE IF NOT EXISTS local_credential (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            password_hash TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );",
    )?;

    // Columns added after the first shipped schema.
    ensure_column_exists(&conn, "attendance_events", "is_manual", "INTEGER NOT NULL DEFAULT 0")?;
    ensure_column_exists(&conn, "attendance_events", "last_sync_time", "TEXT")?;
    ensure_column_exists(&conn, "biometrics", "last_sync_time", "TEXT")?;

    Ok(())
}

/// Adds a column when it is missing. Check-then-alter keeps upgrades
/// idempotent and never loses existing rows.
pub fn ensure_column_exists(
    conn: &Connection,
    table: &str,
    column: &str,
    declaration: &str,
) -> Result<()> {
    if column_exists(conn, table, column)? {
        return Ok(());
    }
    debug!("[Storage] Adding column {}.{}", table, column);
    conn.execute(
        &format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_identifier(table),
            quote_identifier(column),
            declaration
        ),
        [],
    )?;
    Ok(())
}

pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!(
        "PRAGMA table_info({})",
        quote_identifier(table)
    ))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get("name")?;
        if name.eq_ignore_ascii_case(column) {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("ponto.db");
        initialize(&path).expect("first init");
        initialize(&path).expect("second init");
    }

    #[test]
    fn ensure_column_adds_once() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("ponto.db");
        initialize(&path).expect("init");

        let conn = open(&path).expect("open");
        assert!(!column_exists(&conn, "sectors", "extra").expect("check"));
        ensure_column_exists(&conn, "sectors", "extra", "TEXT").expect("add");
        ensure_column_exists(&conn, "sectors", "extra", "TEXT").expect("noop");
        assert!(column_exists(&conn, "sectors", "extra").expect("check"));
    }
}
