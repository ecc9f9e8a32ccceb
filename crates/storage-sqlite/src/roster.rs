//! Roster cache with a runtime-inferred schema.
//!
//! The mirrored table's columns are whatever the remote roster table has at
//! sync time; everything is stored as text. Upserts compare every projected
//! column before writing so an unchanged roster causes no churn.

use log::{debug, info};
use rusqlite::{params_from_iter, Connection};
use std::collections::HashMap;
use std::path::PathBuf;

use ponto_core::value::{get_value, Row};

use crate::db::{self, ensure_column_exists, quote_identifier, table_exists};
use crate::errors::{Result, StorageError};

const ROSTER_TABLE: &str = "roster";
const ID_COLUMN_CANDIDATES: &[&str] = &["id", "cooperado_id", "codigo"];
const STATUS_COLUMN_CANDIDATES: &[&str] = &["status", "situacao", "ativo"];

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RosterUpsertStats {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

pub struct RosterRepository {
    db_path: PathBuf,
}

impl RosterRepository {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        RosterRepository {
            db_path: db_path.into(),
        }
    }

    fn conn(&self) -> Result<Connection> {
        db::open(&self.db_path)
    }

    /// Creates or extends the mirror table to match the remote column list.
    /// Existing columns and data are never dropped.
    pub fn ensure_table(&self, columns: &[String]) -> Result<()> {
        if columns.is_empty() {
            return Err(StorageError::invalid_data("roster column list is empty"));
        }
        let conn = self.conn()?;
        if !table_exists(&conn, ROSTER_TABLE)? {
            let id_column = id_column(columns);
            let decls: Vec<String> = columns
                .iter()
                .map(|col| {
                    if Some(col.as_str()) == id_column {
                        format!("{} TEXT PRIMARY KEY", quote_identifier(col))
                    } else {
                        format!("{} TEXT", quote_identifier(col))
                    }
                })
                .collect();
            conn.execute(
                &format!("CREATE TABLE {} ({})", ROSTER_TABLE, decls.join(", ")),
                [],
            )?;
            info!(
                "[Storage] Created roster table with {} remote columns",
                columns.len()
            );
            return Ok(());
        }
        for col in columns {
            ensure_column_exists(&conn, ROSTER_TABLE, col, "TEXT")?;
        }
        Ok(())
    }

    /// Upserts a downloaded roster batch in one transaction. Input rows are
    /// deduplicated by id (first occurrence wins); rows whose every column
    /// projection matches the stored row are skipped.
    pub fn bulk_upsert(&self, columns: &[String], rows: &[Row]) -> Result<RosterUpsertStats> {
        self.ensure_table(columns)?;
        let Some(id_col) = id_column(columns).map(str::to_string) else {
            return Err(StorageError::invalid_data(
                "roster has no recognizable id column",
            ));
        };

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut stats = RosterUpsertStats::default();
        let mut seen_ids: Vec<String> = Vec::new();

        for row in rows {
            let projections: Vec<(String, String)> = columns
                .iter()
                .map(|col| {
                    let value = get_value(row, &[col.as_str()])
                        .map(|v| v.to_display_string())
                        .unwrap_or_default();
                    (col.clone(), value)
                })
                .collect();
            let Some(id_value) = projections
                .iter()
                .find(|(col, _)| *col == id_col)
                .map(|(_, value)| value.clone())
                .filter(|value| !value.is_empty())
            else {
                debug!("[Storage] Skipping roster row without an id value");
                continue;
            };
            if seen_ids.contains(&id_value) {
                continue;
            }
            seen_ids.push(id_value.clone());

            let existing = load_projection(&tx, &id_col, &id_value, columns)?;
            match existing {
                Some(stored) if stored == projections => {
                    stats.unchanged += 1;
                    continue;
                }
                Some(_) => stats.updated += 1,
                None => stats.inserted += 1,
            }

            let column_list: Vec<String> = projections
                .iter()
                .map(|(col, _)| quote_identifier(col))
                .collect();
            let placeholders = vec!["?"; projections.len()].join(", ");
            tx.execute(
                &format!(
                    "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
                    ROSTER_TABLE,
                    column_list.join(", "),
                    placeholders
                ),
                params_from_iter(projections.iter().map(|(_, value)| value.clone())),
            )?;
        }
        tx.commit()?;

        info!(
            "[Storage] Roster upsert: {} inserted, {} updated, {} unchanged",
            stats.inserted, stats.updated, stats.unchanged
        );
        Ok(stats)
    }

    pub fn count(&self) -> Result<i64> {
        let conn = self.conn()?;
        if !table_exists(&conn, ROSTER_TABLE)? {
            return Ok(0);
        }
        let count = conn.query_row(&format!("SELECT COUNT(*) FROM {}", ROSTER_TABLE), [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    /// Status label for a person, when the mirrored schema carries one.
    pub fn person_status(&self, person_id: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        if !table_exists(&conn, ROSTER_TABLE)? {
            return Ok(None);
        }
        let local_columns = local_columns(&conn)?;
        let Some(id_col) = first_present(&local_columns, ID_COLUMN_CANDIDATES) else {
            return Ok(None);
        };
        let Some(status_col) = first_present(&local_columns, STATUS_COLUMN_CANDIDATES) else {
            return Ok(None);
        };
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {} WHERE {} = ?1 LIMIT 1",
            quote_identifier(&status_col),
            ROSTER_TABLE,
            quote_identifier(&id_col)
        ))?;
        let mut rows = stmt.query_map([person_id], |row| row.get::<_, Option<String>>(0))?;
        match rows.next() {
            Some(status) => Ok(status?),
            None => Ok(None),
        }
    }

    /// Removes duplicate rows sharing an id, keeping the earliest. A no-op
    /// when the table was created with an id primary key.
    pub fn dedupe(&self) -> Result<usize> {
        let conn = self.conn()?;
        if !table_exists(&conn, ROSTER_TABLE)? {
            return Ok(0);
        }
        let local_columns = local_columns(&conn)?;
        let Some(id_col) = first_present(&local_columns, ID_COLUMN_CANDIDATES) else {
            return Ok(0);
        };
        let removed = conn.execute(
            &format!(
                "DELETE FROM {table} WHERE rowid NOT IN \
                 (SELECT MIN(rowid) FROM {table} GROUP BY {id})",
                table = ROSTER_TABLE,
                id = quote_identifier(&id_col)
            ),
            [],
        )?;
        Ok(removed)
    }
}

fn id_column(columns: &[String]) -> Option<&str> {
    for candidate in ID_COLUMN_CANDIDATES {
        if let Some(col) = columns
            .iter()
            .find(|col| col.eq_ignore_ascii_case(candidate))
        {
            return Some(col.as_str());
        }
    }
    None
}

fn first_present(local_columns: &[String], candidates: &[&str]) -> Option<String> {
    for candidate in candidates {
        if let Some(col) = local_columns
            .iter()
            .find(|col| col.eq_ignore_ascii_case(candidate))
        {
            return Some(col.clone());
        }
    }
    None
}

fn local_columns(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", ROSTER_TABLE))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>("name"))?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

fn load_projection(
    conn: &Connection,
    id_col: &str,
    id_value: &str,
    columns: &[String],
) -> Result<Option<Vec<(String, String)>>> {
    let column_list: Vec<String> = columns.iter().map(|col| quote_identifier(col)).collect();
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} WHERE {} = ?1 LIMIT 1",
        column_list.join(", "),
        ROSTER_TABLE,
        quote_identifier(id_col)
    ))?;
    let mut rows = stmt.query([id_value])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let mut projection = Vec::with_capacity(columns.len());
    for (i, col) in columns.iter().enumerate() {
        let value: Option<String> = row.get(i)?;
        projection.push((col.clone(), value.unwrap_or_default()));
    }
    Ok(Some(projection))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ponto_core::value::SqlValue;
    use tempfile::tempdir;

    fn repo() -> (tempfile::TempDir, RosterRepository) {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("ponto.db");
        db::initialize(&path).expect("init");
        (dir, RosterRepository::new(path))
    }

    fn columns() -> Vec<String> {
        vec!["id".to_string(), "nome".to_string(), "status".to_string()]
    }

    fn roster_row(id: &str, nome: &str, status: &str) -> Row {
        let mut row = Row::new();
        row.insert("id".to_string(), SqlValue::Text(id.to_string()));
        row.insert("nome".to_string(), SqlValue::Text(nome.to_string()));
        row.insert("status".to_string(), SqlValue::Text(status.to_string()));
        row
    }

    #[test]
    fn upsert_inserts_then_detects_unchanged_rows() {
        let (_dir, repo) = repo();
        let rows = vec![roster_row("p1", "Ana", "ativo"), roster_row("p2", "Bia", "ativo")];

        let first = repo.bulk_upsert(&columns(), &rows).expect("first pass");
        assert_eq!(first.inserted, 2);
        assert_eq!(first.unchanged, 0);

        let second = repo.bulk_upsert(&columns(), &rows).expect("second pass");
        assert_eq!(second.inserted, 0);
        assert_eq!(second.unchanged, 2);

        let mut changed = rows.clone();
        changed[0] = roster_row("p1", "Ana", "inativo");
        let third = repo.bulk_upsert(&columns(), &changed).expect("third pass");
        assert_eq!(third.updated, 1);
        assert_eq!(third.unchanged, 1);

        assert_eq!(repo.count().expect("count"), 2);
    }

    #[test]
    fn duplicate_ids_in_batch_keep_first_occurrence() {
        let (_dir, repo) = repo();
        let rows = vec![roster_row("p1", "Ana", "ativo"), roster_row("p1", "Clone", "ativo")];

        repo.bulk_upsert(&columns(), &rows).expect("upsert");

        assert_eq!(repo.count().expect("count"), 1);
        assert_eq!(
            repo.person_status("p1").expect("status"),
            Some("ativo".to_string())
        );
    }

    #[test]
    fn schema_growth_adds_columns_without_losing_rows() {
        let (_dir, repo) = repo();
        repo.bulk_upsert(&columns(), &[roster_row("p1", "Ana", "ativo")])
            .expect("initial");

        let mut wider = columns();
        wider.push("cpf".to_string());
        let mut row = roster_row("p1", "Ana", "ativo");
        row.insert("cpf".to_string(), SqlValue::Text("123".to_string()));
        let stats = repo.bulk_upsert(&wider, &[row]).expect("wider upsert");

        assert_eq!(stats.updated, 1);
        assert_eq!(repo.count().expect("count"), 1);
    }

    #[test]
    fn dedupe_collapses_rows_sharing_an_id() {
        let (_dir, repo) = repo();
        // A legacy mirror without an id primary key can accumulate dups.
        let conn = repo.conn().expect("conn");
        conn.execute("CREATE TABLE roster (cooperado_id TEXT, nome TEXT)", [])
            .expect("create");
        conn.execute(
            "INSERT INTO roster (cooperado_id, nome) VALUES ('p1', 'Ana'), ('p1', 'Ana'), ('p2', 'Bia')",
            [],
        )
        .expect("insert");

        assert_eq!(repo.dedupe().expect("dedupe"), 1);
        assert_eq!(repo.count().expect("count"), 2);
        assert_eq!(repo.dedupe().expect("rerun"), 0);
    }

    #[test]
    fn person_status_reads_alias_columns() {
        let (_dir, repo) = repo();
        let cols = vec!["cooperado_id".to_string(), "situacao".to_string()];
        let mut row = Row::new();
        row.insert("cooperado_id".to_string(), SqlValue::Text("p9".to_string()));
        row.insert("situacao".to_string(), SqlValue::Text("inativo".to_string()));
        repo.bulk_upsert(&cols, &[row]).expect("upsert");

        assert_eq!(
            repo.person_status("p9").expect("status"),
            Some("inativo".to_string())
        );
        assert_eq!(repo.person_status("missing").expect("status"), None);
    }
}
