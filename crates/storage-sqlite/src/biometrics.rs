//! Biometric template persistence.

use rusqlite::{params, Connection, Row as SqliteRow};
use std::path::PathBuf;

use ponto_core::models::{now_local_string, BiometricRecord};

use crate::db;
use crate::errors::{Result, StorageError};

pub struct BiometricRepository {
    db_path: PathBuf,
}

const SELECT_COLUMNS: &str = "id, person_id, person_name, finger_index, template_hash, \
                              template, created_at, synced, last_sync_time";

impl BiometricRepository {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        BiometricRepository {
            db_path: db_path.into(),
        }
    }

    fn conn(&self) -> Result<Connection> {
        db::open(&self.db_path)
    }

    /// Persists a freshly-enrolled record, pending upload.
    pub fn save(&self, record: &BiometricRecord) -> Result<()> {
        if record.template.is_empty() {
            return Err(StorageError::invalid_data("empty biometric template"));
        }
        let conn = self.conn()?;
        insert_record(&conn, record)?;
        Ok(())
    }

    pub fn list_pending(&self, limit: i64) -> Result<Vec<BiometricRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM biometrics WHERE synced = 0 ORDER BY created_at LIMIT ?1",
            SELECT_COLUMNS
        ))?;
        let rows = stmt.query_map([limit], row_to_record)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// All enrolled templates, for the identity verifier.
    pub fn list_all(&self) -> Result<Vec<BiometricRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM biometrics ORDER BY created_at",
            SELECT_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_record)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn mark_synced(&self, record_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE biometrics SET synced = 1, last_sync_time = ?1 WHERE id = ?2",
            params![now_local_string(), record_id],
        )?;
        Ok(())
    }

    /// Upserts a downloaded batch in one transaction, every row flagged
    /// synced so the batch is never re-uploaded.
    pub fn bulk_upsert_synced(&self, records: &[BiometricRecord]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut stored = 0;
        for record in records {
            if record.template.is_empty() {
                continue;
            }
            let mut synced_record = record.clone();
            synced_record.synced = true;
            if synced_record.last_sync_time.is_none() {
                synced_record.last_sync_time = Some(now_local_string());
            }
            insert_record(&tx, &synced_record)?;
            stored += 1;
        }
        tx.commit()?;
        Ok(stored)
    }

    pub fn count_unsynced(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM biometrics WHERE synced = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// First-install detection: no record has ever been marked synced.
    pub fn is_first_install(&self) -> Result<bool> {
        let conn = self.conn()?;
        let synced: i64 = conn.query_row(
            "SELECT COUNT(*) FROM biometrics WHERE synced = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(synced == 0)
    }
}

fn insert_record(conn: &Connection, record: &BiometricRecord) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO biometrics (id, person_id, person_name, finger_index, \
         template_hash, template, created_at, synced, last_sync_time) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            record.id,
            record.person_id,
            record.person_name,
            record.finger_index,
            record.template_hash,
            record.template,
            record.created_at,
            record.synced as i64,
            record.last_sync_time,
        ],
    )?;
    Ok(())
}

fn row_to_record(row: &SqliteRow<'_>) -> rusqlite::Result<BiometricRecord> {
    Ok(BiometricRecord {
        id: row.get("id")?,
        person_id: row.get("person_id")?,
        person_name: row.get("person_name")?,
        finger_index: row.get("finger_index")?,
        template_hash: row.get("template_hash")?,
        template: row.get("template")?,
        created_at: row.get("created_at")?,
        synced: row.get::<_, i64>("synced")? != 0,
        last_sync_time: row.get("last_sync_time")?,
    })
}
