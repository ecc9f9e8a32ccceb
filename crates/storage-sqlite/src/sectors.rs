//! Sector cache: fully replaced per site on each successful remote fetch.

use rusqlite::{params, Connection, Row as SqliteRow};
use std::path::PathBuf;

use ponto_core::models::{now_local_string, Sector};

use crate::db;
use crate::errors::Result;

pub struct SectorRepository {
    db_path: PathBuf,
}

impl SectorRepository {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        SectorRepository {
            db_path: db_path.into(),
        }
    }

    fn conn(&self) -> Result<Connection> {
        db::open(&self.db_path)
    }

    /// Delete-then-insert replacement for one site, atomically.
    pub fn replace_for_site(&self, site_id: &str, sectors: &[Sector]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM sectors WHERE site_id = ?1", [site_id])?;
        for sector in sectors {
            tx.execute(
                "INSERT INTO sectors (id, site_id, name, last_sync_time) VALUES (?1, ?2, ?3, ?4)",
                params![
                    sector.id,
                    site_id,
                    sector.name,
                    sector
                        .last_sync_time
                        .clone()
                        .unwrap_or_else(now_local_string)
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_for_site(&self, site_id: &str) -> Result<Vec<Sector>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, site_id, name, last_sync_time FROM sectors \
             WHERE site_id = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map([site_id], row_to_sector)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }
}

fn row_to_sector(row: &SqliteRow<'_>) -> rusqlite::Result<Sector> {
    Ok(Sector {
        id: row.get("id")?,
        site_id: row.get("site_id")?,
        name: row.get("name")?,
        last_sync_time: row.get("last_sync_time")?,
    })
}
