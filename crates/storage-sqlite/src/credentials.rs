//! Single-row local credential store (manager password hash).

use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use ponto_core::models::now_local_string;

use crate::db;
use crate::errors::Result;

pub struct CredentialRepository {
    db_path: PathBuf,
}

impl CredentialRepository {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        CredentialRepository {
            db_path: db_path.into(),
        }
    }

    fn conn(&self) -> Result<Connection> {
        db::open(&self.db_path)
    }

    pub fn set_password(&self, plain: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO local_credential (id, password_hash, updated_at) \
             VALUES (1, ?1, ?2)",
            params![hash_password(plain), now_local_string()],
        )?;
        Ok(())
    }

    pub fn verify_password(&self, plain: &str) -> Result<bool> {
        let conn = self.conn()?;
        let stored: Option<String> = conn
            .query_row(
                "SELECT password_hash FROM local_credential WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(stored.is_some_and(|hash| hash == hash_password(plain)))
    }

    pub fn is_set(&self) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM local_credential WHERE id = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

fn hash_password(plain: &str) -> String {
    let digest = Sha256::digest(plain.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
