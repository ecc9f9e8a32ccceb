//! Remote column introspection with TTL caching.
//!
//! Remote schemas vary per deployment and evolve over time, so column maps
//! are fetched at call time and kept only for a short window. Staleness up
//! to the TTL is tolerated; the cache is never push-invalidated.

use log::debug;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::client::RemoteDbClient;
use crate::error::Result;

/// How long a fetched column map stays valid.
pub const COLUMN_CACHE_TTL_SECS: u64 = 600;

#[derive(Debug, Clone)]
struct CachedColumns {
    /// Lowercased column name to uppercased declared type.
    columns: HashMap<String, String>,
    fetched_at: Instant,
}

/// Per-table column map cache, owned by the write path instance.
#[derive(Debug, Default)]
pub struct ColumnCache {
    entries: Mutex<HashMap<String, CachedColumns>>,
}

impl ColumnCache {
    pub fn new() -> Self {
        ColumnCache::default()
    }

    /// Returns the cached column map for `table`, refreshing it through the
    /// client when missing or older than the TTL.
    pub async fn get_or_refresh(
        &self,
        client: &RemoteDbClient,
        table: &str,
    ) -> Result<HashMap<String, String>> {
        let ttl = Duration::from_secs(COLUMN_CACHE_TTL_SECS);
        if let Ok(entries) = self.entries.lock() {
            if let Some(cached) = entries.get(table) {
                if cached.fetched_at.elapsed() < ttl {
                    return Ok(cached.columns.clone());
                }
            }
        }

        let rows = client
            .execute_query(&format!("PRAGMA table_info({})", table), &[])
            .await?;
        let mut columns = HashMap::new();
        for row in rows {
            let Some(name) = row.get("name").and_then(|v| v.as_str()) else {
                continue;
            };
            let decl_type = row
                .get("type")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_ascii_uppercase();
            columns.insert(name.to_ascii_lowercase(), decl_type);
        }
        debug!(
            "[RemoteDb] Refreshed column map for {}: {} columns",
            table,
            columns.len()
        );

        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                table.to_string(),
                CachedColumns {
                    columns: columns.clone(),
                    fetched_at: Instant::now(),
                },
            );
        }
        Ok(columns)
    }

    /// Drops a table's cached map so the next call re-fetches it.
    pub fn invalidate(&self, table: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(table);
        }
    }
}
