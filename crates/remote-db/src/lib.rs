//! HTTP connector for the remote replicated SQL service, plus the
//! schema-adaptive write path and the bulk download readers built on it.

mod client;
mod columns;
mod download;
mod error;
mod writer;

pub use client::{RemoteDbClient, MAX_RETRIES, RETRY_DELAY_MS};
pub use columns::{ColumnCache, COLUMN_CACHE_TTL_SECS};
pub use download::{
    fetch_all_biometrics, fetch_roster, fetch_sectors, run_diagnostics, DiagnosticsReport,
};
pub use error::{RemoteDbError, Result};
pub use writer::SchemaAdaptiveWriter;
