use thiserror::Error;

/// Failures surfaced by the orchestrator. Remote push failures inside a
/// cycle are logged and retried on later cycles; only local faults and
/// misconfiguration reach callers.
#[derive(Debug, Error)]
pub enum SyncEngineError {
    #[error("Configuration error: {0}")]
    Core(#[from] ponto_core::CoreError),

    #[error("Local storage error: {0}")]
    Storage(#[from] ponto_storage_sqlite::StorageError),

    #[error("Remote database error: {0}")]
    Remote(#[from] ponto_remote_db::RemoteDbError),
}

pub type Result<T> = std::result::Result<T, SyncEngineError>;
