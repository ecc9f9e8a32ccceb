use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl StorageError {
    pub fn invalid_data(message: impl Into<String>) -> Self {
        StorageError::InvalidData(message.into())
    }
}

impl From<StorageError> for ponto_core::CoreError {
    fn from(err: StorageError) -> Self {
        ponto_core::CoreError::store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
