use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteDbError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-success HTTP status. Retried like any other transport failure.
    #[error("remote returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The transport succeeded but the statement itself failed. Not retried;
    /// SQL errors are deterministic.
    #[error("remote statement failed: {message}")]
    Statement { message: String },

    /// Retries exhausted. The message names the attempted URL and the likely
    /// causes so an operator can act on it.
    #[error(
        "could not reach the remote database after {attempts} attempts at {url}. Check:\n\
         1. Is the auth token correct?\n\
         2. Is the remote URL correct? ({url})\n\
         3. Is there network connectivity?\n\
         4. Does the database exist on the remote service?\n\
         Last error: {message}"
    )]
    Connectivity {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Every strategy in a schema-adaptive fallback ladder failed; the
    /// message concatenates each attempt's failure.
    #[error("all insert strategies failed: {0}")]
    SchemaExhausted(String),
}

impl RemoteDbError {
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        RemoteDbError::Status {
            status,
            body: body.into(),
        }
    }

    pub fn statement(message: impl Into<String>) -> Self {
        RemoteDbError::Statement {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        RemoteDbError::Config(message.into())
    }
}

pub type Result<T> = std::result::Result<T, RemoteDbError>;
