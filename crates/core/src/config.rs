//! Configuration surface consumed by the sync engine.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Connection and cadence settings, supplied by the host application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Remote base URL. A `libsql://` scheme is rewritten to `https://`.
    pub remote_url: String,
    /// Bearer token for the remote service.
    pub auth_token: String,
    /// Site this installation belongs to, if configured.
    pub site_id: Option<String>,
    /// Roster re-download cadence in minutes. Zero disables the refresh.
    pub roster_refresh_minutes: u64,
}

impl SyncSettings {
    pub fn validate(&self) -> Result<()> {
        if self.remote_url.trim().is_empty() {
            return Err(CoreError::config("remote URL is not set"));
        }
        if self.auth_token.trim().is_empty() {
            return Err(CoreError::config("remote auth token is not set"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SyncSettings {
        SyncSettings {
            remote_url: "libsql://db.example.turso.io".to_string(),
            auth_token: "token".to_string(),
            site_id: Some("h1".to_string()),
            roster_refresh_minutes: 30,
        }
    }

    #[test]
    fn validate_accepts_complete_settings() {
        assert!(settings().validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_url_or_token() {
        let mut s = settings();
        s.remote_url = "  ".to_string();
        assert!(s.validate().is_err());

        let mut s = settings();
        s.auth_token = String::new();
        assert!(s.validate().is_err());
    }
}
