//! Error taxonomy shared by the polling, metadata and publishing paths

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PiperError {
    /// Network failure or an upstream 5xx/429; retried on the next cycle
    #[error("network: {0}")]
    TransientNetwork(String),

    /// Provider or repository rejected the credentials
    #[error("auth expired: {0}")]
    AuthExpired(String),

    /// A metadata search was issued without any query parameter
    #[error("not found: {0}")]
    NotFound(String),

    /// A metadata search returned no recordings
    #[error("no results")]
    NoResults,

    /// The remote repository rejected a conditional write
    #[error("swap conflict on {0}")]
    SwapConflict(String),

    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    /// The user has no remote repository session
    #[error("no repository session for user {0}")]
    NoSession(i64),

    #[error("cancelled")]
    Cancelled,

    #[error("database: {0}")]
    Database(String),

    #[error("config: {0}")]
    Config(String),

    #[error("parse: {0}")]
    Parse(String),
}

impl PiperError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether the next poll cycle may succeed without intervention
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork(_) | Self::Cancelled)
    }
}

impl From<reqwest::Error> for PiperError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.as_u16() == 401 => PiperError::AuthExpired(err.to_string()),
            _ if err.is_decode() => PiperError::Parse(err.to_string()),
            _ => PiperError::TransientNetwork(err.to_string()),
        }
    }
}

impl From<sqlx::Error> for PiperError {
    fn from(err: sqlx::Error) -> Self {
        PiperError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for PiperError {
    fn from(err: serde_json::Error) -> Self {
        PiperError::Parse(err.to_string())
    }
}

impl From<config::ConfigError> for PiperError {
    fn from(err: config::ConfigError) -> Self {
        PiperError::Config(err.to_string())
    }
}

impl From<std::io::Error> for PiperError {
    fn from(err: std::io::Error) -> Self {
        PiperError::Config(err.to_string())
    }
}

pub type Result<T, E = PiperError> = std::result::Result<T, E>;
