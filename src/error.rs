//! Error taxonomy for a polling cycle.
//!
//! [`PollerError::Auth`] and [`PollerError::Fetch`] are treated as transient and
//! retried by [`crate::retry::RetryPolicy`]; every other variant fails the cycle
//! on the first occurrence.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Fetch failed: {0}")]
    Fetch(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Unknown feed type: {0}")]
    UnknownFeedType(String),
    #[error("Not implemented: {0}")]
    NotImplemented(String),
    #[error("Store error: {0}")]
    Store(String),
}

impl PollerError {
    /// Returns `true` for errors worth another attempt within the same cycle.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PollerError::Auth(_) | PollerError::Fetch(_))
    }
}

impl From<reqwest::Error> for PollerError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                PollerError::Auth(e.to_string())
            }
            _ => PollerError::Fetch(e.to_string()),
        }
    }
}

impl From<prost::DecodeError> for PollerError {
    fn from(e: prost::DecodeError) -> Self {
        PollerError::Parse(e.to_string())
    }
}

impl From<serde_json::Error> for PollerError {
    fn from(e: serde_json::Error) -> Self {
        PollerError::Parse(e.to_string())
    }
}

#[cfg(feature = "redis-store")]
impl From<redis::RedisError> for PollerError {
    fn from(e: redis::RedisError) -> Self {
        PollerError::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PollerError>;
