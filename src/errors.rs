use thiserror::Error;

/// Domain error type shared across the store, scheduler, bus and façade.
#[derive(Debug, Error)]
pub enum AlarmError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Lost a compare-and-set race on alarm status.
    #[error("Stale CAS: {0}")]
    Stale(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl From<std::io::Error> for AlarmError {
    fn from(e: std::io::Error) -> Self {
        AlarmError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for AlarmError {
    fn from(e: serde_json::Error) -> Self {
        AlarmError::Storage(e.to_string())
    }
}

impl From<sqlx::Error> for AlarmError {
    fn from(e: sqlx::Error) -> Self {
        AlarmError::Storage(e.to_string())
    }
}
