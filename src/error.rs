use thiserror::Error;

/// Central error type for the WasherWatch core
///
/// Business-rule outcomes (a lost claim race, a throttled reminder) are NOT
/// errors; they are reported as typed returns from the engine. This enum
/// covers infrastructure and caller-contract failures only.
#[derive(Error, Debug)]
pub enum WasherError {
    // ============================================================================
    // Store Errors
    // ============================================================================
    #[error("Store not initialized")]
    StoreNotInitialized,

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Machine not found: {0}")]
    MachineNotFound(String),

    #[error("Failed to write to store: {0}")]
    StoreWriteFailed(String),

    #[error("Failed to read from store: {0}")]
    StoreReadFailed(String),

    #[error("Subscription stream closed for {0}")]
    SubscriptionClosed(String),

    // ============================================================================
    // Engine Errors
    // ============================================================================
    #[error("Cycle duration must be positive, got {0}")]
    CycleDurationInvalid(f64),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    // ============================================================================
    // Notification / Relay Errors
    // ============================================================================
    #[error("Relay rejected the notification: {0}")]
    RelayRejected(String),

    #[error("Relay unreachable: {0}")]
    RelayUnreachable(String),

    #[error("Mail delivery failed: {0}")]
    DeliveryFailed(String),

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // ============================================================================
    // Generic/System Errors
    // ============================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Mutex lock error")]
    LockError,

    #[error("Internal error: {0}")]
    Internal(String),
}

// Implement conversion from PoisonError for Mutex locks
impl<T> From<std::sync::PoisonError<T>> for WasherError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        WasherError::LockError
    }
}

// Implement conversion to String for callers that surface plain messages
impl From<WasherError> for String {
    fn from(error: WasherError) -> Self {
        error.to_string()
    }
}

// Automatic conversion from url::ParseError (configuration parsing)
impl From<url::ParseError> for WasherError {
    fn from(err: url::ParseError) -> Self {
        WasherError::ConfigError(format!("Invalid URL: {}", err))
    }
}

// Helper type alias for Results
pub type WasherResult<T> = Result<T, WasherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WasherError::StoreNotInitialized;
        assert_eq!(err.to_string(), "Store not initialized");
    }

    #[test]
    fn test_error_conversion_to_string() {
        let err = WasherError::MachineNotFound("w1".to_string());
        let s: String = err.into();
        assert_eq!(s, "Machine not found: w1");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let washer_err: WasherError = io_err.into();
        assert!(matches!(washer_err, WasherError::Io(_)));
    }

    #[test]
    fn test_cycle_duration_invalid_message() {
        let err = WasherError::CycleDurationInvalid(-5.0);
        assert!(err.to_string().contains("-5"));
    }
}
