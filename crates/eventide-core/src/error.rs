//! Error types shared across the Eventide workspace

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Deadline exceeded: {0}")]
    Timeout(String),

    #[error("Rate limit exceeded{}", retry_after_secs.map(|s| format!(": retry after {}s", s)).unwrap_or_default())]
    RateLimitExceeded { retry_after_secs: Option<u64> },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cache error: {0}")]
    Cache(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a retry could plausibly succeed (store/cache flaps).
    ///
    /// The tracker's flush loop uses this to decide between backing off and
    /// dropping the batch on the floor.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Cache(_) | Error::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::Database("connection reset".into()).is_transient());
        assert!(Error::Timeout("deadline".into()).is_transient());
        assert!(!Error::Validation("empty name".into()).is_transient());
        assert!(!Error::Conflict("duplicate".into()).is_transient());
    }

    #[test]
    fn test_rate_limit_display() {
        let err = Error::RateLimitExceeded {
            retry_after_secs: Some(42),
        };
        assert!(err.to_string().contains("retry after 42s"));

        let err = Error::RateLimitExceeded {
            retry_after_secs: None,
        };
        assert_eq!(err.to_string(), "Rate limit exceeded");
    }
}
