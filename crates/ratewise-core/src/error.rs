use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for the ratewise system.
///
/// Infrastructure failures (`Storage`, `Search`, `Io`, ...) sit next to the
/// domain outcomes of rate resolution. `NotFound` and `Timeout` are expected
/// outcomes that callers usually absorb rather than propagate.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RatewiseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Malformed ingestion input or query criteria. Nothing was written.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Stored rate data violates an invariant (overlapping weight brackets,
    /// inverted validity window).
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// The semantic record exists but the structured write could not even be
    /// queued for retry.
    #[error("Partial ingestion failure for document {document_id}: {reason}")]
    PartialIngestion { document_id: Uuid, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl RatewiseError {
    /// True for `NotFound`, which resolution treats as "no rate here".
    pub fn is_not_found(&self) -> bool {
        matches!(self, RatewiseError::NotFound(_))
    }
}

impl From<toml::de::Error> for RatewiseError {
    fn from(err: toml::de::Error) -> Self {
        RatewiseError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for RatewiseError {
    fn from(err: toml::ser::Error) -> Self {
        RatewiseError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for RatewiseError {
    fn from(err: serde_json::Error) -> Self {
        RatewiseError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for ratewise operations.
pub type Result<T> = std::result::Result<T, RatewiseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let cases: Vec<(RatewiseError, &str)> = vec![
            (
                RatewiseError::Config("bad key".to_string()),
                "Configuration error: bad key",
            ),
            (
                RatewiseError::Validation("route has no tiers".to_string()),
                "Validation error: route has no tiers",
            ),
            (
                RatewiseError::DataIntegrity("tiers overlap".to_string()),
                "Data integrity error: tiers overlap",
            ),
            (
                RatewiseError::NotFound("no tier".to_string()),
                "Not found: no tier",
            ),
            (
                RatewiseError::Timeout("candidate".to_string()),
                "Timed out: candidate",
            ),
            (RatewiseError::ShuttingDown, "Shutdown in progress"),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_partial_ingestion_mentions_document() {
        let id = Uuid::new_v4();
        let err = RatewiseError::PartialIngestion {
            document_id: id,
            reason: "queue unavailable".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains(&id.to_string()));
        assert!(msg.contains("queue unavailable"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RatewiseError = io_err.into();
        assert!(matches!(err, RatewiseError::Io(_)));
        assert!(err.to_string().starts_with("I/O error:"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let err: RatewiseError = err.unwrap_err().into();
        assert!(matches!(err, RatewiseError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let err: RatewiseError = err.unwrap_err().into();
        assert!(matches!(err, RatewiseError::Serialization(_)));
    }

    #[test]
    fn test_is_not_found() {
        assert!(RatewiseError::NotFound("x".into()).is_not_found());
        assert!(!RatewiseError::DataIntegrity("x".into()).is_not_found());
    }
}
