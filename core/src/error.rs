//! Core error types shared by the tiller crates

/// Error type for wire-level and serialization failures.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Transport-level failure (connection refused, timeout, TLS, ...).
    #[error("network error: {message}")]
    Network { message: String, retryable: bool },

    /// The service answered with a non-success status.
    #[error("service error: {code}: {message}")]
    Service { code: String, message: String },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Payload could not be decoded by a non-JSON serializer
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl CoreError {
    /// Whether the operation that produced this error may be retried as-is.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Network { retryable, .. } => *retryable,
            CoreError::Service { code, .. } => {
                code == "500" || code == "503" || code.ends_with("ThrottlingException")
            }
            _ => false,
        }
    }
}

/// Result type alias for core operations
pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_error_retryable() {
        let err = CoreError::Network {
            message: "connection refused".to_string(),
            retryable: true,
        };
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "network error: connection refused");
    }

    #[test]
    fn test_service_error_retryable_by_code() {
        let err = CoreError::Service {
            code: "503".to_string(),
            message: "Service Unavailable".to_string(),
        };
        assert!(err.is_retryable());

        let err = CoreError::Service {
            code: "com.amazonaws.swf#ThrottlingException".to_string(),
            message: "Rate exceeded".to_string(),
        };
        assert!(err.is_retryable());

        let err = CoreError::Service {
            code: "400".to_string(),
            message: "Bad Request".to_string(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_serialization_error_from() {
        let result: std::result::Result<serde_json::Value, serde_json::Error> =
            serde_json::from_str("not json");
        let err: CoreError = result.unwrap_err().into();
        assert!(matches!(err, CoreError::Serialization(_)));
        assert!(!err.is_retryable());
    }
}
