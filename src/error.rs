//! Error types for the PVC remediator

use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Object is missing required field: {0}")]
    MissingObjectKey(&'static str),
}

/// Convenience alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// HTTP status code of an API error, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::KubeError(kube::Error::Api(ae)) => Some(ae.code),
            _ => None,
        }
    }

    /// The object (or its kind) does not exist
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    /// Optimistic concurrency failure on write
    pub fn is_conflict(&self) -> bool {
        self.status_code() == Some(409)
    }

    /// Whether a short requeue is likely to succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(ae)) => {
                matches!(ae.code, 409 | 429) || ae.code >= 500
            }
            Error::KubeError(kube::Error::HyperError(_))
            | Error::KubeError(kube::Error::Service(_)) => true,
            _ => false,
        }
    }

    /// Short label used for the reconcile error counter
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::KubeError(_) if self.is_conflict() => "conflict",
            Error::KubeError(_) => "kube",
            Error::ConfigError(_) => "config",
            Error::SerializationError(_) => "serialization",
            Error::MissingObjectKey(_) => "invalid_object",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16) -> Error {
        Error::KubeError(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    #[test]
    fn test_not_found_detection() {
        assert!(api_error(404).is_not_found());
        assert!(!api_error(500).is_not_found());
        assert!(!Error::ConfigError("x".into()).is_not_found());
    }

    #[test]
    fn test_retriable_classification() {
        assert!(api_error(409).is_retriable());
        assert!(api_error(429).is_retriable());
        assert!(api_error(503).is_retriable());
        assert!(!api_error(403).is_retriable());
        assert!(!Error::MissingObjectKey("metadata.name").is_retriable());
    }

    #[test]
    fn test_metric_label() {
        assert_eq!(api_error(409).metric_label(), "conflict");
        assert_eq!(api_error(500).metric_label(), "kube");
        assert_eq!(
            Error::MissingObjectKey("metadata.namespace").metric_label(),
            "invalid_object"
        );
    }
}
