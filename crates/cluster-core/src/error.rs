//! Error types for cluster.

use thiserror::Error;

/// Result type alias using cluster's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for cluster operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Annotation not found or soft-deleted
    #[error("Annotation not found: {0}")]
    AnnotationNotFound(uuid::Uuid),

    /// Affinity cluster not found
    #[error("Cluster not found: {0}")]
    ClusterNotFound(uuid::Uuid),

    /// Canvas node not found
    #[error("Canvas node not found: {0}")]
    CanvasNodeNotFound(uuid::Uuid),

    /// Canvas snapshot not found
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(uuid::Uuid),

    /// Study missing or owned by another organization
    #[error("Study not found: {0}")]
    StudyNotFound(uuid::Uuid),

    /// Malformed input (missing targets, bad selector, etc.)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Storage provider is not supported by the resolver
    #[error("Unsupported storage provider: {0}")]
    UnsupportedProvider(String),

    /// Uniqueness conflict surfaced to the caller
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage provider call failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for every "absent or soft-deleted" variant.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::AnnotationNotFound(_)
                | Error::ClusterNotFound(_)
                | Error::CanvasNodeNotFound(_)
                | Error::SnapshotNotFound(_)
                | Error::StudyNotFound(_)
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Validation failures are rejected before persistence and never retried.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::InvalidInput(_) | Error::UnsupportedProvider(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("test resource".to_string());
        assert_eq!(err.to_string(), "Not found: test resource");
    }

    #[test]
    fn test_error_display_annotation_not_found() {
        let id = Uuid::nil();
        let err = Error::AnnotationNotFound(id);
        assert_eq!(err.to_string(), format!("Annotation not found: {}", id));
    }

    #[test]
    fn test_error_display_cluster_not_found() {
        let id = Uuid::nil();
        let err = Error::ClusterNotFound(id);
        assert_eq!(err.to_string(), format!("Cluster not found: {}", id));
    }

    #[test]
    fn test_error_display_unsupported_provider() {
        let err = Error::UnsupportedProvider("dropbox".to_string());
        assert_eq!(err.to_string(), "Unsupported storage provider: dropbox");
    }

    #[test]
    fn test_error_display_conflict() {
        let err = Error::Conflict("annotation already in cluster".to_string());
        assert_eq!(err.to_string(), "Conflict: annotation already in cluster");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_classification_helpers() {
        assert!(Error::SnapshotNotFound(Uuid::nil()).is_not_found());
        assert!(Error::CanvasNodeNotFound(Uuid::nil()).is_not_found());
        assert!(Error::StudyNotFound(Uuid::nil()).is_not_found());
        assert!(!Error::Conflict("x".into()).is_not_found());
        assert!(Error::Conflict("x".into()).is_conflict());
        assert!(Error::InvalidInput("x".into()).is_validation());
        assert!(Error::UnsupportedProvider("x".into()).is_validation());
        assert!(!Error::Internal("x".into()).is_validation());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }
}
