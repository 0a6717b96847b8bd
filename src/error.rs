//! Error types for the ingestion core.
//!
//! The taxonomy is closed: every fallible boundary maps into one of these
//! variants before leaving the crate. Variants carry owned messages (rather
//! than wrapped source errors) so results can be fanned out to concurrent
//! subscribers of the same in-flight request.

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum IngestError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("YouTube API quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("API configuration error: {0}")]
    ApiConfig(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("request deadline exceeded after {0}s")]
    Timeout(u64),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// Machine-readable error code for the response boundary.
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::InvalidInput(_) => "INVALID_INPUT",
            IngestError::ResourceNotFound(_) => "RESOURCE_NOT_FOUND",
            IngestError::QuotaExceeded(_) => "QUOTA_EXCEEDED",
            IngestError::ApiConfig(_) => "API_CONFIG_ERROR",
            IngestError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            IngestError::Timeout(_) => "TIMEOUT",
            IngestError::Internal(_) => "INTERNAL",
        }
    }

    /// Suggested seconds to wait before retrying, where retrying makes sense.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            IngestError::QuotaExceeded(_) => Some(3600),
            IngestError::ServiceUnavailable(_) => Some(60),
            IngestError::Timeout(_) => Some(10),
            _ => None,
        }
    }
}

/// Serializable error envelope returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl From<&IngestError> for ErrorResponse {
    fn from(err: &IngestError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            retry_after: err.retry_after(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(IngestError::InvalidInput("x".into()).code(), "INVALID_INPUT");
        assert_eq!(IngestError::QuotaExceeded("x".into()).code(), "QUOTA_EXCEEDED");
        assert_eq!(IngestError::Timeout(120).code(), "TIMEOUT");
    }

    #[test]
    fn test_retry_after_hints() {
        assert_eq!(IngestError::QuotaExceeded("q".into()).retry_after(), Some(3600));
        assert_eq!(IngestError::InvalidInput("bad".into()).retry_after(), None);
    }

    #[test]
    fn test_error_response_conversion() {
        let err = IngestError::ServiceUnavailable("upstream 503".into());
        let resp = ErrorResponse::from(&err);
        assert_eq!(resp.code, "SERVICE_UNAVAILABLE");
        assert_eq!(resp.retry_after, Some(60));
        assert!(resp.message.contains("upstream 503"));
    }
}
