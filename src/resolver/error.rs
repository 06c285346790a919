use crate::engine::EngineError;
use crate::metrics_view::MetricsViewStoreError;
use crate::pivot::PivotError;
use std::fmt;
use thiserror::Error;

/// Why execution failed, coarse enough for a caller to decide on a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Rejected,
    Connection,
    ResourceExhausted,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Rejected => "rejected",
            FailureKind::Connection => "connection",
            FailureKind::ResourceExhausted => "resource exhausted",
        };
        write!(f, "{}", s)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolverError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Execution failed ({kind}): {message}")]
    ExecutionFailure { kind: FailureKind, message: String },

    #[error("Request cancelled")]
    Cancelled,
}

impl ResolverError {
    pub fn execution(kind: FailureKind, message: impl Into<String>) -> Self {
        ResolverError::ExecutionFailure {
            kind,
            message: message.into(),
        }
    }

    /// True when the same request may succeed if issued again unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ResolverError::ExecutionFailure {
                kind: FailureKind::Timeout | FailureKind::Connection | FailureKind::ResourceExhausted,
                ..
            }
        )
    }
}

impl From<EngineError> for ResolverError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::Cancelled => ResolverError::Cancelled,
            EngineError::Timeout(message) => ResolverError::execution(FailureKind::Timeout, message),
            EngineError::ConnectionError(message) => {
                ResolverError::execution(FailureKind::Connection, message)
            }
            EngineError::ResourceExhausted(message) => {
                ResolverError::execution(FailureKind::ResourceExhausted, message)
            }
            EngineError::QueryError(message) | EngineError::Unsupported(message) => {
                ResolverError::execution(FailureKind::Rejected, message)
            }
        }
    }
}

impl From<PivotError> for ResolverError {
    fn from(error: PivotError) -> Self {
        ResolverError::InvalidRequest(error.to_string())
    }
}

impl From<MetricsViewStoreError> for ResolverError {
    fn from(error: MetricsViewStoreError) -> Self {
        match error {
            MetricsViewStoreError::MetricsViewNotFound(_)
            | MetricsViewStoreError::DimensionNotFound(_)
            | MetricsViewStoreError::MeasureNotFound(_) => {
                ResolverError::InvalidRequest(error.to_string())
            }
            MetricsViewStoreError::FileNotFound(_)
            | MetricsViewStoreError::InvalidJsonFormat(_)
            | MetricsViewStoreError::InvalidSchema(_) => {
                ResolverError::execution(FailureKind::Rejected, error.to_string())
            }
            MetricsViewStoreError::Storage(_) => {
                ResolverError::execution(FailureKind::Connection, error.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::timeout(EngineError::Timeout("slow".into()), Some(FailureKind::Timeout), true)]
    #[case::connection(EngineError::ConnectionError("down".into()), Some(FailureKind::Connection), true)]
    #[case::exhausted(EngineError::ResourceExhausted("oom".into()), Some(FailureKind::ResourceExhausted), true)]
    #[case::query(EngineError::QueryError("bad column".into()), Some(FailureKind::Rejected), false)]
    #[case::unsupported(EngineError::Unsupported("median".into()), Some(FailureKind::Rejected), false)]
    #[case::cancelled(EngineError::Cancelled, None, false)]
    fn test_engine_error_mapping(
        #[case] error: EngineError,
        #[case] kind: Option<FailureKind>,
        #[case] retryable: bool,
    ) {
        let resolved = ResolverError::from(error);
        match (&resolved, kind) {
            (ResolverError::ExecutionFailure { kind: actual, .. }, Some(expected)) => {
                assert_eq!(*actual, expected)
            }
            (ResolverError::Cancelled, None) => {}
            other => panic!("unexpected mapping {:?}", other),
        }
        assert_eq!(resolved.is_retryable(), retryable);
    }

    #[test]
    fn test_invalid_request_is_not_retryable() {
        assert!(!ResolverError::InvalidRequest("x".to_string()).is_retryable());
    }

    #[rstest]
    #[case::file_not_found(MetricsViewStoreError::FileNotFound("views.json".into()), FailureKind::Rejected, false)]
    #[case::bad_json(MetricsViewStoreError::InvalidJsonFormat("eof".into()), FailureKind::Rejected, false)]
    #[case::bad_schema(MetricsViewStoreError::InvalidSchema("no measures".into()), FailureKind::Rejected, false)]
    #[case::storage(MetricsViewStoreError::Storage("throttled".into()), FailureKind::Connection, true)]
    fn test_store_error_mapping(
        #[case] error: MetricsViewStoreError,
        #[case] kind: FailureKind,
        #[case] retryable: bool,
    ) {
        let resolved = ResolverError::from(error);
        assert!(matches!(&resolved, ResolverError::ExecutionFailure { kind: actual, .. } if *actual == kind));
        assert_eq!(resolved.is_retryable(), retryable);
    }

    #[test]
    fn test_missing_view_is_invalid_request() {
        let error = ResolverError::from(MetricsViewStoreError::MetricsViewNotFound(
            "ad_bids_metrics".to_string(),
        ));
        assert!(matches!(error, ResolverError::InvalidRequest(m) if m.contains("ad_bids_metrics")));
    }
}
