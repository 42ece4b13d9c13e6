//! Domain error taxonomy surfaced to callers.
//!
//! Every terminal failure produced by the execution engine is an [`Error`]
//! carrying exactly one [`ErrorKind`]. Transport-specific statuses never leak
//! past the enhancer; callers branch on the kind alone.

use std::fmt;
use std::time::Duration;

use crate::retry::RetryReason;

/// Convenience alias used throughout the workspace.
pub type Result<T, E = Error> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Stable, transport-independent error vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ErrorKind {
    // ----- configuration / programming errors -----
    #[error("invalid configuration")]
    InvalidConfiguration,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("feature not available")]
    FeatureNotAvailable,

    // ----- lifecycle -----
    #[error("unambiguous timeout")]
    UnambiguousTimeout,
    #[error("ambiguous timeout")]
    AmbiguousTimeout,
    #[error("request canceled")]
    RequestCanceled,

    // ----- service level -----
    #[error("service not available")]
    ServiceNotAvailable,
    #[error("internal server failure")]
    InternalServerFailure,
    #[error("authentication failure")]
    AuthenticationFailure,
    #[error("temporary failure")]
    TemporaryFailure,
    #[error("rate limited")]
    RateLimited,
    #[error("quota limited")]
    QuotaLimited,

    // ----- key-value -----
    #[error("document not found")]
    DocumentNotFound,
    #[error("document exists")]
    DocumentExists,
    #[error("document locked")]
    DocumentLocked,
    #[error("document not locked")]
    DocumentNotLocked,
    #[error("cas mismatch")]
    CasMismatch,
    #[error("value too large")]
    ValueTooLarge,
    #[error("path not found")]
    PathNotFound,
    #[error("path exists")]
    PathExists,

    // ----- durability -----
    #[error("durability level not available")]
    DurabilityLevelNotAvailable,
    #[error("durability impossible")]
    DurabilityImpossible,
    #[error("durability ambiguous")]
    DurabilityAmbiguous,
    #[error("durable write in progress")]
    DurableWriteInProgress,
    #[error("durable write re-commit in progress")]
    DurableWriteReCommitInProgress,

    // ----- keyspace / index management -----
    #[error("bucket not found")]
    BucketNotFound,
    #[error("bucket exists")]
    BucketExists,
    #[error("scope not found")]
    ScopeNotFound,
    #[error("scope exists")]
    ScopeExists,
    #[error("collection not found")]
    CollectionNotFound,
    #[error("collection exists")]
    CollectionExists,
    #[error("index not found")]
    IndexNotFound,
    #[error("index exists")]
    IndexExists,
    #[error("management operation failed")]
    GenericManagement,

    // ----- fallback -----
    #[error("transport failure")]
    Transport,
}

impl ErrorKind {
    /// True for both flavours of deadline expiry.
    #[must_use]
    pub fn is_timeout(self) -> bool {
        matches!(self, Self::UnambiguousTimeout | Self::AmbiguousTimeout)
    }
}

// ---------------------------------------------------------------------------
// RetryContext
// ---------------------------------------------------------------------------

/// Retry bookkeeping attached to errors that end an execution loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryContext {
    /// Operation name (e.g. `"get"`, `"manager_collections_create_scope"`).
    pub operation: String,
    /// Per-call correlation id.
    pub operation_id: String,
    /// Number of retries performed before the loop stopped.
    pub retry_attempts: u32,
    /// Reason recorded for each retry, in order.
    pub retry_reasons: Vec<RetryReason>,
    /// Wall time between descriptor creation and the terminal failure.
    pub time_observed: Duration,
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// The single error value returned to callers.
#[derive(Debug, thiserror::Error)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    context: Option<Box<RetryContext>>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    /// Creates an error of the given kind with a human-readable message.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: None,
            source: None,
        }
    }

    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    #[must_use]
    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfiguration, message)
    }

    #[must_use]
    pub fn feature_not_available(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FeatureNotAvailable, message)
    }

    /// Wraps an opaque collaborator error as a generic transport failure.
    #[must_use]
    pub fn transport(err: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Transport,
            message: err.to_string(),
            context: None,
            source: Some(err.into()),
        }
    }

    /// Attaches an underlying cause.
    #[must_use]
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attaches retry bookkeeping, replacing any previous context.
    #[must_use]
    pub fn with_retry_context(mut self, context: RetryContext) -> Self {
        self.context = Some(Box::new(context));
        self
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn retry_context(&self) -> Option<&RetryContext> {
        self.context.as_deref()
    }

    /// Deadline expiry, regardless of ambiguity.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.kind.is_timeout()
    }

    /// Caller-initiated cancellation.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.kind == ErrorKind::RequestCanceled
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_leads_with_kind() {
        let err = Error::new(ErrorKind::DocumentLocked, "key foo is locked");
        assert_eq!(err.to_string(), "document locked: key foo is locked");
    }

    #[test]
    fn display_without_message_is_kind_only() {
        let err = Error::new(ErrorKind::RequestCanceled, "");
        assert_eq!(err.to_string(), "request canceled");
    }

    #[test]
    fn timeout_kinds_are_distinct_from_cancellation() {
        assert!(ErrorKind::UnambiguousTimeout.is_timeout());
        assert!(ErrorKind::AmbiguousTimeout.is_timeout());
        assert!(!ErrorKind::RequestCanceled.is_timeout());

        let canceled = Error::new(ErrorKind::RequestCanceled, "");
        assert!(canceled.is_canceled());
        assert!(!canceled.is_timeout());
    }

    #[test]
    fn transport_keeps_source_chain() {
        let err = Error::transport(anyhow::anyhow!("connection reset"));
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(err.message(), "connection reset");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn retry_context_round_trips() {
        let ctx = RetryContext {
            operation: "get".to_string(),
            operation_id: "abc123".to_string(),
            retry_attempts: 2,
            retry_reasons: vec![RetryReason::KvLocked, RetryReason::KvLocked],
            time_observed: Duration::from_millis(3),
        };
        let err = Error::new(ErrorKind::AmbiguousTimeout, "").with_retry_context(ctx.clone());
        assert_eq!(err.retry_context(), Some(&ctx));
    }
}
