//! Error classifier: maps an enhanced failure to an optional retry reason.
//!
//! Classification is a total match over [`ErrorKind`]. Adding a kind forces a
//! decision here at compile time; nothing inspects error messages.

use crate::error::{Error, ErrorKind};
use crate::retry::RetryReason;

/// Signature shared by all classifiers the execution loop accepts.
pub type Classifier = fn(&Error) -> Option<RetryReason>;

/// Classifier used by key-value operations.
#[must_use]
pub fn classify_kv(err: &Error) -> Option<RetryReason> {
    match err.kind() {
        ErrorKind::DocumentLocked => Some(RetryReason::KvLocked),
        ErrorKind::ServiceNotAvailable => Some(RetryReason::ServiceNotAvailable),
        ErrorKind::TemporaryFailure => Some(RetryReason::KvTemporaryFailure),
        ErrorKind::DurableWriteInProgress | ErrorKind::DurableWriteReCommitInProgress => {
            Some(RetryReason::KvSyncWriteInProgress)
        }
        ErrorKind::InvalidConfiguration
        | ErrorKind::InvalidArgument
        | ErrorKind::FeatureNotAvailable
        | ErrorKind::UnambiguousTimeout
        | ErrorKind::AmbiguousTimeout
        | ErrorKind::RequestCanceled
        | ErrorKind::InternalServerFailure
        | ErrorKind::AuthenticationFailure
        | ErrorKind::RateLimited
        | ErrorKind::QuotaLimited
        | ErrorKind::DocumentNotFound
        | ErrorKind::DocumentExists
        | ErrorKind::DocumentNotLocked
        | ErrorKind::CasMismatch
        | ErrorKind::ValueTooLarge
        | ErrorKind::PathNotFound
        | ErrorKind::PathExists
        | ErrorKind::DurabilityLevelNotAvailable
        | ErrorKind::DurabilityImpossible
        | ErrorKind::DurabilityAmbiguous
        | ErrorKind::BucketNotFound
        | ErrorKind::BucketExists
        | ErrorKind::ScopeNotFound
        | ErrorKind::ScopeExists
        | ErrorKind::CollectionNotFound
        | ErrorKind::CollectionExists
        | ErrorKind::IndexNotFound
        | ErrorKind::IndexExists
        | ErrorKind::GenericManagement
        | ErrorKind::Transport => None,
    }
}

/// Classifier used by query, search and management operations.
///
/// Only service availability is retried; documents are never locked here.
#[must_use]
pub fn classify_service(err: &Error) -> Option<RetryReason> {
    match err.kind() {
        ErrorKind::ServiceNotAvailable => Some(RetryReason::ServiceNotAvailable),
        ErrorKind::InvalidConfiguration
        | ErrorKind::InvalidArgument
        | ErrorKind::FeatureNotAvailable
        | ErrorKind::UnambiguousTimeout
        | ErrorKind::AmbiguousTimeout
        | ErrorKind::RequestCanceled
        | ErrorKind::InternalServerFailure
        | ErrorKind::AuthenticationFailure
        | ErrorKind::TemporaryFailure
        | ErrorKind::RateLimited
        | ErrorKind::QuotaLimited
        | ErrorKind::DocumentNotFound
        | ErrorKind::DocumentExists
        | ErrorKind::DocumentLocked
        | ErrorKind::DocumentNotLocked
        | ErrorKind::CasMismatch
        | ErrorKind::ValueTooLarge
        | ErrorKind::PathNotFound
        | ErrorKind::PathExists
        | ErrorKind::DurabilityLevelNotAvailable
        | ErrorKind::DurabilityImpossible
        | ErrorKind::DurabilityAmbiguous
        | ErrorKind::DurableWriteInProgress
        | ErrorKind::DurableWriteReCommitInProgress
        | ErrorKind::BucketNotFound
        | ErrorKind::BucketExists
        | ErrorKind::ScopeNotFound
        | ErrorKind::ScopeExists
        | ErrorKind::CollectionNotFound
        | ErrorKind::CollectionExists
        | ErrorKind::IndexNotFound
        | ErrorKind::IndexExists
        | ErrorKind::GenericManagement
        | ErrorKind::Transport => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
