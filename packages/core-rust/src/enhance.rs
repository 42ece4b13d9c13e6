//! Error enhancer: transport failure + read-only flag -> domain [`Error`].
//!
//! The status-to-kind mapping for each transport lives in the static tables
//! below. New statuses are supported by adding a row; the lookup functions do
//! not change. Lookups are total: a status missing from every table becomes
//! [`ErrorKind::Transport`] with the original message preserved.

use crate::error::{Error, ErrorKind};
use crate::status::{BinaryFailure, BinaryStatus, RpcCode, RpcErrorDetail, RpcFailure};

// ---------------------------------------------------------------------------
// KindRule
// ---------------------------------------------------------------------------

/// Mapping outcome for one table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindRule {
    /// Same kind for read and write paths.
    Always(ErrorKind),
    /// Kind depends on whether the failing operation was read-only.
    ByAccess { read: ErrorKind, write: ErrorKind },
}

impl KindRule {
    #[must_use]
    pub fn resolve(self, read_only: bool) -> ErrorKind {
        match self {
            Self::Always(kind) => kind,
            Self::ByAccess { read, write } => {
                if read_only {
                    read
                } else {
                    write
                }
            }
        }
    }
}

use KindRule::{Always, ByAccess};

// ---------------------------------------------------------------------------
// Binary protocol tables
// ---------------------------------------------------------------------------

/// Status table for the legacy binary protocol.
pub static BINARY_STATUS_TABLE: &[(BinaryStatus, KindRule)] = &[
    (BinaryStatus::KEY_NOT_FOUND, Always(ErrorKind::DocumentNotFound)),
    (BinaryStatus::KEY_EXISTS, Always(ErrorKind::DocumentExists)),
    (BinaryStatus::TOO_BIG, Always(ErrorKind::ValueTooLarge)),
    (BinaryStatus::INVALID_ARGS, Always(ErrorKind::InvalidArgument)),
    (BinaryStatus::NOT_STORED, Always(ErrorKind::DocumentNotFound)),
    (BinaryStatus::NOT_MY_VBUCKET, Always(ErrorKind::ServiceNotAvailable)),
    (BinaryStatus::NO_BUCKET, Always(ErrorKind::BucketNotFound)),
    (BinaryStatus::LOCKED, Always(ErrorKind::DocumentLocked)),
    (BinaryStatus::NOT_LOCKED, Always(ErrorKind::DocumentNotLocked)),
    (BinaryStatus::AUTH_STALE, Always(ErrorKind::AuthenticationFailure)),
    (BinaryStatus::AUTH_ERROR, Always(ErrorKind::AuthenticationFailure)),
    (BinaryStatus::ACCESS_ERROR, Always(ErrorKind::AuthenticationFailure)),
    (BinaryStatus::RATE_LIMITED_NETWORK_INGRESS, Always(ErrorKind::RateLimited)),
    (BinaryStatus::RATE_LIMITED_NETWORK_EGRESS, Always(ErrorKind::RateLimited)),
    (BinaryStatus::RATE_LIMITED_MAX_CONNECTIONS, Always(ErrorKind::RateLimited)),
    (BinaryStatus::RATE_LIMITED_MAX_COMMANDS, Always(ErrorKind::RateLimited)),
    (BinaryStatus::SCOPE_SIZE_LIMIT_EXCEEDED, Always(ErrorKind::QuotaLimited)),
    (BinaryStatus::UNKNOWN_COMMAND, Always(ErrorKind::FeatureNotAvailable)),
    (BinaryStatus::OUT_OF_MEMORY, Always(ErrorKind::TemporaryFailure)),
    (BinaryStatus::NOT_SUPPORTED, Always(ErrorKind::FeatureNotAvailable)),
    (BinaryStatus::INTERNAL_ERROR, Always(ErrorKind::InternalServerFailure)),
    (BinaryStatus::BUSY, Always(ErrorKind::TemporaryFailure)),
    (BinaryStatus::TMP_FAIL, Always(ErrorKind::TemporaryFailure)),
    (BinaryStatus::UNKNOWN_COLLECTION, Always(ErrorKind::CollectionNotFound)),
    (BinaryStatus::UNKNOWN_SCOPE, Always(ErrorKind::ScopeNotFound)),
    (BinaryStatus::DURABILITY_INVALID_LEVEL, Always(ErrorKind::DurabilityLevelNotAvailable)),
    (BinaryStatus::DURABILITY_IMPOSSIBLE, Always(ErrorKind::DurabilityImpossible)),
    (BinaryStatus::SYNC_WRITE_IN_PROGRESS, Always(ErrorKind::DurableWriteInProgress)),
    (BinaryStatus::SYNC_WRITE_AMBIGUOUS, Always(ErrorKind::DurabilityAmbiguous)),
    (
        BinaryStatus::SYNC_WRITE_RE_COMMIT_IN_PROGRESS,
        Always(ErrorKind::DurableWriteReCommitInProgress),
    ),
    (BinaryStatus::SUBDOC_PATH_NOT_FOUND, Always(ErrorKind::PathNotFound)),
    (BinaryStatus::SUBDOC_PATH_EXISTS, Always(ErrorKind::PathExists)),
];

/// A transport-side timeout on a mutation may have been applied.
pub const BINARY_TIMEOUT_RULE: KindRule = ByAccess {
    read: ErrorKind::UnambiguousTimeout,
    write: ErrorKind::AmbiguousTimeout,
};

// ---------------------------------------------------------------------------
// RPC protocol tables
// ---------------------------------------------------------------------------

/// Code table for RPC statuses without a more specific detail row.
pub static RPC_CODE_TABLE: &[(RpcCode, KindRule)] = &[
    (RpcCode::Cancelled, Always(ErrorKind::RequestCanceled)),
    (RpcCode::InvalidArgument, Always(ErrorKind::InvalidArgument)),
    (
        RpcCode::DeadlineExceeded,
        ByAccess {
            read: ErrorKind::UnambiguousTimeout,
            write: ErrorKind::AmbiguousTimeout,
        },
    ),
    (RpcCode::PermissionDenied, Always(ErrorKind::AuthenticationFailure)),
    (RpcCode::ResourceExhausted, Always(ErrorKind::RateLimited)),
    (
        RpcCode::Aborted,
        ByAccess {
            read: ErrorKind::Transport,
            write: ErrorKind::CasMismatch,
        },
    ),
    (RpcCode::OutOfRange, Always(ErrorKind::InvalidArgument)),
    (RpcCode::Unimplemented, Always(ErrorKind::FeatureNotAvailable)),
    (RpcCode::Internal, Always(ErrorKind::InternalServerFailure)),
    (RpcCode::Unavailable, Always(ErrorKind::ServiceNotAvailable)),
    (RpcCode::Unauthenticated, Always(ErrorKind::AuthenticationFailure)),
];

/// `(code, resource type) -> kind` rows for statuses carrying resource info.
pub static RPC_RESOURCE_TABLE: &[(RpcCode, &str, ErrorKind)] = &[
    (RpcCode::NotFound, "document", ErrorKind::DocumentNotFound),
    (RpcCode::NotFound, "bucket", ErrorKind::BucketNotFound),
    (RpcCode::NotFound, "scope", ErrorKind::ScopeNotFound),
    (RpcCode::NotFound, "collection", ErrorKind::CollectionNotFound),
    (RpcCode::NotFound, "queryindex", ErrorKind::IndexNotFound),
    (RpcCode::NotFound, "searchindex", ErrorKind::IndexNotFound),
    (RpcCode::NotFound, "path", ErrorKind::PathNotFound),
    (RpcCode::AlreadyExists, "document", ErrorKind::DocumentExists),
    (RpcCode::AlreadyExists, "bucket", ErrorKind::BucketExists),
    (RpcCode::AlreadyExists, "scope", ErrorKind::ScopeExists),
    (RpcCode::AlreadyExists, "collection", ErrorKind::CollectionExists),
    (RpcCode::AlreadyExists, "queryindex", ErrorKind::IndexExists),
    (RpcCode::AlreadyExists, "searchindex", ErrorKind::IndexExists),
    (RpcCode::AlreadyExists, "path", ErrorKind::PathExists),
];

/// Precondition violation rows, consulted for `FailedPrecondition` and `Aborted`.
pub static RPC_PRECONDITION_TABLE: &[(&str, KindRule)] = &[
    ("LOCKED", Always(ErrorKind::DocumentLocked)),
    ("NOT_LOCKED", Always(ErrorKind::DocumentNotLocked)),
    (
        "CAS",
        ByAccess {
            read: ErrorKind::Transport,
            write: ErrorKind::CasMismatch,
        },
    ),
    ("VALUE_TOO_LARGE", Always(ErrorKind::ValueTooLarge)),
    ("DURABILITY_IMPOSSIBLE", Always(ErrorKind::DurabilityImpossible)),
    ("SYNC_WRITE_IN_PROGRESS", Always(ErrorKind::DurableWriteInProgress)),
];

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

/// Kind for a binary status, or `None` when the table has no row for it.
#[must_use]
pub fn binary_kind(status: BinaryStatus, read_only: bool) -> Option<ErrorKind> {
    BINARY_STATUS_TABLE
        .iter()
        .find(|(row, _)| *row == status)
        .map(|(_, rule)| rule.resolve(read_only))
}

/// Enhances a binary transport failure.
#[must_use]
pub fn enhance_binary(failure: BinaryFailure, read_only: bool) -> Error {
    match failure {
        BinaryFailure::Status { status, message } => match binary_kind(status, read_only) {
            Some(kind) => Error::new(kind, message),
            None => Error::new(
                ErrorKind::Transport,
                format!("unrecognized binary status {status}: {message}"),
            ),
        },
        BinaryFailure::Timeout => Error::new(
            BINARY_TIMEOUT_RULE.resolve(read_only),
            "binary transport timed out waiting for a response",
        ),
        BinaryFailure::ServiceUnavailable { message } => {
            Error::new(ErrorKind::ServiceNotAvailable, message)
        }
        BinaryFailure::Canceled => Error::new(ErrorKind::RequestCanceled, "request was canceled by the transport"),
    }
}

/// Kind for an RPC status; falls back to [`ErrorKind::Transport`].
#[must_use]
pub fn rpc_kind(code: RpcCode, detail: Option<&RpcErrorDetail>, read_only: bool) -> ErrorKind {
    let from_detail = match detail {
        Some(RpcErrorDetail::ResourceInfo { resource_type, .. }) => RPC_RESOURCE_TABLE
            .iter()
            .find(|(row_code, row_type, _)| {
                *row_code == code && row_type.eq_ignore_ascii_case(resource_type)
            })
            .map(|(_, _, kind)| *kind),
        Some(RpcErrorDetail::PreconditionFailure { violation_type })
            if matches!(code, RpcCode::FailedPrecondition | RpcCode::Aborted) =>
        {
            RPC_PRECONDITION_TABLE
                .iter()
                .find(|(row_type, _)| *row_type == violation_type.as_str())
                .map(|(_, rule)| rule.resolve(read_only))
        }
        _ => None,
    };

    from_detail
        .or_else(|| {
            RPC_CODE_TABLE
                .iter()
                .find(|(row_code, _)| *row_code == code)
                .map(|(_, rule)| rule.resolve(read_only))
        })
        .unwrap_or(ErrorKind::Transport)
}

/// Enhances an RPC transport failure.
#[must_use]
pub fn enhance_rpc(failure: RpcFailure, read_only: bool) -> Error {
    let kind = rpc_kind(failure.code, failure.detail.as_ref(), read_only);
    if kind == ErrorKind::Transport {
        return Error::new(
            kind,
            format!("rpc status {:?}: {}", failure.code, failure.message),
        );
    }
    Error::new(kind, failure.message)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
