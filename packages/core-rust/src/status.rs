//! Closed failure types returned by the two transports.
//!
//! The transports themselves are external collaborators; these types are the
//! contract they report failures through. Both are finite tagged variants so
//! the enhancer can map them without inspecting messages.

use std::fmt;

// ---------------------------------------------------------------------------
// Legacy binary protocol
// ---------------------------------------------------------------------------

/// Raw response status of the legacy binary protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BinaryStatus(pub u16);

impl BinaryStatus {
    pub const SUCCESS: Self = Self(0x00);
    pub const KEY_NOT_FOUND: Self = Self(0x01);
    pub const KEY_EXISTS: Self = Self(0x02);
    pub const TOO_BIG: Self = Self(0x03);
    pub const INVALID_ARGS: Self = Self(0x04);
    pub const NOT_STORED: Self = Self(0x05);
    pub const NOT_MY_VBUCKET: Self = Self(0x07);
    pub const NO_BUCKET: Self = Self(0x08);
    pub const LOCKED: Self = Self(0x09);
    pub const NOT_LOCKED: Self = Self(0x0e);
    pub const AUTH_STALE: Self = Self(0x1f);
    pub const AUTH_ERROR: Self = Self(0x20);
    pub const ACCESS_ERROR: Self = Self(0x24);
    pub const RATE_LIMITED_NETWORK_INGRESS: Self = Self(0x30);
    pub const RATE_LIMITED_NETWORK_EGRESS: Self = Self(0x31);
    pub const RATE_LIMITED_MAX_CONNECTIONS: Self = Self(0x32);
    pub const RATE_LIMITED_MAX_COMMANDS: Self = Self(0x33);
    pub const SCOPE_SIZE_LIMIT_EXCEEDED: Self = Self(0x34);
    pub const UNKNOWN_COMMAND: Self = Self(0x81);
    pub const OUT_OF_MEMORY: Self = Self(0x82);
    pub const NOT_SUPPORTED: Self = Self(0x83);
    pub const INTERNAL_ERROR: Self = Self(0x84);
    pub const BUSY: Self = Self(0x85);
    pub const TMP_FAIL: Self = Self(0x86);
    pub const UNKNOWN_COLLECTION: Self = Self(0x88);
    pub const UNKNOWN_SCOPE: Self = Self(0x8c);
    pub const DURABILITY_INVALID_LEVEL: Self = Self(0xa0);
    pub const DURABILITY_IMPOSSIBLE: Self = Self(0xa1);
    pub const SYNC_WRITE_IN_PROGRESS: Self = Self(0xa2);
    pub const SYNC_WRITE_AMBIGUOUS: Self = Self(0xa3);
    pub const SYNC_WRITE_RE_COMMIT_IN_PROGRESS: Self = Self(0xa4);
    pub const SUBDOC_PATH_NOT_FOUND: Self = Self(0xc0);
    pub const SUBDOC_PATH_EXISTS: Self = Self(0xc9);
}

impl fmt::Display for BinaryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

/// Failure reported by the binary transport for one round trip.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BinaryFailure {
    /// The server answered with a non-success status.
    #[error("status {status}: {message}")]
    Status { status: BinaryStatus, message: String },
    /// The transport gave up waiting for a response.
    #[error("timed out")]
    Timeout,
    /// No node currently serves the requested service.
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String },
    /// The dispatched request was canceled before completion.
    #[error("canceled")]
    Canceled,
}

// ---------------------------------------------------------------------------
// RPC protocol
// ---------------------------------------------------------------------------

/// Canonical RPC status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl RpcCode {
    /// Decodes a numeric wire code; out-of-range values become `Unknown`.
    #[must_use]
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Cancelled,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }
}

/// Typed detail attached to an RPC status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcErrorDetail {
    /// Identifies the resource the status refers to (`"document"`, `"scope"`, ...).
    ResourceInfo { resource_type: String, resource_name: String },
    /// Names the violated precondition (`"LOCKED"`, `"CAS"`, ...).
    PreconditionFailure { violation_type: String },
    /// Machine-readable reason code.
    ErrorInfo { reason: String },
}

/// Failure reported by the RPC transport for one round trip.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct RpcFailure {
    pub code: RpcCode,
    pub message: String,
    pub detail: Option<RpcErrorDetail>,
}

impl RpcFailure {
    #[must_use]
    pub fn new(code: RpcCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
        }
    }

    #[must_use]
    pub fn with_resource(mut self, resource_type: &str, resource_name: &str) -> Self {
        self.detail = Some(RpcErrorDetail::ResourceInfo {
            resource_type: resource_type.to_string(),
            resource_name: resource_name.to_string(),
        });
        self
    }

    #[must_use]
    pub fn with_precondition(mut self, violation_type: &str) -> Self {
        self.detail = Some(RpcErrorDetail::PreconditionFailure {
            violation_type: violation_type.to_string(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_render_as_errors() {
        let failure = BinaryFailure::Status {
            status: BinaryStatus(0x01),
            message: "not found".to_string(),
        };
        assert_eq!(failure.to_string(), "status 0x01: not found");

        let failure: Box<dyn std::error::Error> =
            Box::new(RpcFailure::new(RpcCode::NotFound, "no such document"));
        assert_eq!(failure.to_string(), "NotFound: no such document");
    }

    #[test]
    fn rpc_code_decodes_known_and_unknown_values() {
        assert_eq!(RpcCode::from_i32(5), RpcCode::NotFound);
        assert_eq!(RpcCode::from_i32(14), RpcCode::Unavailable);
        assert_eq!(RpcCode::from_i32(2), RpcCode::Unknown);
        assert_eq!(RpcCode::from_i32(99), RpcCode::Unknown);
        assert_eq!(RpcCode::from_i32(-1), RpcCode::Unknown);
    }

    #[test]
    fn binary_status_displays_as_hex() {
        assert_eq!(BinaryStatus::LOCKED.to_string(), "0x09");
        assert_eq!(BinaryStatus::UNKNOWN_SCOPE.to_string(), "0x8c");
    }
}
