//! Transport-specific capabilities consumed by the generic operation descriptor.
//!
//! A [`Transport`] names the failure type its clients return, how a
//! [`DurabilityLevel`] is expressed on its wire, and how its failures become
//! domain errors. The implementations are zero-sized markers; all state lives
//! in the clients and in [`OperationDefaults`](crate::operation::OperationDefaults).

use std::convert::Infallible;
use std::fmt;

use docbridge_core::{enhance_binary, enhance_rpc, BinaryFailure, DurabilityLevel, Error, ErrorKind, Result, RpcFailure};
use http::StatusCode;

pub trait Transport: Send + Sync + 'static {
    /// Failure returned by one round trip.
    type Failure: Send + fmt::Debug + 'static;
    /// Wire representation of a durability requirement.
    type Durability: Copy + Send + Sync + fmt::Debug + 'static;

    /// `Ok(None)` for [`DurabilityLevel::None`].
    ///
    /// # Errors
    ///
    /// Returns `FeatureNotAvailable` if the transport cannot express `level`.
    fn map_durability(level: DurabilityLevel) -> Result<Option<Self::Durability>>;

    /// Converts a failure into the domain error surfaced to callers.
    fn enhance(failure: Self::Failure, read_only: bool) -> Error;
}

// ---------------------------------------------------------------------------
// BinaryProtocol
// ---------------------------------------------------------------------------

/// Legacy binary key-value protocol.
///
/// Durability is sent as the level byte of the durability frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryProtocol;

impl Transport for BinaryProtocol {
    type Failure = BinaryFailure;
    type Durability = u8;

    fn map_durability(level: DurabilityLevel) -> Result<Option<u8>> {
        Ok(match level {
            DurabilityLevel::None => None,
            DurabilityLevel::Majority => Some(1),
            DurabilityLevel::MajorityAndPersistToActive => Some(2),
            DurabilityLevel::PersistToMajority => Some(3),
        })
    }

    fn enhance(failure: BinaryFailure, read_only: bool) -> Error {
        enhance_binary(failure, read_only)
    }
}

// ---------------------------------------------------------------------------
// RpcProtocol
// ---------------------------------------------------------------------------

/// Durability enumeration of the RPC key-value service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcDurability {
    Majority,
    MajorityAndPersistToActive,
    PersistToMajority,
}

/// RPC-based protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct RpcProtocol;

impl Transport for RpcProtocol {
    type Failure = RpcFailure;
    type Durability = RpcDurability;

    fn map_durability(level: DurabilityLevel) -> Result<Option<RpcDurability>> {
        Ok(match level {
            DurabilityLevel::None => None,
            DurabilityLevel::Majority => Some(RpcDurability::Majority),
            DurabilityLevel::MajorityAndPersistToActive => {
                Some(RpcDurability::MajorityAndPersistToActive)
            }
            DurabilityLevel::PersistToMajority => Some(RpcDurability::PersistToMajority),
        })
    }

    fn enhance(failure: RpcFailure, read_only: bool) -> Error {
        enhance_rpc(failure, read_only)
    }
}

// ---------------------------------------------------------------------------
// HttpProtocol
// ---------------------------------------------------------------------------

/// Failure of one HTTP round trip against an administrative or query endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HttpFailure {
    /// The endpoint answered with a non-success status.
    #[error("status {status}: {body}")]
    Status { status: StatusCode, body: String },
    /// No node currently exposes the endpoint.
    #[error("no endpoint: {message}")]
    NoEndpoint { message: String },
    #[error("timed out")]
    Timeout,
    /// The request could not be sent or the response could not be read.
    #[error("io: {message}")]
    Io { message: String },
}

/// HTTP endpoints reached through the legacy binary connection.
///
/// Durable writes do not exist over HTTP, so the wire durability type is
/// uninhabited.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpProtocol;

impl HttpProtocol {
    /// Kind implied by the status code alone.
    #[must_use]
    pub fn status_kind(status: StatusCode) -> ErrorKind {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::AuthenticationFailure,
            StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimited,
            StatusCode::SERVICE_UNAVAILABLE => ErrorKind::ServiceNotAvailable,
            StatusCode::INTERNAL_SERVER_ERROR => ErrorKind::InternalServerFailure,
            _ => ErrorKind::GenericManagement,
        }
    }
}

impl Transport for HttpProtocol {
    type Failure = HttpFailure;
    type Durability = Infallible;

    fn map_durability(level: DurabilityLevel) -> Result<Option<Infallible>> {
        if level.is_durable() {
            return Err(Error::feature_not_available(
                "durability is not supported for HTTP operations",
            ));
        }
        Ok(None)
    }

    fn enhance(failure: HttpFailure, read_only: bool) -> Error {
        match failure {
            HttpFailure::Status { status, body } => Error::new(
                Self::status_kind(status),
                format!("bad status {}: {body}", status.as_u16()),
            ),
            HttpFailure::NoEndpoint { message } => Error::new(ErrorKind::ServiceNotAvailable, message),
            HttpFailure::Timeout if read_only => Error::new(
                ErrorKind::UnambiguousTimeout,
                "HTTP request timed out",
            ),
            HttpFailure::Timeout => Error::new(ErrorKind::AmbiguousTimeout, "HTTP request timed out"),
            HttpFailure::Io { message } => Error::new(ErrorKind::Transport, message),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use docbridge_core::{BinaryStatus, RpcCode};

    use super::*;

    #[test]
    fn binary_durability_levels() {
        assert_eq!(BinaryProtocol::map_durability(DurabilityLevel::None).unwrap(), None);
        assert_eq!(BinaryProtocol::map_durability(DurabilityLevel::Majority).unwrap(), Some(1));
        assert_eq!(
            BinaryProtocol::map_durability(DurabilityLevel::PersistToMajority).unwrap(),
            Some(3)
        );
    }

    #[test]
    fn rpc_durability_levels() {
        assert_eq!(
            RpcProtocol::map_durability(DurabilityLevel::MajorityAndPersistToActive).unwrap(),
            Some(RpcDurability::MajorityAndPersistToActive)
        );
    }

    #[test]
    fn http_rejects_durable_levels() {
        assert!(HttpProtocol::map_durability(DurabilityLevel::None).unwrap().is_none());
        let err = HttpProtocol::map_durability(DurabilityLevel::Majority).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FeatureNotAvailable);
    }

    #[test]
    fn enhancement_delegates_to_tables() {
        let err = BinaryProtocol::enhance(
            BinaryFailure::Status {
                status: BinaryStatus::LOCKED,
                message: "locked".to_string(),
            },
            false,
        );
        assert_eq!(err.kind(), ErrorKind::DocumentLocked);

        let err = RpcProtocol::enhance(RpcFailure::new(RpcCode::Unavailable, "down"), true);
        assert_eq!(err.kind(), ErrorKind::ServiceNotAvailable);
    }

    #[test]
    fn http_status_mapping() {
        let err = HttpProtocol::enhance(
            HttpFailure::Status {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: String::new(),
            },
            true,
        );
        assert_eq!(err.kind(), ErrorKind::ServiceNotAvailable);
        assert_eq!(
            HttpProtocol::status_kind(StatusCode::BAD_REQUEST),
            ErrorKind::GenericManagement
        );
        assert_eq!(
            HttpProtocol::enhance(HttpFailure::Timeout, false).kind(),
            ErrorKind::AmbiguousTimeout
        );
    }
}
