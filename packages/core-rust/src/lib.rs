//! `docbridge` Core: domain errors, retry policy, error classification and
//! enhancement, and the narrow tracing/metrics capabilities.

pub mod classify;
pub mod durability;
pub mod enhance;
pub mod error;
pub mod meter;
pub mod retry;
pub mod span;
pub mod status;
pub mod transcoder;
pub mod types;

pub use classify::{classify_kv, classify_service, Classifier};
pub use durability::{DurabilityLevel, DURABILITY_TIMEOUT_FLOOR};
pub use enhance::{enhance_binary, enhance_rpc};
pub use error::{Error, ErrorKind, Result, RetryContext};
pub use meter::{Meter, MetricsMeter, NoopMeter};
pub use retry::{
    BackoffCalculator, BestEffortRetryStrategy, ExponentialBackoff, FailFastRetryStrategy,
    RetryAction, RetryReason, RetryRequest, RetryStrategy,
};
pub use span::{AttributeValue, NoopTracer, RequestSpan, RequestTracer, SpanContext, TracingTracer};
pub use status::{BinaryFailure, BinaryStatus, RpcCode, RpcErrorDetail, RpcFailure};
pub use transcoder::{
    EncodedValue, JsonTranscoder, Payload, RawBinaryTranscoder, Transcoder, BINARY_FLAGS, JSON_FLAGS,
    STRING_FLAGS,
};
pub use types::{BucketSettings, BucketType, CollectionSpec, Keyspace, MutationResult, ScopeSpec};
