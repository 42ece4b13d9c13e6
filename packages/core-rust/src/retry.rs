//! Retry policy vocabulary: reasons, attempt records, and pluggable strategies.
//!
//! A [`RetryStrategy`] is consulted by the execution loop after each classified
//! failure. It sees the [`RetryRequest`] for the current attempt set and the
//! [`RetryReason`] the classifier produced, and answers with a [`RetryAction`].

use std::fmt;
use std::time::Duration;

use crate::error::{ErrorKind, RetryContext};

// ---------------------------------------------------------------------------
// RetryReason
// ---------------------------------------------------------------------------

/// Finite tag describing why a failed attempt may be worth repeating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryReason {
    /// The document is locked by another operation.
    KvLocked,
    /// The requested service is currently unavailable.
    ServiceNotAvailable,
    /// The server reported a temporary failure (out of memory, warmup, ...).
    KvTemporaryFailure,
    /// A durable write to the same document is still in progress.
    KvSyncWriteInProgress,
}

impl RetryReason {
    /// Whether a non-idempotent request may be retried for this reason.
    ///
    /// Every reason here describes a failure where the server did not apply
    /// the request, so repeating it is safe regardless of idempotency.
    #[must_use]
    pub fn allows_non_idempotent_retry(self) -> bool {
        match self {
            Self::KvLocked
            | Self::ServiceNotAvailable
            | Self::KvTemporaryFailure
            | Self::KvSyncWriteInProgress => true,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KvLocked => "kv_locked",
            Self::ServiceNotAvailable => "service_not_available",
            Self::KvTemporaryFailure => "kv_temporary_failure",
            Self::KvSyncWriteInProgress => "kv_sync_write_in_progress",
        }
    }
}

impl fmt::Display for RetryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RetryAction
// ---------------------------------------------------------------------------

/// Decision returned by a [`RetryStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Surface the failure to the caller.
    Stop,
    /// Re-invoke the operation after the given delay.
    RetryAfter(Duration),
}

// ---------------------------------------------------------------------------
// RetryRequest
// ---------------------------------------------------------------------------

/// Attempt record for one execution loop.
///
/// Created when the loop starts and updated after every failed attempt. It is
/// never persisted and never outlives the loop that owns it.
#[derive(Debug, Clone)]
pub struct RetryRequest {
    operation: String,
    operation_id: String,
    idempotent: bool,
    attempt: u32,
    elapsed: Duration,
    last_error: Option<ErrorKind>,
    last_reason: Option<RetryReason>,
    reasons: Vec<RetryReason>,
}

impl RetryRequest {
    #[must_use]
    pub fn new(operation: impl Into<String>, operation_id: impl Into<String>, idempotent: bool) -> Self {
        Self {
            operation: operation.into(),
            operation_id: operation_id.into(),
            idempotent,
            attempt: 0,
            elapsed: Duration::ZERO,
            last_error: None,
            last_reason: None,
            reasons: Vec::new(),
        }
    }

    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Correlation id shared by every attempt of this request.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.operation_id
    }

    #[must_use]
    pub fn idempotent(&self) -> bool {
        self.idempotent
    }

    /// Number of retries already performed (zero during the first attempt).
    #[must_use]
    pub fn retry_attempts(&self) -> u32 {
        self.attempt
    }

    /// Time since the owning descriptor was created, as of the last failure.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    #[must_use]
    pub fn last_error(&self) -> Option<ErrorKind> {
        self.last_error
    }

    #[must_use]
    pub fn last_reason(&self) -> Option<RetryReason> {
        self.last_reason
    }

    #[must_use]
    pub fn retry_reasons(&self) -> &[RetryReason] {
        &self.reasons
    }

    /// Records a failed attempt before the strategy is consulted.
    pub fn observe_failure(&mut self, elapsed: Duration, kind: ErrorKind, reason: Option<RetryReason>) {
        self.elapsed = elapsed;
        self.last_error = Some(kind);
        self.last_reason = reason;
    }

    /// Records that the strategy chose to retry for `reason`.
    pub fn record_retry(&mut self, reason: RetryReason) {
        self.attempt += 1;
        self.reasons.push(reason);
    }

    /// Snapshot for attachment to a terminal error.
    #[must_use]
    pub fn to_context(&self, time_observed: Duration) -> RetryContext {
        RetryContext {
            operation: self.operation.clone(),
            operation_id: self.operation_id.clone(),
            retry_attempts: self.attempt,
            retry_reasons: self.reasons.clone(),
            time_observed,
        }
    }
}

// ---------------------------------------------------------------------------
// Backoff calculators
// ---------------------------------------------------------------------------

/// Maps a retry attempt count to the delay before the next attempt.
pub trait BackoffCalculator: Send + Sync + fmt::Debug {
    fn backoff(&self, retry_attempts: u32) -> Duration;
}

/// `min * factor^attempts`, clamped to `[min, max]`.
///
/// Factors below 1.0 (including negative ones) never shrink the delay below `min`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub min: Duration,
    pub max: Duration,
    pub factor: f64,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(min: Duration, max: Duration, factor: f64) -> Self {
        Self { min, max, factor }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(1), Duration::from_millis(500), 2.0)
    }
}

impl BackoffCalculator for ExponentialBackoff {
    fn backoff(&self, retry_attempts: u32) -> Duration {
        let exponent = i32::try_from(retry_attempts).unwrap_or(i32::MAX);
        let scaled = self.min.as_secs_f64() * self.factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max.as_secs_f64() {
            return self.max;
        }
        if scaled <= self.min.as_secs_f64() {
            return self.min;
        }
        Duration::from_secs_f64(scaled)
    }
}

// ---------------------------------------------------------------------------
// RetryStrategy
// ---------------------------------------------------------------------------

/// Pluggable retry policy.
pub trait RetryStrategy: Send + Sync + fmt::Debug {
    /// Decide whether `request` should be attempted again after failing for `reason`.
    fn retry_after(&self, request: &RetryRequest, reason: RetryReason) -> RetryAction;
}

/// Default strategy: keep retrying with backoff until the deadline fires.
///
/// Non-idempotent requests are retried only for reasons that allow it.
#[derive(Debug, Clone)]
pub struct BestEffortRetryStrategy<B = ExponentialBackoff> {
    backoff: B,
}

impl<B: BackoffCalculator> BestEffortRetryStrategy<B> {
    #[must_use]
    pub fn new(backoff: B) -> Self {
        Self { backoff }
    }
}

impl Default for BestEffortRetryStrategy {
    fn default() -> Self {
        Self::new(ExponentialBackoff::default())
    }
}

impl<B: BackoffCalculator> RetryStrategy for BestEffortRetryStrategy<B> {
    fn retry_after(&self, request: &RetryRequest, reason: RetryReason) -> RetryAction {
        if request.idempotent() || reason.allows_non_idempotent_retry() {
            RetryAction::RetryAfter(self.backoff.backoff(request.retry_attempts()))
        } else {
            RetryAction::Stop
        }
    }
}

/// Never retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailFastRetryStrategy;

impl RetryStrategy for FailFastRetryStrategy {
    fn retry_after(&self, _request: &RetryRequest, _reason: RetryReason) -> RetryAction {
        RetryAction::Stop
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_and_clamps() {
        let backoff = ExponentialBackoff::default();
        assert_eq!(backoff.backoff(0), Duration::from_millis(1));
        assert_eq!(backoff.backoff(1), Duration::from_millis(2));
        assert_eq!(backoff.backoff(3), Duration::from_millis(8));
        assert_eq!(backoff.backoff(20), Duration::from_millis(500));
        assert_eq!(backoff.backoff(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn shrinking_or_negative_factors_stay_at_min() {
        let min = Duration::from_millis(1);
        let max = Duration::from_millis(500);
        for factor in [-2.0, 0.0, 0.5, f64::NAN] {
            let backoff = ExponentialBackoff::new(min, max, factor);
            for attempt in [0, 1, 2, 7] {
                let delay = backoff.backoff(attempt);
                assert!(delay >= min && delay <= max, "factor {factor} attempt {attempt}: {delay:?}");
            }
        }
        assert_eq!(ExponentialBackoff::new(min, max, -2.0).backoff(1), min);
    }

    #[test]
    fn best_effort_retries_non_idempotent_for_locked() {
        let strategy = BestEffortRetryStrategy::default();
        let request = RetryRequest::new("upsert", "abc123", false);
        assert_eq!(
            strategy.retry_after(&request, RetryReason::KvLocked),
            RetryAction::RetryAfter(Duration::from_millis(1))
        );
    }

    #[test]
    fn best_effort_backoff_follows_attempt_count() {
        let strategy = BestEffortRetryStrategy::default();
        let mut request = RetryRequest::new("get", "abc123", true);
        request.record_retry(RetryReason::ServiceNotAvailable);
        request.record_retry(RetryReason::ServiceNotAvailable);
        assert_eq!(
            strategy.retry_after(&request, RetryReason::ServiceNotAvailable),
            RetryAction::RetryAfter(Duration::from_millis(4))
        );
    }

    #[test]
    fn fail_fast_always_stops() {
        let request = RetryRequest::new("get", "abc123", true);
        assert_eq!(
            FailFastRetryStrategy.retry_after(&request, RetryReason::ServiceNotAvailable),
            RetryAction::Stop
        );
    }

    #[test]
    fn request_tracks_retries_and_snapshots_context() {
        let mut request = RetryRequest::new("get", "abc123", true);
        request.observe_failure(
            Duration::from_millis(5),
            ErrorKind::DocumentLocked,
            Some(RetryReason::KvLocked),
        );
        request.record_retry(RetryReason::KvLocked);

        assert_eq!(request.retry_attempts(), 1);
        assert_eq!(request.last_error(), Some(ErrorKind::DocumentLocked));
        assert_eq!(request.elapsed(), Duration::from_millis(5));

        let ctx = request.to_context(Duration::from_millis(9));
        assert_eq!(ctx.operation_id, "abc123");
        assert_eq!(ctx.retry_attempts, 1);
        assert_eq!(ctx.retry_reasons, vec![RetryReason::KvLocked]);
        assert_eq!(ctx.time_observed, Duration::from_millis(9));
    }
}
