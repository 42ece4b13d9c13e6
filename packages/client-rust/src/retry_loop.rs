//! Retriable execution loop.
//!
//! Drives one logical request: invokes the transport closure under the
//! bounding context, enhances and classifies each failure, and asks the retry
//! strategy whether to go again. Suspension happens only inside the closure
//! and in the delay between attempts; both race against the context.

use std::future::Future;

use docbridge_core::{Classifier, Error, ErrorKind, Result, RetryAction, RetryRequest, RetryStrategy};
use tokio::time::Instant;
use tracing::debug;

use crate::context::{ContextError, OpContext};
use crate::transport::Transport;

/// Runs `op` until it succeeds, fails without a retry reason, the strategy
/// declines, or `ctx` is canceled or passes its deadline.
///
/// `request` accumulates the attempt record and is left in its final state
/// so the caller can report retry counts. `created` is the descriptor's
/// creation instant; every elapsed time is measured from it.
///
/// # Errors
///
/// Returns the enhanced transport error when the failure is unclassified or
/// the strategy stops, `UnambiguousTimeout`/`AmbiguousTimeout` when the
/// deadline passes (by the request's idempotency), and `RequestCanceled` on
/// cancellation. Every error except the unclassified case carries a
/// [`RetryContext`](docbridge_core::RetryContext).
pub async fn run_retriable<T, R, F, Fut>(
    ctx: &OpContext,
    request: &mut RetryRequest,
    strategy: &dyn RetryStrategy,
    classifier: Classifier,
    read_only: bool,
    created: Instant,
    mut op: F,
) -> Result<R>
where
    T: Transport,
    F: FnMut(OpContext) -> Fut,
    Fut: Future<Output = std::result::Result<R, T::Failure>>,
{
    loop {
        let outcome = tokio::select! {
            biased;
            cause = ctx.done() => return Err(context_error(cause, request, created)),
            outcome = op(ctx.clone()) => outcome,
        };

        let failure = match outcome {
            Ok(value) => return Ok(value),
            Err(failure) => failure,
        };

        let err = T::enhance(failure, read_only);
        let reason = classifier(&err);
        request.observe_failure(created.elapsed(), err.kind(), reason);

        let Some(reason) = reason else {
            return Err(err);
        };

        match strategy.retry_after(request, reason) {
            RetryAction::Stop => {
                debug!(
                    operation = request.operation(),
                    operation_id = request.identifier(),
                    attempt = request.retry_attempts(),
                    reason = reason.as_str(),
                    "retry strategy declined"
                );
                let context = request.to_context(created.elapsed());
                return Err(err.with_retry_context(context));
            }
            RetryAction::RetryAfter(delay) => {
                request.record_retry(reason);
                #[allow(clippy::cast_possible_truncation)]
                let delay_ms = delay.as_millis() as u64;
                debug!(
                    operation = request.operation(),
                    operation_id = request.identifier(),
                    attempt = request.retry_attempts(),
                    reason = reason.as_str(),
                    delay_ms,
                    "retrying operation"
                );
                tokio::select! {
                    biased;
                    cause = ctx.done() => return Err(context_error(cause, request, created)),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

fn context_error(cause: ContextError, request: &RetryRequest, created: Instant) -> Error {
    let (kind, message) = match cause {
        ContextError::DeadlineExceeded if request.idempotent() => (
            ErrorKind::UnambiguousTimeout,
            format!("{} timed out", request.operation()),
        ),
        ContextError::DeadlineExceeded => (
            ErrorKind::AmbiguousTimeout,
            format!("{} timed out, the operation may have been applied", request.operation()),
        ),
        ContextError::Canceled => (
            ErrorKind::RequestCanceled,
            format!("{} was canceled", request.operation()),
        ),
    };
    Error::new(kind, message)
        .with_source(cause)
        .with_retry_context(request.to_context(created.elapsed()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
