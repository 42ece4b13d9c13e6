use std::sync::Arc;
use std::time::Duration;

use docbridge_core::{
    BestEffortRetryStrategy, Error, ExponentialBackoff, Meter, MetricsMeter, NoopMeter, NoopTracer,
    RequestTracer, Result, RetryStrategy, TracingTracer,
};

/// Default per-service timeouts applied when an operation sets none.
#[derive(Debug, Clone)]
pub struct TimeoutsConfig {
    /// Key-value operations without durability, or with `Majority`.
    pub kv: Duration,
    /// Key-value operations with durability stronger than `Majority`.
    pub kv_durable: Duration,
    pub query: Duration,
    pub search: Duration,
    /// Bucket, scope and collection administration.
    pub management: Duration,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            kv: Duration::from_millis(2500),
            kv_durable: Duration::from_secs(10),
            query: Duration::from_secs(75),
            search: Duration::from_secs(75),
            management: Duration::from_secs(75),
        }
    }
}

/// Backoff parameters for the default best-effort retry strategy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub min_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(500),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Connection-wide default strategy built from these parameters.
    #[must_use]
    pub fn strategy(&self) -> Arc<dyn RetryStrategy> {
        Arc::new(BestEffortRetryStrategy::new(ExponentialBackoff::new(
            self.min_backoff,
            self.max_backoff,
            self.backoff_factor,
        )))
    }
}

/// Client-level configuration shared by every provider of a connection.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeouts: TimeoutsConfig,
    pub retry: RetryConfig,
    /// Emit request spans through `tracing`. When false, spans are discarded.
    pub enable_tracing: bool,
    /// Record operation durations through `metrics`.
    pub enable_metrics: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeouts: TimeoutsConfig::default(),
            retry: RetryConfig::default(),
            enable_tracing: true,
            enable_metrics: true,
        }
    }
}

impl ClientConfig {
    /// Rejects configurations no operation could run under.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for a zero timeout or inconsistent backoff.
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("kv", self.timeouts.kv),
            ("kv_durable", self.timeouts.kv_durable),
            ("query", self.timeouts.query),
            ("search", self.timeouts.search),
            ("management", self.timeouts.management),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, timeout)| timeout.is_zero()) {
            return Err(Error::invalid_configuration(format!(
                "{name} timeout must be greater than zero"
            )));
        }
        if self.retry.min_backoff > self.retry.max_backoff {
            return Err(Error::invalid_configuration(
                "min_backoff must not exceed max_backoff",
            ));
        }
        if self.retry.backoff_factor.is_nan() || self.retry.backoff_factor < 1.0 {
            return Err(Error::invalid_configuration(
                "backoff_factor must be at least 1.0",
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn tracer(&self) -> Arc<dyn RequestTracer> {
        if self.enable_tracing {
            Arc::new(TracingTracer)
        } else {
            Arc::new(NoopTracer)
        }
    }

    #[must_use]
    pub fn meter(&self) -> Arc<dyn Meter> {
        if self.enable_metrics {
            Arc::new(MetricsMeter)
        } else {
            Arc::new(NoopMeter)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
