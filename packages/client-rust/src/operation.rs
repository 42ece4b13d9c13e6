//! Per-call operation descriptor.
//!
//! One [`OperationDescriptor`] is created for each logical request, configured
//! by its call site, checked with [`check_ready_for_op`], executed through
//! [`wrap`] or [`wrap_with_context`] and consumed by [`finish`]. It owns the
//! root span and the bookkeeping around it; retries and I/O happen in
//! [`run_retriable`](crate::retry_loop::run_retriable).
//!
//! [`check_ready_for_op`]: OperationDescriptor::check_ready_for_op
//! [`wrap`]: OperationDescriptor::wrap
//! [`wrap_with_context`]: OperationDescriptor::wrap_with_context
//! [`finish`]: OperationDescriptor::finish

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use docbridge_core::span::{attributes, REQUEST_ENCODING_SPAN};
use docbridge_core::{
    AttributeValue, Classifier, DurabilityLevel, EncodedValue, Error, Keyspace, Meter, Payload,
    RequestSpan, RequestTracer, Result, RetryRequest, RetryStrategy, SpanContext, Transcoder,
    DURABILITY_TIMEOUT_FLOOR,
};
use tokio::time::Instant;
use tracing::warn;

use crate::context::OpContext;
use crate::retry_loop::run_retriable;
use crate::transport::Transport;

/// Length of generated operation ids.
const OPERATION_ID_LEN: usize = 6;

// ---------------------------------------------------------------------------
// OperationDefaults
// ---------------------------------------------------------------------------

/// Connection-wide values a descriptor falls back to.
///
/// Shared read-only between every descriptor a factory creates.
#[derive(Debug, Clone)]
pub struct OperationDefaults {
    /// Service name used for span and metric keys.
    pub service: &'static str,
    /// Timeout when the operation sets none.
    pub timeout: Duration,
    /// Timeout for durability stronger than `Majority` when the operation sets none.
    pub durable_timeout: Duration,
    pub retry_strategy: Arc<dyn RetryStrategy>,
    pub tracer: Arc<dyn RequestTracer>,
    pub meter: Arc<dyn Meter>,
    pub classifier: Classifier,
    pub transcoder: Arc<dyn Transcoder>,
}

// ---------------------------------------------------------------------------
// OperationFactory
// ---------------------------------------------------------------------------

/// Creates descriptors bound to one transport and one set of defaults.
#[derive(Debug)]
pub struct OperationFactory<T> {
    defaults: Arc<OperationDefaults>,
    transport: PhantomData<fn() -> T>,
}

impl<T> Clone for OperationFactory<T> {
    fn clone(&self) -> Self {
        Self {
            defaults: Arc::clone(&self.defaults),
            transport: PhantomData,
        }
    }
}

impl<T: Transport> OperationFactory<T> {
    #[must_use]
    pub fn new(defaults: OperationDefaults) -> Self {
        Self {
            defaults: Arc::new(defaults),
            transport: PhantomData,
        }
    }

    #[must_use]
    pub fn defaults(&self) -> &OperationDefaults {
        &self.defaults
    }

    /// Starts a descriptor with a fresh root span, child of `parent` if given.
    #[must_use]
    pub fn new_operation(&self, name: &str, parent: Option<&SpanContext>) -> OperationDescriptor<T> {
        OperationDescriptor::new(Arc::clone(&self.defaults), name, parent)
    }

    /// Like [`new_operation`](Self::new_operation), setting `attributes` on the root span.
    #[must_use]
    pub fn new_operation_with_attributes(
        &self,
        name: &str,
        parent: Option<&SpanContext>,
        attributes: impl IntoIterator<Item = (&'static str, AttributeValue)>,
    ) -> OperationDescriptor<T> {
        let op = self.new_operation(name, parent);
        if let Some(span) = &op.span {
            for (key, value) in attributes {
                span.set_attribute(key, value);
            }
        }
        op
    }
}

// ---------------------------------------------------------------------------
// OperationDescriptor
// ---------------------------------------------------------------------------

pub struct OperationDescriptor<T: Transport> {
    defaults: Arc<OperationDefaults>,
    name: String,
    created: Instant,
    span: Option<Box<dyn RequestSpan>>,
    operation_id: String,

    timeout: Option<Duration>,
    retry_strategy: Option<Arc<dyn RetryStrategy>>,
    idempotent: bool,
    read_only: bool,
    context: OpContext,

    durability: DurabilityLevel,
    wire_durability: Option<T::Durability>,
    keyspace: Option<Keyspace>,
    document_id: Option<String>,
    transcoder: Option<Arc<dyn Transcoder>>,
    value: Option<EncodedValue>,

    /// First configuration failure; surfaced by `check_ready_for_op`.
    error: Option<Error>,
}

impl<T: Transport> OperationDescriptor<T> {
    fn new(defaults: Arc<OperationDefaults>, name: &str, parent: Option<&SpanContext>) -> Self {
        let span = defaults.tracer.request_span(name, parent);
        span.set_attribute(attributes::SERVICE, defaults.service.into());
        span.set_attribute(attributes::OPERATION, name.into());

        let mut operation_id = uuid::Uuid::new_v4().simple().to_string();
        operation_id.truncate(OPERATION_ID_LEN);

        Self {
            defaults,
            name: name.to_string(),
            created: Instant::now(),
            span: Some(span),
            operation_id,
            timeout: None,
            retry_strategy: None,
            idempotent: false,
            read_only: false,
            context: OpContext::background(),
            durability: DurabilityLevel::None,
            wire_durability: None,
            keyspace: None,
            document_id: None,
            transcoder: None,
            value: None,
            error: None,
        }
    }

    // -- configuration ------------------------------------------------------

    /// Overrides the service default. `None` or zero restores the default.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self.coerce_durable_timeout();
    }

    /// Overrides the connection-wide strategy. `None` restores it.
    pub fn set_retry_strategy(&mut self, strategy: Option<Arc<dyn RetryStrategy>>) {
        self.retry_strategy = strategy;
    }

    pub fn set_idempotent(&mut self, idempotent: bool) {
        self.idempotent = idempotent;
    }

    /// Read-only operations map some failures differently (see the enhancer tables).
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Parent context for [`wrap`](Self::wrap). `None` means background.
    pub fn set_context(&mut self, context: Option<OpContext>) {
        self.context = context.unwrap_or_default();
    }

    /// Sets the durability requirement and raises an explicit timeout to the floor.
    pub fn set_durability(&mut self, level: DurabilityLevel) {
        match T::map_durability(level) {
            Ok(wire) => self.wire_durability = wire,
            Err(err) => {
                self.record_error(err);
                return;
            }
        }
        self.durability = level;
        if level.is_durable() {
            self.set_span_attribute(attributes::DURABILITY, level.management_name().into());
        }
        self.coerce_durable_timeout();
    }

    /// `None` restores the connection default.
    pub fn set_transcoder(&mut self, transcoder: Option<Arc<dyn Transcoder>>) {
        self.transcoder = transcoder;
    }

    /// Encodes `value` with the effective transcoder inside a `request_encoding` span.
    ///
    /// Encoding failures are held until [`check_ready_for_op`](Self::check_ready_for_op).
    pub fn set_value(&mut self, value: &Payload) {
        if self.error.is_some() {
            return;
        }
        let span = self.new_span(REQUEST_ENCODING_SPAN);
        let encoded = self.transcoder().encode(value);
        span.end();

        match encoded {
            Ok(encoded) => self.value = Some(encoded),
            Err(err) => self.record_error(err),
        }
    }

    pub fn set_document_id(&mut self, id: impl Into<String>) {
        self.document_id = Some(id.into());
    }

    pub fn set_keyspace(&mut self, keyspace: &Keyspace) {
        self.set_span_attribute(attributes::BUCKET, keyspace.bucket.as_str().into());
        self.set_span_attribute(attributes::SCOPE, keyspace.scope.as_str().into());
        self.set_span_attribute(attributes::COLLECTION, keyspace.collection.as_str().into());
        self.keyspace = Some(keyspace.clone());
    }

    /// Replaces the generated correlation id.
    pub fn set_operation_id(&mut self, id: impl Into<String>) {
        self.operation_id = id.into();
        let id = AttributeValue::from(self.operation_id.as_str());
        self.set_span_attribute(attributes::OPERATION_ID, id);
    }

    pub fn set_span_attribute(&self, key: &'static str, value: AttributeValue) {
        if let Some(span) = &self.span {
            span.set_attribute(key, value);
        }
    }

    fn record_error(&mut self, err: Error) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }

    fn coerce_durable_timeout(&mut self) {
        if !self.durability.is_durable() {
            return;
        }
        if let Some(timeout) = self.timeout {
            if timeout < DURABILITY_TIMEOUT_FLOOR {
                self.timeout = Some(DURABILITY_TIMEOUT_FLOOR);
                warn!(
                    operation = %self.name,
                    requested = ?timeout,
                    floor = ?DURABILITY_TIMEOUT_FLOOR,
                    "durable operation in use, timeout coerced up to the durability floor"
                );
            }
        }
    }

    // -- accessors ----------------------------------------------------------

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    #[must_use]
    pub fn service(&self) -> &'static str {
        self.defaults.service
    }

    #[must_use]
    pub fn idempotent(&self) -> bool {
        self.idempotent
    }

    #[must_use]
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    #[must_use]
    pub fn durability(&self) -> DurabilityLevel {
        self.durability
    }

    #[must_use]
    pub fn wire_durability(&self) -> Option<T::Durability> {
        self.wire_durability
    }

    #[must_use]
    pub fn keyspace(&self) -> Option<&Keyspace> {
        self.keyspace.as_ref()
    }

    #[must_use]
    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    #[must_use]
    pub fn value(&self) -> Option<&EncodedValue> {
        self.value.as_ref()
    }

    #[must_use]
    pub fn context(&self) -> &OpContext {
        &self.context
    }

    /// The override if set, otherwise the connection default.
    #[must_use]
    pub fn transcoder(&self) -> Arc<dyn Transcoder> {
        self.transcoder
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.defaults.transcoder))
    }

    /// The override if set, otherwise the connection default.
    #[must_use]
    pub fn retry_strategy(&self) -> Arc<dyn RetryStrategy> {
        self.retry_strategy
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.defaults.retry_strategy))
    }

    /// Timeout [`wrap`](Self::wrap) bounds execution with.
    #[must_use]
    pub fn effective_timeout(&self) -> Duration {
        let (timeout, _) = self.resolve_timeout();
        timeout
    }

    /// Resolved timeout plus whether a default was raised to the floor.
    fn resolve_timeout(&self) -> (Duration, bool) {
        if let Some(timeout) = self.timeout {
            return (timeout, false);
        }
        let default = if self.durability > DurabilityLevel::Majority {
            self.defaults.durable_timeout
        } else {
            self.defaults.timeout
        };
        if self.durability.is_durable() && default < DURABILITY_TIMEOUT_FLOOR {
            return (DURABILITY_TIMEOUT_FLOOR, true);
        }
        (default, false)
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.created.elapsed()
    }

    /// Context of the root span, for parenting spans of nested calls.
    #[must_use]
    pub fn span_context(&self) -> Option<SpanContext> {
        self.span.as_ref().map(|span| span.context())
    }

    /// Child span of the root span for a sub-phase.
    #[must_use]
    pub fn new_span(&self, name: &str) -> Box<dyn RequestSpan> {
        let parent = self.span_context();
        self.defaults.tracer.request_span(name, parent.as_ref())
    }

    /// Detaches the root span, e.g. to hand it to a streaming result that
    /// outlives the call. The descriptor is no longer ready for execution.
    pub fn take_span(&mut self) -> Option<Box<dyn RequestSpan>> {
        self.span.take()
    }

    // -- execution ----------------------------------------------------------

    /// Validates the descriptor before execution.
    ///
    /// # Errors
    ///
    /// Returns the first configuration failure recorded by a setter, or
    /// `InvalidConfiguration` if the timeout resolves to zero or no root span
    /// is attached. A recorded failure is reported on every call.
    pub fn check_ready_for_op(&mut self) -> Result<()> {
        if let Some(err) = self.error.take() {
            self.error = Some(Error::new(err.kind(), err.message()));
            return Err(err);
        }

        let (timeout, coerced) = self.resolve_timeout();
        if timeout.is_zero() {
            return Err(Error::invalid_configuration(format!(
                "{} had no timeout specified",
                self.name
            )));
        }
        if coerced {
            warn!(
                operation = %self.name,
                floor = ?DURABILITY_TIMEOUT_FLOOR,
                "durable operation in use, default timeout coerced up to the durability floor"
            );
        }

        if self.span.is_none() {
            return Err(Error::invalid_configuration(format!(
                "{} had no span specified",
                self.name
            )));
        }
        Ok(())
    }

    /// Runs `op` under a context bounded by [`effective_timeout`](Self::effective_timeout)
    /// and derived from the descriptor's parent context.
    ///
    /// # Errors
    ///
    /// See [`run_retriable`].
    pub async fn wrap<R, F, Fut>(&self, op: F) -> Result<R>
    where
        F: FnMut(OpContext) -> Fut,
        Fut: Future<Output = std::result::Result<R, T::Failure>>,
    {
        let ctx = self.context.with_timeout(self.effective_timeout());
        self.wrap_with_context(&ctx, op).await
    }

    /// Runs `op` under a caller-derived bounding context.
    ///
    /// # Errors
    ///
    /// See [`run_retriable`].
    pub async fn wrap_with_context<R, F, Fut>(&self, ctx: &OpContext, op: F) -> Result<R>
    where
        F: FnMut(OpContext) -> Fut,
        Fut: Future<Output = std::result::Result<R, T::Failure>>,
    {
        let mut request = RetryRequest::new(self.name.as_str(), self.operation_id.as_str(), self.idempotent);
        let strategy = self.retry_strategy();
        let result = run_retriable::<T, R, F, Fut>(
            ctx,
            &mut request,
            strategy.as_ref(),
            self.defaults.classifier,
            self.read_only,
            self.created,
            op,
        )
        .await;

        if request.retry_attempts() > 0 {
            self.set_span_attribute(attributes::RETRIES, request.retry_attempts().into());
        }
        result
    }

    /// Ends the root span and, unless `no_metrics`, records one duration
    /// sample measured from creation.
    pub fn finish(mut self, no_metrics: bool) {
        if let Some(span) = self.span.take() {
            span.end();
        }
        if !no_metrics {
            self.defaults
                .meter
                .value_record(self.defaults.service, &self.name, self.created.elapsed());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
