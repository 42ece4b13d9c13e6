//! Key-value operations over any transport.
//!
//! The transport client is a [`tower::Service`] taking one [`KvRequest`] per
//! round trip. Each call site configures a descriptor, hands the service to
//! the retry loop through `wrap`, and finishes the descriptor on every path.

use std::sync::Arc;
use std::time::Duration;

use docbridge_core::{
    DurabilityLevel, EncodedValue, Error, ErrorKind, Keyspace, MutationResult, Payload, Result,
    RetryStrategy, SpanContext, Transcoder,
};
use tower::{Service, ServiceExt};

use crate::context::OpContext;
use crate::operation::{OperationDescriptor, OperationFactory};
use crate::transport::Transport;

// ---------------------------------------------------------------------------
// Wire-facing request and response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvCommand {
    Get,
    Exists,
    GetAndLock,
    Unlock,
    Touch,
    Upsert,
    Insert,
    Replace,
    Remove,
}

impl KvCommand {
    /// Operation name used for spans, metrics and retry contexts.
    #[must_use]
    pub fn operation_name(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Exists => "exists",
            Self::GetAndLock => "get_and_lock",
            Self::Unlock => "unlock",
            Self::Touch => "touch",
            Self::Upsert => "upsert",
            Self::Insert => "insert",
            Self::Replace => "replace",
            Self::Remove => "remove",
        }
    }
}

/// One key-value round trip. `D` is the transport's wire durability type.
#[derive(Debug, Clone)]
pub struct KvRequest<D> {
    /// Bounding context of the attempt; transports should abandon work when it is done.
    pub context: OpContext,
    pub command: KvCommand,
    pub keyspace: Keyspace,
    pub id: String,
    pub value: Option<EncodedValue>,
    pub durability: Option<D>,
    /// Zero when the command carries no CAS precondition.
    pub cas: u64,
    pub expiry: Option<Duration>,
    pub lock_time: Option<Duration>,
    pub operation_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvResponse {
    pub cas: u64,
    pub value: Option<EncodedValue>,
    /// Only meaningful for [`KvCommand::Exists`].
    pub exists: bool,
}

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub timeout: Option<Duration>,
    pub retry_strategy: Option<Arc<dyn RetryStrategy>>,
    pub context: Option<OpContext>,
    pub parent_span: Option<SpanContext>,
    pub transcoder: Option<Arc<dyn Transcoder>>,
}

#[derive(Debug, Clone, Default)]
pub struct MutateOptions {
    pub timeout: Option<Duration>,
    pub retry_strategy: Option<Arc<dyn RetryStrategy>>,
    pub context: Option<OpContext>,
    pub parent_span: Option<SpanContext>,
    pub transcoder: Option<Arc<dyn Transcoder>>,
    pub durability: DurabilityLevel,
    pub expiry: Option<Duration>,
    /// CAS precondition for replace and remove. Zero means none.
    pub cas: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetResult {
    pub cas: u64,
    pub content: Payload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistsResult {
    pub cas: u64,
    pub exists: bool,
}

// ---------------------------------------------------------------------------
// KvOperations
// ---------------------------------------------------------------------------

/// Key-value call sites for one collection.
#[derive(Debug, Clone)]
pub struct KvOperations<T, S> {
    service: S,
    keyspace: Keyspace,
    factory: OperationFactory<T>,
}

impl<T, S> KvOperations<T, S>
where
    T: Transport,
    S: Service<KvRequest<T::Durability>, Response = KvResponse, Error = T::Failure> + Clone,
{
    #[must_use]
    pub fn new(service: S, keyspace: Keyspace, factory: OperationFactory<T>) -> Self {
        Self {
            service,
            keyspace,
            factory,
        }
    }

    #[must_use]
    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    /// # Errors
    ///
    /// Returns `DocumentNotFound` if the document does not exist, or any
    /// error surfaced by the execution loop.
    pub async fn get(&self, id: &str, opts: &ReadOptions) -> Result<GetResult> {
        let op = self.read_operation(KvCommand::Get, id, opts);
        let transcoder = op.transcoder();
        let request = self.request(&op, KvCommand::Get);
        let response = self.execute(op, request).await?;
        decode(transcoder.as_ref(), response)
    }

    /// # Errors
    ///
    /// Returns any error surfaced by the execution loop. A missing document
    /// is reported as `exists: false`, not as an error.
    pub async fn exists(&self, id: &str, opts: &ReadOptions) -> Result<ExistsResult> {
        let op = self.read_operation(KvCommand::Exists, id, opts);
        let request = self.request(&op, KvCommand::Exists);
        let response = self.execute(op, request).await?;
        Ok(ExistsResult {
            cas: response.cas,
            exists: response.exists,
        })
    }

    /// Reads and write-locks a document for `lock_time`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero lock time, `DocumentLocked` when
    /// the lock is still held once retries are exhausted.
    pub async fn get_and_lock(&self, id: &str, lock_time: Duration, opts: &ReadOptions) -> Result<GetResult> {
        if lock_time.is_zero() {
            return Err(Error::invalid_argument("lock time must be greater than zero"));
        }
        let mut op = self.read_operation(KvCommand::GetAndLock, id, opts);
        op.set_idempotent(false);
        op.set_read_only(false);
        let transcoder = op.transcoder();
        let mut request = self.request(&op, KvCommand::GetAndLock);
        request.lock_time = Some(lock_time);
        let response = self.execute(op, request).await?;
        decode(transcoder.as_ref(), response)
    }

    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero CAS and `DocumentNotLocked` if the
    /// document is not locked.
    pub async fn unlock(&self, id: &str, cas: u64, opts: &ReadOptions) -> Result<()> {
        if cas == 0 {
            return Err(Error::invalid_argument("unlock requires the CAS returned by get_and_lock"));
        }
        let mut op = self.read_operation(KvCommand::Unlock, id, opts);
        op.set_idempotent(false);
        op.set_read_only(false);
        let mut request = self.request(&op, KvCommand::Unlock);
        request.cas = cas;
        self.execute(op, request).await.map(|_| ())
    }

    /// # Errors
    ///
    /// Returns any error surfaced by the execution loop.
    pub async fn touch(&self, id: &str, expiry: Duration, opts: &ReadOptions) -> Result<MutationResult> {
        let mut op = self.read_operation(KvCommand::Touch, id, opts);
        op.set_idempotent(false);
        op.set_read_only(false);
        let mut request = self.request(&op, KvCommand::Touch);
        request.expiry = Some(expiry);
        self.execute(op, request).await.map(mutation_result)
    }

    /// # Errors
    ///
    /// Returns any error surfaced by the execution loop.
    pub async fn upsert(&self, id: &str, value: &Payload, opts: &MutateOptions) -> Result<MutationResult> {
        self.store(KvCommand::Upsert, id, value, opts).await
    }

    /// # Errors
    ///
    /// Returns `DocumentExists` if the document already exists.
    pub async fn insert(&self, id: &str, value: &Payload, opts: &MutateOptions) -> Result<MutationResult> {
        self.store(KvCommand::Insert, id, value, opts).await
    }

    /// # Errors
    ///
    /// Returns `DocumentNotFound` if the document does not exist and
    /// `CasMismatch` if `opts.cas` is stale.
    pub async fn replace(&self, id: &str, value: &Payload, opts: &MutateOptions) -> Result<MutationResult> {
        self.store(KvCommand::Replace, id, value, opts).await
    }

    /// # Errors
    ///
    /// Returns `DocumentNotFound` if the document does not exist and
    /// `CasMismatch` if `opts.cas` is stale.
    pub async fn remove(&self, id: &str, opts: &MutateOptions) -> Result<MutationResult> {
        let op = self.mutate_operation(KvCommand::Remove, id, opts);
        let mut request = self.request(&op, KvCommand::Remove);
        request.cas = opts.cas;
        self.execute(op, request).await.map(mutation_result)
    }

    async fn store(
        &self,
        command: KvCommand,
        id: &str,
        value: &Payload,
        opts: &MutateOptions,
    ) -> Result<MutationResult> {
        let mut op = self.mutate_operation(command, id, opts);
        op.set_value(value);
        let mut request = self.request(&op, command);
        request.expiry = opts.expiry;
        if command == KvCommand::Replace {
            request.cas = opts.cas;
        }
        self.execute(op, request).await.map(mutation_result)
    }

    // -- descriptor plumbing ------------------------------------------------

    fn read_operation(&self, command: KvCommand, id: &str, opts: &ReadOptions) -> OperationDescriptor<T> {
        let mut op = self
            .factory
            .new_operation(command.operation_name(), opts.parent_span.as_ref());
        op.set_keyspace(&self.keyspace);
        op.set_document_id(id);
        op.set_idempotent(true);
        op.set_read_only(true);
        op.set_timeout(opts.timeout);
        op.set_retry_strategy(opts.retry_strategy.clone());
        op.set_context(opts.context.clone());
        op.set_transcoder(opts.transcoder.clone());
        op
    }

    fn mutate_operation(&self, command: KvCommand, id: &str, opts: &MutateOptions) -> OperationDescriptor<T> {
        let mut op = self
            .factory
            .new_operation(command.operation_name(), opts.parent_span.as_ref());
        op.set_keyspace(&self.keyspace);
        op.set_document_id(id);
        op.set_transcoder(opts.transcoder.clone());
        op.set_retry_strategy(opts.retry_strategy.clone());
        op.set_context(opts.context.clone());
        op.set_durability(opts.durability);
        op.set_timeout(opts.timeout);
        op
    }

    fn request(&self, op: &OperationDescriptor<T>, command: KvCommand) -> KvRequest<T::Durability> {
        KvRequest {
            context: op.context().clone(),
            command,
            keyspace: self.keyspace.clone(),
            id: op.document_id().unwrap_or_default().to_string(),
            value: op.value().cloned(),
            durability: op.wire_durability(),
            cas: 0,
            expiry: None,
            lock_time: None,
            operation_id: op.operation_id().to_string(),
        }
    }

    async fn execute(
        &self,
        mut op: OperationDescriptor<T>,
        request: KvRequest<T::Durability>,
    ) -> Result<KvResponse> {
        let result = match op.check_ready_for_op() {
            Ok(()) => {
                let service = self.service.clone();
                op.wrap(move |ctx| {
                    let mut attempt = request.clone();
                    attempt.context = ctx;
                    service.clone().oneshot(attempt)
                })
                .await
            }
            Err(err) => Err(err),
        };
        op.finish(false);
        result
    }
}

fn decode(transcoder: &dyn Transcoder, response: KvResponse) -> Result<GetResult> {
    let Some(value) = response.value else {
        return Err(Error::new(ErrorKind::Transport, "response carried no document body"));
    };
    Ok(GetResult {
        cas: response.cas,
        content: transcoder.decode(&value.bytes, value.flags)?,
    })
}

fn mutation_result(response: KvResponse) -> MutationResult {
    MutationResult { cas: response.cas }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
