//! Full-text search call site.
//!
//! Searches never mutate, so every search is idempotent and read-only: a
//! timeout after the request left is still reported as unambiguous.

use std::sync::Arc;
use std::time::Duration;

use docbridge_core::span::attributes;
use docbridge_core::{AttributeValue, Error, Result, RetryStrategy, SpanContext};
use serde_json::Value;
use tower::{Service, ServiceExt};

use crate::context::OpContext;
use crate::operation::OperationFactory;
use crate::transport::Transport;

const SEARCH_OPERATION: &str = "search";

/// One search round trip against a named index.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub context: OpContext,
    pub index: String,
    pub query: Value,
    pub limit: Option<u32>,
    pub skip: Option<u32>,
    pub client_context_id: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    pub hits: Vec<Value>,
    pub total_hits: u64,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub timeout: Option<Duration>,
    pub retry_strategy: Option<Arc<dyn RetryStrategy>>,
    pub context: Option<OpContext>,
    pub parent_span: Option<SpanContext>,
    pub limit: Option<u32>,
    pub skip: Option<u32>,
    /// Generated when unset.
    pub client_context_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub hits: Vec<Value>,
    pub total_hits: u64,
    pub client_context_id: String,
}

/// Search provider over any transport whose search client is a tower service.
#[derive(Debug, Clone)]
pub struct SearchProvider<T, S> {
    service: S,
    factory: OperationFactory<T>,
}

impl<T, S> SearchProvider<T, S>
where
    T: Transport,
    S: Service<SearchRequest, Response = SearchResponse, Error = T::Failure> + Clone,
{
    #[must_use]
    pub fn new(service: S, factory: OperationFactory<T>) -> Self {
        Self { service, factory }
    }

    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty index name, or any error
    /// surfaced by the execution loop.
    pub async fn search(&self, index: &str, query: Value, opts: &SearchOptions) -> Result<SearchResult> {
        if index.is_empty() {
            return Err(Error::invalid_argument("index name cannot be empty"));
        }

        let mut op = self.factory.new_operation_with_attributes(
            SEARCH_OPERATION,
            opts.parent_span.as_ref(),
            [(attributes::STATEMENT, AttributeValue::from(query.to_string()))],
        );
        op.set_timeout(opts.timeout);
        op.set_retry_strategy(opts.retry_strategy.clone());
        op.set_context(opts.context.clone());
        op.set_idempotent(true);
        op.set_read_only(true);
        let client_context_id = opts
            .client_context_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        op.set_operation_id(client_context_id.as_str());

        let request = SearchRequest {
            context: op.context().clone(),
            index: index.to_string(),
            query,
            limit: opts.limit,
            skip: opts.skip,
            client_context_id: client_context_id.clone(),
        };

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

        let response = result?;
        Ok(SearchResult {
            hits: response.hits,
            total_hits: response.total_hits,
            client_context_id,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
