//! Query call site.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use docbridge_core::span::attributes;
use docbridge_core::{AttributeValue, Error, Result, RetryStrategy, SpanContext};
use serde_json::Value;
use tower::{Service, ServiceExt};

use crate::context::OpContext;
use crate::operation::OperationFactory;
use crate::transport::Transport;

const QUERY_OPERATION: &str = "query";

/// One query round trip.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub context: OpContext,
    pub statement: String,
    pub positional_parameters: Vec<Value>,
    pub named_parameters: BTreeMap<String, Value>,
    pub read_only: bool,
    /// Correlation id echoed back by the query service.
    pub client_context_id: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    pub rows: Vec<Value>,
    pub request_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub timeout: Option<Duration>,
    pub retry_strategy: Option<Arc<dyn RetryStrategy>>,
    pub context: Option<OpContext>,
    pub parent_span: Option<SpanContext>,
    /// Read-only statements are retried as idempotent.
    pub read_only: bool,
    pub positional_parameters: Vec<Value>,
    pub named_parameters: BTreeMap<String, Value>,
    /// Generated when unset.
    pub client_context_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Value>,
    pub request_id: String,
    pub client_context_id: String,
}

impl QueryResult {
    /// Deserializes every row into `R`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for the first row that does not match `R`.
    pub fn rows_as<R: serde::de::DeserializeOwned>(&self) -> Result<Vec<R>> {
        self.rows
            .iter()
            .map(|row| {
                serde_json::from_value(row.clone())
                    .map_err(|e| Error::invalid_argument("row does not match the requested type").with_source(e))
            })
            .collect()
    }
}

/// Query provider over any transport whose query client is a tower service.
#[derive(Debug, Clone)]
pub struct QueryProvider<T, S> {
    service: S,
    factory: OperationFactory<T>,
}

impl<T, S> QueryProvider<T, S>
where
    T: Transport,
    S: Service<QueryRequest, Response = QueryResponse, Error = T::Failure> + Clone,
{
    #[must_use]
    pub fn new(service: S, factory: OperationFactory<T>) -> Self {
        Self { service, factory }
    }

    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty statement, or any error surfaced
    /// by the execution loop.
    pub async fn query(&self, statement: &str, opts: &QueryOptions) -> Result<QueryResult> {
        if statement.trim().is_empty() {
            return Err(Error::invalid_argument("statement cannot be empty"));
        }

        let mut op = self.factory.new_operation_with_attributes(
            QUERY_OPERATION,
            opts.parent_span.as_ref(),
            [(attributes::STATEMENT, AttributeValue::from(statement))],
        );
        op.set_timeout(opts.timeout);
        op.set_retry_strategy(opts.retry_strategy.clone());
        op.set_context(opts.context.clone());
        op.set_idempotent(opts.read_only);
        op.set_read_only(opts.read_only);
        let client_context_id = opts
            .client_context_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        op.set_operation_id(client_context_id.as_str());

        let request = QueryRequest {
            context: op.context().clone(),
            statement: statement.to_string(),
            positional_parameters: opts.positional_parameters.clone(),
            named_parameters: opts.named_parameters.clone(),
            read_only: opts.read_only,
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
        Ok(QueryResult {
            rows: response.rows,
            request_id: response.request_id,
            client_context_id,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use docbridge_core::meter::service_names;
    use docbridge_core::{classify_service, ErrorKind, RpcCode, RpcFailure};
    use http::StatusCode;
    use serde_json::json;

    use super::*;
    use crate::operation::tests::harness;
    use crate::transport::{HttpFailure, HttpProtocol, RpcProtocol};

    #[tokio::test(start_paused = true)]
    async fn query_returns_rows_and_sets_statement() {
        let mut h = harness(service_names::QUERY, Duration::from_secs(75));
        h.defaults.classifier = classify_service;
        let service = tower::service_fn(|req: QueryRequest| async move {
            assert_eq!(req.client_context_id, "ctx-1");
            Ok::<_, RpcFailure>(QueryResponse {
                rows: vec![json!({"n": 1}), json!({"n": 2})],
                request_id: "r1".to_string(),
            })
        });
        let provider = QueryProvider::new(service, OperationFactory::<RpcProtocol>::new(h.defaults));

        let opts = QueryOptions {
            client_context_id: Some("ctx-1".to_string()),
            ..QueryOptions::default()
        };
        let result = provider.query("SELECT n FROM t", &opts).await.unwrap();
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.client_context_id, "ctx-1");
        assert_eq!(
            h.tracer.attribute(attributes::STATEMENT),
            Some("SELECT n FROM t".into())
        );

        #[derive(serde::Deserialize)]
        struct Row {
            n: u32,
        }
        let rows: Vec<Row> = result.rows_as().unwrap();
        assert_eq!(rows.iter().map(|r| r.n).sum::<u32>(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_statement_is_rejected() {
        let h = harness(service_names::QUERY, Duration::from_secs(75));
        let service = tower::service_fn(|_req: QueryRequest| async {
            Ok::<_, RpcFailure>(QueryResponse::default())
        });
        let provider = QueryProvider::new(service, OperationFactory::<RpcProtocol>::new(h.defaults));
        let err = provider.query("  ", &QueryOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(h.tracer.started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_service_is_retried() {
        let mut h = harness(service_names::QUERY, Duration::from_secs(75));
        h.defaults.classifier = classify_service;
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let service = tower::service_fn(move |_req: QueryRequest| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(HttpFailure::Status {
                        status: StatusCode::SERVICE_UNAVAILABLE,
                        body: String::new(),
                    })
                } else {
                    Ok(QueryResponse::default())
                }
            }
        });
        let provider = QueryProvider::new(service, OperationFactory::<HttpProtocol>::new(h.defaults));

        provider.query("SELECT 1", &QueryOptions::default()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn non_read_only_query_times_out_ambiguously() {
        let mut h = harness(service_names::QUERY, Duration::from_millis(200));
        h.defaults.classifier = classify_service;
        let service = tower::service_fn(|_req: QueryRequest| async {
            Err::<QueryResponse, _>(RpcFailure::new(RpcCode::Unavailable, "no query nodes"))
        });
        let provider = QueryProvider::new(service, OperationFactory::<RpcProtocol>::new(h.defaults));

        let err = provider
            .query("UPDATE t SET a = 1", &QueryOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousTimeout);

        let opts = QueryOptions {
            read_only: true,
            ..QueryOptions::default()
        };
        let err = provider.query("SELECT 1", &opts).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnambiguousTimeout);
    }
}
