//! Provider factories bound to one established connection.
//!
//! A connection manager owns a [`Connector`] and the client configuration. It
//! connects at most once, then hands out providers whose descriptors carry
//! the service defaults derived from that configuration. The connected
//! client is read lock-free; only establishment is serialized.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use docbridge_core::meter::service_names;
use docbridge_core::{
    classify_kv, classify_service, BinaryFailure, Classifier, Error, ErrorKind, JsonTranscoder, Keyspace,
    Meter, RequestTracer, Result, RetryStrategy, RpcFailure,
};
use tower::Service;
use tracing::info;

use crate::config::ClientConfig;
use crate::operation::{OperationDefaults, OperationFactory};
use crate::providers::kv::{KvOperations, KvRequest, KvResponse};
use crate::providers::management::{
    BucketAdminRequest, BucketAdminResponse, BucketsHttpProtocol, CollectionAdminRequest,
    CollectionAdminResponse, CollectionsHttpProtocol, HttpBucketManager, HttpCollectionsManager, MgmtHttpRequest,
    MgmtHttpResponse, RpcBucketManager, RpcCollectionsManager,
};
use crate::providers::query::{QueryProvider, QueryRequest, QueryResponse};
use crate::providers::search::{SearchProvider, SearchRequest, SearchResponse};
use crate::transport::{BinaryProtocol, HttpFailure, HttpProtocol, RpcDurability, RpcProtocol, Transport};

/// Establishes the transport session. Implemented by transport crates.
#[async_trait]
pub trait Connector: Send + Sync {
    type Client: Send + Sync + 'static;

    async fn connect(&self) -> anyhow::Result<Self::Client>;
}

/// Service handles exposed by a connected RPC client.
pub trait RpcRouting: Send + Sync {
    type Kv: Service<KvRequest<RpcDurability>, Response = KvResponse, Error = RpcFailure> + Clone;
    type Query: Service<QueryRequest, Response = QueryResponse, Error = RpcFailure> + Clone;
    type Search: Service<SearchRequest, Response = SearchResponse, Error = RpcFailure> + Clone;
    type CollectionsAdmin: Service<
            CollectionAdminRequest,
            Response = CollectionAdminResponse,
            Error = RpcFailure,
            Future: Send,
        > + Clone
        + Send
        + Sync
        + 'static;
    type BucketAdmin: Service<BucketAdminRequest, Response = BucketAdminResponse, Error = RpcFailure, Future: Send>
        + Clone
        + Send
        + Sync
        + 'static;

    fn kv(&self) -> Self::Kv;

    fn query(&self) -> Self::Query;

    fn search(&self) -> Self::Search;

    fn collections_admin(&self) -> Self::CollectionsAdmin;

    fn bucket_admin(&self) -> Self::BucketAdmin;
}

/// Service handles exposed by a connected binary client.
pub trait BinaryRouting: Send + Sync {
    type Kv: Service<KvRequest<u8>, Response = KvResponse, Error = BinaryFailure> + Clone;
    type Query: Service<QueryRequest, Response = QueryResponse, Error = HttpFailure> + Clone;
    type Search: Service<SearchRequest, Response = SearchResponse, Error = HttpFailure> + Clone;
    type Management: Service<MgmtHttpRequest, Response = MgmtHttpResponse, Error = HttpFailure, Future: Send>
        + Clone
        + Send
        + Sync
        + 'static;

    /// Key-value service for `bucket`.
    fn kv(&self, bucket: &str) -> Self::Kv;

    /// HTTP query endpoint, if the cluster exposes one to this client.
    fn query(&self) -> Option<Self::Query>;

    /// HTTP search endpoint, if the cluster exposes one to this client.
    fn search(&self) -> Option<Self::Search>;

    /// Cluster admin endpoint, serving both collection and bucket management.
    fn management(&self) -> Self::Management;
}

/// Connection-wide state shared by both managers.
struct Shared<C> {
    connect_lock: tokio::sync::Mutex<()>,
    client: ArcSwapOption<C>,
    config: ClientConfig,
    tracer: Arc<dyn RequestTracer>,
    meter: Arc<dyn Meter>,
    retry_strategy: Arc<dyn RetryStrategy>,
}

impl<C> Shared<C> {
    fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            connect_lock: tokio::sync::Mutex::new(()),
            client: ArcSwapOption::empty(),
            tracer: config.tracer(),
            meter: config.meter(),
            retry_strategy: config.retry.strategy(),
            config,
        })
    }

    async fn connect<D>(&self, connector: &D, kind: &str) -> Result<()>
    where
        D: Connector<Client = C>,
    {
        let _guard = self.connect_lock.lock().await;
        if self.client.load().is_some() {
            return Ok(());
        }
        let client = connector
            .connect()
            .await
            .map_err(|e| Error::transport(e.context(format!("failed to establish {kind} connection"))))?;
        self.client.store(Some(Arc::new(client)));
        info!(transport = kind, "connection established");
        Ok(())
    }

    fn client(&self) -> Result<Arc<C>> {
        self.client
            .load_full()
            .ok_or_else(|| Error::new(ErrorKind::ServiceNotAvailable, "connection is not established"))
    }

    fn factory<T: Transport>(
        &self,
        service: &'static str,
        timeout: Duration,
        durable_timeout: Duration,
        classifier: Classifier,
    ) -> OperationFactory<T> {
        OperationFactory::new(OperationDefaults {
            service,
            timeout,
            durable_timeout,
            retry_strategy: Arc::clone(&self.retry_strategy),
            tracer: Arc::clone(&self.tracer),
            meter: Arc::clone(&self.meter),
            classifier,
            transcoder: Arc::new(JsonTranscoder),
        })
    }

    fn kv_factory<T: Transport>(&self) -> OperationFactory<T> {
        let timeouts = &self.config.timeouts;
        self.factory(service_names::KV, timeouts.kv, timeouts.kv_durable, classify_kv)
    }

    fn query_factory<T: Transport>(&self) -> OperationFactory<T> {
        let timeout = self.config.timeouts.query;
        self.factory(service_names::QUERY, timeout, timeout, classify_service)
    }

    fn search_factory<T: Transport>(&self) -> OperationFactory<T> {
        let timeout = self.config.timeouts.search;
        self.factory(service_names::SEARCH, timeout, timeout, classify_service)
    }

    fn management_factory<T: Transport>(&self) -> OperationFactory<T> {
        let timeout = self.config.timeouts.management;
        self.factory(service_names::MANAGEMENT, timeout, timeout, classify_service)
    }
}

// ---------------------------------------------------------------------------
// RpcConnectionManager
// ---------------------------------------------------------------------------

/// Provider factories over the RPC transport.
pub struct RpcConnectionManager<D: Connector> {
    connector: D,
    shared: Shared<D::Client>,
}

impl<D> RpcConnectionManager<D>
where
    D: Connector,
    D::Client: RpcRouting,
{
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if `config` fails validation.
    pub fn new(connector: D, config: ClientConfig) -> Result<Self> {
        Ok(Self {
            connector,
            shared: Shared::new(config)?,
        })
    }

    /// Connects once. Later calls return immediately.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the connector fails.
    pub async fn connect(&self) -> Result<()> {
        self.shared.connect(&self.connector, "rpc").await
    }

    pub fn close(&self) {
        self.shared.client.store(None);
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// # Errors
    ///
    /// Returns `ServiceNotAvailable` before [`connect`](Self::connect) succeeds.
    pub fn kv_provider(
        &self,
        keyspace: Keyspace,
    ) -> Result<KvOperations<RpcProtocol, <D::Client as RpcRouting>::Kv>> {
        let client = self.shared.client()?;
        Ok(KvOperations::new(client.kv(), keyspace, self.shared.kv_factory()))
    }

    /// # Errors
    ///
    /// Returns `ServiceNotAvailable` before [`connect`](Self::connect) succeeds.
    pub fn query_provider(&self) -> Result<QueryProvider<RpcProtocol, <D::Client as RpcRouting>::Query>> {
        let client = self.shared.client()?;
        Ok(QueryProvider::new(client.query(), self.shared.query_factory()))
    }

    /// # Errors
    ///
    /// Returns `ServiceNotAvailable` before [`connect`](Self::connect) succeeds.
    pub fn search_provider(&self) -> Result<SearchProvider<RpcProtocol, <D::Client as RpcRouting>::Search>> {
        let client = self.shared.client()?;
        Ok(SearchProvider::new(client.search(), self.shared.search_factory()))
    }

    /// # Errors
    ///
    /// Returns `ServiceNotAvailable` before [`connect`](Self::connect) succeeds.
    pub fn collections_manager(
        &self,
        bucket: &str,
    ) -> Result<RpcCollectionsManager<<D::Client as RpcRouting>::CollectionsAdmin>> {
        let client = self.shared.client()?;
        Ok(RpcCollectionsManager::new(
            client.collections_admin(),
            bucket,
            self.shared.management_factory(),
        ))
    }

    /// # Errors
    ///
    /// Returns `ServiceNotAvailable` before [`connect`](Self::connect) succeeds.
    pub fn bucket_manager(&self) -> Result<RpcBucketManager<<D::Client as RpcRouting>::BucketAdmin>> {
        let client = self.shared.client()?;
        Ok(RpcBucketManager::new(
            client.bucket_admin(),
            self.shared.management_factory(),
        ))
    }
}

// ---------------------------------------------------------------------------
// BinaryConnectionManager
// ---------------------------------------------------------------------------

/// Provider factories over the legacy binary transport and its HTTP endpoints.
pub struct BinaryConnectionManager<D: Connector> {
    connector: D,
    shared: Shared<D::Client>,
}

impl<D> BinaryConnectionManager<D>
where
    D: Connector,
    D::Client: BinaryRouting,
{
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if `config` fails validation.
    pub fn new(connector: D, config: ClientConfig) -> Result<Self> {
        Ok(Self {
            connector,
            shared: Shared::new(config)?,
        })
    }

    /// Connects once. Later calls return immediately.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the connector fails.
    pub async fn connect(&self) -> Result<()> {
        self.shared.connect(&self.connector, "binary").await
    }

    pub fn close(&self) {
        self.shared.client.store(None);
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// # Errors
    ///
    /// Returns `ServiceNotAvailable` before [`connect`](Self::connect) succeeds.
    pub fn kv_provider(
        &self,
        keyspace: Keyspace,
    ) -> Result<KvOperations<BinaryProtocol, <D::Client as BinaryRouting>::Kv>> {
        let client = self.shared.client()?;
        let service = client.kv(&keyspace.bucket);
        Ok(KvOperations::new(service, keyspace, self.shared.kv_factory()))
    }

    /// # Errors
    ///
    /// Returns `FeatureNotAvailable` if the client exposes no query endpoint,
    /// or `ServiceNotAvailable` before [`connect`](Self::connect) succeeds.
    pub fn query_provider(
        &self,
    ) -> Result<QueryProvider<HttpProtocol, <D::Client as BinaryRouting>::Query>> {
        let client = self.shared.client()?;
        let service = client.query().ok_or_else(|| {
            Error::feature_not_available("query is not available over this binary connection")
        })?;
        Ok(QueryProvider::new(service, self.shared.query_factory()))
    }

    /// # Errors
    ///
    /// Returns `FeatureNotAvailable` if the client exposes no search endpoint,
    /// or `ServiceNotAvailable` before [`connect`](Self::connect) succeeds.
    pub fn search_provider(
        &self,
    ) -> Result<SearchProvider<HttpProtocol, <D::Client as BinaryRouting>::Search>> {
        let client = self.shared.client()?;
        let service = client.search().ok_or_else(|| {
            Error::feature_not_available("search is not available over this binary connection")
        })?;
        Ok(SearchProvider::new(service, self.shared.search_factory()))
    }

    /// # Errors
    ///
    /// Returns `ServiceNotAvailable` before [`connect`](Self::connect) succeeds.
    pub fn collections_manager(
        &self,
        bucket: &str,
    ) -> Result<HttpCollectionsManager<<D::Client as BinaryRouting>::Management>> {
        let client = self.shared.client()?;
        Ok(HttpCollectionsManager::new(
            client.management(),
            bucket,
            self.shared.management_factory::<CollectionsHttpProtocol>(),
        ))
    }

    /// # Errors
    ///
    /// Returns `ServiceNotAvailable` before [`connect`](Self::connect) succeeds.
    pub fn bucket_manager(&self) -> Result<HttpBucketManager<<D::Client as BinaryRouting>::Management>> {
        let client = self.shared.client()?;
        Ok(HttpBucketManager::new(
            client.management(),
            self.shared.management_factory::<BucketsHttpProtocol>(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::future::{ready, Ready};
    use std::sync::atomic::{AtomicU32, Ordering};

    use docbridge_core::{CollectionSpec, DurabilityLevel, EncodedValue, Payload, JSON_FLAGS};
    use http::StatusCode;
    use serde_json::json;
    use tower::service_fn;
    use tower::util::ServiceFn;

    use super::*;
    use crate::providers::kv::{KvCommand, MutateOptions, ReadOptions};
    use crate::providers::management::{BucketManager, CollectionsManager, ManagementOptions};
    use crate::providers::query::QueryOptions;
    use crate::providers::search::SearchOptions;

    type Handler<Req, Res, E> = ServiceFn<fn(Req) -> Ready<std::result::Result<Res, E>>>;

    // -- fakes --------------------------------------------------------------

    fn rpc_kv(req: KvRequest<RpcDurability>) -> Ready<std::result::Result<KvResponse, RpcFailure>> {
        assert_eq!(req.durability, Some(RpcDurability::Majority));
        ready(Ok(KvResponse {
            cas: 11,
            ..KvResponse::default()
        }))
    }

    fn rpc_query(_req: QueryRequest) -> Ready<std::result::Result<QueryResponse, RpcFailure>> {
        ready(Ok(QueryResponse {
            rows: vec![json!(1)],
            request_id: "r".to_string(),
        }))
    }

    fn rpc_search(req: SearchRequest) -> Ready<std::result::Result<SearchResponse, RpcFailure>> {
        assert_eq!(req.index, "hotels-idx");
        ready(Ok(SearchResponse {
            hits: vec![json!({"id": "hotel_1"})],
            total_hits: 1,
        }))
    }

    fn rpc_admin(
        _req: CollectionAdminRequest,
    ) -> Ready<std::result::Result<CollectionAdminResponse, RpcFailure>> {
        ready(Ok(CollectionAdminResponse::Done))
    }

    fn rpc_bucket_admin(_req: BucketAdminRequest) -> Ready<std::result::Result<BucketAdminResponse, RpcFailure>> {
        ready(Ok(BucketAdminResponse::Buckets(vec![
            docbridge_core::BucketSettings::new("travel", 256),
        ])))
    }

    fn binary_kv(req: KvRequest<u8>) -> Ready<std::result::Result<KvResponse, BinaryFailure>> {
        assert_eq!(req.keyspace.bucket, "travel");
        assert_eq!(req.command, KvCommand::Get);
        ready(Ok(KvResponse {
            cas: 3,
            value: Some(EncodedValue {
                bytes: br#"{"a":1}"#.to_vec(),
                flags: JSON_FLAGS,
            }),
            exists: true,
        }))
    }

    fn binary_management(req: MgmtHttpRequest) -> Ready<std::result::Result<MgmtHttpResponse, HttpFailure>> {
        let body = if req.uri().path().contains("/scopes") {
            b"Scope with name s is not found".to_vec()
        } else {
            b"Requested resource not found.".to_vec()
        };
        let mut response = http::Response::new(body);
        *response.status_mut() = StatusCode::NOT_FOUND;
        ready(Ok(response))
    }

    struct FakeRpcClient;

    impl RpcRouting for FakeRpcClient {
        type Kv = Handler<KvRequest<RpcDurability>, KvResponse, RpcFailure>;
        type Query = Handler<QueryRequest, QueryResponse, RpcFailure>;
        type Search = Handler<SearchRequest, SearchResponse, RpcFailure>;
        type CollectionsAdmin = Handler<CollectionAdminRequest, CollectionAdminResponse, RpcFailure>;
        type BucketAdmin = Handler<BucketAdminRequest, BucketAdminResponse, RpcFailure>;

        fn kv(&self) -> Self::Kv {
            service_fn(rpc_kv as fn(_) -> _)
        }

        fn query(&self) -> Self::Query {
            service_fn(rpc_query as fn(_) -> _)
        }

        fn search(&self) -> Self::Search {
            service_fn(rpc_search as fn(_) -> _)
        }

        fn collections_admin(&self) -> Self::CollectionsAdmin {
            service_fn(rpc_admin as fn(_) -> _)
        }

        fn bucket_admin(&self) -> Self::BucketAdmin {
            service_fn(rpc_bucket_admin as fn(_) -> _)
        }
    }

    struct FakeBinaryClient;

    impl BinaryRouting for FakeBinaryClient {
        type Kv = Handler<KvRequest<u8>, KvResponse, BinaryFailure>;
        type Query = Handler<QueryRequest, QueryResponse, HttpFailure>;
        type Search = Handler<SearchRequest, SearchResponse, HttpFailure>;
        type Management = Handler<MgmtHttpRequest, MgmtHttpResponse, HttpFailure>;

        fn kv(&self, _bucket: &str) -> Self::Kv {
            service_fn(binary_kv as fn(_) -> _)
        }

        fn query(&self) -> Option<Self::Query> {
            None
        }

        fn search(&self) -> Option<Self::Search> {
            None
        }

        fn management(&self) -> Self::Management {
            service_fn(binary_management as fn(_) -> _)
        }
    }

    struct CountingConnector<C> {
        calls: AtomicU32,
        make: fn() -> C,
    }

    #[async_trait]
    impl<C: Send + Sync + 'static> Connector for CountingConnector<C> {
        type Client = C;

        async fn connect(&self) -> anyhow::Result<C> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((self.make)())
        }
    }

    struct FailingConnector;

    #[async_trait]
    impl Connector for FailingConnector {
        type Client = FakeRpcClient;

        async fn connect(&self) -> anyhow::Result<FakeRpcClient> {
            Err(anyhow::anyhow!("connection refused"))
        }
    }

    fn quiet_config() -> ClientConfig {
        ClientConfig {
            enable_tracing: false,
            enable_metrics: false,
            ..ClientConfig::default()
        }
    }

    // -- lifecycle ----------------------------------------------------------

    #[tokio::test]
    async fn providers_require_connection() {
        let connector = CountingConnector {
            calls: AtomicU32::new(0),
            make: || FakeRpcClient,
        };
        let manager = RpcConnectionManager::new(connector, quiet_config()).unwrap();
        let err = manager.query_provider().err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ServiceNotAvailable);

        manager.connect().await.unwrap();
        manager.connect().await.unwrap();
        assert_eq!(manager.connector.calls.load(Ordering::SeqCst), 1);
        assert!(manager.query_provider().is_ok());

        manager.close();
        assert!(manager.kv_provider(Keyspace::default_collection("b")).is_err());
    }

    #[tokio::test]
    async fn connector_failure_is_a_transport_error() {
        let manager = RpcConnectionManager::new(FailingConnector, quiet_config()).unwrap();
        let err = manager.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = quiet_config();
        config.timeouts.kv = Duration::ZERO;
        let err = RpcConnectionManager::new(FailingConnector, config).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    }

    // -- factories ----------------------------------------------------------

    #[tokio::test]
    async fn rpc_providers_carry_service_defaults() {
        let connector = CountingConnector {
            calls: AtomicU32::new(0),
            make: || FakeRpcClient,
        };
        let manager = RpcConnectionManager::new(connector, quiet_config()).unwrap();
        manager.connect().await.unwrap();

        let kv = manager.kv_provider(Keyspace::default_collection("travel")).unwrap();
        let opts = MutateOptions {
            durability: DurabilityLevel::Majority,
            ..MutateOptions::default()
        };
        let result = kv.upsert("doc", &Payload::Json(json!({"a": 1})), &opts).await.unwrap();
        assert_eq!(result.cas, 11);

        let rows = manager
            .query_provider()
            .unwrap()
            .query("SELECT 1", &QueryOptions::default())
            .await
            .unwrap()
            .rows;
        assert_eq!(rows, vec![json!(1)]);

        manager
            .collections_manager("travel")
            .unwrap()
            .create_scope("inventory", &ManagementOptions::default())
            .await
            .unwrap();

        let hits = manager
            .search_provider()
            .unwrap()
            .search("hotels-idx", json!({"match": "pool"}), &SearchOptions::default())
            .await
            .unwrap()
            .hits;
        assert_eq!(hits.len(), 1);

        let buckets = manager
            .bucket_manager()
            .unwrap()
            .get_all_buckets(&ManagementOptions::default())
            .await
            .unwrap();
        assert_eq!(buckets[0].name, "travel");
    }

    #[tokio::test]
    async fn binary_connection_offers_kv_and_management_only() {
        let connector = CountingConnector {
            calls: AtomicU32::new(0),
            make: || FakeBinaryClient,
        };
        let manager = BinaryConnectionManager::new(connector, quiet_config()).unwrap();
        manager.connect().await.unwrap();

        let kv = manager.kv_provider(Keyspace::default_collection("travel")).unwrap();
        let doc = kv.get("doc", &ReadOptions::default()).await.unwrap();
        assert_eq!(doc.content, Payload::Json(json!({"a": 1})));

        let err = manager.query_provider().err().unwrap();
        assert_eq!(err.kind(), ErrorKind::FeatureNotAvailable);
        let err = manager.search_provider().err().unwrap();
        assert_eq!(err.kind(), ErrorKind::FeatureNotAvailable);

        let err = manager
            .bucket_manager()
            .unwrap()
            .drop_bucket("travel", &ManagementOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BucketNotFound);

        let err = manager
            .collections_manager("travel")
            .unwrap()
            .drop_collection(&CollectionSpec::new("s", "c"), &ManagementOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ScopeNotFound);
    }
}
