//! Cluster-wide bucket administration.
//!
//! Like collections, [`BucketManager`] has an RPC implementation and one over
//! the HTTP admin endpoints. Flushing exists only over HTTP.

use std::convert::Infallible;
use std::time::Duration;

use async_trait::async_trait;
use docbridge_core::{BucketSettings, BucketType, DurabilityLevel, Error, ErrorKind, Result, RpcFailure};
use http::{Method, StatusCode};
use serde::Deserialize;
use tower::{Service, ServiceExt};

use super::rest::{admin_operation, encode_form, escape, execute_admin, limit_error, AdminCall};
use super::{management_operation, ManagementOptions, MgmtHttpRequest, MgmtHttpResponse};
use crate::context::OpContext;
use crate::operation::{OperationDescriptor, OperationFactory};
use crate::transport::{HttpFailure, HttpProtocol, RpcProtocol, Transport};

pub const GET_ALL_BUCKETS: &str = "manager_bucket_get_all_buckets";
pub const GET_BUCKET: &str = "manager_bucket_get_bucket";
pub const CREATE_BUCKET: &str = "manager_bucket_create_bucket";
pub const DROP_BUCKET: &str = "manager_bucket_drop_bucket";
pub const FLUSH_BUCKET: &str = "manager_bucket_flush_bucket";

const BUCKETS_PATH: &str = "/pools/default/buckets";

#[async_trait]
pub trait BucketManager: Send + Sync {
    async fn get_all_buckets(&self, opts: &ManagementOptions) -> Result<Vec<BucketSettings>>;

    async fn get_bucket(&self, bucket: &str, opts: &ManagementOptions) -> Result<BucketSettings>;

    async fn create_bucket(&self, settings: &BucketSettings, opts: &ManagementOptions) -> Result<()>;

    async fn drop_bucket(&self, bucket: &str, opts: &ManagementOptions) -> Result<()>;

    /// Deletes every document in the bucket. The bucket must have flush enabled.
    async fn flush_bucket(&self, bucket: &str, opts: &ManagementOptions) -> Result<()>;
}

fn validate_bucket_name(bucket: &str) -> Result<()> {
    if bucket.is_empty() {
        return Err(Error::invalid_argument("bucket name cannot be empty"));
    }
    Ok(())
}

fn validate_bucket_settings(settings: &BucketSettings) -> Result<()> {
    validate_bucket_name(&settings.name)?;
    if settings.ram_quota_mb == 0 {
        return Err(Error::invalid_argument("bucket ram quota must be positive"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// RPC
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketAdminCommand {
    ListBuckets,
    CreateBucket(BucketSettings),
    DeleteBucket { bucket: String },
}

/// One round trip against the RPC bucket admin service.
#[derive(Debug, Clone)]
pub struct BucketAdminRequest {
    pub context: OpContext,
    pub command: BucketAdminCommand,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketAdminResponse {
    Buckets(Vec<BucketSettings>),
    Done,
}

/// Bucket manager over the RPC admin service.
#[derive(Debug, Clone)]
pub struct RpcBucketManager<S> {
    service: S,
    factory: OperationFactory<RpcProtocol>,
}

impl<S> RpcBucketManager<S>
where
    S: Service<BucketAdminRequest, Response = BucketAdminResponse, Error = RpcFailure>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
{
    #[must_use]
    pub fn new(service: S, factory: OperationFactory<RpcProtocol>) -> Self {
        Self { service, factory }
    }

    async fn execute(
        &self,
        mut op: OperationDescriptor<RpcProtocol>,
        command: BucketAdminCommand,
    ) -> Result<BucketAdminResponse> {
        let result = match op.check_ready_for_op() {
            Ok(()) => {
                let service = self.service.clone();
                let request = BucketAdminRequest {
                    context: op.context().clone(),
                    command,
                };
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

    async fn list(&self, op: OperationDescriptor<RpcProtocol>) -> Result<Vec<BucketSettings>> {
        match self.execute(op, BucketAdminCommand::ListBuckets).await? {
            BucketAdminResponse::Buckets(buckets) => Ok(buckets),
            BucketAdminResponse::Done => Err(Error::new(
                ErrorKind::Transport,
                "bucket admin service answered a listing without buckets",
            )),
        }
    }
}

#[async_trait]
impl<S> BucketManager for RpcBucketManager<S>
where
    S: Service<BucketAdminRequest, Response = BucketAdminResponse, Error = RpcFailure>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
{
    async fn get_all_buckets(&self, opts: &ManagementOptions) -> Result<Vec<BucketSettings>> {
        let op = management_operation(&self.factory, GET_ALL_BUCKETS, None, opts, true);
        self.list(op).await
    }

    async fn get_bucket(&self, bucket: &str, opts: &ManagementOptions) -> Result<BucketSettings> {
        validate_bucket_name(bucket)?;
        let op = management_operation(&self.factory, GET_BUCKET, Some(bucket), opts, true);
        self.list(op)
            .await?
            .into_iter()
            .find(|settings| settings.name == bucket)
            .ok_or_else(|| Error::new(ErrorKind::BucketNotFound, format!("bucket {bucket} not found")))
    }

    async fn create_bucket(&self, settings: &BucketSettings, opts: &ManagementOptions) -> Result<()> {
        validate_bucket_settings(settings)?;
        let op = management_operation(&self.factory, CREATE_BUCKET, Some(&settings.name), opts, false);
        let command = BucketAdminCommand::CreateBucket(settings.clone());
        self.execute(op, command).await.map(|_| ())
    }

    async fn drop_bucket(&self, bucket: &str, opts: &ManagementOptions) -> Result<()> {
        validate_bucket_name(bucket)?;
        let op = management_operation(&self.factory, DROP_BUCKET, Some(bucket), opts, false);
        let command = BucketAdminCommand::DeleteBucket {
            bucket: bucket.to_string(),
        };
        self.execute(op, command).await.map(|_| ())
    }

    async fn flush_bucket(&self, _bucket: &str, _opts: &ManagementOptions) -> Result<()> {
        Err(Error::feature_not_available(
            "flushing a bucket is not supported over the rpc transport",
        ))
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// HTTP bucket endpoints. Missing buckets are reported by status alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct BucketsHttpProtocol;

impl Transport for BucketsHttpProtocol {
    type Failure = HttpFailure;
    type Durability = Infallible;

    fn map_durability(level: DurabilityLevel) -> Result<Option<Infallible>> {
        HttpProtocol::map_durability(level)
    }

    fn enhance(failure: HttpFailure, read_only: bool) -> Error {
        match failure {
            HttpFailure::Status { status, body } => parse_bucket_error(status, &body),
            other => HttpProtocol::enhance(other, read_only),
        }
    }
}

fn parse_bucket_error(status: StatusCode, body: &str) -> Error {
    let lower = body.to_lowercase();
    if let Some(err) = limit_error(status, &lower, body) {
        return err;
    }
    let kind = if status == StatusCode::NOT_FOUND {
        ErrorKind::BucketNotFound
    } else if lower.contains("already exists") {
        ErrorKind::BucketExists
    } else {
        HttpProtocol::status_kind(status)
    };
    Error::new(kind, body)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketJson {
    name: String,
    bucket_type: String,
    #[serde(default)]
    replica_number: u32,
    quota: QuotaJson,
    #[serde(default)]
    controllers: ControllersJson,
    #[serde(rename = "maxTTL", default)]
    max_ttl: u64,
    #[serde(default)]
    durability_min_level: Option<String>,
}

#[derive(Deserialize)]
struct QuotaJson {
    #[serde(rename = "rawRAM")]
    raw_ram: u64,
}

#[derive(Deserialize, Default)]
struct ControllersJson {
    flush: Option<String>,
}

impl TryFrom<BucketJson> for BucketSettings {
    type Error = Error;

    fn try_from(json: BucketJson) -> Result<Self> {
        let bucket_type = match json.bucket_type.as_str() {
            "membase" | "couchbase" => BucketType::Couchbase,
            "ephemeral" => BucketType::Ephemeral,
            other => {
                return Err(Error::new(
                    ErrorKind::Transport,
                    format!("bucket {} has unsupported type {other}", json.name),
                ))
            }
        };
        let minimum_durability = match json.durability_min_level.as_deref() {
            None => DurabilityLevel::None,
            Some(level) => DurabilityLevel::from_management_name(level).ok_or_else(|| {
                Error::new(
                    ErrorKind::Transport,
                    format!("bucket {} has unknown durability level {level}", json.name),
                )
            })?,
        };
        Ok(Self {
            bucket_type,
            ram_quota_mb: json.quota.raw_ram / (1024 * 1024),
            num_replicas: json.replica_number,
            flush_enabled: json.controllers.flush.is_some(),
            max_expiry: (json.max_ttl > 0).then(|| Duration::from_secs(json.max_ttl)),
            minimum_durability,
            name: json.name,
        })
    }
}

fn parse_buckets(body: &[u8]) -> Result<Vec<BucketSettings>> {
    let buckets: Vec<BucketJson> = serde_json::from_slice(body)
        .map_err(|e| Error::new(ErrorKind::Transport, "failed to parse bucket listing").with_source(e))?;
    buckets.into_iter().map(BucketSettings::try_from).collect()
}

fn parse_bucket(body: &[u8]) -> Result<BucketSettings> {
    let bucket: BucketJson = serde_json::from_slice(body)
        .map_err(|e| Error::new(ErrorKind::Transport, "failed to parse bucket").with_source(e))?;
    BucketSettings::try_from(bucket)
}

fn settings_form(settings: &BucketSettings) -> Vec<(&'static str, String)> {
    let bucket_type = match settings.bucket_type {
        BucketType::Couchbase => "membase",
        BucketType::Ephemeral => "ephemeral",
    };
    let mut fields = vec![
        ("name", settings.name.clone()),
        ("bucketType", bucket_type.to_string()),
        ("ramQuotaMB", settings.ram_quota_mb.to_string()),
        ("replicaNumber", settings.num_replicas.to_string()),
        ("flushEnabled", u8::from(settings.flush_enabled).to_string()),
    ];
    if let Some(expiry) = settings.max_expiry.filter(|expiry| !expiry.is_zero()) {
        fields.push(("maxTTL", expiry.as_secs().to_string()));
    }
    if settings.minimum_durability.is_durable() {
        fields.push((
            "durabilityMinLevel",
            settings.minimum_durability.management_name().to_string(),
        ));
    }
    fields
}

/// Bucket manager over the HTTP admin endpoints.
#[derive(Debug, Clone)]
pub struct HttpBucketManager<S> {
    service: S,
    factory: OperationFactory<BucketsHttpProtocol>,
}

impl<S> HttpBucketManager<S>
where
    S: Service<MgmtHttpRequest, Response = MgmtHttpResponse, Error = HttpFailure>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
{
    #[must_use]
    pub fn new(service: S, factory: OperationFactory<BucketsHttpProtocol>) -> Self {
        Self { service, factory }
    }

    fn bucket_path(bucket: &str) -> String {
        format!("{BUCKETS_PATH}/{}", escape(bucket))
    }
}

#[async_trait]
impl<S> BucketManager for HttpBucketManager<S>
where
    S: Service<MgmtHttpRequest, Response = MgmtHttpResponse, Error = HttpFailure>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
{
    async fn get_all_buckets(&self, opts: &ManagementOptions) -> Result<Vec<BucketSettings>> {
        let call = AdminCall::new(Method::GET, BUCKETS_PATH.to_string());
        let op = admin_operation(&self.factory, GET_ALL_BUCKETS, None, opts, true, &call);
        let body = execute_admin(&self.service, op, call).await?;
        parse_buckets(&body)
    }

    async fn get_bucket(&self, bucket: &str, opts: &ManagementOptions) -> Result<BucketSettings> {
        validate_bucket_name(bucket)?;
        let call = AdminCall::new(Method::GET, Self::bucket_path(bucket));
        let op = admin_operation(&self.factory, GET_BUCKET, Some(bucket), opts, true, &call);
        let body = execute_admin(&self.service, op, call).await?;
        parse_bucket(&body)
    }

    async fn create_bucket(&self, settings: &BucketSettings, opts: &ManagementOptions) -> Result<()> {
        validate_bucket_settings(settings)?;
        let mut call = AdminCall::new(Method::POST, BUCKETS_PATH.to_string());
        let op = admin_operation(&self.factory, CREATE_BUCKET, Some(&settings.name), opts, false, &call);
        call.form = Some(encode_form(&op, &settings_form(settings)));
        execute_admin(&self.service, op, call).await.map(|_| ())
    }

    async fn drop_bucket(&self, bucket: &str, opts: &ManagementOptions) -> Result<()> {
        validate_bucket_name(bucket)?;
        let call = AdminCall::new(Method::DELETE, Self::bucket_path(bucket));
        let op = admin_operation(&self.factory, DROP_BUCKET, Some(bucket), opts, false, &call);
        execute_admin(&self.service, op, call).await.map(|_| ())
    }

    async fn flush_bucket(&self, bucket: &str, opts: &ManagementOptions) -> Result<()> {
        validate_bucket_name(bucket)?;
        let call = AdminCall::new(
            Method::POST,
            format!("{}/controller/doFlush", Self::bucket_path(bucket)),
        );
        let op = admin_operation(&self.factory, FLUSH_BUCKET, Some(bucket), opts, false, &call);
        execute_admin(&self.service, op, call).await.map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use docbridge_core::meter::service_names;
    use docbridge_core::span::attributes;
    use docbridge_core::{classify_service, RpcCode};
    use parking_lot::Mutex;

    use super::*;
    use crate::operation::tests::{harness, Harness};

    fn manager_harness() -> Harness {
        let mut h = harness(service_names::MANAGEMENT, Duration::from_secs(75));
        h.defaults.classifier = classify_service;
        h
    }

    fn respond(status: StatusCode, body: &str) -> MgmtHttpResponse {
        let mut response = http::Response::new(body.as_bytes().to_vec());
        *response.status_mut() = status;
        response
    }

    const TRAVEL_JSON: &str = r#"{"name":"travel","bucketType":"membase","replicaNumber":2,
        "quota":{"ram":1073741824,"rawRAM":268435456},
        "controllers":{"flush":"/pools/default/buckets/travel/controller/doFlush"},
        "maxTTL":600,"durabilityMinLevel":"majority"}"#;

    // -- rpc ----------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn rpc_create_sends_settings() {
        let h = manager_harness();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let service = tower::service_fn(move |req: BucketAdminRequest| {
            log.lock().push(req.command.clone());
            async { Ok::<_, RpcFailure>(BucketAdminResponse::Done) }
        });
        let manager = RpcBucketManager::new(service, OperationFactory::new(h.defaults));

        let settings = BucketSettings::new("travel", 256);
        manager.create_bucket(&settings, &ManagementOptions::default()).await.unwrap();

        assert_eq!(*seen.lock(), vec![BucketAdminCommand::CreateBucket(settings)]);
        assert_eq!(h.tracer.attribute(attributes::BUCKET), Some("travel".into()));
        assert_eq!(h.meter.samples.lock()[0].1, CREATE_BUCKET);
    }

    #[tokio::test(start_paused = true)]
    async fn rpc_get_bucket_filters_listing() {
        let h = manager_harness();
        let service = tower::service_fn(|req: BucketAdminRequest| async move {
            assert_eq!(req.command, BucketAdminCommand::ListBuckets);
            Ok::<_, RpcFailure>(BucketAdminResponse::Buckets(vec![
                BucketSettings::new("beer", 100),
                BucketSettings::new("travel", 256),
            ]))
        });
        let manager = RpcBucketManager::new(service, OperationFactory::new(h.defaults));

        let travel = manager.get_bucket("travel", &ManagementOptions::default()).await.unwrap();
        assert_eq!(travel.ram_quota_mb, 256);
        let err = manager
            .get_bucket("inventory", &ManagementOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BucketNotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn rpc_drop_maps_missing_bucket() {
        let h = manager_harness();
        let service = tower::service_fn(|_req: BucketAdminRequest| async {
            Err::<BucketAdminResponse, _>(
                RpcFailure::new(RpcCode::NotFound, "bucket not found").with_resource("bucket", "travel"),
            )
        });
        let manager = RpcBucketManager::new(service, OperationFactory::new(h.defaults));

        let err = manager.drop_bucket("travel", &ManagementOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BucketNotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn rpc_flush_is_unsupported_and_invalid_settings_never_reach_the_service() {
        let h = manager_harness();
        let service = tower::service_fn(|_req: BucketAdminRequest| async {
            Ok::<_, RpcFailure>(BucketAdminResponse::Done)
        });
        let manager = RpcBucketManager::new(service, OperationFactory::new(h.defaults));

        let err = manager.flush_bucket("travel", &ManagementOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FeatureNotAvailable);
        let err = manager
            .create_bucket(&BucketSettings::new("travel", 0), &ManagementOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        let err = manager.drop_bucket("", &ManagementOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(h.tracer.started.load(Ordering::SeqCst), 0);
    }

    // -- http ---------------------------------------------------------------

    #[test]
    fn bucket_json_converts_to_settings() {
        let settings = parse_bucket(TRAVEL_JSON.as_bytes()).unwrap();
        assert_eq!(settings.name, "travel");
        assert_eq!(settings.bucket_type, BucketType::Couchbase);
        assert_eq!(settings.ram_quota_mb, 256);
        assert_eq!(settings.num_replicas, 2);
        assert!(settings.flush_enabled);
        assert_eq!(settings.max_expiry, Some(Duration::from_secs(600)));
        assert_eq!(settings.minimum_durability, DurabilityLevel::Majority);

        let listing = br#"[{"name":"cache","bucketType":"ephemeral","quota":{"rawRAM":104857600}}]"#;
        let buckets = parse_buckets(listing).unwrap();
        assert_eq!(buckets[0].bucket_type, BucketType::Ephemeral);
        assert!(!buckets[0].flush_enabled);
        assert_eq!(buckets[0].max_expiry, None);

        let memcached = br#"[{"name":"old","bucketType":"memcached","quota":{"rawRAM":1}}]"#;
        assert_eq!(parse_buckets(memcached).unwrap_err().kind(), ErrorKind::Transport);
    }

    #[test]
    fn bucket_errors_use_status_and_body() {
        assert_eq!(
            parse_bucket_error(StatusCode::NOT_FOUND, "Requested resource not found.").kind(),
            ErrorKind::BucketNotFound
        );
        assert_eq!(
            parse_bucket_error(
                StatusCode::BAD_REQUEST,
                r#"{"errors":{"name":"Bucket with given name already exists"}}"#
            )
            .kind(),
            ErrorKind::BucketExists
        );
        assert_eq!(
            parse_bucket_error(StatusCode::TOO_MANY_REQUESTS, "num_concurrent_requests").kind(),
            ErrorKind::RateLimited
        );
        assert_eq!(
            parse_bucket_error(StatusCode::BAD_REQUEST, "flush is disabled").kind(),
            ErrorKind::GenericManagement
        );
    }

    #[tokio::test(start_paused = true)]
    async fn http_create_posts_settings_form() {
        let h = manager_harness();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let service = tower::service_fn(move |req: MgmtHttpRequest| {
            log.lock().push((
                req.method().clone(),
                req.uri().path().to_string(),
                String::from_utf8_lossy(req.body()).into_owned(),
            ));
            async { Ok::<_, HttpFailure>(respond(StatusCode::ACCEPTED, "")) }
        });
        let manager = HttpBucketManager::new(service, OperationFactory::new(h.defaults));

        let settings = BucketSettings {
            bucket_type: BucketType::Ephemeral,
            flush_enabled: true,
            max_expiry: Some(Duration::from_secs(60)),
            minimum_durability: DurabilityLevel::MajorityAndPersistToActive,
            ..BucketSettings::new("travel", 256)
        };
        manager.create_bucket(&settings, &ManagementOptions::default()).await.unwrap();

        let seen = seen.lock();
        assert_eq!(seen[0].0, Method::POST);
        assert_eq!(seen[0].1, "/pools/default/buckets");
        assert_eq!(
            seen[0].2,
            "name=travel&bucketType=ephemeral&ramQuotaMB=256&replicaNumber=1&flushEnabled=1\
             &maxTTL=60&durabilityMinLevel=majorityAndPersistActive"
        );
        assert_eq!(
            h.tracer.attribute(attributes::OPERATION),
            Some("POST /pools/default/buckets".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn http_get_and_flush_use_bucket_paths() {
        let h = manager_harness();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let service = tower::service_fn(move |req: MgmtHttpRequest| {
            log.lock().push((req.method().clone(), req.uri().path().to_string()));
            let body = if req.method() == Method::GET { TRAVEL_JSON } else { "" };
            async move { Ok::<_, HttpFailure>(respond(StatusCode::OK, body)) }
        });
        let manager = HttpBucketManager::new(service, OperationFactory::new(h.defaults));

        let settings = manager.get_bucket("travel", &ManagementOptions::default()).await.unwrap();
        assert!(settings.flush_enabled);
        manager.flush_bucket("travel", &ManagementOptions::default()).await.unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                (Method::GET, "/pools/default/buckets/travel".to_string()),
                (Method::POST, "/pools/default/buckets/travel/controller/doFlush".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn http_drop_of_missing_bucket_is_not_retried() {
        let h = manager_harness();
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let service = tower::service_fn(move |_req: MgmtHttpRequest| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, HttpFailure>(respond(StatusCode::NOT_FOUND, "Requested resource not found.")) }
        });
        let manager = HttpBucketManager::new(service, OperationFactory::new(h.defaults));

        let err = manager.drop_bucket("travel", &ManagementOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BucketNotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
