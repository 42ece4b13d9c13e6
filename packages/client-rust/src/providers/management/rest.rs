use std::collections::BTreeMap;
use std::convert::Infallible;
use std::time::Duration;

use async_trait::async_trait;
use docbridge_core::span::{attributes, REQUEST_ENCODING_SPAN};
use docbridge_core::{CollectionSpec, DurabilityLevel, Error, ErrorKind, Result, ScopeSpec};
use http::header::CONTENT_TYPE;
use http::{Method, StatusCode};
use serde::Deserialize;
use tower::{Service, ServiceExt};

use super::{
    management_operation, validate_collection_spec, validate_scope_name, CollectionsManager,
    ManagementOptions, CREATE_COLLECTION, CREATE_SCOPE, DROP_COLLECTION, DROP_SCOPE, GET_ALL_SCOPES,
};
use crate::operation::{OperationDescriptor, OperationFactory};
use crate::transport::{HttpFailure, HttpProtocol, Transport};

pub type MgmtHttpRequest = http::Request<Vec<u8>>;
pub type MgmtHttpResponse = http::Response<Vec<u8>>;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// HTTP admin endpoints, with error bodies inspected before falling back to
/// the status code.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectionsHttpProtocol;

impl Transport for CollectionsHttpProtocol {
    type Failure = HttpFailure;
    type Durability = Infallible;

    fn map_durability(level: DurabilityLevel) -> Result<Option<Infallible>> {
        HttpProtocol::map_durability(level)
    }

    fn enhance(failure: HttpFailure, read_only: bool) -> Error {
        match failure {
            HttpFailure::Status { status, body } => parse_error_body(status, &body),
            other => HttpProtocol::enhance(other, read_only),
        }
    }
}

/// Rate and quota limits reported in a 429 body, already lowercased.
pub(super) fn limit_error(status: StatusCode, lower: &str, body: &str) -> Option<Error> {
    const RATE_LIMITS: [&str; 4] = [
        "num_concurrent_requests",
        "num_queries_per_min",
        "ingress_mib_per_min",
        "egress_mib_per_min",
    ];
    if status != StatusCode::TOO_MANY_REQUESTS {
        return None;
    }
    if RATE_LIMITS.iter().any(|limit| lower.contains(limit)) {
        return Some(Error::new(ErrorKind::RateLimited, body));
    }
    if lower.contains("maximum number of collections has been reached for scope") {
        return Some(Error::new(ErrorKind::QuotaLimited, body));
    }
    None
}

fn parse_error_body(status: StatusCode, body: &str) -> Error {
    let lower = body.to_lowercase();
    if let Some(err) = limit_error(status, &lower, body) {
        return err;
    }

    let kind = if lower.contains("not found") && lower.contains("collection") {
        ErrorKind::CollectionNotFound
    } else if lower.contains("not found") && lower.contains("scope") {
        ErrorKind::ScopeNotFound
    } else if lower.contains("already exists") && lower.contains("collection") {
        ErrorKind::CollectionExists
    } else if lower.contains("already exists") && lower.contains("scope") {
        ErrorKind::ScopeExists
    } else {
        HttpProtocol::status_kind(status)
    };
    Error::new(kind, body)
}

// -- manifest ---------------------------------------------------------------

#[derive(Deserialize)]
struct Manifest {
    scopes: Vec<ManifestScope>,
}

#[derive(Deserialize)]
struct ManifestScope {
    name: String,
    #[serde(default)]
    collections: Vec<ManifestCollection>,
}

#[derive(Deserialize)]
struct ManifestCollection {
    name: String,
    #[serde(rename = "maxTTL", default)]
    max_ttl: u64,
}

/// Pre-7.0 layout keyed by name.
#[derive(Deserialize)]
struct LegacyManifest {
    scopes: BTreeMap<String, LegacyScope>,
}

#[derive(Deserialize)]
struct LegacyScope {
    #[serde(default)]
    collections: BTreeMap<String, serde_json::Value>,
}

fn parse_manifest(body: &[u8]) -> Result<Vec<ScopeSpec>> {
    if let Ok(manifest) = serde_json::from_slice::<Manifest>(body) {
        return Ok(manifest
            .scopes
            .into_iter()
            .map(|scope| {
                let collections = scope
                    .collections
                    .into_iter()
                    .map(|collection| {
                        let spec = CollectionSpec::new(scope.name.as_str(), collection.name);
                        if collection.max_ttl > 0 {
                            spec.with_max_expiry(Duration::from_secs(collection.max_ttl))
                        } else {
                            spec
                        }
                    })
                    .collect();
                ScopeSpec {
                    name: scope.name,
                    collections,
                }
            })
            .collect());
    }

    let legacy: LegacyManifest = serde_json::from_slice(body)
        .map_err(|e| Error::new(ErrorKind::Transport, "failed to parse collections manifest").with_source(e))?;
    Ok(legacy
        .scopes
        .into_iter()
        .map(|(name, scope)| ScopeSpec {
            collections: scope
                .collections
                .into_keys()
                .map(|collection| CollectionSpec::new(name.as_str(), collection))
                .collect(),
            name,
        })
        .collect())
}

// -- shared admin plumbing --------------------------------------------------

/// One admin call, rebuilt into a fresh request per attempt.
#[derive(Debug, Clone)]
pub(super) struct AdminCall {
    pub(super) method: Method,
    pub(super) path: String,
    pub(super) form: Option<String>,
}

impl AdminCall {
    pub(super) fn new(method: Method, path: String) -> Self {
        Self {
            method,
            path,
            form: None,
        }
    }
}

pub(super) fn escape(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// Management descriptor tagged with the HTTP method and path of `call`.
pub(super) fn admin_operation<T: Transport>(
    factory: &OperationFactory<T>,
    name: &str,
    bucket: Option<&str>,
    opts: &ManagementOptions,
    read_only: bool,
    call: &AdminCall,
) -> OperationDescriptor<T> {
    let op = management_operation(factory, name, bucket, opts, read_only);
    op.set_span_attribute(
        attributes::OPERATION,
        format!("{} {}", call.method, call.path).into(),
    );
    op
}

/// Encodes `fields` as a form body inside a `request_encoding` span.
pub(super) fn encode_form<T: Transport>(op: &OperationDescriptor<T>, fields: &[(&str, String)]) -> String {
    let span = op.new_span(REQUEST_ENCODING_SPAN);
    let form = fields
        .iter()
        .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&");
    span.end();
    form
}

/// Runs `call` under `op`, treating any non-success status as a failure.
pub(super) async fn execute_admin<T, S>(
    service: &S,
    mut op: OperationDescriptor<T>,
    call: AdminCall,
) -> Result<Vec<u8>>
where
    T: Transport<Failure = HttpFailure>,
    S: Service<MgmtHttpRequest, Response = MgmtHttpResponse, Error = HttpFailure> + Clone,
{
    let result = match op.check_ready_for_op() {
        Ok(()) => {
            let service = service.clone();
            op.wrap(move |ctx| {
                let service = service.clone();
                let call = call.clone();
                async move {
                    let mut builder = http::Request::builder()
                        .method(call.method)
                        .uri(call.path.as_str());
                    if call.form.is_some() {
                        builder = builder.header(CONTENT_TYPE, FORM_CONTENT_TYPE);
                    }
                    let mut request = builder
                        .body(call.form.map(String::into_bytes).unwrap_or_default())
                        .map_err(|e| HttpFailure::Io {
                            message: e.to_string(),
                        })?;
                    request.extensions_mut().insert(ctx);

                    let response = service.oneshot(request).await?;
                    let status = response.status();
                    if status.is_success() {
                        Ok::<_, HttpFailure>(response.into_body())
                    } else {
                        Err(HttpFailure::Status {
                            status,
                            body: String::from_utf8_lossy(response.body()).into_owned(),
                        })
                    }
                }
            })
            .await
        }
        Err(err) => Err(err),
    };
    op.finish(false);
    result
}

// -- manager ----------------------------------------------------------------

/// Collections manager over the HTTP admin endpoints.
#[derive(Debug, Clone)]
pub struct HttpCollectionsManager<S> {
    service: S,
    bucket: String,
    factory: OperationFactory<CollectionsHttpProtocol>,
}

impl<S> HttpCollectionsManager<S>
where
    S: Service<MgmtHttpRequest, Response = MgmtHttpResponse, Error = HttpFailure>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
{
    #[must_use]
    pub fn new(
        service: S,
        bucket: impl Into<String>,
        factory: OperationFactory<CollectionsHttpProtocol>,
    ) -> Self {
        Self {
            service,
            bucket: bucket.into(),
            factory,
        }
    }

    fn scopes_path(&self) -> String {
        format!("/pools/default/buckets/{}/scopes", escape(&self.bucket))
    }

    fn operation(
        &self,
        name: &str,
        opts: &ManagementOptions,
        read_only: bool,
        call: &AdminCall,
    ) -> OperationDescriptor<CollectionsHttpProtocol> {
        admin_operation(&self.factory, name, Some(&self.bucket), opts, read_only, call)
    }

    async fn execute(&self, op: OperationDescriptor<CollectionsHttpProtocol>, call: AdminCall) -> Result<Vec<u8>> {
        execute_admin(&self.service, op, call).await
    }
}

#[async_trait]
impl<S> CollectionsManager for HttpCollectionsManager<S>
where
    S: Service<MgmtHttpRequest, Response = MgmtHttpResponse, Error = HttpFailure>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
{
    async fn get_all_scopes(&self, opts: &ManagementOptions) -> Result<Vec<ScopeSpec>> {
        let call = AdminCall::new(Method::GET, self.scopes_path());
        let op = self.operation(GET_ALL_SCOPES, opts, true, &call);
        let body = self.execute(op, call).await?;
        parse_manifest(&body)
    }

    async fn create_scope(&self, scope: &str, opts: &ManagementOptions) -> Result<()> {
        validate_scope_name(scope)?;
        let mut call = AdminCall::new(Method::POST, self.scopes_path());
        let op = self.operation(CREATE_SCOPE, opts, false, &call);
        op.set_span_attribute(attributes::SCOPE, scope.into());
        call.form = Some(encode_form(&op, &[("name", scope.to_string())]));
        self.execute(op, call).await.map(|_| ())
    }

    async fn drop_scope(&self, scope: &str, opts: &ManagementOptions) -> Result<()> {
        validate_scope_name(scope)?;
        let call = AdminCall::new(Method::DELETE, format!("{}/{}", self.scopes_path(), escape(scope)));
        let op = self.operation(DROP_SCOPE, opts, false, &call);
        op.set_span_attribute(attributes::SCOPE, scope.into());
        self.execute(op, call).await.map(|_| ())
    }

    async fn create_collection(&self, spec: &CollectionSpec, opts: &ManagementOptions) -> Result<()> {
        validate_collection_spec(spec)?;
        let mut call = AdminCall::new(
            Method::POST,
            format!("{}/{}/collections", self.scopes_path(), escape(&spec.scope_name)),
        );
        let op = self.operation(CREATE_COLLECTION, opts, false, &call);
        op.set_span_attribute(attributes::SCOPE, spec.scope_name.as_str().into());
        op.set_span_attribute(attributes::COLLECTION, spec.name.as_str().into());

        let mut fields = vec![("name", spec.name.clone())];
        if let Some(expiry) = spec.max_expiry.filter(|expiry| !expiry.is_zero()) {
            fields.push(("maxTTL", expiry.as_secs().to_string()));
        }
        call.form = Some(encode_form(&op, &fields));
        self.execute(op, call).await.map(|_| ())
    }

    async fn drop_collection(&self, spec: &CollectionSpec, opts: &ManagementOptions) -> Result<()> {
        validate_collection_spec(spec)?;
        let call = AdminCall::new(
            Method::DELETE,
            format!(
                "{}/{}/collections/{}",
                self.scopes_path(),
                escape(&spec.scope_name),
                escape(&spec.name)
            ),
        );
        let op = self.operation(DROP_COLLECTION, opts, false, &call);
        op.set_span_attribute(attributes::SCOPE, spec.scope_name.as_str().into());
        op.set_span_attribute(attributes::COLLECTION, spec.name.as_str().into());
        self.execute(op, call).await.map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
