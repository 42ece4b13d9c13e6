//! Scope, collection and bucket administration.
//!
//! [`CollectionsManager`] is implemented twice: [`RpcCollectionsManager`] over
//! the RPC admin service and [`HttpCollectionsManager`] over the HTTP admin
//! endpoints reachable from a binary connection. Both validate arguments the
//! same way before any descriptor is created. [`BucketManager`] follows the
//! same split.

mod buckets;
mod rest;
mod rpc;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use docbridge_core::span::attributes;
use docbridge_core::{CollectionSpec, Error, Result, RetryStrategy, ScopeSpec, SpanContext};

pub use self::buckets::{
    BucketAdminCommand, BucketAdminRequest, BucketAdminResponse, BucketManager, BucketsHttpProtocol,
    HttpBucketManager, RpcBucketManager,
};
pub use self::rest::{CollectionsHttpProtocol, HttpCollectionsManager, MgmtHttpRequest, MgmtHttpResponse};
pub use self::rpc::{
    CollectionAdminCommand, CollectionAdminRequest, CollectionAdminResponse, RpcCollectionsManager,
};

use crate::context::OpContext;
use crate::operation::{OperationDescriptor, OperationFactory};
use crate::transport::Transport;

pub const GET_ALL_SCOPES: &str = "manager_collections_get_all_scopes";
pub const CREATE_SCOPE: &str = "manager_collections_create_scope";
pub const DROP_SCOPE: &str = "manager_collections_drop_scope";
pub const CREATE_COLLECTION: &str = "manager_collections_create_collection";
pub const DROP_COLLECTION: &str = "manager_collections_drop_collection";

#[derive(Debug, Clone, Default)]
pub struct ManagementOptions {
    pub timeout: Option<Duration>,
    pub retry_strategy: Option<Arc<dyn RetryStrategy>>,
    pub context: Option<OpContext>,
    pub parent_span: Option<SpanContext>,
}

#[async_trait]
pub trait CollectionsManager: Send + Sync {
    /// Every scope of the bucket with its collections.
    async fn get_all_scopes(&self, opts: &ManagementOptions) -> Result<Vec<ScopeSpec>>;

    async fn create_scope(&self, scope: &str, opts: &ManagementOptions) -> Result<()>;

    async fn drop_scope(&self, scope: &str, opts: &ManagementOptions) -> Result<()>;

    async fn create_collection(&self, spec: &CollectionSpec, opts: &ManagementOptions) -> Result<()>;

    async fn drop_collection(&self, spec: &CollectionSpec, opts: &ManagementOptions) -> Result<()>;
}

pub(crate) fn validate_scope_name(scope: &str) -> Result<()> {
    if scope.is_empty() {
        return Err(Error::invalid_argument("scope name cannot be empty"));
    }
    Ok(())
}

pub(crate) fn validate_collection_spec(spec: &CollectionSpec) -> Result<()> {
    if spec.name.is_empty() {
        return Err(Error::invalid_argument("collection name cannot be empty"));
    }
    validate_scope_name(&spec.scope_name)
}

/// Descriptor for one administrative call, scoped to `bucket` when there is one.
///
/// Only listing is idempotent; creates and drops are not safe to replay blindly.
pub(crate) fn management_operation<T: Transport>(
    factory: &OperationFactory<T>,
    name: &str,
    bucket: Option<&str>,
    opts: &ManagementOptions,
    read_only: bool,
) -> OperationDescriptor<T> {
    let mut op = factory.new_operation(name, opts.parent_span.as_ref());
    if let Some(bucket) = bucket {
        op.set_span_attribute(attributes::BUCKET, bucket.into());
    }
    op.set_timeout(opts.timeout);
    op.set_retry_strategy(opts.retry_strategy.clone());
    op.set_context(opts.context.clone());
    op.set_idempotent(read_only);
    op.set_read_only(read_only);
    op
}

#[cfg(test)]
mod tests {
    use docbridge_core::ErrorKind;

    use super::*;

    #[test]
    fn empty_names_are_invalid() {
        assert_eq!(validate_scope_name("").unwrap_err().kind(), ErrorKind::InvalidArgument);
        validate_scope_name("inventory").unwrap();

        let err = validate_collection_spec(&CollectionSpec::new("inventory", "")).unwrap_err();
        assert!(err.message().contains("collection"));
        let err = validate_collection_spec(&CollectionSpec::new("", "hotels")).unwrap_err();
        assert!(err.message().contains("scope"));
    }
}
