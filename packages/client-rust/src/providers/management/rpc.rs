use std::time::Duration;

use async_trait::async_trait;
use docbridge_core::span::attributes;
use docbridge_core::{CollectionSpec, Error, ErrorKind, Result, RpcFailure, ScopeSpec};
use tower::{Service, ServiceExt};

use super::{
    management_operation, validate_collection_spec, validate_scope_name, CollectionsManager,
    ManagementOptions, CREATE_COLLECTION, CREATE_SCOPE, DROP_COLLECTION, DROP_SCOPE, GET_ALL_SCOPES,
};
use crate::context::OpContext;
use crate::operation::{OperationDescriptor, OperationFactory};
use crate::transport::RpcProtocol;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionAdminCommand {
    ListCollections,
    CreateScope {
        scope: String,
    },
    DeleteScope {
        scope: String,
    },
    CreateCollection {
        scope: String,
        collection: String,
        max_expiry: Option<Duration>,
    },
    DeleteCollection {
        scope: String,
        collection: String,
    },
}

/// One round trip against the RPC collection admin service.
#[derive(Debug, Clone)]
pub struct CollectionAdminRequest {
    pub context: OpContext,
    pub bucket: String,
    pub command: CollectionAdminCommand,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionAdminResponse {
    Scopes(Vec<ScopeSpec>),
    Done,
}

/// Collections manager over the RPC admin service.
#[derive(Debug, Clone)]
pub struct RpcCollectionsManager<S> {
    service: S,
    bucket: String,
    factory: OperationFactory<RpcProtocol>,
}

impl<S> RpcCollectionsManager<S>
where
    S: Service<CollectionAdminRequest, Response = CollectionAdminResponse, Error = RpcFailure>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
{
    #[must_use]
    pub fn new(service: S, bucket: impl Into<String>, factory: OperationFactory<RpcProtocol>) -> Self {
        Self {
            service,
            bucket: bucket.into(),
            factory,
        }
    }

    fn operation(&self, name: &str, opts: &ManagementOptions, read_only: bool) -> OperationDescriptor<RpcProtocol> {
        management_operation(&self.factory, name, Some(&self.bucket), opts, read_only)
    }

    async fn execute(
        &self,
        mut op: OperationDescriptor<RpcProtocol>,
        command: CollectionAdminCommand,
    ) -> Result<CollectionAdminResponse> {
        let result = match op.check_ready_for_op() {
            Ok(()) => {
                let service = self.service.clone();
                let request = CollectionAdminRequest {
                    context: op.context().clone(),
                    bucket: self.bucket.clone(),
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
}

#[async_trait]
impl<S> CollectionsManager for RpcCollectionsManager<S>
where
    S: Service<CollectionAdminRequest, Response = CollectionAdminResponse, Error = RpcFailure>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send,
{
    async fn get_all_scopes(&self, opts: &ManagementOptions) -> Result<Vec<ScopeSpec>> {
        let op = self.operation(GET_ALL_SCOPES, opts, true);
        match self.execute(op, CollectionAdminCommand::ListCollections).await? {
            CollectionAdminResponse::Scopes(scopes) => Ok(scopes),
            CollectionAdminResponse::Done => Err(Error::new(
                ErrorKind::Transport,
                "collection admin service answered a listing without scopes",
            )),
        }
    }

    async fn create_scope(&self, scope: &str, opts: &ManagementOptions) -> Result<()> {
        validate_scope_name(scope)?;
        let op = self.operation(CREATE_SCOPE, opts, false);
        op.set_span_attribute(attributes::SCOPE, scope.into());
        let command = CollectionAdminCommand::CreateScope {
            scope: scope.to_string(),
        };
        self.execute(op, command).await.map(|_| ())
    }

    async fn drop_scope(&self, scope: &str, opts: &ManagementOptions) -> Result<()> {
        validate_scope_name(scope)?;
        let op = self.operation(DROP_SCOPE, opts, false);
        op.set_span_attribute(attributes::SCOPE, scope.into());
        let command = CollectionAdminCommand::DeleteScope {
            scope: scope.to_string(),
        };
        self.execute(op, command).await.map(|_| ())
    }

    async fn create_collection(&self, spec: &CollectionSpec, opts: &ManagementOptions) -> Result<()> {
        validate_collection_spec(spec)?;
        let op = self.operation(CREATE_COLLECTION, opts, false);
        op.set_span_attribute(attributes::SCOPE, spec.scope_name.as_str().into());
        op.set_span_attribute(attributes::COLLECTION, spec.name.as_str().into());
        let command = CollectionAdminCommand::CreateCollection {
            scope: spec.scope_name.clone(),
            collection: spec.name.clone(),
            max_expiry: spec.max_expiry.filter(|expiry| !expiry.is_zero()),
        };
        self.execute(op, command).await.map(|_| ())
    }

    async fn drop_collection(&self, spec: &CollectionSpec, opts: &ManagementOptions) -> Result<()> {
        validate_collection_spec(spec)?;
        let op = self.operation(DROP_COLLECTION, opts, false);
        op.set_span_attribute(attributes::SCOPE, spec.scope_name.as_str().into());
        op.set_span_attribute(attributes::COLLECTION, spec.name.as_str().into());
        let command = CollectionAdminCommand::DeleteCollection {
            scope: spec.scope_name.clone(),
            collection: spec.name.clone(),
        };
        self.execute(op, command).await.map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
