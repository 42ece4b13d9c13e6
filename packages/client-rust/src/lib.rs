//! `docbridge` Client: retriable operation execution over binary and RPC
//! transports, with per-connection provider factories.

pub mod config;
pub mod connection;
pub mod context;
pub mod logging;
pub mod operation;
pub mod providers;
pub mod retry_loop;
pub mod transport;

pub use config::{ClientConfig, RetryConfig, TimeoutsConfig};
pub use connection::{BinaryConnectionManager, BinaryRouting, Connector, RpcConnectionManager, RpcRouting};
pub use context::{ContextError, OpContext};
pub use logging::{init_logging, LogFormat};
pub use operation::{OperationDefaults, OperationDescriptor, OperationFactory};
pub use providers::kv::KvOperations;
pub use providers::management::{
    BucketManager, CollectionsManager, HttpBucketManager, HttpCollectionsManager, RpcBucketManager,
    RpcCollectionsManager,
};
pub use providers::query::QueryProvider;
pub use providers::search::SearchProvider;
pub use retry_loop::run_retriable;
pub use transport::{BinaryProtocol, HttpFailure, HttpProtocol, RpcDurability, RpcProtocol, Transport};
