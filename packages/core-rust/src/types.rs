//! Target identity and management specs shared by both transports.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::durability::DurabilityLevel;

/// Name used for the default scope and the default collection.
pub const DEFAULT_NAME: &str = "_default";

/// Bucket, scope and collection an operation is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Keyspace {
    pub bucket: String,
    pub scope: String,
    pub collection: String,
}

impl Keyspace {
    #[must_use]
    pub fn new(
        bucket: impl Into<String>,
        scope: impl Into<String>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            scope: scope.into(),
            collection: collection.into(),
        }
    }

    /// The default scope and collection of `bucket`.
    #[must_use]
    pub fn default_collection(bucket: impl Into<String>) -> Self {
        Self::new(bucket, DEFAULT_NAME, DEFAULT_NAME)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub scope_name: String,
    /// Document expiry applied by the collection. `None` means no expiry.
    pub max_expiry: Option<Duration>,
}

impl CollectionSpec {
    #[must_use]
    pub fn new(scope_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope_name: scope_name.into(),
            max_expiry: None,
        }
    }

    #[must_use]
    pub fn with_max_expiry(mut self, max_expiry: Duration) -> Self {
        self.max_expiry = Some(max_expiry);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeSpec {
    pub name: String,
    pub collections: Vec<CollectionSpec>,
}

/// Storage engine behaviour of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BucketType {
    /// Persistent, disk-backed bucket.
    #[default]
    Couchbase,
    /// Memory-only bucket.
    Ephemeral,
}

/// Settings of one bucket, as listed or created through bucket management.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSettings {
    pub name: String,
    pub bucket_type: BucketType,
    pub ram_quota_mb: u64,
    pub num_replicas: u32,
    pub flush_enabled: bool,
    /// Default document expiry. `None` means no expiry.
    pub max_expiry: Option<Duration>,
    pub minimum_durability: DurabilityLevel,
}

impl BucketSettings {
    /// A persistent bucket with one replica and the given memory quota.
    #[must_use]
    pub fn new(name: impl Into<String>, ram_quota_mb: u64) -> Self {
        Self {
            name: name.into(),
            bucket_type: BucketType::Couchbase,
            ram_quota_mb,
            num_replicas: 1,
            flush_enabled: false,
            max_expiry: None,
            minimum_durability: DurabilityLevel::None,
        }
    }
}

/// Outcome of a successful mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationResult {
    pub cas: u64,
}
