//! Collaborator interfaces for the shared backing services.
//!
//! Stations never talk to each other directly. Everything they share goes
//! through a key-value service (run and workflow documents) and a blob
//! service (artifacts). The traits here describe exactly what the handoff
//! layer needs from those services; [`MemoryBackend`] and
//! [`FilesystemBackend`] are the two adapters shipped with the crate.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

pub mod filesystem;
pub mod memory;

pub use filesystem::FilesystemBackend;
pub use memory::MemoryBackend;

/// Per-object headers carried by the blob service.
pub type Headers = BTreeMap<String, String>;

/// Errors reported by a backing-service adapter.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("revision mismatch on {key}: expected {expected}, found {found:?}")]
    RevisionMismatch {
        key: String,
        expected: u64,
        found: Option<u64>,
    },

    #[error("bucket {bucket} capacity exceeded: {requested} bytes requested, limit {limit}")]
    CapacityExceeded {
        bucket: String,
        requested: u64,
        limit: u64,
    },

    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Bucket settings for the key-value service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValueConfig {
    pub bucket: String,
    pub description: String,
    /// Entries older than this are dropped by the service. `None` keeps them forever.
    pub ttl: Option<Duration>,
}

/// Bucket settings for the blob service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    pub description: String,
    /// Total bytes the bucket may hold. `None` means unbounded.
    pub max_bytes: Option<u64>,
}

/// A stored key-value entry.
#[derive(Debug, Clone, PartialEq)]
pub struct KvEntry {
    pub value: Bytes,
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

/// Object description supplied on upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectMeta {
    pub name: String,
    pub description: Option<String>,
    pub headers: Headers,
}

/// Object description as reported by the blob service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub headers: Headers,
}

/// An object body together with its info.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub info: ObjectInfo,
    pub body: Bytes,
}

/// A shared key-value service with named buckets.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait KeyValueService: Send + Sync {
    /// Open an existing bucket. Fails with [`BackendError::BucketNotFound`] if absent.
    async fn key_value(&self, bucket: &str) -> Result<Arc<dyn KeyValueBucket>, BackendError>;

    /// Create a bucket, or return the existing one with that name.
    async fn create_key_value(
        &self,
        config: KeyValueConfig,
    ) -> Result<Arc<dyn KeyValueBucket>, BackendError>;
}

/// One key-value bucket.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait KeyValueBucket: Send + Sync {
    async fn entry(&self, key: &str) -> Result<Option<KvEntry>, BackendError>;

    /// Unconditional write. Returns the new revision.
    async fn put(&self, key: &str, value: Bytes) -> Result<u64, BackendError>;

    /// Write only if the stored revision equals `expected_revision`.
    async fn update(
        &self,
        key: &str,
        value: Bytes,
        expected_revision: u64,
    ) -> Result<u64, BackendError>;

    /// Remove a key. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> Result<(), BackendError>;
}

/// A shared blob service with named buckets.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait BlobService: Send + Sync {
    /// Open an existing bucket. Fails with [`BackendError::BucketNotFound`] if absent.
    async fn object_store(&self, bucket: &str) -> Result<Arc<dyn BlobBucket>, BackendError>;

    /// Create a bucket, or return the existing one with that name.
    async fn create_object_store(
        &self,
        config: ObjectStoreConfig,
    ) -> Result<Arc<dyn BlobBucket>, BackendError>;
}

/// One blob bucket.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait BlobBucket: Send + Sync {
    async fn put(&self, meta: ObjectMeta, body: Bytes) -> Result<ObjectInfo, BackendError>;

    async fn get(&self, name: &str) -> Result<Option<StoredObject>, BackendError>;

    /// Remove an object. Removing a missing object succeeds.
    async fn delete(&self, name: &str) -> Result<(), BackendError>;

    /// Every object whose name starts with `prefix`, ordered by name.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, BackendError>;
}

/// Which adapter a station talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Memory,
    #[default]
    Filesystem,
}

pub(crate) fn validate_key(key: &str) -> Result<(), BackendError> {
    if key.is_empty() || key.chars().any(|c| c.is_control()) {
        return Err(BackendError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// A TTL too large to add to `updated_at` never expires.
pub(crate) fn is_expired(updated_at: DateTime<Utc>, ttl: Option<Duration>, now: DateTime<Utc>) -> bool {
    ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok())
        .and_then(|ttl| updated_at.checked_add_signed(ttl))
        .is_some_and(|deadline| deadline <= now)
}
