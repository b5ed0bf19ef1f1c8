//! Typed access to the shared backing services.
//!
//! [`StateStore`] holds run and workflow documents in the key-value service;
//! [`ArtifactStore`] holds files in the blob service. Both provision their
//! bucket lazily on first use and treat absence as a value, not an error.

pub mod artifacts;
pub mod errors;
pub mod headers;
pub mod keys;
pub mod state;
pub mod types;

use std::time::Duration;

pub use artifacts::{ArtifactStore, StoredFile};
pub use errors::StoreError;
pub use state::StateStore;
pub use types::{FileMetadata, PutFileOptions};

pub const DEFAULT_KV_BUCKET: &str = "harness-state";
pub const DEFAULT_OBJECT_BUCKET: &str = "harness-files";
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;
pub const DEFAULT_MAX_BUCKET_SIZE: u64 = 1024 * 1024 * 1024;

/// A decoded document together with the revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub revision: u64,
}
