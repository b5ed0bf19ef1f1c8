use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::errors::StoreError;
use super::keys::run_state_key;
use super::Versioned;
use crate::backend::{BackendError, KeyValueBucket, KeyValueConfig, KeyValueService, KvEntry};
use crate::config::StateConfig;
use crate::workflow::RunState;

/// Key-value access for run and workflow documents.
///
/// The bucket handle is resolved once per store: the first caller opens the
/// bucket (creating it with the configured TTL if it does not exist yet) and
/// every later caller reuses the handle. A failed attempt leaves nothing
/// cached, so the next call tries again.
pub struct StateStore {
    service: Arc<dyn KeyValueService>,
    config: StateConfig,
    bucket: OnceCell<Arc<dyn KeyValueBucket>>,
}

impl StateStore {
    pub fn new(service: Arc<dyn KeyValueService>, config: StateConfig) -> Self {
        Self {
            service,
            config: config.normalized(),
            bucket: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    async fn bucket(&self) -> Result<&Arc<dyn KeyValueBucket>, StoreError> {
        self.bucket
            .get_or_try_init(|| async {
                let name = &self.config.bucket;
                let opened = match self.service.key_value(name).await {
                    Err(BackendError::BucketNotFound(_)) => {
                        info!(bucket = %name, ttl_seconds = self.config.ttl_seconds, "Creating key-value bucket");
                        self.service
                            .create_key_value(KeyValueConfig {
                                bucket: name.clone(),
                                description: "Station handoff state storage".to_string(),
                                ttl: Some(self.config.ttl()),
                            })
                            .await
                    }
                    other => other,
                };
                opened.map_err(|source| StoreError::Provision {
                    bucket: name.clone(),
                    source,
                })
            })
            .await
    }

    /// Raw entry including its revision.
    pub async fn get_entry(&self, key: &str) -> Result<Option<KvEntry>, StoreError> {
        let bucket = self.bucket().await?;
        bucket
            .entry(key)
            .await
            .map_err(|e| StoreError::backend("get state", key, e))
    }

    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let entry = self.get_entry(key).await?;
        debug!(key, found = entry.is_some(), "get state");
        Ok(entry.map(|e| e.value))
    }

    pub async fn set(&self, key: &str, value: impl Into<Bytes>) -> Result<(), StoreError> {
        self.put(key, value.into()).await.map(|_| ())
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<u64, StoreError> {
        let bucket = self.bucket().await?;
        let revision = bucket
            .put(key, value)
            .await
            .map_err(|e| StoreError::backend("put state", key, e))?;
        debug!(key, revision, "put state");
        Ok(revision)
    }

    /// Writes only if the entry is still at `expected_revision`. A lost race
    /// comes back as [`StoreError::RevisionConflict`].
    pub async fn set_if_revision(
        &self,
        key: &str,
        value: impl Into<Bytes>,
        expected_revision: u64,
    ) -> Result<u64, StoreError> {
        let bucket = self.bucket().await?;
        let revision = bucket
            .update(key, value.into(), expected_revision)
            .await
            .map_err(|e| StoreError::backend("update state", key, e))?;
        debug!(key, expected_revision, revision, "conditional put state");
        Ok(revision)
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let bucket = self.bucket().await?;
        bucket
            .delete(key)
            .await
            .map_err(|e| StoreError::backend("delete state", key, e))
    }

    /// Decoded JSON document, `None` when the key was never written.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        Ok(self.get_json_versioned(key).await?.map(|v| v.value))
    }

    pub async fn get_json_versioned<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<Versioned<T>>, StoreError> {
        let Some(entry) = self.get_entry(key).await? else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&entry.value).map_err(|source| StoreError::Decode {
            key: key.to_string(),
            source,
        })?;
        Ok(Some(Versioned {
            value,
            revision: entry.revision,
        }))
    }

    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        self.put(key, encode(key, value)?).await.map(|_| ())
    }

    pub async fn set_json_if_revision<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        expected_revision: u64,
    ) -> Result<u64, StoreError> {
        self.set_if_revision(key, encode(key, value)?, expected_revision)
            .await
    }

    pub async fn get_run_state(&self, run_id: &str) -> Result<Option<RunState>, StoreError> {
        self.get_json(&run_state_key(run_id)).await
    }

    pub async fn set_run_state(&self, state: &RunState) -> Result<(), StoreError> {
        self.set_json(&run_state_key(&state.run_id), state).await
    }
}

fn encode<T: Serialize + ?Sized>(key: &str, value: &T) -> Result<Bytes, StoreError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })
}
