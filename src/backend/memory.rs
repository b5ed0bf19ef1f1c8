//! In-process backing services.
//!
//! Clones of a [`MemoryBackend`] share the same buckets, so several
//! `HandoffManager`s built from clones behave like stations pointed at one
//! backing service.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    is_expired, validate_key, BackendError, BlobBucket, BlobService, KeyValueBucket,
    KeyValueConfig, KeyValueService, KvEntry, ObjectInfo, ObjectMeta, ObjectStoreConfig,
    StoredObject,
};

#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Buckets>>,
}

#[derive(Default)]
struct Buckets {
    key_value: HashMap<String, Arc<MemoryKvBucket>>,
    objects: HashMap<String, Arc<MemoryBlobBucket>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn buckets(&self) -> MutexGuard<'_, Buckets> {
        // A poisoned lock only means another thread panicked mid-insert; the maps stay usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl KeyValueService for MemoryBackend {
    async fn key_value(&self, bucket: &str) -> Result<Arc<dyn KeyValueBucket>, BackendError> {
        self.buckets()
            .key_value
            .get(bucket)
            .cloned()
            .map(|b| b as Arc<dyn KeyValueBucket>)
            .ok_or_else(|| BackendError::BucketNotFound(bucket.to_string()))
    }

    async fn create_key_value(
        &self,
        config: KeyValueConfig,
    ) -> Result<Arc<dyn KeyValueBucket>, BackendError> {
        let mut buckets = self.buckets();
        let bucket = buckets
            .key_value
            .entry(config.bucket.clone())
            .or_insert_with(|| Arc::new(MemoryKvBucket::new(config)))
            .clone();
        Ok(bucket as Arc<dyn KeyValueBucket>)
    }
}

#[async_trait]
impl BlobService for MemoryBackend {
    async fn object_store(&self, bucket: &str) -> Result<Arc<dyn BlobBucket>, BackendError> {
        self.buckets()
            .objects
            .get(bucket)
            .cloned()
            .map(|b| b as Arc<dyn BlobBucket>)
            .ok_or_else(|| BackendError::BucketNotFound(bucket.to_string()))
    }

    async fn create_object_store(
        &self,
        config: ObjectStoreConfig,
    ) -> Result<Arc<dyn BlobBucket>, BackendError> {
        let mut buckets = self.buckets();
        let bucket = buckets
            .objects
            .entry(config.bucket.clone())
            .or_insert_with(|| Arc::new(MemoryBlobBucket::new(config)))
            .clone();
        Ok(bucket as Arc<dyn BlobBucket>)
    }
}

struct MemoryKvBucket {
    config: KeyValueConfig,
    state: Mutex<KvState>,
}

#[derive(Default)]
struct KvState {
    sequence: u64,
    entries: HashMap<String, KvEntry>,
}

impl MemoryKvBucket {
    fn new(config: KeyValueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(KvState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, KvState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KvState {
    fn live_revision(&self, key: &str, ttl: Option<std::time::Duration>) -> Option<u64> {
        self.entries
            .get(key)
            .filter(|e| !is_expired(e.updated_at, ttl, Utc::now()))
            .map(|e| e.revision)
    }

    fn write(&mut self, key: &str, value: Bytes) -> u64 {
        self.sequence += 1;
        self.entries.insert(
            key.to_string(),
            KvEntry {
                value,
                revision: self.sequence,
                updated_at: Utc::now(),
            },
        );
        self.sequence
    }
}

#[async_trait]
impl KeyValueBucket for MemoryKvBucket {
    async fn entry(&self, key: &str) -> Result<Option<KvEntry>, BackendError> {
        validate_key(key)?;
        let state = self.state();
        Ok(state
            .entries
            .get(key)
            .filter(|e| !is_expired(e.updated_at, self.config.ttl, Utc::now()))
            .cloned())
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<u64, BackendError> {
        validate_key(key)?;
        Ok(self.state().write(key, value))
    }

    async fn update(
        &self,
        key: &str,
        value: Bytes,
        expected_revision: u64,
    ) -> Result<u64, BackendError> {
        validate_key(key)?;
        let mut state = self.state();
        let found = state.live_revision(key, self.config.ttl);
        if found != Some(expected_revision) {
            return Err(BackendError::RevisionMismatch {
                key: key.to_string(),
                expected: expected_revision,
                found,
            });
        }
        Ok(state.write(key, value))
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        validate_key(key)?;
        self.state().entries.remove(key);
        Ok(())
    }
}

struct MemoryBlobBucket {
    config: ObjectStoreConfig,
    objects: Mutex<BTreeMap<String, StoredObject>>,
}

impl MemoryBlobBucket {
    fn new(config: ObjectStoreConfig) -> Self {
        Self {
            config,
            objects: Mutex::new(BTreeMap::new()),
        }
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl BlobBucket for MemoryBlobBucket {
    async fn put(&self, meta: ObjectMeta, body: Bytes) -> Result<ObjectInfo, BackendError> {
        validate_key(&meta.name)?;
        let mut objects = self.objects();

        if let Some(limit) = self.config.max_bytes {
            let used: u64 = objects
                .values()
                .filter(|o| o.info.name != meta.name)
                .map(|o| o.info.size)
                .sum();
            let requested = body.len() as u64;
            if used + requested > limit {
                return Err(BackendError::CapacityExceeded {
                    bucket: self.config.bucket.clone(),
                    requested,
                    limit,
                });
            }
        }

        let info = ObjectInfo {
            name: meta.name.clone(),
            size: body.len() as u64,
            modified: Utc::now(),
            description: meta.description,
            headers: meta.headers,
        };
        objects.insert(
            meta.name,
            StoredObject {
                info: info.clone(),
                body,
            },
        );
        Ok(info)
    }

    async fn get(&self, name: &str) -> Result<Option<StoredObject>, BackendError> {
        validate_key(name)?;
        Ok(self.objects().get(name).cloned())
    }

    async fn delete(&self, name: &str) -> Result<(), BackendError> {
        validate_key(name)?;
        self.objects().remove(name);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>, BackendError> {
        Ok(self
            .objects()
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(_, o)| o.info.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn kv_config(ttl: Option<Duration>) -> KeyValueConfig {
        KeyValueConfig {
            bucket: "test-state".to_string(),
            description: "test".to_string(),
            ttl,
        }
    }

    #[tokio::test]
    async fn test_open_missing_bucket_reports_not_found() {
        let backend = MemoryBackend::new();
        let result = backend.key_value("nope").await;
        assert!(matches!(result, Err(BackendError::BucketNotFound(name)) if name == "nope"));
    }

    #[tokio::test]
    async fn test_create_is_idempotent_and_shared_between_clones() {
        let backend = MemoryBackend::new();
        let other = backend.clone();

        let a = backend.create_key_value(kv_config(None)).await.unwrap();
        a.put("k", Bytes::from_static(b"v")).await.unwrap();

        let b = other.create_key_value(kv_config(None)).await.unwrap();
        let entry = b.entry("k").await.unwrap().unwrap();
        assert_eq!(entry.value, Bytes::from_static(b"v"));
    }

    #[tokio::test]
    async fn test_update_checks_revision() {
        let backend = MemoryBackend::new();
        let bucket = backend.create_key_value(kv_config(None)).await.unwrap();

        let first = bucket.put("doc", Bytes::from_static(b"1")).await.unwrap();
        let second = bucket.update("doc", Bytes::from_static(b"2"), first).await.unwrap();
        assert!(second > first);

        let stale = bucket.update("doc", Bytes::from_static(b"3"), first).await;
        assert!(matches!(
            stale,
            Err(BackendError::RevisionMismatch { found: Some(r), .. }) if r == second
        ));

        let missing = bucket.update("other", Bytes::from_static(b"x"), 1).await;
        assert!(matches!(missing, Err(BackendError::RevisionMismatch { found: None, .. })));
    }

    #[tokio::test]
    async fn test_entries_expire_after_bucket_ttl() {
        let backend = MemoryBackend::new();
        let bucket = backend
            .create_key_value(kv_config(Some(Duration::from_millis(20))))
            .await
            .unwrap();
        bucket.put("short", Bytes::from_static(b"lived")).await.unwrap();
        assert!(bucket.entry("short").await.unwrap().is_some());

        std::thread::sleep(Duration::from_millis(40));
        assert!(bucket.entry("short").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blob_capacity_is_enforced_without_partial_write() {
        let backend = MemoryBackend::new();
        let bucket = backend
            .create_object_store(ObjectStoreConfig {
                bucket: "files".to_string(),
                description: "test".to_string(),
                max_bytes: Some(8),
            })
            .await
            .unwrap();

        let meta = |name: &str| ObjectMeta {
            name: name.to_string(),
            ..ObjectMeta::default()
        };
        bucket.put(meta("a"), Bytes::from_static(b"12345")).await.unwrap();
        let err = bucket.put(meta("b"), Bytes::from_static(b"12345")).await;
        assert!(matches!(err, Err(BackendError::CapacityExceeded { .. })));
        assert!(bucket.get("b").await.unwrap().is_none());

        // Replacing an object only counts its new size.
        bucket.put(meta("a"), Bytes::from_static(b"12345678")).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix() {
        let backend = MemoryBackend::new();
        let bucket = backend
            .create_object_store(ObjectStoreConfig {
                bucket: "files".to_string(),
                description: "test".to_string(),
                max_bytes: None,
            })
            .await
            .unwrap();
        for name in ["run/a/output/x", "run/a/output/y", "run/b/output/z", "shared/c"] {
            bucket
                .put(
                    ObjectMeta {
                        name: name.to_string(),
                        ..ObjectMeta::default()
                    },
                    Bytes::from_static(b"data"),
                )
                .await
                .unwrap();
        }

        let names: Vec<String> = bucket
            .list("run/a/output/")
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["run/a/output/x", "run/a/output/y"]);
        assert_eq!(bucket.list("").await.unwrap().len(), 4);
    }
}
