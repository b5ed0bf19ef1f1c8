use bytes::Bytes;
use chrono::Utc;
use std::io::Cursor;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::errors::StoreError;
use super::headers::{self, decode_metadata, encode_headers, expiry_for};
use super::keys::{
    run_file_key, run_output_prefix, shared_file_key, workflow_shared_file_key,
    workflow_shared_prefix,
};
use super::types::{FileMetadata, PutFileOptions};
use crate::backend::{BackendError, BlobBucket, BlobService, ObjectMeta, ObjectStoreConfig};
use crate::config::FilesConfig;

/// A fetched artifact: its decoded metadata and the full body.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    pub metadata: FileMetadata,
    pub body: Bytes,
}

impl StoredFile {
    /// The body as an async reader, for callers that stream it onward.
    pub fn reader(&self) -> Cursor<Bytes> {
        Cursor::new(self.body.clone())
    }
}

/// Blob access for artifacts produced and consumed by stations.
pub struct ArtifactStore {
    service: Arc<dyn BlobService>,
    config: FilesConfig,
    bucket: OnceCell<Arc<dyn BlobBucket>>,
}

impl ArtifactStore {
    pub fn new(service: Arc<dyn BlobService>, config: FilesConfig) -> Self {
        Self {
            service,
            config: config.normalized(),
            bucket: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &FilesConfig {
        &self.config
    }

    async fn bucket(&self) -> Result<&Arc<dyn BlobBucket>, StoreError> {
        self.bucket
            .get_or_try_init(|| async {
                let name = &self.config.bucket;
                let opened = match self.service.object_store(name).await {
                    Err(BackendError::BucketNotFound(_)) => {
                        info!(bucket = %name, max_bytes = self.config.max_bucket_size, "Creating object store bucket");
                        self.service
                            .create_object_store(ObjectStoreConfig {
                                bucket: name.clone(),
                                description: "Station handoff file storage".to_string(),
                                max_bytes: Some(self.config.max_bucket_size),
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

    /// Stores the whole of `reader` under `key`.
    ///
    /// The input is read into memory first. Anything larger than
    /// `max_file_size` is rejected before the bucket is touched.
    pub async fn put<R>(
        &self,
        key: &str,
        mut reader: R,
        options: PutFileOptions,
    ) -> Result<FileMetadata, StoreError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let max = self.config.max_file_size;
        let mut body = Vec::new();
        (&mut reader)
            .take(max.saturating_add(1))
            .read_to_end(&mut body)
            .await
            .map_err(StoreError::ReadInput)?;
        let size = body.len() as u64;
        if size > max {
            return Err(StoreError::FileTooLarge { size, max });
        }

        let checksum = headers::checksum(&body);
        let expires_at = expiry_for(options.ttl, Utc::now());
        let meta = ObjectMeta {
            name: key.to_string(),
            description: options.description.clone(),
            headers: encode_headers(&options, Some(&checksum), expires_at),
        };

        let bucket = self.bucket().await?;
        let info = bucket
            .put(meta, Bytes::from(body))
            .await
            .map_err(|e| StoreError::backend("put file", key, e))?;
        debug!(key, size, "put file");

        let mut metadata = decode_metadata(&info);
        // Adapters may not echo headers back; the values we sent are authoritative.
        metadata.content_type = options.content_type.filter(|c| !c.is_empty());
        metadata.checksum = Some(checksum);
        metadata.expires_at = expires_at;
        metadata.metadata = options.metadata;
        Ok(metadata)
    }

    /// `None` when nothing is stored under `key`.
    pub async fn get(&self, key: &str) -> Result<Option<StoredFile>, StoreError> {
        let bucket = self.bucket().await?;
        let object = bucket
            .get(key)
            .await
            .map_err(|e| StoreError::backend("get file", key, e))?;
        debug!(key, found = object.is_some(), "get file");
        Ok(object.map(|o| StoredFile {
            metadata: decode_metadata(&o.info),
            body: o.body,
        }))
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let bucket = self.bucket().await?;
        bucket
            .delete(key)
            .await
            .map_err(|e| StoreError::backend("delete file", key, e))
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<FileMetadata>, StoreError> {
        let bucket = self.bucket().await?;
        let objects = bucket
            .list(prefix)
            .await
            .map_err(|e| StoreError::backend("list files", prefix, e))?;
        Ok(objects.iter().map(decode_metadata).collect())
    }

    pub async fn put_run_file<R>(
        &self,
        run_id: &str,
        filename: &str,
        reader: R,
        options: PutFileOptions,
    ) -> Result<FileMetadata, StoreError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.put(&run_file_key(run_id, filename), reader, options)
            .await
    }

    pub async fn get_run_file(
        &self,
        run_id: &str,
        filename: &str,
    ) -> Result<Option<StoredFile>, StoreError> {
        self.get(&run_file_key(run_id, filename)).await
    }

    pub async fn list_run_files(&self, run_id: &str) -> Result<Vec<FileMetadata>, StoreError> {
        self.list(&run_output_prefix(run_id)).await
    }

    pub async fn put_shared_file<R>(
        &self,
        key: &str,
        reader: R,
        options: PutFileOptions,
    ) -> Result<FileMetadata, StoreError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.put(&shared_file_key(key), reader, options).await
    }

    pub async fn get_shared_file(&self, key: &str) -> Result<Option<StoredFile>, StoreError> {
        self.get(&shared_file_key(key)).await
    }

    /// Stores a file visible to every step of one workflow run.
    pub async fn put_workflow_shared_file<R>(
        &self,
        workflow_run_id: &str,
        key: &str,
        reader: R,
        options: PutFileOptions,
    ) -> Result<FileMetadata, StoreError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.put(&workflow_shared_file_key(workflow_run_id, key), reader, options)
            .await
    }

    pub async fn get_workflow_shared_file(
        &self,
        workflow_run_id: &str,
        key: &str,
    ) -> Result<Option<StoredFile>, StoreError> {
        self.get(&workflow_shared_file_key(workflow_run_id, key)).await
    }

    pub async fn list_workflow_shared_files(
        &self,
        workflow_run_id: &str,
    ) -> Result<Vec<FileMetadata>, StoreError> {
        self.list(&workflow_shared_prefix(workflow_run_id)).await
    }

    /// Deletes every object whose expiry has passed and returns how many went.
    /// Objects without an expiry are kept; a failed delete is logged and skipped.
    pub async fn cleanup_expired_files(&self) -> Result<usize, StoreError> {
        let bucket = self.bucket().await?;
        let objects = bucket
            .list("")
            .await
            .map_err(|e| StoreError::backend("list files", "", e))?;

        let now = Utc::now();
        let mut deleted = 0;
        for object in objects {
            let Some(expires) = headers::expires_at(&object.headers) else {
                continue;
            };
            if now <= expires {
                continue;
            }
            match bucket.delete(&object.name).await {
                Ok(()) => deleted += 1,
                Err(e) => warn!(key = %object.name, error = %e, "Failed to delete expired file"),
            }
        }
        info!(deleted, "Expired file cleanup finished");
        Ok(deleted)
    }
}
