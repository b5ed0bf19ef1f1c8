//! Moving files between a station's local disk and the artifact store.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use super::{HandoffError, HandoffManager, STATION_ID_METADATA};
use crate::store::keys::{file_name, run_file_key, shared_file_key, workflow_shared_file_key};
use crate::store::{FileMetadata, PutFileOptions};

/// Metadata key recording where an uploaded file came from.
pub const LOCAL_PATH_METADATA: &str = "local_path";

/// One end of a copy: a path on this station or an artifact key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    Local(PathBuf),
    Remote(String),
}

impl FileSource {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        FileSource::Local(path.into())
    }

    pub fn remote(key: impl Into<String>) -> Self {
        FileSource::Remote(key.into())
    }
}

impl fmt::Display for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSource::Local(path) => write!(f, "local:{}", path.display()),
            FileSource::Remote(key) => write!(f, "remote:{key}"),
        }
    }
}

/// Upload settings; ignored for downloads.
#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    /// Defaults to the configured relay TTL.
    pub ttl: Option<Duration>,
    /// Defaults to a guess from the file extension.
    pub content_type: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// A local file to publish under `shared/<key>` before a workflow starts.
#[derive(Debug, Clone)]
pub struct PreloadFile {
    pub key: String,
    pub local_path: PathBuf,
    pub ttl: Option<Duration>,
}

impl HandoffManager {
    /// Copies a local file to an artifact key or an artifact to a local path.
    ///
    /// Returns the metadata of the artifact involved. Local-to-local and
    /// remote-to-remote copies are rejected.
    pub async fn copy(
        &self,
        source: &FileSource,
        destination: &FileSource,
        options: CopyOptions,
    ) -> Result<FileMetadata, HandoffError> {
        match (source, destination) {
            (FileSource::Local(path), FileSource::Remote(key)) => {
                self.upload(path, key, options).await
            }
            (FileSource::Remote(key), FileSource::Local(path)) => self.download(key, path).await,
            _ => Err(HandoffError::UnsupportedCopy {
                from: source.to_string(),
                to: destination.to_string(),
            }),
        }
    }

    async fn upload(
        &self,
        path: &Path,
        key: &str,
        options: CopyOptions,
    ) -> Result<FileMetadata, HandoffError> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| HandoffError::io(path, e))?;

        let mut put = PutFileOptions {
            content_type: options
                .content_type
                .or_else(|| mime_guess::from_path(path).first_raw().map(str::to_string)),
            description: None,
            ttl: Some(options.ttl.unwrap_or(self.default_ttl)),
            metadata: options.metadata,
        };
        put.metadata
            .entry(LOCAL_PATH_METADATA.to_string())
            .or_insert_with(|| path.display().to_string());
        if let Some(station_id) = &self.station_id {
            put.metadata
                .entry(STATION_ID_METADATA.to_string())
                .or_insert_with(|| station_id.clone());
        }

        let metadata = self.artifacts.put(key, file, put).await?;
        debug!(key, path = %path.display(), size = metadata.size, "Uploaded file");
        Ok(metadata)
    }

    async fn download(&self, key: &str, path: &Path) -> Result<FileMetadata, HandoffError> {
        let stored = self
            .artifacts
            .get(key)
            .await?
            .ok_or_else(|| HandoffError::FileNotFound(key.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HandoffError::io(parent, e))?;
        }
        tokio::fs::write(path, &stored.body)
            .await
            .map_err(|e| HandoffError::io(path, e))?;

        debug!(key, path = %path.display(), size = stored.metadata.size, "Downloaded file");
        Ok(stored.metadata)
    }

    /// Stores a local file as `run/<run_id>/output/<file name>`.
    pub async fn upload_output_file(
        &self,
        run_id: &str,
        local_path: impl AsRef<Path>,
    ) -> Result<FileMetadata, HandoffError> {
        let local_path = local_path.as_ref();
        let name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| HandoffError::InvalidLocalPath(local_path.to_path_buf()))?;
        self.copy(
            &FileSource::local(local_path),
            &FileSource::remote(run_file_key(run_id, name)),
            CopyOptions::default(),
        )
        .await
    }

    pub async fn download_output_file(
        &self,
        run_id: &str,
        filename: &str,
        local_path: impl AsRef<Path>,
    ) -> Result<FileMetadata, HandoffError> {
        self.copy(
            &FileSource::remote(run_file_key(run_id, filename)),
            &FileSource::local(local_path.as_ref()),
            CopyOptions::default(),
        )
        .await
    }

    /// Downloads every output of the previous step into `local_dir` and
    /// returns how many landed. Individual failures are logged and skipped.
    pub async fn download_previous_outputs(
        &self,
        workflow_run_id: &str,
        local_dir: impl AsRef<Path>,
    ) -> Result<usize, HandoffError> {
        let Some(previous) = self.get_previous_step_context(workflow_run_id).await? else {
            return Ok(0);
        };

        let local_dir = local_dir.as_ref();
        let mut downloaded = 0;
        for file in &previous.output_files {
            let name = file_name(&file.key);
            let target = local_dir.join(name);
            match self.download_output_file(&previous.run_id, name, &target).await {
                Ok(_) => downloaded += 1,
                Err(e) => warn!(key = %file.key, error = %e, "Skipping previous output"),
            }
        }
        Ok(downloaded)
    }

    /// Publishes local files under the shared namespace. Stops at the first
    /// failure; files before it stay uploaded.
    pub async fn preload_files(&self, files: &[PreloadFile]) -> Result<Vec<FileMetadata>, HandoffError> {
        let mut uploaded = Vec::with_capacity(files.len());
        for file in files {
            let options = CopyOptions {
                ttl: file.ttl.filter(|ttl| !ttl.is_zero()),
                ..CopyOptions::default()
            };
            let metadata = self
                .copy(
                    &FileSource::local(&file.local_path),
                    &FileSource::remote(shared_file_key(&file.key)),
                    options,
                )
                .await?;
            uploaded.push(metadata);
        }
        Ok(uploaded)
    }

    pub async fn download_preloaded_file(
        &self,
        key: &str,
        local_path: impl AsRef<Path>,
    ) -> Result<FileMetadata, HandoffError> {
        self.copy(
            &FileSource::remote(shared_file_key(key)),
            &FileSource::local(local_path.as_ref()),
            CopyOptions::default(),
        )
        .await
    }

    /// Publishes a local file under `workflow/<workflow_run_id>/shared/<key>`,
    /// visible to every later step of that workflow run.
    pub async fn upload_workflow_shared_file(
        &self,
        workflow_run_id: &str,
        key: &str,
        local_path: impl AsRef<Path>,
    ) -> Result<FileMetadata, HandoffError> {
        self.copy(
            &FileSource::local(local_path.as_ref()),
            &FileSource::remote(workflow_shared_file_key(workflow_run_id, key)),
            CopyOptions::default(),
        )
        .await
    }

    pub async fn download_workflow_shared_file(
        &self,
        workflow_run_id: &str,
        key: &str,
        local_path: impl AsRef<Path>,
    ) -> Result<FileMetadata, HandoffError> {
        self.copy(
            &FileSource::remote(workflow_shared_file_key(workflow_run_id, key)),
            &FileSource::local(local_path.as_ref()),
            CopyOptions::default(),
        )
        .await
    }
}
