//! Shared helpers for handoff integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use station_handoff::backend::{
    BackendError, BlobService, KeyValueBucket, KeyValueConfig, KeyValueService, KvEntry,
};
use station_handoff::{
    CompleteStepInput, FilesystemBackend, HandoffConfig, HandoffManager, MemoryBackend, RunStatus,
    StartStepInput, StartWorkflowInput,
};
use tempfile::TempDir;

/// A factory for stations that all see the same backing services.
pub enum SharedServices {
    Memory(MemoryBackend),
    Filesystem(TempDir),
}

impl SharedServices {
    pub fn memory() -> Self {
        SharedServices::Memory(MemoryBackend::new())
    }

    pub fn filesystem() -> Self {
        SharedServices::Filesystem(TempDir::new().expect("create temp dir"))
    }

    /// A fresh manager with no state of its own beyond the shared services.
    pub fn station(&self, station_id: &str) -> HandoffManager {
        self.station_with(station_id, &HandoffConfig::default())
    }

    pub fn station_with(&self, station_id: &str, config: &HandoffConfig) -> HandoffManager {
        let (key_value, blobs) = self.services();
        HandoffManager::from_services(key_value, blobs, config).with_station_id(station_id)
    }

    /// A station whose first read of `key` stops after fetching the entry
    /// and waits until the returned [`PausedRead`] is resumed.
    pub fn station_pausing_read(
        &self,
        station_id: &str,
        key: &str,
        config: &HandoffConfig,
    ) -> (HandoffManager, PausedRead) {
        let (key_value, blobs) = self.services();
        let (read_done_tx, read_done) = oneshot::channel();
        let (resume, resume_rx) = oneshot::channel();
        let gate = Arc::new(ReadGate {
            key: key.to_string(),
            channels: Mutex::new(Some((read_done_tx, resume_rx))),
        });
        let key_value = Arc::new(PausingKeyValue {
            inner: key_value,
            gate,
        });
        let manager =
            HandoffManager::from_services(key_value, blobs, config).with_station_id(station_id);
        (manager, PausedRead { read_done, resume })
    }

    fn services(&self) -> (Arc<dyn KeyValueService>, Arc<dyn BlobService>) {
        match self {
            SharedServices::Memory(backend) => (Arc::new(backend.clone()), Arc::new(backend.clone())),
            SharedServices::Filesystem(dir) => {
                // Each station opens its own adapter over the shared directory.
                let backend = FilesystemBackend::new(dir.path());
                (Arc::new(backend.clone()), Arc::new(backend))
            }
        }
    }
}

/// Handles for a read held open by [`SharedServices::station_pausing_read`].
pub struct PausedRead {
    /// Fires once the paused station has fetched the entry.
    pub read_done: oneshot::Receiver<()>,
    /// Lets the paused station continue with what it fetched.
    pub resume: oneshot::Sender<()>,
}

struct ReadGate {
    key: String,
    channels: Mutex<Option<(oneshot::Sender<()>, oneshot::Receiver<()>)>>,
}

impl ReadGate {
    async fn pass(&self, key: &str) {
        if key != self.key {
            return;
        }
        let taken = self.channels.lock().unwrap().take();
        if let Some((read_done, resume)) = taken {
            let _ = read_done.send(());
            let _ = resume.await;
        }
    }
}

struct PausingKeyValue {
    inner: Arc<dyn KeyValueService>,
    gate: Arc<ReadGate>,
}

#[async_trait]
impl KeyValueService for PausingKeyValue {
    async fn key_value(&self, bucket: &str) -> Result<Arc<dyn KeyValueBucket>, BackendError> {
        let inner = self.inner.key_value(bucket).await?;
        Ok(Arc::new(PausingBucket {
            inner,
            gate: self.gate.clone(),
        }))
    }

    async fn create_key_value(
        &self,
        config: KeyValueConfig,
    ) -> Result<Arc<dyn KeyValueBucket>, BackendError> {
        let inner = self.inner.create_key_value(config).await?;
        Ok(Arc::new(PausingBucket {
            inner,
            gate: self.gate.clone(),
        }))
    }
}

struct PausingBucket {
    inner: Arc<dyn KeyValueBucket>,
    gate: Arc<ReadGate>,
}

#[async_trait]
impl KeyValueBucket for PausingBucket {
    async fn entry(&self, key: &str) -> Result<Option<KvEntry>, BackendError> {
        let entry = self.inner.entry(key).await?;
        self.gate.pass(key).await;
        Ok(entry)
    }

    async fn put(&self, key: &str, value: Bytes) -> Result<u64, BackendError> {
        self.inner.put(key, value).await
    }

    async fn update(
        &self,
        key: &str,
        value: Bytes,
        expected_revision: u64,
    ) -> Result<u64, BackendError> {
        self.inner.update(key, value, expected_revision).await
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.inner.delete(key).await
    }
}

pub async fn start_workflow(station: &HandoffManager, workflow_run_id: &str) {
    station
        .start_workflow(StartWorkflowInput {
            workflow_id: "bugfix".to_string(),
            workflow_run_id: workflow_run_id.to_string(),
            git_branch: Some("main".to_string()),
            ..StartWorkflowInput::default()
        })
        .await
        .expect("start workflow");
}

pub async fn start_step(station: &HandoffManager, workflow_run_id: &str, step: &str, run_id: &str) {
    station
        .start_step(StartStepInput {
            workflow_run_id: workflow_run_id.to_string(),
            step_name: step.to_string(),
            agent_name: format!("{step}-agent"),
            run_id: run_id.to_string(),
            task: format!("{step} the bug"),
        })
        .await
        .expect("start step");
}

pub fn completed(run_id: &str, workflow_run_id: &str, summary: &str) -> CompleteStepInput {
    let mut input = CompleteStepInput::new(run_id, workflow_run_id, RunStatus::Completed);
    input.summary = Some(summary.to_string());
    input
}
