//! The handoff protocol.
//!
//! A [`HandoffManager`] is what a station holds. It starts workflows, opens
//! and closes steps, and answers "what did the step before me do?" by reading
//! the shared documents and artifacts another station left behind. There is
//! no direct channel between stations; a station learns that a step finished
//! by polling [`HandoffManager::get_previous_step_context`].

pub mod errors;
pub mod relay;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub use errors::HandoffError;
pub use relay::{CopyOptions, FileSource, PreloadFile};

use crate::backend::{BlobService, KeyValueService};
use crate::config::HandoffConfig;
use crate::store::{ArtifactStore, FileMetadata, StateStore};
use crate::workflow::{ConcurrencyMode, RunState, RunStatus, WorkflowContext, WorkflowStepSummary};

/// Metadata key under which a step records the station that ran it.
pub const STATION_ID_METADATA: &str = "station_id";

#[derive(Debug, Clone, Default)]
pub struct StartWorkflowInput {
    pub workflow_id: String,
    pub workflow_run_id: String,
    pub git_branch: Option<String>,
    pub shared_data: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct StartStepInput {
    pub workflow_run_id: String,
    pub step_name: String,
    pub agent_name: String,
    pub run_id: String,
    pub task: String,
}

#[derive(Debug, Clone)]
pub struct CompleteStepInput {
    pub run_id: String,
    pub workflow_run_id: String,
    pub status: RunStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub summary: Option<String>,
    pub files_modified: Vec<String>,
    pub commits: Vec<String>,
    pub git_commit: Option<String>,
}

impl CompleteStepInput {
    pub fn new(run_id: impl Into<String>, workflow_run_id: impl Into<String>, status: RunStatus) -> Self {
        Self {
            run_id: run_id.into(),
            workflow_run_id: workflow_run_id.into(),
            status,
            result: None,
            error: None,
            summary: None,
            files_modified: Vec::new(),
            commits: Vec::new(),
            git_commit: None,
        }
    }
}

/// Read-only view of the last recorded step of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviousStepContext {
    pub step_name: String,
    pub agent_name: String,
    pub run_id: String,
    pub status: RunStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
    pub files_modified: Vec<String>,
    pub commits: Vec<String>,
    /// Empty when listing failed, so "unknown" rather than "none".
    pub output_files: Vec<FileMetadata>,
}

pub struct HandoffManager {
    state: StateStore,
    artifacts: ArtifactStore,
    station_id: Option<String>,
    concurrency: ConcurrencyMode,
    default_ttl: std::time::Duration,
}

impl HandoffManager {
    pub fn new(state: StateStore, artifacts: ArtifactStore) -> Self {
        let default_ttl = artifacts.config().default_ttl();
        Self {
            state,
            artifacts,
            station_id: None,
            concurrency: ConcurrencyMode::default(),
            default_ttl,
        }
    }

    /// Builds a manager over already opened backing services.
    pub fn from_services(
        key_value: Arc<dyn KeyValueService>,
        blobs: Arc<dyn BlobService>,
        config: &HandoffConfig,
    ) -> Self {
        let manager = Self::new(
            StateStore::new(key_value, config.state.clone()),
            ArtifactStore::new(blobs, config.files.clone()),
        )
        .with_concurrency(config.handoff.concurrency);
        match config.station.resolve_id() {
            Some(id) => manager.with_station_id(id),
            None => manager,
        }
    }

    /// Opens the backend named in `config`.
    pub fn connect(config: &HandoffConfig) -> Self {
        let (key_value, blobs) = config.backend.connect();
        Self::from_services(key_value, blobs, config)
    }

    pub fn with_station_id(mut self, station_id: impl Into<String>) -> Self {
        self.station_id = Some(station_id.into());
        self
    }

    pub fn with_concurrency(mut self, mode: ConcurrencyMode) -> Self {
        self.concurrency = mode;
        self
    }

    pub fn station_id(&self) -> Option<&str> {
        self.station_id.as_deref()
    }

    pub fn concurrency(&self) -> ConcurrencyMode {
        self.concurrency
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Creates the workflow document with no steps. An existing document
    /// under the same `workflow_run_id` is overwritten.
    pub async fn start_workflow(&self, input: StartWorkflowInput) -> Result<WorkflowContext, HandoffError> {
        let context = WorkflowContext {
            workflow_id: input.workflow_id,
            workflow_run_id: input.workflow_run_id,
            started_at: Utc::now(),
            git_branch: input.git_branch,
            steps: Vec::new(),
            shared_data: input.shared_data,
        };
        self.state.set_workflow_context(&context).await?;

        info!(
            workflow_id = %context.workflow_id,
            workflow_run_id = %context.workflow_run_id,
            station_id = ?self.station_id,
            "Workflow started"
        );
        Ok(context)
    }

    /// Records a running step. Returns the new run together with the
    /// workflow document as it stood, shared data included.
    pub async fn start_step(
        &self,
        input: StartStepInput,
    ) -> Result<(RunState, WorkflowContext), HandoffError> {
        let context = self
            .state
            .get_workflow_context(&input.workflow_run_id)
            .await?
            .ok_or_else(|| HandoffError::WorkflowNotFound(input.workflow_run_id.clone()))?;

        let mut metadata = BTreeMap::new();
        if let Some(station_id) = &self.station_id {
            metadata.insert(STATION_ID_METADATA.to_string(), station_id.clone());
        }

        let run = RunState {
            run_id: input.run_id,
            agent_id: input.agent_name.clone(),
            agent_name: input.agent_name,
            workflow_id: Some(context.workflow_id.clone()),
            step_name: Some(input.step_name),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            task: input.task,
            result: None,
            error: None,
            git_branch: context.git_branch.clone(),
            git_commit: None,
            metadata,
        };
        self.state.set_run_state(&run).await?;

        info!(
            workflow_run_id = %context.workflow_run_id,
            run_id = %run.run_id,
            step = run.step_name.as_deref().unwrap_or_default(),
            "Step started"
        );
        Ok((run, context))
    }

    /// Closes the run and appends its summary to the workflow.
    ///
    /// The run document is written first. If the append then fails, the run
    /// stays completed and the error is returned.
    pub async fn complete_step(&self, input: CompleteStepInput) -> Result<WorkflowContext, HandoffError> {
        let mut run = self
            .state
            .get_run_state(&input.run_id)
            .await?
            .ok_or_else(|| HandoffError::RunNotFound(input.run_id.clone()))?;

        let now = Utc::now();
        run.status = input.status;
        run.result = input.result;
        run.error = input.error;
        run.completed_at = Some(now);
        if input.git_commit.is_some() {
            run.git_commit = input.git_commit;
        }
        self.state.set_run_state(&run).await?;

        let step = WorkflowStepSummary {
            step_name: run.step_name.clone().unwrap_or_default(),
            agent_name: run.agent_name.clone(),
            run_id: run.run_id.clone(),
            status: input.status,
            started_at: run.started_at,
            completed_at: Some(now),
            summary: input.summary,
            files_modified: input.files_modified,
            commits: input.commits,
        };
        let context = self
            .state
            .add_workflow_step_with_mode(&input.workflow_run_id, step, self.concurrency)
            .await?;

        info!(
            workflow_run_id = %input.workflow_run_id,
            run_id = %run.run_id,
            status = %input.status,
            steps = context.steps.len(),
            "Step completed"
        );
        Ok(context)
    }

    /// The last step by position in the step list, or `None` when the
    /// workflow is missing or has no steps yet.
    pub async fn get_previous_step_context(
        &self,
        workflow_run_id: &str,
    ) -> Result<Option<PreviousStepContext>, HandoffError> {
        let Some(context) = self.state.get_workflow_context(workflow_run_id).await? else {
            return Ok(None);
        };
        let Some(last) = context.steps.last() else {
            return Ok(None);
        };

        let output_files = match self.artifacts.list_run_files(&last.run_id).await {
            Ok(files) => files,
            Err(e) => {
                warn!(run_id = %last.run_id, error = %e, "Could not list output files of previous step");
                Vec::new()
            }
        };

        Ok(Some(PreviousStepContext {
            step_name: last.step_name.clone(),
            agent_name: last.agent_name.clone(),
            run_id: last.run_id.clone(),
            status: last.status,
            completed_at: last.completed_at,
            summary: last.summary.clone(),
            files_modified: last.files_modified.clone(),
            commits: last.commits.clone(),
            output_files,
        }))
    }

    pub async fn update_shared_data<I>(
        &self,
        workflow_run_id: &str,
        updates: I,
    ) -> Result<WorkflowContext, HandoffError>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        Ok(self
            .state
            .merge_shared_data_with_mode(workflow_run_id, updates, self.concurrency)
            .await?)
    }

    /// `None` for a missing workflow as well as a missing key.
    pub async fn get_shared_data(
        &self,
        workflow_run_id: &str,
        key: &str,
    ) -> Result<Option<Value>, HandoffError> {
        Ok(self
            .state
            .get_workflow_context(workflow_run_id)
            .await?
            .and_then(|mut context| context.shared_data.remove(key)))
    }

    pub async fn get_workflow_context(
        &self,
        workflow_run_id: &str,
    ) -> Result<Option<WorkflowContext>, HandoffError> {
        Ok(self.state.get_workflow_context(workflow_run_id).await?)
    }

    pub async fn get_run_state(&self, run_id: &str) -> Result<Option<RunState>, HandoffError> {
        Ok(self.state.get_run_state(run_id).await?)
    }
}
