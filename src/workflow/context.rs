use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::types::{WorkflowContext, WorkflowStepSummary};
use crate::store::keys::workflow_context_key;
use crate::store::{StateStore, StoreError, Versioned};

/// How a workflow document is written back after a read-modify-write.
///
/// `LastWriterWins` writes the modified document unconditionally. Two
/// stations appending to the same workflow at the same time can therefore
/// lose one of the appends. `CompareAndSwap` writes only if the document is
/// still at the revision that was read and reports
/// [`StoreError::RevisionConflict`] otherwise; the caller decides whether to
/// re-read and try again. The document shape is the same in both modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    #[default]
    LastWriterWins,
    CompareAndSwap,
}

impl StateStore {
    pub async fn get_workflow_context(
        &self,
        workflow_run_id: &str,
    ) -> Result<Option<WorkflowContext>, StoreError> {
        self.get_json(&workflow_context_key(workflow_run_id)).await
    }

    pub async fn get_workflow_context_versioned(
        &self,
        workflow_run_id: &str,
    ) -> Result<Option<Versioned<WorkflowContext>>, StoreError> {
        self.get_json_versioned(&workflow_context_key(workflow_run_id))
            .await
    }

    /// Unconditional write; replaces whatever is stored for that run.
    pub async fn set_workflow_context(&self, context: &WorkflowContext) -> Result<(), StoreError> {
        self.set_json(&workflow_context_key(&context.workflow_run_id), context)
            .await
    }

    /// Appends a finished step. Fails with [`StoreError::WorkflowNotFound`]
    /// if the workflow was never started; it is never created here.
    pub async fn add_workflow_step(
        &self,
        workflow_run_id: &str,
        step: WorkflowStepSummary,
    ) -> Result<WorkflowContext, StoreError> {
        self.add_workflow_step_with_mode(workflow_run_id, step, ConcurrencyMode::LastWriterWins)
            .await
    }

    pub async fn add_workflow_step_with_mode(
        &self,
        workflow_run_id: &str,
        step: WorkflowStepSummary,
        mode: ConcurrencyMode,
    ) -> Result<WorkflowContext, StoreError> {
        self.modify_workflow_context(workflow_run_id, mode, |ctx| ctx.steps.push(step))
            .await
    }

    /// Shallow merge into `shared_data`; the last write per key wins.
    pub async fn merge_shared_data<I>(
        &self,
        workflow_run_id: &str,
        updates: I,
    ) -> Result<WorkflowContext, StoreError>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.merge_shared_data_with_mode(workflow_run_id, updates, ConcurrencyMode::LastWriterWins)
            .await
    }

    pub async fn merge_shared_data_with_mode<I>(
        &self,
        workflow_run_id: &str,
        updates: I,
        mode: ConcurrencyMode,
    ) -> Result<WorkflowContext, StoreError>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.modify_workflow_context(workflow_run_id, mode, |ctx| ctx.shared_data.extend(updates))
            .await
    }

    async fn modify_workflow_context<F>(
        &self,
        workflow_run_id: &str,
        mode: ConcurrencyMode,
        modify: F,
    ) -> Result<WorkflowContext, StoreError>
    where
        F: FnOnce(&mut WorkflowContext),
    {
        let key = workflow_context_key(workflow_run_id);
        let Versioned {
            value: mut context,
            revision,
        } = self
            .get_json_versioned::<WorkflowContext>(&key)
            .await?
            .ok_or_else(|| StoreError::WorkflowNotFound(workflow_run_id.to_string()))?;

        modify(&mut context);

        match mode {
            ConcurrencyMode::LastWriterWins => self.set_json(&key, &context).await?,
            ConcurrencyMode::CompareAndSwap => {
                self.set_json_if_revision(&key, &context, revision).await?;
            }
        }
        debug!(workflow_run_id, ?mode, steps = context.steps.len(), "workflow context updated");
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::config::StateConfig;
    use crate::workflow::RunStatus;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn store() -> StateStore {
        StateStore::new(Arc::new(MemoryBackend::new()), StateConfig::default())
    }

    fn context(id: &str) -> WorkflowContext {
        WorkflowContext {
            workflow_id: "bugfix".to_string(),
            workflow_run_id: id.to_string(),
            started_at: Utc::now(),
            git_branch: Some("main".to_string()),
            steps: vec![],
            shared_data: BTreeMap::new(),
        }
    }

    fn step(name: &str) -> WorkflowStepSummary {
        WorkflowStepSummary {
            step_name: name.to_string(),
            agent_name: "agent".to_string(),
            run_id: format!("run-{name}"),
            status: RunStatus::Completed,
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            summary: None,
            files_modified: vec![],
            commits: vec![],
        }
    }

    #[tokio::test]
    async fn test_append_keeps_order() {
        let store = store();
        store.set_workflow_context(&context("wf-1")).await.unwrap();

        store.add_workflow_step("wf-1", step("analyze")).await.unwrap();
        store.add_workflow_step("wf-1", step("fix")).await.unwrap();

        let ctx = store.get_workflow_context("wf-1").await.unwrap().unwrap();
        assert_eq!(ctx.step_names(), vec!["analyze", "fix"]);
    }

    #[tokio::test]
    async fn test_append_to_missing_workflow_does_not_create_it() {
        let store = store();
        let err = store.add_workflow_step("ghost", step("analyze")).await.unwrap_err();
        assert!(matches!(err, StoreError::WorkflowNotFound(ref id) if id == "ghost"));
        assert!(store.get_workflow_context("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_merge_overwrites_per_key() {
        let store = store();
        store.set_workflow_context(&context("wf-1")).await.unwrap();

        store
            .merge_shared_data("wf-1", [("a".to_string(), json!(1)), ("b".to_string(), json!("x"))])
            .await
            .unwrap();
        let ctx = store
            .merge_shared_data("wf-1", [("b".to_string(), json!({"nested": true}))])
            .await
            .unwrap();

        assert_eq!(ctx.shared_data.get("a"), Some(&json!(1)));
        assert_eq!(ctx.shared_data.get("b"), Some(&json!({"nested": true})));
    }

    #[tokio::test]
    async fn test_compare_and_swap_rejects_stale_document() {
        let store = store();
        store.set_workflow_context(&context("wf-1")).await.unwrap();

        // Another station rewrites the document between our read and write.
        let stale = store.get_workflow_context_versioned("wf-1").await.unwrap().unwrap();
        store.add_workflow_step("wf-1", step("analyze")).await.unwrap();

        let mut ours = stale.value.clone();
        ours.steps.push(step("fix"));
        let err = store
            .set_json_if_revision(&workflow_context_key("wf-1"), &ours, stale.revision)
            .await
            .unwrap_err();
        assert!(err.is_revision_conflict());

        // A fresh read-modify-write in the same mode goes through.
        let ctx = store
            .add_workflow_step_with_mode("wf-1", step("fix"), ConcurrencyMode::CompareAndSwap)
            .await
            .unwrap();
        assert_eq!(ctx.step_names(), vec!["analyze", "fix"]);
    }
}
