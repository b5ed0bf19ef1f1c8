//! Deterministic key construction.
//!
//! These patterns are shared with every other station reading the same
//! backing services and must not change.

pub const PREFIX_RUN: &str = "run";
pub const PREFIX_WORKFLOW: &str = "workflow";
pub const PREFIX_SHARED: &str = "shared";

/// `run.<run_id>.state`
pub fn run_state_key(run_id: &str) -> String {
    format!("{PREFIX_RUN}.{run_id}.state")
}

/// `workflow.<workflow_run_id>.context`
pub fn workflow_context_key(workflow_run_id: &str) -> String {
    format!("{PREFIX_WORKFLOW}.{workflow_run_id}.context")
}

/// `run/<run_id>/output/`
pub fn run_output_prefix(run_id: &str) -> String {
    format!("{PREFIX_RUN}/{run_id}/output/")
}

/// `run/<run_id>/output/<filename>`
pub fn run_file_key(run_id: &str, filename: &str) -> String {
    format!("{}{filename}", run_output_prefix(run_id))
}

/// `shared/<key>`
pub fn shared_file_key(key: &str) -> String {
    format!("{PREFIX_SHARED}/{key}")
}

/// `workflow/<workflow_run_id>/shared/`
pub fn workflow_shared_prefix(workflow_run_id: &str) -> String {
    format!("{PREFIX_WORKFLOW}/{workflow_run_id}/{PREFIX_SHARED}/")
}

/// `workflow/<workflow_run_id>/shared/<key>`
pub fn workflow_shared_file_key(workflow_run_id: &str, key: &str) -> String {
    format!("{}{key}", workflow_shared_prefix(workflow_run_id))
}

/// The last path segment of an artifact key.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
