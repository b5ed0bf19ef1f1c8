use anyhow::Result;
use std::collections::BTreeMap;

use super::{parse_assignment, print_json, Command};
use crate::git::GitInfo;
use crate::handoff::{HandoffManager, StartWorkflowInput};

pub struct StartWorkflowCommand {
    pub workflow_id: String,
    pub workflow_run_id: String,
    pub branch: Option<String>,
    pub data: Vec<String>,
}

impl StartWorkflowCommand {
    pub fn new(workflow_id: String, workflow_run_id: String) -> Self {
        Self {
            workflow_id,
            workflow_run_id,
            branch: None,
            data: Vec::new(),
        }
    }

    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch;
        self
    }

    pub fn with_data(mut self, data: Vec<String>) -> Self {
        self.data = data;
        self
    }
}

impl Command for StartWorkflowCommand {
    async fn execute(&self, manager: &HandoffManager) -> Result<()> {
        let shared_data = self
            .data
            .iter()
            .map(|raw| parse_assignment(raw))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let git_branch = match &self.branch {
            Some(branch) => Some(branch.clone()),
            None => std::env::current_dir()
                .ok()
                .and_then(|dir| GitInfo::discover(dir).branch),
        };

        let context = manager
            .start_workflow(StartWorkflowInput {
                workflow_id: self.workflow_id.clone(),
                workflow_run_id: self.workflow_run_id.clone(),
                git_branch,
                shared_data,
            })
            .await?;

        eprintln!("🚀 Started workflow {} ({})", context.workflow_run_id, context.workflow_id);
        print_json(&context)
    }
}

pub struct ShowWorkflowCommand {
    pub workflow_run_id: String,
}

impl Command for ShowWorkflowCommand {
    async fn execute(&self, manager: &HandoffManager) -> Result<()> {
        let context = manager.get_workflow_context(&self.workflow_run_id).await?;
        print_json(&context)
    }
}

pub struct ShowRunCommand {
    pub run_id: String,
}

impl Command for ShowRunCommand {
    async fn execute(&self, manager: &HandoffManager) -> Result<()> {
        let run = manager.get_run_state(&self.run_id).await?;
        print_json(&run)
    }
}
