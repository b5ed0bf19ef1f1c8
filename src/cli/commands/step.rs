use anyhow::Result;

use super::{print_json, Command};
use crate::cli::CompleteArgs;
use crate::git::GitInfo;
use crate::handoff::{CompleteStepInput, HandoffManager, StartStepInput};
use crate::workflow::RunStatus;

pub struct StartStepCommand {
    pub workflow_run_id: String,
    pub step: String,
    pub agent: String,
    pub run_id: String,
    pub task: String,
}

impl Command for StartStepCommand {
    async fn execute(&self, manager: &HandoffManager) -> Result<()> {
        let (run, _context) = manager
            .start_step(StartStepInput {
                workflow_run_id: self.workflow_run_id.clone(),
                step_name: self.step.clone(),
                agent_name: self.agent.clone(),
                run_id: self.run_id.clone(),
                task: self.task.clone(),
            })
            .await?;

        eprintln!("▶️  Step {} started as run {}", self.step, run.run_id);
        print_json(&run)
    }
}

pub struct CompleteStepCommand {
    pub args: CompleteArgs,
}

impl From<CompleteArgs> for CompleteStepCommand {
    fn from(args: CompleteArgs) -> Self {
        Self { args }
    }
}

impl Command for CompleteStepCommand {
    async fn execute(&self, manager: &HandoffManager) -> Result<()> {
        let args = &self.args;
        if args.status == RunStatus::Running {
            anyhow::bail!("a step cannot be completed with status running");
        }

        let git_commit = match &args.git_commit {
            Some(commit) => Some(commit.clone()),
            None => std::env::current_dir()
                .ok()
                .and_then(|dir| GitInfo::discover(dir).commit),
        };

        let context = manager
            .complete_step(CompleteStepInput {
                run_id: args.run_id.clone(),
                workflow_run_id: args.workflow_run_id.clone(),
                status: args.status,
                result: args.result.clone(),
                error: args.error.clone(),
                summary: args.summary.clone(),
                files_modified: args.files_modified.clone(),
                commits: args.commits.clone(),
                git_commit,
            })
            .await?;

        eprintln!(
            "✅ Run {} recorded as {} ({} steps so far)",
            args.run_id,
            args.status,
            context.steps.len()
        );
        print_json(&context)
    }
}

pub struct PreviousStepCommand {
    pub workflow_run_id: String,
}

impl Command for PreviousStepCommand {
    async fn execute(&self, manager: &HandoffManager) -> Result<()> {
        let previous = manager.get_previous_step_context(&self.workflow_run_id).await?;
        if previous.is_none() {
            eprintln!("📋 No completed steps yet for {}", self.workflow_run_id);
        }
        print_json(&previous)
    }
}
