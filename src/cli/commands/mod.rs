use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;

use super::{Commands, ConfigAction, FilesAction, RunAction, SharedAction, StepAction, WorkflowAction};
use crate::config::HandoffConfig;
use crate::handoff::HandoffManager;

pub mod config;
pub mod files;
pub mod shared;
pub mod step;
pub mod workflow;

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self, manager: &HandoffManager) -> Result<()>;
}

/// Runs one parsed command against a manager built from `config`.
pub async fn dispatch(command: Commands, config: &HandoffConfig) -> Result<()> {
    // Config commands never open the backing services.
    let connect = || HandoffManager::connect(config);
    match command {
        Commands::Config { action } => match action {
            ConfigAction::Show => config::ShowConfigCommand::new(config.clone()).execute(),
            ConfigAction::Init { path, force } => {
                config::InitConfigCommand::new(path, force).execute()
            }
        },
        Commands::Workflow { action } => match action {
            WorkflowAction::Start {
                workflow_id,
                workflow_run_id,
                branch,
                data,
            } => {
                workflow::StartWorkflowCommand::new(workflow_id, workflow_run_id)
                    .with_branch(branch)
                    .with_data(data)
                    .execute(&connect())
                    .await
            }
            WorkflowAction::Show { workflow_run_id } => {
                workflow::ShowWorkflowCommand { workflow_run_id }
                    .execute(&connect())
                    .await
            }
        },
        Commands::Run {
            action: RunAction::Show { run_id },
        } => workflow::ShowRunCommand { run_id }.execute(&connect()).await,
        Commands::Step { action } => match action {
            StepAction::Start {
                workflow_run_id,
                step,
                agent,
                run_id,
                task,
            } => {
                step::StartStepCommand {
                    workflow_run_id,
                    step,
                    agent,
                    run_id,
                    task,
                }
                .execute(&connect())
                .await
            }
            StepAction::Complete(args) => {
                step::CompleteStepCommand::from(args)
                    .execute(&connect())
                    .await
            }
            StepAction::Previous { workflow_run_id } => {
                step::PreviousStepCommand { workflow_run_id }
                    .execute(&connect())
                    .await
            }
        },
        Commands::Shared { action } => match action {
            SharedAction::Set {
                workflow_run_id,
                key,
                value,
            } => {
                shared::SetSharedCommand {
                    workflow_run_id,
                    key,
                    value,
                }
                .execute(&connect())
                .await
            }
            SharedAction::Get {
                workflow_run_id,
                key,
            } => {
                shared::GetSharedCommand {
                    workflow_run_id,
                    key,
                }
                .execute(&connect())
                .await
            }
        },
        Commands::Files { action } => files::FilesCommand::new(action).execute(&connect()).await,
    }
}

/// Pretty JSON on stdout; absent values print as `null`.
pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render JSON")?;
    println!("{rendered}");
    Ok(())
}

/// `KEY=VALUE` where VALUE is JSON, falling back to a plain string.
pub(crate) fn parse_assignment(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    if key.is_empty() {
        anyhow::bail!("empty key in {raw:?}");
    }
    Ok((key.to_string(), parse_value(value)))
}

pub(crate) fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_assignment_prefers_json() {
        assert_eq!(parse_assignment("n=3").unwrap(), ("n".to_string(), json!(3)));
        assert_eq!(
            parse_assignment("cfg={\"a\":[1,2]}").unwrap(),
            ("cfg".to_string(), json!({"a": [1, 2]}))
        );
        assert_eq!(
            parse_assignment("who=station a").unwrap(),
            ("who".to_string(), json!("station a"))
        );
        assert_eq!(parse_assignment("eq=a=b").unwrap().1, json!("a=b"));
    }

    #[test]
    fn test_parse_assignment_rejects_missing_key() {
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=1").is_err());
    }
}
