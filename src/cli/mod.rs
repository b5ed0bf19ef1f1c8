use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::workflow::RunStatus;

pub mod commands;

#[derive(Parser)]
#[command(name = "station-handoff")]
#[command(about = "Share workflow state and artifacts between independent stations")]
#[command(long_about = "station-handoff records workflow progress, step outcomes and output files in \
                       shared backing services so that another station can pick up where the previous \
                       one stopped. Start with 'station-handoff workflow start'.")]
pub struct Cli {
    /// Configuration file (defaults to ./station-handoff.toml when present)
    #[arg(long, global = true, help = "Path to a TOML configuration file")]
    pub config: Option<PathBuf>,

    /// Abort the command after this many seconds
    #[arg(long, global = true, help = "Deadline for the whole command in seconds")]
    pub timeout_secs: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start or inspect a workflow run
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },
    /// Inspect a single run
    Run {
        #[command(subcommand)]
        action: RunAction,
    },
    /// Open, close and look back at workflow steps
    Step {
        #[command(subcommand)]
        action: StepAction,
    },
    /// Read and write the workflow scratchpad
    Shared {
        #[command(subcommand)]
        action: SharedAction,
    },
    /// Move files between this station and the artifact store
    Files {
        #[command(subcommand)]
        action: FilesAction,
    },
    /// Show or write configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum WorkflowAction {
    /// Create a workflow run with an empty step list (overwrites an existing one)
    Start {
        /// Workflow definition identifier
        workflow_id: String,
        /// Unique identifier of this execution
        workflow_run_id: String,
        #[arg(long, help = "Git branch; defaults to the branch checked out here")]
        branch: Option<String>,
        #[arg(long = "data", value_name = "KEY=JSON", help = "Initial shared data entry (repeatable)")]
        data: Vec<String>,
    },
    /// Print the workflow document as JSON
    Show { workflow_run_id: String },
}

#[derive(Subcommand)]
pub enum RunAction {
    /// Print the run document as JSON
    Show { run_id: String },
}

#[derive(Subcommand)]
pub enum StepAction {
    /// Record a running step
    Start {
        workflow_run_id: String,
        #[arg(long)]
        step: String,
        #[arg(long)]
        agent: String,
        #[arg(long = "run-id")]
        run_id: String,
        #[arg(long, default_value = "")]
        task: String,
    },
    /// Close a step and append it to the workflow
    Complete(CompleteArgs),
    /// Print the last recorded step and its output files
    Previous { workflow_run_id: String },
}

#[derive(Args)]
pub struct CompleteArgs {
    pub workflow_run_id: String,
    #[arg(long = "run-id")]
    pub run_id: String,
    #[arg(long, default_value = "completed", help = "completed or failed")]
    pub status: RunStatus,
    #[arg(long)]
    pub result: Option<String>,
    #[arg(long)]
    pub error: Option<String>,
    #[arg(long)]
    pub summary: Option<String>,
    #[arg(long = "file", help = "Modified file (repeatable)")]
    pub files_modified: Vec<String>,
    #[arg(long = "commit", help = "Commit produced by the step (repeatable)")]
    pub commits: Vec<String>,
    #[arg(long, help = "Commit the run ended on; defaults to HEAD here")]
    pub git_commit: Option<String>,
}

#[derive(Subcommand)]
pub enum SharedAction {
    /// Merge one value into the scratchpad (JSON, or a plain string)
    Set {
        workflow_run_id: String,
        key: String,
        value: String,
    },
    /// Print one scratchpad value as JSON
    Get { workflow_run_id: String, key: String },
}

#[derive(Subcommand)]
pub enum FilesAction {
    /// Store a local file as an output of a run
    Upload { run_id: String, path: PathBuf },
    /// Fetch one output of a run
    Download {
        run_id: String,
        filename: String,
        path: PathBuf,
    },
    /// Fetch every output of the previous step into a directory
    PullPrevious { workflow_run_id: String, dir: PathBuf },
    /// Publish a local file under shared/<key>
    Preload {
        key: String,
        path: PathBuf,
        #[arg(long, help = "Time to live in seconds")]
        ttl_secs: Option<u64>,
    },
    /// Fetch a file from shared/<key>
    FetchShared { key: String, path: PathBuf },
    /// Publish a local file under workflow/<workflow_run_id>/shared/<key>
    ShareWorkflow {
        workflow_run_id: String,
        key: String,
        path: PathBuf,
    },
    /// Fetch a file from workflow/<workflow_run_id>/shared/<key>
    FetchWorkflow {
        workflow_run_id: String,
        key: String,
        path: PathBuf,
    },
    /// List stored files under a key prefix
    List {
        #[arg(default_value = "")]
        prefix: String,
    },
    /// Delete files whose expiry has passed
    Cleanup,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Write the default configuration to a file
    Init {
        #[arg(long, default_value = crate::config::CONFIG_FILE)]
        path: PathBuf,
        #[arg(long, help = "Overwrite an existing file")]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_complete_parses_status_and_repeated_flags() {
        let cli = Cli::try_parse_from([
            "station-handoff",
            "--timeout-secs",
            "5",
            "step",
            "complete",
            "wf-1",
            "--run-id",
            "r-1",
            "--status",
            "failed",
            "--file",
            "a.rs",
            "--file",
            "b.rs",
        ])
        .unwrap();

        assert_eq!(cli.timeout_secs, Some(5));
        match cli.command {
            Commands::Step {
                action: StepAction::Complete(args),
            } => {
                assert_eq!(args.status, RunStatus::Failed);
                assert_eq!(args.files_modified, vec!["a.rs", "b.rs"]);
            }
            _ => panic!("expected step complete"),
        }
    }

    #[test]
    fn test_share_workflow_takes_run_key_and_path() {
        let cli = Cli::try_parse_from([
            "station-handoff",
            "files",
            "share-workflow",
            "wf-1",
            "plan.md",
            "./plan.md",
        ])
        .unwrap();

        match cli.command {
            Commands::Files {
                action:
                    FilesAction::ShareWorkflow {
                        workflow_run_id,
                        key,
                        path,
                    },
            } => {
                assert_eq!(workflow_run_id, "wf-1");
                assert_eq!(key, "plan.md");
                assert_eq!(path, PathBuf::from("./plan.md"));
            }
            _ => panic!("expected files share-workflow"),
        }
    }
}
