use anyhow::Result;
use std::time::Duration;

use super::{print_json, Command};
use crate::cli::FilesAction;
use crate::handoff::{HandoffManager, PreloadFile};

pub struct FilesCommand {
    pub action: FilesAction,
}

impl FilesCommand {
    pub fn new(action: FilesAction) -> Self {
        Self { action }
    }
}

impl Command for FilesCommand {
    async fn execute(&self, manager: &HandoffManager) -> Result<()> {
        match &self.action {
            FilesAction::Upload { run_id, path } => {
                let metadata = manager.upload_output_file(run_id, path).await?;
                eprintln!("⬆️  Uploaded {} ({} bytes)", metadata.key, metadata.size);
                print_json(&metadata)
            }
            FilesAction::Download {
                run_id,
                filename,
                path,
            } => {
                let metadata = manager.download_output_file(run_id, filename, path).await?;
                eprintln!("⬇️  Downloaded {} to {}", metadata.key, path.display());
                print_json(&metadata)
            }
            FilesAction::PullPrevious {
                workflow_run_id,
                dir,
            } => {
                let count = manager.download_previous_outputs(workflow_run_id, dir).await?;
                eprintln!("⬇️  Downloaded {count} file(s) into {}", dir.display());
                print_json(&count)
            }
            FilesAction::Preload {
                key,
                path,
                ttl_secs,
            } => {
                let uploaded = manager
                    .preload_files(&[PreloadFile {
                        key: key.clone(),
                        local_path: path.clone(),
                        ttl: ttl_secs.map(Duration::from_secs),
                    }])
                    .await?;
                print_json(&uploaded)
            }
            FilesAction::FetchShared { key, path } => {
                let metadata = manager.download_preloaded_file(key, path).await?;
                eprintln!("⬇️  Downloaded {} to {}", metadata.key, path.display());
                print_json(&metadata)
            }
            FilesAction::ShareWorkflow {
                workflow_run_id,
                key,
                path,
            } => {
                let metadata = manager
                    .upload_workflow_shared_file(workflow_run_id, key, path)
                    .await?;
                eprintln!("⬆️  Shared {} ({} bytes)", metadata.key, metadata.size);
                print_json(&metadata)
            }
            FilesAction::FetchWorkflow {
                workflow_run_id,
                key,
                path,
            } => {
                let metadata = manager
                    .download_workflow_shared_file(workflow_run_id, key, path)
                    .await?;
                eprintln!("⬇️  Downloaded {} to {}", metadata.key, path.display());
                print_json(&metadata)
            }
            FilesAction::List { prefix } => {
                let files = manager.artifacts().list(prefix).await?;
                print_json(&files)
            }
            FilesAction::Cleanup => {
                let deleted = manager.artifacts().cleanup_expired_files().await?;
                eprintln!("🧹 Removed {deleted} expired file(s)");
                print_json(&deleted)
            }
        }
    }
}
