use anyhow::Result;

use super::{parse_value, print_json, Command};
use crate::handoff::HandoffManager;

pub struct SetSharedCommand {
    pub workflow_run_id: String,
    pub key: String,
    pub value: String,
}

impl Command for SetSharedCommand {
    async fn execute(&self, manager: &HandoffManager) -> Result<()> {
        let value = parse_value(&self.value);
        let context = manager
            .update_shared_data(&self.workflow_run_id, [(self.key.clone(), value)])
            .await?;
        eprintln!("📝 {} = {}", self.key, self.value);
        print_json(&context.shared_data)
    }
}

pub struct GetSharedCommand {
    pub workflow_run_id: String,
    pub key: String,
}

impl Command for GetSharedCommand {
    async fn execute(&self, manager: &HandoffManager) -> Result<()> {
        let value = manager
            .get_shared_data(&self.workflow_run_id, &self.key)
            .await?;
        print_json(&value)
    }
}
