use anyhow::{bail, Result};
use std::path::PathBuf;

use crate::config::HandoffConfig;

pub struct ShowConfigCommand {
    config: HandoffConfig,
}

impl ShowConfigCommand {
    pub fn new(config: HandoffConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<()> {
        let mut effective = self.config.clone();
        if effective.station.id.is_none() {
            effective.station.id = effective.station.resolve_id();
        }
        print!("{}", toml::to_string_pretty(&effective)?);
        Ok(())
    }
}

/// Writes the built-in defaults. Refuses to replace an existing file
/// unless forced.
pub struct InitConfigCommand {
    pub path: PathBuf,
    pub force: bool,
}

impl InitConfigCommand {
    pub fn new(path: PathBuf, force: bool) -> Self {
        Self { path, force }
    }

    pub fn execute(&self) -> Result<()> {
        if self.path.exists() && !self.force {
            bail!(
                "{} already exists. Use --force to overwrite it.",
                self.path.display()
            );
        }
        HandoffConfig::default().save_to_file(&self.path)?;
        println!("⚙️  Wrote {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_refuses_to_overwrite_without_force() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("station-handoff.toml");

        InitConfigCommand::new(path.clone(), false).execute().unwrap();
        assert!(path.exists());
        assert!(InitConfigCommand::new(path.clone(), false).execute().is_err());
        InitConfigCommand::new(path.clone(), true).execute().unwrap();

        let loaded = HandoffConfig::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.state.bucket, "harness-state");
    }
}
