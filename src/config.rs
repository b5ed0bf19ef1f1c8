use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{BackendKind, BlobService, FilesystemBackend, KeyValueService, MemoryBackend};
use crate::store::{
    DEFAULT_KV_BUCKET, DEFAULT_MAX_BUCKET_SIZE, DEFAULT_MAX_FILE_SIZE, DEFAULT_OBJECT_BUCKET,
    DEFAULT_STATE_TTL,
};
use crate::workflow::ConcurrencyMode;

/// Config file picked up from the working directory when no path is given.
pub const CONFIG_FILE: &str = "station-handoff.toml";

/// Environment prefix; nested keys use `__`, e.g. `STATION_HANDOFF_STATE__TTL_SECONDS`.
pub const ENV_PREFIX: &str = "STATION_HANDOFF";

/// Main configuration structure for a handoff station
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HandoffConfig {
    /// Identity of this station
    pub station: StationConfig,
    /// Which backing services to talk to
    pub backend: BackendConfig,
    /// Key-value bucket for run and workflow documents
    pub state: StateConfig,
    /// Blob bucket for artifacts
    pub files: FilesConfig,
    /// Handoff protocol settings
    pub handoff: HandoffSettings,
    /// Logging settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StationConfig {
    /// Station identifier (defaults to the host name)
    pub id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Shared directory for the filesystem backend
    pub root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StateConfig {
    pub bucket: String,
    /// Bucket-level TTL applied by the key-value service
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FilesConfig {
    pub bucket: String,
    /// Largest single upload in bytes
    pub max_file_size: u64,
    /// Total capacity of the blob bucket in bytes
    pub max_bucket_size: u64,
    /// TTL stamped on files uploaded through the relay helpers
    pub default_ttl_seconds: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HandoffSettings {
    pub concurrency: ConcurrencyMode,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log level; `RUST_LOG` overrides it
    pub log_level: String,
    /// Emit JSON lines instead of compact text
    pub json_logs: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Filesystem,
            root: PathBuf::from(".station-handoff"),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_KV_BUCKET.to_string(),
            ttl_seconds: DEFAULT_STATE_TTL.as_secs(),
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            bucket: DEFAULT_OBJECT_BUCKET.to_string(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_bucket_size: DEFAULT_MAX_BUCKET_SIZE,
            default_ttl_seconds: DEFAULT_STATE_TTL.as_secs(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl StateConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    /// Empty or zero settings fall back to the defaults.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.bucket.trim().is_empty() {
            self.bucket = defaults.bucket;
        }
        if self.ttl_seconds == 0 {
            self.ttl_seconds = defaults.ttl_seconds;
        }
        self
    }
}

impl FilesConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    /// Empty or zero settings fall back to the defaults.
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.bucket.trim().is_empty() {
            self.bucket = defaults.bucket;
        }
        if self.max_file_size == 0 {
            self.max_file_size = defaults.max_file_size;
        }
        if self.max_bucket_size == 0 {
            self.max_bucket_size = defaults.max_bucket_size;
        }
        if self.default_ttl_seconds == 0 {
            self.default_ttl_seconds = defaults.default_ttl_seconds;
        }
        self
    }
}

impl StationConfig {
    /// Configured id, else the host name, else `None`.
    pub fn resolve_id(&self) -> Option<String> {
        self.id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .or_else(|| {
                hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .filter(|h| !h.is_empty())
            })
    }
}

impl BackendConfig {
    /// Opens the configured backing services. Both handles share one adapter.
    pub fn connect(&self) -> (Arc<dyn KeyValueService>, Arc<dyn BlobService>) {
        match self.kind {
            BackendKind::Memory => {
                let backend = MemoryBackend::new();
                (Arc::new(backend.clone()), Arc::new(backend))
            }
            BackendKind::Filesystem => {
                let backend = FilesystemBackend::new(&self.root);
                (Arc::new(backend.clone()), Arc::new(backend))
            }
        }
    }
}

impl HandoffConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. `station-handoff.toml` in the working directory
    /// 3. Environment variables (prefixed with STATION_HANDOFF_)
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like [`HandoffConfig::load`], but an explicit path replaces the
    /// working-directory file and must exist.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path).required(true));
            }
            None if Path::new(CONFIG_FILE).exists() => {
                builder = builder.add_source(File::from(Path::new(CONFIG_FILE)));
            }
            None => {}
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;
        let config: HandoffConfig = config
            .try_deserialize()
            .context("Failed to parse configuration")?;
        Ok(config.normalized())
    }

    pub fn normalized(mut self) -> Self {
        self.state = self.state.normalized();
        self.files = self.files.normalized();
        if self.observability.log_level.trim().is_empty() {
            self.observability.log_level = ObservabilityConfig::default().log_level;
        }
        self
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<HandoffConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        if let Err(e) = HandoffConfig::load_env_file() {
            tracing::warn!(error = %e, "Ignoring malformed .env file");
        }
        HandoffConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static HandoffConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let _config = config()?;
    tracing::info!("Configuration loaded successfully");
    Ok(())
}
