//! Configuration loading for the pipeline daemon.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at `~/.config/index-pipeline/config.toml`.
//! Environment variables use the `PIPELINE` prefix and `__` between nested
//! keys, e.g. `PIPELINE_SEARCH__ENDPOINT` or `PIPELINE_CONSUMER__LEASE_SECS`.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Largest number of keys a single backend batch-delete request accepts.
pub const MAX_DELETE_BATCH: usize = 256;

/// Shortest lease that still covers cleanup plus forwarding.
pub const MIN_LEASE_SECS: u64 = 30;

/// Queue names. Effective names carry the environment suffix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Primary queue, fed by the upload producer
    pub primary: String,
    /// Secondary queue, fed by the ingest consumer
    pub secondary: String,
    /// Copy discarded messages to `{queue}-poison` before deleting them
    pub dead_letter: bool,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            primary: "uploads".to_string(),
            secondary: "finished-uploads".to_string(),
            dead_letter: false,
        }
    }
}

/// Object storage addressing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// `file:///absolute/path` or `memory://`
    pub connection_string: String,
    /// Prefix used when deriving container names for new uploads
    pub container_prefix: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            connection_string: format!("file://{}", data_dir().join("blobs").to_string_lossy()),
            container_prefix: "regena".to_string(),
        }
    }
}

/// External search service connection.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Service URL, e.g. `https://my-service.search.windows.net`
    pub endpoint: String,
    /// Admin key (loaded from env var, not stored in config file)
    pub api_key: Option<String>,
    pub api_version: String,
    pub timeout_secs: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: None,
            api_version: "2024-07-01".to_string(),
            timeout_secs: 60,
        }
    }
}

impl fmt::Debug for SearchSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchSettings")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_version", &self.api_version)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Container cleanup rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupSettings {
    /// Patterns used when a container carries no override file
    pub default_ignore: Vec<String>,
    /// Name of the per-container override object
    pub override_file: String,
    /// Keys per batch-delete request
    pub batch_size: usize,
    /// Batch-delete requests in flight at once (1 = sequential)
    pub max_concurrent_batches: usize,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            default_ignore: Vec::new(),
            override_file: ".ignore-rules".to_string(),
            batch_size: MAX_DELETE_BATCH,
            max_concurrent_batches: 1,
        }
    }
}

/// Polling and retry behaviour shared by both consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerSettings {
    pub poll_interval_secs: u64,
    pub lease_secs: u64,
    /// Deliveries after which a rate-limited message is given up
    pub max_deliveries: u32,
    /// Apply the delivery ceiling to unclassified faults as well
    pub cap_unclassified_retries: bool,
    /// Mark jobs FAILED when the provisioning stage discards their message
    pub mark_failed_on_discard: bool,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            lease_secs: MIN_LEASE_SECS,
            max_deliveries: 10,
            cap_unclassified_retries: false,
            mark_failed_on_discard: true,
        }
    }
}

impl ConsumerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to RocksDB directory holding jobs and queues
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Deployment environment, appended to queue names
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub queues: QueueSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub search: SearchSettings,

    #[serde(default)]
    pub cleanup: CleanupSettings,

    #[serde(default)]
    pub consumer: ConsumerSettings,
}

fn data_dir() -> PathBuf {
    ProjectDirs::from("", "", "index-pipeline")
        .map(|p| p.data_local_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

fn default_db_path() -> String {
    data_dir().join("db").to_string_lossy().to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
            environment: default_environment(),
            queues: QueueSettings::default(),
            storage: StorageSettings::default(),
            search: SearchSettings::default(),
            cleanup: CleanupSettings::default(),
            consumer: ConsumerSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/index-pipeline/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (PIPELINE_*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, PipelineError> {
        let config_dir = ProjectDirs::from("", "", "index-pipeline")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| PipelineError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| PipelineError::Config(e.to_string()))?
            .set_default("environment", default_environment())
            .map_err(|e| PipelineError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("PIPELINE")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("cleanup.default_ignore")
                .try_parsing(true),
        );

        let settings: Settings = builder
            .build()
            .map_err(|e| PipelineError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        Ok(settings)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.consumer.lease_secs < MIN_LEASE_SECS {
            return Err(PipelineError::Config(format!(
                "consumer.lease_secs must be >= {}, got {}",
                MIN_LEASE_SECS, self.consumer.lease_secs
            )));
        }
        if self.consumer.poll_interval_secs == 0 {
            return Err(PipelineError::Config(
                "consumer.poll_interval_secs must be > 0".to_string(),
            ));
        }
        if self.consumer.max_deliveries == 0 {
            return Err(PipelineError::Config(
                "consumer.max_deliveries must be > 0".to_string(),
            ));
        }
        if !(1..=MAX_DELETE_BATCH).contains(&self.cleanup.batch_size) {
            return Err(PipelineError::Config(format!(
                "cleanup.batch_size must be 1-{}, got {}",
                MAX_DELETE_BATCH, self.cleanup.batch_size
            )));
        }
        if self.cleanup.max_concurrent_batches == 0 {
            return Err(PipelineError::Config(
                "cleanup.max_concurrent_batches must be > 0".to_string(),
            ));
        }
        if self.cleanup.override_file.trim().is_empty() {
            return Err(PipelineError::Config(
                "cleanup.override_file must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn environment_suffixed(&self, name: &str) -> String {
        format!("{}-{}", name, self.environment)
    }

    /// Effective primary queue name, e.g. `uploads-production`.
    pub fn primary_queue(&self) -> String {
        self.environment_suffixed(&self.queues.primary)
    }

    /// Effective secondary queue name, e.g. `finished-uploads-production`.
    pub fn secondary_queue(&self) -> String {
        self.environment_suffixed(&self.queues.secondary)
    }

    /// Dead-letter queue name for a given effective queue name.
    pub fn dead_letter_queue(queue_name: &str) -> String {
        format!("{}-poison", queue_name)
    }

    /// Expand ~ in db_path to actual home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        if let Some(rest) = self.db_path.strip_prefix("~/") {
            if let Some(base) = directories::BaseDirs::new() {
                return base.home_dir().join(rest);
            }
        }
        PathBuf::from(&self.db_path)
    }
}
