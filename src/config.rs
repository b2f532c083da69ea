use anyhow::Result;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::events::DEFAULT_TOPIC;
use crate::stages::{ConfigurationError, StageDescriptor, StageTable};

/// Main configuration structure for the cell controller
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FabCellConfig {
    /// Orchestrator behaviour
    pub orchestrator: OrchestratorConfig,
    /// Ordered stage list, in execution order
    pub stages: Vec<StageConfig>,
    /// Where operation records are kept
    pub operation_log: OperationLogConfig,
    /// Event channel settings
    pub events: EventsConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Topic stage events are published on
    pub topic: String,
    /// Append "run started" / "run completed" records around the stage records
    pub record_run_markers: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StageConfig {
    pub name: String,
    /// Simulated duration in milliseconds
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationLogBackend {
    Memory,
    Jsonl,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OperationLogConfig {
    pub backend: OperationLogBackend,
    /// File path for jsonl, database URL for sqlite, unused for memory
    pub path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Events buffered per subscriber before it starts lagging
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level
    pub log_level: String,
    /// Emit JSON structured logs instead of human-readable lines
    pub json_logs: bool,
    /// Log orchestrator counters on shutdown
    pub metrics_enabled: bool,
}

impl Default for FabCellConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            stages: StageTable::hybrid_cell()
                .iter()
                .map(|stage| StageConfig {
                    name: stage.name.clone(),
                    duration_ms: stage.simulated_duration.as_millis() as u64,
                })
                .collect(),
            operation_log: OperationLogConfig::default(),
            events: EventsConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            record_run_markers: false,
        }
    }
}

impl Default for OperationLogConfig {
    fn default() -> Self {
        Self {
            backend: OperationLogBackend::Jsonl,
            path: ".fabcell/operations.jsonl".to_string(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
        }
    }
}

impl FabCellConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration files (fabcell.toml, .fabcell-rc)
    /// 3. Environment variables (prefixed with FABCELL_)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Same layering as `load`, with the config files looked up in `dir`
    pub fn load_from(dir: &Path) -> Result<Self> {
        // Sections missing from every source fall back to serde defaults
        let mut builder = Config::builder();

        let main_file = dir.join("fabcell.toml");
        if main_file.exists() {
            builder = builder.add_source(File::from(main_file).format(FileFormat::Toml));
        }

        let rc_file = dir.join(".fabcell-rc");
        if rc_file.exists() {
            builder = builder.add_source(File::from(rc_file).format(FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("FABCELL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Load from a single TOML file layered over the defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()).format(FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
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

    /// Validated stage table built from the `stages` section
    pub fn stage_table(&self) -> Result<StageTable, ConfigurationError> {
        StageTable::new(
            self.stages
                .iter()
                .map(|s| StageDescriptor::new(s.name.clone(), Duration::from_millis(s.duration_ms)))
                .collect(),
        )
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<FabCellConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        // Load .env file first
        let _ = FabCellConfig::load_env_file();
        FabCellConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static FabCellConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let config = config()?;
    config.stage_table()?;
    tracing::info!(
        stages = config.stages.len(),
        topic = %config.orchestrator.topic,
        "Configuration loaded successfully"
    );
    Ok(())
}
