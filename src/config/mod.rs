//! Configuration module for SensorFlow
//!
//! A pipeline is described by one file listing every module instance, the
//! library that implements it, and its two wiring attributes:
//!
//! - `output` - the event types produced, for modules whose outputs are not
//!   fixed by their declaration (`"1,2"`)
//! - `input` - the streams consumed, as `<producer>[<type>(a<tap>)?,...]`
//!   blocks separated by whitespace (`"1[1] 2[1a3]"`)
//!
//! # Formats
//!
//! Files ending in `.json` are read and written as JSON; everything else is
//! TOML.
//!
//! # Example
//!
//! ```toml
//! [runtime]
//! housekeeping_interval_ms = 1000
//!
//! [[modules]]
//! id = 1
//! name = "camera"
//! library = "synthetic_source"
//!
//! [[modules]]
//! id = 2
//! name = "stats"
//! library = "statistics"
//! input = "1[1]"
//! ```

pub mod value;

pub use value::ConfigValue;

use crate::error::{Result, SensorFlowError};
use crate::pipeline::id::MAX_ID;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "sensorflow";

/// Default pipeline config filename
pub const PIPELINE_CONFIG_FILE: &str = "pipeline.toml";

/// Default housekeeping wake-up interval in milliseconds
pub const DEFAULT_HOUSEKEEPING_INTERVAL_MS: u64 = 1000;

/// Get the default pipeline config path (`<config dir>/sensorflow/pipeline.toml`)
pub fn default_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(PIPELINE_CONFIG_FILE))
}

// ==================== Runtime ====================

/// Scheduler and channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum time the scheduler sleeps without data before running a tick
    #[serde(default = "default_housekeeping_interval_ms")]
    pub housekeeping_interval_ms: u64,

    /// Capacity of the control command channel
    #[serde(default = "default_command_capacity")]
    pub command_channel_capacity: usize,

    /// Capacity of the outgoing message channel
    #[serde(default = "default_message_capacity")]
    pub message_channel_capacity: usize,

    /// Capacity of each source module's internal packet queue
    #[serde(default = "default_data_capacity")]
    pub data_channel_capacity: usize,
}

fn default_housekeeping_interval_ms() -> u64 {
    DEFAULT_HOUSEKEEPING_INTERVAL_MS
}

fn default_command_capacity() -> usize {
    256
}

fn default_message_capacity() -> usize {
    10_000
}

fn default_data_capacity() -> usize {
    64
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            housekeeping_interval_ms: DEFAULT_HOUSEKEEPING_INTERVAL_MS,
            command_channel_capacity: default_command_capacity(),
            message_channel_capacity: default_message_capacity(),
            data_channel_capacity: default_data_capacity(),
        }
    }
}

// ==================== Logging ====================

/// Logging settings read by the launcher
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Optional log file, written in addition to stderr
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

// ==================== Modules ====================

/// One module instance in the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// Unique module id (1..=32767)
    pub id: u16,

    /// Instance name, used in log output and error messages
    pub name: String,

    /// Name of the module implementation in the module factory
    pub library: String,

    /// Consumed streams, `<producer>[<type>(a<tap>)?,...] ...`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,

    /// Produced event types for modules with an undefined output declaration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Start automatically once every upstream dependency is running
    #[serde(default = "default_true")]
    pub run_at_startup: bool,

    /// Implementation-specific parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, ConfigValue>,
}

fn default_true() -> bool {
    true
}

impl ModuleConfig {
    pub fn new(id: u16, name: impl Into<String>, library: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            library: library.into(),
            input: None,
            output: None,
            run_at_startup: true,
            params: BTreeMap::new(),
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_run_at_startup(mut self, run: bool) -> Self {
        self.run_at_startup = run;
        self
    }
}

// ==================== Pipeline ====================

/// Complete pipeline description
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

impl PipelineConfig {
    /// Load a pipeline config from `path`, choosing the format by extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SensorFlowError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = if is_json(path) {
            serde_json::from_str(&content).map_err(|e| {
                SensorFlowError::Config(format!("Failed to parse {}: {}", path.display(), e))
            })?
        } else {
            toml::from_str(&content).map_err(|e| {
                SensorFlowError::Config(format!("Failed to parse {}: {}", path.display(), e))
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, falling back to an empty pipeline on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load pipeline config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Write the config back to `path`, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    SensorFlowError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = if is_json(path) {
            serde_json::to_string_pretty(self)
                .map_err(|e| SensorFlowError::Serialization(e.to_string()))?
        } else {
            toml::to_string_pretty(self)
                .map_err(|e| SensorFlowError::Serialization(e.to_string()))?
        };

        std::fs::write(path, content)
            .map_err(|e| SensorFlowError::Config(format!("Failed to write config: {}", e)))
    }

    /// Structural checks that need no knowledge of module implementations
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();

        for module in &self.modules {
            if module.id == 0 || module.id > MAX_ID {
                return Err(SensorFlowError::Config(format!(
                    "Module '{}': id {} out of range 1..={}",
                    module.name, module.id, MAX_ID
                )));
            }
            if !ids.insert(module.id) {
                return Err(SensorFlowError::Config(format!(
                    "Duplicate module id {}",
                    module.id
                )));
            }
            if !names.insert(module.name.as_str()) {
                return Err(SensorFlowError::Config(format!(
                    "Duplicate module name '{}'",
                    module.name
                )));
            }
            if module.library.trim().is_empty() {
                return Err(SensorFlowError::Config(format!(
                    "Module '{}': no library given",
                    module.name
                )));
            }
        }

        if self.runtime.housekeeping_interval_ms == 0 {
            return Err(SensorFlowError::Config(
                "housekeeping_interval_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn module(&self, id: u16) -> Option<&ModuleConfig> {
        self.modules.iter().find(|m| m.id == id)
    }

    pub fn module_mut(&mut self, id: u16) -> Option<&mut ModuleConfig> {
        self.modules.iter_mut().find(|m| m.id == id)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}
