//! Configuration resolution for halbridge.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`~/.config/halbridge/settings.json`)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (applied by the daemon, highest priority)
//!
//! Files are merged key by key, so an overlay only needs the fields it
//! changes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::admission::DEFAULT_MIN_MESSAGE_LENGTH;
use crate::checkpoint::DEFAULT_CHECKPOINT_INTERVAL;
use crate::correlator::CorrelationOrder;
use crate::error::{Error, Result};

/// Complete halbridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub subprocess: SubprocessConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub bot: BotConfig,
    /// Key-value store location. Defaults to the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

/// How the MegaHAL process is launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubprocessConfig {
    pub executable: PathBuf,
    /// Fixed flags: no prompt, no line wrapping, no banner.
    pub args: Vec<String>,
    /// Directory holding the brain files.
    pub working_directory: Option<PathBuf>,
    /// Seconds to wait for exit after the quit command before killing.
    pub terminate_timeout_secs: u64,
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("megahal"),
            args: vec!["-pwb".to_string()],
            working_directory: None,
            terminate_timeout_secs: 5,
        }
    }
}

/// Passive learning and checkpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub min_message_length: usize,
    pub checkpoint_interval: u32,
    /// Set when the subprocess answers learning input as well; those answers
    /// are then consumed and dropped instead of reaching a later query.
    pub learning_replies: bool,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            min_message_length: DEFAULT_MIN_MESSAGE_LENGTH,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            learning_replies: false,
        }
    }
}

/// Response correlation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub order: CorrelationOrder,
    /// Outstanding handlers above which a desync warning is logged.
    pub pending_warn_threshold: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            order: CorrelationOrder::Fifo,
            pending_warn_threshold: 16,
        }
    }
}

/// Identity of the bot on the chat network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub nickname: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            nickname: "megahal".to_string(),
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        merge_json(&mut merged, load_config_file(&global_path)?);
    }

    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file {} does not exist",
                path.display()
            )));
        }
        merge_json(&mut merged, load_config_file(path)?);
    }

    let mut config: Config = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Global config path: `$XDG_CONFIG_HOME/halbridge/settings.json` or the
/// platform equivalent.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("halbridge").join("settings.json"))
}

/// Default key-value store location.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("halbridge").join("halbridge.db"))
}

fn load_config_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Recursively overlay `overlay` onto `base`; objects merge, anything else
/// replaces.
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Apply `HALBRIDGE_*` overrides read through `lookup`.
pub fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(val) = lookup("HALBRIDGE_EXECUTABLE") {
        config.subprocess.executable = PathBuf::from(val);
    }
    if let Some(val) = lookup("HALBRIDGE_BRAIN_DIR") {
        config.subprocess.working_directory = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("HALBRIDGE_NICKNAME") {
        config.bot.nickname = val;
    }
    if let Some(n) = lookup("HALBRIDGE_MIN_MESSAGE_LENGTH").and_then(|v| v.parse().ok()) {
        config.learning.min_message_length = n;
    }
    if let Some(n) = lookup("HALBRIDGE_CHECKPOINT_INTERVAL").and_then(|v| v.parse().ok()) {
        config.learning.checkpoint_interval = n;
    }
    if let Some(order) = lookup("HALBRIDGE_CORRELATION_ORDER").and_then(|v| v.parse().ok()) {
        config.correlation.order = order;
    }
    if let Some(val) = lookup("HALBRIDGE_DB_PATH") {
        config.database_path = Some(PathBuf::from(val));
    }
}
