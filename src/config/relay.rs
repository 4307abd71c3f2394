// src/config/relay.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::RelayError;
use crate::ingest::types::Source;
use crate::notify::Destination;

pub const ENV_CONFIG_PATH: &str = "RELAY_CONFIG_PATH";
const ENV_TELEGRAM_TOKEN: &str = "TELEGRAM_BOT_TOKEN";

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}
fn default_base_offset_secs() -> u64 {
    120
}
fn default_per_destination_secs() -> u64 {
    60
}
fn default_send_timeout_secs() -> u64 {
    45
}
fn default_per_destination_concurrency() -> usize {
    1
}
fn default_interval_secs() -> u64 {
    300
}
fn default_max_batch() -> usize {
    10
}
fn default_ledger_max_lines() -> usize {
    2000
}
fn default_meta_max_files() -> usize {
    50
}
fn default_sink_timeout_secs() -> u64 {
    10
}
fn default_sink_retries() -> u8 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Root for checkpoints and ledgers.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    pub tasks: Vec<TaskConfig>,
}

/// Timeout model of the fan-out dispatcher.
///
/// Batch deadline = `base_offset + per_destination * |destinations| * |items|`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchConfig {
    #[serde(default = "default_base_offset_secs")]
    pub base_offset_secs: u64,
    #[serde(default = "default_per_destination_secs")]
    pub per_destination_secs: u64,
    /// Bound on a single `send` call.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// Concurrent sends allowed against the same destination.
    #[serde(default = "default_per_destination_concurrency")]
    pub per_destination_concurrency: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            base_offset_secs: default_base_offset_secs(),
            per_destination_secs: default_per_destination_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            per_destination_concurrency: default_per_destination_concurrency(),
        }
    }
}

impl DispatchConfig {
    pub fn batch_deadline(&self, items: usize, destinations: usize) -> Duration {
        let per = self
            .per_destination_secs
            .saturating_mul(destinations as u64)
            .saturating_mul(items as u64);
        Duration::from_secs(self.base_offset_secs.saturating_add(per))
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

/// One orchestrator: a set of sources fanned out to a set of destinations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    #[serde(default = "default_ledger_max_lines")]
    pub ledger_max_lines: usize,
    /// Where detected batches are written as meta files; none when unset.
    #[serde(default)]
    pub meta_dir: Option<PathBuf>,
    #[serde(default = "default_meta_max_files")]
    pub meta_max_files: usize,
    #[serde(default)]
    pub sink: SinkConfig,
    pub sources: Vec<Source>,
    pub destinations: Vec<Destination>,
}

impl TaskConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    #[default]
    Log,
    Discord {
        #[serde(default = "default_sink_timeout_secs")]
        timeout_secs: u64,
        #[serde(default = "default_sink_retries")]
        max_retries: u8,
    },
    Slack {
        #[serde(default = "default_sink_timeout_secs")]
        timeout_secs: u64,
        #[serde(default = "default_sink_retries")]
        max_retries: u8,
    },
    Telegram {
        /// "ENV" means: read from TELEGRAM_BOT_TOKEN.
        bot_token: String,
        #[serde(default = "default_sink_timeout_secs")]
        timeout_secs: u64,
        #[serde(default = "default_sink_retries")]
        max_retries: u8,
    },
}

impl RelayConfig {
    pub fn checkpoint_dir(&self, task: &str) -> PathBuf {
        self.state_dir
            .join("checkpoints")
            .join(crate::storage::sanitize_component(task))
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.state_dir.join("ledger")
    }

    /// Replace `"ENV"` placeholders with values from the environment.
    pub fn resolve_secrets(&mut self) -> Result<()> {
        for task in &mut self.tasks {
            if let SinkConfig::Telegram { bot_token, .. } = &mut task.sink {
                if bot_token.trim().eq_ignore_ascii_case("env") {
                    *bot_token = std::env::var(ENV_TELEGRAM_TOKEN).map_err(|_| {
                        anyhow!("Missing {ENV_TELEGRAM_TOKEN} env var for task '{}'", task.name)
                    })?;
                }
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> std::result::Result<(), RelayError> {
        if self.tasks.is_empty() {
            return Err(RelayError::Config("no tasks configured".into()));
        }
        let mut names = HashSet::new();
        for t in &self.tasks {
            let name = t.name.trim();
            if name.is_empty() {
                return Err(RelayError::Config("task with empty name".into()));
            }
            if !names.insert(name.to_string()) {
                return Err(RelayError::Config(format!("duplicate task name '{name}'")));
            }
            if t.sources.is_empty() {
                return Err(RelayError::Config(format!("task '{name}' has no sources")));
            }
            if t.destinations.is_empty() {
                return Err(RelayError::Config(format!("task '{name}' has no destinations")));
            }
            if t.interval_secs == 0 {
                return Err(RelayError::Config(format!("task '{name}': interval_secs must be > 0")));
            }
            if t.max_batch == 0 {
                return Err(RelayError::Config(format!("task '{name}': max_batch must be > 0")));
            }
            // One cycle of commits from every source must survive the trim.
            let floor = t.max_batch.saturating_mul(t.sources.len());
            if t.ledger_max_lines < floor {
                return Err(RelayError::Config(format!(
                    "task '{name}': ledger_max_lines ({}) must be at least max_batch * sources ({floor})",
                    t.ledger_max_lines
                )));
            }
            let mut ids = HashSet::new();
            for s in &t.sources {
                if s.id.trim().is_empty() || !ids.insert(s.id.as_str()) {
                    return Err(RelayError::Config(format!(
                        "task '{name}': empty or duplicate source id '{}'",
                        s.id
                    )));
                }
            }
        }
        if self.dispatch.per_destination_concurrency == 0 {
            return Err(RelayError::Config(
                "dispatch.per_destination_concurrency must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Load, resolve and validate a config file. Supports TOML or JSON.
pub fn load_config_from(path: &Path) -> Result<RelayConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading relay config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let mut cfg = parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing {}", path.display()))?;
    cfg.resolve_secrets()?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load config using env var + fallbacks:
/// 1) $RELAY_CONFIG_PATH
/// 2) config/relay.toml
/// 3) config/relay.json
pub fn load_config_default() -> Result<RelayConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        }
        return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
    }
    for candidate in ["config/relay.toml", "config/relay.json"] {
        let p = PathBuf::from(candidate);
        if p.exists() {
            return load_config_from(&p);
        }
    }
    Err(anyhow!(
        "no relay config found (set {ENV_CONFIG_PATH} or create config/relay.toml)"
    ))
}

fn parse_config(s: &str, hint_ext: &str) -> Result<RelayConfig> {
    match hint_ext {
        "toml" => Ok(toml::from_str(s)?),
        "json" => Ok(serde_json::from_str(s)?),
        _ => {
            // Unknown extension: JSON documents start with '{'.
            if s.trim_start().starts_with('{') {
                Ok(serde_json::from_str(s)?)
            } else {
                Ok(toml::from_str(s)?)
            }
        }
    }
}
