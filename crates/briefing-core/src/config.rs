//! Configuration parsing
//!
//! Parses the YAML config file. Three sections matter to the core:
//! - `mcp_servers`: worker processes to supervise, kept in file order
//! - `llm`: which reasoning engine to build
//! - `agent` / `session`: step budget, prompts, mitigation markers and timing

use anyhow::{Context, Result};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;
use crate::process::WorkerSpec;

/// Top-level configuration file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BriefingConfig {
    /// Workers in the order they appear in the file.
    /// This order is the registry's enumeration order.
    #[serde(default, deserialize_with = "ordered_workers")]
    pub mcp_servers: Vec<(String, WorkerConfig)>,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub session: SessionConfig,
    /// Directory relative working directories are resolved against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Raw worker entry
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Reasoning engine selection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// `anthropic` or `ollama`
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: constants::llm::DEFAULT_PROVIDER.to_string(),
            model: None,
            base_url: None,
            api_key_env: constants::llm::DEFAULT_API_KEY_ENV.to_string(),
            max_tokens: constants::llm::DEFAULT_MAX_TOKENS,
            temperature: constants::llm::DEFAULT_TEMPERATURE,
            timeout_secs: constants::llm::DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Agent loop settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_steps: usize,
    pub baseline_system_prompt: String,
    pub mitigated_system_prompt: String,
    pub output_start_marker: String,
    pub output_end_marker: String,
    /// Trailing sentence after wrapped output, `{tool}` is replaced with the tool name
    pub output_reminder: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        use constants::agent::*;
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            baseline_system_prompt: DEFAULT_BASELINE_SYSTEM_PROMPT.to_string(),
            mitigated_system_prompt: DEFAULT_MITIGATED_SYSTEM_PROMPT.to_string(),
            output_start_marker: DEFAULT_OUTPUT_START_MARKER.to_string(),
            output_end_marker: DEFAULT_OUTPUT_END_MARKER.to_string(),
            output_reminder: DEFAULT_OUTPUT_REMINDER.to_string(),
        }
    }
}

/// Timing for supervisor and sessions
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub request_timeout_secs: u64,
    pub launch_settle_ms: u64,
    pub post_start_settle_ms: u64,
    pub stop_grace_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: constants::mcp::REQUEST_TIMEOUT_SECS,
            launch_settle_ms: constants::process::LAUNCH_SETTLE_DELAY.as_millis() as u64,
            post_start_settle_ms: constants::runtime::POST_START_SETTLE.as_millis() as u64,
            stop_grace_secs: constants::process::STOP_GRACE_PERIOD.as_secs(),
        }
    }
}

impl SessionConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn launch_settle(&self) -> Duration {
        Duration::from_millis(self.launch_settle_ms)
    }

    pub fn post_start_settle(&self) -> Duration {
        Duration::from_millis(self.post_start_settle_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

impl BriefingConfig {
    /// Load config from a YAML file
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;

        let base_dir = config_base_dir(path)?;

        let config = Self::from_yaml(&content, base_dir)
            .with_context(|| format!("Failed to parse {:?}", path))?;

        tracing::info!(
            "Loaded config with {} workers from {:?}",
            config.mcp_servers.len(),
            path
        );

        Ok(config)
    }

    /// Parse config text; relative working directories resolve against `base_dir`
    pub fn from_yaml(content: &str, base_dir: PathBuf) -> Result<Self> {
        let mut config: BriefingConfig = serde_yaml::from_str(content)?;
        config.base_dir = base_dir;
        Ok(config)
    }

    /// Resolved worker specs in file order, including disabled ones
    pub fn worker_specs(&self) -> Vec<WorkerSpec> {
        self.mcp_servers
            .iter()
            .map(|(name, raw)| {
                let env = raw
                    .env
                    .iter()
                    .map(|(k, v)| (k.clone(), expand_env_var(v)))
                    .collect();

                let working_dir = match &raw.working_dir {
                    Some(dir) => {
                        let dir = PathBuf::from(expand_env_var(dir));
                        if dir.is_absolute() {
                            dir
                        } else {
                            self.base_dir.join(dir)
                        }
                    }
                    None => self.base_dir.clone(),
                };

                WorkerSpec {
                    name: name.clone(),
                    command: raw.command.clone(),
                    args: raw.args.clone(),
                    env,
                    working_dir,
                    enabled: raw.enabled,
                }
            })
            .collect()
    }
}

/// Absolute directory holding the config file. A bare file name has an
/// empty parent, which means the current directory.
fn config_base_dir(path: &Path) -> Result<PathBuf> {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    if parent.is_absolute() {
        return Ok(parent.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(if parent.as_os_str().is_empty() {
        cwd
    } else {
        cwd.join(parent)
    })
}

/// Deserialize the worker mapping without losing the order it was written in
fn ordered_workers<'de, D>(deserializer: D) -> Result<Vec<(String, WorkerConfig)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OrderedWorkers;

    impl<'de> Visitor<'de> for OrderedWorkers {
        type Value = Vec<(String, WorkerConfig)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a mapping of worker name to worker config")
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut workers: Vec<(String, WorkerConfig)> = Vec::new();
            while let Some((name, config)) = map.next_entry::<String, WorkerConfig>()? {
                if workers.iter().any(|(existing, _)| *existing == name) {
                    return Err(de::Error::custom(format!("duplicate worker name: {}", name)));
                }
                workers.push((name, config));
            }
            Ok(workers)
        }
    }

    deserializer.deserialize_any(OrderedWorkers)
}

/// Expand ${VAR} environment variables. Unset variables expand to nothing.
fn expand_env_var(s: &str) -> String {
    let mut result = s.to_string();
    let mut search_from = 0;

    while let Some(offset) = result[search_from..].find("${") {
        let start = search_from + offset;
        let Some(end_offset) = result[start..].find('}') else {
            break;
        };
        let end = start + end_offset;
        let var_name = &result[start + 2..end];

        let value = match std::env::var(var_name) {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!("Environment variable {} is not set", var_name);
                String::new()
            }
        };

        result.replace_range(start..end + 1, &value);
        search_from = start + value.len();
    }

    result
}
