use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Process-wide config, swapped atomically on reload. Readers take a
/// snapshot with `load()` and never hold it across a turn boundary.
pub(crate) type SharedConfig = Arc<ArcSwap<Config>>;

pub(crate) fn shared_config(config: Config) -> SharedConfig {
    Arc::new(ArcSwap::from_pointee(config))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub bots: Vec<BotConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_owned()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> String {
    "./data/parley.db".to_owned()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct AssistantConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_assistant_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: default_assistant_key_env(),
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            max_depth: default_max_depth(),
        }
    }
}

impl AssistantConfig {
    pub(crate) fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_assistant_key_env() -> String {
    "OPENAI_API_KEY".to_owned()
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_max_attempts() -> u32 {
    30
}

fn default_max_depth() -> u32 {
    5
}

/// Messaging bridge connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct GatewayConfig {
    #[serde(default = "default_bridge_url")]
    pub base_url: String,
    #[serde(default = "default_session")]
    pub session: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_bridge_url(),
            session: default_session(),
            api_key_env: None,
        }
    }
}

fn default_bridge_url() -> String {
    "http://localhost:3000".to_owned()
}

fn default_session() -> String {
    "default".to_owned()
}

/// A bot is one tenant-facing deployment of the shared coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct BotConfig {
    pub id: String,
    pub tenant_id: String,
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,
    #[serde(default)]
    pub primary_channel: u32,
    /// Group messages must start with this to be answered.
    #[serde(default)]
    pub mention_prefix: Option<String>,
    /// Used when the tenant config names no assistant.
    #[serde(default)]
    pub assistant_id: Option<String>,
    /// Enabled tool names. Empty enables every registered tool.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub templates: Templates,
    #[serde(default)]
    pub triggers: Vec<TriggerRule>,
    #[serde(default)]
    pub followups: Vec<FollowupSequence>,
}

fn default_debounce_secs() -> u64 {
    30
}

impl BotConfig {
    pub(crate) fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    pub(crate) fn followup(&self, name: &str) -> Option<&FollowupSequence> {
        self.followups.iter().find(|seq| seq.name == name)
    }
}

/// User-facing apology strings. `{status}` is replaced with the run status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Templates {
    #[serde(default = "default_run_failed")]
    pub run_failed: String,
    #[serde(default = "default_run_timeout")]
    pub run_timeout: String,
    #[serde(default = "default_run_trouble")]
    pub run_trouble: String,
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            run_failed: default_run_failed(),
            run_timeout: default_run_timeout(),
            run_trouble: default_run_trouble(),
        }
    }
}

impl Templates {
    pub(crate) fn failed(&self, status: &str) -> String {
        self.run_failed.replace("{status}", status)
    }
}

fn default_run_failed() -> String {
    "I'm sorry, I couldn't process that request (run {status}). Please try again.".to_owned()
}

fn default_run_timeout() -> String {
    "I'm sorry, this is taking longer than expected. Please try again in a moment.".to_owned()
}

fn default_run_trouble() -> String {
    "I'm sorry, I'm having trouble completing this task right now. Please try again later."
        .to_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum TriggerAction {
    AssignEmployee,
    ScheduleFollowup,
    AddTags,
    RemoveTags,
}

/// Substring of a sent reply part that fires a fixed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct TriggerRule {
    pub phrase: String,
    pub action: TriggerAction,
    /// Follow-up sequence name for `schedule_followup`.
    #[serde(default)]
    pub sequence: Option<String>,
    /// Tags for `add_tags`/`remove_tags`; extra tags for `assign_employee`.
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct FollowupSequence {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<FollowupStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct FollowupStep {
    pub after_secs: u64,
    pub message: String,
}

impl Config {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub(crate) fn bot(&self, id: &str) -> Option<&BotConfig> {
        self.bots.iter().find(|bot| bot.id == id)
    }

    /// Resolve config path: check arg, then default locations.
    pub(crate) fn find_config_path(explicit: Option<&str>) -> PathBuf {
        if let Some(p) = explicit {
            return PathBuf::from(p);
        }

        let local = PathBuf::from("parley.toml");
        if local.exists() {
            return local;
        }

        if let Ok(config_dir) = std::env::var("XDG_CONFIG_HOME") {
            let xdg = PathBuf::from(config_dir).join("parley/parley.toml");
            if xdg.exists() {
                return xdg;
            }
        }

        if let Ok(home) = std::env::var("HOME") {
            let home_config = PathBuf::from(home).join(".config/parley/parley.toml");
            if home_config.exists() {
                return home_config;
            }
        }

        local
    }
}
