//! Configuration schema definitions.
//!
//! One TOML file holds everything the console persists: listener and TLS
//! setup, prompt defaults, presentation preferences, and the bootstrap list
//! of known daemon addresses. Every field has a default, so an empty or
//! missing file yields a working configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use crate::controller::{PromptAction, PromptDuration, PromptTarget};
use crate::state::Settings;

/// Verdict applied when a prompt times out unresolved.
pub const DEFAULT_PROMPT_ACTION: &str = "deny";

/// Lifetime of a timeout-generated rule.
pub const DEFAULT_PROMPT_DURATION: &str = "once";

/// Connection attribute a timeout-generated rule matches on.
pub const DEFAULT_PROMPT_TARGET: &str = "process.path";

/// How long a prompt waits before the automatic decision.
pub const DEFAULT_PROMPT_TIMEOUT_SECS: u64 = 30;

/// Shortest allowed prompt timeout.
pub const MIN_PROMPT_TIMEOUT_SECS: u64 = 5;

/// Longest allowed prompt timeout.
pub const MAX_PROMPT_TIMEOUT_SECS: u64 = 600;

/// Default color palette.
pub const DEFAULT_THEME: &str = "midnight";

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// TLS material for the listener.
    #[serde(default)]
    pub tls: TlsConfig,

    /// Prompt defaults.
    #[serde(default)]
    pub prompts: PromptConfig,

    /// Presentation preferences.
    #[serde(default)]
    pub ui: UiConfig,

    /// YARA enrichment settings.
    #[serde(default)]
    pub yara: YaraConfig,

    /// Known daemon addresses, shown as disconnected placeholders until the
    /// daemon subscribes.
    #[serde(default)]
    pub nodes: Vec<String>,
}

impl Config {
    /// Clamps and normalizes every value in place. Unknown labels fall back
    /// to their defaults rather than failing the load.
    pub fn normalize(&mut self) {
        self.prompts.normalize();
        if self.ui.theme.trim().is_empty() {
            self.ui.theme = DEFAULT_THEME.to_string();
        }
        if self.server.listen_addr.trim().is_empty() {
            self.server.listen_addr = ServerConfig::default().listen_addr;
        }
    }

    /// Validates the bootstrap node list.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for addr in &self.nodes {
            if !valid_node_addr(addr) {
                return Err(ConfigError::InvalidValue {
                    field: "nodes".to_string(),
                    message: format!("expected unix://<path> or host:port, got {addr}"),
                });
            }
        }
        Ok(())
    }

    /// Runtime settings derived from the persisted preferences.
    pub fn settings(&self) -> Settings {
        Settings {
            default_prompt_action: self.prompts.default_action.clone(),
            default_prompt_duration: self.prompts.default_duration.clone(),
            default_prompt_target: self.prompts.default_target.clone(),
            prompt_timeout: Duration::from_secs(self.prompts.timeout_secs),
            alerts_interrupt: self.ui.alerts_interrupt,
            pause_prompt_on_inspect: self.ui.pause_prompt_on_inspect,
            yara_rule_dir: self.yara.rule_dir.clone(),
            yara_enabled: self.yara.enabled,
            theme_name: self.ui.theme.clone(),
        }
    }
}

/// Listener settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address: `unix://<path>` or `host:port`.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Name announced to subscribing daemons.
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Depth of each node's outbound notification queue.
    #[serde(default = "default_notify_queue_depth")]
    pub notify_queue_depth: usize,

    /// Alert history length.
    #[serde(default = "default_max_alerts")]
    pub max_alerts: usize,

    /// Seconds before a surfaced error clears itself.
    #[serde(default = "default_error_ttl_secs")]
    pub error_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            name: default_server_name(),
            notify_queue_depth: default_notify_queue_depth(),
            max_alerts: default_max_alerts(),
            error_ttl_secs: default_error_ttl_secs(),
        }
    }
}

/// TLS material for the listener. All empty disables TLS.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TlsConfig {
    /// PEM server certificate chain.
    #[serde(default)]
    pub cert_file: Option<PathBuf>,

    /// PEM private key.
    #[serde(default)]
    pub key_file: Option<PathBuf>,

    /// PEM CA bundle for verifying daemon client certificates.
    #[serde(default)]
    pub client_ca_file: Option<PathBuf>,
}

/// Prompt defaults, applied when a prompt times out unresolved.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptConfig {
    /// Verdict label.
    #[serde(default = "default_action")]
    pub default_action: String,

    /// Lifetime label.
    #[serde(default = "default_duration")]
    pub default_duration: String,

    /// Rule target label.
    #[serde(default = "default_target")]
    pub default_target: String,

    /// Prompt timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl PromptConfig {
    fn normalize(&mut self) {
        self.default_action = PromptAction::normalize(&self.default_action)
            .as_str()
            .to_string();
        self.default_duration = PromptDuration::normalize(&self.default_duration)
            .as_str()
            .to_string();
        self.default_target = PromptTarget::parse(&self.default_target)
            .unwrap_or(PromptTarget::ProcessPath)
            .as_str()
            .to_string();
        self.timeout_secs = self
            .timeout_secs
            .clamp(MIN_PROMPT_TIMEOUT_SECS, MAX_PROMPT_TIMEOUT_SECS);
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            default_action: default_action(),
            default_duration: default_duration(),
            default_target: default_target(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Presentation preferences.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UiConfig {
    /// Color palette name.
    #[serde(default = "default_theme")]
    pub theme: String,

    /// Whether alerts interrupt the active view.
    #[serde(default = "default_true")]
    pub alerts_interrupt: bool,

    /// Whether inspecting a prompt pauses its timeout clock.
    #[serde(default = "default_true")]
    pub pause_prompt_on_inspect: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            alerts_interrupt: true,
            pause_prompt_on_inspect: true,
        }
    }
}

/// YARA enrichment settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct YaraConfig {
    /// Directory holding YARA rule files. Empty disables scanning.
    #[serde(default)]
    pub rule_dir: String,

    /// Whether scanning is enabled.
    #[serde(default)]
    pub enabled: bool,
}

fn valid_node_addr(addr: &str) -> bool {
    let addr = addr.trim();
    if let Some(path) = addr.strip_prefix("unix://") {
        return !path.is_empty();
    }
    !addr.is_empty() && addr.contains(':')
}

fn default_listen_addr() -> String {
    "127.0.0.1:50051".to_string()
}

fn default_server_name() -> String {
    "firewatch".to_string()
}

fn default_notify_queue_depth() -> usize {
    8
}

fn default_max_alerts() -> usize {
    100
}

fn default_error_ttl_secs() -> u64 {
    10
}

fn default_action() -> String {
    DEFAULT_PROMPT_ACTION.to_string()
}

fn default_duration() -> String {
    DEFAULT_PROMPT_DURATION.to_string()
}

fn default_target() -> String {
    DEFAULT_PROMPT_TARGET.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_PROMPT_TIMEOUT_SECS
}

fn default_theme() -> String {
    DEFAULT_THEME.to_string()
}

fn default_true() -> bool {
    true
}
