//! Persisted configuration.
//!
//! One TOML file holds the listener address, TLS material, prompt defaults,
//! presentation preferences, YARA enrichment settings, and the bootstrap list
//! of known daemon addresses. Unknown labels normalize to their defaults on
//! load; the prompt timeout clamps to a sane range.

mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::{default_path, load, save, USER_CONFIG_DIR, USER_CONFIG_FILE};
pub use schema::{
    Config, PromptConfig, ServerConfig, TlsConfig, UiConfig, YaraConfig, DEFAULT_PROMPT_ACTION,
    DEFAULT_PROMPT_DURATION, DEFAULT_PROMPT_TARGET, DEFAULT_PROMPT_TIMEOUT_SECS, DEFAULT_THEME,
    MAX_PROMPT_TIMEOUT_SECS, MIN_PROMPT_TIMEOUT_SECS,
};
