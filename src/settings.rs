//! Settings persistence.
//!
//! The manager serializes every setting mutation behind one lock: normalize,
//! write the config file, then mirror the result into the state store. A
//! failed write leaves both the file and the store untouched, so observers
//! never see a setting the disk doesn't have.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::info;

use crate::config::{self, Config, ConfigError, MAX_PROMPT_TIMEOUT_SECS, MIN_PROMPT_TIMEOUT_SECS};
use crate::controller::{PromptAction, PromptDuration, PromptTarget, SettingsStore};
use crate::daemon::DaemonError;
use crate::state::Store;

/// Persists setting mutations and mirrors them into the store.
pub struct Manager {
    store: Arc<Store>,
    path: PathBuf,
    config: Mutex<Config>,
}

impl Manager {
    /// Creates a manager over an already-loaded config, mirroring the
    /// initial settings into the store.
    pub fn new(store: Arc<Store>, path: PathBuf, config: Config) -> Self {
        store.set_settings(config.settings());
        Self {
            store,
            path,
            config: Mutex::new(config),
        }
    }

    /// Path the configuration persists to.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Config> {
        self.config.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Applies `mutate` to the config, persists it, and mirrors the result
    /// into the store. The in-memory config only changes if the write
    /// succeeded.
    fn apply(&self, mutate: impl FnOnce(&mut Config)) -> Result<(), DaemonError> {
        let mut guard = self.lock();
        let mut updated = guard.clone();
        mutate(&mut updated);
        config::save(&self.path, &updated)?;
        self.store.set_settings(updated.settings());
        *guard = updated;
        Ok(())
    }
}

impl SettingsStore for Manager {
    fn set_theme(&self, name: &str) -> Result<String, DaemonError> {
        let name = if name.trim().is_empty() {
            config::DEFAULT_THEME.to_string()
        } else {
            name.trim().to_string()
        };
        self.apply(|c| c.ui.theme = name.clone())?;
        info!(theme = %name, "theme changed");
        Ok(name)
    }

    fn set_default_prompt_action(&self, action: &str) -> Result<String, DaemonError> {
        let label = PromptAction::normalize(action).as_str().to_string();
        self.apply(|c| c.prompts.default_action = label.clone())?;
        Ok(label)
    }

    fn set_default_prompt_duration(&self, duration: &str) -> Result<String, DaemonError> {
        let label = PromptDuration::normalize(duration).as_str().to_string();
        self.apply(|c| c.prompts.default_duration = label.clone())?;
        Ok(label)
    }

    fn set_default_prompt_target(&self, target: &str) -> Result<String, DaemonError> {
        let label = PromptTarget::parse(target)
            .unwrap_or(PromptTarget::ProcessPath)
            .as_str()
            .to_string();
        self.apply(|c| c.prompts.default_target = label.clone())?;
        Ok(label)
    }

    fn set_prompt_timeout(&self, timeout: Duration) -> Result<Duration, DaemonError> {
        let secs = timeout
            .as_secs()
            .clamp(MIN_PROMPT_TIMEOUT_SECS, MAX_PROMPT_TIMEOUT_SECS);
        self.apply(|c| c.prompts.timeout_secs = secs)?;
        Ok(Duration::from_secs(secs))
    }

    fn set_alerts_interrupt(&self, enabled: bool) -> Result<bool, DaemonError> {
        self.apply(|c| c.ui.alerts_interrupt = enabled)?;
        Ok(enabled)
    }

    fn set_pause_prompt_on_inspect(&self, enabled: bool) -> Result<bool, DaemonError> {
        self.apply(|c| c.ui.pause_prompt_on_inspect = enabled)?;
        Ok(enabled)
    }

    fn set_yara_rule_dir(&self, path: &str) -> Result<String, DaemonError> {
        let path = path.trim().to_string();
        if !path.is_empty() && !std::path::Path::new(&path).is_dir() {
            return Err(ConfigError::InvalidValue {
                field: "yara.rule_dir".to_string(),
                message: format!("{path} is not a directory"),
            }
            .into());
        }
        self.apply(|c| c.yara.rule_dir = path.clone())?;
        Ok(path)
    }

    fn set_yara_enabled(&self, enabled: bool) -> Result<bool, DaemonError> {
        self.apply(|c| c.yara.enabled = enabled)?;
        Ok(enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn manager(dir: &std::path::Path) -> (Arc<Store>, Manager) {
        let store = Arc::new(Store::new());
        let path = dir.join("config.toml");
        let manager = Manager::new(Arc::clone(&store), path, Config::default());
        (store, manager)
    }

    #[test]
    fn mutations_persist_and_mirror() {
        let dir = tempdir().unwrap();
        let (store, manager) = manager(dir.path());

        assert_eq!(
            manager.set_default_prompt_action("allow").unwrap(),
            "allow"
        );
        assert_eq!(
            manager.set_prompt_timeout(Duration::from_secs(1)).unwrap(),
            Duration::from_secs(5)
        );
        assert_eq!(manager.set_theme("solarized").unwrap(), "solarized");

        let settings = store.snapshot().settings;
        assert_eq!(settings.default_prompt_action, "allow");
        assert_eq!(settings.prompt_timeout, Duration::from_secs(5));
        assert_eq!(settings.theme_name, "solarized");

        // The file agrees with the store.
        let reloaded = config::load(manager.path()).unwrap();
        assert_eq!(reloaded.prompts.default_action, "allow");
        assert_eq!(reloaded.prompts.timeout_secs, 5);
        assert_eq!(reloaded.ui.theme, "solarized");
    }

    #[test]
    fn unknown_labels_normalize_before_persisting() {
        let dir = tempdir().unwrap();
        let (store, manager) = manager(dir.path());

        assert_eq!(
            manager.set_default_prompt_action("obliterate").unwrap(),
            "deny"
        );
        assert_eq!(
            manager.set_default_prompt_duration("forever").unwrap(),
            "once"
        );
        assert_eq!(
            manager.set_default_prompt_target("dest.galaxy").unwrap(),
            "process.path"
        );
        assert_eq!(
            store.snapshot().settings.default_prompt_duration,
            "once"
        );
    }

    #[test]
    fn yara_dir_must_exist() {
        let dir = tempdir().unwrap();
        let (store, manager) = manager(dir.path());

        assert!(matches!(
            manager.set_yara_rule_dir("/nonexistent/rules"),
            Err(DaemonError::Config(_))
        ));
        assert_eq!(store.snapshot().settings.yara_rule_dir, "");

        let rules = dir.path().join("rules");
        std::fs::create_dir(&rules).unwrap();
        let accepted = manager
            .set_yara_rule_dir(rules.to_str().unwrap())
            .unwrap();
        assert_eq!(accepted, rules.to_str().unwrap());

        // Clearing the directory is always allowed.
        assert_eq!(manager.set_yara_rule_dir("").unwrap(), "");
    }

    #[test]
    fn failed_write_leaves_store_untouched() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::new());
        // Config path under a file, so create_dir_all fails.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let manager = Manager::new(
            Arc::clone(&store),
            blocker.join("config.toml"),
            Config::default(),
        );

        assert!(manager.set_theme("solarized").is_err());
        assert_eq!(store.snapshot().settings.theme_name, "midnight");
    }
}
