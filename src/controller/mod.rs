//! Capability interfaces consumed by the rendering layer.
//!
//! The terminal views depend only on these traits, never on the concrete
//! protocol server or settings manager, so they can be exercised against
//! recording fakes in tests.

use std::time::Duration;

use uuid::Uuid;

use crate::daemon::DaemonError;
use crate::state::Rule;

/// Verdict a rule applies on match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptAction {
    /// Let the connection proceed.
    Allow,
    /// Drop the connection silently.
    #[default]
    Deny,
    /// Reject the connection with an error to the caller.
    Reject,
}

impl PromptAction {
    /// Parses a label, mapping anything unknown to the fail-safe default.
    pub fn normalize(value: &str) -> Self {
        match value {
            "allow" => Self::Allow,
            "deny" => Self::Deny,
            "reject" => Self::Reject,
            _ => Self::Deny,
        }
    }

    /// Canonical label used on rules and in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Reject => "reject",
        }
    }
}

/// Lifetime of a rule created from a prompt decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptDuration {
    /// Apply to this connection only.
    #[default]
    Once,
    /// Keep until the daemon restarts.
    UntilRestart,
    /// Persist permanently.
    Always,
}

impl PromptDuration {
    /// Parses a label, mapping anything unknown to the least persistent value.
    pub fn normalize(value: &str) -> Self {
        match value {
            "once" => Self::Once,
            "until-restart" => Self::UntilRestart,
            "always" => Self::Always,
            _ => Self::Once,
        }
    }

    /// Canonical label used on rules and in configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::UntilRestart => "until-restart",
            Self::Always => "always",
        }
    }
}

/// Which connection attribute a decision's rule should match against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTarget {
    /// Absolute path of the owning process.
    ProcessPath,
    /// Full command line of the owning process.
    ProcessCommand,
    /// Owning process id.
    ProcessId,
    /// Owning user id.
    UserId,
    /// Destination IP address.
    DestinationIp,
    /// Destination hostname.
    DestinationHost,
    /// Destination port.
    DestinationPort,
}

impl PromptTarget {
    /// Parses an operand label. Unknown labels yield `None`; callers decide
    /// between a configured default and availability fallback.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "process.path" => Some(Self::ProcessPath),
            "process.command" => Some(Self::ProcessCommand),
            "process.id" => Some(Self::ProcessId),
            "user.id" => Some(Self::UserId),
            "dest.ip" => Some(Self::DestinationIp),
            "dest.host" => Some(Self::DestinationHost),
            "dest.port" => Some(Self::DestinationPort),
            _ => None,
        }
    }

    /// Operand label carried on the generated rule operator.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessPath => "process.path",
            Self::ProcessCommand => "process.command",
            Self::ProcessId => "process.id",
            Self::UserId => "user.id",
            Self::DestinationIp => "dest.ip",
            Self::DestinationHost => "dest.host",
            Self::DestinationPort => "dest.port",
        }
    }
}

impl std::fmt::Display for PromptTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A human or automatic decision for one pending prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptDecision {
    /// Verdict.
    pub action: PromptAction,
    /// Rule lifetime.
    pub duration: PromptDuration,
    /// Requested rule target; `None` selects the best available one.
    pub target: Option<PromptTarget>,
}

/// CRUD operations for daemon rules.
pub trait RuleManager: Send + Sync {
    /// Enables a rule and notifies the owning daemon.
    fn enable_rule(&self, node_id: &str, rule_name: &str) -> Result<(), DaemonError>;
    /// Disables a rule and notifies the owning daemon.
    fn disable_rule(&self, node_id: &str, rule_name: &str) -> Result<(), DaemonError>;
    /// Deletes a rule and notifies the owning daemon.
    fn delete_rule(&self, node_id: &str, rule_name: &str) -> Result<(), DaemonError>;
    /// Replaces a rule wholesale, keyed by its previous name.
    fn change_rule(&self, node_id: &str, previous_name: &str, rule: Rule)
        -> Result<(), DaemonError>;
}

/// Operations on pending prompts.
pub trait PromptManager: Send + Sync {
    /// Resolves a prompt with an explicit decision.
    fn resolve_prompt(&self, prompt_id: Uuid, decision: PromptDecision)
        -> Result<(), DaemonError>;
    /// Suspends a prompt's timeout clock.
    fn pause_prompt(&self, prompt_id: Uuid) -> Result<(), DaemonError>;
    /// Restarts a paused prompt's timeout clock with its remaining time.
    fn resume_prompt(&self, prompt_id: Uuid) -> Result<(), DaemonError>;
}

/// Persisted-settings mutations offered to the settings view.
pub trait SettingsStore: Send + Sync {
    /// Sets the preferred color palette; returns the normalized name.
    fn set_theme(&self, name: &str) -> Result<String, DaemonError>;
    /// Sets the default prompt action; returns the normalized label.
    fn set_default_prompt_action(&self, action: &str) -> Result<String, DaemonError>;
    /// Sets the default prompt duration; returns the normalized label.
    fn set_default_prompt_duration(&self, duration: &str) -> Result<String, DaemonError>;
    /// Sets the default prompt target; returns the normalized label.
    fn set_default_prompt_target(&self, target: &str) -> Result<String, DaemonError>;
    /// Sets the prompt timeout; returns the clamped value.
    fn set_prompt_timeout(&self, timeout: Duration) -> Result<Duration, DaemonError>;
    /// Toggles whether alerts interrupt the active view.
    fn set_alerts_interrupt(&self, enabled: bool) -> Result<bool, DaemonError>;
    /// Toggles pausing the prompt clock while inspecting.
    fn set_pause_prompt_on_inspect(&self, enabled: bool) -> Result<bool, DaemonError>;
    /// Sets the YARA rule directory (must exist when non-empty).
    fn set_yara_rule_dir(&self, path: &str) -> Result<String, DaemonError>;
    /// Toggles YARA scanning.
    fn set_yara_enabled(&self, enabled: bool) -> Result<bool, DaemonError>;
}
