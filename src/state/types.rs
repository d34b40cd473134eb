//! Value types held by the state store.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Health of a daemon connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeStatus {
    /// Never heard from, or status could not be determined.
    #[default]
    Unknown,
    /// The daemon closed its notification stream cleanly.
    Disconnected,
    /// The daemon has connected but not finished subscribing.
    Connecting,
    /// The daemon is subscribed and answering pings.
    Ready,
    /// The last interaction with the daemon failed.
    Error,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            NodeStatus::Unknown => "unknown",
            NodeStatus::Disconnected => "disconnected",
            NodeStatus::Connecting => "connecting",
            NodeStatus::Ready => "ready",
            NodeStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// A daemon endpoint tracked by the console.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    /// Stable key derived from the transport peer address.
    pub id: String,
    /// Display name reported by the daemon.
    pub name: String,
    /// Peer address as seen by the listener.
    pub address: String,
    /// Daemon version string.
    pub version: String,
    /// Whether the daemon reports its interception as running.
    pub firewall_enabled: bool,
    /// Connection health.
    pub status: NodeStatus,
    /// Last time any RPC arrived from this node.
    pub last_seen: Option<DateTime<Utc>>,
    /// Short status message ("subscribed", "last ping", an error, ...).
    pub message: String,
}

/// One labelled counter in a telemetry breakdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatBucket {
    /// Bucket label (host, port, or executable path).
    pub label: String,
    /// Event count for the bucket.
    pub value: u64,
}

/// Telemetry snapshot from the most recent ping. Exactly one is retained
/// store-wide, tagged with the node it came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    /// Node the snapshot came from.
    pub node_id: String,
    /// Display name of that node at ping time.
    pub node_name: String,
    /// Daemon version string.
    pub daemon_version: String,
    /// Rule count reported by the daemon (kept in sync with rule mutations).
    pub rules: u64,
    /// Total connections observed.
    pub connections: u64,
    /// Connections accepted.
    pub accepted: u64,
    /// Connections dropped.
    pub dropped: u64,
    /// Connections ignored.
    pub ignored: u64,
    /// Rule match count.
    pub rule_hits: u64,
    /// Rule miss count.
    pub rule_misses: u64,
    /// Top destinations by host.
    pub top_dest_hosts: Vec<StatBucket>,
    /// Top destinations by port.
    pub top_dest_ports: Vec<StatBucket>,
    /// Top source executables.
    pub top_executables: Vec<StatBucket>,
    /// When the snapshot was stored.
    pub updated_at: Option<DateTime<Utc>>,
}

/// A daemon alert entry shown in the console.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Alert {
    /// Daemon-assigned alert id.
    pub id: String,
    /// Node the alert came from.
    pub node_id: String,
    /// Alert body.
    pub text: String,
    /// Priority label.
    pub priority: String,
    /// Alert type label.
    pub kind: String,
    /// Action label.
    pub action: String,
    /// When the alert was stored.
    pub created_at: Option<DateTime<Utc>>,
}

/// A boolean-matching expression node in a rule. A leaf has no children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOperator {
    /// Operator type ("simple", "list", "regexp", ...).
    pub kind: String,
    /// Connection attribute the operator matches ("process.path", ...).
    pub operand: String,
    /// Value to match against.
    pub data: String,
    /// Whether the matched data is sensitive (masked in displays).
    pub sensitive: bool,
    /// Ordered child operators for compound expressions.
    pub children: Vec<RuleOperator>,
}

/// A daemon rule entry, keyed for lookup by (node id, name).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rule {
    /// Owning node.
    pub node_id: String,
    /// Rule name, unique per node by caller contract.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Verdict applied on match ("allow", "deny", "reject").
    pub action: String,
    /// Rule lifetime ("once", "until-restart", "always").
    pub duration: String,
    /// Whether the daemon evaluates the rule.
    pub enabled: bool,
    /// Whether the rule takes precedence over later rules.
    pub precedence: bool,
    /// Whether matches are excluded from the daemon's event log.
    pub no_log: bool,
    /// Creation time, when known.
    pub created_at: Option<DateTime<Utc>>,
    /// Matching expression tree.
    pub operator: RuleOperator,
}

/// Immutable description of a candidate outbound connection awaiting a
/// decision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connection {
    /// Transport protocol ("tcp", "udp", ...).
    pub protocol: String,
    /// Source IP.
    pub src_ip: String,
    /// Source port.
    pub src_port: u32,
    /// Destination IP.
    pub dst_ip: String,
    /// Destination hostname, when resolved.
    pub dst_host: String,
    /// Destination port.
    pub dst_port: u32,
    /// Owning user id.
    pub user_id: u32,
    /// Owning process id.
    pub process_id: u32,
    /// Absolute path of the owning process.
    pub process_path: String,
    /// Working directory of the owning process.
    pub process_cwd: String,
    /// Full argument vector of the owning process.
    pub process_args: Vec<String>,
    /// Checksums of the process binary, keyed by algorithm.
    pub process_checksums: HashMap<String, String>,
}

/// A pending request from a daemon for an allow-or-deny decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Unique id for this request.
    pub id: Uuid,
    /// Node that asked.
    pub node_id: String,
    /// Display name of that node.
    pub node_name: String,
    /// The connection awaiting a verdict.
    pub connection: Connection,
    /// When the daemon asked.
    pub requested_at: DateTime<Utc>,
    /// When the automatic decision fires unless the prompt is paused.
    pub expires_at: DateTime<Utc>,
    /// Whether the timeout clock is suspended.
    pub paused: bool,
    /// Time left on the clock; populated only while paused.
    pub remaining: Option<Duration>,
}

/// User preferences consumed by the prompt fallback path and the renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Verdict applied when a prompt times out.
    pub default_prompt_action: String,
    /// Lifetime of a timeout-generated rule.
    pub default_prompt_duration: String,
    /// Preferred rule target for automatic decisions.
    pub default_prompt_target: String,
    /// How long a prompt waits before the automatic decision.
    pub prompt_timeout: Duration,
    /// Whether alerts interrupt the active view.
    pub alerts_interrupt: bool,
    /// Whether inspecting a prompt pauses its timeout clock.
    pub pause_prompt_on_inspect: bool,
    /// Directory holding YARA rules for prompt enrichment.
    pub yara_rule_dir: String,
    /// Whether YARA scanning is enabled.
    pub yara_enabled: bool,
    /// Preferred color palette.
    pub theme_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_prompt_action: crate::config::DEFAULT_PROMPT_ACTION.to_string(),
            default_prompt_duration: crate::config::DEFAULT_PROMPT_DURATION.to_string(),
            default_prompt_target: crate::config::DEFAULT_PROMPT_TARGET.to_string(),
            prompt_timeout: Duration::from_secs(crate::config::DEFAULT_PROMPT_TIMEOUT_SECS),
            alerts_interrupt: true,
            pause_prompt_on_inspect: true,
            yara_rule_dir: String::new(),
            yara_enabled: false,
            theme_name: crate::config::DEFAULT_THEME.to_string(),
        }
    }
}

/// A fully independent, point-in-time copy of all store state.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Known daemon nodes.
    pub nodes: Vec<Node>,
    /// Latest telemetry snapshot.
    pub stats: Stats,
    /// Alert history, newest first.
    pub alerts: Vec<Alert>,
    /// Rules per node id.
    pub rules: HashMap<String, Vec<Rule>>,
    /// Pending prompts in request order.
    pub prompts: Vec<Prompt>,
    /// Current settings.
    pub settings: Settings,
    /// Last user-visible error, empty when none.
    pub last_error: String,
    /// When the last error was recorded.
    pub last_error_at: Option<DateTime<Utc>>,
}
