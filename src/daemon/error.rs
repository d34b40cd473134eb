//! Error types for the daemon-facing protocol server.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the protocol server and its components.
///
/// Everything here is returned directly to the caller; nothing is swallowed.
/// Prompt timeout is deliberately absent: it is a defined fallback path, not
/// a failure.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// The configured listen address is empty or malformed.
    #[error("invalid listen address: {0}")]
    InvalidListenAddress(String),

    /// A rule target was requested whose backing connection field is absent.
    #[error("{target} unavailable for this connection")]
    TargetUnavailable {
        /// Operand label of the unavailable target.
        target: &'static str,
    },

    /// A rule mutation carried an invalid payload.
    #[error("invalid rule: {0}")]
    InvalidRule(String),

    /// No rule with the given name exists for the node.
    #[error("rule {name} not found for node {node_id}")]
    RuleNotFound {
        /// Rule name looked up.
        name: String,
        /// Node the lookup was scoped to.
        node_id: String,
    },

    /// No pending prompt with the given id exists.
    #[error("prompt {0} not found")]
    PromptNotFound(Uuid),

    /// The prompt's response slot was already filled.
    #[error("prompt {0} already resolved")]
    PromptAlreadyResolved(Uuid),

    /// The node has no live notification session.
    #[error("node {0} not connected")]
    NotConnected(String),

    /// The node's bounded outbound queue is full; the mutation is refused
    /// rather than blocking the caller.
    #[error("notification buffer full for node {0}")]
    NotifyBufferFull(String),

    /// The caller's own context ended while a prompt was pending.
    #[error("prompt cancelled by caller")]
    PromptCancelled,

    /// TLS material could not be loaded or is unusable.
    #[error("tls configuration: {0}")]
    Tls(String),

    /// A wire frame could not be encoded or decoded.
    #[error("wire codec: {0}")]
    Wire(#[from] bincode::Error),

    /// An inbound frame exceeded the configured maximum size.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Declared frame size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A setting could not be validated or persisted.
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    /// Transport-level failure (bind, accept, read, write).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
