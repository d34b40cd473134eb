//! Wire protocol between daemons and the console.
//!
//! One framed, bidirectional socket per daemon carries every operation.
//! Frames are length-prefixed bincode:
//!
//! ```text
//! [4 bytes: message length (big-endian u32)]
//! [N bytes: bincode-serialized message]
//! ```
//!
//! Inbound frames are dispatched concurrently by the connection task; all
//! outbound frames funnel through one writer task, which keeps per-node
//! notification delivery in send order.

use std::collections::HashMap;
use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::error::DaemonError;

/// Default maximum frame size (32 MB, matching daemon bulk rule dumps).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 32 * 1024 * 1024;

/// Kind of rule mutation pushed to a daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    /// Start evaluating the carried rule.
    EnableRule,
    /// Stop evaluating the carried rule.
    DisableRule,
    /// Forget the carried rule.
    DeleteRule,
    /// Replace the carried rule wholesale.
    ChangeRule,
}

/// A rule mutation pushed to the owning daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Monotonic notification id.
    pub id: u64,
    /// Mutation kind.
    pub kind: NotificationKind,
    /// Name of this console.
    pub server_name: String,
    /// Target node id.
    pub node_id: String,
    /// Rules the mutation applies to.
    pub rules: Vec<Rule>,
}

/// Matching expression node as carried on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    /// Operator type ("simple", "list", ...).
    pub kind: String,
    /// Connection attribute matched.
    pub operand: String,
    /// Value matched against.
    pub data: String,
    /// Whether the data is sensitive.
    pub sensitive: bool,
    /// Child operators for compound expressions.
    pub children: Vec<Operator>,
}

/// Rule as carried on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Verdict label.
    pub action: String,
    /// Lifetime label.
    pub duration: String,
    /// Whether the daemon evaluates the rule.
    pub enabled: bool,
    /// Whether the rule takes precedence.
    pub precedence: bool,
    /// Whether matches skip the event log.
    pub no_log: bool,
    /// Creation time as a unix timestamp, zero when unknown.
    pub created: i64,
    /// Matching expression.
    pub operator: Operator,
}

/// Candidate connection awaiting a verdict, as carried on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// Transport protocol.
    pub protocol: String,
    /// Source IP.
    pub src_ip: String,
    /// Source port.
    pub src_port: u32,
    /// Destination IP.
    pub dst_ip: String,
    /// Destination hostname.
    pub dst_host: String,
    /// Destination port.
    pub dst_port: u32,
    /// Owning user id.
    pub user_id: u32,
    /// Owning process id.
    pub process_id: u32,
    /// Process path.
    pub process_path: String,
    /// Process working directory.
    pub process_cwd: String,
    /// Process argument vector.
    pub process_args: Vec<String>,
    /// Process binary checksums by algorithm.
    pub process_checksums: HashMap<String, String>,
}

/// Telemetry payload carried in a ping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    /// Daemon version.
    pub daemon_version: String,
    /// Rule count.
    pub rules: u64,
    /// Total connections.
    pub connections: u64,
    /// Accepted connections.
    pub accepted: u64,
    /// Dropped connections.
    pub dropped: u64,
    /// Ignored connections.
    pub ignored: u64,
    /// Rule hits.
    pub rule_hits: u64,
    /// Rule misses.
    pub rule_misses: u64,
    /// Event counts by destination host.
    pub by_host: HashMap<String, u64>,
    /// Event counts by destination port.
    pub by_port: HashMap<String, u64>,
    /// Event counts by executable.
    pub by_executable: HashMap<String, u64>,
}

/// Alert payload posted by a daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Alert {
    /// Daemon-assigned id.
    pub id: u64,
    /// Alert body.
    pub text: String,
    /// Priority label.
    pub priority: String,
    /// Type label.
    pub kind: String,
    /// Action label.
    pub action: String,
}

/// Identity and rule inventory a daemon presents when subscribing; the
/// console echoes it back with its own name and version substituted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client-chosen exchange id.
    pub id: u64,
    /// Daemon (or console, in the echo) display name.
    pub name: String,
    /// Daemon (or console) version.
    pub version: String,
    /// Whether interception is running.
    pub is_firewall_running: bool,
    /// Opaque daemon configuration blob.
    pub config: String,
    /// Daemon log level.
    pub log_level: u32,
    /// Current rule inventory.
    pub rules: Vec<Rule>,
}

/// Messages a daemon sends to the console.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DaemonMessage {
    /// Register this daemon and replace its rule inventory.
    Subscribe(ClientConfig),
    /// Telemetry heartbeat.
    Ping {
        /// Exchange id echoed in the reply.
        id: u64,
        /// Telemetry payload.
        stats: Stats,
    },
    /// Open the notification stream on this connection.
    Notifications,
    /// Acknowledge a pushed notification.
    NotificationReply {
        /// Id of the acknowledged notification.
        id: u64,
        /// Whether the daemon applied the mutation.
        success: bool,
        /// Daemon-side detail on failure.
        message: String,
    },
    /// Record an alert.
    PostAlert(Alert),
    /// Ask for a verdict on a connection; the reply may take up to the
    /// configured prompt timeout.
    AskRule {
        /// Exchange id echoed in the reply.
        id: u64,
        /// The connection awaiting a verdict.
        connection: Connection,
    },
}

/// Messages the console sends to a daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConsoleMessage {
    /// Subscribe echo carrying the console's identity.
    SubscribeReply(ClientConfig),
    /// Ping acknowledgement.
    PingReply {
        /// Echoed exchange id.
        id: u64,
    },
    /// Alert acknowledgement.
    AlertReply {
        /// Echoed alert id.
        id: u64,
    },
    /// Verdict for an earlier ask-rule exchange.
    RuleReply {
        /// Echoed exchange id.
        id: u64,
        /// The decided rule.
        rule: Rule,
    },
    /// A pushed rule mutation.
    Notification(Notification),
}

/// Reads one length-prefixed frame and decodes it.
///
/// Returns `Ok(None)` on a clean end-of-stream at a frame boundary.
pub async fn read_frame<R, T>(reader: &mut R, max_bytes: usize) -> Result<Option<T>, DaemonError>
where
    R: AsyncReadExt + Unpin,
    T: serde::de::DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max_bytes {
        return Err(DaemonError::FrameTooLarge {
            size: len,
            max: max_bytes,
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(bincode::deserialize(&buf)?))
}

/// Encodes a message and writes it as one length-prefixed frame.
pub async fn write_frame<W, T>(writer: &mut W, msg: &T, max_bytes: usize) -> Result<(), DaemonError>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let data = bincode::serialize(msg)?;
    if data.len() > max_bytes {
        return Err(DaemonError::FrameTooLarge {
            size: data.len(),
            max: max_bytes,
        });
    }
    writer.write_all(&(data.len() as u32).to_be_bytes()).await?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_round_trip() {
        let msg = DaemonMessage::AskRule {
            id: 9,
            connection: Connection {
                protocol: "tcp".to_string(),
                dst_host: "example.com".to_string(),
                dst_port: 443,
                process_path: "/usr/bin/curl".to_string(),
                ..Connection::default()
            },
        };

        let mut buf = Vec::new();
        write_frame(&mut buf, &msg, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap();

        let mut reader = buf.as_slice();
        let decoded: DaemonMessage = read_frame(&mut reader, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap()
            .expect("one frame");
        match decoded {
            DaemonMessage::AskRule { id, connection } => {
                assert_eq!(id, 9);
                assert_eq!(connection.dst_host, "example.com");
                assert_eq!(connection.process_path, "/usr/bin/curl");
            }
            other => panic!("unexpected message {other:?}"),
        }

        // Stream exhausted at a frame boundary reads as clean EOF.
        let next: Option<DaemonMessage> = read_frame(&mut reader, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected_both_ways() {
        let msg = ConsoleMessage::Notification(Notification {
            id: 1,
            kind: NotificationKind::ChangeRule,
            server_name: "x".repeat(512),
            node_id: String::new(),
            rules: Vec::new(),
        });

        let mut buf = Vec::new();
        assert!(matches!(
            write_frame(&mut buf, &msg, 64).await,
            Err(DaemonError::FrameTooLarge { .. })
        ));

        // A declared length beyond the limit is refused before allocation.
        let mut bogus = Vec::new();
        bogus.extend_from_slice(&(1024u32).to_be_bytes());
        bogus.extend_from_slice(&[0u8; 16]);
        let mut reader = bogus.as_slice();
        let result: Result<Option<DaemonMessage>, _> = read_frame(&mut reader, 64).await;
        assert!(matches!(result, Err(DaemonError::FrameTooLarge { .. })));
    }
}
