//! The daemon-facing protocol server.
//!
//! One framed connection per daemon carries every operation. The connection
//! task reads inbound frames and dispatches them; replies and pushed
//! notifications funnel through a single writer task per connection. Each
//! daemon is served independently: a slow or dead peer never stalls another
//! node, and per-request failures stay scoped to their connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::convert;
use super::error::DaemonError;
use super::prompt::PromptCoordinator;
use super::session::{SessionRegistry, DEFAULT_QUEUE_DEPTH};
use super::tls::TlsOptions;
use super::wire::{
    self, ConsoleMessage, DaemonMessage, Notification, NotificationKind, DEFAULT_MAX_FRAME_BYTES,
};
use crate::controller::{PromptDecision, PromptManager, RuleManager};
use crate::state::{Node, NodeStatus, Rule, Store};

/// Depth of the per-connection outbound frame queue. Distinct from the
/// session notification queue: this one backs replies too.
const CONN_WRITE_QUEUE: usize = 32;

/// Configuration for the protocol server.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Listen address: `unix://<path>` or `host:port`.
    pub listen_addr: String,
    /// Name echoed to subscribing daemons and stamped on notifications.
    pub server_name: String,
    /// Version echoed to subscribing daemons.
    pub server_version: String,
    /// Maximum wire frame size in bytes.
    pub max_frame_bytes: usize,
    /// Depth of each node's outbound notification queue.
    pub notify_queue_depth: usize,
    /// Optional TLS material.
    pub tls: TlsOptions,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:50051".to_string(),
            server_name: "firewatch".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            notify_queue_depth: DEFAULT_QUEUE_DEPTH,
            tls: TlsOptions::default(),
        }
    }
}

/// Transport identity of a connected daemon.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Stable node key derived from the peer address.
    pub id: String,
    /// Peer address for display.
    pub address: String,
}

/// Serves daemon connections and exposes the console-side control surface.
pub struct Server {
    store: Arc<Store>,
    opts: ServerOptions,
    sessions: SessionRegistry,
    prompts: PromptCoordinator,
    notify_seq: AtomicU64,
    conn_seq: AtomicU64,
}

impl Server {
    /// Creates a server over the given store.
    pub fn new(store: Arc<Store>, opts: ServerOptions) -> Self {
        Self {
            sessions: SessionRegistry::new(opts.notify_queue_depth),
            prompts: PromptCoordinator::new(Arc::clone(&store)),
            store,
            opts,
            notify_seq: AtomicU64::new(0),
            conn_seq: AtomicU64::new(0),
        }
    }

    /// Server configuration.
    pub fn options(&self) -> &ServerOptions {
        &self.opts
    }

    /// Allocates the peer identity for a newly accepted connection.
    pub(crate) fn peer_for_tcp(&self, addr: std::net::SocketAddr) -> Peer {
        Peer {
            id: format!("tcp://{addr}"),
            address: addr.to_string(),
        }
    }

    /// Unix-domain peers have no address; key them by connection sequence.
    pub(crate) fn peer_for_unix(&self) -> Peer {
        let seq = self.conn_seq.fetch_add(1, Ordering::Relaxed) + 1;
        Peer {
            id: format!("unix://conn-{seq}"),
            address: format!("unix:conn-{seq}"),
        }
    }

    /// Serves one daemon connection until the peer disconnects, the transport
    /// fails, or shutdown is signalled (by dropping the listener, which the
    /// accept loop does).
    pub async fn serve_connection<S>(self: Arc<Self>, stream: S, peer: Peer)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let max_bytes = self.opts.max_frame_bytes;
        let (mut reader, writer) = tokio::io::split(stream);
        let (out_tx, out_rx) = mpsc::channel::<ConsoleMessage>(CONN_WRITE_QUEUE);
        // Flips to true when the connection ends; pending ask-rule waits
        // follow it as their cancellation signal.
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let writer_task = tokio::spawn(write_loop(writer, out_rx, max_bytes));
        info!(node = %peer.id, "daemon connected");

        loop {
            match wire::read_frame::<_, DaemonMessage>(&mut reader, max_bytes).await {
                Ok(Some(msg)) => {
                    if self
                        .dispatch(&peer, msg, &out_tx, &cancel_rx)
                        .await
                        .is_err()
                    {
                        // Writer gone; the transport is dead.
                        self.store.update_node_status(
                            &peer.id,
                            NodeStatus::Error,
                            "connection write failed",
                            Utc::now(),
                        );
                        break;
                    }
                }
                Ok(None) => {
                    info!(node = %peer.id, "daemon disconnected");
                    self.store.update_node_status(
                        &peer.id,
                        NodeStatus::Disconnected,
                        "connection closed",
                        Utc::now(),
                    );
                    break;
                }
                Err(err) => {
                    warn!(node = %peer.id, error = %err, "daemon connection failed");
                    self.store.update_node_status(
                        &peer.id,
                        NodeStatus::Error,
                        &err.to_string(),
                        Utc::now(),
                    );
                    break;
                }
            }
        }

        let _ = cancel_tx.send(true);
        drop(out_tx);
        let _ = writer_task.await;
    }

    async fn dispatch(
        self: &Arc<Self>,
        peer: &Peer,
        msg: DaemonMessage,
        out_tx: &mpsc::Sender<ConsoleMessage>,
        cancel_rx: &watch::Receiver<bool>,
    ) -> Result<(), ()> {
        match msg {
            DaemonMessage::Subscribe(cfg) => {
                let reply = self.handle_subscribe(peer, cfg);
                out_tx
                    .send(ConsoleMessage::SubscribeReply(reply))
                    .await
                    .map_err(|_| ())?;
            }
            DaemonMessage::Ping { id, stats } => {
                self.handle_ping(peer, stats);
                out_tx
                    .send(ConsoleMessage::PingReply { id })
                    .await
                    .map_err(|_| ())?;
            }
            DaemonMessage::PostAlert(alert) => {
                let id = self.handle_post_alert(peer, alert);
                out_tx
                    .send(ConsoleMessage::AlertReply { id })
                    .await
                    .map_err(|_| ())?;
            }
            DaemonMessage::Notifications => {
                self.start_notification_stream(peer, out_tx.clone());
            }
            DaemonMessage::NotificationReply {
                id,
                success,
                message,
            } => {
                if success {
                    debug!(node = %peer.id, notification = id, "notification acknowledged");
                } else {
                    warn!(node = %peer.id, notification = id, message, "daemon rejected notification");
                }
            }
            DaemonMessage::AskRule { id, connection } => {
                let server = Arc::clone(self);
                let peer = peer.clone();
                let out_tx = out_tx.clone();
                let cancel_rx = cancel_rx.clone();
                tokio::spawn(async move {
                    match server.ask_rule(&peer, connection, cancel_rx).await {
                        Ok(rule) => {
                            let reply = ConsoleMessage::RuleReply {
                                id,
                                rule: convert::rule_to_wire(&rule),
                            };
                            let _ = out_tx.send(reply).await;
                        }
                        Err(DaemonError::PromptCancelled) => {}
                        Err(err) => {
                            warn!(node = %peer.id, error = %err, "ask-rule failed");
                        }
                    }
                });
            }
        }
        Ok(())
    }

    /// Registers the daemon and replaces its rule inventory wholesale,
    /// echoing back the console's identity.
    fn handle_subscribe(&self, peer: &Peer, cfg: wire::ClientConfig) -> wire::ClientConfig {
        let now = Utc::now();
        let name = if cfg.name.is_empty() {
            peer.id.clone()
        } else {
            cfg.name.clone()
        };
        self.store.upsert_node(Node {
            id: peer.id.clone(),
            name,
            address: peer.address.clone(),
            version: cfg.version.clone(),
            firewall_enabled: cfg.is_firewall_running,
            status: NodeStatus::Connecting,
            last_seen: Some(now),
            message: "connecting".to_string(),
        });
        self.store.set_rules(
            &peer.id,
            convert::rules_from_wire(cfg.rules.clone(), &peer.id),
        );
        self.store
            .update_node_status(&peer.id, NodeStatus::Ready, "subscribed", now);

        wire::ClientConfig {
            name: self.opts.server_name.clone(),
            version: self.opts.server_version.clone(),
            ..cfg
        }
    }

    /// Marks the node alive and replaces the tracked telemetry snapshot.
    fn handle_ping(&self, peer: &Peer, stats: wire::Stats) {
        self.store
            .update_node_status(&peer.id, NodeStatus::Ready, "last ping", Utc::now());
        let node_name = self.node_display_name(&peer.id);
        self.store
            .set_stats(convert::stats_from_wire(stats, &peer.id, &node_name));
    }

    /// Stores an alert for the peer node. An empty alert is a no-op, not an
    /// error.
    fn handle_post_alert(&self, peer: &Peer, alert: wire::Alert) -> u64 {
        if alert.text.is_empty() {
            return alert.id;
        }
        let id = alert.id;
        self.store.add_alert(convert::alert_from_wire(alert, &peer.id));
        id
    }

    /// Parks the asking daemon on a prompt until resolution, timeout, or
    /// cancellation.
    async fn ask_rule(
        &self,
        peer: &Peer,
        connection: wire::Connection,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<Rule, DaemonError> {
        let timeout = self.store.snapshot().settings.prompt_timeout;
        let node_name = self.node_display_name(&peer.id);
        self.prompts
            .request(
                &peer.id,
                &node_name,
                convert::connection_from_wire(connection),
                timeout,
                cancel_rx,
            )
            .await
    }

    fn start_notification_stream(self: &Arc<Self>, peer: &Peer, out_tx: mpsc::Sender<ConsoleMessage>) {
        let mut session = self.sessions.register(&peer.id);
        let server = Arc::clone(self);
        let node_id = peer.id.clone();
        tokio::spawn(async move {
            debug!(node = %node_id, "notification stream open");
            while let Some(notification) = session.recv().await {
                if out_tx
                    .send(ConsoleMessage::Notification(notification))
                    .await
                    .is_err()
                {
                    server.store.update_node_status(
                        &node_id,
                        NodeStatus::Error,
                        "notification send failed",
                        Utc::now(),
                    );
                    break;
                }
            }
            server.sessions.unregister(&session);
            debug!(node = %node_id, "notification stream closed");
        });
    }

    fn node_display_name(&self, node_id: &str) -> String {
        let snapshot = self.store.snapshot();
        for node in &snapshot.nodes {
            if node.id == node_id {
                if !node.name.is_empty() {
                    return node.name.clone();
                }
                if !node.address.is_empty() {
                    return node.address.clone();
                }
                break;
            }
        }
        node_id.to_string()
    }

    fn lookup_rule(&self, node_id: &str, rule_name: &str) -> Result<Rule, DaemonError> {
        self.store
            .snapshot()
            .rules
            .get(node_id)
            .and_then(|list| list.iter().find(|r| r.name == rule_name).cloned())
            .ok_or_else(|| DaemonError::RuleNotFound {
                name: rule_name.to_string(),
                node_id: node_id.to_string(),
            })
    }

    fn new_notification(
        &self,
        kind: NotificationKind,
        node_id: &str,
        rules: Vec<wire::Rule>,
    ) -> Notification {
        Notification {
            id: self.notify_seq.fetch_add(1, Ordering::Relaxed) + 1,
            kind,
            server_name: self.opts.server_name.clone(),
            node_id: node_id.to_string(),
            rules,
        }
    }

    /// Looks up a rule, pushes a mutation notification, and applies the
    /// mutation to the store only if the push was accepted. A failed push
    /// leaves the store unchanged so the daemon and the store never disagree.
    fn rule_action(
        &self,
        node_id: &str,
        rule_name: &str,
        kind: NotificationKind,
        mutate: impl Fn(&mut Rule),
    ) -> Result<(), DaemonError> {
        let mut rule = self.lookup_rule(node_id, rule_name)?;
        mutate(&mut rule);
        let notification = self.new_notification(kind, node_id, vec![convert::rule_to_wire(&rule)]);
        self.sessions.send(node_id, notification)?;
        self.store.update_rule(node_id, rule_name, mutate);
        Ok(())
    }
}

impl RuleManager for Server {
    fn enable_rule(&self, node_id: &str, rule_name: &str) -> Result<(), DaemonError> {
        self.rule_action(node_id, rule_name, NotificationKind::EnableRule, |rule| {
            rule.enabled = true;
        })
    }

    fn disable_rule(&self, node_id: &str, rule_name: &str) -> Result<(), DaemonError> {
        self.rule_action(node_id, rule_name, NotificationKind::DisableRule, |rule| {
            rule.enabled = false;
        })
    }

    fn delete_rule(&self, node_id: &str, rule_name: &str) -> Result<(), DaemonError> {
        let rule = self.lookup_rule(node_id, rule_name)?;
        let notification = self.new_notification(
            NotificationKind::DeleteRule,
            node_id,
            vec![convert::rule_to_wire(&rule)],
        );
        self.sessions.send(node_id, notification)?;
        self.store.remove_rule(node_id, rule_name);
        Ok(())
    }

    fn change_rule(
        &self,
        node_id: &str,
        previous_name: &str,
        mut rule: Rule,
    ) -> Result<(), DaemonError> {
        if rule.name.trim().is_empty() {
            return Err(DaemonError::InvalidRule("rule name required".to_string()));
        }
        self.lookup_rule(node_id, previous_name)?;
        rule.node_id = node_id.to_string();

        let notification = self.new_notification(
            NotificationKind::ChangeRule,
            node_id,
            vec![convert::rule_to_wire(&rule)],
        );
        self.sessions.send(node_id, notification)?;
        self.store
            .update_rule(node_id, previous_name, |existing| *existing = rule.clone());
        Ok(())
    }
}

impl PromptManager for Server {
    fn resolve_prompt(
        &self,
        prompt_id: Uuid,
        decision: PromptDecision,
    ) -> Result<(), DaemonError> {
        self.prompts.resolve(prompt_id, decision)
    }

    fn pause_prompt(&self, prompt_id: Uuid) -> Result<(), DaemonError> {
        self.prompts.pause(prompt_id)
    }

    fn resume_prompt(&self, prompt_id: Uuid) -> Result<(), DaemonError> {
        self.prompts.resume(prompt_id)
    }
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::Receiver<ConsoleMessage>, max_bytes: usize)
where
    W: AsyncWrite + Unpin,
{
    while let Some(msg) = rx.recv().await {
        if let Err(err) = wire::write_frame(&mut writer, &msg, max_bytes).await {
            warn!(error = %err, "outbound frame failed, closing writer");
            return;
        }
    }
    let _ = writer.shutdown().await;
}
