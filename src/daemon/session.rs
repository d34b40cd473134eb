//! Per-node notification sessions.
//!
//! Each connected node has at most one live outbound notification channel.
//! The registry owns the sending side of every session's bounded queue; the
//! task serving the node's notification stream owns the receiving side and
//! drains it onto the transport. Registering a replacement session drops the
//! old queue's sender, so the old dispatch loop observes end-of-queue and
//! exits cleanly without delivering anything twice.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use super::error::DaemonError;
use super::wire::Notification;

/// Default depth of a session's outbound queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 8;

/// Tracks the single active outbound notification channel per node.
pub struct SessionRegistry {
    entries: Mutex<HashMap<String, Entry>>,
    next_id: AtomicU64,
    queue_depth: usize,
}

struct Entry {
    id: u64,
    tx: mpsc::Sender<Notification>,
}

/// Handle owned by the task draining one node's notification queue.
pub struct Session {
    id: u64,
    node_id: String,
    rx: mpsc::Receiver<Notification>,
}

impl SessionRegistry {
    /// Creates a registry with the given outbound queue depth.
    pub fn new(queue_depth: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_depth: queue_depth.max(1),
        }
    }

    /// Registers a session for a node, replacing and closing any previous one.
    pub fn register(&self, node_id: &str) -> Session {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.lock();
        if let Some(old) = entries.insert(node_id.to_string(), Entry { id, tx }) {
            // Dropping the old sender here closes the old queue; its dispatch
            // loop sees end-of-queue and terminates.
            debug!(node_id, old_session = old.id, "replacing notification session");
        }
        Session {
            id,
            node_id: node_id.to_string(),
            rx,
        }
    }

    /// Removes the registry entry, but only if it still points at the exact
    /// session being unregistered. A stale unregister racing a newer
    /// registration leaves the newer session in place.
    pub fn unregister(&self, session: &Session) {
        let mut entries = self.lock();
        if entries
            .get(&session.node_id)
            .is_some_and(|entry| entry.id == session.id)
        {
            entries.remove(&session.node_id);
        }
    }

    /// Queues a notification for a node without blocking.
    ///
    /// A full queue fails immediately: a slow or dead daemon must never stall
    /// the caller.
    pub fn send(&self, node_id: &str, notification: Notification) -> Result<(), DaemonError> {
        let tx = {
            let entries = self.lock();
            let Some(entry) = entries.get(node_id) else {
                return Err(DaemonError::NotConnected(node_id.to_string()));
            };
            entry.tx.clone()
        };
        tx.try_send(notification).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                DaemonError::NotifyBufferFull(node_id.to_string())
            }
            mpsc::error::TrySendError::Closed(_) => DaemonError::NotConnected(node_id.to_string()),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}

impl Session {
    /// Receives the next queued notification. Returns `None` once this
    /// session's queue is closed (replaced registration or registry drop).
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Node this session belongs to.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::wire::NotificationKind;

    fn notification(id: u64) -> Notification {
        Notification {
            id,
            kind: NotificationKind::EnableRule,
            server_name: "test".to_string(),
            node_id: "node".to_string(),
            rules: Vec::new(),
        }
    }

    #[tokio::test]
    async fn send_reaches_registered_session() {
        let registry = SessionRegistry::default();
        let mut session = registry.register("node");

        registry.send("node", notification(1)).unwrap();
        let got = session.recv().await.unwrap();
        assert_eq!(got.id, 1);
    }

    #[tokio::test]
    async fn replacement_closes_old_queue_and_redirects_sends() {
        let registry = SessionRegistry::default();
        let mut first = registry.register("node");
        registry.send("node", notification(1)).unwrap();

        let mut second = registry.register("node");

        // The old queue still drains what it had, then reports closure: the
        // dispatch loop's exit condition.
        assert_eq!(first.recv().await.map(|n| n.id), Some(1));
        assert!(first.recv().await.is_none());

        // Sends after replacement only ever reach the new session.
        registry.send("node", notification(2)).unwrap();
        assert_eq!(second.recv().await.map(|n| n.id), Some(2));
    }

    #[tokio::test]
    async fn stale_unregister_leaves_newer_session_intact() {
        let registry = SessionRegistry::default();
        let first = registry.register("node");
        let mut second = registry.register("node");

        registry.unregister(&first);

        registry.send("node", notification(7)).unwrap();
        assert_eq!(second.recv().await.map(|n| n.id), Some(7));

        registry.unregister(&second);
        assert!(matches!(
            registry.send("node", notification(8)),
            Err(DaemonError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn full_queue_fails_fast() {
        let registry = SessionRegistry::new(2);
        let _session = registry.register("node");

        registry.send("node", notification(1)).unwrap();
        registry.send("node", notification(2)).unwrap();
        assert!(matches!(
            registry.send("node", notification(3)),
            Err(DaemonError::NotifyBufferFull(_))
        ));
    }

    #[tokio::test]
    async fn send_to_unknown_node_reports_not_connected() {
        let registry = SessionRegistry::default();
        assert!(matches!(
            registry.send("ghost", notification(1)),
            Err(DaemonError::NotConnected(_))
        ));
    }
}
