//! Concurrency-safe container for all shared application state.
//!
//! One reader/writer lock guards the live snapshot and the subscriber table.
//! Critical sections are pure in-memory copy/compare work, so reads never
//! starve behind a write. Every value type in the snapshot owns its data
//! outright, which makes [`Snapshot`] cloning a genuine deep copy: no
//! reference is shared between two snapshots or between a snapshot and the
//! live store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::types::{Alert, Node, NodeStatus, Prompt, Rule, Settings, Snapshot, Stats};

/// Construction-time tunables. The defaults are part of the store's contract;
/// the knobs exist so deployments can widen them.
#[derive(Debug, Clone, Copy)]
pub struct StoreTuning {
    /// Ring-buffer capacity for alert history.
    pub max_alerts: usize,
    /// How long a recorded error stays visible before auto-clearing.
    pub error_ttl: Duration,
}

impl Default for StoreTuning {
    fn default() -> Self {
        Self {
            max_alerts: 100,
            error_ttl: Duration::from_secs(10),
        }
    }
}

/// Guards shared application state read by every view and task.
pub struct Store {
    inner: RwLock<Inner>,
    tuning: StoreTuning,
}

struct Inner {
    snapshot: Snapshot,
    subs: HashMap<u64, mpsc::Sender<()>>,
    next_sub: u64,
}

/// Delivers a coalesced wake-up signal whenever the store mutates.
///
/// The signal channel has capacity one and mutators never block on it, so
/// multiple mutations may merge into a single wake-up. Consumers must re-read
/// [`Store::snapshot`] after waking.
pub struct Subscription {
    id: u64,
    store: Option<Arc<Store>>,
    events: mpsc::Receiver<()>,
}

impl Store {
    /// Creates a store seeded with default values.
    pub fn new() -> Self {
        Self::with_tuning(StoreTuning::default())
    }

    /// Creates a store with explicit tunables.
    pub fn with_tuning(tuning: StoreTuning) -> Self {
        Self {
            inner: RwLock::new(Inner {
                snapshot: Snapshot::default(),
                subs: HashMap::new(),
                next_sub: 0,
            }),
            tuning,
        }
    }

    /// Returns an independent copy of the current application state.
    pub fn snapshot(&self) -> Snapshot {
        self.read().snapshot.clone()
    }

    /// Inserts or updates a node entry.
    ///
    /// Merging never replaces a non-empty field with an empty one
    /// (last-known-good wins), and `firewall_enabled` is sticky once true.
    pub fn upsert_node(&self, node: Node) {
        let mut inner = self.write();
        match inner.snapshot.nodes.iter_mut().find(|n| n.id == node.id) {
            Some(existing) => *existing = merge_nodes(existing.clone(), node),
            None => inner.snapshot.nodes.push(node),
        }
        inner.notify();
    }

    /// Applies a mutation to an existing node. Returns false when absent.
    pub fn update_node(&self, id: &str, mutate: impl FnOnce(&mut Node)) -> bool {
        let mut inner = self.write();
        let Some(node) = inner.snapshot.nodes.iter_mut().find(|n| n.id == id) else {
            return false;
        };
        mutate(node);
        inner.notify();
        true
    }

    /// Sets status, message, and last-seen for a node, creating a placeholder
    /// entry for peers that report status before subscribing.
    pub fn update_node_status(
        &self,
        id: &str,
        status: NodeStatus,
        message: &str,
        last_seen: DateTime<Utc>,
    ) {
        let mut inner = self.write();
        match inner.snapshot.nodes.iter_mut().find(|n| n.id == id) {
            Some(node) => {
                node.status = status;
                if !message.is_empty() {
                    node.message = message.to_string();
                }
                node.last_seen = Some(last_seen);
            }
            None => {
                inner.snapshot.nodes.push(Node {
                    id: id.to_string(),
                    name: id.to_string(),
                    status,
                    message: message.to_string(),
                    last_seen: Some(last_seen),
                    ..Node::default()
                });
            }
        }
        inner.notify();
    }

    /// Replaces the single tracked telemetry snapshot.
    pub fn set_stats(&self, stats: Stats) {
        let mut inner = self.write();
        inner.snapshot.stats = stats;
        inner.notify();
    }

    /// Records a user-visible error and schedules its expiry.
    ///
    /// The spawned task clears the message only if no newer error has replaced
    /// it in the meantime (compared by issue timestamp).
    pub fn set_error(self: &Arc<Self>, message: impl Into<String>) {
        let issued_at = Utc::now();
        {
            let mut inner = self.write();
            inner.snapshot.last_error = message.into();
            inner.snapshot.last_error_at = Some(issued_at);
            inner.notify();
        }

        let store = Arc::clone(self);
        let ttl = self.tuning.error_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            store.expire_error(issued_at);
        });
    }

    /// Removes the currently displayed error, if any.
    pub fn clear_error(&self) {
        let mut inner = self.write();
        if inner.snapshot.last_error.is_empty() {
            return;
        }
        inner.snapshot.last_error.clear();
        inner.snapshot.last_error_at = None;
        inner.notify();
    }

    fn expire_error(&self, issued_at: DateTime<Utc>) {
        let mut inner = self.write();
        if inner.snapshot.last_error.is_empty() {
            return;
        }
        if inner.snapshot.last_error_at != Some(issued_at) {
            return;
        }
        debug!("expiring stale error message");
        inner.snapshot.last_error.clear();
        inner.snapshot.last_error_at = None;
        inner.notify();
    }

    /// Replaces the rule list for a node wholesale.
    pub fn set_rules(&self, node_id: &str, mut rules: Vec<Rule>) {
        let mut inner = self.write();
        for rule in &mut rules {
            rule.node_id = node_id.to_string();
        }
        inner.snapshot.rules.insert(node_id.to_string(), rules);
        inner.sync_rule_count(node_id);
        inner.notify();
    }

    /// Appends a rule entry for the specified node.
    pub fn add_rule(&self, node_id: &str, mut rule: Rule) {
        let mut inner = self.write();
        rule.node_id = node_id.to_string();
        inner
            .snapshot
            .rules
            .entry(node_id.to_string())
            .or_default()
            .push(rule);
        inner.sync_rule_count(node_id);
        inner.notify();
    }

    /// Mutates a rule by (node id, name). Returns false when absent.
    pub fn update_rule(
        &self,
        node_id: &str,
        rule_name: &str,
        mutate: impl FnOnce(&mut Rule),
    ) -> bool {
        let mut inner = self.write();
        let Some(rule) = inner
            .snapshot
            .rules
            .get_mut(node_id)
            .and_then(|list| list.iter_mut().find(|r| r.name == rule_name))
        else {
            return false;
        };
        mutate(rule);
        inner.sync_rule_count(node_id);
        inner.notify();
        true
    }

    /// Removes a rule by (node id, name). Returns false when absent.
    pub fn remove_rule(&self, node_id: &str, rule_name: &str) -> bool {
        let mut inner = self.write();
        let Some(list) = inner.snapshot.rules.get_mut(node_id) else {
            return false;
        };
        let Some(idx) = list.iter().position(|r| r.name == rule_name) else {
            return false;
        };
        list.remove(idx);
        if list.is_empty() {
            inner.snapshot.rules.remove(node_id);
        }
        inner.sync_rule_count(node_id);
        inner.notify();
        true
    }

    /// Enqueues a pending connection prompt.
    pub fn add_prompt(&self, prompt: Prompt) {
        let mut inner = self.write();
        inner.snapshot.prompts.push(prompt);
        inner.notify();
    }

    /// Mutates a prompt by id. Returns false when absent.
    pub fn update_prompt(&self, id: Uuid, mutate: impl FnOnce(&mut Prompt)) -> bool {
        let mut inner = self.write();
        let Some(prompt) = inner.snapshot.prompts.iter_mut().find(|p| p.id == id) else {
            return false;
        };
        mutate(prompt);
        inner.notify();
        true
    }

    /// Drops a prompt by id. Returns false when absent.
    pub fn remove_prompt(&self, id: Uuid) -> bool {
        let mut inner = self.write();
        let Some(idx) = inner.snapshot.prompts.iter().position(|p| p.id == id) else {
            return false;
        };
        inner.snapshot.prompts.remove(idx);
        inner.notify();
        true
    }

    /// Replaces the settings snapshot.
    pub fn set_settings(&self, settings: Settings) {
        let mut inner = self.write();
        inner.snapshot.settings = settings;
        inner.notify();
    }

    /// Prepends an alert and truncates the history to its capacity.
    pub fn add_alert(&self, alert: Alert) {
        let max = self.tuning.max_alerts;
        let mut inner = self.write();
        inner.snapshot.alerts.insert(0, alert);
        inner.snapshot.alerts.truncate(max);
        inner.notify();
    }

    /// Registers a subscriber that is signalled on every mutation.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::channel(1);
        let mut inner = self.write();
        let id = inner.next_sub;
        inner.next_sub += 1;
        inner.subs.insert(id, tx);
        Subscription {
            id,
            store: Some(Arc::clone(self)),
            events: rx,
        }
    }

    fn remove_subscription(&self, id: u64) {
        self.write().subs.remove(&id);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    /// Non-blocking, coalescing wake-up: a subscriber whose signal slot is
    /// already full will re-read a snapshot that includes this mutation.
    fn notify(&self) {
        for tx in self.subs.values() {
            let _ = tx.try_send(());
        }
    }

    fn sync_rule_count(&mut self, node_id: &str) {
        if node_id.is_empty() || self.snapshot.stats.node_id != node_id {
            return;
        }
        self.snapshot.stats.rules = self
            .snapshot
            .rules
            .get(node_id)
            .map(|list| list.len() as u64)
            .unwrap_or(0);
    }
}

fn merge_nodes(current: Node, mut update: Node) -> Node {
    if update.id.is_empty() {
        update.id = current.id;
    }
    if update.name.is_empty() {
        update.name = current.name;
    }
    if update.address.is_empty() {
        update.address = current.address;
    }
    if update.version.is_empty() {
        update.version = current.version;
    }
    if update.last_seen.is_none() {
        update.last_seen = current.last_seen;
    }
    if update.status == NodeStatus::Unknown {
        update.status = current.status;
    }
    if update.message.is_empty() {
        update.message = current.message;
    }
    if !update.firewall_enabled && current.firewall_enabled {
        update.firewall_enabled = true;
    }
    update
}

impl Subscription {
    /// Waits for the next wake-up signal. Returns `None` once closed.
    pub async fn changed(&mut self) -> Option<()> {
        self.events.recv().await
    }

    /// Consumes a pending signal without waiting, if one is queued.
    pub fn try_changed(&mut self) -> bool {
        self.events.try_recv().is_ok()
    }

    /// Stops the subscription. Safe to call more than once; concurrent
    /// notifiers observe a closed channel, never a panic.
    pub fn close(&mut self) {
        if let Some(store) = self.store.take() {
            store.remove_subscription(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<Store> {
        Arc::new(Store::new())
    }

    fn node(id: &str) -> Node {
        Node {
            id: id.to_string(),
            name: format!("{id}-name"),
            address: "127.0.0.1:1234".to_string(),
            version: "1.6.0".to_string(),
            status: NodeStatus::Ready,
            ..Node::default()
        }
    }

    fn rule(name: &str) -> Rule {
        Rule {
            name: name.to_string(),
            action: "allow".to_string(),
            duration: "always".to_string(),
            enabled: true,
            ..Rule::default()
        }
    }

    #[test]
    fn snapshot_is_isolated_from_store_and_other_snapshots() {
        let s = store();
        s.upsert_node(node("a"));
        s.set_rules("a", vec![rule("ssh")]);

        let mut first = s.snapshot();
        let second = s.snapshot();

        first.nodes[0].name = "mutated".to_string();
        first.rules.get_mut("a").unwrap()[0].name = "mutated".to_string();

        assert_eq!(second.nodes[0].name, "a-name");
        assert_eq!(second.rules["a"][0].name, "ssh");
        assert_eq!(s.snapshot().nodes[0].name, "a-name");
        assert_eq!(s.snapshot().rules["a"][0].name, "ssh");
    }

    #[test]
    fn upsert_never_blanks_known_fields() {
        let s = store();
        let mut full = node("a");
        full.firewall_enabled = true;
        full.message = "subscribed".to_string();
        s.upsert_node(full);

        s.upsert_node(Node {
            id: "a".to_string(),
            ..Node::default()
        });

        let got = &s.snapshot().nodes[0];
        assert_eq!(got.name, "a-name");
        assert_eq!(got.address, "127.0.0.1:1234");
        assert_eq!(got.version, "1.6.0");
        assert_eq!(got.status, NodeStatus::Ready);
        assert_eq!(got.message, "subscribed");
        assert!(got.firewall_enabled, "firewall flag must stay sticky");
    }

    #[test]
    fn upsert_updates_fresh_fields() {
        let s = store();
        s.upsert_node(node("a"));
        s.upsert_node(Node {
            id: "a".to_string(),
            version: "1.7.0".to_string(),
            status: NodeStatus::Error,
            message: "stream failed".to_string(),
            ..Node::default()
        });

        let got = &s.snapshot().nodes[0];
        assert_eq!(got.version, "1.7.0");
        assert_eq!(got.status, NodeStatus::Error);
        assert_eq!(got.message, "stream failed");
        assert_eq!(got.name, "a-name");
    }

    #[test]
    fn update_node_status_creates_placeholder() {
        let s = store();
        s.update_node_status("fresh", NodeStatus::Connecting, "hello", Utc::now());
        let got = &s.snapshot().nodes[0];
        assert_eq!(got.id, "fresh");
        assert_eq!(got.name, "fresh");
        assert_eq!(got.status, NodeStatus::Connecting);
    }

    #[test]
    fn alert_history_is_bounded_and_newest_first() {
        let s = Arc::new(Store::with_tuning(StoreTuning {
            max_alerts: 5,
            ..StoreTuning::default()
        }));
        for i in 0..8 {
            s.add_alert(Alert {
                id: i.to_string(),
                ..Alert::default()
            });
        }

        let alerts = s.snapshot().alerts;
        assert_eq!(alerts.len(), 5);
        let ids: Vec<&str> = alerts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, ["7", "6", "5", "4", "3"]);
    }

    #[test]
    fn rule_mutations_keep_stats_counter_in_sync() {
        let s = store();
        s.set_stats(Stats {
            node_id: "a".to_string(),
            rules: 99,
            ..Stats::default()
        });

        s.set_rules("a", vec![rule("one"), rule("two")]);
        assert_eq!(s.snapshot().stats.rules, 2);

        s.add_rule("a", rule("three"));
        assert_eq!(s.snapshot().stats.rules, 3);

        assert!(s.remove_rule("a", "two"));
        assert_eq!(s.snapshot().stats.rules, 2);

        // Mutations to a different node leave the tracked counter alone.
        s.add_rule("b", rule("other"));
        assert_eq!(s.snapshot().stats.rules, 2);
    }

    #[test]
    fn absent_entities_report_false() {
        let s = store();
        assert!(!s.update_rule("a", "missing", |_| {}));
        assert!(!s.remove_rule("a", "missing"));
        assert!(!s.update_prompt(Uuid::new_v4(), |_| {}));
        assert!(!s.remove_prompt(Uuid::new_v4()));
        assert!(!s.update_node("ghost", |_| {}));
    }

    #[tokio::test]
    async fn subscription_coalesces_and_closes_cleanly() {
        let s = store();
        let mut sub = s.subscribe();

        s.upsert_node(node("a"));
        s.upsert_node(node("b"));
        s.upsert_node(node("c"));

        // Multiple mutations merged into (at most) one queued signal.
        assert!(sub.try_changed());
        assert!(!sub.try_changed());

        sub.close();
        sub.close(); // idempotent

        // Mutating after close must not panic the notifier.
        s.upsert_node(node("d"));
    }

    #[tokio::test]
    async fn error_expires_only_when_still_current() {
        let s = Arc::new(Store::with_tuning(StoreTuning {
            error_ttl: Duration::from_millis(60),
            ..StoreTuning::default()
        }));

        s.set_error("first");
        tokio::time::sleep(Duration::from_millis(30)).await;
        s.set_error("second");

        // The first error's expiry fires but must not clear the newer one.
        tokio::time::sleep(Duration::from_millis(45)).await;
        assert_eq!(s.snapshot().last_error, "second");

        // The second error's own expiry clears it.
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(s.snapshot().last_error, "");
        assert!(s.snapshot().last_error_at.is_none());
    }

    #[test]
    fn clear_error_is_a_noop_when_empty() {
        let s = store();
        s.clear_error();
        assert_eq!(s.snapshot().last_error, "");
    }
}
