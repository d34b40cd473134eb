//! Pending-prompt coordination.
//!
//! Turns an incoming "should I allow this connection?" request into a pending
//! prompt, parks the asking task, and always produces a decision: an explicit
//! resolution from the console, an automatic decision built from the
//! configured defaults when the clock runs out, or a cancellation when the
//! asking transport goes away. Pausing suspends the clock without leaving the
//! pending state; resuming restarts it with the conserved remaining time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use super::decision;
use super::error::DaemonError;
use crate::controller::{PromptAction, PromptDecision, PromptDuration, PromptTarget};
use crate::state::{Connection, Prompt, Rule, Store};

/// State of one prompt's timeout clock.
#[derive(Debug, Clone, Copy)]
enum PromptClock {
    Running { deadline: Instant },
    Paused,
}

struct PendingPrompt {
    node_id: String,
    connection: Connection,
    /// Single-use response slot; `None` once a resolution claimed it.
    responder: Option<oneshot::Sender<Rule>>,
    clock: watch::Sender<PromptClock>,
    expires_at: DateTime<Utc>,
    /// Time left on the clock; populated only while paused.
    remaining: Option<Duration>,
}

enum Outcome {
    Resolved(Rule),
    TimedOut,
    Cancelled,
}

/// Coordinates pending prompts between asking daemons and the console.
pub struct PromptCoordinator {
    store: Arc<Store>,
    pending: Mutex<HashMap<Uuid, PendingPrompt>>,
}

impl PromptCoordinator {
    /// Creates a coordinator writing prompts and rules into `store`.
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a prompt for `connection` and waits for its outcome.
    ///
    /// The wait ends on the first of: explicit resolution, clock expiry, or
    /// the caller's cancellation signal (including the signal's sender being
    /// dropped when the transport dies). The prompt is removed from the store
    /// on every outcome. Timeout is not an error: it yields a rule built from
    /// the configured defaults, with the configured target subject to
    /// availability fallback.
    pub async fn request(
        &self,
        node_id: &str,
        node_name: &str,
        connection: Connection,
        timeout: Duration,
        cancelled: watch::Receiver<bool>,
    ) -> Result<Rule, DaemonError> {
        let id = Uuid::new_v4();
        let requested_at = Utc::now();
        let expires_at = requested_at
            + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());

        let (responder, response) = oneshot::channel();
        let (clock_tx, clock_rx) = watch::channel(PromptClock::Running {
            deadline: Instant::now() + timeout,
        });

        self.lock().insert(
            id,
            PendingPrompt {
                node_id: node_id.to_string(),
                connection: connection.clone(),
                responder: Some(responder),
                clock: clock_tx,
                expires_at,
                remaining: None,
            },
        );
        self.store.add_prompt(Prompt {
            id,
            node_id: node_id.to_string(),
            node_name: node_name.to_string(),
            connection: connection.clone(),
            requested_at,
            expires_at,
            paused: false,
            remaining: None,
        });
        debug!(prompt = %id, node = node_id, "prompt registered");

        let outcome = wait(response, clock_rx, cancelled).await;

        self.lock().remove(&id);
        self.store.remove_prompt(id);

        match outcome {
            Outcome::Resolved(rule) => Ok(rule),
            Outcome::TimedOut => {
                info!(prompt = %id, node = node_id, "prompt timed out, applying defaults");
                self.store.set_error(format!(
                    "prompt timed out for {}",
                    decision::connection_label(&connection)
                ));
                decision::build_rule(&connection, self.default_decision(&connection))
            }
            Outcome::Cancelled => {
                debug!(prompt = %id, node = node_id, "prompt cancelled");
                Err(DaemonError::PromptCancelled)
            }
        }
    }

    /// Resolves a pending prompt with an explicit decision.
    ///
    /// Builds the rule, adds it to the store, and wakes the parked asker.
    /// A prompt whose response slot was already claimed reports a conflict,
    /// guarding against duplicate console submissions.
    pub fn resolve(&self, prompt_id: Uuid, decision: PromptDecision) -> Result<(), DaemonError> {
        let mut pending = self.lock();
        let entry = pending
            .get_mut(&prompt_id)
            .ok_or(DaemonError::PromptNotFound(prompt_id))?;
        if entry.responder.is_none() {
            return Err(DaemonError::PromptAlreadyResolved(prompt_id));
        }

        let rule = decision::build_rule(&entry.connection, decision)?;
        self.store.add_rule(&entry.node_id, rule.clone());
        if let Some(responder) = entry.responder.take() {
            let _ = responder.send(rule);
        }
        self.store.remove_prompt(prompt_id);
        Ok(())
    }

    /// Suspends a prompt's clock, recording the remaining time for display.
    /// A no-op on an already-paused prompt.
    pub fn pause(&self, prompt_id: Uuid) -> Result<(), DaemonError> {
        let mut pending = self.lock();
        let entry = pending
            .get_mut(&prompt_id)
            .ok_or(DaemonError::PromptNotFound(prompt_id))?;
        if entry.remaining.is_some() {
            return Ok(());
        }

        let remaining = (entry.expires_at - Utc::now()).to_std().unwrap_or_default();
        entry.remaining = Some(remaining);
        let _ = entry.clock.send(PromptClock::Paused);
        self.store.update_prompt(prompt_id, |p| {
            p.paused = true;
            p.remaining = Some(remaining);
        });
        debug!(prompt = %prompt_id, ?remaining, "prompt paused");
        Ok(())
    }

    /// Restarts a paused prompt's clock with its conserved remaining time.
    /// A no-op on a prompt that is not paused.
    pub fn resume(&self, prompt_id: Uuid) -> Result<(), DaemonError> {
        let mut pending = self.lock();
        let entry = pending
            .get_mut(&prompt_id)
            .ok_or(DaemonError::PromptNotFound(prompt_id))?;
        let Some(remaining) = entry.remaining.take() else {
            return Ok(());
        };

        let expires_at = Utc::now()
            + chrono::Duration::from_std(remaining).unwrap_or_else(|_| chrono::Duration::zero());
        entry.expires_at = expires_at;
        let _ = entry.clock.send(PromptClock::Running {
            deadline: Instant::now() + remaining,
        });
        self.store.update_prompt(prompt_id, |p| {
            p.paused = false;
            p.remaining = None;
            p.expires_at = expires_at;
        });
        debug!(prompt = %prompt_id, "prompt resumed");
        Ok(())
    }

    /// Automatic decision built from the configured defaults. An unavailable
    /// configured target is left unset so rule building falls back to the
    /// best available one.
    fn default_decision(&self, connection: &Connection) -> PromptDecision {
        let settings = self.store.snapshot().settings;
        PromptDecision {
            action: PromptAction::normalize(&settings.default_prompt_action),
            duration: PromptDuration::normalize(&settings.default_prompt_duration),
            target: PromptTarget::parse(&settings.default_prompt_target)
                .filter(|target| decision::target_available(connection, *target)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, PendingPrompt>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn wait(
    mut response: oneshot::Receiver<Rule>,
    mut clock: watch::Receiver<PromptClock>,
    mut cancelled: watch::Receiver<bool>,
) -> Outcome {
    loop {
        let state = *clock.borrow_and_update();
        match state {
            PromptClock::Running { deadline } => {
                tokio::select! {
                    res = &mut response => {
                        return match res {
                            Ok(rule) => Outcome::Resolved(rule),
                            Err(_) => Outcome::Cancelled,
                        };
                    }
                    _ = tokio::time::sleep_until(deadline) => return Outcome::TimedOut,
                    changed = clock.changed() => {
                        if changed.is_err() {
                            return Outcome::Cancelled;
                        }
                    }
                    changed = cancelled.changed() => {
                        if changed.is_err() || *cancelled.borrow() {
                            return Outcome::Cancelled;
                        }
                    }
                }
            }
            PromptClock::Paused => {
                tokio::select! {
                    res = &mut response => {
                        return match res {
                            Ok(rule) => Outcome::Resolved(rule),
                            Err(_) => Outcome::Cancelled,
                        };
                    }
                    changed = clock.changed() => {
                        if changed.is_err() {
                            return Outcome::Cancelled;
                        }
                    }
                    changed = cancelled.changed() => {
                        if changed.is_err() || *cancelled.borrow() {
                            return Outcome::Cancelled;
                        }
                    }
                }
            }
        }
    }
}
