//! Shared application state.
//!
//! All views of the application read from one [`Store`]: connected daemon
//! nodes, their rules, the latest telemetry snapshot, alert history, pending
//! prompts, settings, and the last user-visible error. The store hands out
//! fully independent [`Snapshot`] copies and signals subscribers on every
//! mutation, so readers never hold a lock while rendering.

mod store;
mod types;

pub use store::{Store, StoreTuning, Subscription};
pub use types::{
    Alert, Connection, Node, NodeStatus, Prompt, Rule, RuleOperator, Settings, Snapshot,
    StatBucket, Stats,
};
