//! firewatch: terminal control plane for firewall-decision daemons
//!
//! This crate hosts the daemon-facing side of an OpenSnitch-style terminal
//! console. Daemons connect over a framed socket, report connection attempts
//! that need an allow/deny decision, and receive rule mutations pushed from
//! the console.
//!
//! # Architecture
//!
//! - **State**: a lock-guarded store handing out deep-copy snapshots, with a
//!   coalesced change-notification signal for observers
//! - **Daemon**: the protocol server (subscribe/ping/alerts/prompts/rule
//!   notifications), per-node sessions, and the prompt decision machinery
//! - **Controller**: capability traits the rendering layer depends on
//! - **Config**: persisted preferences and the known-daemon bootstrap list
//! - **Settings**: serialized setting mutations mirrored into the store

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod settings;
pub mod state;
