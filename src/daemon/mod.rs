//! Daemon-facing server: framed wire protocol, per-node notification
//! sessions, prompt coordination, and rule decision building.

mod convert;
mod decision;
mod error;
mod listener;
mod prompt;
mod server;
mod session;
mod tls;
pub mod wire;

pub use decision::{best_available_target, target_available};
pub use error::DaemonError;
pub use prompt::PromptCoordinator;
pub use server::{Peer, Server, ServerOptions};
pub use session::{Session, SessionRegistry, DEFAULT_QUEUE_DEPTH};
pub use tls::TlsOptions;
