//! firewatch binary entry point.
//!
//! Parses arguments, initializes tracing, loads the persisted configuration,
//! and runs the daemon-facing protocol server until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use firewatch::{
    cli::Cli,
    config,
    daemon::{Server, ServerOptions, TlsOptions},
    settings,
    state::{NodeStatus, Store, StoreTuning},
};
use tokio::sync::watch;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;
    debug!("parsed CLI arguments: {:?}", cli);

    let config_path = cli.config.clone().unwrap_or_else(config::default_path);
    let cfg = config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    debug!("loaded configuration: {:?}", cfg);

    let store = Arc::new(Store::with_tuning(StoreTuning {
        max_alerts: cfg.server.max_alerts,
        error_ttl: Duration::from_secs(cfg.server.error_ttl_secs),
    }));

    // Configured daemons show up as disconnected placeholders until they
    // subscribe.
    let now = Utc::now();
    for addr in &cfg.nodes {
        store.update_node_status(addr, NodeStatus::Disconnected, "configured", now);
    }

    let listen_addr = cli
        .listen
        .clone()
        .unwrap_or_else(|| cfg.server.listen_addr.clone());
    let tls = if cli.tls_cert.is_some() {
        TlsOptions {
            cert_file: cli.tls_cert.clone(),
            key_file: cli.tls_key.clone(),
            client_ca_file: cli.tls_client_ca.clone(),
        }
    } else {
        TlsOptions {
            cert_file: cfg.tls.cert_file.clone(),
            key_file: cfg.tls.key_file.clone(),
            client_ca_file: cfg.tls.client_ca_file.clone(),
        }
    };

    let options = ServerOptions {
        listen_addr,
        server_name: cfg.server.name.clone(),
        notify_queue_depth: cfg.server.notify_queue_depth,
        tls,
        ..ServerOptions::default()
    };

    let _settings = settings::Manager::new(Arc::clone(&store), config_path, cfg);
    let server = Arc::new(Server::new(Arc::clone(&store), options));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(Arc::clone(&server).run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");
    let _ = shutdown_tx.send(true);

    running
        .await
        .context("listener task panicked")?
        .context("server failed")?;
    Ok(())
}

/// Initialize the tracing subscriber.
///
/// # Verbosity Levels
/// - 0 (default): warnings and errors, or `RUST_LOG` when set
/// - 1 (-v): info level
/// - 2 (-vv): debug level
/// - 3+ (-vvv): trace level
fn init_tracing(verbose: u8) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("failed to initialize tracing subscriber")?;

    Ok(())
}
