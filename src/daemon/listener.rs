//! Listening socket management for the daemon server.
//!
//! The listen address selects the transport: `unix://<path>` binds a
//! unix-domain socket (removing a stale socket file left by a previous run),
//! anything else is treated as a TCP `host:port`. Each accepted connection is
//! served on its own task; the TLS handshake, when enabled, also happens
//! there so a stalled peer cannot block the accept loop.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

use super::error::DaemonError;
use super::server::{Peer, Server};

/// A parsed listen address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ListenAddr {
    /// Unix-domain socket path.
    Unix(PathBuf),
    /// TCP `host:port`.
    Tcp(String),
}

/// Parses a listen address string.
pub(crate) fn parse_listen_addr(addr: &str) -> Result<ListenAddr, DaemonError> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(DaemonError::InvalidListenAddress(
            "listen address is empty".to_string(),
        ));
    }
    if let Some(path) = addr.strip_prefix("unix://") {
        if path.is_empty() {
            return Err(DaemonError::InvalidListenAddress(
                "unix socket path is empty".to_string(),
            ));
        }
        return Ok(ListenAddr::Unix(PathBuf::from(path)));
    }
    if !addr.contains(':') {
        return Err(DaemonError::InvalidListenAddress(format!(
            "expected unix://<path> or host:port, got {addr}"
        )));
    }
    Ok(ListenAddr::Tcp(addr.to_string()))
}

impl Server {
    /// Binds the configured listen address and accepts daemon connections
    /// until `shutdown` flips to true or its sender is dropped.
    ///
    /// Connections accepted before shutdown keep being served; only the
    /// listening socket is torn down.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<(), DaemonError> {
        let acceptor = self.options().tls.acceptor()?;

        match parse_listen_addr(&self.options().listen_addr)? {
            ListenAddr::Unix(path) => {
                if path.exists() {
                    // Stale socket from an unclean shutdown; a live listener
                    // would have made bind fail anyway.
                    std::fs::remove_file(&path)?;
                }
                let listener = UnixListener::bind(&path)?;
                info!(addr = %path.display(), tls = acceptor.is_some(), "listening");
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        accepted = listener.accept() => match accepted {
                            Ok((stream, _)) => {
                                let peer = self.peer_for_unix();
                                spawn_serve(Arc::clone(&self), stream, peer, acceptor.clone());
                            }
                            Err(err) => warn!(error = %err, "accept failed"),
                        },
                    }
                }
                let _ = std::fs::remove_file(&path);
            }
            ListenAddr::Tcp(addr) => {
                let listener = TcpListener::bind(&addr).await?;
                info!(addr = %addr, tls = acceptor.is_some(), "listening");
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        accepted = listener.accept() => match accepted {
                            Ok((stream, peer_addr)) => {
                                let peer = self.peer_for_tcp(peer_addr);
                                spawn_serve(Arc::clone(&self), stream, peer, acceptor.clone());
                            }
                            Err(err) => warn!(error = %err, "accept failed"),
                        },
                    }
                }
            }
        }

        info!("listener stopped");
        Ok(())
    }
}

fn spawn_serve<S>(server: Arc<Server>, stream: S, peer: Peer, acceptor: Option<TlsAcceptor>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        match acceptor {
            Some(acceptor) => match acceptor.accept(stream).await {
                Ok(tls) => server.serve_connection(tls, peer).await,
                Err(err) => warn!(node = %peer.id, error = %err, "tls handshake failed"),
            },
            None => server.serve_connection(stream, peer).await,
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::server::ServerOptions;
    use crate::daemon::wire::{self, ConsoleMessage, DaemonMessage, DEFAULT_MAX_FRAME_BYTES};
    use crate::state::Store;
    use std::time::Duration;
    use tokio::net::UnixStream;

    #[test]
    fn listen_addresses_parse() {
        assert_eq!(
            parse_listen_addr("unix:///tmp/fw.sock").unwrap(),
            ListenAddr::Unix(PathBuf::from("/tmp/fw.sock"))
        );
        assert_eq!(
            parse_listen_addr("127.0.0.1:50051").unwrap(),
            ListenAddr::Tcp("127.0.0.1:50051".to_string())
        );
        assert!(matches!(
            parse_listen_addr(""),
            Err(DaemonError::InvalidListenAddress(_))
        ));
        assert!(matches!(
            parse_listen_addr("unix://"),
            Err(DaemonError::InvalidListenAddress(_))
        ));
        assert!(matches!(
            parse_listen_addr("not-an-address"),
            Err(DaemonError::InvalidListenAddress(_))
        ));
    }

    #[tokio::test]
    async fn binds_over_stale_unix_socket_and_serves() {
        let dir = tempfile::tempdir().unwrap();
        let sock = dir.path().join("fw.sock");
        std::fs::write(&sock, b"").unwrap();

        let store = Arc::new(Store::new());
        let server = Arc::new(Server::new(
            Arc::clone(&store),
            ServerOptions {
                listen_addr: format!("unix://{}", sock.display()),
                ..ServerOptions::default()
            },
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let running = tokio::spawn(Arc::clone(&server).run(shutdown_rx));

        let mut stream = loop {
            match UnixStream::connect(&sock).await {
                Ok(stream) => break stream,
                Err(_) => tokio::time::sleep(Duration::from_millis(5)).await,
            }
        };

        wire::write_frame(
            &mut stream,
            &DaemonMessage::Subscribe(wire::ClientConfig {
                id: 7,
                name: "laptop".to_string(),
                ..wire::ClientConfig::default()
            }),
            DEFAULT_MAX_FRAME_BYTES,
        )
        .await
        .unwrap();

        let reply: ConsoleMessage = wire::read_frame(&mut stream, DEFAULT_MAX_FRAME_BYTES)
            .await
            .unwrap()
            .expect("subscribe reply");
        match reply {
            ConsoleMessage::SubscribeReply(cfg) => {
                assert_eq!(cfg.id, 7);
                assert_eq!(cfg.name, "firewatch");
            }
            other => panic!("unexpected reply {other:?}"),
        }

        let snapshot = store.snapshot();
        assert_eq!(snapshot.nodes[0].id, "unix://conn-1");
        assert_eq!(snapshot.nodes[0].name, "laptop");

        shutdown_tx.send(true).unwrap();
        running.await.unwrap().unwrap();
        assert!(!sock.exists());
    }
}
