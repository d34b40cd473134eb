//! Command-line interface definitions.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::Parser;
use std::path::PathBuf;

/// Terminal control plane for firewall-decision daemons.
///
/// firewatch listens for daemon connections, surfaces connection attempts
/// that need an allow/deny decision, and pushes rule changes back to the
/// daemons that own them.
#[derive(Parser, Debug)]
#[command(name = "firewatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Listen address for daemon connections.
    ///
    /// Either `unix://<path>` or `host:port`. Overrides the configured
    /// address.
    #[arg(short = 'l', long = "listen", value_name = "ADDR")]
    pub listen: Option<String>,

    /// Path to the config file.
    ///
    /// Defaults to `~/.config/firewatch/config.toml`.
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// PEM server certificate chain; enables TLS together with --tls-key.
    #[arg(long = "tls-cert", value_name = "PATH", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key for the server certificate.
    #[arg(long = "tls-key", value_name = "PATH", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// PEM CA bundle for verifying daemon client certificates (mutual TLS).
    #[arg(long = "tls-client-ca", value_name = "PATH", requires = "tls_cert")]
    pub tls_client_ca: Option<PathBuf>,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults() {
        let cli = Cli::parse_from(["firewatch"]);
        assert!(cli.listen.is_none());
        assert!(cli.config.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn parse_listen_and_verbosity() {
        let cli = Cli::parse_from(["firewatch", "-l", "unix:///tmp/fw.sock", "-vv"]);
        assert_eq!(cli.listen.as_deref(), Some("unix:///tmp/fw.sock"));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn tls_key_requires_cert() {
        assert!(Cli::try_parse_from(["firewatch", "--tls-key", "/tmp/key.pem"]).is_err());
        assert!(Cli::try_parse_from([
            "firewatch",
            "--tls-cert",
            "/tmp/cert.pem",
            "--tls-key",
            "/tmp/key.pem",
        ])
        .is_ok());
    }
}
