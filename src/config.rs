//! Process configuration.
//!
//! `Config` is the object the membership service consumes; `Args` is the
//! command line that fills it in for the `gossip-node` binary.

use clap::Parser;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_SUSPICION_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_GOSSIP_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// IPv4 address the UDP socket binds to.
    pub host: Ipv4Addr,
    /// Address peers use to reach this node, when it differs from `host`.
    pub advertise_host: Option<Ipv4Addr>,
    /// UDP listen port; `0` picks an ephemeral port.
    pub port: u16,
    /// Seed peer: a bare port on the same host, or `host:port`.
    pub initial_peer: Option<String>,
    #[serde(with = "millis")]
    pub ack_timeout: Duration,
    #[serde(with = "millis")]
    pub suspicion_timeout: Duration,
    #[serde(with = "millis")]
    pub probe_interval: Duration,
    #[serde(with = "millis")]
    pub gossip_interval: Duration,
    #[serde(with = "millis")]
    pub report_interval: Duration,
    /// Port of the HTTP status endpoint, disabled when unset.
    pub http_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::LOCALHOST,
            advertise_host: None,
            port: DEFAULT_PORT,
            initial_peer: None,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            suspicion_timeout: DEFAULT_SUSPICION_TIMEOUT,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            gossip_interval: DEFAULT_GOSSIP_INTERVAL,
            report_interval: DEFAULT_REPORT_INTERVAL,
            http_port: None,
        }
    }
}

impl Config {
    /// The host peers should use to reach us. Without an explicit
    /// `advertise_host`, a wildcard bind is advertised as loopback.
    pub fn advertised_host(&self) -> Ipv4Addr {
        if let Some(host) = self.advertise_host {
            host
        } else if self.host.is_unspecified() {
            Ipv4Addr::LOCALHOST
        } else {
            self.host
        }
    }

    pub fn with_initial_peer(mut self, peer: impl Into<String>) -> Self {
        self.initial_peer = Some(peer.into());
        self
    }
}

#[derive(Parser, Debug)]
#[command(name = "gossip-node", about = "Gossip-based cluster membership node")]
pub struct Args {
    /// UDP port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Seed peer to join through (port, or host:port).
    #[arg(short, long)]
    pub initial_peer: Option<String>,

    #[arg(long, default_value = "127.0.0.1")]
    pub host: Ipv4Addr,

    /// Address announced to peers; required for multi-host clusters bound to 0.0.0.0.
    #[arg(long)]
    pub advertise_host: Option<Ipv4Addr>,

    #[arg(long, default_value_t = 500)]
    pub ack_timeout_ms: u64,

    #[arg(long, default_value_t = 5000)]
    pub suspicion_timeout_ms: u64,

    #[arg(long, default_value_t = 1000)]
    pub probe_interval_ms: u64,

    #[arg(long, default_value_t = 1000)]
    pub gossip_interval_ms: u64,

    #[arg(long, default_value_t = 5000)]
    pub report_interval_ms: u64,

    /// Serve the membership view over HTTP on this port.
    #[arg(long)]
    pub http_port: Option<u16>,

    /// Log filter, e.g. `info` or `gossip_membership=debug`.
    #[arg(long, default_value = "info")]
    pub log: String,
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        Self {
            host: args.host,
            advertise_host: args.advertise_host,
            port: args.port,
            initial_peer: args.initial_peer.clone(),
            ack_timeout: Duration::from_millis(args.ack_timeout_ms),
            suspicion_timeout: Duration::from_millis(args.suspicion_timeout_ms),
            probe_interval: Duration::from_millis(args.probe_interval_ms),
            gossip_interval: Duration::from_millis(args.gossip_interval_ms),
            report_interval: Duration::from_millis(args.report_interval_ms),
            http_port: args.http_port,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_match_config_defaults() {
        let args = Args::try_parse_from(["gossip-node"]).unwrap();
        let config = Config::from(&args);

        assert_eq!(config, Config::default());
        assert_eq!(args.log, "info");
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args::try_parse_from([
            "gossip-node",
            "--port",
            "3001",
            "--initial-peer",
            "3000",
            "--ack-timeout-ms",
            "250",
            "--suspicion-timeout-ms",
            "2000",
            "--http-port",
            "8080",
        ])
        .unwrap();
        let config = Config::from(&args);

        assert_eq!(config.port, 3001);
        assert_eq!(config.initial_peer.as_deref(), Some("3000"));
        assert_eq!(config.ack_timeout, Duration::from_millis(250));
        assert_eq!(config.suspicion_timeout, Duration::from_secs(2));
        assert_eq!(config.http_port, Some(8080));
    }

    #[test]
    fn test_deserialize_config_object() {
        let raw = r#"{"port": 4000, "initialPeer": "127.0.0.1:3000", "ackTimeout": 100, "suspicionTimeout": 900}"#;
        let config: Config = serde_json::from_str(raw).unwrap();

        assert_eq!(config.port, 4000);
        assert_eq!(config.initial_peer.as_deref(), Some("127.0.0.1:3000"));
        assert_eq!(config.ack_timeout, Duration::from_millis(100));
        assert_eq!(config.suspicion_timeout, Duration::from_millis(900));
        assert_eq!(config.probe_interval, DEFAULT_PROBE_INTERVAL);
    }

    #[test]
    fn test_wildcard_host_is_advertised_as_loopback() {
        let config = Config {
            host: Ipv4Addr::UNSPECIFIED,
            ..Config::default()
        };
        assert_eq!(config.advertised_host(), Ipv4Addr::LOCALHOST);
    }

    #[test]
    fn test_advertise_host_overrides_wildcard_bind() {
        let args = Args::try_parse_from([
            "gossip-node",
            "--host",
            "0.0.0.0",
            "--advertise-host",
            "10.1.2.3",
        ])
        .unwrap();
        let config = Config::from(&args);

        assert_eq!(config.host, Ipv4Addr::UNSPECIFIED);
        assert_eq!(config.advertised_host(), Ipv4Addr::new(10, 1, 2, 3));
    }
}
