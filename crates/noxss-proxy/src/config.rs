//! Proxy configuration types.
//!
//! Everything here is read once at startup and never changes while the
//! proxy runs.

use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 8080;

/// Configuration for the proxy server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Listen address (default: all interfaces, port 8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Log every proxied request at `info` instead of `debug`.
    #[serde(default)]
    pub verbose: bool,

    /// Maximum concurrent connections (0 = unlimited).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum `src` matches considered per scanned body.
    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,

    /// Text bodies larger than this are relayed without scanning.
    #[serde(default = "default_max_scan_body")]
    pub max_scan_body: usize,

    /// Seconds to wait for the operator before blocking a request.
    /// `None` waits forever.
    #[serde(default)]
    pub confirm_timeout_secs: Option<u64>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            verbose: false,
            max_connections: default_max_connections(),
            scan_limit: default_scan_limit(),
            max_scan_body: default_max_scan_body(),
            confirm_timeout_secs: None,
        }
    }
}

impl ProxyConfig {
    /// Bounded wait for confirmation, if configured.
    #[must_use]
    pub fn confirm_timeout(&self) -> Option<Duration> {
        self.confirm_timeout_secs.map(Duration::from_secs)
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT)
}

fn default_max_connections() -> usize {
    256
}

fn default_scan_limit() -> usize {
    noxss::extract::DEFAULT_SCAN_LIMIT
}

fn default_max_scan_body() -> usize {
    16 * 1024 * 1024
}

/// Parse a listen address.
///
/// Accepts `ip:port`, `[v6]:port`, and the `:port` shorthand for all IPv4
/// interfaces.
pub fn parse_listen_addr(s: &str) -> Result<SocketAddr> {
    let s = s.trim();
    if let Some(port) = s.strip_prefix(':') {
        let port = port
            .parse::<u16>()
            .map_err(|_| ProxyError::Config(format!("invalid port in listen address: {}", s)))?;
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    s.parse::<SocketAddr>()
        .map_err(|e| ProxyError::Config(format!("invalid listen address '{}': {}", s, e)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProxyConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:8080".parse().unwrap());
        assert!(!config.verbose);
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.scan_limit, 100);
        assert!(config.confirm_timeout().is_none());
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let config: ProxyConfig = serde_json::from_str(r#"{"verbose": true}"#).unwrap();
        assert!(config.verbose);
        assert_eq!(config.bind_addr.port(), DEFAULT_PORT);
        assert_eq!(config.max_scan_body, 16 * 1024 * 1024);
    }

    #[test]
    fn test_config_serialization() {
        let config = ProxyConfig {
            confirm_timeout_secs: Some(30),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: ProxyConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.confirm_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_parse_listen_addr_shorthand() {
        assert_eq!(
            parse_listen_addr(":8080").unwrap(),
            "0.0.0.0:8080".parse().unwrap()
        );
    }

    #[test]
    fn test_parse_listen_addr_full() {
        assert_eq!(
            parse_listen_addr("127.0.0.1:3128").unwrap(),
            "127.0.0.1:3128".parse().unwrap()
        );
        assert_eq!(parse_listen_addr("[::1]:9000").unwrap().port(), 9000);
    }

    #[test]
    fn test_parse_listen_addr_invalid() {
        assert!(parse_listen_addr(":http").is_err());
        assert!(parse_listen_addr(":70000").is_err());
        assert!(parse_listen_addr("localhost").is_err());
    }
}
