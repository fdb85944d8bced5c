//! Audit logging for proxy decisions.
//!
//! Logs admission verdicts and tunnels with structured fields via
//! `tracing`. Request bodies and header values other than the referer are
//! never logged.

use noxss::Rule;
use tracing::info;

/// Proxy mode for audit logging.
#[derive(Debug, Clone, Copy)]
pub enum ProxyMode {
    /// Plain HTTP request, subject to admission
    Forward,
    /// CONNECT tunnel, relayed without inspection
    Tunnel,
}

impl std::fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyMode::Forward => write!(f, "forward"),
            ProxyMode::Tunnel => write!(f, "tunnel"),
        }
    }
}

/// Log a forwarded request.
pub fn log_allowed(url: &str, referer: Option<&str>, rule: Rule) {
    info!(
        target: "noxss_proxy::audit",
        mode = %ProxyMode::Forward,
        url = url,
        referer = referer.unwrap_or(""),
        rule = %rule,
        decision = "allow",
        "proxy request allowed"
    );
}

/// Log a blocked request.
pub fn log_blocked(url: &str, referer: Option<&str>, rule: Rule) {
    info!(
        target: "noxss_proxy::audit",
        mode = %ProxyMode::Forward,
        url = url,
        referer = referer.unwrap_or(""),
        rule = %rule,
        decision = "block",
        "proxy request blocked"
    );
}

/// Log an established CONNECT tunnel.
pub fn log_tunnel(host: &str, port: u16) {
    info!(
        target: "noxss_proxy::audit",
        mode = %ProxyMode::Tunnel,
        host = host,
        port = port,
        decision = "allow",
        "tunnel established"
    );
}

/// Log a relayed response and how many allow-once entries it produced.
pub fn log_response(url: &str, status: u16, scanned: bool, registered: usize) {
    info!(
        target: "noxss_proxy::audit",
        mode = %ProxyMode::Forward,
        url = url,
        status = status,
        scanned = scanned,
        registered = registered,
        "proxy response relayed"
    );
}
