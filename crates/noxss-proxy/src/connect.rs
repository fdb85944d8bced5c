//! HTTP CONNECT tunnel handler.
//!
//! Handles `CONNECT host:port HTTP/1.1` requests by:
//! 1. Establishing a TCP connection to the upstream
//! 2. Returning `200 Connection Established`
//! 3. Relaying bytes bidirectionally
//!
//! The proxy never terminates TLS, so no referer or body is visible inside
//! a tunnel and no admission check applies. Tunnels are audited only.

use crate::audit;
use crate::error::{ProxyError, Result};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

/// Timeout for upstream TCP connect.
const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle an HTTP CONNECT request.
///
/// `first_line` is the already-read CONNECT line (e.g., "CONNECT example.com:443 HTTP/1.1").
/// `buffered` holds any client bytes read past the request head.
pub async fn handle_connect(first_line: &str, stream: &mut TcpStream, buffered: &[u8]) -> Result<()> {
    let (host, port) = parse_connect_target(first_line)?;
    debug!("CONNECT request to {}:{}", host, port);

    let mut upstream = match connect_upstream(&host, port).await {
        Ok(upstream) => upstream,
        Err(e) => {
            send_response(stream, 502, "Bad Gateway").await?;
            return Err(e);
        }
    };

    send_response(stream, 200, "Connection Established").await?;
    audit::log_tunnel(&host, port);

    if !buffered.is_empty() {
        upstream.write_all(buffered).await?;
    }

    let result = tokio::io::copy_bidirectional(stream, &mut upstream).await;
    debug!("CONNECT tunnel closed for {}:{}: {:?}", host, port, result);

    Ok(())
}

/// Connect to `host:port` with a timeout.
pub(crate) async fn connect_upstream(host: &str, port: u16) -> Result<TcpStream> {
    match tokio::time::timeout(UPSTREAM_CONNECT_TIMEOUT, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(ProxyError::UpstreamConnect {
            host: format!("{}:{}", host, port),
            reason: e.to_string(),
        }),
        Err(_) => Err(ProxyError::UpstreamConnect {
            host: format!("{}:{}", host, port),
            reason: "connection timed out".to_string(),
        }),
    }
}

/// Parse the target host and port from a CONNECT request line.
///
/// Expected format: "CONNECT host:port HTTP/1.1". IPv6 literals keep
/// their brackets in the request line and lose them here.
fn parse_connect_target(line: &str) -> Result<(String, u16)> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 2 || parts[0] != "CONNECT" {
        return Err(ProxyError::HttpParse(format!(
            "malformed CONNECT line: {}",
            line
        )));
    }

    let authority = parts[1];
    let (host, port) = match authority.rsplit_once(':') {
        Some((host, port_str)) if !port_str.contains(']') => {
            let port = port_str.parse::<u16>().map_err(|_| {
                ProxyError::HttpParse(format!("invalid port in CONNECT: {}", authority))
            })?;
            (host, port)
        }
        // No port specified, default to 443 for CONNECT
        _ => (authority, 443),
    };

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(ProxyError::HttpParse(format!(
            "missing host in CONNECT: {}",
            authority
        )));
    }
    Ok((host.to_string(), port))
}

/// Send a bodiless HTTP response line to the client.
pub(crate) async fn send_response(stream: &mut TcpStream, status: u16, reason: &str) -> Result<()> {
    let response = format!("HTTP/1.1 {} {}\r\n\r\n", status, reason);
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connect_with_port() {
        let (host, port) = parse_connect_target("CONNECT example.com:443 HTTP/1.1").unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 443);
    }

    #[test]
    fn test_parse_connect_without_port() {
        let (host, port) = parse_connect_target("CONNECT example.com HTTP/1.1").unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 443);
    }

    #[test]
    fn test_parse_connect_ipv6() {
        let (host, port) = parse_connect_target("CONNECT [::1]:8443 HTTP/1.1").unwrap();
        assert_eq!(host, "::1");
        assert_eq!(port, 8443);

        let (host, port) = parse_connect_target("CONNECT [::1] HTTP/1.1").unwrap();
        assert_eq!(host, "::1");
        assert_eq!(port, 443);
    }

    #[test]
    fn test_parse_connect_malformed() {
        assert!(parse_connect_target("GET /").is_err());
        assert!(parse_connect_target("").is_err());
        assert!(parse_connect_target("CONNECT host:http HTTP/1.1").is_err());
        assert!(parse_connect_target("CONNECT :443 HTTP/1.1").is_err());
    }

    #[tokio::test]
    async fn test_connect_upstream_refused() {
        // Bind then drop to get a port with nothing listening
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = connect_upstream("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamConnect { .. }));
    }
}
