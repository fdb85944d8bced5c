//! Plain HTTP forwarding with admission control and body scanning.
//!
//! Handles absolute-form requests (`GET http://host/path HTTP/1.1`):
//! 1. Build a [`RequestContext`] from the target URL and `Referer` header
//! 2. Run [`AdmissionEngine::decide`] on the blocking pool
//! 3. Block: answer with the synthetic block page
//! 4. Forward: send the request upstream in origin-form with
//!    `Connection: close`, then relay the response
//!
//! `text/*` responses are read into memory (up to `max_scan_body`), scanned
//! for embedded resources, and relayed byte-for-byte unchanged. All other
//! responses stream through untouched.
//!
//! `Accept-Encoding` is dropped from forwarded requests so text bodies
//! arrive uncompressed and can be scanned. Request bodies are relayed by
//! `Content-Length` or, for `Transfer-Encoding: chunked`, chunk by chunk up
//! to the terminating zero-size chunk.

use crate::audit;
use crate::config::ProxyConfig;
use crate::connect::{connect_upstream, send_response};
use crate::error::{ProxyError, Result};
use noxss::admission::{BLOCKED_BODY, BLOCKED_CONTENT_TYPE, BLOCKED_STATUS};
use noxss::{AdmissionEngine, Decision, RequestContext};
use std::borrow::Cow;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

/// Maximum total size of upstream response headers (64 KiB).
const MAX_RESPONSE_HEADER_SIZE: usize = 64 * 1024;

/// Maximum length of a chunk-size or trailer line in a request body.
const MAX_CHUNK_LINE: u64 = 4096;

/// Request headers that apply to a single hop and are not forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authorization",
    "te",
    "upgrade",
];

/// Shared context passed from the server to the forward handler.
pub struct ForwardCtx<'a> {
    /// Admission engine shared by all connections
    pub engine: &'a Arc<AdmissionEngine>,
    /// Proxy configuration
    pub config: &'a ProxyConfig,
    /// Reports errors that must stop the proxy
    pub fatal_tx: &'a Arc<watch::Sender<Option<String>>>,
}

/// A text response body captured for scanning.
#[derive(Debug, Clone)]
pub struct ResponseBody {
    /// Declared `Content-Type` header value
    pub content_type: String,
    /// Body bytes exactly as received from upstream
    pub raw: Vec<u8>,
    /// Whether the body uses chunked transfer encoding
    pub chunked: bool,
}

impl ResponseBody {
    /// Whether a content type is scanned for embedded resources.
    #[must_use]
    pub fn is_scannable(content_type: &str) -> bool {
        content_type.trim_start().starts_with("text")
    }

    /// The body as text, with chunk framing removed when possible.
    ///
    /// Invalid UTF-8 is replaced rather than rejected.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        if self.chunked {
            if let Some(decoded) = decode_chunked(&self.raw) {
                return Cow::Owned(String::from_utf8_lossy(&decoded).into_owned());
            }
        }
        String::from_utf8_lossy(&self.raw)
    }
}

/// Handle a non-CONNECT HTTP request.
///
/// `buffered_body` contains any bytes the BufReader read ahead beyond the
/// headers. These are sent before the rest of the request body.
pub async fn handle_forward(
    first_line: &str,
    stream: &mut TcpStream,
    header_bytes: &[u8],
    buffered_body: &[u8],
    ctx: &ForwardCtx<'_>,
) -> Result<()> {
    let (method, target, version) = parse_request_line(first_line)?;
    if ctx.config.verbose {
        info!("Request: {} {}", method, target);
    } else {
        debug!("Request: {} {}", method, target);
    }

    let url = match parse_target_url(&target) {
        Ok(url) => url,
        Err(e) => {
            send_response(stream, 400, "Bad Request").await?;
            return Err(e);
        }
    };

    let headers = parse_headers(header_bytes);
    let referer = header_value(&headers, "referer");
    let request = RequestContext::from_url(&url, referer);

    let decision = admit(ctx, request.clone()).await?;
    if !decision.is_forward() {
        audit::log_blocked(request.target_url(), request.referer(), decision.rule);
        write_blocked_response(stream).await?;
        return Ok(());
    }
    audit::log_allowed(request.target_url(), request.referer(), decision.rule);

    let chunked = header_value(&headers, "transfer-encoding")
        .is_some_and(|te| te.to_ascii_lowercase().contains("chunked"));
    let content_length = header_value(&headers, "content-length")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    let host = url
        .host_str()
        .unwrap_or_default()
        .trim_start_matches('[')
        .trim_end_matches(']');
    let port = url.port_or_known_default().unwrap_or(80);
    let mut upstream = match connect_upstream(host, port).await {
        Ok(upstream) => upstream,
        Err(e) => {
            warn!("Upstream connection failed: {}", e);
            send_response(stream, 502, "Bad Gateway").await?;
            return Ok(());
        }
    };

    let head = build_upstream_head(&method, &url, &version, &headers);
    upstream.write_all(head.as_bytes()).await?;
    if chunked {
        relay_chunked_body(stream, &mut upstream, buffered_body).await?;
    } else {
        relay_request_body(stream, &mut upstream, buffered_body, content_length).await?;
    }
    upstream.flush().await?;

    relay_response(stream, upstream, &request, ctx).await
}

/// Run the admission decision on the blocking pool.
///
/// The gateway may wait on a human, so it must not run on a runtime worker.
/// With a timeout, an unanswered prompt blocks the request; the prompt
/// itself is left to finish in the background and a gateway failure it
/// reports later still stops the proxy.
async fn admit(ctx: &ForwardCtx<'_>, request: RequestContext) -> Result<Decision> {
    let engine = Arc::clone(ctx.engine);
    let mut task = tokio::task::spawn_blocking(move || engine.decide(&request));

    let joined = match ctx.config.confirm_timeout() {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!("No answer within {:?}, blocking request", limit);
                tokio::spawn(watch_abandoned(task, Arc::clone(ctx.fatal_tx)));
                return Ok(Decision::timed_out());
            }
        },
        None => task.await,
    };

    let decision = joined.map_err(|e| ProxyError::Task(e.to_string()))??;
    Ok(decision)
}

/// Wait for a decision whose request was already blocked by the timeout.
///
/// The late answer is discarded; only a fatal error is reported.
async fn watch_abandoned(
    task: JoinHandle<noxss::Result<Decision>>,
    fatal_tx: Arc<watch::Sender<Option<String>>>,
) {
    match task.await {
        Ok(Ok(decision)) => debug!("Ignoring late answer ({})", decision.rule),
        Ok(Err(e)) => {
            let e = ProxyError::from(e);
            if e.is_fatal() {
                error!("Fatal: {}", e);
                fatal_tx.send_replace(Some(e.to_string()));
            } else {
                debug!("Abandoned admission failed: {}", e);
            }
        }
        Err(e) => debug!("Abandoned admission task failed: {}", e),
    }
}

/// Write the synthetic block page and finish the exchange.
async fn write_blocked_response(stream: &mut TcpStream) -> Result<()> {
    let response = format!(
        "HTTP/1.1 {} OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        BLOCKED_STATUS,
        BLOCKED_CONTENT_TYPE,
        BLOCKED_BODY.len(),
        BLOCKED_BODY
    );
    stream.write_all(response.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

/// Send `content_length` request body bytes upstream, starting with the
/// bytes already buffered from the client.
async fn relay_request_body(
    client: &mut TcpStream,
    upstream: &mut TcpStream,
    buffered: &[u8],
    content_length: u64,
) -> Result<()> {
    let pre = buffered.len().min(usize::try_from(content_length).unwrap_or(usize::MAX));
    if pre > 0 {
        upstream.write_all(&buffered[..pre]).await?;
    }
    let remaining = content_length.saturating_sub(pre as u64);
    if remaining > 0 {
        let mut rest = (&mut *client).take(remaining);
        tokio::io::copy(&mut rest, upstream).await?;
    }
    Ok(())
}

/// Relay a chunked request body upstream byte-for-byte, ending after the
/// zero-size chunk and its trailer section.
async fn relay_chunked_body(
    client: &mut TcpStream,
    upstream: &mut TcpStream,
    buffered: &[u8],
) -> Result<()> {
    let mut reader = BufReader::new(buffered.chain(&mut *client));
    loop {
        let size_line = read_chunk_line(&mut reader).await?;
        upstream.write_all(size_line.as_bytes()).await?;
        let size_hex = size_line.split(';').next().unwrap_or("").trim();
        let size = u64::from_str_radix(size_hex, 16).map_err(|_| {
            ProxyError::HttpParse(format!("invalid chunk size: {}", size_line.trim_end()))
        })?;

        if size == 0 {
            loop {
                let trailer = read_chunk_line(&mut reader).await?;
                upstream.write_all(trailer.as_bytes()).await?;
                if trailer.trim().is_empty() {
                    return Ok(());
                }
            }
        }

        // Chunk data plus its CRLF
        let mut data = (&mut reader).take(size.saturating_add(2));
        let copied = tokio::io::copy(&mut data, upstream).await?;
        if copied < size.saturating_add(2) {
            return Err(ProxyError::HttpParse(
                "request body ended inside a chunk".to_string(),
            ));
        }
    }
}

/// Read one CRLF-terminated line of chunk framing.
async fn read_chunk_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String> {
    let mut line = String::new();
    let n = reader.take(MAX_CHUNK_LINE).read_line(&mut line).await?;
    if n == 0 || !line.ends_with('\n') {
        return Err(ProxyError::HttpParse(
            "truncated or oversized chunk line in request body".to_string(),
        ));
    }
    Ok(line)
}

/// Relay the upstream response, scanning text bodies on the way.
async fn relay_response(
    client: &mut TcpStream,
    upstream: TcpStream,
    request: &RequestContext,
    ctx: &ForwardCtx<'_>,
) -> Result<()> {
    let mut reader = BufReader::new(upstream);
    let mut head = Vec::new();
    let mut status_line = String::new();
    reader.read_line(&mut status_line).await?;
    if status_line.is_empty() {
        send_response(client, 502, "Bad Gateway").await?;
        return Err(ProxyError::HttpParse(
            "upstream closed before sending a response".to_string(),
        ));
    }
    let status = parse_status_code(&status_line)?;
    head.extend_from_slice(status_line.as_bytes());

    let mut header_bytes = Vec::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await?;
        head.extend_from_slice(line.as_bytes());
        if n == 0 || line.trim().is_empty() {
            break;
        }
        header_bytes.extend_from_slice(line.as_bytes());
        if header_bytes.len() > MAX_RESPONSE_HEADER_SIZE {
            send_response(client, 502, "Bad Gateway").await?;
            return Err(ProxyError::HttpParse(
                "upstream response headers too large".to_string(),
            ));
        }
    }

    let headers = parse_headers(&header_bytes);
    let content_type = header_value(&headers, "content-type").unwrap_or_default();

    if !ResponseBody::is_scannable(content_type) {
        client.write_all(&head).await?;
        tokio::io::copy(&mut reader, client).await?;
        client.flush().await?;
        audit::log_response(request.target_url(), status, false, 0);
        return Ok(());
    }

    let limit = ctx.config.max_scan_body;
    let mut raw = Vec::new();
    let read = (&mut reader)
        .take(u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1))
        .read_to_end(&mut raw)
        .await;

    match read {
        Ok(_) if raw.len() <= limit => {
            let body = ResponseBody {
                content_type: content_type.to_string(),
                raw,
                chunked: header_value(&headers, "transfer-encoding")
                    .is_some_and(|te| te.to_ascii_lowercase().contains("chunked")),
            };
            let added = ctx.engine.scan_response(&body.text());
            client.write_all(&head).await?;
            client.write_all(&body.raw).await?;
            client.flush().await?;
            audit::log_response(request.target_url(), status, true, added.len());
        }
        Ok(_) => {
            debug!(
                "Body of {} exceeds {} bytes, relaying without scan",
                request.target_url(),
                limit
            );
            client.write_all(&head).await?;
            client.write_all(&raw).await?;
            tokio::io::copy(&mut reader, client).await?;
            client.flush().await?;
            audit::log_response(request.target_url(), status, false, 0);
        }
        Err(e) => {
            debug!(
                "Failed to read body of {}: {}, relaying unmodified",
                request.target_url(),
                e
            );
            client.write_all(&head).await?;
            client.write_all(&raw).await?;
            client.flush().await?;
            audit::log_response(request.target_url(), status, false, 0);
        }
    }

    Ok(())
}

/// Parse an HTTP request line into (method, target, version).
fn parse_request_line(line: &str) -> Result<(String, String, String)> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(ProxyError::HttpParse(format!(
            "malformed request line: {}",
            line
        )));
    }
    Ok((
        parts[0].to_string(),
        parts[1].to_string(),
        parts[2].to_string(),
    ))
}

/// Parse an absolute-form request target. Only `http` is accepted;
/// HTTPS arrives through CONNECT.
fn parse_target_url(target: &str) -> Result<Url> {
    let url = Url::parse(target)
        .map_err(|e| ProxyError::HttpParse(format!("invalid request target '{}': {}", target, e)))?;
    if url.scheme() != "http" {
        return Err(ProxyError::HttpParse(format!(
            "unsupported URL scheme: {}",
            target
        )));
    }
    if url.host_str().is_none() {
        return Err(ProxyError::HttpParse(format!(
            "missing host in request target: {}",
            target
        )));
    }
    Ok(url)
}

/// Split raw header lines into (name, value) pairs.
fn parse_headers(header_bytes: &[u8]) -> Vec<(String, String)> {
    let header_str = String::from_utf8_lossy(header_bytes);
    header_str
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

/// First value of a header, matched case-insensitively.
fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Build the request head sent upstream.
fn build_upstream_head(
    method: &str,
    url: &Url,
    version: &str,
    headers: &[(String, String)],
) -> String {
    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }

    let mut head = format!("{} {} {}\r\n", method, path, version);
    if header_value(headers, "host").is_none() {
        let host = url.host_str().unwrap_or_default();
        match url.port() {
            Some(port) => head.push_str(&format!("Host: {}:{}\r\n", host, port)),
            None => head.push_str(&format!("Host: {}\r\n", host)),
        }
    }
    for (name, value) in headers {
        let lower = name.to_ascii_lowercase();
        if HOP_BY_HOP.contains(&lower.as_str()) || lower == "accept-encoding" {
            continue;
        }
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("Connection: close\r\n\r\n");
    head
}

/// Parse HTTP status code from a response line.
fn parse_status_code(line: &str) -> Result<u16> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(ProxyError::HttpParse(format!(
            "malformed HTTP response: {}",
            line
        )));
    }
    parts[1]
        .parse::<u16>()
        .map_err(|_| ProxyError::HttpParse(format!("invalid status code in response: {}", line)))
}

/// Remove chunked transfer framing. Returns `None` on malformed input.
fn decode_chunked(raw: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(raw.len());
    let mut rest = raw;
    loop {
        let line_end = rest.windows(2).position(|w| w == b"\r\n")?;
        let size_line = std::str::from_utf8(&rest[..line_end]).ok()?;
        let size_hex = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_hex, 16).ok()?;
        rest = &rest[line_end + 2..];
        if size == 0 {
            return Some(out);
        }
        if rest.len() < size {
            return None;
        }
        out.extend_from_slice(&rest[..size]);
        rest = rest[size..].strip_prefix(b"\r\n")?;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_line() {
        let (method, target, version) =
            parse_request_line("GET http://a.test/x HTTP/1.1").unwrap();
        assert_eq!(method, "GET");
        assert_eq!(target, "http://a.test/x");
        assert_eq!(version, "HTTP/1.1");
        assert!(parse_request_line("GET /").is_err());
    }

    #[test]
    fn test_parse_target_url() {
        assert!(parse_target_url("http://a.test/x?y=1").is_ok());
        assert!(parse_target_url("/origin-form").is_err());
        assert!(parse_target_url("https://a.test/").is_err());
        assert!(parse_target_url("ftp://a.test/").is_err());
    }

    #[test]
    fn test_header_value_case_insensitive() {
        let headers = parse_headers(b"Host: a.test\r\nReferer: http://a.test/y\r\n");
        assert_eq!(header_value(&headers, "referer"), Some("http://a.test/y"));
        assert_eq!(header_value(&headers, "HOST"), Some("a.test"));
        assert_eq!(header_value(&headers, "cookie"), None);
    }

    #[test]
    fn test_parse_headers_keeps_colons_in_value() {
        let headers = parse_headers(b"Referer: http://a.test:8080/y\r\n");
        assert_eq!(headers[0].1, "http://a.test:8080/y");
    }

    #[test]
    fn test_build_upstream_head_origin_form() {
        let url = Url::parse("http://a.test:8080/x?q=1#frag").unwrap();
        let headers = parse_headers(
            b"Host: a.test:8080\r\nProxy-Connection: keep-alive\r\nAccept-Encoding: gzip\r\nReferer: http://a.test:8080/\r\n",
        );
        let head = build_upstream_head("GET", &url, "HTTP/1.1", &headers);

        assert!(head.starts_with("GET /x?q=1 HTTP/1.1\r\n"));
        assert!(head.contains("Host: a.test:8080\r\n"));
        assert!(head.contains("Referer: http://a.test:8080/\r\n"));
        assert!(!head.to_lowercase().contains("proxy-connection"));
        assert!(!head.to_lowercase().contains("accept-encoding"));
        assert!(head.ends_with("Connection: close\r\n\r\n"));
    }

    #[test]
    fn test_build_upstream_head_adds_missing_host() {
        let url = Url::parse("http://a.test/").unwrap();
        let head = build_upstream_head("GET", &url, "HTTP/1.0", &[]);
        assert!(head.contains("Host: a.test\r\n"));
    }

    #[test]
    fn test_parse_status_code() {
        assert_eq!(parse_status_code("HTTP/1.1 200 OK\r\n").unwrap(), 200);
        assert_eq!(parse_status_code("HTTP/1.0 404 Not Found\r\n").unwrap(), 404);
        assert!(parse_status_code("garbage").is_err());
    }

    #[test]
    fn test_is_scannable() {
        assert!(ResponseBody::is_scannable("text/html; charset=utf-8"));
        assert!(ResponseBody::is_scannable("text/plain"));
        assert!(!ResponseBody::is_scannable("image/png"));
        assert!(!ResponseBody::is_scannable("application/json"));
        assert!(!ResponseBody::is_scannable(""));
    }

    #[test]
    fn test_decode_chunked() {
        let raw = b"5\r\nhello\r\n7;ext=1\r\n, world\r\n0\r\n\r\n";
        assert_eq!(decode_chunked(raw).unwrap(), b"hello, world");
    }

    #[test]
    fn test_decode_chunked_malformed() {
        assert!(decode_chunked(b"zz\r\nhello\r\n0\r\n\r\n").is_none());
        assert!(decode_chunked(b"5\r\nhel").is_none());
    }

    #[test]
    fn test_response_body_text_dechunks() {
        let body = ResponseBody {
            content_type: "text/html".to_string(),
            raw: b"c\r\n<img src=\"ht\r\nf\r\ntp://c.test/i\">\r\n0\r\n\r\n".to_vec(),
            chunked: true,
        };
        assert_eq!(body.text(), "<img src=\"http://c.test/i\">");
    }

    #[test]
    fn test_response_body_text_falls_back_to_raw() {
        let body = ResponseBody {
            content_type: "text/html".to_string(),
            raw: b"not chunked".to_vec(),
            chunked: true,
        };
        assert_eq!(body.text(), "not chunked");
    }
}
