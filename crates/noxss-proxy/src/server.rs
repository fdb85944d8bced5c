//! Proxy server: TCP listener, connection dispatch, and lifecycle.
//!
//! The server accepts TCP connections, reads the request head, and
//! dispatches on the request line:
//!
//! CONNECT method            -> [`connect`] tunnel
//! Absolute-form `http://`   -> [`forward`] handler (admission + scanning)
//! Anything else             -> 400
//!
//! Each connection carries one exchange and is closed afterwards.

use crate::config::ProxyConfig;
use crate::connect;
use crate::error::{ProxyError, Result};
use crate::forward;
use noxss::{AdmissionEngine, ConfirmationGateway};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Maximum total size of HTTP headers (64 KiB). Prevents OOM from
/// malicious clients sending unbounded header data.
const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Handle returned when the proxy server starts.
///
/// Drop the handle or call [`ProxyHandle::shutdown`] to stop the proxy.
pub struct ProxyHandle {
    /// The address the proxy is listening on
    pub addr: SocketAddr,
    engine: Arc<AdmissionEngine>,
    /// Send `true` to trigger graceful shutdown
    shutdown_tx: watch::Sender<bool>,
    /// Set once a fatal error stops the proxy
    fatal_rx: watch::Receiver<Option<String>>,
}

impl ProxyHandle {
    /// Signal the proxy to shut down gracefully.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// The admission engine serving this proxy.
    #[must_use]
    pub fn engine(&self) -> &Arc<AdmissionEngine> {
        &self.engine
    }

    /// Wait until a fatal error stops the proxy.
    ///
    /// Returns the error message, or `None` if the proxy went away without
    /// a fatal error.
    pub async fn fatal(&self) -> Option<String> {
        let mut rx = self.fatal_rx.clone();
        loop {
            if let Some(msg) = rx.borrow_and_update().clone() {
                return Some(msg);
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }
}

/// Shared state for the proxy server.
struct ProxyState {
    engine: Arc<AdmissionEngine>,
    config: ProxyConfig,
    /// Active connection count for connection limiting.
    active_connections: AtomicUsize,
    fatal_tx: Arc<watch::Sender<Option<String>>>,
}

/// Start the proxy server.
///
/// Builds the admission engine around `gateway`, binds to
/// `config.bind_addr` (port 0 = OS-assigned) and begins accepting
/// connections on the current tokio runtime.
pub async fn start(config: ProxyConfig, gateway: Arc<dyn ConfirmationGateway>) -> Result<ProxyHandle> {
    let engine = AdmissionEngine::new(gateway).with_scan_limit(config.scan_limit);
    start_with_engine(config, Arc::new(engine)).await
}

/// Start the proxy server with a prepared admission engine.
pub async fn start_with_engine(
    config: ProxyConfig,
    engine: Arc<AdmissionEngine>,
) -> Result<ProxyHandle> {
    let bind_addr = config.bind_addr;
    let listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| ProxyError::Bind {
            addr: bind_addr.to_string(),
            source: e,
        })?;

    let local_addr = listener.local_addr().map_err(|e| ProxyError::Bind {
        addr: bind_addr.to_string(),
        source: e,
    })?;

    info!(
        "Proxy server listening on {} (confirmation via {})",
        local_addr,
        engine.gateway_name()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (fatal_tx, fatal_rx) = watch::channel(None);

    let state = Arc::new(ProxyState {
        engine: Arc::clone(&engine),
        config,
        active_connections: AtomicUsize::new(0),
        fatal_tx: Arc::new(fatal_tx),
    });

    tokio::spawn(accept_loop(listener, state, shutdown_rx, fatal_rx.clone()));

    Ok(ProxyHandle {
        addr: local_addr,
        engine,
        shutdown_tx,
        fatal_rx,
    })
}

/// Accept loop: listen for connections until shutdown or a fatal error.
async fn accept_loop(
    listener: TcpListener,
    state: Arc<ProxyState>,
    mut shutdown_rx: watch::Receiver<bool>,
    mut fatal_rx: watch::Receiver<Option<String>>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        // Connection limit enforcement
                        let max = state.config.max_connections;
                        if max > 0 {
                            let current = state.active_connections.load(Ordering::Relaxed);
                            if current >= max {
                                warn!("Connection limit reached ({}/{}), rejecting {}", current, max, addr);
                                drop(stream);
                                continue;
                            }
                        }
                        state.active_connections.fetch_add(1, Ordering::Relaxed);

                        debug!("Accepted connection from {}", addr);
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, &state).await {
                                if e.is_fatal() {
                                    error!("Fatal: {}", e);
                                    state.fatal_tx.send_replace(Some(e.to_string()));
                                } else {
                                    debug!("Connection handler error: {}", e);
                                }
                            }
                            state.active_connections.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                    Err(e) => {
                        warn!("Accept error: {}", e);
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                // A dropped handle also stops the proxy
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Proxy server shutting down");
                    return;
                }
            }
            _ = fatal_rx.changed() => {
                if fatal_rx.borrow().is_some() {
                    error!("Proxy server stopping: policy can no longer be enforced");
                    return;
                }
            }
        }
    }
}

/// Handle a single client connection.
async fn handle_connection(mut stream: tokio::net::TcpStream, state: &ProxyState) -> Result<()> {
    // Keep the BufReader alive until the full head is consumed; it may
    // read ahead into the body.
    let mut buf_reader = BufReader::new(&mut stream);
    let mut first_line = String::new();
    buf_reader.read_line(&mut first_line).await?;

    if first_line.is_empty() {
        return Ok(()); // Client disconnected
    }

    let mut header_bytes = Vec::new();
    loop {
        let mut line = String::new();
        let n = buf_reader.read_line(&mut line).await?;
        if n == 0 || line.trim().is_empty() {
            break;
        }
        header_bytes.extend_from_slice(line.as_bytes());
        if header_bytes.len() > MAX_HEADER_SIZE {
            drop(buf_reader);
            let response = "HTTP/1.1 431 Request Header Fields Too Large\r\n\r\n";
            stream.write_all(response.as_bytes()).await?;
            return Ok(());
        }
    }

    let buffered = buf_reader.buffer().to_vec();
    drop(buf_reader);

    let first_line = first_line.trim_end();

    if first_line.starts_with("CONNECT ") {
        connect::handle_connect(first_line, &mut stream, &buffered).await
    } else if is_absolute_http(first_line) {
        let ctx = forward::ForwardCtx {
            engine: &state.engine,
            config: &state.config,
            fatal_tx: &state.fatal_tx,
        };
        forward::handle_forward(first_line, &mut stream, &header_bytes, &buffered, &ctx).await
    } else {
        // Origin-form requests are not addressed to a proxy
        let response = "HTTP/1.1 400 Bad Request\r\n\r\n";
        stream.write_all(response.as_bytes()).await?;
        Ok(())
    }
}

/// Whether the request target of `line` is an absolute `http://` URI.
fn is_absolute_http(line: &str) -> bool {
    line.split_whitespace()
        .nth(1)
        .and_then(|target| target.get(..7))
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("http://"))
}
