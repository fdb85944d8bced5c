//! Intercepting forward proxy for the noxss request firewall.
//!
//! `noxss-proxy` is the transport around the [`noxss`] admission engine:
//!
//! 1. **Forward** (`forward`) - Plain HTTP requests in absolute form. Each
//!    request is admitted or blocked by the engine; `text/*` responses are
//!    scanned for embedded resources before being relayed unchanged.
//!
//! 2. **CONNECT tunnel** (`connect`) - HTTPS traffic. The proxy does not
//!    terminate TLS, so tunnels are relayed without inspection.
//!
//! A failure of the confirmation mechanism is fatal: the accept loop stops
//! and [`ProxyHandle::fatal`] resolves so the binary can exit.

pub mod audit;
pub mod config;
pub mod connect;
pub mod error;
pub mod forward;
pub mod server;

pub use config::ProxyConfig;
pub use error::{ProxyError, Result};
pub use server::{start, start_with_engine, ProxyHandle};
