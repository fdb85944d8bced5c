//! Error types for the noxss binary.

use noxss::GatewayError;
use noxss_proxy::ProxyError;
use thiserror::Error;

/// Errors that end the process with a non-zero status.
#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error("Confirmation prompt check failed: {0}")]
    Preflight(#[from] GatewayError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("{0}")]
    Fatal(String),
}

/// Result type alias for the binary.
pub type Result<T> = std::result::Result<T, CliError>;
