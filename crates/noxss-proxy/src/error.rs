//! Error types for the noxss-proxy crate.

use thiserror::Error;

/// Errors that can occur in the intercepting proxy.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Proxy bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Upstream connection failed to {host}: {reason}")]
    UpstreamConnect { host: String, reason: String },

    #[error("Admission failed: {0}")]
    Admission(#[from] noxss::NoxssError),

    #[error("Admission task failed: {0}")]
    Task(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP parse error: {0}")]
    HttpParse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
    /// Whether this error means the proxy can no longer enforce its policy
    /// and must stop serving traffic.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProxyError::Admission(e) if e.is_fatal())
    }
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;
    use noxss::{GatewayError, NoxssError};

    #[test]
    fn test_confirmation_unavailable_is_fatal() {
        let err = ProxyError::from(NoxssError::ConfirmationUnavailable {
            backend: "zenity".to_string(),
            source: GatewayError::Unavailable("exit status 255".to_string()),
        });
        assert!(err.is_fatal());
    }

    #[test]
    fn test_transport_errors_are_not_fatal() {
        let err = ProxyError::UpstreamConnect {
            host: "a.test".to_string(),
            reason: "connection refused".to_string(),
        };
        assert!(!err.is_fatal());
        assert!(!ProxyError::HttpParse("bad".to_string()).is_fatal());
    }
}
