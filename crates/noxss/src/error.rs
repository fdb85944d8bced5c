//! Error types for the noxss core.

use thiserror::Error;

/// Failures of the confirmation boundary.
///
/// A user declining a request is not an error; gateways report that as
/// `Ok(false)`. These variants mean no answer could be obtained at all.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Confirmation prompt unavailable: {0}")]
    Unavailable(String),

    #[error("Confirmation prompt failed to start: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the admission engine.
#[derive(Error, Debug)]
pub enum NoxssError {
    /// The confirmation mechanism could not be used. Policy can no longer
    /// be enforced, so callers must stop serving traffic.
    #[error("Confirmation mechanism unavailable via {backend}: {source}")]
    ConfirmationUnavailable {
        backend: String,
        #[source]
        source: GatewayError,
    },

    #[error("Invalid request URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl NoxssError {
    /// Whether this error must terminate the process.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, NoxssError::ConfirmationUnavailable { .. })
    }
}

/// Result type alias for noxss operations.
pub type Result<T> = std::result::Result<T, NoxssError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_unavailable_is_fatal() {
        let err = NoxssError::ConfirmationUnavailable {
            backend: "zenity".to_string(),
            source: GatewayError::Unavailable("exit status 5".to_string()),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("zenity"));
    }

    #[test]
    fn test_invalid_url_is_not_fatal() {
        let err = NoxssError::InvalidUrl {
            url: "::".to_string(),
            reason: "relative URL without a base".to_string(),
        };
        assert!(!err.is_fatal());
    }
}
