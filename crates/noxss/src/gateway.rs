//! Confirmation boundary for novel cross-origin requests.
//!
//! ```text
//! AdmissionEngine --[message]--> ConfirmationGateway --> human operator
//! ```
//!
//! The engine only calls the gateway when a request is cross-origin and no
//! allow-once entry matches. Concrete backends (desktop dialog, terminal
//! prompt) live in the CLI crate.

use crate::error::GatewayError;

/// Title shown on confirmation dialogs.
pub const DIALOG_TITLE: &str = "Noxss";

/// Build the question shown to the operator for `url`.
#[must_use]
pub fn confirmation_message(url: &str) -> String {
    format!("Do you want to run the following request?\n\n{}", url)
}

/// Trait for pluggable confirmation backends.
///
/// # Example
///
/// ```rust
/// use noxss::gateway::ConfirmationGateway;
/// use noxss::GatewayError;
///
/// struct DenyAll;
///
/// impl ConfirmationGateway for DenyAll {
///     fn confirm(&self, _message: &str) -> Result<bool, GatewayError> {
///         Ok(false)
///     }
///
///     fn backend_name(&self) -> &str {
///         "deny-all"
///     }
/// }
/// ```
pub trait ConfirmationGateway: Send + Sync {
    /// Ask the operator a yes/no question.
    ///
    /// Blocks until the operator answers. Returns `Ok(true)` on approval and
    /// `Ok(false)` when the operator declines.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when no answer can be obtained because the
    /// prompt mechanism itself is broken. Callers must not map this to
    /// either approval or decline.
    fn confirm(&self, message: &str) -> Result<bool, GatewayError>;

    /// Human-readable name for this backend (used in logs).
    fn backend_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_message_contains_url() {
        let msg = confirmation_message("http://b.test/x");
        assert_eq!(
            msg,
            "Do you want to run the following request?\n\nhttp://b.test/x"
        );
    }
}
