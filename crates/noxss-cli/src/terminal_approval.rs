//! Terminal-based confirmation backend
//!
//! Prompts on the controlling terminal when a page tries to load a
//! resource from another origin. Useful on machines without a desktop
//! session.

use colored::Colorize;
use noxss::{ConfirmationGateway, GatewayError};
use std::io::{BufRead, IsTerminal, Write};
use std::sync::Mutex;

/// Interactive terminal confirmation backend.
///
/// Prints the question to stderr and reads the answer from `/dev/tty`.
/// Questions from concurrent requests are asked one at a time.
#[derive(Debug, Default)]
pub struct TerminalGateway {
    prompt_lock: Mutex<()>,
}

impl TerminalGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check that a terminal is available for prompting.
    pub fn preflight() -> Result<(), GatewayError> {
        if !std::io::stderr().is_terminal() {
            return Err(GatewayError::Unavailable(
                "No terminal available for interactive confirmation".to_string(),
            ));
        }
        std::fs::File::open("/dev/tty").map(drop).map_err(|e| {
            GatewayError::Unavailable(format!("Failed to open /dev/tty: {e}"))
        })
    }
}

impl ConfirmationGateway for TerminalGateway {
    fn confirm(&self, message: &str) -> Result<bool, GatewayError> {
        if !std::io::stderr().is_terminal() {
            return Err(GatewayError::Unavailable(
                "No terminal available for interactive confirmation".to_string(),
            ));
        }

        let _guard = self
            .prompt_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        eprintln!();
        for line in message.lines() {
            eprintln!("[noxss] {}", line);
        }
        eprint!("[noxss] {} ", "Allow? [y/N]".bold());
        let _ = std::io::stderr().flush();

        let tty = std::fs::File::open("/dev/tty").map_err(|e| {
            GatewayError::Unavailable(format!("Failed to open /dev/tty for prompt: {e}"))
        })?;
        let mut reader = std::io::BufReader::new(tty);
        let mut input = String::new();
        reader.read_line(&mut input).map_err(|e| {
            GatewayError::Unavailable(format!("Failed to read confirmation response: {e}"))
        })?;

        Ok(is_yes(&input))
    }

    fn backend_name(&self) -> &str {
        "terminal"
    }
}

/// Whether a terminal answer means yes. Anything else declines.
fn is_yes(input: &str) -> bool {
    let input = input.trim().to_lowercase();
    input == "y" || input == "yes"
}
