//! CLI argument definitions for noxss
//!
//! Uses clap for argument parsing. All options are read once at startup.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// noxss - Cross-origin request firewall
///
/// An HTTP proxy that asks before letting a page load resources from other
/// origins. Resources embedded in pages you navigated to are allowed once
/// without asking.
#[derive(Parser, Debug)]
#[command(name = "noxss")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    # Listen on all interfaces, port 8080, ask with a desktop dialog
    noxss

    # Listen on localhost only and log every request
    noxss --addr 127.0.0.1:3128 -v

    # Ask in the terminal and block unanswered requests after 30 seconds
    noxss --prompt terminal --confirm-timeout 30
")]
pub struct Cli {
    /// Proxy listen address (`:PORT` listens on all interfaces)
    #[arg(long, default_value = ":8080", value_name = "ADDR")]
    pub addr: String,

    /// Log every proxied request (-v info, -vv debug, -vvv trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Silent mode - suppress the startup banner
    #[arg(long, short = 's')]
    pub silent: bool,

    /// How to ask about cross-origin requests
    #[arg(long, value_enum, default_value_t = PromptKind::Zenity)]
    pub prompt: PromptKind,

    /// Path to the zenity binary used for dialog prompts
    #[arg(long, value_name = "PATH", default_value = "/usr/bin/zenity")]
    pub zenity_bin: PathBuf,

    /// Block requests left unanswered for this many seconds (default: wait forever).
    /// The prompt stays open after the request is blocked; its answer is ignored.
    #[arg(long, value_name = "SECS")]
    pub confirm_timeout: Option<u64>,
}

/// Confirmation prompt backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PromptKind {
    /// Desktop dialog via zenity
    Zenity,
    /// Question on the controlling terminal
    Terminal,
}
