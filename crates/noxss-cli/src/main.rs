//! noxss CLI - interactive cross-origin request firewall
//!
//! Runs the noxss proxy with a confirmation backend chosen on the command
//! line.

mod cli;
mod error;
mod output;
mod terminal_approval;
mod zenity;

use clap::Parser;
use cli::{Cli, PromptKind};
use error::{CliError, Result};
use noxss::ConfirmationGateway;
use noxss_proxy::config::parse_listen_addr;
use noxss_proxy::ProxyConfig;
use std::sync::Arc;
use terminal_approval::TerminalGateway;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zenity::ZenityGateway;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        if let CliError::Fatal(ref msg) = e {
            output::print_fatal(msg);
        } else {
            eprintln!("noxss: {}", e);
        }
        std::process::exit(1);
    }
}

/// Initialize logging. `RUST_LOG` wins when `-v` is not given.
fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let bind_addr = parse_listen_addr(&cli.addr)?;
    let gateway = build_gateway(&cli)?;

    let config = ProxyConfig {
        bind_addr,
        verbose: cli.verbose > 0,
        confirm_timeout_secs: cli.confirm_timeout,
        ..Default::default()
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(serve(config, gateway, cli.silent));
    // Pending prompts sit on blocking threads; do not wait for them
    runtime.shutdown_background();
    result
}

/// Build the chosen confirmation backend and check that it works.
fn build_gateway(cli: &Cli) -> Result<Arc<dyn ConfirmationGateway>> {
    match cli.prompt {
        PromptKind::Zenity => {
            let gateway = ZenityGateway::new(&cli.zenity_bin);
            gateway.preflight()?;
            info!("Using zenity at {}", gateway.bin().display());
            Ok(Arc::new(gateway))
        }
        PromptKind::Terminal => {
            TerminalGateway::preflight()?;
            Ok(Arc::new(TerminalGateway::new()))
        }
    }
}

/// Run the proxy until Ctrl-C or a fatal error.
async fn serve(
    config: ProxyConfig,
    gateway: Arc<dyn ConfirmationGateway>,
    silent: bool,
) -> Result<()> {
    let backend = gateway.backend_name().to_string();
    let handle = noxss_proxy::start(config, gateway).await?;
    output::print_banner(silent, handle.addr, &backend);

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Interrupted, shutting down");
            handle.shutdown();
            Ok(())
        }
        fatal = handle.fatal() => match fatal {
            Some(msg) => Err(CliError::Fatal(msg)),
            None => Ok(()),
        },
    }
}
