//! CLI output styling for noxss

use colored::Colorize;
use std::net::SocketAddr;

/// Print the startup banner with the listen address and prompt backend.
pub fn print_banner(silent: bool, addr: SocketAddr, backend: &str) {
    if silent {
        return;
    }

    let title = "noxss".truecolor(204, 102, 0).bold();
    let ver = format!("v{}", env!("CARGO_PKG_VERSION")).white();

    eprintln!();
    eprintln!(" {} {}", title, ver);
    eprintln!(
        " {} {}",
        "proxy:".truecolor(150, 150, 150),
        format!("http://{}", addr).bold()
    );
    eprintln!(" {} {}", "prompt:".truecolor(150, 150, 150), backend);
    eprintln!();
}

/// Print why the proxy stopped accepting traffic.
pub fn print_fatal(message: &str) {
    eprintln!(
        "{} {}",
        "noxss stopped:".red().bold(),
        message
    );
    eprintln!(
        "{}",
        "Cross-origin requests can no longer be confirmed, so no further traffic is accepted."
            .yellow()
    );
}
