//! SysTools - plugin-driven system deployment runner
//!
//! Main binary entry point for the command-line interface.

use clap::Parser;
use systools::cli::{normalize_legacy_flags, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_from(normalize_legacy_flags(std::env::args_os()));

    if let Err(e) = systools::cli::run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}
