//! xfer - multi-backend file operations
//!
//! Copies, moves, syncs and inspects files across local directories and
//! S3-compatible object storage.

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use xfer_cli::commands::{self, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so that cat and tee output stays clean
    let filter = if cli.debug {
        EnvFilter::new("xfer_core=debug,xfer_s3=debug,xfer_fs=debug,xfer_cli=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_ansi(!cli.no_color))
        .with(filter)
        .init();

    let exit_code = commands::execute(cli).await;

    std::process::exit(exit_code.as_i32());
}
