//! CLI command definitions and execution
//!
//! Every command receives the loaded [`Context`] and a [`Formatter`] and
//! returns an exit code. Batch commands keep going past per-item failures
//! and exit with the code of the first one.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::context::{Context, GlobalOptions};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

mod cat;
mod completions;
mod cp;
mod ls;
mod mv;
mod profile;
mod rm;
mod sign;
mod stat;
mod sync;
mod tee;

/// xfer - multi-backend file operations
///
/// Paths are `profile:key` for a configured profile, or plain local paths.
#[derive(Parser, Debug)]
#[command(name = "xfer")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true, env = "XFER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of concurrent transfer workers
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    /// Read speed limit per operation, e.g. 10MiB
    #[arg(long, global = true)]
    pub read_speed_limit: Option<String>,

    /// Write speed limit per operation, e.g. 10MiB
    #[arg(long, global = true)]
    pub write_speed_limit: Option<String>,

    /// Output format: human-readable or JSON
    #[arg(long, global = true, default_value = "false")]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true, default_value = "false")]
    pub no_color: bool,

    /// Disable progress indication
    #[arg(long, global = true, default_value = "false")]
    pub no_progress: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true, default_value = "false")]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long, global = true, default_value = "false")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage storage profiles
    #[command(subcommand)]
    Profile(profile::ProfileCommands),

    /// List files and directories
    Ls(ls::LsArgs),

    /// Show file or storage metadata
    Stat(stat::StatArgs),

    /// Print file contents
    Cat(cat::CatArgs),

    /// Copy files between storages
    Cp(cp::CpArgs),

    /// Move files between storages
    Mv(mv::MvArgs),

    /// Remove files, directories or in-progress multipart uploads
    Rm(rm::RmArgs),

    /// Print signed read URLs
    Sign(sign::SignArgs),

    /// Save standard input to a file
    Tee(tee::TeeArgs),

    /// Make target directories reflect source directories
    Sync(sync::SyncArgs),

    /// Generate shell completions
    Completions(completions::CompletionsArgs),
}

/// Execute the CLI command and return an exit code
pub async fn execute(cli: Cli) -> ExitCode {
    let output_config = OutputConfig {
        json: cli.json,
        no_color: cli.no_color,
        no_progress: cli.no_progress,
        quiet: cli.quiet,
    };

    if let Commands::Completions(args) = cli.command {
        return completions::execute(args);
    }

    let global = GlobalOptions {
        config: cli.config,
        workers: cli.workers,
        read_speed_limit: cli.read_speed_limit,
        write_speed_limit: cli.write_speed_limit,
    };
    let ctx = match Context::load(&global) {
        Ok(ctx) => ctx,
        Err(e) => {
            Formatter::new(output_config).error(&format!("{e:#}"));
            return ExitCode::from_anyhow(&e);
        }
    };
    let formatter = Formatter::new(output_config.with_defaults(&ctx.config().defaults));

    match cli.command {
        Commands::Profile(cmd) => profile::execute(cmd, &ctx, &formatter).await,
        Commands::Ls(args) => ls::execute(args, &ctx, &formatter).await,
        Commands::Stat(args) => stat::execute(args, &ctx, &formatter).await,
        Commands::Cat(args) => cat::execute(args, &ctx, &formatter).await,
        Commands::Cp(args) => cp::execute(args, &ctx, &formatter).await,
        Commands::Mv(args) => mv::execute(args, &ctx, &formatter).await,
        Commands::Rm(args) => rm::execute(args, &ctx, &formatter).await,
        Commands::Sign(args) => sign::execute(args, &ctx, &formatter).await,
        Commands::Tee(args) => tee::execute(args, &ctx, &formatter).await,
        Commands::Sync(args) => sync::execute(args, &ctx, &formatter).await,
        Commands::Completions(_) => ExitCode::Success,
    }
}

/// Report a failed setup step and turn it into an exit code
pub(crate) fn fail(formatter: &Formatter, err: anyhow::Error) -> ExitCode {
    formatter.error(&format!("{err:#}"));
    ExitCode::from_anyhow(&err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "xfer",
            "cp",
            "a.txt",
            "media:a.txt",
            "--workers",
            "8",
            "--read-speed-limit",
            "1MiB",
            "--json",
        ])
        .unwrap();
        assert_eq!(cli.workers, Some(8));
        assert_eq!(cli.read_speed_limit.as_deref(), Some("1MiB"));
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Cp(_)));
    }
}
