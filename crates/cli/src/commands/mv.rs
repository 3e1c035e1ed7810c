//! mv command - Move files between storages
//!
//! A move copies first and deletes a source only after its copy finished
//! without error.

use clap::Args;

use super::cp::{run, Transfer, TransferArgs};
use crate::context::Context;
use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Move files between storages
#[derive(Args, Debug)]
pub struct MvArgs {
    #[command(flatten)]
    pub transfer: TransferArgs,
}

/// Execute the mv command
pub async fn execute(args: MvArgs, ctx: &Context, formatter: &Formatter) -> ExitCode {
    run(Transfer::Move, args.transfer, ctx, formatter).await
}
