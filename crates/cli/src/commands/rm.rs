//! rm command - Remove files
//!
//! Removes files, directory trees (`-r`), or in-progress multipart uploads
//! (`--multipart`).

use clap::Args;
use serde::Serialize;

use xfer_core::{Results, SingleOperator};

use crate::commands::fail;
use crate::context::Context;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, ProgressBar};

/// Remove files
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Paths to remove
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Remove directories and their contents recursively
    #[arg(short = 'r', short_alias = 'R', long)]
    pub recursive: bool,

    /// Abort in-progress multipart uploads; with -r, every upload below the path
    #[arg(long)]
    pub multipart: bool,
}

#[derive(Debug, Serialize)]
struct RmOutput<'a> {
    status: &'static str,
    path: &'a str,
}

/// Execute the rm command
pub async fn execute(args: RmArgs, ctx: &Context, formatter: &Formatter) -> ExitCode {
    let mut status = ExitCode::Success;
    let progress = ProgressBar::items(formatter.config(), "rm");

    for arg in &args.paths {
        let (path, backend) = match ctx.open(arg).await {
            Ok(opened) => opened,
            Err(e) => {
                status = status.or(fail(formatter, e));
                continue;
            }
        };
        let op = match ctx.single(backend) {
            Ok(op) => op,
            Err(e) => return fail(formatter, e),
        };

        let code = remove_one(&op, arg, &path.key, &args, formatter, &progress).await;
        if code == ExitCode::Success && formatter.is_json() {
            formatter.json_line(&RmOutput {
                status: "success",
                path: arg,
            });
        }
        status = status.or(code);
    }

    progress.finish_and_clear();
    status
}

async fn remove_one(
    op: &SingleOperator,
    arg: &str,
    key: &str,
    args: &RmArgs,
    formatter: &Formatter,
    progress: &ProgressBar,
) -> ExitCode {
    // uploads below a prefix need no stat, the prefix itself may not exist
    if args.multipart && args.recursive {
        return match op.delete_multipart_via_recursively(key) {
            Ok(results) => drain(results, formatter, progress).await,
            Err(e) => report(formatter, arg, &e),
        };
    }

    let object = match op.stat(key).await {
        Ok(object) => object,
        Err(e) if e.is_not_found() => {
            formatter.item("rm", &format!("cannot remove '{arg}': No such file or directory"));
            return ExitCode::NotFound;
        }
        Err(e) => return report(formatter, arg, &e),
    };

    if object.is_part() {
        if !args.multipart {
            formatter.item(
                "rm",
                &format!("cannot remove '{arg}': Is an in progress multipart upload task"),
            );
            return ExitCode::Conflict;
        }
        return match op.delete_multipart(key) {
            Ok(results) => drain(results, formatter, progress).await,
            Err(e) => report(formatter, arg, &e),
        };
    }

    if object.is_dir() {
        if !args.recursive {
            formatter.item("rm", &format!("cannot remove '{arg}': Is a directory"));
            return ExitCode::GeneralError;
        }
        return drain(op.delete_recursively(key), formatter, progress).await;
    }

    match op.delete(key).await {
        Ok(()) => {
            progress.inc();
            ExitCode::Success
        }
        Err(e) => report(formatter, arg, &e),
    }
}

async fn drain(mut results: Results<()>, formatter: &Formatter, progress: &ProgressBar) -> ExitCode {
    let mut status = ExitCode::Success;
    while let Some(result) = results.recv().await {
        match result {
            Ok(()) => progress.inc(),
            Err(e) => {
                formatter.item("rm", &e.to_string());
                status = status.or(ExitCode::from_error(&e));
            }
        }
    }
    status
}

fn report(formatter: &Formatter, arg: &str, err: &xfer_core::Error) -> ExitCode {
    formatter.item("rm", &format!("cannot remove '{arg}': {err}"));
    ExitCode::from_error(err)
}
