//! cat command - Print file contents
//!
//! Streams each file to stdout in argument order.

use clap::Args;
use tokio::io::AsyncWriteExt;

use crate::commands::fail;
use crate::context::Context;
use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Print file contents
#[derive(Args, Debug)]
pub struct CatArgs {
    /// Files to print
    #[arg(required = true)]
    pub paths: Vec<String>,
}

/// Execute the cat command
pub async fn execute(args: CatArgs, ctx: &Context, formatter: &Formatter) -> ExitCode {
    let mut status = ExitCode::Success;
    let mut stdout = tokio::io::stdout();

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

        match op.stat(&path.key).await {
            Ok(object) if object.is_dir() => {
                formatter.item("cat", &format!("'{arg}': Is a directory"));
                status = status.or(ExitCode::Conflict);
                continue;
            }
            Ok(object) if object.is_part() => {
                formatter.item("cat", &format!("'{arg}': Is an in progress multipart upload task"));
                status = status.or(ExitCode::Conflict);
                continue;
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                formatter.item("cat", &format!("'{arg}': No such file or directory"));
                status = status.or(ExitCode::NotFound);
                continue;
            }
            Err(e) => {
                formatter.error(&e.to_string());
                status = status.or(ExitCode::from_error(&e));
                continue;
            }
        }

        if let Err(e) = op.cat_file(&path.key, &mut stdout).await {
            formatter.error(&e.to_string());
            status = status.or(ExitCode::from_error(&e));
        }
    }

    if let Err(e) = stdout.flush().await {
        tracing::debug!(error = %e, "flush stdout");
    }
    status
}
