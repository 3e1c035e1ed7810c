//! tee command - Save standard input to a file
//!
//! Piped input streams straight to the target, going multipart once it
//! outgrows `--expect-size`. On a terminal, lines are echoed back as they are
//! typed and the collected input is saved at end of input or on SIGINT/SIGTERM.

use std::io::IsTerminal;

use clap::Args;
use serde::Serialize;
use tokio::io::BufReader;

use xfer_core::parse_size;

use crate::commands::fail;
use crate::context::Context;
use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Save standard input to a file
#[derive(Args, Debug)]
pub struct TeeArgs {
    /// Target file
    pub path: String,

    /// Expected input size, used to pick the part size
    #[arg(long, default_value = "128MiB")]
    pub expect_size: String,
}

#[derive(Debug, Serialize)]
struct TeeOutput<'a> {
    status: &'static str,
    path: &'a str,
    size_bytes: u64,
}

/// Execute the tee command
pub async fn execute(args: TeeArgs, ctx: &Context, formatter: &Formatter) -> ExitCode {
    let expected_size = match parse_size(&args.expect_size) {
        Ok(size) => size,
        Err(e) => {
            formatter.error(&format!("--expect-size: {e}"));
            return ExitCode::UsageError;
        }
    };

    let (path, backend) = match ctx.open(&args.path).await {
        Ok(opened) => opened,
        Err(e) => return fail(formatter, e),
    };
    let op = match ctx.single(backend) {
        Ok(op) => op,
        Err(e) => return fail(formatter, e),
    };

    match op.stat(&path.key).await {
        Ok(object) if object.is_dir() => {
            formatter.item("tee", &format!("'{}': Is a directory", args.path));
            return ExitCode::Conflict;
        }
        Ok(object) if object.is_part() => {
            formatter.item(
                "tee",
                &format!("'{}': Is an in progress multipart upload task", args.path),
            );
            return ExitCode::Conflict;
        }
        Ok(_) => {}
        Err(e) if e.is_not_found() => {}
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::from_error(&e);
        }
    }

    let written = if std::io::stdin().is_terminal() {
        let mut stdout = tokio::io::stdout();
        op.tee_run(
            &path.key,
            BufReader::new(tokio::io::stdin()),
            &mut stdout,
            expected_size,
            shutdown_signal(),
        )
        .await
    } else {
        op.tee_run_via_pipe(&path.key, &mut tokio::io::stdin(), expected_size)
            .await
    };

    match written {
        Ok(size) => {
            if formatter.is_json() {
                formatter.json(&TeeOutput {
                    status: "success",
                    path: &args.path,
                    size_bytes: size,
                });
            } else {
                formatter.println(&format!("Stdin is saved to <{}>", args.path));
            }
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&format!("tee '{}': {e}", args.path));
            ExitCode::from_error(&e)
        }
    }
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::debug!(error = %e, "install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::debug!(error = %e, "install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
