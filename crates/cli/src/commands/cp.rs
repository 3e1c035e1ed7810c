//! cp command - Copy files between storages
//!
//! Also hosts the batch logic `mv` shares: each source argument is resolved
//! (expanding globs), checked, and transferred below the target. A failing
//! source is reported and skipped; the others still run.

use clap::Args;
use serde::Serialize;

use xfer_core::path::{base_name, join_key};
use xfer_core::{has_meta, parse_size, Backend, DualOperator, Object, Results};

use crate::commands::fail;
use crate::context::Context;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, ProgressBar};

/// Flags shared by cp and mv
#[derive(Args, Debug)]
pub struct TransferArgs {
    /// Source paths followed by the target
    #[arg(required = true, num_args = 2.., value_name = "PATH")]
    pub paths: Vec<String>,

    /// Transfer directories recursively
    #[arg(short = 'r', short_alias = 'R', long)]
    pub recursive: bool,

    /// Files at least this large are transferred in parts (default from config, 1GiB)
    #[arg(long, env = "XFER_MULTIPART_THRESHOLD")]
    pub multipart_threshold: Option<String>,

    /// Part size for multipart transfers; planned from the target's limits when unset
    #[arg(long)]
    pub part_size: Option<String>,
}

/// Copy files between storages
#[derive(Args, Debug)]
pub struct CpArgs {
    #[command(flatten)]
    pub transfer: TransferArgs,
}

/// Copy or move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transfer {
    Copy,
    Move,
}

impl Transfer {
    fn command(self) -> &'static str {
        match self {
            Transfer::Copy => "cp",
            Transfer::Move => "mv",
        }
    }

    fn verb(self) -> &'static str {
        match self {
            Transfer::Copy => "copy",
            Transfer::Move => "move",
        }
    }

    async fn start(
        self,
        dual: &DualOperator,
        object: &Object,
        dst_key: &str,
        threshold: u64,
    ) -> xfer_core::Result<Results<()>> {
        if object.is_dir() {
            return Ok(match self {
                Transfer::Copy => dual.copy_recursively(&object.path, dst_key, threshold),
                Transfer::Move => dual.move_recursively(&object.path, dst_key, threshold),
            });
        }
        match self {
            Transfer::Copy => dual.copy_file(&object.path, dst_key, object.size(), threshold).await,
            Transfer::Move => dual.move_file(&object.path, dst_key, object.size(), threshold).await,
        }
    }
}

#[derive(Debug, Serialize)]
struct TransferOutput<'a> {
    status: &'static str,
    source: &'a str,
    target: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_bytes: Option<u64>,
}

/// A source object and the backend it lives on
struct Source {
    backend: Backend,
    object: Object,
}

/// Execute the cp command
pub async fn execute(args: CpArgs, ctx: &Context, formatter: &Formatter) -> ExitCode {
    run(Transfer::Copy, args.transfer, ctx, formatter).await
}

pub(crate) async fn run(
    kind: Transfer,
    args: TransferArgs,
    ctx: &Context,
    formatter: &Formatter,
) -> ExitCode {
    let cmd = kind.command();
    let threshold = match ctx.multipart_threshold(args.multipart_threshold.as_deref()) {
        Ok(threshold) => threshold,
        Err(e) => {
            formatter.error(&format!("{e:#}"));
            return ExitCode::UsageError;
        }
    };
    let part_size = match args.part_size.as_deref().map(parse_size).transpose() {
        Ok(part_size) => part_size,
        Err(e) => {
            formatter.error(&format!("--part-size: {e}"));
            return ExitCode::UsageError;
        }
    };
    let Some((target, sources)) = args.paths.split_last() else {
        formatter.error(&format!("{cmd} needs a source and a target"));
        return ExitCode::UsageError;
    };

    let (dst_path, dst) = match ctx.open(target).await {
        Ok(opened) => opened,
        Err(e) => return fail(formatter, e),
    };
    let dst_op = match ctx.single(dst.clone()) {
        Ok(op) => op,
        Err(e) => return fail(formatter, e),
    };
    let dst_object = match dst_op.stat(&dst_path.key).await {
        Ok(object) => Some(object),
        Err(e) if e.is_not_found() => None,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::from_error(&e);
        }
    };
    if dst_object.as_ref().is_some_and(Object::is_part) {
        formatter.item(cmd, &format!("target '{target}' is an in progress multipart upload task"));
        return ExitCode::Conflict;
    }

    let mut status = ExitCode::Success;
    let mut selected = Vec::new();
    for arg in sources {
        status = status.or(select(kind, ctx, arg, args.recursive, formatter, &mut selected).await);
    }

    if selected.len() > 1 && dst_object.as_ref().is_some_and(|o| !o.is_dir()) {
        formatter.item(cmd, &format!("target '{target}' is not a directory"));
        return ExitCode::Conflict;
    }
    let into_dir = selected.len() > 1 || dst_object.as_ref().is_some_and(Object::is_dir);

    let progress = ProgressBar::items(formatter.config(), cmd);
    for source in selected {
        let object = &source.object;
        // a file sent to `dir/` lands below it even before the directory exists
        let dst_key = if into_dir || (dst_path.is_dir() && !object.is_dir()) {
            join_key(&dst_path.key, base_name(&object.path))
        } else {
            dst_path.key.clone()
        };
        let dual = match ctx.dual(source.backend, dst.clone(), part_size) {
            Ok(dual) => dual,
            Err(e) => return fail(formatter, e),
        };
        if !object.is_dir() && dual.is_same_object(&object.path, &dst_key) {
            formatter.item(cmd, &format!("'{}' and '{dst_key}' are the same file", object.path));
            status = status.or(ExitCode::Conflict);
            continue;
        }

        let mut results = match kind.start(&dual, object, &dst_key, threshold).await {
            Ok(results) => results,
            Err(e) => {
                formatter.item(cmd, &format!("cannot {} '{}': {e}", kind.verb(), object.path));
                status = status.or(ExitCode::from_error(&e));
                continue;
            }
        };

        let mut failed = false;
        while let Some(result) = results.recv().await {
            match result {
                Ok(()) => progress.inc(),
                Err(e) => {
                    failed = true;
                    formatter.item(cmd, &e.to_string());
                    status = status.or(ExitCode::from_error(&e));
                }
            }
        }
        if !failed && formatter.is_json() {
            formatter.json_line(&TransferOutput {
                status: "success",
                source: &object.path,
                target: &dst_key,
                size_bytes: object.content_length,
            });
        }
    }
    progress.finish_and_clear();
    status
}

/// Resolve one source argument into transferable objects
async fn select(
    kind: Transfer,
    ctx: &Context,
    arg: &str,
    recursive: bool,
    formatter: &Formatter,
    out: &mut Vec<Source>,
) -> ExitCode {
    let cmd = kind.command();
    let (path, backend) = match ctx.open(arg).await {
        Ok(opened) => opened,
        Err(e) => return fail(formatter, e),
    };
    let op = match ctx.single(backend.clone()) {
        Ok(op) => op,
        Err(e) => return fail(formatter, e),
    };

    if has_meta(&path.key) {
        let objects = match op.glob(&path.key).await {
            Ok(objects) => objects,
            Err(e) => {
                formatter.item(cmd, &e.to_string());
                return ExitCode::from_error(&e);
            }
        };
        if objects.is_empty() {
            formatter.item(cmd, &format!("cannot stat '{arg}': No such file or directory"));
            return ExitCode::NotFound;
        }
        let mut status = ExitCode::Success;
        for object in objects {
            if object.is_dir() && !recursive {
                formatter.item(cmd, &format!("-r not specified; omitting directory '{}'", object.path));
                status = status.or(ExitCode::GeneralError);
                continue;
            }
            out.push(Source {
                backend: backend.clone(),
                object,
            });
        }
        return status;
    }

    let object = match op.stat(&path.key).await {
        Ok(object) => object,
        Err(e) if e.is_not_found() => {
            formatter.item(cmd, &format!("cannot stat '{arg}': No such file or directory"));
            return ExitCode::NotFound;
        }
        Err(e) => {
            formatter.item(cmd, &e.to_string());
            return ExitCode::from_error(&e);
        }
    };
    if object.is_dir() && !recursive {
        formatter.item(cmd, &format!("-r not specified; omitting directory '{arg}'"));
        return ExitCode::GeneralError;
    }
    if object.is_part() {
        formatter.item(
            cmd,
            &format!("cannot {} '{arg}': Is an in progress multipart upload task", kind.verb()),
        );
        return ExitCode::Conflict;
    }
    out.push(Source { backend, object });
    ExitCode::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Cli;
    use clap::Parser;

    #[test]
    fn test_transfer_names() {
        assert_eq!(Transfer::Copy.command(), "cp");
        assert_eq!(Transfer::Move.verb(), "move");
    }

    #[test]
    fn test_cp_needs_two_paths() {
        assert!(Cli::try_parse_from(["xfer", "cp", "a.txt"]).is_err());
        assert!(Cli::try_parse_from(["xfer", "cp", "a.txt", "b.txt", "dir/"]).is_ok());
    }

    #[test]
    fn test_cp_flags() {
        let cli = Cli::try_parse_from([
            "xfer",
            "cp",
            "-R",
            "--multipart-threshold",
            "100MiB",
            "--part-size",
            "8MiB",
            "src/",
            "media:dst/",
        ])
        .unwrap();
        let crate::commands::Commands::Cp(args) = cli.command else {
            panic!("expected cp");
        };
        assert!(args.transfer.recursive);
        assert_eq!(args.transfer.multipart_threshold.as_deref(), Some("100MiB"));
        assert_eq!(args.transfer.part_size.as_deref(), Some("8MiB"));
        assert_eq!(args.transfer.paths, vec!["src/", "media:dst/"]);
    }

    #[test]
    fn test_transfer_output_json() {
        let output = TransferOutput {
            status: "success",
            source: "a.txt",
            target: "dir/a.txt",
            size_bytes: Some(5),
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["target"], "dir/a.txt");
        assert_eq!(json["size_bytes"], 5);
    }
}
