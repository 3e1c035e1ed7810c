//! sync command - Make target directories reflect source directories
//!
//! Both sources and target are directories and must be written with a
//! trailing `/` or as a bare `profile:`. With several sources every file
//! keeps its full source path below the target.

use clap::Args;
use regex::Regex;

use xfer_core::{parse_path, SyncAction, SyncOptions};

use crate::commands::fail;
use crate::context::Context;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, ProgressBar};

/// Make target directories reflect source directories
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Source directories followed by the target directory, each ending with '/'
    #[arg(required = true, num_args = 2.., value_name = "DIR")]
    pub paths: Vec<String>,

    /// Sync sub-directories recursively
    #[arg(short = 'r', short_alias = 'R', long)]
    pub recursive: bool,

    /// Only update files the target already has
    #[arg(long)]
    pub existing: bool,

    /// Skip files the target already has
    #[arg(long)]
    pub ignore_existing: bool,

    /// Skip files whose target copy is at least as new as the source
    #[arg(long)]
    pub update: bool,

    /// Remove target files the source does not have
    #[arg(long)]
    pub remove: bool,

    /// Skip relative paths matching this regular expression
    #[arg(long, value_name = "REGEX")]
    pub exclude: Option<String>,

    /// Keep excluded paths that also match this regular expression
    #[arg(long, value_name = "REGEX")]
    pub include: Option<String>,

    /// Files at least this large are transferred in parts (default from config, 1GiB)
    #[arg(long, env = "XFER_MULTIPART_THRESHOLD")]
    pub multipart_threshold: Option<String>,
}

/// Execute the sync command
pub async fn execute(args: SyncArgs, ctx: &Context, formatter: &Formatter) -> ExitCode {
    let opts = match options(&args, ctx) {
        Ok(opts) => opts,
        Err(message) => {
            formatter.error(&message);
            return ExitCode::UsageError;
        }
    };
    let Some((target, sources)) = args.paths.split_last() else {
        formatter.error("sync needs a source and a target");
        return ExitCode::UsageError;
    };

    let (dst_path, dst) = match ctx.open(target).await {
        Ok(opened) => opened,
        Err(e) => return fail(formatter, e),
    };

    let mut status = ExitCode::Success;
    let progress = ProgressBar::items(formatter.config(), "sync");
    for arg in sources {
        let (src_path, src) = match ctx.open(arg).await {
            Ok(opened) => opened,
            Err(e) => {
                status = status.or(fail(formatter, e));
                continue;
            }
        };
        let src_op = match ctx.single(src.clone()) {
            Ok(op) => op,
            Err(e) => return fail(formatter, e),
        };
        match src_op.stat(&src_path.key).await {
            Ok(object) if object.is_dir() => {}
            Ok(_) => {
                formatter.item("sync", &format!("'{arg}' is not a directory"));
                status = status.or(ExitCode::Conflict);
                continue;
            }
            Err(e) if e.is_not_found() => {
                formatter.item("sync", &format!("cannot stat '{arg}': No such file or directory"));
                status = status.or(ExitCode::NotFound);
                continue;
            }
            Err(e) => {
                formatter.item("sync", &e.to_string());
                status = status.or(ExitCode::from_error(&e));
                continue;
            }
        }

        let dual = match ctx.dual(src, dst.clone(), None) {
            Ok(dual) => dual,
            Err(e) => return fail(formatter, e),
        };
        let mut results = dual.sync_dir(&src_path.key, &dst_path.key, opts.clone());
        while let Some(result) = results.recv().await {
            match result {
                Ok(action) => {
                    progress.inc();
                    report(formatter, &progress, &action);
                }
                Err(e) => {
                    formatter.item("sync", &e.to_string());
                    status = status.or(ExitCode::from_error(&e));
                }
            }
        }
    }
    progress.finish_and_clear();
    status
}

/// Validate the arguments and build the sync policy
fn options(args: &SyncArgs, ctx: &Context) -> Result<SyncOptions, String> {
    for path in &args.paths {
        let is_dir = parse_path(path).map_err(|e| e.to_string())?.is_dir();
        if !is_dir {
            return Err(format!("'{path}' is not a directory path, add a trailing '/'"));
        }
    }
    let multi_arg = args.paths.len() > 2;
    if multi_arg && args.remove {
        return Err("--remove cannot be used with multiple sources".to_string());
    }

    let compile = |flag: &str, pattern: &Option<String>| {
        pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| format!("--{flag}: {e}"))
    };
    let exclude = compile("exclude", &args.exclude)?;
    let include = compile("include", &args.include)?;

    let multipart_threshold = ctx
        .multipart_threshold(args.multipart_threshold.as_deref())
        .map_err(|e| format!("{e:#}"))?;

    Ok(SyncOptions {
        recursive: args.recursive,
        multipart_threshold,
        existing: args.existing,
        ignore_existing: args.ignore_existing,
        update: args.update,
        remove: args.remove,
        exclude,
        include,
        multi_arg,
    })
}

fn report(formatter: &Formatter, progress: &ProgressBar, action: &SyncAction) {
    if formatter.is_json() {
        formatter.json_line(action);
        return;
    }
    let line = match action {
        SyncAction::Copied(path) => format!("{path} synced."),
        SyncAction::Removed(path) => format!("{path} removed."),
    };
    if progress.is_visible() {
        progress.println(&line);
    } else {
        formatter.println(&line);
    }
}
