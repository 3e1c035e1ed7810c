//! sign command - Print signed read URLs

use std::time::Duration;

use clap::Args;
use serde::Serialize;

use crate::commands::fail;
use crate::context::Context;
use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Print signed read URLs
#[derive(Args, Debug)]
pub struct SignArgs {
    /// Files to sign
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Seconds until the signed URL expires
    #[arg(long, default_value_t = 300)]
    pub expire: u64,
}

#[derive(Debug, Serialize)]
struct SignOutput<'a> {
    path: &'a str,
    url: &'a str,
    expires_in: u64,
}

/// Execute the sign command
pub async fn execute(args: SignArgs, ctx: &Context, formatter: &Formatter) -> ExitCode {
    let mut status = ExitCode::Success;
    let expire = Duration::from_secs(args.expire);
    let show_headers = args.paths.len() > 1;

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
                formatter.item("sign", &format!("'{arg}': Is a directory"));
                status = status.or(ExitCode::Conflict);
                continue;
            }
            Ok(object) if object.is_part() => {
                formatter.item("sign", &format!("'{arg}': Is an in progress multipart upload task"));
                status = status.or(ExitCode::Conflict);
                continue;
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                formatter.item("sign", &format!("'{arg}': No such file or directory"));
                status = status.or(ExitCode::NotFound);
                continue;
            }
            Err(e) => {
                formatter.item("sign", &e.to_string());
                status = status.or(ExitCode::from_error(&e));
                continue;
            }
        }

        let url = match op.sign(&path.key, expire).await {
            Ok(url) => url,
            Err(e) => {
                formatter.item("sign", &format!("'{arg}': {e}"));
                status = status.or(ExitCode::from_error(&e));
                continue;
            }
        };

        if formatter.is_json() {
            formatter.json_line(&SignOutput {
                path: arg,
                url: &url,
                expires_in: args.expire,
            });
        } else {
            if show_headers {
                formatter.println(&format!("{arg}:"));
            }
            formatter.println(&url);
        }
    }
    status
}
