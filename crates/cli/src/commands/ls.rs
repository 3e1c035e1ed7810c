//! ls command - List files and directories

use clap::Args;
use jiff::Timestamp;

use xfer_core::path::{base_name, dir_key};
use xfer_core::{has_meta, Object, Results, SingleOperator};

use crate::commands::fail;
use crate::context::Context;
use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// List files and directories
#[derive(Args, Debug)]
pub struct LsArgs {
    /// Paths to list (profile:dir/, local dir, or a glob)
    #[arg(default_value = ".")]
    pub paths: Vec<String>,

    /// Use a long listing format
    #[arg(short = 'l', long)]
    pub long: bool,

    /// List sub-directories recursively
    #[arg(short = 'r', short_alias = 'R', long)]
    pub recursive: bool,
}

/// Execute the ls command
pub async fn execute(args: LsArgs, ctx: &Context, formatter: &Formatter) -> ExitCode {
    let mut status = ExitCode::Success;
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
        let key = if path.is_local() && path.key == "." {
            String::new()
        } else {
            path.key.clone()
        };

        if show_headers && !formatter.is_json() {
            formatter.println(&format!("{arg}:"));
        }
        status = status.or(list_one(&op, arg, &key, &args, formatter).await);
    }
    status
}

async fn list_one(
    op: &SingleOperator,
    arg: &str,
    key: &str,
    args: &LsArgs,
    formatter: &Formatter,
) -> ExitCode {
    let mut rows = Vec::new();

    if has_meta(key) {
        match op.glob(key).await {
            Ok(objects) => rows = objects,
            Err(e) => {
                formatter.item("ls", &e.to_string());
                return ExitCode::from_error(&e);
            }
        }
    } else {
        let object = match op.stat(key).await {
            Ok(object) => object,
            Err(e) if e.is_not_found() => {
                formatter.item("ls", &format!("cannot access '{arg}': No such file or directory"));
                return ExitCode::NotFound;
            }
            Err(e) => {
                formatter.item("ls", &e.to_string());
                return ExitCode::from_error(&e);
            }
        };
        if !object.is_dir() {
            rows.push(object);
        } else {
            let dir = dir_key(key);
            let listing = if args.recursive {
                op.list_recursively(&dir)
            } else {
                op.list(&dir)
            };
            match drain(listing, formatter, args, &dir).await {
                Ok(()) => return ExitCode::Success,
                Err(e) => {
                    formatter.item("ls", &e.to_string());
                    return ExitCode::from_error(&e);
                }
            }
        }
    }

    let mut printer = Printer::new(formatter, args.long, "");
    for object in &rows {
        printer.push(object);
    }
    printer.finish();
    ExitCode::Success
}

/// Print a listing as it arrives
async fn drain(
    mut listing: Results<Object>,
    formatter: &Formatter,
    args: &LsArgs,
    dir: &str,
) -> xfer_core::Result<()> {
    let mut printer = Printer::new(formatter, args.long, dir);
    while let Some(item) = listing.recv().await {
        printer.push(&item?);
    }
    printer.finish();
    Ok(())
}

/// Collects long-format rows into one table; short and JSON rows stream out
struct Printer<'a> {
    formatter: &'a Formatter,
    dir: &'a str,
    table: Option<comfy_table::Table>,
}

impl<'a> Printer<'a> {
    fn new(formatter: &'a Formatter, long: bool, dir: &'a str) -> Self {
        let table = (long && !formatter.is_json())
            .then(|| formatter.table(["MODE", "SIZE", "MODIFIED", "NAME"]));
        Self {
            formatter,
            dir,
            table,
        }
    }

    fn push(&mut self, object: &Object) {
        if self.formatter.is_json() {
            self.formatter.json_line(object);
            return;
        }

        let name = display_name(object, self.dir);
        let name = if object.is_dir() {
            self.formatter.dir_name(&name)
        } else {
            name
        };
        match &mut self.table {
            Some(table) => {
                table.add_row([
                    object.mode.to_string(),
                    object.size().to_string(),
                    object
                        .last_modified
                        .map(format_time)
                        .unwrap_or_else(|| self.formatter.dim("-")),
                    name,
                ]);
            }
            None => self.formatter.println(&name),
        }
    }

    fn finish(self) {
        if let Some(table) = &self.table {
            self.formatter.print_table(table);
        }
    }
}

/// Name relative to the listed directory; a glob or file match keeps its path
fn display_name(object: &Object, dir: &str) -> String {
    if dir.is_empty() {
        return object.path.clone();
    }
    match object.path.strip_prefix(dir) {
        Some(rel) if !rel.is_empty() => rel.to_string(),
        _ => base_name(&object.path).to_string(),
    }
}

/// `Jan 02 15:04` this year, `Jan 02  2006` otherwise
fn format_time(ts: Timestamp) -> String {
    let now = Timestamp::now();
    let zoned = ts.to_zoned(jiff::tz::TimeZone::UTC);
    if zoned.year() == now.to_zoned(jiff::tz::TimeZone::UTC).year() {
        zoned.strftime("%b %d %H:%M").to_string()
    } else {
        zoned.strftime("%b %d  %Y").to_string()
    }
}
