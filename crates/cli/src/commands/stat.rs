//! stat command - Show file or storage metadata
//!
//! `profile:` with an empty key describes the storage itself.

use clap::Args;
use serde::Serialize;

use xfer_core::{Capabilities, Object, StorageMeta};

use crate::commands::fail;
use crate::context::Context;
use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Show file or storage metadata
#[derive(Args, Debug)]
pub struct StatArgs {
    /// File path, or `profile:` for the storage
    pub path: String,
}

#[derive(Debug, Serialize)]
struct StorageOutput {
    #[serde(flatten)]
    meta: StorageMeta,
    capabilities: Capabilities,
}

#[derive(Debug, Serialize)]
struct StatOutput<'a> {
    path: &'a str,
    mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_human: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    etag: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    multipart_id: Option<&'a str>,
    #[serde(skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    system_metadata: &'a std::collections::BTreeMap<String, String>,
    #[serde(skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    user_metadata: &'a std::collections::BTreeMap<String, String>,
}

impl<'a> From<&'a Object> for StatOutput<'a> {
    fn from(object: &'a Object) -> Self {
        Self {
            path: &object.path,
            mode: object.mode.to_string(),
            size: object.content_length,
            size_human: object.size_human(),
            last_modified: object.last_modified.map(|ts| ts.to_string()),
            etag: object.etag.as_deref(),
            content_type: object.content_type.as_deref(),
            multipart_id: object.multipart_id.as_deref(),
            system_metadata: &object.system_metadata,
            user_metadata: &object.user_metadata,
        }
    }
}

/// Execute the stat command
pub async fn execute(args: StatArgs, ctx: &Context, formatter: &Formatter) -> ExitCode {
    let (path, backend) = match ctx.open(&args.path).await {
        Ok(opened) => opened,
        Err(e) => return fail(formatter, e),
    };

    if !path.is_local() && path.key.is_empty() {
        let output = StorageOutput {
            meta: backend.metadata(),
            capabilities: backend.capabilities(),
        };
        print_storage(&output, formatter);
        return ExitCode::Success;
    }

    let op = match ctx.single(backend) {
        Ok(op) => op,
        Err(e) => return fail(formatter, e),
    };
    match op.stat(&path.key).await {
        Ok(object) => {
            print_object(&StatOutput::from(&object), formatter);
            ExitCode::Success
        }
        Err(e) if e.is_not_found() => {
            formatter.item("stat", &format!("cannot stat '{}': No such file or directory", args.path));
            ExitCode::NotFound
        }
        Err(e) => {
            formatter.error(&e.to_string());
            ExitCode::from_error(&e)
        }
    }
}

fn print_storage(output: &StorageOutput, formatter: &Formatter) {
    if formatter.is_json() {
        formatter.json(output);
        return;
    }
    let meta = &output.meta;
    formatter.println(&format!("Service   : {}", meta.service));
    formatter.println(&format!("Name      : {}", meta.name));
    formatter.println(&format!("WorkDir   : {}", meta.work_dir));
    if let Some(location) = &meta.location {
        formatter.println(&format!("Location  : {location}"));
    }
    let limits = &meta.multipart;
    if let Some(min) = limits.min_part_size {
        formatter.println(&format!("MinPart   : {}", humansize::format_size(min, humansize::BINARY)));
    }
    if let Some(max) = limits.max_part_size {
        formatter.println(&format!("MaxPart   : {}", humansize::format_size(max, humansize::BINARY)));
    }
    if let Some(count) = limits.max_part_count {
        formatter.println(&format!("MaxParts  : {count}"));
    }
    formatter.println(&format!(
        "Multipart : {}",
        if output.capabilities.multipart { "yes" } else { "no" }
    ));
    formatter.println(&format!(
        "Sign      : {}",
        if output.capabilities.sign { "yes" } else { "no" }
    ));
}

fn print_object(output: &StatOutput, formatter: &Formatter) {
    if formatter.is_json() {
        formatter.json(output);
        return;
    }
    formatter.println(&format!("Path      : {}", output.path));
    formatter.println(&format!("Mode      : {}", output.mode));
    if let (Some(size), Some(human)) = (output.size, &output.size_human) {
        formatter.println(&format!("Size      : {size} ({human})"));
    }
    if let Some(modified) = &output.last_modified {
        formatter.println(&format!("Modified  : {modified}"));
    }
    if let Some(etag) = output.etag {
        formatter.println(&format!("ETag      : {etag}"));
    }
    if let Some(ct) = output.content_type {
        formatter.println(&format!("Type      : {ct}"));
    }
    if let Some(id) = output.multipart_id {
        formatter.println(&format!("UploadID  : {id}"));
    }
    for (k, v) in output.system_metadata.iter().chain(output.user_metadata) {
        formatter.println(&format!("  {k}: {v}"));
    }
}
