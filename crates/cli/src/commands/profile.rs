//! Profile management commands
//!
//! Profiles are named storage backends: a local directory or an S3 bucket,
//! including connection details and credentials.

use clap::Subcommand;
use serde::Serialize;

use xfer_core::{Profile, Service};

use crate::context::Context;
use crate::exit_code::ExitCode;
use crate::output::Formatter;

/// Profile subcommands
#[derive(Subcommand, Debug)]
pub enum ProfileCommands {
    /// Add a profile
    Add(AddArgs),

    /// List all configured profiles
    List(ListArgs),

    /// Remove a profile
    Remove(RemoveArgs),
}

/// Arguments for the `profile add` command
#[derive(clap::Args, Debug)]
pub struct AddArgs {
    /// Profile name (letters, digits, '_' or '-')
    pub name: String,

    /// Storage service: fs or s3
    #[arg(long, default_value = "fs")]
    pub service: Service,

    /// Root every key is resolved against (a directory for fs, a key prefix for s3)
    #[arg(long, default_value = "")]
    pub work_dir: String,

    /// Bucket name (s3)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Endpoint URL (s3), e.g. http://localhost:9000
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Access key ID (s3)
    #[arg(long, env = "XFER_ACCESS_KEY", hide_env_values = true)]
    pub access_key: Option<String>,

    /// Secret access key (s3)
    #[arg(long, env = "XFER_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Region (s3)
    #[arg(long, default_value = "us-east-1")]
    pub region: String,

    /// Bucket lookup style: auto, path, or dns
    #[arg(long, default_value = "auto")]
    pub bucket_lookup: String,

    /// Replace a profile with the same name
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `profile list` command
#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Show service details
    #[arg(short, long)]
    pub long: bool,
}

/// Arguments for the `profile remove` command
#[derive(clap::Args, Debug)]
pub struct RemoveArgs {
    /// Name of the profile to remove
    pub name: String,
}

/// Profile information for output, without credentials
#[derive(Debug, Serialize)]
struct ProfileInfo {
    name: String,
    service: Service,
    work_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    bucket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<String>,
}

impl From<&Profile> for ProfileInfo {
    fn from(profile: &Profile) -> Self {
        Self {
            name: profile.name.clone(),
            service: profile.service,
            work_dir: profile.work_dir.clone(),
            bucket: profile.bucket.clone(),
            endpoint: profile.endpoint.clone(),
            region: (profile.service == Service::S3).then(|| profile.region.clone()),
        }
    }
}

/// Execute a profile subcommand
pub async fn execute(cmd: ProfileCommands, ctx: &Context, formatter: &Formatter) -> ExitCode {
    match cmd {
        ProfileCommands::Add(args) => execute_add(args, ctx, formatter),
        ProfileCommands::List(args) => execute_list(args, ctx, formatter),
        ProfileCommands::Remove(args) => execute_remove(args, ctx, formatter),
    }
}

fn build_profile(args: AddArgs) -> Result<Profile, String> {
    if !matches!(args.bucket_lookup.as_str(), "auto" | "path" | "dns") {
        return Err("Bucket lookup must be 'auto', 'path', or 'dns'".into());
    }
    if args.service == Service::Fs && args.bucket.is_some() {
        return Err("--bucket only applies to s3 profiles".into());
    }

    Ok(Profile {
        name: args.name,
        service: args.service,
        work_dir: args.work_dir,
        bucket: args.bucket,
        endpoint: args.endpoint,
        access_key: args.access_key,
        secret_key: args.secret_key,
        region: args.region,
        bucket_lookup: args.bucket_lookup,
    })
}

fn execute_add(args: AddArgs, ctx: &Context, formatter: &Formatter) -> ExitCode {
    let force = args.force;
    let profile = match build_profile(args) {
        Ok(profile) => profile,
        Err(msg) => {
            formatter.error(&msg);
            return ExitCode::UsageError;
        }
    };
    let name = profile.name.clone();
    let info = ProfileInfo::from(&profile);

    let saved = if force {
        ctx.profiles().set(profile)
    } else {
        ctx.profiles().add(profile)
    };
    match saved {
        Ok(()) => {
            if formatter.is_json() {
                formatter.json(&info);
            } else {
                formatter.success(&format!("Profile '{name}' added."));
            }
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&e.to_string());
            ExitCode::from_error(&e)
        }
    }
}

fn execute_list(args: ListArgs, ctx: &Context, formatter: &Formatter) -> ExitCode {
    let profiles = match ctx.profiles().list() {
        Ok(profiles) => profiles,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::from_error(&e);
        }
    };

    if formatter.is_json() {
        let infos: Vec<ProfileInfo> = profiles.iter().map(ProfileInfo::from).collect();
        formatter.json(&infos);
    } else if profiles.is_empty() {
        formatter.println("No profiles configured.");
    } else if args.long {
        let mut table = formatter.table(["NAME", "SERVICE", "LOCATION", "WORK DIR"]);
        for profile in &profiles {
            let location = match profile.service {
                Service::Fs => String::from("-"),
                Service::S3 => format!(
                    "{}/{}",
                    profile.endpoint.as_deref().unwrap_or("aws"),
                    profile.bucket.as_deref().unwrap_or_default()
                ),
            };
            table.add_row([
                profile.name.clone(),
                profile.service.to_string(),
                location,
                profile.work_dir.clone(),
            ]);
        }
        formatter.print_table(&table);
    } else {
        for profile in &profiles {
            formatter.println(&profile.name);
        }
    }
    ExitCode::Success
}

fn execute_remove(args: RemoveArgs, ctx: &Context, formatter: &Formatter) -> ExitCode {
    match ctx.profiles().remove(&args.name) {
        Ok(()) => {
            formatter.success(&format!("Profile '{}' removed.", args.name));
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&e.to_string());
            ExitCode::from_error(&e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_args(name: &str) -> AddArgs {
        AddArgs {
            name: name.to_string(),
            service: Service::S3,
            work_dir: String::new(),
            bucket: Some("media".into()),
            endpoint: Some("http://localhost:9000".into()),
            access_key: Some("ak".into()),
            secret_key: Some("sk".into()),
            region: "us-east-1".into(),
            bucket_lookup: "path".into(),
            force: false,
        }
    }

    #[test]
    fn test_build_profile() {
        let profile = build_profile(add_args("media")).unwrap();
        assert_eq!(profile.service, Service::S3);
        assert_eq!(profile.bucket.as_deref(), Some("media"));
        assert_eq!(profile.bucket_lookup, "path");
    }

    #[test]
    fn test_build_profile_rejects_lookup() {
        let mut args = add_args("media");
        args.bucket_lookup = "virtual".into();
        assert!(build_profile(args).is_err());
    }

    #[test]
    fn test_profile_info_hides_credentials() {
        let profile = build_profile(add_args("media")).unwrap();
        let json = serde_json::to_value(ProfileInfo::from(&profile)).unwrap();
        assert_eq!(json["name"], "media");
        assert_eq!(json["service"], "s3");
        assert!(json.get("secret_key").is_none());
        assert!(json.get("access_key").is_none());
    }

    #[test]
    fn test_fs_profile_info_has_no_region() {
        let info = ProfileInfo::from(&Profile::fs("scratch", "/tmp/scratch"));
        assert!(info.region.is_none());
        assert_eq!(info.work_dir, "/tmp/scratch");
    }
}
