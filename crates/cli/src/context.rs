//! Command context
//!
//! Loads the configuration once per invocation and turns command-line paths
//! into backends and operators.

use std::path::PathBuf;

use anyhow::{Context as _, Result};

use xfer_core::{
    parse_path, parse_size, Backend, Config, ConfigManager, DualOperator, ProfileManager,
    ProfilePath, Service, SingleOperator,
};
use xfer_fs::FsStorage;
use xfer_s3::S3Storage;

/// Global flags that shape the context
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub workers: Option<usize>,
    pub read_speed_limit: Option<String>,
    pub write_speed_limit: Option<String>,
}

/// Loaded configuration plus the operator settings shared by every command
pub struct Context {
    config: Config,
    profiles: ProfileManager,
    workers: usize,
    read_limit: Option<u64>,
    write_limit: Option<u64>,
}

impl Context {
    pub fn load(opts: &GlobalOptions) -> Result<Self> {
        let manager = match &opts.config {
            Some(path) => ConfigManager::with_path(path.clone()),
            None => ConfigManager::new()?,
        };
        let config = manager
            .load()
            .with_context(|| format!("load config {}", manager.config_path().display()))?;

        let read_limit = opts
            .read_speed_limit
            .as_deref()
            .map(parse_size)
            .transpose()
            .context("--read-speed-limit")?;
        let write_limit = opts
            .write_speed_limit
            .as_deref()
            .map(parse_size)
            .transpose()
            .context("--write-speed-limit")?;

        Ok(Self {
            workers: opts.workers.unwrap_or(config.defaults.workers),
            config,
            profiles: ProfileManager::with_config_manager(manager),
            read_limit,
            write_limit,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn profiles(&self) -> &ProfileManager {
        &self.profiles
    }

    /// Multipart threshold from a flag, falling back to the configured default
    pub fn multipart_threshold(&self, flag: Option<&str>) -> Result<u64> {
        let text = flag.unwrap_or(&self.config.defaults.multipart_threshold);
        parse_size(text).context("--multipart-threshold")
    }

    /// Backend serving `path`; a local path gets the current directory
    pub async fn backend(&self, path: &ProfilePath) -> Result<Backend> {
        let Some(name) = &path.profile else {
            return Ok(FsStorage::local().into_backend());
        };
        let profile = self.profiles.get(name)?;
        let backend = match profile.service {
            Service::Fs => FsStorage::from_profile(&profile).into_backend(),
            Service::S3 => S3Storage::connect(&profile)
                .await
                .with_context(|| format!("connect profile '{name}'"))?
                .into_backend(),
        };
        tracing::debug!(profile = %name, service = %profile.service, "backend ready");
        Ok(backend)
    }

    /// Parse `arg` and open its backend
    pub async fn open(&self, arg: &str) -> Result<(ProfilePath, Backend)> {
        let path = parse_path(arg)?;
        let backend = self.backend(&path).await?;
        Ok((path, backend))
    }

    /// Single-backend operator with the global worker and read/write limits
    pub fn single(&self, backend: Backend) -> Result<SingleOperator> {
        Ok(SingleOperator::new(backend)
            .with_workers(self.workers)?
            .with_read_limit(self.read_limit)?
            .with_write_limit(self.write_limit)?)
    }

    /// Dual-backend operator with the global worker and read/write limits
    pub fn dual(&self, src: Backend, dst: Backend, part_size: Option<u64>) -> Result<DualOperator> {
        Ok(DualOperator::new(src, dst)
            .with_workers(self.workers)?
            .with_read_limit(self.read_limit)?
            .with_write_limit(self.write_limit)?
            .with_part_size(part_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use xfer_core::Profile;

    fn context(dir: &TempDir, opts: GlobalOptions) -> Context {
        let opts = GlobalOptions {
            config: Some(dir.path().join("config.toml")),
            ..opts
        };
        Context::load(&opts).unwrap()
    }

    #[test]
    fn test_defaults_from_missing_config() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, GlobalOptions::default());
        assert_eq!(ctx.workers, 4);
        assert_eq!(ctx.multipart_threshold(None).unwrap(), 1024 * 1024 * 1024);
        assert_eq!(ctx.multipart_threshold(Some("10MiB")).unwrap(), 10 * 1024 * 1024);
    }

    #[test]
    fn test_flags_override_config() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "schema_version = 1\n[defaults]\nworkers = 8\n",
        )
        .unwrap();

        let ctx = context(&dir, GlobalOptions::default());
        assert_eq!(ctx.workers, 8);

        let ctx = context(
            &dir,
            GlobalOptions {
                workers: Some(2),
                read_speed_limit: Some("1MiB".into()),
                ..Default::default()
            },
        );
        assert_eq!(ctx.workers, 2);
        assert_eq!(ctx.read_limit, Some(1024 * 1024));
    }

    #[test]
    fn test_bad_speed_limit() {
        let dir = TempDir::new().unwrap();
        let opts = GlobalOptions {
            config: Some(dir.path().join("config.toml")),
            write_speed_limit: Some("fast".into()),
            ..Default::default()
        };
        assert!(Context::load(&opts).is_err());
    }

    #[tokio::test]
    async fn test_fs_profile_backend() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, GlobalOptions::default());
        ctx.profiles()
            .add(Profile::fs("scratch", dir.path().display().to_string()))
            .unwrap();

        let (path, backend) = ctx.open("scratch:data/a.txt").await.unwrap();
        assert_eq!(path.key, "data/a.txt");
        assert_eq!(backend.metadata().service, "fs");
        assert_eq!(backend.metadata().name, "scratch");
        assert!(!backend.capabilities().multipart);
    }

    #[tokio::test]
    async fn test_unknown_profile() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, GlobalOptions::default());
        let err = ctx.open("missing:a.txt").await.unwrap_err();
        assert_eq!(
            crate::exit_code::ExitCode::from_anyhow(&err),
            crate::exit_code::ExitCode::NotFound
        );
    }

    #[tokio::test]
    async fn test_local_path_backend() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir, GlobalOptions::default());
        let (path, backend) = ctx.open("notes.txt").await.unwrap();
        assert!(path.is_local());
        assert_eq!(backend.metadata().name, "local");
    }
}
