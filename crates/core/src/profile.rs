//! Profile management
//!
//! Profiles are named storage backends: a local directory or an S3 bucket,
//! including connection details and credentials.

use serde::{Deserialize, Serialize};

use crate::config::ConfigManager;
use crate::error::{Error, Result};

/// Kind of storage service a profile points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Service {
    /// Local filesystem
    Fs,
    /// S3-compatible object storage
    S3,
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Service::Fs => write!(f, "fs"),
            Service::S3 => write!(f, "s3"),
        }
    }
}

impl std::str::FromStr for Service {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fs" | "file" | "local" => Ok(Service::Fs),
            "s3" => Ok(Service::S3),
            other => Err(Error::Config(format!("unknown service '{other}'"))),
        }
    }
}

/// A profile represents a named storage backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    /// Unique name for this profile
    pub name: String,

    /// Storage service
    pub service: Service,

    /// Root inside the backend every key is resolved against
    #[serde(default)]
    pub work_dir: String,

    /// Bucket name (s3 only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    /// Endpoint URL (s3 only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Access key ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,

    /// Secret access key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,

    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,

    /// Bucket lookup style: "auto", "path", or "dns"
    #[serde(default = "default_bucket_lookup")]
    pub bucket_lookup: String,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_bucket_lookup() -> String {
    "auto".to_string()
}

impl Profile {
    /// Create a local filesystem profile rooted at `work_dir`
    pub fn fs(name: impl Into<String>, work_dir: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service: Service::Fs,
            work_dir: work_dir.into(),
            bucket: None,
            endpoint: None,
            access_key: None,
            secret_key: None,
            region: default_region(),
            bucket_lookup: default_bucket_lookup(),
        }
    }

    /// Create an S3 profile for one bucket
    pub fn s3(
        name: impl Into<String>,
        bucket: impl Into<String>,
        endpoint: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            service: Service::S3,
            work_dir: String::new(),
            bucket: Some(bucket.into()),
            endpoint: Some(endpoint.into()),
            access_key: Some(access_key.into()),
            secret_key: Some(secret_key.into()),
            region: default_region(),
            bucket_lookup: default_bucket_lookup(),
        }
    }

    /// Check that the fields required by the service are present
    pub fn validate(&self) -> Result<()> {
        if !is_valid_profile_name(&self.name) {
            return Err(Error::Config(format!(
                "invalid profile name '{}': use letters, digits, '_' or '-'",
                self.name
            )));
        }
        if self.service == Service::S3 {
            if self.bucket.as_deref().unwrap_or_default().is_empty() {
                return Err(Error::Config(format!(
                    "profile '{}' needs a bucket",
                    self.name
                )));
            }
            if let Some(endpoint) = &self.endpoint {
                url::Url::parse(endpoint)?;
            }
        }
        Ok(())
    }
}

/// Check if a string is a valid profile name
pub(crate) fn is_valid_profile_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Manager for profile operations
pub struct ProfileManager {
    config_manager: ConfigManager,
}

impl ProfileManager {
    /// Create a new ProfileManager with a specific ConfigManager
    pub fn with_config_manager(config_manager: ConfigManager) -> Self {
        Self { config_manager }
    }

    /// Create a new ProfileManager using the default config location
    pub fn new() -> Result<Self> {
        let config_manager = ConfigManager::new()?;
        Ok(Self { config_manager })
    }

    /// List all configured profiles
    pub fn list(&self) -> Result<Vec<Profile>> {
        let config = self.config_manager.load()?;
        Ok(config.profiles)
    }

    /// Get a profile by name
    pub fn get(&self, name: &str) -> Result<Profile> {
        let config = self.config_manager.load()?;
        config
            .profiles
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| Error::ProfileNotFound(name.to_string()))
    }

    /// Add a new profile, refusing to replace an existing one
    pub fn add(&self, profile: Profile) -> Result<()> {
        profile.validate()?;
        let mut config = self.config_manager.load()?;
        if config.profiles.iter().any(|p| p.name == profile.name) {
            return Err(Error::ProfileExists(profile.name));
        }
        config.profiles.push(profile);
        self.config_manager.save(&config)
    }

    /// Add or update a profile
    pub fn set(&self, profile: Profile) -> Result<()> {
        profile.validate()?;
        let mut config = self.config_manager.load()?;

        config.profiles.retain(|p| p.name != profile.name);
        config.profiles.push(profile);

        self.config_manager.save(&config)
    }

    /// Remove a profile
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut config = self.config_manager.load()?;
        let original_len = config.profiles.len();

        config.profiles.retain(|p| p.name != name);

        if config.profiles.len() == original_len {
            return Err(Error::ProfileNotFound(name.to_string()));
        }

        self.config_manager.save(&config)
    }

    /// Check if a profile exists
    pub fn exists(&self, name: &str) -> Result<bool> {
        let config = self.config_manager.load()?;
        Ok(config.profiles.iter().any(|p| p.name == name))
    }
}
