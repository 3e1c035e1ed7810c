//! Error types for xfer-core
//!
//! Provides a unified error type that can be converted to appropriate exit codes.
//! Backend failures are wrapped with the operation and path they happened on, so
//! that a message surfacing from a worker task still names the object involved.

use thiserror::Error;

/// Result type alias for xfer-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for xfer-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid path format
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid glob or regular expression
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// Profile not found
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    /// Profile already exists
    #[error("Profile already exists: {0}")]
    ProfileExists(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Network error (retryable)
    #[error("Network error: {0}")]
    Network(String),

    /// Target has the wrong shape for the request
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Backend lacks an optional capability
    #[error("Unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// Object or part size outside the backend's multipart limits
    #[error("Size policy violation: {0}")]
    SizePolicy(String),

    /// One part of a multipart transfer failed
    #[error("Part {index} failed: {source}")]
    PartFailed {
        index: u32,
        #[source]
        source: Box<Error>,
    },

    /// Multipart completion was refused because parts are missing
    #[error("Multipart upload incomplete: {completed} of {expected} parts written")]
    MultipartIncomplete { expected: u32, completed: u32 },

    /// Worker pool has no free worker and the caller asked not to wait
    #[error("Worker pool saturated: all {0} workers busy")]
    PoolSaturated(usize),

    /// Operation cancelled before it could finish
    #[error("Operation cancelled")]
    Cancelled,

    /// Backend error with operation and path context
    #[error("{op} {path}: {source}")]
    Operation {
        op: &'static str,
        path: String,
        #[source]
        source: Box<Error>,
    },

    /// General error
    #[error("{0}")]
    General(String),
}

impl Error {
    /// Wrap this error with the operation and path it happened on
    pub fn context(self, op: &'static str, path: impl Into<String>) -> Self {
        Error::Operation {
            op,
            path: path.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, looking through context wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether this error means the object does not exist
    pub fn is_not_found(&self) -> bool {
        match self.root() {
            Error::NotFound(_) => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Get the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self.root() {
            Error::InvalidPath(_) | Error::InvalidPattern(_) => 2, // UsageError
            Error::Config(_) => 2,                                 // UsageError
            Error::Network(_) => 3,                                // NetworkError
            Error::Auth(_) => 4,                                   // AuthError
            Error::NotFound(_) | Error::ProfileNotFound(_) => 5,   // NotFound
            Error::Conflict(_) | Error::ProfileExists(_) => 6,     // Conflict
            Error::UnsupportedFeature(_) => 7,                     // UnsupportedFeature
            Error::Cancelled => 130,                               // Interrupted
            e if e.is_not_found() => 5,
            _ => 1, // GeneralError
        }
    }
}
