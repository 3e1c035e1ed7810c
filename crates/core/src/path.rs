//! Path parsing and resolution
//!
//! Command-line paths have the format `profile:key`. A path without a
//! profile prefix is local and resolved against the current directory.

use crate::error::{Error, Result};
use crate::profile::is_valid_profile_name;

/// A parsed command-line path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilePath {
    /// Profile name, `None` for a local path
    pub profile: Option<String>,
    /// Key inside the backend (may be empty for the backend root)
    pub key: String,
}

impl ProfilePath {
    /// Create a path on a named profile
    pub fn remote(profile: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            profile: Some(profile.into()),
            key: key.into(),
        }
    }

    /// Create a local path
    pub fn local(key: impl Into<String>) -> Self {
        Self {
            profile: None,
            key: key.into(),
        }
    }

    /// Whether the key names a directory (empty or trailing slash)
    pub fn is_dir(&self) -> bool {
        self.key.is_empty() || self.key.ends_with('/')
    }

    /// Whether this path is local
    pub fn is_local(&self) -> bool {
        self.profile.is_none()
    }
}

impl std::fmt::Display for ProfilePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.profile {
            Some(profile) => write!(f, "{profile}:{}", self.key),
            None => write!(f, "{}", self.key),
        }
    }
}

/// Parse a path string into a ProfilePath
///
/// `name:key` selects a profile when `name` is a valid profile name.
/// Anything else, including Windows drive letters, is a local path.
pub fn parse_path(path: &str) -> Result<ProfilePath> {
    if path.is_empty() {
        return Err(Error::InvalidPath("Path cannot be empty".into()));
    }

    // Windows absolute paths
    #[cfg(windows)]
    if path.len() >= 2 && path.as_bytes()[1] == b':' {
        return Ok(ProfilePath::local(path));
    }

    match path.split_once(':') {
        Some((profile, key)) if is_valid_profile_name(profile) => {
            Ok(ProfilePath::remote(profile, key))
        }
        Some(("", _)) => Err(Error::InvalidPath(format!(
            "Path '{path}' has an empty profile name"
        ))),
        _ => Ok(ProfilePath::local(path)),
    }
}

/// Characters that turn a path into a glob pattern
#[cfg(not(windows))]
const META_CHARS: &[char] = &['*', '?', '[', '{', '\\'];
#[cfg(windows)]
const META_CHARS: &[char] = &['*', '?', '[', '{'];

/// Whether the path contains glob meta characters
pub fn has_meta(path: &str) -> bool {
    path.contains(META_CHARS)
}

/// Split a glob pattern into its literal directory prefix and the pattern
///
/// The base keeps its trailing `/` and is empty when the first path segment
/// already contains a meta character.
pub fn split_glob(pattern: &str) -> (&str, &str) {
    let first_meta = pattern.find(META_CHARS).unwrap_or(pattern.len());
    match pattern[..first_meta].rfind('/') {
        Some(pos) => pattern.split_at(pos + 1),
        None => ("", pattern),
    }
}

/// Join a directory prefix and a relative path with exactly one `/`
pub fn join_key(dir: &str, rel: &str) -> String {
    if dir.is_empty() {
        return rel.to_string();
    }
    format!(
        "{}/{}",
        dir.trim_end_matches('/'),
        rel.trim_start_matches('/')
    )
}

/// Ensure a non-empty key ends with `/`
pub fn dir_key(key: &str) -> String {
    if key.is_empty() || key.ends_with('/') {
        key.to_string()
    } else {
        format!("{key}/")
    }
}

/// Key with `.` segments and empty segments dropped
///
/// `./a.txt`, `a.txt` and `a//b/` name the same objects as `a.txt` and
/// `a/b`. A leading `/` is kept.
pub fn normalize_key(key: &str) -> String {
    let joined = key
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/");
    if key.starts_with('/') {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Last path segment, ignoring a trailing `/`
pub fn base_name(key: &str) -> &str {
    let trimmed = key.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => &trimmed[pos + 1..],
        None => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_remote_path() {
        let path = parse_path("archive:photos/2024/a.jpg").unwrap();
        assert_eq!(path.profile.as_deref(), Some("archive"));
        assert_eq!(path.key, "photos/2024/a.jpg");
        assert!(!path.is_dir());
        assert!(!path.is_local());
    }

    #[test]
    fn test_parse_remote_root() {
        let path = parse_path("archive:").unwrap();
        assert_eq!(path.profile.as_deref(), Some("archive"));
        assert_eq!(path.key, "");
        assert!(path.is_dir());
    }

    #[test]
    fn test_parse_local_path() {
        let path = parse_path("./notes.txt").unwrap();
        assert!(path.is_local());
        assert_eq!(path.key, "./notes.txt");

        let path = parse_path("/var/log/").unwrap();
        assert!(path.is_local());
        assert!(path.is_dir());
    }

    #[test]
    fn test_parse_colon_in_local_name() {
        // "a b" is not a profile name, so the whole thing is local
        let path = parse_path("a b:c").unwrap();
        assert!(path.is_local());
        assert_eq!(path.key, "a b:c");
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse_path("").is_err());
        assert!(parse_path(":key").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(ProfilePath::remote("p", "a/b").to_string(), "p:a/b");
        assert_eq!(ProfilePath::local("a/b").to_string(), "a/b");
    }

    #[test]
    fn test_has_meta() {
        assert!(has_meta("a/*.txt"));
        assert!(has_meta("file?.log"));
        assert!(has_meta("[ab].txt"));
        assert!(has_meta("{a,b}.txt"));
        assert!(!has_meta("a/b.txt"));
    }

    #[test]
    fn test_split_glob() {
        assert_eq!(split_glob("a/*.txt"), ("a/", "*.txt"));
        assert_eq!(split_glob("a/b/**/*.txt"), ("a/b/", "**/*.txt"));
        assert_eq!(split_glob("*.txt"), ("", "*.txt"));
        assert_eq!(split_glob("a/b{1,2}/c"), ("a/", "b{1,2}/c"));
    }

    #[test]
    fn test_join_and_dir_key() {
        assert_eq!(join_key("dst/", "a/b.txt"), "dst/a/b.txt");
        assert_eq!(join_key("dst", "b.txt"), "dst/b.txt");
        assert_eq!(join_key("", "b.txt"), "b.txt");
        assert_eq!(dir_key("a"), "a/");
        assert_eq!(dir_key("a/"), "a/");
        assert_eq!(dir_key(""), "");
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("a/b/c.txt"), "c.txt");
        assert_eq!(base_name("a/b/"), "b");
        assert_eq!(base_name("c.txt"), "c.txt");
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("./a.txt"), "a.txt");
        assert_eq!(normalize_key("a//b/./c/"), "a/b/c");
        assert_eq!(normalize_key("./"), "");
        assert_eq!(normalize_key("/tmp/./a"), "/tmp/a");
        assert_ne!(normalize_key("/a"), normalize_key("a"));
    }
}
