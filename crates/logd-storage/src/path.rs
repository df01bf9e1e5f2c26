use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// An absolute, slash-delimited virtual document path (`spec.md` §3), e.g.
/// `/proc/processes`. Validated once at construction so every downstream
/// consumer can treat `segments()` as filesystem-safe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VirtualPath {
    raw: String,
    segments: Vec<String>,
}

impl VirtualPath {
    pub fn parse(raw: &str) -> Result<Self> {
        if !raw.starts_with('/') {
            return Err(Error::InvalidPath { path: raw.into(), reason: "must be absolute".into() });
        }
        let segments: Vec<String> = raw.split('/').skip(1).map(str::to_string).collect();
        if segments.is_empty() || segments.iter().any(|s| s.is_empty()) {
            return Err(Error::InvalidPath { path: raw.into(), reason: "empty path component".into() });
        }
        for segment in &segments {
            if segment == "." || segment == ".." {
                return Err(Error::InvalidPath {
                    path: raw.into(),
                    reason: format!("'{segment}' is not a valid path component"),
                });
            }
            if segment.contains(['\\', '\0']) {
                return Err(Error::InvalidPath {
                    path: raw.into(),
                    reason: "path component contains an embedded separator".into(),
                });
            }
        }
        Ok(VirtualPath { raw: raw.to_string(), segments })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// Maps virtual paths to on-disk directories under the store root
/// (`spec.md` §4.2 / §6's on-disk layout).
#[derive(Debug, Clone)]
pub struct PathLayout {
    root: PathBuf,
}

impl PathLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        PathLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn paths_dir(&self, path: &VirtualPath) -> PathBuf {
        let mut p = self.root.join("paths");
        for segment in path.segments() {
            p.push(segment);
        }
        p
    }

    pub fn snapshots_dir(&self, path: &VirtualPath) -> PathBuf {
        let mut p = self.root.join("snapshots");
        for segment in path.segments() {
            p.push(segment);
        }
        p
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.root.join("meta")
    }

    pub fn transactions_dir(&self) -> PathBuf {
        self.meta_dir().join("transactions")
    }

    pub fn seq_file(&self) -> PathBuf {
        self.meta_dir().join("seq")
    }

    pub fn transaction_log_file(&self) -> PathBuf {
        self.meta_dir().join("transactions.log")
    }

    pub fn paths_root(&self) -> PathBuf {
        self.root.join("paths")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_path() {
        let p = VirtualPath::parse("/proc/processes").unwrap();
        assert_eq!(p.segments(), &["proc".to_string(), "processes".to_string()]);
    }

    #[test]
    fn rejects_relative_path() {
        assert!(VirtualPath::parse("proc/processes").is_err());
    }

    #[test]
    fn rejects_dot_components() {
        assert!(VirtualPath::parse("/proc/../etc").is_err());
        assert!(VirtualPath::parse("/proc/./x").is_err());
    }

    #[test]
    fn rejects_empty_component() {
        assert!(VirtualPath::parse("/proc//x").is_err());
        assert!(VirtualPath::parse("/").is_err());
    }

    #[test]
    fn layout_maps_nested_segments() {
        let layout = PathLayout::new("/data");
        let p = VirtualPath::parse("/proc/processes").unwrap();
        assert_eq!(layout.paths_dir(&p), PathBuf::from("/data/paths/proc/processes"));
        assert_eq!(layout.snapshots_dir(&p), PathBuf::from("/data/snapshots/proc/processes"));
    }
}
