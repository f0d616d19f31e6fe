// src/packages/file.rs

//! Files tracked by a logged package

use serde::Serialize;
use std::path::Path;

/// One file installed by a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageFile {
    pub path: String,
    pub size: u64,
    /// Target of the symlink, or an empty string if the file is not a symlink
    pub symlink_target: String,
}

impl PackageFile {
    /// Create a file entry as read from a package log
    pub fn new(path: impl Into<String>, size: u64, symlink_target: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size,
            symlink_target: symlink_target.into(),
        }
    }

    /// Inspect a file on disk, without following a trailing symlink
    pub fn from_disk(path: &str) -> std::io::Result<Self> {
        let metadata = std::fs::symlink_metadata(path)?;

        let symlink_target = if metadata.file_type().is_symlink() {
            std::fs::read_link(path)
                .map(|t| t.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            String::new()
        };

        Ok(Self {
            path: path.to_string(),
            size: metadata.len(),
            symlink_target,
        })
    }

    /// Placeholder for a file that was recorded but is not on disk
    pub fn missing(path: &str) -> Self {
        Self::new(path, 0, "")
    }

    pub fn is_symlink(&self) -> bool {
        !self.symlink_target.is_empty()
    }

    /// Whether something still exists at this path
    pub fn is_installed(&self) -> bool {
        Path::new(&self.path).symlink_metadata().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_disk_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        std::fs::write(&path, b"hello world").unwrap();

        let file = PackageFile::from_disk(path.to_str().unwrap()).unwrap();
        assert_eq!(file.size, 11);
        assert!(!file.is_symlink());
        assert!(file.is_installed());
    }

    #[test]
    fn test_from_disk_symlink_keeps_target() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("libx.so");
        std::os::unix::fs::symlink("libx.so.1", &link).unwrap();

        let file = PackageFile::from_disk(link.to_str().unwrap()).unwrap();
        assert!(file.is_symlink());
        assert_eq!(file.symlink_target, "libx.so.1");
        // dangling symlinks are still installed files
        assert!(file.is_installed());
    }

    #[test]
    fn test_from_disk_missing_file() {
        assert!(PackageFile::from_disk("/nonexistent/file").is_err());
        let file = PackageFile::missing("/nonexistent/file");
        assert_eq!(file.size, 0);
        assert!(!file.is_installed());
    }
}
