// shim/src/walk.rs

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Every entry below `root` that is not a directory
///
/// Symlinks are not followed. Unreadable directories are skipped.
pub fn leaves(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| !entry.file_type().is_dir())
        .map(walkdir::DirEntry::into_path)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_leaves_only_lists_files() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path();
        fs::create_dir_all(base.join("a/b/c")).unwrap();
        fs::create_dir_all(base.join("empty")).unwrap();
        fs::write(base.join("top"), b"").unwrap();
        fs::write(base.join("a/one"), b"").unwrap();
        fs::write(base.join("a/b/c/deep"), b"").unwrap();
        std::os::unix::fs::symlink("a", base.join("link")).unwrap();

        let mut found = leaves(base);
        found.sort();

        let expected: Vec<PathBuf> = ["a/b/c/deep", "a/one", "link", "top"]
            .iter()
            .map(|p| base.join(p))
            .collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_leaves_of_missing_dir() {
        assert!(leaves(Path::new("/nonexistent/dir")).is_empty());
    }
}
