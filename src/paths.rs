// src/paths.rs

//! Path normalization and colon-separated path pattern lists
//!
//! Include, exclude and remove-skip settings are written as `PATH:PATH:...`
//! where each entry is a shell-style wildcard pattern.

use crate::error::{Error, Result};
use glob::{MatchOptions, Pattern};
use std::fmt;
use std::path::{Path, PathBuf};

/// `*` and `?` may cross `/`, like fnmatch(3) without FNM_PATHNAME
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
struct Entry {
    raw: String,
    pattern: Pattern,
}

/// A list of path patterns, as given by `INCLUDE`, `EXCLUDE` or `REMOVE_SKIP`
#[derive(Debug, Clone, Default)]
pub struct PathList {
    entries: Vec<Entry>,
}

impl PathList {
    /// Parse a colon-separated list. Empty entries are ignored.
    pub fn parse(list: &str) -> Result<Self> {
        let mut entries = Vec::new();

        for raw in list.split(':').filter(|s| !s.is_empty()) {
            let pattern = Pattern::new(raw).map_err(|e| {
                Error::InvalidArgument(format!("'{}': bad path pattern: {}", raw, e))
            })?;
            entries.push(Entry {
                raw: raw.to_string(),
                pattern,
            });
        }

        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check whether `path` matches any entry of the list
    ///
    /// An entry matches when it is `/`, when its wildcard pattern matches the
    /// whole path, or when the path lies somewhere below it.
    pub fn matches(&self, path: &str) -> bool {
        self.entries.iter().any(|entry| {
            if entry.raw == "/" || entry.pattern.matches_with(path, MATCH_OPTIONS) {
                return true;
            }
            if entry.raw.ends_with('/') {
                path.starts_with(&entry.raw)
            } else {
                path.len() > entry.raw.len()
                    && path.starts_with(&entry.raw)
                    && path.as_bytes()[entry.raw.len()] == b'/'
            }
        })
    }
}

impl fmt::Display for PathList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw: Vec<&str> = self.entries.iter().map(|e| e.raw.as_str()).collect();
        write!(f, "{}", raw.join(":"))
    }
}

/// Make a path absolute and resolve symlinks in its directory part only
///
/// The last component is kept as is, so a symlink stays a symlink. Duplicate
/// and trailing slashes are dropped. If the directory part cannot be resolved
/// (it no longer exists, for instance) the absolute path is returned as is.
pub fn clear_path(input: &str) -> String {
    let mut path = String::with_capacity(input.len());
    for component in input.split('/').filter(|c| !c.is_empty()) {
        path.push('/');
        path.push_str(component);
    }

    if !input.starts_with('/') {
        if let Ok(cwd) = std::env::current_dir() {
            path.insert_str(0, cwd.to_string_lossy().trim_end_matches('/'));
        }
    }

    if path.is_empty() {
        return "/".to_string();
    }

    let split = path.rfind('/').unwrap_or(0);
    let (dir, base) = path.split_at(split);
    let dir = if dir.is_empty() { "/" } else { dir };

    match std::fs::canonicalize(dir) {
        Ok(real) => {
            let real = real.to_string_lossy();
            format!("{}{}", real.trim_end_matches('/'), base)
        }
        Err(_) => path,
    }
}

/// Name of the current working directory, used for `log -D`
pub fn current_dir_name() -> Result<String> {
    let cwd = std::env::current_dir()?;
    cwd.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::InvalidArgument("current directory has no name".to_string()))
}

/// Expand `$VAR` and `${VAR}` for a single environment variable
pub fn expand_var(value: &str, var: &str) -> String {
    match std::env::var(var) {
        Ok(val) => value
            .replace(&format!("${{{}}}", var), &val)
            .replace(&format!("${}", var), &val),
        Err(_) => value.to_string(),
    }
}

/// Parent directory of an absolute path, or `None` at the root
pub fn parent_dir(path: &Path) -> Option<PathBuf> {
    match path.parent() {
        Some(parent) if parent != Path::new("/") && !parent.as_os_str().is_empty() => {
            Some(parent.to_path_buf())
        }
        _ => None,
    }
}
