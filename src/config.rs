// src/config.rs

//! Configuration file handling
//!
//! The configuration file holds `KEY=VALUE` lines. Lines starting with `#`
//! and lines without `=` are ignored. `$HOME` and `${HOME}` are expanded in
//! every value.

use crate::error::{Error, Result};
use crate::paths::{PathList, expand_var};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/pkglog.conf";

/// Default directory holding one log file per package
pub const DEFAULT_LOGDIR: &str = "/var/lib/pkglog";

/// Default list of paths scanned while logging
pub const DEFAULT_INCLUDE: &str = "/";

/// Default list of paths skipped while logging
pub const DEFAULT_EXCLUDE: &str = "/tmp:/dev:/proc:/sys:/run:/var/tmp:/var/run";

/// Settings shared by every command
#[derive(Debug, Clone)]
pub struct Config {
    pub logdir: PathBuf,
    pub include: PathList,
    pub exclude: PathList,
    pub remove_skip: PathList,
    /// Explicit location of the interception library
    pub shim: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logdir: PathBuf::from(DEFAULT_LOGDIR),
            include: PathList::parse(DEFAULT_INCLUDE).unwrap_or_default(),
            exclude: PathList::parse(DEFAULT_EXCLUDE).unwrap_or_default(),
            remove_skip: PathList::default(),
            shim: None,
        }
    }
}

impl Config {
    /// Load the configuration file, falling back to defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                debug!("Reading configuration from {}", path.display());
                Self::parse(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No configuration file at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(Error::Config(format!("{}: {}", path.display(), e))),
        }
    }

    /// Parse configuration file content on top of the defaults
    pub fn parse(content: &str) -> Result<Self> {
        let mut config = Self::default();

        for line in content.lines() {
            if line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = expand_var(value.trim(), "HOME");

            match key.trim() {
                "LOGDIR" => config.logdir = PathBuf::from(value),
                "INCLUDE" => config.include = Self::path_list(key, &value)?,
                "EXCLUDE" => config.exclude = Self::path_list(key, &value)?,
                "REMOVE_SKIP" => config.remove_skip = Self::path_list(key, &value)?,
                "SHIM" if !value.is_empty() => config.shim = Some(PathBuf::from(value)),
                other => debug!("Ignoring unknown configuration key '{}'", other),
            }
        }

        Ok(config)
    }

    fn path_list(key: &str, value: &str) -> Result<PathList> {
        PathList::parse(value).map_err(|e| Error::Config(format!("{}: {}", key.trim(), e)))
    }

    /// Check whether the log directory is writable by the current user
    pub fn logdir_writable(&self) -> bool {
        use std::os::unix::ffi::OsStrExt;

        let Ok(path) = std::ffi::CString::new(self.logdir.as_os_str().as_bytes()) else {
            return false;
        };
        // SAFETY: `path` is a valid NUL-terminated string for the duration of the call
        unsafe { libc::access(path.as_ptr(), libc::W_OK) == 0 }
    }

    /// Make sure the log directory exists and can be written to
    pub fn ensure_logdir(&self, create: bool) -> Result<()> {
        if self.logdir_writable() {
            return Ok(());
        }
        if create && !self.logdir.exists() {
            std::fs::create_dir_all(&self.logdir).map_err(|e| Error::fs(&self.logdir, e))?;
            return Ok(());
        }
        Err(Error::fs(
            &self.logdir,
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.logdir, PathBuf::from(DEFAULT_LOGDIR));
        assert!(config.include.matches("/usr/bin/foo"));
        assert!(config.exclude.matches("/tmp/build/foo.o"));
        assert!(config.remove_skip.is_empty());
        assert!(config.shim.is_none());
    }

    #[test]
    fn test_parse_overrides_defaults() {
        let config = Config::parse(
            "# pkglog configuration\n\
             LOGDIR=/srv/pkglog\n\
             EXCLUDE=/tmp:/usr/share/info/dir\n\
             REMOVE_SKIP=/etc\n\
             SHIM=/opt/lib/libpkglog_shim.so\n\
             garbage line\n",
        )
        .unwrap();

        assert_eq!(config.logdir, PathBuf::from("/srv/pkglog"));
        assert!(config.exclude.matches("/usr/share/info/dir"));
        assert!(!config.exclude.matches("/dev/null"));
        assert!(config.remove_skip.matches("/etc/foo.conf"));
        assert_eq!(
            config.shim,
            Some(PathBuf::from("/opt/lib/libpkglog_shim.so"))
        );
    }

    #[test]
    fn test_bad_pattern_is_config_error() {
        let err = Config::parse("INCLUDE=/usr/[\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("pkglog.conf")).unwrap();
        assert_eq!(config.logdir, PathBuf::from(DEFAULT_LOGDIR));
    }

    #[test]
    fn test_ensure_logdir_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            logdir: dir.path().join("nested/logs"),
            ..Config::default()
        };
        config.ensure_logdir(true).unwrap();
        assert!(config.logdir.is_dir());
        assert!(config.logdir_writable());
    }
}
