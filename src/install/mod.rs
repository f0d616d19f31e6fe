// src/install/mod.rs

//! Install sessions
//!
//! An install session gathers the paths an installation wrote, either from
//! a list read on stdin or by running the install command with the
//! interception library preloaded. The paths are then filtered and either
//! printed or logged as a package.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::packages::Package;
use crate::paths::{PathList, clear_path};
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// File name of the interception library
pub const SHIM_NAME: &str = "libpkglog_shim.so";

/// Where the interception library appends the paths it sees
pub const ENV_TMPFILE: &str = "PKGLOG_TMPFILE";

/// Set to `yes` to make the interception library trace each logged call
pub const ENV_DEBUG: &str = "PKGLOG_DEBUG";

const SYSTEM_LIB_DIRS: [&str; 2] = ["/usr/local/lib", "/usr/lib"];

/// How an install session collects and filters paths
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    pub include: PathList,
    pub exclude: PathList,
    /// Keep paths that no longer exist
    pub log_missing: bool,
    /// Keep going when the install command fails
    pub ignore_errors: bool,
    /// Merge into an existing package instead of replacing it
    pub append: bool,
    /// Ask the interception library to trace its calls
    pub debug: bool,
}

impl InstallOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            include: config.include.clone(),
            exclude: config.exclude.clone(),
            ..Self::default()
        }
    }
}

/// Where the collected paths end up
pub enum Destination<'a> {
    /// Print them, one per line
    Output(&'a mut dyn Write),
    /// Log them as the package `name`
    Package { name: &'a str, logdir: &'a Path },
}

/// One installation being tracked
#[derive(Debug)]
pub struct InstallSession {
    options: InstallOptions,
    raw: Vec<String>,
    rejected: usize,
}

impl InstallSession {
    pub fn new(options: InstallOptions) -> Self {
        Self {
            options,
            raw: Vec::new(),
            rejected: 0,
        }
    }

    pub fn options(&self) -> &InstallOptions {
        &self.options
    }

    /// Read newline-separated paths
    ///
    /// Package logs are text, so a path that is not valid UTF-8 cannot be
    /// logged. Each one is reported and the others are still read.
    pub fn read_paths(&mut self, reader: impl BufRead) -> Result<()> {
        for line in reader.split(b'\n') {
            match String::from_utf8(line?) {
                Ok(line) if line.trim().is_empty() => {}
                Ok(line) => self.raw.push(line),
                Err(e) => {
                    warn!(
                        "Not logging '{}': file name is not valid UTF-8",
                        String::from_utf8_lossy(e.as_bytes())
                    );
                    self.rejected += 1;
                }
            }
        }
        Ok(())
    }

    /// Number of paths that could not be read as UTF-8
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Run the install command with the interception library preloaded
    ///
    /// The words of `args` are joined with spaces and handed to `/bin/sh -c`.
    /// Returns the exit status of the command, which is 128 plus the signal
    /// number if it was killed.
    pub fn run(&mut self, args: &[String], shim: &Path) -> Result<i32> {
        let tmp = tempfile::Builder::new().prefix("pkglog").tempfile()?;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))?;

        let command_line = args.join(" ");
        info!("Running '{}'", command_line);
        debug!("{}={}", ENV_TMPFILE, tmp.path().display());

        let status = Command::new("/bin/sh")
            .arg("-c")
            .arg(&command_line)
            .env("LD_PRELOAD", preload_value(shim, std::env::var_os("LD_PRELOAD")))
            .env(ENV_TMPFILE, tmp.path())
            .env(ENV_DEBUG, if self.options.debug { "yes" } else { "no" })
            .status()
            .map_err(|e| Error::fs("/bin/sh", e))?;

        let code = match (status.code(), status.signal()) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => 1,
        };

        if code != 0 {
            if !self.options.ignore_errors {
                return Err(Error::CommandFailed { status: code });
            }
            warn!("'{}' exited with status {}, continuing", command_line, code);
        }

        let file = std::fs::File::open(tmp.path()).map_err(|e| Error::fs(tmp.path(), e))?;
        self.read_paths(BufReader::new(file))?;
        Ok(code)
    }

    /// Collected paths, normalized and filtered
    pub fn paths(&self) -> BTreeSet<String> {
        let mut paths = BTreeSet::new();

        for raw in &self.raw {
            let path = clear_path(raw.trim());
            if paths.contains(&path) {
                continue;
            }
            if self.options.exclude.matches(&path) || !self.options.include.matches(&path) {
                debug!("Skipping excluded '{}'", path);
                continue;
            }

            match std::fs::symlink_metadata(&path) {
                Ok(meta) if meta.is_file() || meta.file_type().is_symlink() => {}
                Ok(_) => {
                    debug!("Skipping '{}': not a regular file", path);
                    continue;
                }
                Err(_) if self.options.log_missing => {}
                Err(_) => {
                    debug!("Skipping missing '{}'", path);
                    continue;
                }
            }
            paths.insert(path);
        }

        paths
    }

    /// Hand the filtered paths to `destination`
    ///
    /// Returns the package that was written, if any.
    pub fn commit(&self, destination: Destination<'_>) -> Result<Option<Package>> {
        let paths = self.paths();

        match destination {
            Destination::Output(out) => {
                for path in &paths {
                    writeln!(out, "{}", path)?;
                }
                out.flush()?;
                Ok(None)
            }
            Destination::Package { name, logdir } => {
                let name = name.to_lowercase();
                if self.options.append && logdir.join(&name).exists() {
                    let mut pkg = Package::open(&name, logdir)?;
                    pkg.append(&paths)?;
                    Ok(Some(pkg))
                } else {
                    Package::create(&name, logdir, &paths).map(Some)
                }
            }
        }
    }
}

/// `LD_PRELOAD` value with the shim in front of whatever was already there
fn preload_value(shim: &Path, current: Option<OsString>) -> OsString {
    let mut value = shim.as_os_str().to_os_string();
    if let Some(current) = current.filter(|c| !c.is_empty()) {
        value.push(":");
        value.push(current);
    }
    value
}

/// Look for the interception library in `dir`, versioned names included
fn find_shim_in(dir: &Path) -> Option<PathBuf> {
    let plain = dir.join(SHIM_NAME);
    if plain.is_file() {
        return Some(plain);
    }

    let pattern = format!(
        "{}/{}.*",
        glob::Pattern::escape(&dir.to_string_lossy()),
        SHIM_NAME
    );
    glob::glob(&pattern)
        .ok()?
        .filter_map(std::result::Result::ok)
        .find(|p| p.is_file())
}

/// Directories searched for the interception library, in order
fn shim_search_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(exe_dir) = std::env::current_exe().ok().and_then(|e| e.parent().map(Path::to_path_buf)) {
        dirs.push(exe_dir.join("../lib"));
        dirs.push(exe_dir);
    }
    dirs.extend(SYSTEM_LIB_DIRS.iter().map(PathBuf::from));
    dirs
}

/// Find the interception library
///
/// An explicitly configured location must exist. Otherwise the directory of
/// the running executable is searched, then the system library directories.
pub fn locate_shim(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(Error::Config(format!("{}: interception library not found", path.display())))
        };
    }

    for dir in shim_search_dirs() {
        if let Some(found) = find_shim_in(&dir) {
            debug!("Using interception library {}", found.display());
            return Ok(found);
        }
    }

    Err(Error::Config(format!(
        "cannot find {}; set SHIM in the configuration file or pass --shim",
        SHIM_NAME
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> InstallOptions {
        InstallOptions {
            include: PathList::parse("/").unwrap(),
            ..InstallOptions::default()
        }
    }

    fn touch(root: &Path, rel: &str) -> String {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"x").unwrap();
        path.to_string_lossy().into_owned()
    }

    fn session_with(options: InstallOptions, lines: &[String]) -> InstallSession {
        let mut session = InstallSession::new(options);
        session.read_paths(lines.join("\n").as_bytes()).unwrap();
        session
    }

    #[test]
    fn test_exclusion_filtering() {
        let root = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(root.path()).unwrap();
        let kept = touch(&root, "usr/bin/foo");
        let skipped = touch(&root, "var/cache/foo");

        let opts = InstallOptions {
            exclude: PathList::parse(&root.join("var").to_string_lossy()).unwrap(),
            ..options()
        };
        let session = session_with(opts, &[kept.clone(), skipped]);

        assert_eq!(session.paths().into_iter().collect::<Vec<_>>(), vec![kept]);
    }

    #[test]
    fn test_include_list_limits_paths() {
        let root = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(root.path()).unwrap();
        let inside = touch(&root, "opt/app/bin");
        let outside = touch(&root, "usr/bin/foo");

        let opts = InstallOptions {
            include: PathList::parse(&root.join("opt").to_string_lossy()).unwrap(),
            ..options()
        };
        let session = session_with(opts, &[inside.clone(), outside]);

        assert_eq!(session.paths().into_iter().collect::<Vec<_>>(), vec![inside]);
    }

    #[test]
    fn test_directories_are_dropped_and_paths_normalized() {
        let root = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(root.path()).unwrap();
        let file = touch(&root, "share/doc/README");
        let dir = root.join("share/doc").to_string_lossy().into_owned();
        let messy = file.replace("/share/", "//share/");

        let session = session_with(options(), &[dir, messy, String::new(), file.clone()]);

        assert_eq!(session.paths().into_iter().collect::<Vec<_>>(), vec![file]);
    }

    #[test]
    fn test_symlinks_are_kept() {
        let root = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(root.path()).unwrap();
        let link = root.join("libx.so");
        std::os::unix::fs::symlink("libx.so.1", &link).unwrap();
        let link = link.to_string_lossy().into_owned();

        let session = session_with(options(), &[link.clone()]);
        assert!(session.paths().contains(&link));
    }

    #[test]
    fn test_missing_paths_need_log_missing() {
        let root = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(root.path()).unwrap();
        let gone = root.join("gone").to_string_lossy().into_owned();

        assert!(session_with(options(), &[gone.clone()]).paths().is_empty());

        let opts = InstallOptions {
            log_missing: true,
            ..options()
        };
        assert!(session_with(opts, &[gone.clone()]).paths().contains(&gone));
    }

    #[test]
    fn test_non_utf8_path_is_reported_not_fatal() {
        let root = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(root.path()).unwrap();
        let ok = touch(&root, "usr/bin/ok");

        let mut input = format!("{}\n", ok).into_bytes();
        input.extend_from_slice(b"/usr/share/caf\xe9\n");

        let mut session = InstallSession::new(options());
        session.read_paths(input.as_slice()).unwrap();

        assert_eq!(session.rejected(), 1);
        assert_eq!(session.paths().into_iter().collect::<Vec<_>>(), vec![ok]);
    }

    #[test]
    fn test_commit_to_output() {
        let root = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(root.path()).unwrap();
        let a = touch(&root, "a");
        let b = touch(&root, "b");

        let session = session_with(options(), &[b.clone(), a.clone()]);
        let mut out = Vec::new();
        let pkg = session.commit(Destination::Output(&mut out)).unwrap();

        assert!(pkg.is_none());
        assert_eq!(String::from_utf8(out).unwrap(), format!("{}\n{}\n", a, b));
    }

    #[test]
    fn test_commit_creates_then_appends() {
        let logdir = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(root.path()).unwrap();
        let first = touch(&root, "bin/foo");
        let second = touch(&root, "share/man/foo.1");

        let session = session_with(options(), &[first.clone()]);
        let pkg = session
            .commit(Destination::Package { name: "Foo-1.0", logdir: logdir.path() })
            .unwrap()
            .unwrap();
        assert_eq!(pkg.name(), "foo-1.0");
        assert_eq!(pkg.nfiles(), 1);

        let opts = InstallOptions {
            append: true,
            ..options()
        };
        let session = session_with(opts, &[second]);
        let pkg = session
            .commit(Destination::Package { name: "foo-1.0", logdir: logdir.path() })
            .unwrap()
            .unwrap();
        assert_eq!(pkg.nfiles(), 2);
        assert!(pkg.has_file(&first).unwrap());
    }

    #[test]
    fn test_commit_nothing_to_log() {
        let logdir = tempfile::tempdir().unwrap();
        let session = InstallSession::new(options());
        let err = session
            .commit(Destination::Package { name: "empty", logdir: logdir.path() })
            .unwrap_err();
        assert!(matches!(err, Error::NoFiles(_)));
    }

    #[test]
    fn test_run_reports_command_status() {
        let shim = Path::new("/nonexistent/libpkglog_shim.so");
        let mut session = InstallSession::new(options());
        let err = session.run(&["exit".to_string(), "3".to_string()], shim).unwrap_err();
        assert!(matches!(err, Error::CommandFailed { status: 3 }));

        let err = session.run(&["kill -9 $$".to_string()], shim).unwrap_err();
        assert!(matches!(err, Error::CommandFailed { status: 137 }));
    }

    #[test]
    fn test_run_ignore_errors() {
        let shim = Path::new("/nonexistent/libpkglog_shim.so");
        let opts = InstallOptions {
            ignore_errors: true,
            ..options()
        };
        let mut session = InstallSession::new(opts);
        assert_eq!(session.run(&["false".to_string()], shim).unwrap(), 1);
        assert!(session.paths().is_empty());
    }

    #[test]
    fn test_preload_value_prepends() {
        let shim = Path::new("/usr/lib/libpkglog_shim.so");
        assert_eq!(preload_value(shim, None), OsString::from("/usr/lib/libpkglog_shim.so"));
        assert_eq!(preload_value(shim, Some(OsString::new())), OsString::from("/usr/lib/libpkglog_shim.so"));
        assert_eq!(
            preload_value(shim, Some(OsString::from("/opt/libother.so"))),
            OsString::from("/usr/lib/libpkglog_shim.so:/opt/libother.so")
        );
    }

    #[test]
    fn test_find_versioned_shim() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_shim_in(dir.path()).is_none());

        let versioned = dir.path().join("libpkglog_shim.so.0.1.0");
        std::fs::write(&versioned, b"").unwrap();
        assert_eq!(find_shim_in(dir.path()), Some(versioned));

        let plain = dir.path().join(SHIM_NAME);
        std::fs::write(&plain, b"").unwrap();
        assert_eq!(find_shim_in(dir.path()), Some(plain));
    }

    #[test]
    fn test_configured_shim_must_exist() {
        let err = locate_shim(Some(Path::new("/nonexistent/libpkglog_shim.so"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
