// src/db/remove.rs

//! Removing logged packages
//!
//! Before anything is deleted, a snapshot of every logged package is taken
//! with its file list loaded. A file is only deleted if no other package in
//! the snapshot still owns it. Each removed package is then dropped from
//! the snapshot too, so removing two packages that share a file deletes the
//! file along with the second one.
//!
//! A log whose file list cannot be decoded still counts as an owner: its raw
//! lines are searched for the path, and if even that fails the file is kept.

use super::{Database, codec};
use crate::error::Result;
use crate::packages::{Package, PackageFile};
use crate::paths::{PathList, parent_dir};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// How packages get removed
#[derive(Debug, Clone, Default)]
pub struct RemoveOptions {
    /// Paths that are never deleted
    pub skip: PathList,
    /// Do not ask for confirmation
    pub batch: bool,
    /// Only delete the logs, leave the files in place
    pub unlog_only: bool,
}

/// Asks the user whether to go ahead with a package
pub trait Confirm {
    fn confirm(&mut self, question: &str) -> bool;
}

impl<F: FnMut(&str) -> bool> Confirm for F {
    fn confirm(&mut self, question: &str) -> bool {
        self(question)
    }
}

/// Prompt on stdout, read the answer from stdin
#[derive(Debug, Default)]
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&mut self, question: &str) -> bool {
        print!("{} (y/N) ? ", question);
        if io::stdout().flush().is_err() {
            return false;
        }

        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

/// What happened to one file of a removed package
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOutcome {
    Removed,
    /// Already gone, which counts as removed
    Missing,
    /// Matched the skip list
    Excluded,
    /// Still owned by another logged package
    Shared,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileReport {
    pub path: String,
    pub outcome: FileOutcome,
}

/// What happened to a package as a whole
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageStatus {
    /// Files processed and log deleted
    Removed,
    /// Log deleted, files left in place
    Unlogged,
    /// The user said no
    Declined,
    /// The log could not be read or deleted
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageReport {
    pub name: String,
    pub status: PackageStatus,
    pub files: Vec<FileReport>,
    /// Directories deleted because they became empty
    pub pruned_dirs: Vec<PathBuf>,
}

impl PackageReport {
    fn new(name: &str, status: PackageStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            files: Vec::new(),
            pruned_dirs: Vec::new(),
        }
    }

    /// Files that could not be deleted
    pub fn failures(&self) -> impl Iterator<Item = &FileReport> {
        self.files
            .iter()
            .filter(|f| matches!(f.outcome, FileOutcome::Failed(_)))
    }
}

/// Delete the empty ancestors of `path`, deepest first
///
/// Stops at the first directory that cannot be removed, and never touches `/`.
fn prune_parents(path: &Path, pruned: &mut Vec<PathBuf>) {
    let mut dir = parent_dir(path);
    while let Some(current) = dir {
        if std::fs::remove_dir(&current).is_err() {
            break;
        }
        debug!("Removed empty directory '{}'", current.display());
        dir = parent_dir(&current);
        pruned.push(current);
    }
}

/// Every logged package, as the reference for shared files
struct Owners {
    snapshot: Database,
    /// Logs whose file list could not be decoded, with their raw content
    /// when it could at least be read
    unparsed: Vec<(String, Option<Vec<u8>>)>,
}

impl Owners {
    fn load(logdir: &Path) -> Result<Self> {
        let mut snapshot = Database::new(logdir);
        snapshot.scan_all()?;
        let unparsed = snapshot
            .load_files()
            .into_iter()
            .map(|name| {
                let raw = std::fs::read(logdir.join(&name)).ok();
                (name, raw)
            })
            .collect();
        Ok(Self { snapshot, unparsed })
    }

    /// Whether a package other than `pkg` may own `file`
    fn shared(&self, pkg: &Package, file: &PackageFile) -> Result<bool> {
        if pkg.is_shared(file, self.snapshot.packages())? {
            return Ok(true);
        }
        Ok(self
            .unparsed
            .iter()
            .filter(|(name, _)| name != pkg.name())
            .any(|(_, raw)| raw.as_deref().is_none_or(|raw| codec::mentions(raw, &file.path))))
    }

    fn forget(&mut self, name: &str) {
        self.snapshot.take(name);
        self.unparsed.retain(|(n, _)| n != name);
    }
}

fn remove_file(pkg: &Package, file: &PackageFile, owners: &Owners, skip: &PathList) -> FileOutcome {
    if skip.matches(&file.path) {
        return FileOutcome::Excluded;
    }

    match owners.shared(pkg, file) {
        Ok(false) => {}
        Ok(true) => return FileOutcome::Shared,
        Err(e) => {
            warn!("Keeping '{}': {}", file.path, e);
            return FileOutcome::Shared;
        }
    }

    match std::fs::remove_file(&file.path) {
        Ok(()) => FileOutcome::Removed,
        Err(e) if e.kind() == io::ErrorKind::NotFound => FileOutcome::Missing,
        Err(e) => {
            warn!("Cannot remove '{}': {}", file.path, e);
            FileOutcome::Failed(e.to_string())
        }
    }
}

fn remove_files(pkg: &Package, owners: &Owners, skip: &PathList, report: &mut PackageReport) -> Result<()> {
    for file in pkg.files()? {
        let outcome = remove_file(pkg, file, owners, skip);
        if outcome == FileOutcome::Removed {
            info!("Removed '{}'", file.path);
            prune_parents(Path::new(&file.path), &mut report.pruned_dirs);
        }
        report.files.push(FileReport {
            path: file.path.clone(),
            outcome,
        });
    }
    Ok(())
}

impl Database {
    /// Remove every package in the database
    ///
    /// Files are deleted unless `unlog_only` is set, then the log goes. A
    /// failure on one file does not stop the others.
    ///
    /// # Arguments
    ///
    /// * `opts` - Skip list, batch mode and unlog-only mode
    /// * `confirm` - Asked once per package unless `opts.batch` is set
    ///
    /// # Returns
    ///
    /// * `Result<Vec<PackageReport>>` - One report per package, in database
    ///   order. Removed packages leave the database; declined and failed
    ///   ones stay.
    pub fn remove(&mut self, opts: &RemoveOptions, confirm: &mut dyn Confirm) -> Result<Vec<PackageReport>> {
        let mut owners = if opts.unlog_only {
            Owners {
                snapshot: Database::new(self.logdir()),
                unparsed: Vec::new(),
            }
        } else {
            Owners::load(self.logdir())?
        };

        let names: Vec<String> = self.packages().iter().map(|p| p.name().to_string()).collect();
        let mut reports = Vec::with_capacity(names.len());

        for name in names {
            let Some(pkg) = self.find(&name) else { continue };

            let question = if opts.unlog_only {
                format!("Unlog package '{}'", name)
            } else {
                format!("Remove package '{}'", name)
            };
            if !opts.batch && !confirm.confirm(&question) {
                reports.push(PackageReport::new(&name, PackageStatus::Declined));
                continue;
            }

            let mut report = if opts.unlog_only {
                PackageReport::new(&name, PackageStatus::Unlogged)
            } else {
                PackageReport::new(&name, PackageStatus::Removed)
            };

            if !opts.unlog_only {
                if let Err(e) = remove_files(pkg, &owners, &opts.skip, &mut report) {
                    warn!("{}", e);
                    report.status = PackageStatus::Failed(e.to_string());
                    reports.push(report);
                    continue;
                }
            }

            match pkg.unlog() {
                Ok(()) => {
                    self.take(&name);
                    owners.forget(&name);
                }
                Err(e) => {
                    warn!("{}", e);
                    report.status = PackageStatus::Failed(e.to_string());
                }
            }
            reports.push(report);
        }

        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::write_log;

    fn install(root: &Path, rel: &str) -> String {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"data").unwrap();
        path.to_string_lossy().into_owned()
    }

    fn batch() -> RemoveOptions {
        RemoveOptions {
            batch: true,
            ..RemoveOptions::default()
        }
    }

    fn never(_: &str) -> bool {
        panic!("batch mode must not prompt")
    }

    fn select(logdir: &Path, names: &[&str]) -> Database {
        let mut db = Database::new(logdir);
        let queries: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        db.match_by_name(&queries, true).unwrap();
        db
    }

    #[test]
    fn test_shared_file_survives_until_last_owner() {
        let logdir = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let shared = install(root.path(), "lib/libx.so");
        let own_a = install(root.path(), "bin/a");
        let own_b = install(root.path(), "bin/b");
        write_log(logdir.path(), "a", &[(&shared, 4), (&own_a, 4)], 1);
        write_log(logdir.path(), "b", &[(&shared, 4), (&own_b, 4)], 1);

        let mut db = select(logdir.path(), &["a"]);
        let reports = db.remove(&batch(), &mut never).unwrap();
        assert_eq!(reports[0].status, PackageStatus::Removed);
        assert!(Path::new(&shared).exists());
        assert!(!Path::new(&own_a).exists());
        assert!(!logdir.path().join("a").exists());

        let mut db = select(logdir.path(), &["b"]);
        db.remove(&batch(), &mut never).unwrap();
        assert!(!Path::new(&shared).exists());
        assert!(!Path::new(&own_b).exists());
        assert!(db.is_empty());
    }

    #[test]
    fn test_removing_all_owners_together_deletes_shared_file() {
        let logdir = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let shared = install(root.path(), "share/common");
        write_log(logdir.path(), "a", &[(&shared, 4)], 1);
        write_log(logdir.path(), "b", &[(&shared, 4)], 1);

        let mut db = select(logdir.path(), &["a", "b"]);
        let reports = db.remove(&batch(), &mut never).unwrap();

        assert_eq!(reports[0].files[0].outcome, FileOutcome::Shared);
        assert_eq!(reports[1].files[0].outcome, FileOutcome::Removed);
        assert!(!Path::new(&shared).exists());
    }

    #[test]
    fn test_prune_stops_at_non_empty_directory() {
        let logdir = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let file = install(root.path(), "share/foo/sub/file");
        install(root.path(), "share/keep");
        write_log(logdir.path(), "foo", &[(&file, 4)], 1);

        let mut db = select(logdir.path(), &["foo"]);
        let reports = db.remove(&batch(), &mut never).unwrap();

        assert!(!root.path().join("share/foo").exists());
        assert!(root.path().join("share/keep").exists());
        assert_eq!(
            reports[0].pruned_dirs,
            vec![root.path().join("share/foo/sub"), root.path().join("share/foo")]
        );
    }

    #[test]
    fn test_missing_file_counts_as_removed() {
        let logdir = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let gone = root.path().join("gone").to_string_lossy().into_owned();
        write_log(logdir.path(), "ghost", &[(&gone, 0)], 1);

        let mut db = select(logdir.path(), &["ghost"]);
        let reports = db.remove(&batch(), &mut never).unwrap();

        assert_eq!(reports[0].status, PackageStatus::Removed);
        assert_eq!(reports[0].files[0].outcome, FileOutcome::Missing);
        assert!(!logdir.path().join("ghost").exists());
    }

    #[test]
    fn test_skip_list_keeps_files() {
        let logdir = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let conf = install(root.path(), "etc/foo.conf");
        let bin = install(root.path(), "bin/foo");
        write_log(logdir.path(), "foo", &[(&conf, 4), (&bin, 4)], 1);

        let opts = RemoveOptions {
            skip: PathList::parse(&root.path().join("etc").to_string_lossy()).unwrap(),
            batch: true,
            unlog_only: false,
        };
        let mut db = select(logdir.path(), &["foo"]);
        let reports = db.remove(&opts, &mut never).unwrap();

        assert!(Path::new(&conf).exists());
        assert!(!Path::new(&bin).exists());
        let excluded: Vec<&str> = reports[0]
            .files
            .iter()
            .filter(|f| f.outcome == FileOutcome::Excluded)
            .map(|f| f.path.as_str())
            .collect();
        assert_eq!(excluded, vec![conf.as_str()]);
    }

    #[test]
    fn test_unlog_only_leaves_files() {
        let logdir = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let bin = install(root.path(), "bin/foo");
        write_log(logdir.path(), "foo", &[(&bin, 4)], 1);

        let opts = RemoveOptions {
            unlog_only: true,
            ..batch()
        };
        let mut db = select(logdir.path(), &["foo"]);
        let reports = db.remove(&opts, &mut never).unwrap();

        assert_eq!(reports[0].status, PackageStatus::Unlogged);
        assert!(reports[0].files.is_empty());
        assert!(Path::new(&bin).exists());
        assert!(!logdir.path().join("foo").exists());
    }

    #[test]
    fn test_declined_package_is_kept() {
        let logdir = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let a = install(root.path(), "bin/a");
        let b = install(root.path(), "bin/b");
        write_log(logdir.path(), "a", &[(&a, 4)], 1);
        write_log(logdir.path(), "b", &[(&b, 4)], 1);

        let mut asked = Vec::new();
        let mut answer = |question: &str| {
            asked.push(question.to_string());
            question.contains("'b'")
        };

        let mut db = select(logdir.path(), &["a", "b"]);
        let reports = db.remove(&RemoveOptions::default(), &mut answer).unwrap();

        assert_eq!(asked, vec!["Remove package 'a'", "Remove package 'b'"]);
        assert_eq!(reports[0].status, PackageStatus::Declined);
        assert_eq!(reports[1].status, PackageStatus::Removed);
        assert!(Path::new(&a).exists());
        assert!(!Path::new(&b).exists());
        assert!(db.contains("a"));
        assert!(!db.contains("b"));
    }

    #[test]
    fn test_unreadable_log_is_not_unlogged() {
        let logdir = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let bin = install(root.path(), "bin/foo");
        write_log(logdir.path(), "foo", &[(&bin, 4)], 1);

        let mut db = select(logdir.path(), &["foo"]);
        std::fs::write(logdir.path().join("foo"), "garbage\n").unwrap();
        let reports = db.remove(&batch(), &mut never).unwrap();

        assert!(matches!(reports[0].status, PackageStatus::Failed(_)));
        assert!(Path::new(&bin).exists());
        assert!(logdir.path().join("foo").exists());
    }

    #[test]
    fn test_non_utf8_line_keeps_other_files_shared() {
        let logdir = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let shared = install(root.path(), "lib/libx.so");
        write_log(logdir.path(), "a", &[(&shared, 4)], 1);
        write_log(logdir.path(), "b", &[(&shared, 4)], 1);

        let log_b = logdir.path().join("b");
        let mut raw = std::fs::read(&log_b).unwrap();
        raw.extend_from_slice(b"/usr/share/caf\xe9|4|\n");
        std::fs::write(&log_b, raw).unwrap();

        let mut db = select(logdir.path(), &["a"]);
        let reports = db.remove(&batch(), &mut never).unwrap();

        assert_eq!(reports[0].files[0].outcome, FileOutcome::Shared);
        assert!(Path::new(&shared).exists());
    }

    #[test]
    fn test_unparsed_logs_still_own_their_files() {
        let logdir = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let listed = install(root.path(), "lib/libx.so");
        let other = install(root.path(), "bin/tool");
        write_log(logdir.path(), "a", &[(&listed, 4), (&other, 4)], 1);

        let db = select(logdir.path(), &["a"]);
        let pkg = db.find("a").unwrap();
        let listed = pkg.find_file(&listed).unwrap().unwrap();
        let other = pkg.find_file(&other).unwrap().unwrap();

        let mut raw = format!("#!pkglog\n{}|4|\n", listed.path).into_bytes();
        raw.extend_from_slice(b"\xff\n");
        let mut owners = Owners {
            snapshot: Database::new(logdir.path()),
            unparsed: vec![("b".to_string(), Some(raw))],
        };
        assert!(owners.shared(pkg, listed).unwrap());
        assert!(!owners.shared(pkg, other).unwrap());

        // a log that cannot even be read may own anything
        owners.unparsed.push(("c".to_string(), None));
        assert!(owners.shared(pkg, other).unwrap());

        // the package being removed never counts against itself
        owners.unparsed = vec![("a".to_string(), None)];
        assert!(!owners.shared(pkg, other).unwrap());

        owners.unparsed.push(("c".to_string(), None));
        owners.forget("c");
        assert!(!owners.shared(pkg, other).unwrap());
    }
}
