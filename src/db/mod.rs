// src/db/mod.rs

//! Package database
//!
//! The database is a directory holding one log file per package. This
//! module handles:
//! - Scanning the log directory
//! - Matching packages by name and version
//! - Sorted listing and path ownership queries
//! - Removing packages and their files (see [`remove`])

pub mod codec;
pub mod remove;

use crate::error::{Error, Result};
use crate::packages::{Package, SortKey, split_name};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub use remove::{Confirm, FileOutcome, FileReport, PackageReport, PackageStatus, RemoveOptions, StdinConfirm};

/// Outcome of matching one query against the log directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameMatch {
    pub query: String,
    /// Names of the packages the query matched
    pub matched: Vec<String>,
}

impl NameMatch {
    pub fn found(&self) -> bool {
        !self.matched.is_empty()
    }
}

/// Check whether a logged package name matches a query
///
/// Without `exact`, `foo` matches every version of `foo`, and `foo-1`
/// matches `foo-1.2.3` but not `foo-12`.
pub fn matches_query(query: &str, name: &str, exact: bool) -> bool {
    if exact {
        return query == name;
    }

    let (query_base, query_version) = split_name(query);
    let (base, version) = split_name(name);

    if query_base != base {
        return false;
    }
    if query_version.is_empty() || query_version == version {
        return true;
    }

    match version.strip_prefix(query_version) {
        Some(rest) => rest.chars().next().is_some_and(|c| c.is_ascii_punctuation()),
        None => false,
    }
}

/// In-memory view of the packages in a log directory
#[derive(Debug)]
pub struct Database {
    logdir: PathBuf,
    packages: Vec<Package>,
    total_size: u64,
    total_files: u64,
}

impl Database {
    /// Create an empty database over `logdir`; nothing is read yet
    pub fn new(logdir: impl Into<PathBuf>) -> Self {
        Self {
            logdir: logdir.into(),
            packages: Vec::new(),
            total_size: 0,
            total_files: 0,
        }
    }

    pub fn logdir(&self) -> &Path {
        &self.logdir
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Sum of the declared sizes of every package
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Sum of the declared file counts of every package
    pub fn total_files(&self) -> u64 {
        self.total_files
    }

    pub fn find(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Names of the entries in the log directory, dot files excluded
    fn log_names(&self) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.logdir).map_err(|e| Error::fs(&self.logdir, e))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::fs(&self.logdir, e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Add a package. Returns false if a package with that name is already in.
    pub fn add(&mut self, pkg: Package) -> bool {
        if self.contains(pkg.name()) {
            return false;
        }
        self.total_size += pkg.size();
        self.total_files += pkg.nfiles();
        self.packages.push(pkg);
        true
    }

    /// Parse the log `name` and add it; unreadable logs are skipped
    fn add_logged(&mut self, name: &str) -> bool {
        match Package::open(name, &self.logdir) {
            Ok(pkg) => self.add(pkg),
            Err(e) => {
                debug!("Skipping {}", e);
                false
            }
        }
    }

    /// Drop a package from the database, handing it back
    pub fn take(&mut self, name: &str) -> Option<Package> {
        let index = self.packages.iter().position(|p| p.name() == name)?;
        let pkg = self.packages.remove(index);
        self.total_size -= pkg.size();
        self.total_files -= pkg.nfiles();
        Some(pkg)
    }

    /// Load every package logged in the log directory
    ///
    /// Only headers are read. Logs that cannot be parsed are skipped and
    /// reported at debug level.
    ///
    /// # Returns
    ///
    /// * `Result<usize>` - Number of packages added, or an error if the log
    ///   directory cannot be read
    pub fn scan_all(&mut self) -> Result<usize> {
        let mut added = 0;
        for name in self.log_names()? {
            if self.add_logged(&name) {
                added += 1;
            }
        }

        if self.is_empty() {
            info!("No packages logged in '{}'", self.logdir.display());
        }
        Ok(added)
    }

    /// Load the packages matching each query
    ///
    /// A query that matches nothing is reported as not found; the remaining
    /// queries are still processed.
    ///
    /// # Arguments
    ///
    /// * `queries` - Package names, with or without a (partial) version
    /// * `exact` - Require the whole name to match, version included
    ///
    /// # Returns
    ///
    /// * `Result<Vec<NameMatch>>` - One entry per query, in order
    pub fn match_by_name(&mut self, queries: &[String], exact: bool) -> Result<Vec<NameMatch>> {
        let names = self.log_names()?;
        let mut results = Vec::with_capacity(queries.len());

        for query in queries {
            let query = query.to_lowercase();
            let mut matched = Vec::new();

            for name in names.iter().filter(|n| matches_query(&query, &n.to_lowercase(), exact)) {
                if self.contains(&name.to_lowercase()) || self.add_logged(name) {
                    matched.push(name.to_lowercase());
                }
            }

            if matched.is_empty() {
                info!("{}: Package not logged", query);
            }
            results.push(NameMatch { query, matched });
        }

        Ok(results)
    }

    /// Sort the packages in place
    pub fn sort(&mut self, key: SortKey, reverse: bool) {
        self.packages.sort_by(|a, b| key.compare(a, b));
        if reverse {
            self.packages.reverse();
        }
    }

    /// Sorted listing of the packages
    pub fn list(&mut self, key: SortKey, reverse: bool) -> &[Package] {
        self.sort(key, reverse);
        &self.packages
    }

    /// Sort the file list of every package
    pub fn sort_files(&mut self, key: SortKey, reverse: bool) -> Result<()> {
        for pkg in &mut self.packages {
            pkg.sort_files(key, reverse)?;
        }
        Ok(())
    }

    /// Read the file list of every package
    ///
    /// Packages whose file list cannot be read are dropped from the
    /// database, so that later queries only see complete packages. Returns
    /// the names of the dropped packages.
    pub fn load_files(&mut self) -> Vec<String> {
        let broken: Vec<String> = self
            .packages
            .iter()
            .filter_map(|p| match p.files() {
                Ok(_) => None,
                Err(e) => {
                    warn!("Ignoring package: {}", e);
                    Some(p.name().to_string())
                }
            })
            .collect();

        for name in &broken {
            self.take(name);
        }
        broken
    }

    /// Every package that owns `path`
    pub fn owners_of(&self, path: &str) -> Result<Vec<&Package>> {
        let mut owners = Vec::new();
        for pkg in &self.packages {
            if pkg.has_file(path)? {
                owners.push(pkg);
            }
        }
        Ok(owners)
    }

    /// Remove the logs of every package, leaving their files in place
    pub fn unlog_all(&mut self) -> Vec<(String, Result<()>)> {
        let mut results = Vec::new();
        for pkg in std::mem::take(&mut self.packages) {
            let result = pkg.unlog();
            results.push((pkg.name().to_string(), result));
            // keep whatever could not be unlogged
            if results.last().is_some_and(|(_, r)| r.is_err()) {
                self.packages.push(pkg);
            }
        }
        self.recount();
        results
    }

    fn recount(&mut self) {
        self.total_size = self.packages.iter().map(Package::size).sum();
        self.total_files = self.packages.iter().map(Package::nfiles).sum();
    }
}
