// src/packages/package.rs

//! A logged package: header metadata plus the list of files it installed

use crate::db::codec;
use crate::error::{Error, Result};
use crate::packages::PackageFile;
use serde::Serialize;
use std::cell::OnceCell;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

/// Descriptive fields stored in the header of a package log
///
/// `size` and `nfiles` are declared by whoever wrote the log and are not
/// recomputed when it is read back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PackageHeader {
    /// Install date, in seconds since the epoch
    pub date: i64,
    pub size: u64,
    pub nfiles: u64,
    pub author: String,
    pub summary: String,
    pub url: String,
    pub license: String,
    pub conf_opts: String,
    pub icon_path: String,
    pub description: String,
}

/// Sort order for package and file listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    Name,
    Size,
    Files,
    Date,
}

impl SortKey {
    pub fn as_str(&self) -> &str {
        match self {
            SortKey::Name => "name",
            SortKey::Size => "size",
            SortKey::Files => "files",
            SortKey::Date => "date",
        }
    }

    /// Compare two packages. Ties are broken by name.
    pub fn compare(&self, left: &Package, right: &Package) -> Ordering {
        let primary = match self {
            SortKey::Name => Ordering::Equal,
            SortKey::Size => left.size().cmp(&right.size()),
            SortKey::Files => left.nfiles().cmp(&right.nfiles()),
            SortKey::Date => left.date().cmp(&right.date()),
        };
        primary.then_with(|| left.name().cmp(right.name()))
    }

    /// Compare two files. Files only have a name and a size, so every key
    /// other than `Size` orders them by name.
    pub fn compare_files(&self, left: &PackageFile, right: &PackageFile) -> Ordering {
        match self {
            SortKey::Size => left
                .size
                .cmp(&right.size)
                .then_with(|| left.path.cmp(&right.path)),
            _ => left.path.cmp(&right.path),
        }
    }
}

impl FromStr for SortKey {
    type Err = Error;

    /// Accept any non-empty prefix of a key name, so `s` means `size`
    fn from_str(s: &str) -> Result<Self> {
        let keys = [SortKey::Size, SortKey::Date, SortKey::Files, SortKey::Name];
        keys.into_iter()
            .find(|key| !s.is_empty() && key.as_str().starts_with(s))
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "'{}' is not a sort key (expected 'name', 'size', 'date' or 'files')",
                    s
                ))
            })
    }
}

/// Split a package name into base name and version
///
/// The split happens at the rightmost hyphen followed by a digit:
/// `openssl-1.0.2` gives `("openssl", "1.0.2")`, `httpd` gives `("httpd", "")`.
pub fn split_name(name: &str) -> (&str, &str) {
    let bytes = name.as_bytes();
    for i in (1..bytes.len()).rev() {
        if bytes[i].is_ascii_digit() && bytes[i - 1] == b'-' {
            return (&name[..i - 1], &name[i..]);
        }
    }
    (name, "")
}

/// A package recorded in the log directory
#[derive(Debug, Serialize)]
pub struct Package {
    name: String,
    base_name: String,
    version: String,
    #[serde(skip)]
    log_path: PathBuf,
    #[serde(flatten)]
    header: PackageHeader,
    /// Loaded from the log on first access
    #[serde(skip)]
    files: OnceCell<Vec<PackageFile>>,
    /// Whether `files` is currently in ascending path order
    #[serde(skip)]
    sorted_by_path: bool,
}

impl Package {
    fn with_header(name: &str, logdir: &Path, header: PackageHeader) -> Self {
        let name = name.to_lowercase();
        let (base_name, version) = split_name(&name);
        Self {
            base_name: base_name.to_string(),
            version: version.to_string(),
            log_path: logdir.join(&name),
            name,
            header,
            files: OnceCell::new(),
            sorted_by_path: true,
        }
    }

    /// Open a package already logged in `logdir`
    ///
    /// Only the header is read; the file list is loaded on first use.
    pub fn open(name: &str, logdir: &Path) -> Result<Self> {
        let header = codec::read_header(&logdir.join(name))?;
        let mut pkg = Self::with_header(name, logdir, header);
        // keep the on-disk name even if it is not lowercase
        pkg.log_path = logdir.join(name);
        Ok(pkg)
    }

    /// Build a new package from the set of paths an install produced, and
    /// write its log
    pub fn create(name: &str, logdir: &Path, paths: &BTreeSet<String>) -> Result<Self> {
        let header = PackageHeader {
            date: chrono::Utc::now().timestamp(),
            ..PackageHeader::default()
        };
        let mut pkg = Self::with_header(name, logdir, header);
        pkg.files = OnceCell::from(Vec::new());

        for path in paths {
            pkg.add_file(path)?;
        }

        if pkg.nfiles() == 0 {
            return Err(Error::NoFiles(pkg.name));
        }

        pkg.sort_by_path()?;
        pkg.write_log()?;
        info!(
            "Logged package {} ({} files, {} bytes)",
            pkg.name,
            pkg.nfiles(),
            pkg.size()
        );
        Ok(pkg)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn header(&self) -> &PackageHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut PackageHeader {
        &mut self.header
    }

    pub fn date(&self) -> i64 {
        self.header.date
    }

    pub fn size(&self) -> u64 {
        self.header.size
    }

    pub fn nfiles(&self) -> u64 {
        self.header.nfiles
    }

    /// The files installed by this package, loading them from the log if needed
    pub fn files(&self) -> Result<&[PackageFile]> {
        if let Some(files) = self.files.get() {
            return Ok(files.as_slice());
        }

        let mut files = codec::read_files(&self.log_path)?;
        files.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("Loaded {} files of {}", files.len(), self.name);

        Ok(self.files.get_or_init(|| files).as_slice())
    }

    fn files_mut(&mut self) -> Result<&mut Vec<PackageFile>> {
        self.files()?;
        self.files
            .get_mut()
            .ok_or_else(|| Error::parse(&self.log_path, "file list not loaded"))
    }

    /// Whether the file list has been read already
    pub fn files_loaded(&self) -> bool {
        self.files.get().is_some()
    }

    /// Reorder the file list in place
    pub fn sort_files(&mut self, key: SortKey, reverse: bool) -> Result<()> {
        let files = self.files_mut()?;
        files.sort_by(|a, b| key.compare_files(a, b));
        if reverse {
            files.reverse();
        }
        self.sorted_by_path = key != SortKey::Size && !reverse;
        Ok(())
    }

    fn sort_by_path(&mut self) -> Result<()> {
        self.sort_files(SortKey::Name, false)
    }

    /// Look up a file by path
    pub fn find_file(&self, path: &str) -> Result<Option<&PackageFile>> {
        let files = self.files()?;
        if self.sorted_by_path {
            Ok(files
                .binary_search_by(|f| f.path.as_str().cmp(path))
                .ok()
                .map(|i| &files[i]))
        } else {
            Ok(files.iter().find(|f| f.path == path))
        }
    }

    pub fn has_file(&self, path: &str) -> Result<bool> {
        Ok(self.find_file(path)?.is_some())
    }

    /// Whether a package other than this one in `others` also owns `file`
    pub fn is_shared(&self, file: &PackageFile, others: &[Package]) -> Result<bool> {
        for other in others.iter().filter(|p| p.name != self.name) {
            if other.has_file(&file.path)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Inspect `path` on disk and add it to the file list
    ///
    /// Paths that vanished since they were recorded are kept with a size of 0.
    fn add_file(&mut self, path: &str) -> Result<()> {
        let file = PackageFile::from_disk(path).unwrap_or_else(|_| PackageFile::missing(path));
        self.header.size += file.size;
        self.header.nfiles += 1;
        self.files_mut()?.push(file);
        Ok(())
    }

    /// Merge new paths into the package and rewrite its log if anything changed
    ///
    /// Returns whether any file was added.
    pub fn append(&mut self, paths: &BTreeSet<String>) -> Result<bool> {
        self.sort_by_path()?;

        let mut new_paths = Vec::new();
        for path in paths {
            if !self.has_file(path)? {
                new_paths.push(path);
            }
        }

        let appended = !new_paths.is_empty();
        for path in new_paths {
            self.add_file(path)?;
        }

        if appended {
            self.sort_by_path()?;
            self.write_log()?;
            info!("Appended files to package {}", self.name);
        } else {
            debug!("Package {} already contains every file", self.name);
        }
        Ok(appended)
    }

    /// Write the header and file list to the package log
    pub fn write_log(&self) -> Result<()> {
        codec::write(&self.log_path, &self.header, self.files()?)
    }

    /// Delete the package log, leaving the installed files alone
    ///
    /// A log that is already gone counts as unlogged.
    pub fn unlog(&self) -> Result<()> {
        match std::fs::remove_file(&self.log_path) {
            Ok(()) => {
                info!("Package '{}' removed from database", self.name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::fs(&self.log_path, e)),
        }
    }
}
