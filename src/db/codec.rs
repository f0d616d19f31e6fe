// src/db/codec.rs

//! On-disk package log format
//!
//! ```text
//! #!pkglog-0.1.0
//! #t:1700000000
//! #f:2
//! #s:5120
//! #a:Jane Doe
//! #S:A small library
//! #u:https://example.org
//! #l:MIT
//! #c:--prefix=/usr
//! #i:/usr/share/icons/foo.png
//! #d:first line of the description
//! #d:second line
//! /usr/lib/libfoo.so|13|libfoo.so.1
//! /usr/lib/libfoo.so.1|5107|
//! ```
//!
//! Header lines start with `#`; the first line that does not ends the
//! header. Body lines that do not look like `path|size|target` are skipped.

use crate::error::{Error, Result};
use crate::packages::{PackageFile, PackageHeader};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::debug;

/// Marker on the first line of every package log
pub const MAGIC: &str = "#!pkglog";

/// Header field codes
pub const CODE_DATE: char = 't';
pub const CODE_NFILES: char = 'f';
pub const CODE_SIZE: char = 's';
pub const CODE_AUTHOR: char = 'a';
pub const CODE_SUMMARY: char = 'S';
pub const CODE_URL: char = 'u';
pub const CODE_LICENSE: char = 'l';
pub const CODE_CONF_OPTS: char = 'c';
pub const CODE_ICON_PATH: char = 'i';
pub const CODE_DESCRIPTION: char = 'd';

/// A fully decoded package log
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    pub header: PackageHeader,
    pub files: Vec<PackageFile>,
}

fn check_magic(line: Option<&[u8]>) -> std::result::Result<(), String> {
    match line.and_then(|l| l.strip_prefix(MAGIC.as_bytes())) {
        Some(rest) if rest.is_empty() || rest[0] == b'-' => Ok(()),
        _ => Err("Not a pkglog log file".to_string()),
    }
}

/// Read the header, returning it along with the first body line, if any
///
/// Header values that are not valid UTF-8 are decoded lossily.
fn decode_header_lines<I>(lines: &mut I) -> std::result::Result<(PackageHeader, Option<Vec<u8>>), String>
where
    I: Iterator<Item = io::Result<Vec<u8>>>,
{
    let first = lines.next().transpose().map_err(|e| e.to_string())?;
    check_magic(first.as_deref())?;

    let mut header = PackageHeader::default();
    let mut seen_description = false;

    for line in lines {
        let line = line.map_err(|e| e.to_string())?;
        let Some(field) = line.strip_prefix(b"#") else {
            return Ok((header, Some(line)));
        };
        let field = String::from_utf8_lossy(field);

        let mut chars = field.chars();
        let (Some(code), Some(':')) = (chars.next(), chars.next()) else {
            debug!("Skipping malformed header line '#{}'", field);
            continue;
        };
        let value = chars.as_str();

        match code {
            CODE_DATE => header.date = value.trim().parse().unwrap_or(0),
            CODE_NFILES => header.nfiles = value.trim().parse().unwrap_or(0),
            CODE_SIZE => header.size = value.trim().parse().unwrap_or(0),
            CODE_AUTHOR => header.author = value.to_string(),
            CODE_SUMMARY => header.summary = value.to_string(),
            CODE_URL => header.url = value.to_string(),
            CODE_LICENSE => header.license = value.to_string(),
            CODE_CONF_OPTS => header.conf_opts = value.to_string(),
            CODE_ICON_PATH => header.icon_path = value.to_string(),
            CODE_DESCRIPTION => {
                if seen_description {
                    header.description.push('\n');
                }
                header.description.push_str(value);
                seen_description = true;
            }
            other => debug!("Skipping unknown header code '{}'", other),
        }
    }

    Ok((header, None))
}

/// Parse one `path|size|target` body line
fn decode_file_line(line: &str) -> Option<PackageFile> {
    if !line.starts_with('/') {
        return None;
    }

    let mut fields = line.splitn(3, '|');
    let path = fields.next()?;
    let size = fields.next()?.trim().parse().ok()?;
    let target = fields.next().unwrap_or("");

    Some(PackageFile::new(path, size, target))
}

/// Decode only the header of a log
pub fn decode_header(reader: impl BufRead) -> std::result::Result<PackageHeader, String> {
    decode_header_lines(&mut reader.split(b'\n')).map(|(header, _)| header)
}

/// Decode a whole log
///
/// Body lines that are not valid UTF-8 are skipped like any other malformed
/// line, so the files they name are never touched by a removal.
pub fn decode(reader: impl BufRead) -> std::result::Result<Decoded, String> {
    let mut lines = reader.split(b'\n');
    let (header, first) = decode_header_lines(&mut lines)?;

    let mut files = Vec::new();
    for line in first.into_iter().map(Ok).chain(lines) {
        let line = line.map_err(|e| e.to_string())?;
        if line.is_empty() {
            continue;
        }
        let line = match String::from_utf8(line) {
            Ok(line) => line,
            Err(e) => {
                debug!(
                    "Skipping log line that is not valid UTF-8 '{}'",
                    String::from_utf8_lossy(e.as_bytes())
                );
                continue;
            }
        };
        match decode_file_line(&line) {
            Some(file) => files.push(file),
            None => debug!("Skipping malformed log line '{}'", line),
        }
    }

    Ok(Decoded { header, files })
}

/// Whether the raw bytes of a log have a body line for `path`
///
/// Used on logs that could not be decoded, to tell whether they may still
/// own a file.
pub fn mentions(raw: &[u8], path: &str) -> bool {
    let path = path.as_bytes();
    raw.split(|&b| b == b'\n')
        .any(|line| line.strip_prefix(path).is_some_and(|rest| rest.first() == Some(&b'|')))
}

/// Encode a package log
pub fn encode(mut w: impl Write, header: &PackageHeader, files: &[PackageFile]) -> io::Result<()> {
    writeln!(w, "{}-{}", MAGIC, env!("CARGO_PKG_VERSION"))?;
    writeln!(w, "#{}:{}", CODE_DATE, header.date)?;
    writeln!(w, "#{}:{}", CODE_NFILES, header.nfiles)?;
    writeln!(w, "#{}:{}", CODE_SIZE, header.size)?;
    writeln!(w, "#{}:{}", CODE_AUTHOR, header.author)?;
    writeln!(w, "#{}:{}", CODE_SUMMARY, header.summary)?;
    writeln!(w, "#{}:{}", CODE_URL, header.url)?;
    writeln!(w, "#{}:{}", CODE_LICENSE, header.license)?;
    writeln!(w, "#{}:{}", CODE_CONF_OPTS, header.conf_opts)?;
    writeln!(w, "#{}:{}", CODE_ICON_PATH, header.icon_path)?;
    for line in header.description.split('\n') {
        writeln!(w, "#{}:{}", CODE_DESCRIPTION, line)?;
    }

    for file in files {
        writeln!(w, "{}|{}|{}", file.path, file.size, file.symlink_target)?;
    }

    w.flush()
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Error::parse(path, e.to_string()))
}

/// Read the header of the log at `path`
pub fn read_header(path: &Path) -> Result<PackageHeader> {
    decode_header(open(path)?).map_err(|reason| Error::parse(path, reason))
}

/// Read the file list of the log at `path`
pub fn read_files(path: &Path) -> Result<Vec<PackageFile>> {
    decode(open(path)?)
        .map(|decoded| decoded.files)
        .map_err(|reason| Error::parse(path, reason))
}

/// Write a log, replacing any previous one at `path`
///
/// The content goes to a temporary file in the same directory first, which
/// is then renamed over `path`.
pub fn write(path: &Path, header: &PackageHeader, files: &[PackageFile]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::InvalidArgument(format!("{}: no parent directory", path.display())))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".pkglog")
        .tempfile_in(dir)
        .map_err(|e| Error::fs(dir, e))?;

    encode(io::BufWriter::new(tmp.as_file_mut()), header, files).map_err(|e| Error::fs(path, e))?;
    tmp.as_file()
        .set_permissions(std::fs::Permissions::from_mode(0o644))
        .map_err(|e| Error::fs(path, e))?;
    tmp.persist(path).map_err(|e| Error::fs(path, e.error))?;

    debug!("Wrote {} ({} files)", path.display(), files.len());
    Ok(())
}
