// src/output.rs

//! Text output for listings
//!
//! Columns are right-aligned and separated by two spaces; the package or
//! file name always comes last.

use crate::error::{Error, Result};
use crate::packages::Package;
use chrono::{Local, TimeZone};
use std::io::Write;
use std::str::FromStr;

const KILOBYTE: u64 = 1024;
const MEGABYTE: u64 = KILOBYTE * 1024;
const GIGABYTE: u64 = MEGABYTE * 1024;

/// How sizes are printed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SizeUnit {
    /// `512`, `1.5k`, `230M`, ...
    #[default]
    Human,
    /// Whole multiples of a block size, in bytes
    Blocks(u64),
}

impl FromStr for SizeUnit {
    type Err = Error;

    /// Parse a block size such as `1`, `4k`, `10M` or `b`
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidArgument(format!("{}: Invalid block size", s));

        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (digits, suffix) = s.split_at(split);

        let multiplier = match suffix {
            "" | "b" | "B" => 1,
            "k" | "K" => KILOBYTE,
            "m" | "M" => MEGABYTE,
            _ => return Err(invalid()),
        };
        let count = if digits.is_empty() {
            1
        } else {
            digits.parse::<u64>().map_err(|_| invalid())?
        };

        match count.checked_mul(multiplier) {
            Some(0) | None => Err(invalid()),
            Some(unit) => Ok(SizeUnit::Blocks(unit)),
        }
    }
}

/// Two significant digits, like `1.5` or `12`
fn short(value: f64) -> String {
    if value < 9.95 {
        let s = format!("{:.1}", value);
        s.strip_suffix(".0").map(str::to_string).unwrap_or(s)
    } else {
        format!("{:.0}", value)
    }
}

/// Format a size in bytes
pub fn fmt_size(size: u64, unit: SizeUnit) -> String {
    match unit {
        SizeUnit::Blocks(block) => (size / block).to_string(),
        SizeUnit::Human => {
            let fsize = size as f64;
            if size < KILOBYTE {
                size.to_string()
            } else if size < 10 * KILOBYTE {
                format!("{}k", short(fsize / KILOBYTE as f64))
            } else if size < MEGABYTE {
                format!("{}k", size / KILOBYTE)
            } else if size < 10 * MEGABYTE {
                format!("{}M", short(fsize / MEGABYTE as f64))
            } else if size < GIGABYTE {
                format!("{}M", size / MEGABYTE)
            } else {
                format!("{}G", short(fsize / GIGABYTE as f64))
            }
        }
    }
}

/// Format an install date in local time
///
/// A date of 0 gives a blank string as wide as a real date, so that columns
/// stay aligned in the totals line.
pub fn fmt_date(date: i64, hour: bool) -> String {
    let format = if hour { "%Y-%m-%d %H:%M" } else { "%Y-%m-%d" };
    match Local.timestamp_opt(date, 0).single() {
        Some(dt) if date != 0 => dt.format(format).to_string(),
        _ => " ".repeat(Local::now().format(format).to_string().len()),
    }
}

/// Which columns `list` prints in front of the package names
#[derive(Debug, Clone, Copy, Default)]
pub struct ListColumns {
    pub sizes: bool,
    pub nfiles: bool,
    pub date: bool,
    pub hour: bool,
    pub totals: bool,
    pub unit: SizeUnit,
}

/// Print one line per package, plus a `TOTAL` line if asked to
pub fn write_package_list(
    out: &mut impl Write,
    packages: &[Package],
    totals: (u64, u64),
    cols: &ListColumns,
) -> Result<()> {
    let (total_size, total_files) = totals;

    let size_w = if cols.totals {
        fmt_size(total_size, cols.unit).len()
    } else {
        packages.iter().map(|p| fmt_size(p.size(), cols.unit).len()).max().unwrap_or(0)
    };
    let nfiles_w = if cols.totals {
        total_files.to_string().len()
    } else {
        packages.iter().map(|p| p.nfiles().to_string().len()).max().unwrap_or(0)
    };

    let columns = |out: &mut dyn Write, size: u64, nfiles: u64, date: i64| -> std::io::Result<()> {
        if cols.sizes {
            write!(out, "{:>w$}  ", fmt_size(size, cols.unit), w = size_w)?;
        }
        if cols.nfiles {
            write!(out, "{:>w$}  ", nfiles, w = nfiles_w)?;
        }
        if cols.date {
            write!(out, "{}  ", fmt_date(date, cols.hour))?;
        }
        Ok(())
    };

    for pkg in packages {
        columns(&mut *out, pkg.size(), pkg.nfiles(), pkg.date())?;
        writeln!(out, "{}", pkg.name())?;
    }

    if cols.totals {
        writeln!(out)?;
        columns(&mut *out, total_size, total_files, 0)?;
        writeln!(out, "TOTAL")?;
    }
    Ok(())
}

/// What `files` prints for each file
#[derive(Debug, Clone, Copy, Default)]
pub struct FileColumns {
    pub sizes: bool,
    pub symlinks: bool,
    /// Leave out the `name:` line above each package
    pub no_name: bool,
    pub totals: bool,
    pub unit: SizeUnit,
}

/// Print the files of each package, in their current order
pub fn write_file_list(out: &mut impl Write, packages: &[Package], cols: &FileColumns) -> Result<()> {
    let mut size_w = 0;
    let mut total_size = 0;
    for pkg in packages {
        for file in pkg.files()? {
            size_w = size_w.max(fmt_size(file.size, cols.unit).len());
            total_size += file.size;
        }
    }
    if cols.totals {
        size_w = size_w.max(fmt_size(total_size, cols.unit).len());
    }

    for (i, pkg) in packages.iter().enumerate() {
        if i > 0 {
            writeln!(out)?;
        }
        if !cols.no_name {
            writeln!(out, "{}:", pkg.name())?;
        }
        for file in pkg.files()? {
            if cols.sizes {
                write!(out, "{:>w$}  ", fmt_size(file.size, cols.unit), w = size_w)?;
            }
            write!(out, "{}", file.path)?;
            if cols.symlinks && file.is_symlink() {
                write!(out, " -> {}", file.symlink_target)?;
            }
            writeln!(out)?;
        }
    }

    if cols.totals {
        writeln!(out, "\n{:>w$}  TOTAL", fmt_size(total_size, cols.unit), w = size_w)?;
    }
    Ok(())
}

/// Print the descriptive fields of a package
pub fn write_info(out: &mut impl Write, pkg: &Package) -> Result<()> {
    let header = pkg.header();
    writeln!(out, "Name: {}", pkg.base_name())?;
    writeln!(out, "Version: {}", pkg.version())?;
    writeln!(out, "Summary: {}", header.summary)?;
    writeln!(out, "Author: {}", header.author)?;
    writeln!(out, "License: {}", header.license)?;
    writeln!(out, "URL: {}", header.url)?;

    write!(out, "Description:")?;
    if header.description.contains('\n') {
        for line in header.description.lines() {
            write!(out, "\n   {}", line)?;
        }
        writeln!(out)?;
    } else {
        writeln!(out, " {}", header.description)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::codec;
    use crate::packages::{PackageFile, PackageHeader};
    use std::path::Path;

    fn logged(logdir: &Path, name: &str, header: PackageHeader, files: &[PackageFile]) -> Package {
        codec::write(&logdir.join(name), &header, files).unwrap();
        Package::open(name, logdir).unwrap()
    }

    #[test]
    fn test_fmt_size_human() {
        assert_eq!(fmt_size(0, SizeUnit::Human), "0");
        assert_eq!(fmt_size(1023, SizeUnit::Human), "1023");
        assert_eq!(fmt_size(1024, SizeUnit::Human), "1k");
        assert_eq!(fmt_size(1536, SizeUnit::Human), "1.5k");
        assert_eq!(fmt_size(20 * 1024, SizeUnit::Human), "20k");
        assert_eq!(fmt_size(3 * MEGABYTE + MEGABYTE / 2, SizeUnit::Human), "3.5M");
        assert_eq!(fmt_size(230 * MEGABYTE, SizeUnit::Human), "230M");
        assert_eq!(fmt_size(2 * GIGABYTE, SizeUnit::Human), "2G");
    }

    #[test]
    fn test_fmt_size_blocks() {
        assert_eq!(fmt_size(5000, SizeUnit::Blocks(1)), "5000");
        assert_eq!(fmt_size(5000, SizeUnit::Blocks(KILOBYTE)), "4");
    }

    #[test]
    fn test_parse_block_size() {
        assert_eq!("1".parse::<SizeUnit>().unwrap(), SizeUnit::Blocks(1));
        assert_eq!("k".parse::<SizeUnit>().unwrap(), SizeUnit::Blocks(KILOBYTE));
        assert_eq!("4K".parse::<SizeUnit>().unwrap(), SizeUnit::Blocks(4 * KILOBYTE));
        assert_eq!("10m".parse::<SizeUnit>().unwrap(), SizeUnit::Blocks(10 * MEGABYTE));
        assert!("0".parse::<SizeUnit>().is_err());
        assert!("12x".parse::<SizeUnit>().is_err());
    }

    #[test]
    fn test_fmt_date() {
        assert_eq!(fmt_date(0, false), " ".repeat(10));
        assert_eq!(fmt_date(0, true), " ".repeat(16));
        assert_eq!(fmt_date(1_700_000_000, false).len(), 10);
        assert_eq!(fmt_date(1_700_000_000, true).len(), 16);
    }

    #[test]
    fn test_package_list_with_totals() {
        let logdir = tempfile::tempdir().unwrap();
        let header = |size, nfiles| PackageHeader {
            size,
            nfiles,
            ..PackageHeader::default()
        };
        let packages = vec![
            logged(logdir.path(), "bar", header(2048, 3), &[]),
            logged(logdir.path(), "foo", header(100, 12), &[]),
        ];

        let cols = ListColumns {
            sizes: true,
            nfiles: true,
            totals: true,
            ..ListColumns::default()
        };
        let mut out = Vec::new();
        write_package_list(&mut out, &packages, (2148, 15), &cols).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "  2k   3  bar\n 100  12  foo\n\n2.1k  15  TOTAL\n"
        );
    }

    #[test]
    fn test_file_list_with_symlinks() {
        let logdir = tempfile::tempdir().unwrap();
        let files = vec![
            PackageFile::new("/usr/lib/libfoo.so", 11, "libfoo.so.1"),
            PackageFile::new("/usr/lib/libfoo.so.1", 2000, ""),
        ];
        let packages = vec![logged(logdir.path(), "foo", PackageHeader::default(), &files)];

        let cols = FileColumns {
            sizes: true,
            symlinks: true,
            ..FileColumns::default()
        };
        let mut out = Vec::new();
        write_file_list(&mut out, &packages, &cols).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "foo:\n  11  /usr/lib/libfoo.so -> libfoo.so.1\n2000  /usr/lib/libfoo.so.1\n"
        );
    }

    #[test]
    fn test_info_multiline_description() {
        let logdir = tempfile::tempdir().unwrap();
        let header = PackageHeader {
            summary: "Foo tools".to_string(),
            description: "line one\nline two".to_string(),
            ..PackageHeader::default()
        };
        let pkg = logged(logdir.path(), "foo-1.2", header, &[]);

        let mut out = Vec::new();
        write_info(&mut out, &pkg).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("Name: foo\nVersion: 1.2\nSummary: Foo tools\n"));
        assert!(text.ends_with("Description:\n   line one\n   line two\n"));
    }
}
