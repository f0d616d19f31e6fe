// shim/src/paths.rs

//! Deciding what gets recorded

use libc::c_int;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

/// Whether `open` flags ask for write access
pub fn flags_write(flags: c_int) -> bool {
    flags & libc::O_ACCMODE != libc::O_RDONLY
}

/// Whether an `fopen` mode asks for write access
pub fn mode_writes(mode: &[u8]) -> bool {
    mode.iter().any(|c| matches!(c, b'w' | b'a' | b'+'))
}

/// Paths that are written to all the time and never belong to a package
pub fn is_ignored(path: &[u8]) -> bool {
    path == b"/dev/null" || path == b"/dev/tty" || path.starts_with(b"/proc/")
}

/// Directory that relative paths given with `dirfd` are resolved against
pub fn base_dir(dirfd: c_int) -> io::Result<PathBuf> {
    if dirfd == libc::AT_FDCWD {
        std::env::current_dir()
    } else {
        std::fs::read_link(format!("/proc/self/fd/{}", dirfd))
    }
}

/// Make `path` absolute, resolving it against `base` if it is relative
///
/// Paths are kept as raw bytes, whatever their encoding.
pub fn absolutize(path: &[u8], base: impl FnOnce() -> io::Result<PathBuf>) -> io::Result<Vec<u8>> {
    if path.starts_with(b"/") {
        return Ok(path.to_vec());
    }

    let base = base()?;
    let mut abs = base.as_os_str().as_bytes().to_vec();
    while abs.last() == Some(&b'/') {
        abs.pop();
    }
    abs.push(b'/');
    abs.extend_from_slice(path);
    Ok(abs)
}
