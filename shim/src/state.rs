// shim/src/state.rs

//! Process-wide state of the interception library
//!
//! Initialized on the first intercepted call: the real libc functions are
//! looked up with `dlsym(RTLD_NEXT)` and the environment is read. Any
//! failure here, or later while recording a path, ends the process with
//! [`FATAL_STATUS`].

use crate::paths::{absolutize, base_dir, is_ignored};
use crate::walk;
use libc::{FILE, c_char, c_int, c_uint, c_void, mode_t, off_t, off64_t};
use std::ffi::{CStr, CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::OnceLock;

/// Exit status used when the library cannot do its job
pub const FATAL_STATUS: c_int = 111;

/// File the recorded paths are appended to
pub const ENV_TMPFILE: &str = "PKGLOG_TMPFILE";

/// Set to `yes` to trace every recorded call on stderr
pub const ENV_DEBUG: &str = "PKGLOG_DEBUG";

pub type CreatFn = unsafe extern "C" fn(*const c_char, mode_t) -> c_int;
pub type OpenFn = unsafe extern "C" fn(*const c_char, c_int, ...) -> c_int;
pub type OpenatFn = unsafe extern "C" fn(c_int, *const c_char, c_int, ...) -> c_int;
pub type Open2Fn = unsafe extern "C" fn(*const c_char, c_int) -> c_int;
pub type Openat2Fn = unsafe extern "C" fn(c_int, *const c_char, c_int) -> c_int;
pub type LinkFn = unsafe extern "C" fn(*const c_char, *const c_char) -> c_int;
pub type LinkatFn = unsafe extern "C" fn(c_int, *const c_char, c_int, *const c_char, c_int) -> c_int;
pub type SymlinkatFn = unsafe extern "C" fn(*const c_char, c_int, *const c_char) -> c_int;
pub type TruncateFn = unsafe extern "C" fn(*const c_char, off_t) -> c_int;
pub type Truncate64Fn = unsafe extern "C" fn(*const c_char, off64_t) -> c_int;
pub type RenameatFn = unsafe extern "C" fn(c_int, *const c_char, c_int, *const c_char) -> c_int;
pub type Renameat2Fn = unsafe extern "C" fn(c_int, *const c_char, c_int, *const c_char, c_uint) -> c_int;
pub type FopenFn = unsafe extern "C" fn(*const c_char, *const c_char) -> *mut FILE;
pub type FreopenFn = unsafe extern "C" fn(*const c_char, *const c_char, *mut FILE) -> *mut FILE;

/// The libc functions being wrapped
pub struct Real {
    pub creat: CreatFn,
    pub creat64: CreatFn,
    pub open: OpenFn,
    pub open64: OpenFn,
    pub openat: OpenatFn,
    pub openat64: OpenatFn,
    /// `_FORTIFY_SOURCE` entry points, used when the mode argument is absent
    pub open_2: Open2Fn,
    pub open64_2: Open2Fn,
    pub openat_2: Openat2Fn,
    pub openat64_2: Openat2Fn,
    pub link: LinkFn,
    pub linkat: LinkatFn,
    pub symlink: LinkFn,
    pub symlinkat: SymlinkatFn,
    pub truncate: TruncateFn,
    pub truncate64: Truncate64Fn,
    pub rename: LinkFn,
    pub renameat: RenameatFn,
    /// Missing before glibc 2.28
    pub renameat2: Option<Renameat2Fn>,
    pub fopen: FopenFn,
    pub fopen64: FopenFn,
    pub freopen: FreopenFn,
    pub freopen64: FreopenFn,
}

pub struct State {
    pub real: Real,
    tmpfile: CString,
    debug: bool,
}

static STATE: OnceLock<State> = OnceLock::new();

/// Write a message to stderr without going through any wrapped function
pub fn message(msg: &str) {
    let line = format!("pkglog-shim: {}\n", msg);
    // SAFETY: the buffer is valid for `line.len()` bytes
    unsafe {
        libc::write(2, line.as_ptr() as *const c_void, line.len());
    }
}

/// Report an unrecoverable error and end the process
pub fn fatal(msg: &str) -> ! {
    message(msg);
    std::process::exit(FATAL_STATUS)
}

/// Look up the next definition of `name` after this library, if any
///
/// # Safety
///
/// `F` must be a function pointer type matching the C signature of `name`.
unsafe fn next_opt<F: Copy>(name: &CStr) -> Option<F> {
    // SAFETY: `name` is NUL-terminated
    let sym = unsafe { libc::dlsym(libc::RTLD_NEXT, name.as_ptr()) };
    if sym.is_null() {
        return None;
    }
    // SAFETY: the caller guarantees `F` is the right function pointer type
    Some(unsafe { std::mem::transmute_copy(&sym) })
}

/// Like [`next_opt`], but a missing symbol is fatal
///
/// # Safety
///
/// As for [`next_opt`].
unsafe fn next<F: Copy>(name: &CStr) -> F {
    // SAFETY: passed on to the caller
    unsafe { next_opt(name) }
        .unwrap_or_else(|| fatal(&format!("dlsym({}): symbol not found", name.to_string_lossy())))
}

impl Real {
    fn resolve() -> Self {
        // SAFETY: every type below matches the glibc prototype of the symbol
        unsafe {
            Self {
                creat: next(c"creat"),
                creat64: next(c"creat64"),
                open: next(c"open"),
                open64: next(c"open64"),
                openat: next(c"openat"),
                openat64: next(c"openat64"),
                open_2: next(c"__open_2"),
                open64_2: next(c"__open64_2"),
                openat_2: next(c"__openat_2"),
                openat64_2: next(c"__openat64_2"),
                link: next(c"link"),
                linkat: next(c"linkat"),
                symlink: next(c"symlink"),
                symlinkat: next(c"symlinkat"),
                truncate: next(c"truncate"),
                truncate64: next(c"truncate64"),
                rename: next(c"rename"),
                renameat: next(c"renameat"),
                renameat2: next_opt(c"renameat2"),
                fopen: next(c"fopen"),
                fopen64: next(c"fopen64"),
                freopen: next(c"freopen"),
                freopen64: next(c"freopen64"),
            }
        }
    }
}

/// Saves `errno` and puts it back when dropped
pub struct ErrnoGuard(c_int);

impl ErrnoGuard {
    pub fn save() -> Self {
        // SAFETY: __errno_location always returns a valid thread-local pointer
        Self(unsafe { *libc::__errno_location() })
    }
}

impl Drop for ErrnoGuard {
    fn drop(&mut self) {
        // SAFETY: as in `save`
        unsafe { *libc::__errno_location() = self.0 }
    }
}

impl State {
    fn init() -> Self {
        let real = Real::resolve();

        let tmpfile = match std::env::var_os(ENV_TMPFILE) {
            Some(value) if !value.is_empty() => CString::new(value.as_bytes())
                .unwrap_or_else(|_| fatal(&format!("{}: invalid path", ENV_TMPFILE))),
            _ => fatal(&format!("{}: variable not set", ENV_TMPFILE)),
        };
        let debug = std::env::var_os(ENV_DEBUG).is_some_and(|v| v == "yes");

        Self { real, tmpfile, debug }
    }

    /// The state of this process, initializing it on first use
    pub fn get() -> &'static State {
        STATE.get_or_init(State::init)
    }

    /// Append `path` to the temporary file
    fn append(&self, path: &[u8]) {
        let mut line = Vec::with_capacity(path.len() + 1);
        line.extend_from_slice(path);
        line.push(b'\n');
        let flags = libc::O_WRONLY | libc::O_CREAT | libc::O_APPEND | libc::O_CLOEXEC;
        let tmpfile = self.tmpfile.to_string_lossy();

        // SAFETY: `tmpfile` is NUL-terminated and `line` is valid for its length
        unsafe {
            let fd = (self.real.open)(self.tmpfile.as_ptr(), flags, 0o644 as c_uint);
            if fd < 0 {
                fatal(&format!("open({}): {}", tmpfile, std::io::Error::last_os_error()));
            }
            let written = libc::write(fd, line.as_ptr() as *const c_void, line.len());
            if written != line.len() as isize {
                fatal(&format!("write({}): {}", tmpfile, std::io::Error::last_os_error()));
            }
            if libc::close(fd) != 0 {
                fatal(&format!("close({}): {}", tmpfile, std::io::Error::last_os_error()));
            }
        }
    }

    /// Record an absolute path, unless it is one of the ignored ones
    pub fn record(&self, call: &str, path: &[u8]) {
        if is_ignored(path) {
            return;
        }
        let _errno = ErrnoGuard::save();
        self.append(path);
        if self.debug {
            message(&format!("{}(\"{}\")", call, String::from_utf8_lossy(path)));
        }
    }

    /// Absolute form of a path given to `call` relative to `dirfd`
    ///
    /// A path that cannot be resolved would go unrecorded, so that is fatal.
    fn absolute(&self, call: &str, dirfd: c_int, path: &[u8]) -> Vec<u8> {
        absolutize(path, || base_dir(dirfd)).unwrap_or_else(|e| {
            fatal(&format!(
                "{}(\"{}\"): cannot resolve relative path: {}",
                call,
                String::from_utf8_lossy(path),
                e
            ))
        })
    }

    /// Record a path given to a libc call, relative to `dirfd`
    ///
    /// # Safety
    ///
    /// `path` must be null or point to a NUL-terminated string.
    pub unsafe fn record_at(&self, call: &str, dirfd: c_int, path: *const c_char) {
        if path.is_null() {
            return;
        }
        // SAFETY: checked for null above, NUL-termination is up to the caller
        let path = unsafe { CStr::from_ptr(path) }.to_bytes();
        let _errno = ErrnoGuard::save();
        let abs = self.absolute(call, dirfd, path);
        self.record(call, &abs);
    }

    /// Record the destination of a rename
    ///
    /// A renamed directory is recorded as the files it contains.
    ///
    /// # Safety
    ///
    /// `path` must be null or point to a NUL-terminated string.
    pub unsafe fn record_renamed(&self, call: &str, dirfd: c_int, path: *const c_char) {
        if path.is_null() {
            return;
        }
        // SAFETY: as in `record_at`
        let path = unsafe { CStr::from_ptr(path) }.to_bytes();
        let _errno = ErrnoGuard::save();
        let abs = self.absolute(call, dirfd, path);
        let abs_path = OsStr::from_bytes(&abs);

        match std::fs::symlink_metadata(abs_path) {
            Ok(meta) if meta.is_dir() => {
                for leaf in walk::leaves(Path::new(abs_path)) {
                    self.record(call, leaf.as_os_str().as_bytes());
                }
            }
            _ => self.record(call, &abs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_guard_restores() {
        unsafe { *libc::__errno_location() = libc::ENOENT };
        {
            let _guard = ErrnoGuard::save();
            unsafe { *libc::__errno_location() = libc::EACCES };
        }
        assert_eq!(unsafe { *libc::__errno_location() }, libc::ENOENT);
    }

    #[test]
    fn test_next_resolves_libc() {
        let real: LinkFn = unsafe { next(c"rename") };
        let dir = tempfile::tempdir().unwrap();
        let from = CString::new(dir.path().join("a").to_string_lossy().as_bytes()).unwrap();
        let to = CString::new(dir.path().join("b").to_string_lossy().as_bytes()).unwrap();
        std::fs::write(dir.path().join("a"), b"x").unwrap();

        assert_eq!(unsafe { real(from.as_ptr(), to.as_ptr()) }, 0);
        assert!(dir.path().join("b").exists());
    }
}
