// shim/src/hooks.rs

//! Exported replacements for the libc functions that create or write files
//!
//! Each hook calls the real function first and only records the path when
//! the call succeeded and asked for write access.

use crate::paths::{flags_write, mode_writes};
use crate::state::State;
use libc::{AT_FDCWD, FILE, c_char, c_int, c_uint, mode_t, off_t, off64_t};
use std::ffi::CStr;

/// # Safety
///
/// `mode` must be null or point to a NUL-terminated string.
unsafe fn stream_writes(mode: *const c_char) -> bool {
    // SAFETY: null checked, termination is up to the caller
    !mode.is_null() && mode_writes(unsafe { CStr::from_ptr(mode) }.to_bytes())
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn creat(path: *const c_char, mode: mode_t) -> c_int {
    let state = State::get();
    let fd = unsafe { (state.real.creat)(path, mode) };
    if fd >= 0 {
        unsafe { state.record_at("creat", AT_FDCWD, path) };
    }
    fd
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn creat64(path: *const c_char, mode: mode_t) -> c_int {
    let state = State::get();
    let fd = unsafe { (state.real.creat64)(path, mode) };
    if fd >= 0 {
        unsafe { state.record_at("creat64", AT_FDCWD, path) };
    }
    fd
}

// The optional mode of open(2) is read as a fixed third argument, which the
// x86_64 and aarch64 Linux calling conventions pass the same way.

#[unsafe(no_mangle)]
pub unsafe extern "C" fn open(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    let state = State::get();
    let fd = unsafe { (state.real.open)(path, flags, mode as c_uint) };
    if fd >= 0 && flags_write(flags) {
        unsafe { state.record_at("open", AT_FDCWD, path) };
    }
    fd
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn open64(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    let state = State::get();
    let fd = unsafe { (state.real.open64)(path, flags, mode as c_uint) };
    if fd >= 0 && flags_write(flags) {
        unsafe { state.record_at("open64", AT_FDCWD, path) };
    }
    fd
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn openat(dirfd: c_int, path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    let state = State::get();
    let fd = unsafe { (state.real.openat)(dirfd, path, flags, mode as c_uint) };
    if fd >= 0 && flags_write(flags) {
        unsafe { state.record_at("openat", dirfd, path) };
    }
    fd
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn openat64(dirfd: c_int, path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    let state = State::get();
    let fd = unsafe { (state.real.openat64)(dirfd, path, flags, mode as c_uint) };
    if fd >= 0 && flags_write(flags) {
        unsafe { state.record_at("openat64", dirfd, path) };
    }
    fd
}

// Fortified builds call these when open(2) is given no mode. O_CREAT and
// O_TMPFILE need one, so the real functions reject them.

#[unsafe(no_mangle)]
pub unsafe extern "C" fn __open_2(path: *const c_char, flags: c_int) -> c_int {
    let state = State::get();
    let fd = unsafe { (state.real.open_2)(path, flags) };
    if fd >= 0 && flags_write(flags) {
        unsafe { state.record_at("__open_2", AT_FDCWD, path) };
    }
    fd
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn __open64_2(path: *const c_char, flags: c_int) -> c_int {
    let state = State::get();
    let fd = unsafe { (state.real.open64_2)(path, flags) };
    if fd >= 0 && flags_write(flags) {
        unsafe { state.record_at("__open64_2", AT_FDCWD, path) };
    }
    fd
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn __openat_2(dirfd: c_int, path: *const c_char, flags: c_int) -> c_int {
    let state = State::get();
    let fd = unsafe { (state.real.openat_2)(dirfd, path, flags) };
    if fd >= 0 && flags_write(flags) {
        unsafe { state.record_at("__openat_2", dirfd, path) };
    }
    fd
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn __openat64_2(dirfd: c_int, path: *const c_char, flags: c_int) -> c_int {
    let state = State::get();
    let fd = unsafe { (state.real.openat64_2)(dirfd, path, flags) };
    if fd >= 0 && flags_write(flags) {
        unsafe { state.record_at("__openat64_2", dirfd, path) };
    }
    fd
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn link(oldpath: *const c_char, newpath: *const c_char) -> c_int {
    let state = State::get();
    let ret = unsafe { (state.real.link)(oldpath, newpath) };
    if ret == 0 {
        unsafe { state.record_at("link", AT_FDCWD, newpath) };
    }
    ret
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn linkat(
    olddirfd: c_int,
    oldpath: *const c_char,
    newdirfd: c_int,
    newpath: *const c_char,
    flags: c_int,
) -> c_int {
    let state = State::get();
    let ret = unsafe { (state.real.linkat)(olddirfd, oldpath, newdirfd, newpath, flags) };
    if ret == 0 {
        unsafe { state.record_at("linkat", newdirfd, newpath) };
    }
    ret
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn symlink(target: *const c_char, linkpath: *const c_char) -> c_int {
    let state = State::get();
    let ret = unsafe { (state.real.symlink)(target, linkpath) };
    if ret == 0 {
        unsafe { state.record_at("symlink", AT_FDCWD, linkpath) };
    }
    ret
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn symlinkat(target: *const c_char, newdirfd: c_int, linkpath: *const c_char) -> c_int {
    let state = State::get();
    let ret = unsafe { (state.real.symlinkat)(target, newdirfd, linkpath) };
    if ret == 0 {
        unsafe { state.record_at("symlinkat", newdirfd, linkpath) };
    }
    ret
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn truncate(path: *const c_char, length: off_t) -> c_int {
    let state = State::get();
    let ret = unsafe { (state.real.truncate)(path, length) };
    if ret == 0 {
        unsafe { state.record_at("truncate", AT_FDCWD, path) };
    }
    ret
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn truncate64(path: *const c_char, length: off64_t) -> c_int {
    let state = State::get();
    let ret = unsafe { (state.real.truncate64)(path, length) };
    if ret == 0 {
        unsafe { state.record_at("truncate64", AT_FDCWD, path) };
    }
    ret
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn rename(oldpath: *const c_char, newpath: *const c_char) -> c_int {
    let state = State::get();
    let ret = unsafe { (state.real.rename)(oldpath, newpath) };
    if ret == 0 {
        unsafe { state.record_renamed("rename", AT_FDCWD, newpath) };
    }
    ret
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn renameat(
    olddirfd: c_int,
    oldpath: *const c_char,
    newdirfd: c_int,
    newpath: *const c_char,
) -> c_int {
    let state = State::get();
    let ret = unsafe { (state.real.renameat)(olddirfd, oldpath, newdirfd, newpath) };
    if ret == 0 {
        unsafe { state.record_renamed("renameat", newdirfd, newpath) };
    }
    ret
}

/// Used by coreutils `mv`
///
/// With `RENAME_EXCHANGE` both paths end up with new content, so both are
/// recorded.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn renameat2(
    olddirfd: c_int,
    oldpath: *const c_char,
    newdirfd: c_int,
    newpath: *const c_char,
    flags: c_uint,
) -> c_int {
    let state = State::get();
    let Some(real) = state.real.renameat2 else {
        unsafe { *libc::__errno_location() = libc::ENOSYS };
        return -1;
    };
    let ret = unsafe { real(olddirfd, oldpath, newdirfd, newpath, flags) };
    if ret == 0 {
        unsafe { state.record_renamed("renameat2", newdirfd, newpath) };
        if flags & (libc::RENAME_EXCHANGE as c_uint) != 0 {
            unsafe { state.record_renamed("renameat2", olddirfd, oldpath) };
        }
    }
    ret
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fopen(path: *const c_char, mode: *const c_char) -> *mut FILE {
    let state = State::get();
    let stream = unsafe { (state.real.fopen)(path, mode) };
    if !stream.is_null() && unsafe { stream_writes(mode) } {
        unsafe { state.record_at("fopen", AT_FDCWD, path) };
    }
    stream
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn fopen64(path: *const c_char, mode: *const c_char) -> *mut FILE {
    let state = State::get();
    let stream = unsafe { (state.real.fopen64)(path, mode) };
    if !stream.is_null() && unsafe { stream_writes(mode) } {
        unsafe { state.record_at("fopen64", AT_FDCWD, path) };
    }
    stream
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn freopen(path: *const c_char, mode: *const c_char, stream: *mut FILE) -> *mut FILE {
    let state = State::get();
    let reopened = unsafe { (state.real.freopen)(path, mode, stream) };
    if !reopened.is_null() && unsafe { stream_writes(mode) } {
        unsafe { state.record_at("freopen", AT_FDCWD, path) };
    }
    reopened
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn freopen64(path: *const c_char, mode: *const c_char, stream: *mut FILE) -> *mut FILE {
    let state = State::get();
    let reopened = unsafe { (state.real.freopen64)(path, mode, stream) };
    if !reopened.is_null() && unsafe { stream_writes(mode) } {
        unsafe { state.record_at("freopen64", AT_FDCWD, path) };
    }
    reopened
}
