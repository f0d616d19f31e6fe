// shim/src/lib.rs

//! Interception library for pkglog
//!
//! Loaded into an install command with `LD_PRELOAD`. Every successful call
//! that creates or writes a file appends the absolute path of that file to
//! the file named by `PKGLOG_TMPFILE`, one path per line. pkglog reads that
//! file back once the command is done.
//!
//! The hooks are not compiled into the unit test harness, which would
//! otherwise interpose on itself.

#![cfg_attr(test, allow(dead_code))]

#[cfg(not(test))]
mod hooks;
mod paths;
mod state;
mod walk;
