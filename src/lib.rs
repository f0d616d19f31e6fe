// src/lib.rs

//! pkglog: a package tracker for software installed from source
//!
//! Runs an install command with an interception library preloaded, records
//! every file the command wrote, and keeps one plain-text log per package
//! so the package can later be listed, queried and removed.
//!
//! # Architecture
//!
//! - Plain-text database: one log file per package, no index
//! - Interception: a separate `cdylib` (`pkglog-shim`) loaded via `LD_PRELOAD`
//! - Lazy bodies: package headers are read eagerly, file lists on demand
//! - Safe removal: files shared with another logged package are kept

pub mod config;
pub mod db;
mod error;
pub mod install;
pub mod output;
pub mod packages;
pub mod paths;

pub use error::{Error, Result};
