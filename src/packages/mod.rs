// src/packages/mod.rs

//! Logged packages and the files they own
//!
//! A package is one log file in the log directory. Its header is read
//! eagerly; its file list only when something asks for it.

pub mod file;
pub mod package;

pub use file::PackageFile;
pub use package::{Package, PackageHeader, SortKey, split_name};
