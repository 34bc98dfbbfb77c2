//! Core types and utilities for the Valise package manager.
//!
//! This crate provides the foundational types used throughout Valise:
//! - Package version ordering and dependency pattern matching
//! - The package record model shared by the pkgdb and repository indexes
//! - The configuration key/value model
//! - The event sink used for progress and state reporting
//! - Error types

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
mod event;
mod pattern;
mod pkg;
mod version;

pub use config::Config;
pub use error::{Error, Result};
pub use event::{Event, EventSink, FnSink, NoopSink};
pub use pattern::{glob_match, pattern_match, pattern_name};
pub use pkg::{FileEntry, LinkEntry, PackageRecord, PkgState};
pub use version::{compare_pkgver, compare_versions, pkg_name, pkg_revision, pkg_version};

/// Architecture label matching any target architecture.
pub const ARCH_NOARCH: &str = "noarch";
