//! The package database (pkgdb).
//!
//! The pkgdb is a single structured document mapping pkgname to package
//! record, plus the `_XBPS_ALTERNATIVES_` mapping of alternatives groups
//! to their ordered provider lists. It is persisted under
//! `<rootdir>/<metadir>/pkgdb-0.38.plist` and atomically rewritten on
//! flush. Writers hold an exclusive advisory file lock for the whole
//! load -> mutate -> flush sequence; readers tolerate a slightly stale
//! view.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod alternatives;
mod db;

pub use db::{PkgDb, ALTERNATIVES_KEY};
