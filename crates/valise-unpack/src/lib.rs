//! Transaction commit: streaming archive extraction, configuration-file
//! handling, obsolete-file pruning, hooks, removal, and configuration.
//!
//! Entries are applied in the order the planner produced; the pkgdb is
//! flushed after each entry's configure step succeeds, so an interrupted
//! transaction always leaves a consistent prefix: every record in
//! `installed` state corresponds to files on disk.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod commit;
mod configure;
mod extract;
mod hooks;
mod remove;

pub use commit::{commit, CommitFlags};
pub use configure::{configure, configure_all};
pub use hooks::{run_hook, HookPhase};
pub use remove::remove_package;

use sha2::{Digest, Sha256};
use std::path::Path;
use valise_core::{Error, Result};

/// SHA-256 of a file's content as lowercase hex.
pub(crate) fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| Error::fs(path, e))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|e| Error::fs(path, e))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Absolute on-disk location of a manifest path below the root.
pub(crate) fn rooted(rootdir: &Path, path: &str) -> std::path::PathBuf {
    rootdir.join(path.trim_start_matches('/'))
}
