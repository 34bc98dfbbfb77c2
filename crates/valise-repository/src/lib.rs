//! Repository pool.
//!
//! A repository is identified by URL (a local directory, or a remote URL
//! whose indexes live in the cache directory). Each repository exposes a
//! published index (`<arch>-repodata`), an optional stage index
//! (`<arch>-stagedata`), and optional signed index metadata. The pool is
//! an ordered list of repositories; lookups return the first satisfying
//! record, and duplicate pkgvers across repositories prefer the earlier
//! one with a push-out warning.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod keys;
mod pool;
mod repo;

pub use keys::{RepoKey, RepoKeys};
pub use pool::Pool;
pub use repo::{index_digest, IdxMeta, RepoLock, Repository, IDX_META_KEY};
