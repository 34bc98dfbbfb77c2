//! Error types for Valise operations.
//!
//! One shared taxonomy is used across the workspace; leaf crates translate
//! their internal failures into these variants at their public boundary.
//! Every variant carries the context payload (pkgver, path, or pattern)
//! needed for a one-line user-visible summary, and maps to a stable
//! process exit code.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Valise.
#[derive(Error, Debug)]
pub enum Error {
    /// Package name or pattern does not resolve to any record.
    #[error("package '{target}' not found")]
    NotFound {
        /// The name, pattern, or path that failed to resolve.
        target: String,
    },

    /// A version constraint cannot be satisfied.
    #[error("no version of '{pkgname}' satisfies '{pattern}'")]
    VersionConflict {
        /// Package name.
        pkgname: String,
        /// Offending pattern.
        pattern: String,
    },

    /// A dependency could not be expanded.
    #[error("'{pkgver}' requires '{pattern}' which cannot be resolved")]
    DependencyUnsatisfied {
        /// Package whose dependency failed.
        pkgver: String,
        /// Unresolvable dependency pattern.
        pattern: String,
    },

    /// Two packages conflict in the target set.
    #[error("'{pkgver}' conflicts with '{conflicting}'")]
    Conflict {
        /// Package declaring the conflict.
        pkgver: String,
        /// Package matched by the conflict pattern.
        conflicting: String,
    },

    /// The planner required updating a held package.
    #[error("'{pkgver}' is on hold and cannot be updated")]
    Held {
        /// Held package.
        pkgver: String,
    },

    /// Extracted file content disagrees with the manifest.
    #[error("hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        /// File path.
        path: PathBuf,
        /// Manifest sha256.
        expected: String,
        /// Computed sha256.
        actual: String,
    },

    /// Index or archive signature fails verification.
    #[error("signature verification failed for '{target}'")]
    SignatureInvalid {
        /// What was being verified.
        target: String,
    },

    /// A pre/post install/remove hook exited non-zero.
    #[error("hook '{phase}' for '{pkgver}' failed with status {status}")]
    HookFailed {
        /// Package whose hook failed.
        pkgver: String,
        /// Hook phase (`pre`, `post`, `purge`).
        phase: String,
        /// Exit status.
        status: i32,
        /// Captured stdout/stderr.
        output: String,
    },

    /// The pkgdb on disk cannot be parsed or fails its invariants.
    #[error("package database inconsistent: {message}")]
    StateInconsistent {
        /// Description of the violated invariant.
        message: String,
    },

    /// Another process holds the pkgdb lock beyond the backoff.
    #[error("database {path} is locked by another process")]
    LockBusy {
        /// Locked file.
        path: PathBuf,
    },

    /// Underlying filesystem operation failed.
    #[error("{path}: {source}")]
    Fs {
        /// Path involved.
        path: PathBuf,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// A structured document or archive member is malformed.
    #[error("malformed {context}: {message}")]
    Parse {
        /// What was being parsed.
        context: String,
        /// Parse failure detail.
        message: String,
    },

    /// The SAT engine found no correcting subset.
    #[error("published indexes are inconsistent; {} clauses in the unsatisfiable core", core.len())]
    Unsatisfiable {
        /// Human-readable labels of the unsatisfiable core.
        core: Vec<String>,
    },
}

impl Error {
    /// Create a filesystem error with path context.
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Fs { path: path.into(), source }
    }

    /// Create a not-found error.
    pub fn not_found(target: impl Into<String>) -> Self {
        Self::NotFound { target: target.into() }
    }

    /// Create a parse error with context.
    pub fn parse(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse { context: context.into(), message: message.into() }
    }

    /// Process exit code for this error; the mapping is 1:1 and stable.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NotFound { .. } => 2,
            Self::VersionConflict { .. } => 3,
            Self::DependencyUnsatisfied { .. } => 4,
            Self::Conflict { .. } => 5,
            Self::Held { .. } => 6,
            Self::HashMismatch { .. } => 7,
            Self::SignatureInvalid { .. } => 8,
            Self::HookFailed { .. } => 9,
            Self::StateInconsistent { .. } => 10,
            Self::LockBusy { .. } => 11,
            Self::Fs { .. } => 12,
            Self::Parse { .. } => 13,
            Self::Unsatisfiable { .. } => 14,
        }
    }
}

/// Result type for Valise operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let err = Error::Held { pkgver: "A-1.0_1".into() };
        assert!(err.to_string().contains("A-1.0_1"));
        assert_eq!(err.exit_code(), 6);

        let err = Error::fs("/some/path", std::io::Error::other("boom"));
        assert!(err.to_string().contains("/some/path"));
    }

    #[test]
    fn exit_codes_are_distinct() {
        let errs = [
            Error::not_found("x"),
            Error::Held { pkgver: "x".into() },
            Error::LockBusy { path: "/db".into() },
            Error::parse("pkgdb", "bad"),
        ];
        let mut codes: Vec<i32> = errs.iter().map(Error::exit_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errs.len());
    }
}
