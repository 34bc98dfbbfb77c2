//! The package record model.
//!
//! A [`PackageRecord`] is the central entity shared by the pkgdb, the
//! repository indexes, and the transaction planner. Relationships between
//! records are stored as names and pkgver strings, never as references;
//! all traversal goes through the owning map.

use crate::error::{Error, Result};
use crate::version::{pkg_name, pkg_version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Per-package installation state machine.
///
/// Valid transitions: `not-installed -> unpacked -> installed`,
/// `installed -> config-files` (removal keeping configs),
/// `installed -> not-installed` (purge), and `unpacked -> broken`
/// (hook failure, terminal).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PkgState {
    /// No trace on disk.
    #[default]
    NotInstalled,
    /// Files extracted, post-install hook not yet run.
    Unpacked,
    /// Fully installed and configured.
    Installed,
    /// Removed, configuration files kept.
    ConfigFiles,
    /// Post-install hook failed; operator intervention required.
    Broken,
}

impl PkgState {
    /// On-disk string for this state.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotInstalled => "not-installed",
            Self::Unpacked => "unpacked",
            Self::Installed => "installed",
            Self::ConfigFiles => "config-files",
            Self::Broken => "broken",
        }
    }

    /// Parse an on-disk state string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not-installed" => Some(Self::NotInstalled),
            "unpacked" => Some(Self::Unpacked),
            "installed" => Some(Self::Installed),
            "config-files" => Some(Self::ConfigFiles),
            "broken" => Some(Self::Broken),
            _ => None,
        }
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_transition(self, next: Self) -> bool {
        use PkgState::{Broken, ConfigFiles, Installed, NotInstalled, Unpacked};
        matches!(
            (self, next),
            (NotInstalled | ConfigFiles, Unpacked)
                | (Unpacked, Installed | Broken)
                | (Installed, ConfigFiles | NotInstalled | Unpacked)
                | (ConfigFiles, NotInstalled)
        )
    }
}

impl fmt::Display for PkgState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A regular file owned by a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Path relative to the root directory, starting with `/`.
    pub path: String,
    /// SHA-256 of the file content, lowercase hex.
    pub sha256: String,
    /// Size in bytes.
    pub size: u64,
    /// Mutable files are exempt from hash verification.
    #[serde(default)]
    pub mutable: bool,
}

/// A symbolic link owned by a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    /// Link path relative to the root directory.
    pub path: String,
    /// Link target as stored in the manifest.
    pub target: String,
}

/// The canonical package record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PackageRecord {
    /// Unique package name within an index scope.
    pub pkgname: String,
    /// Canonical `<pkgname>-<version>_<revision>`.
    pub pkgver: String,
    /// Architecture label; `noarch` matches any target.
    pub architecture: String,
    /// Installation state.
    #[serde(default)]
    pub state: PkgState,
    /// Pulled in as a dependency rather than requested.
    #[serde(default)]
    pub automatic_install: bool,
    /// Suppresses automatic upgrades.
    #[serde(default)]
    pub hold: bool,
    /// Pins the originating repository.
    #[serde(default)]
    pub repolock: bool,
    /// Never remove files on purge.
    #[serde(default)]
    pub preserve: bool,
    /// Dependency patterns.
    #[serde(default)]
    pub run_depends: Vec<String>,
    /// Virtual pkgvers provided (explicit versions, not patterns).
    #[serde(default)]
    pub provides: Vec<String>,
    /// Patterns matched against other installed packages at plan time.
    #[serde(default)]
    pub replaces: Vec<String>,
    /// Concrete `version_revision` strings this package may supersede
    /// even though its own version compares lower.
    #[serde(default)]
    pub reverts: Vec<String>,
    /// Patterns that must not match anything else in the target set.
    #[serde(default)]
    pub conflicts: Vec<String>,
    /// Shared-library sonames exported.
    #[serde(default)]
    pub shlib_provides: Vec<String>,
    /// Shared-library sonames required.
    #[serde(default)]
    pub shlib_requires: Vec<String>,
    /// Alternatives group -> `name:linkpath:target` triplets.
    #[serde(default)]
    pub alternatives: BTreeMap<String, Vec<String>>,
    /// pkgvers of packages currently depending on this one; maintained
    /// by the pkgdb as an index.
    #[serde(default)]
    pub requiredby: Vec<String>,
    /// Regular files.
    #[serde(default)]
    pub files: Vec<FileEntry>,
    /// User-editable files (disjoint from `files`).
    #[serde(default)]
    pub conf_files: Vec<FileEntry>,
    /// Symbolic links.
    #[serde(default)]
    pub links: Vec<LinkEntry>,
    /// Directories owned (may be shared between packages).
    #[serde(default)]
    pub dirs: Vec<String>,
    /// Originating repository URL, when known.
    #[serde(default)]
    pub repository: Option<String>,
    /// Unpacked size in bytes.
    #[serde(default)]
    pub installed_size: u64,
    /// Compressed archive size in bytes, from the repository index.
    #[serde(default)]
    pub filename_size: u64,
    /// One-line description.
    #[serde(default)]
    pub short_desc: String,
}

impl PackageRecord {
    /// Create a minimal record from a `pkgver` string.
    pub fn from_pkgver(pkgver: &str) -> Result<Self> {
        let pkgname = pkg_name(pkgver)
            .ok_or_else(|| Error::parse("pkgver", format!("'{pkgver}' has no version")))?;
        Ok(Self {
            pkgname: pkgname.to_string(),
            pkgver: pkgver.to_string(),
            architecture: crate::ARCH_NOARCH.to_string(),
            ..Self::default()
        })
    }

    /// The `version_revision` part of this record's pkgver.
    pub fn version(&self) -> &str {
        pkg_version(&self.pkgver).unwrap_or("")
    }

    /// Validate the naming and file-set invariants.
    ///
    /// `pkgname` must parse from `pkgver`, and every path must appear in
    /// exactly one of `files`/`conf_files`/`links`.
    pub fn validate(&self) -> Result<()> {
        match pkg_name(&self.pkgver) {
            Some(name) if name == self.pkgname => {}
            _ => {
                return Err(Error::StateInconsistent {
                    message: format!(
                        "pkgver '{}' does not derive pkgname '{}'",
                        self.pkgver, self.pkgname
                    ),
                });
            }
        }
        let mut seen = std::collections::BTreeSet::new();
        let paths = self
            .files
            .iter()
            .chain(&self.conf_files)
            .map(|f| f.path.as_str())
            .chain(self.links.iter().map(|l| l.path.as_str()));
        for path in paths {
            if !seen.insert(path) {
                return Err(Error::StateInconsistent {
                    message: format!("'{}' owns path '{path}' more than once", self.pkgver),
                });
            }
        }
        Ok(())
    }

    /// Whether this record matches `target` architecture (or is noarch).
    pub fn matches_arch(&self, target: &str) -> bool {
        self.architecture == target || self.architecture == crate::ARCH_NOARCH
    }

    /// Whether any `provides` entry matches the given pattern or name.
    pub fn provides_match(&self, pattern: &str) -> bool {
        self.provides.iter().any(|v| {
            crate::pattern::pattern_match(v, pattern)
                || pkg_name(v).is_some_and(|n| n == pattern)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn state_roundtrip() {
        for state in [
            PkgState::NotInstalled,
            PkgState::Unpacked,
            PkgState::Installed,
            PkgState::ConfigFiles,
            PkgState::Broken,
        ] {
            assert_eq!(PkgState::parse(state.as_str()), Some(state));
        }
        assert_eq!(PkgState::parse("half-installed"), None);
    }

    #[test]
    fn state_transitions() {
        assert!(PkgState::NotInstalled.can_transition(PkgState::Unpacked));
        assert!(PkgState::Unpacked.can_transition(PkgState::Installed));
        assert!(PkgState::Unpacked.can_transition(PkgState::Broken));
        assert!(PkgState::Installed.can_transition(PkgState::ConfigFiles));
        assert!(PkgState::Installed.can_transition(PkgState::NotInstalled));
        assert!(!PkgState::NotInstalled.can_transition(PkgState::Installed));
        assert!(!PkgState::Broken.can_transition(PkgState::Installed));
    }

    #[test]
    fn record_validation() {
        let mut rec = PackageRecord::from_pkgver("foo-1.0_1").unwrap();
        assert_eq!(rec.pkgname, "foo");
        assert_eq!(rec.version(), "1.0_1");
        rec.validate().unwrap();

        rec.files.push(FileEntry {
            path: "/usr/bin/foo".into(),
            sha256: String::new(),
            size: 0,
            mutable: false,
        });
        rec.links.push(LinkEntry { path: "/usr/bin/foo".into(), target: "bar".into() });
        assert!(rec.validate().is_err());
    }

    #[test]
    fn provides_matching() {
        let mut rec = PackageRecord::from_pkgver("awk-5.0_1").unwrap();
        rec.provides.push("virtual-awk-1.0_1".into());
        assert!(rec.provides_match("virtual-awk>=1.0"));
        assert!(rec.provides_match("virtual-awk"));
        assert!(!rec.provides_match("virtual-sed"));
    }
}
