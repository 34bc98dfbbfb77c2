//! Configuration key/value model.
//!
//! Configuration files are `key=value` lines read from every `*.conf`
//! file in the configuration directory, in file-name order. Parsing is
//! deliberately small; the resulting model is what the rest of the
//! workspace consumes.
//!
//! Recognized keys: `repository`, `rootdir`, `cachedir`, `syslog`,
//! `noextract`, `virtualpkg`, `ignorepkg`, `preserved_file`,
//! `architecture`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Metadata directory below the root directory.
pub const METADIR: &str = "var/db/valise";
/// Name of the persisted package database document.
pub const PKGDB_PLIST: &str = "pkgdb-0.38.plist";
/// Name of the repository keys document.
pub const REPOKEYS_PLIST: &str = "repokeys.plist";
/// Default cache directory below the root directory.
pub const CACHEDIR: &str = "var/cache/valise";

/// Resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Root directory all filesystem operations are relative to.
    pub rootdir: PathBuf,
    /// Archive cache directory (absolute, or relative to rootdir).
    pub cachedir: PathBuf,
    /// Ordered repository URLs.
    pub repositories: Vec<String>,
    /// Mirror state events to syslog.
    pub syslog: bool,
    /// Globs of paths to skip during unpack.
    pub noextract: Vec<String>,
    /// Virtual pkgname -> pinned provider pkgver.
    pub virtualpkg: BTreeMap<String, String>,
    /// Packages excluded from automatic transactions.
    pub ignorepkg: BTreeSet<String>,
    /// Paths force-preserved during removal.
    pub preserved_files: Vec<String>,
    /// Target architecture override.
    pub architecture: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rootdir: PathBuf::from("/"),
            cachedir: PathBuf::from(CACHEDIR),
            repositories: Vec::new(),
            syslog: false,
            noextract: Vec::new(),
            virtualpkg: BTreeMap::new(),
            ignorepkg: BTreeSet::new(),
            preserved_files: Vec::new(),
            architecture: None,
        }
    }
}

impl Config {
    /// Load configuration from every `*.conf` file in `confdir`,
    /// in file-name order. A missing directory yields the defaults.
    pub fn load(confdir: &Path) -> Result<Self> {
        let mut config = Self::default();
        let entries = match std::fs::read_dir(confdir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(confdir = %confdir.display(), "no configuration directory");
                return Ok(config);
            }
            Err(err) => return Err(Error::fs(confdir, err)),
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|e| e == "conf"))
            .collect();
        paths.sort();
        for path in paths {
            let text = std::fs::read_to_string(&path).map_err(|e| Error::fs(&path, e))?;
            debug!(file = %path.display(), "reading configuration");
            for (lineno, line) in text.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let Some((key, value)) = line.split_once('=') else {
                    warn!(file = %path.display(), lineno = lineno + 1, "ignoring malformed line");
                    continue;
                };
                config.apply(key.trim(), value.trim());
            }
        }
        Ok(config)
    }

    /// Apply a single key/value pair; unknown keys are ignored with a
    /// warning so newer configurations stay readable.
    pub fn apply(&mut self, key: &str, value: &str) {
        match key {
            "repository" => self.repositories.push(value.to_string()),
            "rootdir" => self.rootdir = PathBuf::from(value),
            "cachedir" => self.cachedir = PathBuf::from(value),
            "syslog" => self.syslog = matches!(value, "true" | "yes" | "1"),
            "noextract" => self.noextract.push(value.to_string()),
            "virtualpkg" => {
                if let Some((virtual_name, provider)) = value.split_once(':') {
                    self.virtualpkg.insert(virtual_name.to_string(), provider.to_string());
                } else {
                    warn!(value, "virtualpkg entry is not '<name>:<pkgver>'");
                }
            }
            "ignorepkg" => {
                self.ignorepkg.insert(value.to_string());
            }
            "preserved_file" => self.preserved_files.push(value.to_string()),
            "architecture" => self.architecture = Some(value.to_string()),
            other => warn!(key = other, "unknown configuration key"),
        }
    }

    /// Effective target architecture: the override, or the build target.
    pub fn target_arch(&self) -> &str {
        self.architecture.as_deref().unwrap_or(std::env::consts::ARCH)
    }

    /// Metadata directory under the root.
    pub fn metadir(&self) -> PathBuf {
        self.rootdir.join(METADIR)
    }

    /// Path of the persisted pkgdb document.
    pub fn pkgdb_path(&self) -> PathBuf {
        self.metadir().join(PKGDB_PLIST)
    }

    /// Path of the repository keys document.
    pub fn repokeys_path(&self) -> PathBuf {
        self.metadir().join(REPOKEYS_PLIST)
    }

    /// Effective cache directory; relative paths root below rootdir.
    pub fn cachedir_path(&self) -> PathBuf {
        if self.cachedir.is_absolute() {
            self.cachedir.clone()
        } else {
            self.rootdir.join(&self.cachedir)
        }
    }
}
