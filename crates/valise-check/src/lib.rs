//! Offline integrity audit.
//!
//! Four independent checks, composable per run: **files** (rehash every
//! non-mutable file against the stored sha256, verify links),
//! **dependencies** (every `run_depends` entry satisfied by an installed
//! package, provides-aware), **alternatives** (symlink arbitration state
//! matches the elected providers), and **pkgdb** (sweep transaction-era
//! keys and self-replaces out of the on-disk document).
//!
//! The bulk scan partitions installed packages across a rayon worker
//! pool; workers only take the read side of the database.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info};
use valise_core::{pattern_match, pattern_name, Config, Error, PackageRecord, PkgState, Result};
use valise_pkgdb::{alternatives, PkgDb, ALTERNATIVES_KEY};
use valise_plist::Value;

/// Which checks to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckSet {
    /// Rehash files, verify links.
    pub files: bool,
    /// Verify run-time dependencies.
    pub dependencies: bool,
    /// Verify alternatives symlinks.
    pub alternatives: bool,
}

impl CheckSet {
    /// Every per-package check.
    pub const fn all() -> Self {
        Self { files: true, dependencies: true, alternatives: true }
    }
}

impl Default for CheckSet {
    fn default() -> Self {
        Self::all()
    }
}

/// One defect found by the audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issue {
    /// A manifest file is missing from disk.
    MissingFile {
        /// Manifest path.
        path: String,
    },
    /// File content does not match the stored hash.
    ModifiedFile {
        /// Manifest path.
        path: String,
        /// Stored sha256.
        expected: String,
        /// Hash found on disk.
        actual: String,
    },
    /// A manifest symlink is missing or points elsewhere.
    WrongLink {
        /// Link path.
        path: String,
        /// Manifest target.
        expected: String,
        /// Target found, if the link exists.
        found: Option<String>,
    },
    /// A run-time dependency is not satisfied by anything installed.
    MissingDependency {
        /// The unsatisfied pattern.
        pattern: String,
    },
    /// An alternatives link disagrees with the elected provider.
    Alternatives {
        /// Rendered description.
        detail: String,
    },
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingFile { path } => write!(f, "missing file: {path}"),
            Self::ModifiedFile { path, .. } => write!(f, "content mismatch: {path}"),
            Self::WrongLink { path, expected, found } => match found {
                Some(found) => {
                    write!(f, "link {path} points at '{found}', expected '{expected}'")
                }
                None => write!(f, "missing link {path} (expected '{expected}')"),
            },
            Self::MissingDependency { pattern } => write!(f, "unsatisfied dependency: {pattern}"),
            Self::Alternatives { detail } => write!(f, "alternatives: {detail}"),
        }
    }
}

/// Audit result for one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Audited package.
    pub pkgver: String,
    /// Defects found, empty when clean.
    pub issues: Vec<Issue>,
}

/// Audit every installed package, in parallel. Only packages with at
/// least one issue appear in the result, sorted by pkgver.
pub fn check_all(db: &PkgDb, config: &Config, checks: CheckSet) -> Vec<Report> {
    let records: Vec<&PackageRecord> = db
        .records()
        .values()
        .filter(|r| matches!(r.state, PkgState::Installed | PkgState::Unpacked))
        .collect();
    debug!(packages = records.len(), "bulk integrity scan");
    let mut reports: Vec<Report> = records
        .par_iter()
        .map(|record| check_package(db, config, record, checks))
        .filter(|report| !report.issues.is_empty())
        .collect();
    reports.sort_by(|a, b| a.pkgver.cmp(&b.pkgver));
    info!(defective = reports.len(), "integrity scan finished");
    reports
}

/// Audit a single package.
pub fn check_package(
    db: &PkgDb,
    config: &Config,
    record: &PackageRecord,
    checks: CheckSet,
) -> Report {
    let mut issues = Vec::new();
    if checks.files {
        check_files(config, record, &mut issues);
    }
    if checks.dependencies {
        check_dependencies(db, record, &mut issues);
    }
    if checks.alternatives && !record.alternatives.is_empty() {
        if let Ok(link_issues) = alternatives::check(db, &record.pkgname) {
            issues.extend(
                link_issues.into_iter().map(|issue| Issue::Alternatives { detail: issue.to_string() }),
            );
        }
    }
    Report { pkgver: record.pkgver.clone(), issues }
}

fn check_files(config: &Config, record: &PackageRecord, issues: &mut Vec<Issue>) {
    for file in record.files.iter().chain(&record.conf_files) {
        let dest = config.rootdir.join(file.path.trim_start_matches('/'));
        if !dest.is_file() {
            issues.push(Issue::MissingFile { path: file.path.clone() });
            continue;
        }
        // Mutable files and user-edited configuration files legitimately
        // drift; only immutable regular files are hash-checked.
        if file.mutable || record.conf_files.iter().any(|c| c.path == file.path) {
            continue;
        }
        match hash_file(&dest) {
            Ok(actual) if actual != file.sha256 => issues.push(Issue::ModifiedFile {
                path: file.path.clone(),
                expected: file.sha256.clone(),
                actual,
            }),
            _ => {}
        }
    }
    for link in &record.links {
        let dest = config.rootdir.join(link.path.trim_start_matches('/'));
        match std::fs::read_link(&dest) {
            Ok(target) => {
                let found = target.to_string_lossy().into_owned();
                if found != link.target {
                    issues.push(Issue::WrongLink {
                        path: link.path.clone(),
                        expected: link.target.clone(),
                        found: Some(found),
                    });
                }
            }
            Err(_) => issues.push(Issue::WrongLink {
                path: link.path.clone(),
                expected: link.target.clone(),
                found: None,
            }),
        }
    }
}

fn check_dependencies(db: &PkgDb, record: &PackageRecord, issues: &mut Vec<Issue>) {
    for pattern in &record.run_depends {
        let satisfied = db.records().values().any(|candidate| {
            matches!(candidate.state, PkgState::Installed | PkgState::Unpacked)
                && (pattern_match(&candidate.pkgver, pattern)
                    || candidate.provides_match(pattern))
        });
        if !satisfied {
            issues.push(Issue::MissingDependency { pattern: pattern.clone() });
        }
    }
}

fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| Error::fs(path, e))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).map_err(|e| Error::fs(path, e))?;
    Ok(hex::encode(hasher.finalize()))
}

/// Keys that are only meaningful while a transaction is in flight.
const TRANSIENT_KEYS: &[&str] = &["transaction", "download", "remove-and-update", "skip-obsoletes"];

/// Sweep transaction-era keys out of a raw pkgdb document: drop the
/// transient keys, rename `repository-origin` to `repository`, and
/// remove `replaces` entries matching the record's own name. Returns
/// the number of records touched.
pub fn pkgdb_cleanup(doc: &mut Value) -> usize {
    let Some(map) = doc.as_map_mut() else { return 0 };
    let mut touched = 0;
    for (pkgname, record) in map.iter_mut() {
        if pkgname == ALTERNATIVES_KEY {
            continue;
        }
        let mut changed = false;
        for key in TRANSIENT_KEYS {
            changed |= record.remove(key).is_some();
        }
        if let Some(origin) = record.remove("repository-origin") {
            record.insert("repository", origin);
            changed = true;
        }
        if let Some(replaces) = record.get("replaces").and_then(Value::as_seq) {
            let kept: Vec<Value> = replaces
                .iter()
                .filter(|v| {
                    v.as_str()
                        .and_then(pattern_name)
                        .map_or(true, |name| name != *pkgname)
                })
                .cloned()
                .collect();
            if kept.len() != replaces.len() {
                if kept.is_empty() {
                    record.remove("replaces");
                } else {
                    record.insert("replaces", Value::Seq(kept));
                }
                changed = true;
            }
        }
        if changed {
            touched += 1;
        }
    }
    touched
}

/// Run [`pkgdb_cleanup`] against the on-disk pkgdb document, rewriting
/// it only when something changed.
pub fn clean_pkgdb_file(config: &Config) -> Result<usize> {
    let path = config.pkgdb_path();
    if !path.exists() {
        return Ok(0);
    }
    let mut doc = valise_plist::internalize(&path)?;
    let touched = pkgdb_cleanup(&mut doc);
    if touched > 0 {
        valise_plist::externalize(&doc, &path)?;
        info!(records = touched, "pkgdb cleaned");
    }
    Ok(touched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use valise_core::FileEntry;

    fn world() -> (tempfile::TempDir, Config, PkgDb) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config { rootdir: dir.path().to_path_buf(), ..Config::default() };
        let db = PkgDb::open_at(&config.pkgdb_path(), &config.rootdir).unwrap();
        (dir, config, db)
    }

    fn installed_with_file(
        db: &mut PkgDb,
        dir: &Path,
        pkgver: &str,
        path: &str,
        content: &[u8],
    ) {
        let dest = dir.join(path.trim_start_matches('/'));
        std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
        std::fs::write(&dest, content).unwrap();
        let mut record = PackageRecord::from_pkgver(pkgver).unwrap();
        record.state = PkgState::Installed;
        record.files.push(FileEntry {
            path: path.to_string(),
            sha256: hex::encode(Sha256::digest(content)),
            size: content.len() as u64,
            mutable: false,
        });
        db.put(record).unwrap();
    }

    #[test]
    fn clean_package_has_no_issues() {
        let (dir, config, mut db) = world();
        installed_with_file(&mut db, dir.path(), "demo-1.0_1", "/usr/bin/demo", b"payload");
        assert!(check_all(&db, &config, CheckSet::all()).is_empty());
    }

    #[test]
    fn modified_and_missing_files_are_reported() {
        let (dir, config, mut db) = world();
        installed_with_file(&mut db, dir.path(), "demo-1.0_1", "/usr/bin/demo", b"payload");
        std::fs::write(dir.path().join("usr/bin/demo"), b"tampered").unwrap();
        installed_with_file(&mut db, dir.path(), "other-1.0_1", "/usr/bin/other", b"x");
        std::fs::remove_file(dir.path().join("usr/bin/other")).unwrap();

        let reports = check_all(&db, &config, CheckSet::all());
        assert_eq!(reports.len(), 2);
        assert!(matches!(reports[0].issues[0], Issue::ModifiedFile { .. }));
        assert!(matches!(reports[1].issues[0], Issue::MissingFile { .. }));
    }

    #[test]
    fn missing_dependencies_are_reported() {
        let (_dir, config, mut db) = world();
        let mut record = PackageRecord::from_pkgver("app-1.0_1").unwrap();
        record.state = PkgState::Installed;
        record.run_depends = vec!["libgone>=1.0".into()];
        db.put(record).unwrap();

        let reports = check_all(&db, &config, CheckSet::all());
        assert_eq!(reports.len(), 1);
        assert_eq!(
            reports[0].issues,
            vec![Issue::MissingDependency { pattern: "libgone>=1.0".into() }]
        );
    }

    #[test]
    fn dependency_satisfied_through_provides() {
        let (_dir, config, mut db) = world();
        let mut provider = PackageRecord::from_pkgver("gawk-5.0_1").unwrap();
        provider.state = PkgState::Installed;
        provider.provides = vec!["awk-0_1".into()];
        db.put(provider).unwrap();
        let mut consumer = PackageRecord::from_pkgver("app-1.0_1").unwrap();
        consumer.state = PkgState::Installed;
        consumer.run_depends = vec!["awk>=0".into()];
        db.put(consumer).unwrap();

        assert!(check_all(&db, &config, CheckSet::all()).is_empty());
    }

    #[test]
    fn cleanup_sweeps_transaction_keys() {
        let mut record = Value::map();
        record.insert("pkgver", Value::from("demo-1.0_1"));
        record.insert("transaction", Value::from("install"));
        record.insert("download", Value::from(true));
        record.insert("repository-origin", Value::from("file:/repo"));
        record.insert(
            "replaces",
            Value::str_seq(["demo>=0", "olddemo>=0"]),
        );
        let mut doc = Value::map();
        doc.insert("demo", record);

        assert_eq!(pkgdb_cleanup(&mut doc), 1);
        let cleaned = doc.get("demo").unwrap();
        assert_eq!(cleaned.get("transaction"), None);
        assert_eq!(cleaned.get("download"), None);
        assert_eq!(cleaned.get_str("repository"), Some("file:/repo"));
        assert_eq!(cleaned.get_str_seq("replaces"), vec!["olddemo>=0".to_string()]);
        // A second pass finds nothing left to do.
        assert_eq!(pkgdb_cleanup(&mut doc), 0);
    }
}
