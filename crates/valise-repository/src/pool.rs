//! The ordered repository pool.

use crate::repo::Repository;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};
use valise_core::{pattern_match, pattern_name, Config, PackageRecord, Result};

/// Ordered list of repositories for one target architecture.
#[derive(Debug, Default)]
pub struct Pool {
    repositories: Vec<Repository>,
    arch: String,
}

impl Pool {
    /// Open every configured repository, in order. Remote URLs resolve
    /// to their cache directory; missing indexes yield empty
    /// repositories rather than errors.
    pub fn open(config: &Config) -> Result<Self> {
        let arch = config.target_arch().to_string();
        let mut pool = Self { repositories: Vec::new(), arch: arch.clone() };
        for url in &config.repositories {
            let root = Self::local_root(config, url);
            let repo = Repository::open(url, &root, &arch)?;
            pool.push(repo);
        }
        debug!(repositories = pool.repositories.len(), arch = %arch, "pool opened");
        Ok(pool)
    }

    /// Where a repository's documents live on the local filesystem:
    /// remote URLs are served from the cache directory.
    fn local_root(config: &Config, url: &str) -> PathBuf {
        if url.contains("://") {
            let sanitized: String = url
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '_' })
                .collect();
            config.cachedir_path().join("repodata").join(sanitized)
        } else {
            PathBuf::from(url)
        }
    }

    /// Create a pool from prebuilt repositories (ordered).
    pub fn from_repositories(arch: &str, repositories: Vec<Repository>) -> Self {
        let mut pool = Self { repositories: Vec::new(), arch: arch.to_string() };
        for repo in repositories {
            pool.push(repo);
        }
        pool
    }

    fn push(&mut self, repo: Repository) {
        // Duplicate pkgvers across repositories: earlier position wins.
        for (pkgname, record) in &repo.idx {
            for earlier in &self.repositories {
                if let Some(existing) = earlier.idx.get(pkgname) {
                    if existing.pkgver == record.pkgver {
                        warn!(
                            pkgver = %record.pkgver,
                            winner = %earlier.url,
                            loser = %repo.url,
                            "'{}' from '{}' pushes out the copy in '{}'",
                            existing.pkgver,
                            earlier.url,
                            repo.url
                        );
                    }
                }
            }
        }
        self.repositories.push(repo);
    }

    /// Target architecture of this pool.
    pub fn arch(&self) -> &str {
        &self.arch
    }

    /// The repositories in pool order.
    pub fn repositories(&self) -> &[Repository] {
        &self.repositories
    }

    /// Find the first repository record satisfying `target` by real
    /// name: exact pkgname, then exact pkgver, then pattern match.
    pub fn best_match(&self, target: &str) -> Option<(&Repository, &PackageRecord)> {
        for repo in &self.repositories {
            if let Some(record) = repo.idx.get(target) {
                return Some((repo, record));
            }
            if let Some(name) = pattern_name(target) {
                if let Some(record) = repo.idx.get(&name) {
                    if pattern_match(&record.pkgver, target) || record.pkgver == target {
                        return Some((repo, record));
                    }
                }
            }
        }
        None
    }

    /// Find the first record whose `provides` satisfies `target`.
    ///
    /// Candidates are enumerated in pkgname order within each
    /// repository so the choice is deterministic.
    pub fn best_virtual(&self, target: &str) -> Option<(&Repository, &PackageRecord)> {
        for repo in &self.repositories {
            if let Some(record) = repo.idx.values().find(|r| r.provides_match(target)) {
                return Some((repo, record));
            }
        }
        None
    }

    /// Virtual providers of `target` across the pool, deterministic
    /// (pool position, then pkgname ASCII order).
    pub fn virtual_providers(&self, target: &str) -> Vec<(&Repository, &PackageRecord)> {
        let mut out = Vec::new();
        for repo in &self.repositories {
            for record in repo.idx.values() {
                if record.provides_match(target) {
                    out.push((repo, record));
                }
            }
        }
        out
    }

    /// Merge view of all package names across the pool (first
    /// occurrence wins), used for update-all seeding.
    pub fn merged_index(&self) -> BTreeMap<&str, (&Repository, &PackageRecord)> {
        let mut merged = BTreeMap::new();
        for repo in &self.repositories {
            for (pkgname, record) in &repo.idx {
                merged.entry(pkgname.as_str()).or_insert((repo, record));
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(pkgver: &str) -> PackageRecord {
        PackageRecord::from_pkgver(pkgver).unwrap()
    }

    fn pool() -> Pool {
        let mut gawk = record("gawk-5.0_1");
        gawk.provides = vec!["awk-0_1".into()];
        let first = Repository::in_memory("file:/a", [gawk, record("sed-4.9_1")]);
        let mut busybox = record("busybox-1.36_1");
        busybox.provides = vec!["awk-0_1".into(), "sed-0_1".into()];
        let second =
            Repository::in_memory("file:/b", [busybox, record("sed-4.9_1"), record("jq-1.7_1")]);
        Pool::from_repositories("x86_64", vec![first, second])
    }

    #[test]
    fn first_repository_wins() {
        let pool = pool();
        let (repo, rec) = pool.best_match("sed").unwrap();
        assert_eq!(repo.url, "file:/a");
        assert_eq!(rec.pkgver, "sed-4.9_1");
        let (repo, _) = pool.best_match("jq").unwrap();
        assert_eq!(repo.url, "file:/b");
    }

    #[test]
    fn pattern_and_virtual_lookup() {
        let pool = pool();
        assert_eq!(pool.best_match("gawk>=5.0").unwrap().1.pkgver, "gawk-5.0_1");
        assert!(pool.best_match("gawk>=6.0").is_none());
        assert_eq!(pool.best_virtual("awk>=0").unwrap().1.pkgname, "gawk");
        let providers = pool.virtual_providers("awk>=0");
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0].1.pkgname, "gawk");
        assert_eq!(providers[1].1.pkgname, "busybox");
    }

    #[test]
    fn merged_index_prefers_pool_order() {
        let pool = pool();
        let merged = pool.merged_index();
        assert_eq!(merged.len(), 4);
        assert_eq!(merged["sed"].0.url, "file:/a");
    }
}
