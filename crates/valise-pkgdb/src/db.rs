//! The persistent package database.

use fs2::FileExt;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace, warn};
use valise_core::{
    pattern_match, pattern_name, pkg_name, Config, Error, PackageRecord, PkgState, Result,
};
use valise_plist::{pkg_from_value, pkg_to_value, Value};

/// Reserved pkgdb key holding the alternatives group lists.
pub const ALTERNATIVES_KEY: &str = "_XBPS_ALTERNATIVES_";

/// Lock acquisition backoff: attempts * interval bounds the wait.
const LOCK_ATTEMPTS: u32 = 20;
const LOCK_INTERVAL: Duration = Duration::from_millis(250);

/// The package database.
#[derive(Debug)]
pub struct PkgDb {
    path: PathBuf,
    rootdir: PathBuf,
    packages: BTreeMap<String, PackageRecord>,
    /// Group name -> ordered provider pkgnames; head is elected.
    alternatives: BTreeMap<String, Vec<String>>,
    lock: Option<File>,
}

impl PkgDb {
    /// Open the pkgdb for the given configuration. A missing database
    /// file yields an empty database.
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_at(&config.pkgdb_path(), &config.rootdir)
    }

    /// Open the pkgdb document at an explicit path.
    pub fn open_at(path: &Path, rootdir: &Path) -> Result<Self> {
        let mut db = Self {
            path: path.to_path_buf(),
            rootdir: rootdir.to_path_buf(),
            packages: BTreeMap::new(),
            alternatives: BTreeMap::new(),
            lock: None,
        };
        if !path.exists() {
            debug!(path = %path.display(), "no pkgdb on disk, starting empty");
            return Ok(db);
        }
        let doc = valise_plist::internalize(path)?;
        let map = doc.as_map().ok_or_else(|| Error::StateInconsistent {
            message: "pkgdb root is not a mapping".into(),
        })?;
        for (key, value) in map {
            if key == ALTERNATIVES_KEY {
                if let Some(groups) = value.as_map() {
                    for (group, providers) in groups {
                        db.alternatives.insert(
                            group.clone(),
                            providers
                                .as_seq()
                                .unwrap_or_default()
                                .iter()
                                .filter_map(|v| v.as_str().map(str::to_string))
                                .collect(),
                        );
                    }
                }
                continue;
            }
            let record = pkg_from_value(value)?;
            if record.pkgname != *key {
                return Err(Error::StateInconsistent {
                    message: format!("pkgdb key '{key}' holds record for '{}'", record.pkgname),
                });
            }
            record.validate()?;
            db.packages.insert(key.clone(), record);
        }
        debug!(path = %path.display(), packages = db.packages.len(), "pkgdb loaded");
        Ok(db)
    }

    /// Root directory this database describes.
    pub fn rootdir(&self) -> &Path {
        &self.rootdir
    }

    /// Path of the persisted document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the exclusive pkgdb lock, waiting up to the backoff
    /// bound. Returns [`Error::LockBusy`] on sustained contention.
    pub fn lock(&mut self) -> Result<()> {
        if self.lock.is_some() {
            return Ok(());
        }
        let lock_path = self.path.with_extension("plist.lock");
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::fs(parent, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .map_err(|e| Error::fs(&lock_path, e))?;
        for attempt in 0..LOCK_ATTEMPTS {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    trace!(path = %lock_path.display(), attempt, "pkgdb locked");
                    self.lock = Some(file);
                    return Ok(());
                }
                Err(_) => std::thread::sleep(LOCK_INTERVAL),
            }
        }
        Err(Error::LockBusy { path: self.path.clone() })
    }

    /// Release the pkgdb lock, if held.
    pub fn unlock(&mut self) {
        if let Some(file) = self.lock.take() {
            let _ = FileExt::unlock(&file);
            trace!("pkgdb unlocked");
        }
    }

    /// All records, keyed by pkgname.
    pub fn records(&self) -> &BTreeMap<String, PackageRecord> {
        &self.packages
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Whether the database holds no records.
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Alternatives group lists.
    pub fn alternatives_groups(&self) -> &BTreeMap<String, Vec<String>> {
        &self.alternatives
    }

    pub(crate) fn alternatives_groups_mut(&mut self) -> &mut BTreeMap<String, Vec<String>> {
        &mut self.alternatives
    }

    /// Look up an installed package by exact name, then by pattern,
    /// then through the `provides` arrays.
    pub fn get(&self, target: &str) -> Option<&PackageRecord> {
        if let Some(record) = self.packages.get(target) {
            return Some(record);
        }
        if let Some(name) = pattern_name(target) {
            if let Some(record) = self.packages.get(&name) {
                if pattern_match(&record.pkgver, target) {
                    return Some(record);
                }
            }
        }
        // Exact pkgver form ("foo-1.0_1") resolves through the name.
        if let Some(name) = pkg_name(target) {
            if let Some(record) = self.packages.get(name) {
                if record.pkgver == target {
                    return Some(record);
                }
            }
        }
        self.get_virtualpkg(target)
    }

    /// Look up a package through its `provides` array only.
    pub fn get_virtualpkg(&self, target: &str) -> Option<&PackageRecord> {
        self.packages.values().find(|record| record.provides_match(target))
    }

    /// Mutable record access by exact name.
    pub fn get_mut(&mut self, pkgname: &str) -> Option<&mut PackageRecord> {
        self.packages.get_mut(pkgname)
    }

    /// Insert or replace a record; enforces the record invariants.
    pub fn put(&mut self, record: PackageRecord) -> Result<()> {
        record.validate()?;
        trace!(pkgver = %record.pkgver, state = %record.state, "pkgdb put");
        self.packages.insert(record.pkgname.clone(), record);
        Ok(())
    }

    /// Remove a record, returning it.
    pub fn remove(&mut self, pkgname: &str) -> Option<PackageRecord> {
        trace!(pkgname, "pkgdb remove");
        self.packages.remove(pkgname)
    }

    /// Transition a package to `next` state, enforcing the state DAG.
    pub fn set_state(&mut self, pkgname: &str, next: PkgState) -> Result<()> {
        let record = self.packages.get_mut(pkgname).ok_or_else(|| Error::not_found(pkgname))?;
        if record.state == next {
            return Ok(());
        }
        if !record.state.can_transition(next) {
            return Err(Error::StateInconsistent {
                message: format!(
                    "'{}' cannot go from '{}' to '{next}'",
                    record.pkgver, record.state
                ),
            });
        }
        debug!(pkgver = %record.pkgver, from = %record.state, to = %next, "state change");
        record.state = next;
        Ok(())
    }

    /// Packages whose `run_depends` match `pkgver` directly or through
    /// its provider's `provides`. O(N) scan.
    pub fn revdeps(&self, pkgver: &str) -> Vec<&PackageRecord> {
        let Some(target) = self.resolve_pkgver(pkgver) else { return Vec::new() };
        self.packages
            .values()
            .filter(|record| {
                record.pkgver != target.pkgver
                    && record.run_depends.iter().any(|pattern| {
                        pattern_match(&target.pkgver, pattern) || target.provides_match(pattern)
                    })
            })
            .collect()
    }

    fn resolve_pkgver(&self, pkgver: &str) -> Option<&PackageRecord> {
        pkg_name(pkgver)
            .and_then(|name| self.packages.get(name))
            .or_else(|| self.packages.get(pkgver))
    }

    /// Transitive dependency closure of `pkgver` in dependency-first
    /// order. Cycles are tolerated; every reachable package appears
    /// exactly once, after its dependencies where the graph allows.
    pub fn fulldeptree(&self, pkgver: &str) -> Result<Vec<&PackageRecord>> {
        let root = self
            .resolve_pkgver(pkgver)
            .ok_or_else(|| Error::not_found(pkgver))?;
        let mut order = Vec::new();
        let mut visited = BTreeSet::new();
        let mut in_progress = BTreeSet::new();
        self.deptree_visit(root, &mut visited, &mut in_progress, &mut order);
        Ok(order)
    }

    fn deptree_visit<'a>(
        &'a self,
        record: &'a PackageRecord,
        visited: &mut BTreeSet<String>,
        in_progress: &mut BTreeSet<String>,
        order: &mut Vec<&'a PackageRecord>,
    ) {
        if visited.contains(&record.pkgname) || !in_progress.insert(record.pkgname.clone()) {
            return;
        }
        for pattern in &record.run_depends {
            if let Some(dep) = self.get(pattern) {
                self.deptree_visit(dep, visited, in_progress, order);
            }
        }
        in_progress.remove(&record.pkgname);
        if visited.insert(record.pkgname.clone()) {
            order.push(record);
        }
    }

    /// Automatically installed packages no longer reachable from any
    /// manually installed package.
    pub fn orphans(&self) -> Vec<&PackageRecord> {
        let mut live: BTreeSet<&str> = BTreeSet::new();
        let mut queue: Vec<&PackageRecord> = self
            .packages
            .values()
            .filter(|r| !r.automatic_install && r.state == PkgState::Installed)
            .collect();
        while let Some(record) = queue.pop() {
            if !live.insert(&record.pkgname) {
                continue;
            }
            for pattern in &record.run_depends {
                if let Some(dep) = self.get(pattern) {
                    if !live.contains(dep.pkgname.as_str()) {
                        queue.push(dep);
                    }
                }
            }
        }
        self.packages
            .values()
            .filter(|r| {
                r.automatic_install
                    && r.state == PkgState::Installed
                    && !live.contains(r.pkgname.as_str())
            })
            .collect()
    }

    /// Recompute the `requiredby` index from the `run_depends` arrays.
    pub fn rebuild_requiredby(&mut self) {
        let mut index: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for depender in self.packages.values() {
            if depender.state != PkgState::Installed && depender.state != PkgState::Unpacked {
                continue;
            }
            for pattern in &depender.run_depends {
                let provider = self
                    .packages
                    .values()
                    .find(|p| pattern_match(&p.pkgver, pattern))
                    .or_else(|| self.packages.values().find(|p| p.provides_match(pattern)));
                if let Some(provider) = provider {
                    index
                        .entry(provider.pkgname.clone())
                        .or_default()
                        .insert(depender.pkgver.clone());
                } else {
                    warn!(pkgver = %depender.pkgver, pattern = %pattern, "dangling run_depends entry");
                }
            }
        }
        for (pkgname, record) in &mut self.packages {
            record.requiredby = index.remove(pkgname).map(|s| s.into_iter().collect()).unwrap_or_default();
        }
    }

    /// Serialize the database to its document form.
    pub fn to_value(&self) -> Value {
        let mut root = Value::map();
        for (pkgname, record) in &self.packages {
            root.insert(pkgname.as_str(), pkg_to_value(record));
        }
        if !self.alternatives.is_empty() {
            let mut groups = Value::map();
            for (group, providers) in &self.alternatives {
                groups.insert(group.as_str(), Value::str_seq(providers.iter().map(String::as_str)));
            }
            root.insert(ALTERNATIVES_KEY, groups);
        }
        root
    }

    /// Persist the database. With `flush`, the document is atomically
    /// rewritten; the `requiredby` index is rebuilt first so the on-disk
    /// form always satisfies the reverse-dependency invariant.
    pub fn update(&mut self, flush: bool, purge: bool) -> Result<()> {
        if purge {
            // Typed records only carry the canonical keys, so a rewrite
            // drops any transaction-era leftovers from older tools.
            for record in self.packages.values_mut() {
                let own = record.pkgname.clone();
                record.replaces.retain(|pattern| {
                    pattern_name(pattern).map_or(true, |name| name != own)
                });
            }
        }
        if !flush {
            return Ok(());
        }
        self.rebuild_requiredby();
        valise_plist::externalize(&self.to_value(), &self.path)?;
        debug!(path = %self.path.display(), packages = self.packages.len(), "pkgdb flushed");
        Ok(())
    }
}

impl Drop for PkgDb {
    fn drop(&mut self) {
        self.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(pkgver: &str, depends: &[&str]) -> PackageRecord {
        let mut r = PackageRecord::from_pkgver(pkgver).unwrap();
        r.state = PkgState::Installed;
        r.run_depends = depends.iter().map(ToString::to_string).collect();
        r
    }

    fn fresh_db(dir: &Path) -> PkgDb {
        PkgDb::open_at(&dir.join("pkgdb-0.38.plist"), dir).unwrap()
    }

    #[test]
    fn load_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = fresh_db(dir.path());
        db.put(record("gawk-5.0_1", &["glibc>=2.36"])).unwrap();
        db.put(record("glibc-2.38_2", &[])).unwrap();
        db.alternatives
            .insert("awk".into(), vec!["gawk".into()]);
        db.update(true, false).unwrap();

        let reloaded = fresh_db(dir.path());
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("gawk").unwrap().pkgver, "gawk-5.0_1");
        assert_eq!(
            reloaded.alternatives_groups().get("awk"),
            Some(&vec!["gawk".to_string()])
        );
        // requiredby was rebuilt at flush time.
        assert_eq!(reloaded.get("glibc").unwrap().requiredby, vec!["gawk-5.0_1".to_string()]);
    }

    #[test]
    fn lookup_by_pattern_and_virtual() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = fresh_db(dir.path());
        let mut gawk = record("gawk-5.0_1", &[]);
        gawk.provides = vec!["awk-0_1".into()];
        db.put(gawk).unwrap();

        assert!(db.get("gawk").is_some());
        assert!(db.get("gawk>=5.0").is_some());
        assert!(db.get("gawk>=6.0").is_none());
        assert!(db.get("gawk-5.0_1").is_some());
        assert_eq!(db.get("awk").unwrap().pkgname, "gawk");
        assert_eq!(db.get_virtualpkg("awk>=0").unwrap().pkgname, "gawk");
    }

    #[test]
    fn state_machine_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = fresh_db(dir.path());
        let mut r = record("demo-1.0_1", &[]);
        r.state = PkgState::NotInstalled;
        db.put(r).unwrap();

        db.set_state("demo", PkgState::Unpacked).unwrap();
        db.set_state("demo", PkgState::Installed).unwrap();
        db.set_state("demo", PkgState::ConfigFiles).unwrap();
        assert!(db.set_state("demo", PkgState::Installed).is_err());
    }

    #[test]
    fn revdeps_through_provides() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = fresh_db(dir.path());
        let mut gawk = record("gawk-5.0_1", &[]);
        gawk.provides = vec!["awk-0_1".into()];
        db.put(gawk).unwrap();
        db.put(record("mkdocs-1.0_1", &["awk>=0"])).unwrap();
        db.put(record("unrelated-1.0_1", &[])).unwrap();

        let rd = db.revdeps("gawk-5.0_1");
        assert_eq!(rd.len(), 1);
        assert_eq!(rd[0].pkgname, "mkdocs");
    }

    #[test]
    fn deptree_is_dependency_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = fresh_db(dir.path());
        db.put(record("app-1.0_1", &["libb>=1.0"])).unwrap();
        db.put(record("libb-1.0_1", &["libc-base>=1.0"])).unwrap();
        db.put(record("libc-base-1.0_1", &[])).unwrap();

        let tree: Vec<&str> =
            db.fulldeptree("app-1.0_1").unwrap().iter().map(|r| r.pkgname.as_str()).collect();
        assert_eq!(tree, ["libc-base", "libb", "app"]);
    }

    #[test]
    fn orphan_scan() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = fresh_db(dir.path());
        let mut lib = record("libfoo-1.0_1", &[]);
        lib.automatic_install = true;
        db.put(lib).unwrap();
        let mut dangling = record("libold-1.0_1", &[]);
        dangling.automatic_install = true;
        db.put(dangling).unwrap();
        db.put(record("app-1.0_1", &["libfoo>=1.0"])).unwrap();

        let orphans: Vec<&str> = db.orphans().iter().map(|r| r.pkgname.as_str()).collect();
        assert_eq!(orphans, ["libold"]);
    }

    #[test]
    fn purge_drops_self_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = fresh_db(dir.path());
        let mut r = record("gawk-5.0_1", &[]);
        r.replaces = vec!["gawk>=0".into(), "mawk>=0".into()];
        db.put(r).unwrap();
        db.update(false, true).unwrap();
        assert_eq!(db.get("gawk").unwrap().replaces, vec!["mawk>=0".to_string()]);
    }

    #[test]
    fn lock_blocks_second_holder() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = fresh_db(dir.path());
        db.lock().unwrap();
        // Re-locking from the same handle is idempotent.
        db.lock().unwrap();
        db.unlock();
    }
}
