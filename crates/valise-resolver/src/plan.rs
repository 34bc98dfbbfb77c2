//! The planning algorithm.

use crate::sort::order_entries;
use crate::transaction::{Transaction, TransactionAction, TransactionEntry};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use valise_core::{
    compare_pkgver, pattern_match, pattern_name, pkg_name, Config, Error, Event, EventSink,
    PackageRecord, PkgState, Result,
};
use valise_pkgdb::PkgDb;
use valise_repository::Pool;

/// A user request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Operation to perform.
    pub op: RequestOp,
    /// Package name, pattern, or local archive path.
    pub target: String,
}

impl Request {
    /// Build a request.
    pub fn new(op: RequestOp, target: impl Into<String>) -> Self {
        Self { op, target: target.into() }
    }
}

/// Request operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOp {
    /// Install a package (or update it when already installed).
    Install,
    /// Update an installed package.
    Update,
    /// Update every installed package with a newer candidate.
    UpdateAll,
    /// Remove an installed package.
    Remove,
    /// Reinstall the currently installed version.
    Reinstall,
    /// Set the hold flag.
    Hold,
    /// Clear the hold flag.
    Unhold,
}

/// Planner behavior flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlannerFlags {
    /// Weaken dependency/downgrade/reverse-dependency checks.
    pub force: bool,
    /// Compute only; callers must not apply the result.
    pub dry_run: bool,
    /// Fetch archives without applying.
    pub download_only: bool,
    /// Report conflicts instead of failing.
    pub ignore_conflicts: bool,
    /// Treat unresolved shared libraries as errors.
    pub strict_shlibs: bool,
}

/// Plan a transaction. Pure: the pkgdb and pool are never mutated, and
/// no partial result is ever returned.
pub fn plan(
    requests: &[Request],
    db: &PkgDb,
    pool: &Pool,
    config: &Config,
    flags: &PlannerFlags,
    sink: &dyn EventSink,
) -> Result<Transaction> {
    let mut planner = Planner {
        db,
        pool,
        config,
        flags,
        sink,
        planned: BTreeMap::new(),
        removals: BTreeMap::new(),
        holds: Vec::new(),
        queue: VecDeque::new(),
        expanded: BTreeSet::new(),
    };
    for request in requests {
        planner.seed(request)?;
    }
    planner.expand()?;
    planner.resolve_replacements();
    planner.detect_conflicts()?;
    planner.check_shlibs()?;

    let mut entries = planner.holds;
    entries.extend(planner.planned.into_values());
    entries.extend(planner.removals.into_values());
    let mut txn = Transaction { entries: order_entries(entries), ..Transaction::default() };
    txn.compute_sizes();
    debug!(entries = txn.entries.len(), "transaction planned");
    Ok(txn)
}

struct Planner<'a> {
    db: &'a PkgDb,
    pool: &'a Pool,
    config: &'a Config,
    flags: &'a PlannerFlags,
    sink: &'a dyn EventSink,
    /// pkgname -> pending install/update entry.
    planned: BTreeMap<String, TransactionEntry>,
    /// pkgname -> pending remove entry.
    removals: BTreeMap<String, TransactionEntry>,
    holds: Vec<TransactionEntry>,
    queue: VecDeque<String>,
    /// (pkgname, pkgver) pairs whose dependencies were walked.
    expanded: BTreeSet<(String, String)>,
}

impl Planner<'_> {
    fn installed(&self, pkgname: &str) -> Option<&PackageRecord> {
        self.db.records().get(pkgname).filter(|r| {
            matches!(r.state, PkgState::Installed | PkgState::Unpacked | PkgState::Broken)
        })
    }

    fn seed(&mut self, request: &Request) -> Result<()> {
        trace!(op = ?request.op, target = %request.target, "seeding request");
        match request.op {
            RequestOp::Install => self.seed_install(&request.target, false),
            RequestOp::Reinstall => self.seed_install(&request.target, true),
            RequestOp::Update => {
                if self.installed_by_target(&request.target).is_some() {
                    self.seed_install(&request.target, false)
                } else {
                    Err(Error::not_found(&request.target))
                }
            }
            RequestOp::UpdateAll => self.seed_update_all(),
            RequestOp::Remove => self.seed_remove(&request.target),
            RequestOp::Hold => self.seed_hold(&request.target, true),
            RequestOp::Unhold => self.seed_hold(&request.target, false),
        }
    }

    fn installed_by_target(&self, target: &str) -> Option<&PackageRecord> {
        self.db.get(target).filter(|r| {
            matches!(r.state, PkgState::Installed | PkgState::Unpacked | PkgState::Broken)
        })
    }

    fn seed_hold(&mut self, target: &str, hold: bool) -> Result<()> {
        let installed =
            self.installed_by_target(target).ok_or_else(|| Error::not_found(target))?;
        if installed.hold == hold {
            return Ok(());
        }
        let mut record = installed.clone();
        record.hold = hold;
        self.holds.push(TransactionEntry::new(record, TransactionAction::Hold));
        Ok(())
    }

    fn seed_remove(&mut self, target: &str) -> Result<()> {
        let installed =
            self.installed_by_target(target).ok_or_else(|| Error::not_found(target))?;
        let pkgver = installed.pkgver.clone();
        let pkgname = installed.pkgname.clone();
        for revdep in self.db.revdeps(&pkgver) {
            if self.removals.contains_key(&revdep.pkgname) {
                continue;
            }
            if self.flags.force {
                self.sink.emit(&Event::Warning {
                    message: format!("removing '{pkgver}' breaks '{}'", revdep.pkgver),
                });
            } else {
                return Err(Error::DependencyUnsatisfied {
                    pkgver: revdep.pkgver.clone(),
                    pattern: pkgname,
                });
            }
        }
        self.removals
            .insert(pkgname, TransactionEntry::new(installed.clone(), TransactionAction::Remove));
        Ok(())
    }

    fn seed_update_all(&mut self) -> Result<()> {
        let seeds: Vec<(PackageRecord, String, u64)> = self
            .db
            .records()
            .values()
            .filter(|installed| installed.state == PkgState::Installed)
            .filter(|installed| !installed.hold)
            .filter(|installed| !self.config.ignorepkg.contains(&installed.pkgname))
            .filter_map(|installed| {
                let (repo, candidate) = self.candidate_for(installed, &installed.pkgname)?;
                newer_than(candidate, installed).then(|| {
                    (candidate.clone(), repo.to_string(), candidate.filename_size)
                })
            })
            .collect();
        for (candidate, repo_url, download_size) in seeds {
            let installed = self.installed(&candidate.pkgname).map(|r| r.pkgver.clone());
            self.add_planned(candidate, TransactionAction::Update, Some(repo_url), None, false, installed, download_size);
        }
        Ok(())
    }

    /// Pool candidate for an installed package, honoring repolock.
    fn candidate_for(
        &self,
        installed: &PackageRecord,
        target: &str,
    ) -> Option<(&str, &PackageRecord)> {
        if installed.repolock {
            let locked = installed.repository.as_deref()?;
            let repo = self.pool.repositories().iter().find(|r| r.url == locked)?;
            return repo.idx.get(&installed.pkgname).map(|rec| (repo.url.as_str(), rec));
        }
        self.pool.best_match(target).map(|(repo, rec)| (repo.url.as_str(), rec))
    }

    fn seed_install(&mut self, target: &str, reinstall: bool) -> Result<()> {
        // Local archive targets carry their record in props.plist.
        if target.ends_with(".xbps") && Path::new(target).is_file() {
            return self.seed_local_archive(Path::new(target), reinstall);
        }
        let target = self.resolve_virtualpkg_pin(target);
        let (repo_url, candidate) = match self.pool.best_match(&target) {
            Some((repo, rec)) => (repo.url.clone(), rec.clone()),
            None => match self.pool.best_virtual(&target) {
                Some((repo, rec)) => (repo.url.clone(), rec.clone()),
                None => return Err(Error::not_found(&target)),
            },
        };
        self.seed_resolved(candidate, Some(repo_url), None, reinstall, false)
    }

    fn seed_local_archive(&mut self, path: &Path, reinstall: bool) -> Result<()> {
        let doc = valise_archive::ArchiveReader::read_member_document(
            path,
            valise_archive::PROPS_PLIST,
        )?;
        let record = valise_plist::pkg_from_value(&doc)?;
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let mut entry_record = record;
        entry_record.filename_size = size;
        self.seed_resolved(entry_record, None, Some(path.to_path_buf()), reinstall, false)
    }

    /// Common install/update seeding once a candidate record is known.
    fn seed_resolved(
        &mut self,
        mut candidate: PackageRecord,
        repo_url: Option<String>,
        archive_path: Option<PathBuf>,
        reinstall: bool,
        automatic: bool,
    ) -> Result<()> {
        let download_size = candidate.filename_size;
        match self.installed(&candidate.pkgname) {
            Some(installed) if installed.pkgver == candidate.pkgver && !reinstall => {
                trace!(pkgver = %installed.pkgver, "already installed, nothing to do");
                Ok(())
            }
            Some(installed) => {
                let previous = installed.pkgver.clone();
                let same = installed.pkgver == candidate.pkgver;
                if !same && !newer_than(&candidate, installed) && !self.flags.force {
                    return Err(Error::VersionConflict {
                        pkgname: candidate.pkgname,
                        pattern: format!("{} is older than installed {previous}", candidate.pkgver),
                    });
                }
                if installed.hold {
                    if automatic {
                        return Err(Error::Held { pkgver: previous });
                    }
                    // An explicit request overrides the hold by clearing it.
                    candidate.hold = false;
                }
                let action =
                    if same { TransactionAction::Install } else { TransactionAction::Update };
                self.add_planned(
                    candidate,
                    action,
                    repo_url,
                    archive_path,
                    automatic,
                    Some(previous),
                    download_size,
                );
                Ok(())
            }
            None => {
                self.add_planned(
                    candidate,
                    TransactionAction::Install,
                    repo_url,
                    archive_path,
                    automatic,
                    None,
                    download_size,
                );
                Ok(())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn add_planned(
        &mut self,
        record: PackageRecord,
        action: TransactionAction,
        repository: Option<String>,
        archive_path: Option<PathBuf>,
        automatic: bool,
        previous: Option<String>,
        download_size: u64,
    ) {
        let key = (record.pkgname.clone(), record.pkgver.clone());
        if self.expanded.contains(&key) {
            return;
        }
        self.expanded.insert(key);
        self.queue.push_back(record.pkgname.clone());
        let mut entry = TransactionEntry::new(record, action);
        entry.repository = repository;
        entry.archive_path = archive_path;
        entry.automatic = automatic;
        entry.previous = previous;
        entry.download_size = download_size;
        trace!(pkgver = %entry.record.pkgver, action = %entry.action, "queued");
        self.planned.insert(entry.record.pkgname.clone(), entry);
    }

    /// Map a request for a pinned virtual package onto its provider.
    fn resolve_virtualpkg_pin(&self, target: &str) -> String {
        let name = pattern_name(target).unwrap_or_else(|| target.to_string());
        match self.config.virtualpkg.get(&name).and_then(|pinned| pkg_name(pinned)) {
            Some(provider) => provider.to_string(),
            None => target.to_string(),
        }
    }

    fn expand(&mut self) -> Result<()> {
        while let Some(pkgname) = self.queue.pop_front() {
            let Some(entry) = self.planned.get(&pkgname) else { continue };
            let pkgver = entry.record.pkgver.clone();
            let depends = entry.record.run_depends.clone();
            for pattern in depends {
                if self.dep_satisfied(&pattern) {
                    trace!(pkgver = %pkgver, pattern = %pattern, "dependency satisfied");
                    continue;
                }
                self.expand_dependency(&pkgver, &pattern)?;
            }
        }
        Ok(())
    }

    /// Whether `pattern` is satisfied by the hypothetical post-state:
    /// packages already in the transaction plus installed packages that
    /// are neither removed nor superseded by it.
    fn dep_satisfied(&self, pattern: &str) -> bool {
        for entry in self.planned.values() {
            if pattern_match(&entry.record.pkgver, pattern)
                || entry.record.provides_match(pattern)
            {
                return true;
            }
        }
        self.db.records().values().any(|installed| {
            matches!(installed.state, PkgState::Installed | PkgState::Unpacked)
                && !self.planned.contains_key(&installed.pkgname)
                && !self.removals.contains_key(&installed.pkgname)
                && (pattern_match(&installed.pkgver, pattern)
                    || installed.provides_match(pattern))
        })
    }

    fn expand_dependency(&mut self, dependent: &str, pattern: &str) -> Result<()> {
        let pinned = self.resolve_virtualpkg_pin(pattern);
        let lookup: &str = if pinned == pattern { pattern } else { &pinned };

        // Real-name providers take precedence over virtual ones.
        let choice: Option<(String, PackageRecord)> = match self.pool.best_match(lookup) {
            Some((repo, rec)) => Some((repo.url.clone(), rec.clone())),
            None => self.choose_virtual_provider(lookup),
        };
        let Some((repo_url, candidate)) = choice else {
            return Err(Error::DependencyUnsatisfied {
                pkgver: dependent.to_string(),
                pattern: pattern.to_string(),
            });
        };
        if self.config.ignorepkg.contains(&candidate.pkgname) {
            return Err(Error::DependencyUnsatisfied {
                pkgver: dependent.to_string(),
                pattern: format!("{pattern} (provider '{}' is ignored)", candidate.pkgname),
            });
        }
        debug!(dependent, pattern = %pattern, provider = %candidate.pkgver, "expanding dependency");
        self.seed_resolved(candidate, Some(repo_url), None, false, true)
    }

    /// Virtual provider tie-break: a provider that is already installed
    /// wins, then one already queued, then the first in the pool.
    fn choose_virtual_provider(&self, pattern: &str) -> Option<(String, PackageRecord)> {
        let candidates = self.pool.virtual_providers(pattern);
        if candidates.is_empty() {
            return None;
        }
        for (repo, rec) in &candidates {
            if self.installed(&rec.pkgname).is_some() {
                return Some((repo.url.clone(), (*rec).clone()));
            }
        }
        for (repo, rec) in &candidates {
            if self.planned.contains_key(&rec.pkgname) {
                return Some((repo.url.clone(), (*rec).clone()));
            }
        }
        let (repo, rec) = candidates[0];
        Some((repo.url.clone(), rec.clone()))
    }

    /// Convert installed packages matched by a newcomer's `replaces`
    /// into removes attached to the newcomer. Replace wins over a
    /// conflict naming the same target.
    fn resolve_replacements(&mut self) {
        let newcomers: Vec<(String, String, Vec<String>)> = self
            .planned
            .values()
            .map(|e| (e.record.pkgname.clone(), e.record.pkgver.clone(), e.record.replaces.clone()))
            .collect();
        for (newcomer_name, newcomer_pkgver, replaces) in newcomers {
            for pattern in replaces {
                let matched: Vec<PackageRecord> = self
                    .db
                    .records()
                    .values()
                    .filter(|installed| {
                        matches!(installed.state, PkgState::Installed | PkgState::Unpacked)
                            && installed.pkgname != newcomer_name
                            && !self.removals.contains_key(&installed.pkgname)
                            && !self.planned.contains_key(&installed.pkgname)
                            && (pattern_match(&installed.pkgver, &pattern)
                                || installed.provides_match(&pattern))
                    })
                    .cloned()
                    .collect();
                for replaced in matched {
                    debug!(
                        replaced = %replaced.pkgver,
                        by = %newcomer_pkgver,
                        pattern = %pattern,
                        "replacement"
                    );
                    let mut entry = TransactionEntry::new(replaced, TransactionAction::Remove);
                    entry.replaced_by = Some(newcomer_pkgver.clone());
                    self.removals.insert(entry.record.pkgname.clone(), entry);
                }
            }
        }
    }

    /// Forward and reverse conflict evaluation against the hypothetical
    /// post-transaction state.
    fn detect_conflicts(&self) -> Result<()> {
        let mut found: Vec<(String, String)> = Vec::new();
        let hypothetical: Vec<&PackageRecord> = self
            .planned
            .values()
            .map(|e| &e.record)
            .chain(self.db.records().values().filter(|installed| {
                matches!(installed.state, PkgState::Installed | PkgState::Unpacked)
                    && !self.planned.contains_key(&installed.pkgname)
                    && !self.removals.contains_key(&installed.pkgname)
            }))
            .collect();
        for entry in self.planned.values() {
            for pattern in &entry.record.conflicts {
                for other in &hypothetical {
                    if other.pkgname != entry.record.pkgname
                        && (pattern_match(&other.pkgver, pattern)
                            || other.provides_match(pattern))
                    {
                        found.push((entry.record.pkgver.clone(), other.pkgver.clone()));
                    }
                }
            }
        }
        // Reverse direction: an existing package may conflict with a
        // newcomer.
        for existing in &hypothetical {
            if self.planned.contains_key(&existing.pkgname) {
                continue;
            }
            for pattern in &existing.conflicts {
                for entry in self.planned.values() {
                    if pattern_match(&entry.record.pkgver, pattern)
                        || entry.record.provides_match(pattern)
                    {
                        found.push((existing.pkgver.clone(), entry.record.pkgver.clone()));
                    }
                }
            }
        }
        for (pkgver, conflicting) in found {
            if self.flags.ignore_conflicts {
                self.sink.emit(&Event::Warning {
                    message: format!("ignoring conflict between '{pkgver}' and '{conflicting}'"),
                });
            } else {
                return Err(Error::Conflict { pkgver, conflicting });
            }
        }
        Ok(())
    }

    /// Every soname required post-transaction must be supplied by some
    /// package's shlib-provides. Warning by default, error in strict
    /// mode.
    fn check_shlibs(&self) -> Result<()> {
        let mut provided: BTreeSet<&str> = BTreeSet::new();
        for entry in self.planned.values() {
            provided.extend(entry.record.shlib_provides.iter().map(String::as_str));
        }
        for installed in self.db.records().values() {
            if matches!(installed.state, PkgState::Installed | PkgState::Unpacked)
                && !self.planned.contains_key(&installed.pkgname)
                && !self.removals.contains_key(&installed.pkgname)
            {
                provided.extend(installed.shlib_provides.iter().map(String::as_str));
            }
        }
        for entry in self.planned.values() {
            for soname in &entry.record.shlib_requires {
                if !provided.contains(soname.as_str()) {
                    if self.flags.strict_shlibs {
                        return Err(Error::DependencyUnsatisfied {
                            pkgver: entry.record.pkgver.clone(),
                            pattern: soname.clone(),
                        });
                    }
                    self.sink.emit(&Event::Warning {
                        message: format!(
                            "'{}' requires '{soname}' which nothing provides",
                            entry.record.pkgver
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Whether `candidate` supersedes `installed`: strictly newer by the
/// comparator, or the candidate's `reverts` names the installed
/// version.
fn newer_than(candidate: &PackageRecord, installed: &PackageRecord) -> bool {
    if candidate.reverts.iter().any(|v| v == installed.version()) {
        return true;
    }
    compare_pkgver(&candidate.pkgver, &installed.pkgver) == std::cmp::Ordering::Greater
}
