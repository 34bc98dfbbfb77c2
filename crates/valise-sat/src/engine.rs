//! Clause generation and promotion resolution over repository groups.

use crate::clause::Clause;
use crate::solver::Solver;
use crate::vars::VarPool;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use valise_core::{
    compare_pkgver, pattern_match, pattern_name, pkg_name, pkg_version, Error, PackageRecord,
    Result,
};
use valise_repository::Repository;

/// Suffix tying debug packages to their base package.
const DBG_SUFFIX: &str = "-dbg";

/// Where a node's elected record comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Public,
    Stage,
    None,
}

#[derive(Debug, Clone)]
struct Package {
    record: PackageRecord,
    repo: usize,
}

#[derive(Debug, Default)]
struct Node {
    public: Option<Package>,
    stage: Option<Package>,
    source: Source,
    /// Debug packages follow their base: `Some(base)` ties the node,
    /// with `base == own name` marking a dangling debug package.
    base: Option<String>,
}

impl Default for Source {
    fn default() -> Self {
        Self::None
    }
}

/// One published-index change from a promotion round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionChange {
    /// New package enters the index.
    Added(String),
    /// Published version replaced.
    Updated {
        /// Outgoing pkgver.
        from: String,
        /// Incoming pkgver.
        to: String,
    },
    /// Package leaves the index.
    Removed(String),
}

/// Result of resolving a repository group.
#[derive(Debug, Default)]
pub struct Promotion {
    /// pkgvers whose prefer-stage/prefer-present assumption had to be
    /// dropped; they stay at (or keep) their public state this round.
    pub skipped: Vec<String>,
    /// New public index per input repository, same order as the input.
    pub indexes: Vec<BTreeMap<String, PackageRecord>>,
    /// Human-readable change log.
    pub changes: Vec<PromotionChange>,
}

struct Group {
    nodes: BTreeMap<String, Node>,
    /// soname -> provider pkgvers.
    shlib_providers: BTreeMap<String, Vec<String>>,
    /// virtual pkgname -> (provider pkgver -> provided virtual pkgver).
    virtual_providers: BTreeMap<String, BTreeMap<String, String>>,
    repos_count: usize,
}

/// Decide which staged packages of `repos` can be promoted.
///
/// Each repository contributes its published index and its stage index.
/// On success the returned [`Promotion`] holds the new public indexes;
/// when the published set is inconsistent on its own, the minimal
/// unsatisfiable core is reported as [`Error::Unsatisfiable`].
pub fn resolve_group(repos: &[Repository]) -> Result<Promotion> {
    let mut group = build_group(repos);
    let mut pool = VarPool::new();
    let mut solver = Solver::new();
    let mut clauses: Vec<Clause> = Vec::new();
    let mut assumptions: Vec<i32> = Vec::new();

    generate_constraints(&mut group, &mut pool, &mut clauses, &mut assumptions);
    let mut origins = Vec::with_capacity(clauses.len());
    for clause in &clauses {
        origins.push(solver.add(clause));
    }

    let Some(dropped) = solver.correcting_subset(&assumptions) else {
        let core = solver.unsat_core();
        let rendered: Vec<String> = clauses
            .iter()
            .zip(&origins)
            .filter(|(_, origin)| core.contains(origin))
            .map(|(clause, _)| clause.render(&pool))
            .collect();
        warn!(clauses = rendered.len(), "published indexes are inconsistent");
        return Err(Error::Unsatisfiable { core: rendered });
    };

    let mut skipped = Vec::new();
    for literal in dropped {
        let Some(pkgver) = pool.name(literal) else { continue };
        let Some(pkgname) = pkg_name(pkgver) else { continue };
        info!(pkgver, "not promoting");
        skipped.push(pkgver.to_string());
        if let Some(node) = group.nodes.get_mut(pkgname) {
            // A dropped stage preference falls back to the public
            // version; a dropped presence preference means removal.
            node.source = if node.public.is_some() && node.stage.is_some() {
                Source::Public
            } else {
                Source::None
            };
        }
    }
    sync_debug_packages(&mut group);
    Ok(collect_promotion(&group, skipped))
}

fn build_group(repos: &[Repository]) -> Group {
    let mut group = Group {
        nodes: BTreeMap::new(),
        shlib_providers: BTreeMap::new(),
        virtual_providers: BTreeMap::new(),
        repos_count: repos.len(),
    };
    for (repo_idx, repo) in repos.iter().enumerate() {
        for (public, index) in [(true, &repo.idx), (false, &repo.stage)] {
            for (pkgname, record) in index {
                let node = group.nodes.entry(pkgname.clone()).or_default();
                let slot = if public { &mut node.public } else { &mut node.stage };
                match slot {
                    Some(existing) => {
                        // Same pkgname from two repositories: the higher
                        // version pushes the other out.
                        if compare_pkgver(&existing.record.pkgver, &record.pkgver)
                            != std::cmp::Ordering::Less
                        {
                            warn!(
                                kept = %existing.record.pkgver,
                                dropped = %record.pkgver,
                                "push out"
                            );
                        } else {
                            warn!(
                                kept = %record.pkgver,
                                dropped = %existing.record.pkgver,
                                "push out"
                            );
                            *slot = Some(Package { record: record.clone(), repo: repo_idx });
                        }
                    }
                    None => *slot = Some(Package { record: record.clone(), repo: repo_idx }),
                }
            }
        }
    }
    for node in group.nodes.values_mut() {
        node.source = if node.stage.is_some() { Source::Stage } else { Source::Public };
    }
    for node in group.nodes.values() {
        for package in [&node.public, &node.stage].into_iter().flatten() {
            let pkgver = package.record.pkgver.clone();
            for soname in &package.record.shlib_provides {
                let providers = group.shlib_providers.entry(soname.clone()).or_default();
                if !providers.contains(&pkgver) {
                    providers.push(pkgver.clone());
                }
            }
            for virtual_pkgver in &package.record.provides {
                let Some(virtual_name) = pkg_name(virtual_pkgver) else {
                    debug!(virtual_pkgver = %virtual_pkgver, provider = %pkgver, "ignoring malformed provides");
                    continue;
                };
                group
                    .virtual_providers
                    .entry(virtual_name.to_string())
                    .or_default()
                    .insert(pkgver.clone(), virtual_pkgver.clone());
            }
        }
    }
    group
}

fn generate_constraints(
    group: &mut Group,
    pool: &mut VarPool,
    clauses: &mut Vec<Clause>,
    assumptions: &mut Vec<i32>,
) {
    let names: Vec<String> = group.nodes.keys().cloned().collect();
    let mut shlib_done: BTreeMap<String, ()> = BTreeMap::new();
    for pkgname in &names {
        presence_constraints(group, pool, clauses, assumptions, pkgname);
        let node = &group.nodes[pkgname];
        let packages: Vec<PackageRecord> = [&node.public, &node.stage]
            .into_iter()
            .flatten()
            .map(|p| p.record.clone())
            .collect();
        let mut seen_pkgver: Option<String> = None;
        for record in packages {
            // Equal public/stage records only need one constraint set.
            if seen_pkgver.as_deref() == Some(record.pkgver.as_str()) {
                continue;
            }
            seen_pkgver = Some(record.pkgver.clone());
            let real = pool.real(&record.pkgver);
            for soname in &record.shlib_requires {
                clauses.push(
                    Clause::implication(real, [pool.shlib(soname)]).labeled(soname.clone()),
                );
                if shlib_done.insert(soname.clone(), ()).is_none() {
                    let providers: Vec<i32> = group
                        .shlib_providers
                        .get(soname)
                        .map(|list| list.iter().map(|p| pool.real(p)).collect())
                        .unwrap_or_default();
                    clauses.push(
                        Clause::equivalence(pool.shlib(soname), providers)
                            .labeled(soname.clone()),
                    );
                }
            }
            dependency_constraints(group, pool, clauses, &record, real);
            virtual_or_real_constraint(group, pool, clauses, pkgname, &record, real);
        }
    }
    pure_virtual_constraints(group, pool, clauses);
}

/// Presence/update/removal constraints for one node, including the
/// debug-package coupling.
fn presence_constraints(
    group: &mut Group,
    pool: &mut VarPool,
    clauses: &mut Vec<Clause>,
    assumptions: &mut Vec<i32>,
    pkgname: &str,
) {
    if let Some(base_name) = pkgname.strip_suffix(DBG_SUFFIX) {
        let node = &group.nodes[pkgname];
        let pkgvers: Vec<String> = [&node.public, &node.stage]
            .into_iter()
            .flatten()
            .map(|p| p.record.pkgver.clone())
            .collect();
        let mut base_link = pkgname.to_string();
        let mut dbg_clauses = Vec::new();
        for pkgver in pkgvers {
            let version = pkg_version(&pkgver).unwrap_or("");
            let base_pkgver = format!("{base_name}-{version}");
            let base_matches = group.nodes.get(base_name).is_some_and(|base| {
                [&base.public, &base.stage]
                    .into_iter()
                    .flatten()
                    .any(|p| p.record.pkgver == base_pkgver)
            });
            let real = pool.real(&pkgver);
            if base_matches {
                base_link = base_name.to_string();
                dbg_clauses.push(
                    Clause::equivalence(real, [pool.real(&base_pkgver)])
                        .labeled(format!("{pkgver} follows {base_pkgver}")),
                );
            } else {
                dbg_clauses.push(
                    Clause::certainty(-real).labeled(format!("{pkgver} has no base package")),
                );
            }
        }
        clauses.extend(dbg_clauses);
        group.nodes.get_mut(pkgname).expect("node exists").base = Some(base_link);
        return;
    }

    let node = &group.nodes[pkgname];
    match (&node.public, &node.stage) {
        (Some(public), Some(stage)) => {
            if public.record.pkgver == stage.record.pkgver {
                clauses.push(
                    Clause::certainty(pool.real(&public.record.pkgver))
                        .labeled(format!("{} is published", public.record.pkgver)),
                );
            } else {
                let public_var = pool.real(&public.record.pkgver);
                let stage_var = pool.real(&stage.record.pkgver);
                clauses.push(
                    Clause::equivalence(public_var, [-stage_var]).labeled(format!(
                        "{} updates {}",
                        stage.record.pkgver, public.record.pkgver
                    )),
                );
                assumptions.push(stage_var);
            }
        }
        (Some(public), None) => assumptions.push(pool.real(&public.record.pkgver)),
        (None, Some(stage)) => assumptions.push(pool.real(&stage.record.pkgver)),
        (None, None) => {}
    }
}

fn dependency_constraints(
    group: &Group,
    pool: &mut VarPool,
    clauses: &mut Vec<Clause>,
    record: &PackageRecord,
    real: i32,
) {
    for pattern in &record.run_depends {
        let Some(depname) =
            pattern_name(pattern).or_else(|| pkg_name(pattern).map(str::to_string))
        else {
            warn!(pkgver = %record.pkgver, pattern = %pattern, "dependency has no package name");
            continue;
        };
        let mut disjunction = Vec::new();
        if let Some(dep_node) = group.nodes.get(&depname) {
            let public_pkgver = dep_node.public.as_ref().map(|p| p.record.pkgver.as_str());
            if let Some(pkgver) = public_pkgver {
                if pattern_match(pkgver, pattern) {
                    disjunction.push(pool.virtual_pkg(pkgver));
                }
            }
            if let Some(stage) = &dep_node.stage {
                let pkgver = stage.record.pkgver.as_str();
                if public_pkgver != Some(pkgver) && pattern_match(pkgver, pattern) {
                    disjunction.push(pool.virtual_pkg(pkgver));
                }
            }
        }
        if let Some(providers) = group.virtual_providers.get(&depname) {
            for (provider, virtual_pkgver) in providers {
                if pattern_match(virtual_pkgver, pattern) {
                    let variable = pool.virtual_pkg(provider);
                    if !disjunction.contains(&variable) {
                        disjunction.push(variable);
                    }
                }
            }
        }
        clauses.push(Clause::implication(real, disjunction).labeled(pattern.clone()));
    }
}

/// `virt(pkgver) <-> real(pkgver) | providers of that exact pkgver`.
fn virtual_or_real_constraint(
    group: &Group,
    pool: &mut VarPool,
    clauses: &mut Vec<Clause>,
    pkgname: &str,
    record: &PackageRecord,
    real: i32,
) {
    let mut disjunction = vec![real];
    if let Some(providers) = group.virtual_providers.get(pkgname) {
        for (provider, virtual_pkgver) in providers {
            if virtual_pkgver == &record.pkgver {
                disjunction.push(pool.real(provider));
            }
        }
    }
    clauses.push(
        Clause::equivalence(VarPool::virtual_from_real(real), disjunction)
            .labeled(record.pkgver.clone()),
    );
}

/// Equivalences for virtual pkgvers that no real package carries.
fn pure_virtual_constraints(group: &Group, pool: &mut VarPool, clauses: &mut Vec<Clause>) {
    for (virtual_name, providers) in &group.virtual_providers {
        let mut processed: Vec<&str> = Vec::new();
        if let Some(node) = group.nodes.get(virtual_name) {
            for package in [&node.public, &node.stage].into_iter().flatten() {
                processed.push(&package.record.pkgver);
            }
        }
        for virtual_pkgver in providers.values() {
            if processed.contains(&virtual_pkgver.as_str()) {
                continue;
            }
            let disjunction: Vec<i32> = providers
                .iter()
                .filter(|(_, v)| *v == virtual_pkgver)
                .map(|(provider, _)| pool.real(provider))
                .collect();
            clauses.push(
                Clause::equivalence(pool.virtual_pkg(virtual_pkgver), disjunction)
                    .labeled(format!("virtual {virtual_pkgver}")),
            );
            processed.push(virtual_pkgver);
        }
    }
}

/// Debug packages follow their base: pick whichever of their sources
/// carries the base's elected version, or drop them.
fn sync_debug_packages(group: &mut Group) {
    let elected: BTreeMap<String, Option<String>> = group
        .nodes
        .iter()
        .map(|(name, node)| {
            let pkgver = match node.source {
                Source::Public => node.public.as_ref().map(|p| p.record.pkgver.clone()),
                Source::Stage => node.stage.as_ref().map(|p| p.record.pkgver.clone()),
                Source::None => None,
            };
            (name.clone(), pkgver)
        })
        .collect();
    for (pkgname, node) in &mut group.nodes {
        let Some(base_name) = node.base.clone() else { continue };
        node.source = Source::None;
        if base_name == *pkgname {
            continue;
        }
        let Some(Some(base_pkgver)) = elected.get(&base_name) else { continue };
        let base_version = pkg_version(base_pkgver).unwrap_or("");
        for (source, package) in
            [(Source::Public, &node.public), (Source::Stage, &node.stage)]
        {
            if let Some(package) = package {
                if pkg_version(&package.record.pkgver) == Some(base_version) {
                    node.source = source;
                }
            }
        }
    }
}

fn collect_promotion(group: &Group, skipped: Vec<String>) -> Promotion {
    let mut promotion = Promotion {
        skipped,
        indexes: vec![BTreeMap::new(); group.repos_count],
        changes: Vec::new(),
    };
    for (pkgname, node) in &group.nodes {
        let chosen = match node.source {
            Source::Public => node.public.as_ref(),
            Source::Stage => node.stage.as_ref(),
            Source::None => None,
        };
        match (chosen, &node.public) {
            (None, Some(public)) => {
                promotion.changes.push(PromotionChange::Removed(public.record.pkgver.clone()));
                continue;
            }
            (None, None) => continue,
            (Some(package), public) => {
                if node.source == Source::Stage {
                    match public {
                        None => promotion
                            .changes
                            .push(PromotionChange::Added(package.record.pkgver.clone())),
                        Some(existing) if existing.record.pkgver != package.record.pkgver => {
                            promotion.changes.push(PromotionChange::Updated {
                                from: existing.record.pkgver.clone(),
                                to: package.record.pkgver.clone(),
                            });
                        }
                        Some(_) => {}
                    }
                }
                promotion.indexes[package.repo].insert(pkgname.clone(), package.record.clone());
            }
        }
    }
    promotion
}
