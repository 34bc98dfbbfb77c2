//! Alternatives engine: group-scoped symlink arbitration.
//!
//! Every group in `_XBPS_ALTERNATIVES_` holds an ordered list of
//! pkgnames; the head is the current provider. Each provider declares
//! `name:linkpath:target` triplets, and the engine keeps a symlink at
//! `linkpath` pointing at `target` for the head of every group. Link
//! targets are stored relative to the link's directory when both paths
//! are absolute.

use crate::db::PkgDb;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace, warn};
use valise_core::{Error, Result};

/// One `name:linkpath:target` triplet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triplet {
    /// Alternative name (diagnostic only).
    pub name: String,
    /// Absolute link path below the root directory.
    pub link: String,
    /// Declared target path.
    pub target: String,
}

impl Triplet {
    /// Parse a `name:linkpath:target` string.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.splitn(3, ':');
        let (name, link, target) = match (parts.next(), parts.next(), parts.next()) {
            (Some(n), Some(l), Some(t)) if !l.is_empty() && !t.is_empty() => (n, l, t),
            _ => {
                return Err(Error::parse(
                    "alternatives triplet",
                    format!("'{raw}' is not name:linkpath:target"),
                ));
            }
        };
        Ok(Self { name: name.to_string(), link: link.to_string(), target: target.to_string() })
    }

    /// The target as stored on disk: relative to the link's directory
    /// when both sides are absolute.
    pub fn stored_target(&self) -> String {
        if self.link.starts_with('/') && self.target.starts_with('/') {
            relative_to(Path::new(&self.link), Path::new(&self.target))
        } else {
            self.target.clone()
        }
    }
}

/// Compute `target` relative to the parent directory of `link`.
fn relative_to(link: &Path, target: &Path) -> String {
    let link_dir: Vec<Component> =
        link.parent().map(|p| p.components().collect()).unwrap_or_default();
    let target_parts: Vec<Component> = target.components().collect();
    let mut common = 0;
    while common < link_dir.len()
        && common < target_parts.len()
        && link_dir[common] == target_parts[common]
    {
        common += 1;
    }
    let mut out = PathBuf::new();
    for _ in common..link_dir.len() {
        out.push("..");
    }
    for part in &target_parts[common..] {
        out.push(part);
    }
    out.to_string_lossy().into_owned()
}

fn link_location(rootdir: &Path, link: &str) -> PathBuf {
    rootdir.join(link.trim_start_matches('/'))
}

/// A mismatch found by [`check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkIssue {
    /// Group the link belongs to.
    pub group: String,
    /// Head package that should provide it.
    pub pkgname: String,
    /// Link path below the root.
    pub link: String,
    /// Target the head declares.
    pub expected: String,
    /// Target found on disk, if any.
    pub found: Option<String>,
}

impl std::fmt::Display for LinkIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.found {
            Some(found) => write!(
                f,
                "{}: group '{}': '{}' points at '{found}', expected '{}'",
                self.pkgname, self.group, self.link, self.expected
            ),
            None => write!(
                f,
                "{}: group '{}': '{}' is missing (expected '{}')",
                self.pkgname, self.group, self.link, self.expected
            ),
        }
    }
}

fn triplets_of(db: &PkgDb, pkgname: &str, group: &str) -> Result<Vec<Triplet>> {
    let record = db
        .records()
        .get(pkgname)
        .ok_or_else(|| Error::not_found(pkgname))?;
    record
        .alternatives
        .get(group)
        .map(|raw| raw.iter().map(|t| Triplet::parse(t)).collect())
        .unwrap_or_else(|| Ok(Vec::new()))
}

fn materialize(db: &PkgDb, pkgname: &str, group: &str) -> Result<()> {
    for triplet in triplets_of(db, pkgname, group)? {
        let location = link_location(db.rootdir(), &triplet.link);
        if let Some(parent) = location.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::fs(parent, e))?;
        }
        match std::fs::symlink_metadata(&location) {
            Ok(_) => std::fs::remove_file(&location).map_err(|e| Error::fs(&location, e))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(Error::fs(&location, err)),
        }
        let stored = triplet.stored_target();
        std::os::unix::fs::symlink(&stored, &location).map_err(|e| Error::fs(&location, e))?;
        debug!(group, link = %triplet.link, target = %stored, "alternatives link set");
    }
    Ok(())
}

fn remove_links(db: &PkgDb, pkgname: &str, group: &str) -> Result<()> {
    for triplet in triplets_of(db, pkgname, group)? {
        let location = link_location(db.rootdir(), &triplet.link);
        match std::fs::symlink_metadata(&location) {
            Ok(meta) if meta.file_type().is_symlink() => {
                std::fs::remove_file(&location).map_err(|e| Error::fs(&location, e))?;
                trace!(group, link = %triplet.link, "alternatives link removed");
            }
            // A regular file at the link path is not ours to delete.
            Ok(_) => warn!(link = %triplet.link, "not a symlink, leaving in place"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(Error::fs(&location, err)),
        }
    }
    Ok(())
}

/// Register `pkgname` in every group it declares, deduplicated. When a
/// group was empty the package becomes head and its links materialize.
pub fn register(db: &mut PkgDb, pkgname: &str) -> Result<()> {
    let groups: Vec<String> = db
        .records()
        .get(pkgname)
        .ok_or_else(|| Error::not_found(pkgname))?
        .alternatives
        .keys()
        .cloned()
        .collect();
    for group in groups {
        let providers = db.alternatives_groups_mut().entry(group.clone()).or_default();
        if !providers.iter().any(|p| p == pkgname) {
            providers.push(pkgname.to_string());
        }
        let head = providers.first().cloned();
        if head.as_deref() == Some(pkgname) {
            materialize(db, pkgname, &group)?;
        }
    }
    Ok(())
}

/// Remove `pkgname` from every group. If it was head its links are
/// repointed at the promoted successor, or removed when the group
/// becomes empty.
pub fn unregister(db: &mut PkgDb, pkgname: &str) -> Result<()> {
    let groups: Vec<String> = db
        .alternatives_groups()
        .iter()
        .filter(|(_, providers)| providers.iter().any(|p| p == pkgname))
        .map(|(group, _)| group.clone())
        .collect();
    for group in groups {
        let was_head = db
            .alternatives_groups()
            .get(&group)
            .and_then(|p| p.first())
            .map(|head| head == pkgname)
            .unwrap_or(false);
        if was_head {
            remove_links(db, pkgname, &group)?;
        }
        let providers = db.alternatives_groups_mut().get_mut(&group).expect("group exists");
        providers.retain(|p| p != pkgname);
        let successor = providers.first().cloned();
        if providers.is_empty() {
            db.alternatives_groups_mut().remove(&group);
        } else if was_head {
            if let Some(successor) = successor {
                debug!(group = %group, successor = %successor, "promoting alternatives successor");
                materialize(db, &successor, &group)?;
            }
        }
    }
    Ok(())
}

/// Promote `pkgname` to head of `group`, or of all groups it
/// participates in when `group` is `None`.
pub fn set(db: &mut PkgDb, pkgname: &str, group: Option<&str>) -> Result<()> {
    let groups: Vec<String> = db
        .alternatives_groups()
        .iter()
        .filter(|(g, providers)| {
            group.map_or(true, |wanted| wanted == g.as_str())
                && providers.iter().any(|p| p == pkgname)
        })
        .map(|(g, _)| g.clone())
        .collect();
    if groups.is_empty() {
        return Err(Error::not_found(match group {
            Some(g) => format!("{pkgname} in group {g}"),
            None => pkgname.to_string(),
        }));
    }
    for group in groups {
        let old_head = db
            .alternatives_groups()
            .get(&group)
            .and_then(|p| p.first())
            .cloned()
            .expect("non-empty group");
        if old_head != pkgname {
            remove_links(db, &old_head, &group)?;
            let providers = db.alternatives_groups_mut().get_mut(&group).expect("group exists");
            providers.retain(|p| p != pkgname);
            providers.insert(0, pkgname.to_string());
        }
        materialize(db, pkgname, &group)?;
    }
    Ok(())
}

/// Enumerate all groups with their candidates; the head is flagged.
pub fn list(db: &PkgDb) -> Vec<(String, Vec<(String, bool)>)> {
    db.alternatives_groups()
        .iter()
        .map(|(group, providers)| {
            let members = providers
                .iter()
                .enumerate()
                .map(|(idx, pkgname)| (pkgname.clone(), idx == 0))
                .collect();
            (group.clone(), members)
        })
        .collect()
}

/// Verify every link `pkgname` is responsible for (as group head).
pub fn check(db: &PkgDb, pkgname: &str) -> Result<Vec<LinkIssue>> {
    let mut issues = Vec::new();
    for (group, providers) in db.alternatives_groups() {
        if providers.first().map(String::as_str) != Some(pkgname) {
            continue;
        }
        for triplet in triplets_of(db, pkgname, group)? {
            let location = link_location(db.rootdir(), &triplet.link);
            let expected = triplet.stored_target();
            let found = std::fs::read_link(&location)
                .ok()
                .map(|t| t.to_string_lossy().into_owned());
            if found.as_deref() != Some(expected.as_str()) {
                issues.push(LinkIssue {
                    group: group.clone(),
                    pkgname: pkgname.to_string(),
                    link: triplet.link.clone(),
                    expected,
                    found,
                });
            }
        }
    }
    Ok(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use valise_core::{PackageRecord, PkgState};

    fn provider(pkgver: &str, group: &str, triplet: &str) -> PackageRecord {
        let mut record = PackageRecord::from_pkgver(pkgver).unwrap();
        record.state = PkgState::Installed;
        record.alternatives.insert(group.into(), vec![triplet.into()]);
        record
    }

    fn read_link(root: &Path, link: &str) -> Option<String> {
        std::fs::read_link(root.join(link.trim_start_matches('/')))
            .ok()
            .map(|t| t.to_string_lossy().into_owned())
    }

    #[test]
    fn relative_target_computation() {
        assert_eq!(
            Triplet::parse("awk:/usr/bin/awk:/usr/bin/gawk").unwrap().stored_target(),
            "gawk"
        );
        assert_eq!(
            Triplet::parse("x:/usr/bin/x:/usr/lib/xalt/x").unwrap().stored_target(),
            "../lib/xalt/x"
        );
        assert_eq!(Triplet::parse("y:/usr/bin/y:relative/y").unwrap().stored_target(), "relative/y");
    }

    #[test]
    fn register_elects_first_provider() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = PkgDb::open_at(&dir.path().join("pkgdb-0.38.plist"), dir.path()).unwrap();
        db.put(provider("gawk-5.0_1", "awk", "awk:/usr/bin/awk:/usr/bin/gawk")).unwrap();
        db.put(provider("mawk-1.3_1", "awk", "awk:/usr/bin/awk:/usr/bin/mawk")).unwrap();

        register(&mut db, "gawk").unwrap();
        register(&mut db, "mawk").unwrap();
        assert_eq!(read_link(dir.path(), "/usr/bin/awk").as_deref(), Some("gawk"));

        let listing = list(&db);
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].1, vec![("gawk".to_string(), true), ("mawk".to_string(), false)]);
    }

    #[test]
    fn set_and_unregister_repoint_links() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = PkgDb::open_at(&dir.path().join("pkgdb-0.38.plist"), dir.path()).unwrap();
        db.put(provider("gawk-5.0_1", "awk", "awk:/usr/bin/awk:/usr/bin/gawk")).unwrap();
        db.put(provider("mawk-1.3_1", "awk", "awk:/usr/bin/awk:/usr/bin/mawk")).unwrap();
        register(&mut db, "gawk").unwrap();
        register(&mut db, "mawk").unwrap();

        set(&mut db, "mawk", Some("awk")).unwrap();
        assert_eq!(read_link(dir.path(), "/usr/bin/awk").as_deref(), Some("mawk"));

        unregister(&mut db, "mawk").unwrap();
        assert_eq!(read_link(dir.path(), "/usr/bin/awk").as_deref(), Some("gawk"));

        unregister(&mut db, "gawk").unwrap();
        assert_eq!(read_link(dir.path(), "/usr/bin/awk"), None);
        assert!(db.alternatives_groups().is_empty());
    }

    #[test]
    fn check_reports_mismatches() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = PkgDb::open_at(&dir.path().join("pkgdb-0.38.plist"), dir.path()).unwrap();
        db.put(provider("gawk-5.0_1", "awk", "awk:/usr/bin/awk:/usr/bin/gawk")).unwrap();
        register(&mut db, "gawk").unwrap();
        assert!(check(&db, "gawk").unwrap().is_empty());

        let link = dir.path().join("usr/bin/awk");
        std::fs::remove_file(&link).unwrap();
        std::os::unix::fs::symlink("busybox", &link).unwrap();
        let issues = check(&db, "gawk").unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].found.as_deref(), Some("busybox"));
    }
}
