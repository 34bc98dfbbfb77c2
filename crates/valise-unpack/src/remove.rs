//! Package removal and purge.

use crate::hooks::{run_hook, HookPhase};
use crate::{hash_file, rooted};
use std::path::Path;
use tracing::{debug, warn};
use valise_core::{
    glob_match, pkg_version, Config, Error, Event, EventSink, PkgState, Result,
};
use valise_pkgdb::{alternatives, PkgDb};

/// Remove an installed package.
///
/// The default removal keeps modified configuration files and leaves the
/// record in `config-files` state when any survive. `purge` also drops
/// configuration files (modified ones only with `force`) and deletes the
/// record and its metadata directory. A package with `preserve` set is
/// never touched: its files stay and its record stays.
pub fn remove_package(
    db: &mut PkgDb,
    config: &Config,
    pkgname: &str,
    purge: bool,
    force: bool,
    sink: &dyn EventSink,
) -> Result<()> {
    let record = db
        .records()
        .get(pkgname)
        .cloned()
        .ok_or_else(|| Error::not_found(pkgname))?;
    if record.preserve {
        sink.emit(&Event::Warning {
            message: format!("'{}' is preserved, leaving files and record", record.pkgver),
        });
        return Ok(());
    }
    debug!(pkgver = %record.pkgver, purge, "removing package");

    let metadir_pkg = config.metadir().join(pkgname);
    let hook = metadir_pkg.join("REMOVE");
    let version = pkg_version(&record.pkgver).unwrap_or("").to_string();
    run_hook(&hook, &config.rootdir, HookPhase::Pre, pkgname, &version, false, sink)?;

    let preserved =
        |path: &str| config.preserved_files.iter().any(|pattern| glob_match(pattern, path));

    // Regular files: modified content is kept unless forced.
    for file in &record.files {
        if preserved(&file.path) {
            continue;
        }
        let dest = rooted(&config.rootdir, &file.path);
        if !file.mutable && !force {
            match hash_file(&dest) {
                Ok(disk_hash) if disk_hash != file.sha256 => {
                    warn!(path = %file.path, "content mismatch, keeping file");
                    continue;
                }
                Err(_) => continue,
                Ok(_) => {}
            }
        }
        remove_if_present(&dest)?;
    }
    for link in &record.links {
        if !preserved(&link.path) {
            remove_if_present(&rooted(&config.rootdir, &link.path))?;
        }
    }

    // Configuration files only go away on purge.
    let mut kept_conf = false;
    for conf in &record.conf_files {
        if preserved(&conf.path) {
            kept_conf = true;
            continue;
        }
        let dest = rooted(&config.rootdir, &conf.path);
        if !dest.exists() {
            continue;
        }
        if !purge {
            kept_conf = true;
            continue;
        }
        let modified = hash_file(&dest).map(|h| h != conf.sha256).unwrap_or(false);
        if modified && !force {
            sink.emit(&Event::Warning {
                message: format!("keeping modified configuration file '{}'", conf.path),
            });
            kept_conf = true;
            continue;
        }
        remove_if_present(&dest)?;
    }

    // Directories last, deepest first, only when empty.
    let mut dirs = record.dirs.clone();
    dirs.sort_by_key(|d| std::cmp::Reverse(d.len()));
    for dir in &dirs {
        let _ = std::fs::remove_dir(rooted(&config.rootdir, dir));
    }

    alternatives::unregister(db, pkgname)?;

    if purge {
        run_hook(&hook, &config.rootdir, HookPhase::Purge, pkgname, &version, false, sink)?;
        if metadir_pkg.is_dir() {
            std::fs::remove_dir_all(&metadir_pkg).map_err(|e| Error::fs(&metadir_pkg, e))?;
        }
        db.remove(pkgname);
        return Ok(());
    }
    if kept_conf {
        db.set_state(pkgname, PkgState::ConfigFiles)?;
    } else {
        if metadir_pkg.is_dir() {
            std::fs::remove_dir_all(&metadir_pkg).map_err(|e| Error::fs(&metadir_pkg, e))?;
        }
        db.remove(pkgname);
    }
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(Error::fs(path, err)),
    }
}
