//! Package configuration: the post-install hook and its state changes.

use crate::hooks::{run_hook, HookPhase};
use std::collections::BTreeSet;
use tracing::debug;
use valise_core::{pattern_name, pkg_version, Config, Error, EventSink, PkgState, Result};
use valise_pkgdb::PkgDb;

/// Run the `post` hook of an unpacked package and mark it installed.
/// On hook failure the package goes to `broken` and the error is
/// returned so the operator can resolve it; the caller is expected to
/// flush the pkgdb either way.
pub fn configure(
    db: &mut PkgDb,
    config: &Config,
    pkgname: &str,
    update: bool,
    force: bool,
    sink: &dyn EventSink,
) -> Result<()> {
    let record = db
        .records()
        .get(pkgname)
        .ok_or_else(|| Error::not_found(pkgname))?;
    match record.state {
        PkgState::Unpacked => {}
        PkgState::Installed if force => {}
        PkgState::Installed => return Ok(()),
        other => {
            return Err(Error::StateInconsistent {
                message: format!("'{}' is '{other}', cannot configure", record.pkgver),
            });
        }
    }
    let pkgver = record.pkgver.clone();
    let version = pkg_version(&pkgver).unwrap_or("").to_string();
    let hook = config.metadir().join(pkgname).join("INSTALL");
    debug!(pkgver = %pkgver, "configuring");
    match run_hook(&hook, &config.rootdir, HookPhase::Post, pkgname, &version, update, sink) {
        Ok(()) => {
            if db.records().get(pkgname).map(|r| r.state) == Some(PkgState::Unpacked) {
                db.set_state(pkgname, PkgState::Installed)?;
            }
            Ok(())
        }
        Err(err) => {
            db.set_state(pkgname, PkgState::Broken)?;
            Err(err)
        }
    }
}

/// Configure every package stuck in `unpacked`, dependencies before
/// dependents. Progress is by fixed point: a package is configured once
/// all of its in-set dependencies are done.
pub fn configure_all(db: &mut PkgDb, config: &Config, sink: &dyn EventSink) -> Result<usize> {
    let mut pending: BTreeSet<String> = db
        .records()
        .values()
        .filter(|r| r.state == PkgState::Unpacked)
        .map(|r| r.pkgname.clone())
        .collect();
    let mut configured = 0;
    while !pending.is_empty() {
        let ready: Vec<String> = pending
            .iter()
            .filter(|pkgname| {
                let record = &db.records()[*pkgname];
                record.run_depends.iter().all(|pattern| {
                    pattern_name(pattern).map_or(true, |dep| !pending.contains(&dep))
                })
            })
            .cloned()
            .collect();
        // A dependency cycle would stall the fixed point; break it by
        // taking the name-smallest pending package.
        let batch = if ready.is_empty() {
            vec![pending.iter().next().cloned().expect("non-empty pending")]
        } else {
            ready
        };
        for pkgname in batch {
            configure(db, config, &pkgname, false, false, sink)?;
            db.update(true, false)?;
            pending.remove(&pkgname);
            configured += 1;
        }
    }
    Ok(configured)
}
