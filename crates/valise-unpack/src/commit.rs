//! Applying a planned transaction.

use crate::configure::configure;
use crate::extract::unpack_entry;
use crate::remove::remove_package;
use tracing::{debug, info};
use valise_core::{Config, Event, EventSink, Result};
use valise_pkgdb::{alternatives, PkgDb};
use valise_resolver::{Transaction, TransactionAction};

/// Commit behavior flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitFlags {
    /// Weaken configuration-file preservation and content checks.
    pub force: bool,
    /// Remove actions also purge configuration files and records.
    pub purge: bool,
}

/// Apply a transaction entry by entry, in planner order.
///
/// The pkgdb lock is held for the whole commit. The database is flushed
/// after every successful entry, so an interruption leaves a consistent
/// prefix; the transaction is never rolled back.
pub fn commit(
    db: &mut PkgDb,
    config: &Config,
    transaction: &Transaction,
    flags: &CommitFlags,
    sink: &dyn EventSink,
) -> Result<()> {
    if transaction.is_empty() {
        debug!("empty transaction, nothing to commit");
        return Ok(());
    }
    db.lock()?;
    sink.emit(&Event::TransactionBegin {
        entries: transaction.entries.len(),
        download_size: transaction.total_download_size,
        installed_size: transaction.total_installed_size,
    });
    let result = apply_entries(db, config, transaction, flags, sink);
    db.unlock();
    result
}

fn apply_entries(
    db: &mut PkgDb,
    config: &Config,
    transaction: &Transaction,
    flags: &CommitFlags,
    sink: &dyn EventSink,
) -> Result<()> {
    for entry in &transaction.entries {
        let pkgver = entry.record.pkgver.clone();
        let pkgname = entry.record.pkgname.clone();
        let action = entry.action.as_str();
        sink.emit(&Event::EntryBegin { pkgver: pkgver.clone(), action });
        match entry.action {
            TransactionAction::Install | TransactionAction::Update => {
                let record = unpack_entry(db, config, entry, sink)?;
                db.put(record)?;
                alternatives::register(db, &pkgname)?;
                // Flush the unpacked state first: a crash between here
                // and configure leaves a resumable `unpacked` record.
                db.update(true, false)?;
                let configure_result =
                    configure(db, config, &pkgname, entry.previous.is_some(), false, sink);
                db.update(true, false)?;
                configure_result?;
            }
            TransactionAction::Remove => {
                remove_package(db, config, &pkgname, flags.purge, flags.force, sink)?;
                db.update(true, false)?;
            }
            TransactionAction::Configure => {
                let configure_result = configure(db, config, &pkgname, false, true, sink);
                db.update(true, false)?;
                configure_result?;
            }
            TransactionAction::Hold => {
                if let Some(record) = db.get_mut(&pkgname) {
                    record.hold = entry.record.hold;
                }
                db.update(true, false)?;
            }
        }
        sink.emit(&Event::EntryDone { pkgver: pkgver.clone(), action });
        info!(pkgver = %pkgver, action, "entry committed");
    }
    Ok(())
}
