//! The transaction record: ordered actions the unpacker applies.

use std::path::PathBuf;
use valise_core::PackageRecord;
use valise_plist::{pkg_to_value, Value};

/// What an entry does to its package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionAction {
    /// Extract and configure a package that is not installed.
    Install,
    /// Replace an installed version with a different one.
    Update,
    /// Remove an installed package.
    Remove,
    /// Re-run the post-install hook of an unpacked package.
    Configure,
    /// Toggle the hold flag.
    Hold,
}

impl TransactionAction {
    /// On-disk / user-facing action name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Update => "update",
            Self::Remove => "remove",
            Self::Configure => "configure",
            Self::Hold => "hold",
        }
    }
}

impl std::fmt::Display for TransactionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One package action within a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionEntry {
    /// The package record acted on. For install/update this is the
    /// incoming record; for remove, the installed one.
    pub record: PackageRecord,
    /// Action kind.
    pub action: TransactionAction,
    /// Originating repository URL, for install/update.
    pub repository: Option<String>,
    /// Resolved local archive path or fetch URL.
    pub archive_path: Option<PathBuf>,
    /// pkgver previously installed, for updates.
    pub previous: Option<String>,
    /// For removes caused by a `replaces` relation: the replacement's
    /// pkgver.
    pub replaced_by: Option<String>,
    /// Pulled in by dependency expansion rather than by request.
    pub automatic: bool,
    /// Compressed archive size in bytes.
    pub download_size: u64,
}

impl TransactionEntry {
    pub(crate) fn new(record: PackageRecord, action: TransactionAction) -> Self {
        let download_size = record.filename_size;
        Self {
            record,
            action,
            repository: None,
            archive_path: None,
            previous: None,
            replaced_by: None,
            automatic: false,
            download_size,
        }
    }
}

/// An ordered transaction plus its computed totals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    /// Entries in application order.
    pub entries: Vec<TransactionEntry>,
    /// Net change of installed size in bytes.
    pub total_installed_size: i64,
    /// Total bytes to download.
    pub total_download_size: u64,
}

impl Transaction {
    /// Whether the transaction performs no actions.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recompute the size totals from the entries.
    pub(crate) fn compute_sizes(&mut self) {
        let mut installed: i64 = 0;
        let mut download: u64 = 0;
        for entry in &self.entries {
            match entry.action {
                TransactionAction::Install | TransactionAction::Update => {
                    installed += entry.record.installed_size as i64;
                    download += entry.download_size;
                }
                TransactionAction::Remove => {
                    installed -= entry.record.installed_size as i64;
                }
                TransactionAction::Configure | TransactionAction::Hold => {}
            }
        }
        self.total_installed_size = installed;
        self.total_download_size = download;
    }

    /// Serialize the transaction as a structured document, the form
    /// used by `--dry-run` output and by tooling that inspects plans.
    pub fn to_value(&self) -> Value {
        let mut entries = Value::seq();
        for entry in &self.entries {
            let mut map = pkg_to_value(&entry.record);
            map.insert("transaction", Value::from(entry.action.as_str()));
            if let Some(repository) = &entry.repository {
                map.insert("repository", Value::from(repository.as_str()));
            }
            if let Some(path) = &entry.archive_path {
                map.insert("archive-path", Value::from(path.to_string_lossy().as_ref()));
            }
            if let Some(previous) = &entry.previous {
                map.insert("previous-pkgver", Value::from(previous.as_str()));
            }
            if let Some(replaced_by) = &entry.replaced_by {
                map.insert("replaced-by", Value::from(replaced_by.as_str()));
            }
            if entry.automatic {
                map.insert("automatic-install", Value::from(true));
            }
            entries.push(map);
        }
        let mut root = Value::map();
        root.insert("packages", entries);
        root.insert("total-installed-size", Value::Int(self.total_installed_size));
        root.insert("total-download-size", Value::from(self.total_download_size));
        root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_are_net() {
        let mut old = PackageRecord::from_pkgver("old-1.0_1").unwrap();
        old.installed_size = 700;
        let mut new = PackageRecord::from_pkgver("new-1.0_1").unwrap();
        new.installed_size = 1000;
        new.filename_size = 300;

        let mut txn = Transaction::default();
        txn.entries.push(TransactionEntry::new(old, TransactionAction::Remove));
        txn.entries.push(TransactionEntry::new(new, TransactionAction::Install));
        txn.compute_sizes();
        assert_eq!(txn.total_installed_size, 300);
        assert_eq!(txn.total_download_size, 300);
    }

    #[test]
    fn document_form_carries_annotations() {
        let record = PackageRecord::from_pkgver("gawk-5.0_1").unwrap();
        let mut entry = TransactionEntry::new(record, TransactionAction::Install);
        entry.repository = Some("file:/repo".into());
        entry.automatic = true;
        let txn = Transaction { entries: vec![entry], ..Transaction::default() };
        let doc = txn.to_value();
        let packages = doc.get_seq("packages").unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].get_str("transaction"), Some("install"));
        assert_eq!(packages[0].get_str("repository"), Some("file:/repo"));
        assert!(packages[0].get_bool("automatic-install"));
    }
}
