//! Event sink for progress and state reporting.
//!
//! The planner and unpacker take an explicit sink instead of installing
//! process-global callbacks; front-ends decide how to render events.

use std::fmt;

/// A state event emitted during planning, commit, or checking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A transaction is about to be applied.
    TransactionBegin {
        /// Number of entries.
        entries: usize,
        /// Total bytes to download.
        download_size: u64,
        /// Net installed-size change in bytes.
        installed_size: i64,
    },
    /// Work on one transaction entry started.
    EntryBegin {
        /// Package being acted on.
        pkgver: String,
        /// Action name (`install`, `update`, `remove`, `configure`).
        action: &'static str,
    },
    /// Work on one transaction entry finished.
    EntryDone {
        /// Package acted on.
        pkgver: String,
        /// Action name.
        action: &'static str,
    },
    /// A line of hook output.
    HookOutput {
        /// Package whose hook is running.
        pkgver: String,
        /// Output line, stripped of the trailing newline.
        line: String,
    },
    /// A modified configuration file was preserved.
    ConfigFileKept {
        /// Path of the kept file.
        path: String,
        /// Path the new version was written to.
        new_path: String,
    },
    /// An obsolete path was removed during an update.
    ObsoleteRemoved {
        /// Removed path.
        path: String,
    },
    /// Advisory diagnostic that does not stop the operation.
    Warning {
        /// Message text.
        message: String,
    },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransactionBegin { entries, .. } => {
                write!(f, "{entries} operations queued")
            }
            Self::EntryBegin { pkgver, action } => write!(f, "{action}: {pkgver} ..."),
            Self::EntryDone { pkgver, action } => write!(f, "{action}: {pkgver} done"),
            Self::HookOutput { pkgver, line } => write!(f, "[{pkgver}] {line}"),
            Self::ConfigFileKept { path, new_path } => {
                write!(f, "keeping modified '{path}' (new version at '{new_path}')")
            }
            Self::ObsoleteRemoved { path } => write!(f, "removed obsolete '{path}'"),
            Self::Warning { message } => write!(f, "warning: {message}"),
        }
    }
}

/// Receiver for state events.
pub trait EventSink: Send + Sync {
    /// Handle one event. Implementations must not panic.
    fn emit(&self, event: &Event);
}

/// Sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &Event) {}
}

/// Sink forwarding every event to a closure.
pub struct FnSink<F>(pub F);

impl<F> std::fmt::Debug for FnSink<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSink").finish_non_exhaustive()
    }
}

impl<F: Fn(&Event) + Send + Sync> EventSink for FnSink<F> {
    fn emit(&self, event: &Event) {
        (self.0)(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn closure_sink_collects() {
        let seen = Mutex::new(Vec::new());
        let sink = FnSink(|event: &Event| seen.lock().unwrap().push(event.clone()));
        sink.emit(&Event::Warning { message: "shlib unresolved".into() });
        sink.emit(&Event::ObsoleteRemoved { path: "/usr/lib/old.so".into() });
        drop(sink);
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].to_string().contains("shlib unresolved"));
    }
}
