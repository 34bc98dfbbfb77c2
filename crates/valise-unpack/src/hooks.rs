//! Install/remove hook execution.
//!
//! Hooks run as synchronous child processes with the working directory
//! set to the root directory, a scrubbed environment, and the argv
//! convention `<phase> <pkgname> <version> [update]`. Output is piped
//! line by line to the event sink.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;
use valise_core::{Error, Event, EventSink, Result};

/// Environment variables hooks are allowed to inherit.
const ENV_ALLOWLIST: &[&str] = &["PATH", "HOME", "TMPDIR", "LANG", "LC_ALL", "TERM"];

/// Hook invocation phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    /// Before extraction (install) or before file removal (remove).
    Pre,
    /// After extraction, the configure step.
    Post,
    /// After a purge removed everything else.
    Purge,
}

impl HookPhase {
    /// argv form of the phase.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pre => "pre",
            Self::Post => "post",
            Self::Purge => "purge",
        }
    }
}

/// Run a hook script. Missing scripts succeed trivially; a non-zero
/// exit becomes [`Error::HookFailed`] with the captured output.
pub fn run_hook(
    script: &Path,
    rootdir: &Path,
    phase: HookPhase,
    pkgname: &str,
    version: &str,
    update: bool,
    sink: &dyn EventSink,
) -> Result<()> {
    if !script.is_file() {
        return Ok(());
    }
    debug!(script = %script.display(), phase = phase.as_str(), pkgname, "running hook");
    let mut command = Command::new(script);
    command
        .arg(phase.as_str())
        .arg(pkgname)
        .arg(version)
        .current_dir(rootdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env_clear();
    if update {
        command.arg("update");
    }
    for key in ENV_ALLOWLIST {
        if let Ok(value) = std::env::var(key) {
            command.env(key, value);
        }
    }

    let mut child = command.spawn().map_err(|e| Error::fs(script, e))?;
    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");
    let pkgver = format!("{pkgname}-{version}");
    let mut captured = String::new();

    std::thread::scope(|scope| {
        let out_lines = scope.spawn(|| read_lines(stdout));
        let err_lines = scope.spawn(|| read_lines(stderr));
        for line in out_lines.join().unwrap_or_default() {
            sink.emit(&Event::HookOutput { pkgver: pkgver.clone(), line: line.clone() });
            captured.push_str(&line);
            captured.push('\n');
        }
        for line in err_lines.join().unwrap_or_default() {
            sink.emit(&Event::HookOutput { pkgver: pkgver.clone(), line: line.clone() });
            captured.push_str(&line);
            captured.push('\n');
        }
    });

    let status = child.wait().map_err(|e| Error::fs(script, e))?;
    if status.success() {
        return Ok(());
    }
    Err(Error::HookFailed {
        pkgver,
        phase: phase.as_str().to_string(),
        status: status.code().unwrap_or(-1),
        output: captured,
    })
}

fn read_lines(reader: impl std::io::Read) -> Vec<String> {
    BufReader::new(reader).lines().map_while(std::result::Result::ok).collect()
}
