//! Structured document store.
//!
//! Documents are heterogeneous typed trees persisted as XML property
//! lists. Writers build a [`Value`]; readers pattern-match on it. The
//! schema is open-ended by design: unknown keys survive a load/store
//! cycle untouched.
//!
//! Externalization is atomic (write temp file, fsync, rename) and map
//! keys are emitted in sorted order so identical documents produce
//! byte-identical files. Internalization transparently decompresses
//! gzip-streamed input.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod record;
mod value;
mod xml;

pub use record::{manifest_from_value, manifest_to_value, pkg_from_value, pkg_to_value, FileManifest};
pub use value::Value;

use std::io::Write;
use std::path::Path;
use tracing::{debug, trace};
use valise_core::{Error, Result};

/// Gzip stream magic.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Serialize a document to plist bytes.
pub fn to_bytes(value: &Value) -> Vec<u8> {
    xml::emit(value)
}

/// Parse a document from plist bytes, decompressing gzip input.
pub fn from_bytes(bytes: &[u8]) -> Result<Value> {
    if bytes.starts_with(&GZIP_MAGIC) {
        let mut decoder = flate2::read::GzDecoder::new(bytes);
        let mut plain = Vec::new();
        std::io::Read::read_to_end(&mut decoder, &mut plain)
            .map_err(|e| Error::parse("gzip document", e.to_string()))?;
        return xml::parse(&plain);
    }
    xml::parse(bytes)
}

/// Write a document to `path` atomically: temp file in the same
/// directory, fsync, rename over the target.
pub fn externalize(value: &Value, path: &Path) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| Error::fs(parent, e))?;
    let bytes = to_bytes(value);
    let mut temp =
        tempfile::NamedTempFile::new_in(parent).map_err(|e| Error::fs(parent, e))?;
    temp.write_all(&bytes).map_err(|e| Error::fs(temp.path(), e))?;
    temp.as_file().sync_all().map_err(|e| Error::fs(temp.path(), e))?;
    temp.persist(path).map_err(|e| Error::fs(path, e.error))?;
    debug!(path = %path.display(), bytes = bytes.len(), "externalized document");
    Ok(())
}

/// Read a document from `path`; gzip-compressed files are accepted.
pub fn internalize(path: &Path) -> Result<Value> {
    let bytes = std::fs::read(path).map_err(|e| Error::fs(path, e))?;
    trace!(path = %path.display(), bytes = bytes.len(), "internalizing document");
    from_bytes(&bytes)
}
