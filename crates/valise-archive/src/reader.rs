//! Archive read side.

use crate::format::Compression;
use crate::normalize_member;
use std::io::Read;
use std::path::Path;
use tracing::trace;
use valise_core::{Error, Result};
use valise_plist::Value;

/// A package archive opened for streamed reading.
///
/// Entries are visited strictly in archive order; each entry's body must
/// be consumed (or skipped) before advancing.
pub struct ArchiveReader {
    archive: tar::Archive<Box<dyn Read>>,
}

impl std::fmt::Debug for ArchiveReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveReader").finish_non_exhaustive()
    }
}

impl ArchiveReader {
    /// Open `path`, auto-detecting the compression from its magic.
    pub fn open(path: &Path) -> Result<Self> {
        let compression = Compression::detect_path(path)?;
        let file = std::fs::File::open(path).map_err(|e| Error::fs(path, e))?;
        trace!(path = %path.display(), ?compression, "opening archive");
        let stream: Box<dyn Read> = match compression {
            Compression::Plain => Box::new(file),
            Compression::Gzip => Box::new(flate2::read::GzDecoder::new(file)),
            Compression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(file)),
            Compression::Xz => Box::new(xz2::read::XzDecoder::new(file)),
            Compression::Zstd => Box::new(
                zstd::stream::read::Decoder::new(file).map_err(|e| Error::fs(path, e))?,
            ),
        };
        Ok(Self { archive: tar::Archive::new(stream) })
    }

    /// Iterate the entries in archive order.
    pub fn entries(&mut self) -> Result<tar::Entries<'_, Box<dyn Read>>> {
        self.archive
            .entries()
            .map_err(|e| Error::parse("archive", e.to_string()))
    }

    /// Read the body of the named member, or `None` if absent.
    ///
    /// The member name is compared with the `./` prefix normalized away.
    pub fn read_member(path: &Path, name: &str) -> Result<Option<Vec<u8>>> {
        let wanted = normalize_member(name);
        let mut reader = Self::open(path)?;
        for entry in reader.entries()? {
            let mut entry = entry.map_err(|e| Error::parse("archive", e.to_string()))?;
            let entry_path = entry.path().map_err(|e| Error::parse("archive", e.to_string()))?;
            let entry_name = entry_path.to_string_lossy().into_owned();
            if normalize_member(&entry_name) == wanted {
                let mut body = Vec::with_capacity(entry.size() as usize);
                entry
                    .read_to_end(&mut body)
                    .map_err(|e| Error::parse("archive", e.to_string()))?;
                return Ok(Some(body));
            }
        }
        Ok(None)
    }

    /// Read the named member as a structured document.
    pub fn read_member_document(path: &Path, name: &str) -> Result<Value> {
        let body = Self::read_member(path, name)?.ok_or_else(|| {
            Error::parse("archive", format!("member '{name}' missing from {}", path.display()))
        })?;
        valise_plist::from_bytes(&body)
    }
}
