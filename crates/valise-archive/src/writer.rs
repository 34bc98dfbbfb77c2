//! Archive write side.

use crate::format::Compression;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use valise_core::{Error, Result};

enum Encoder {
    Plain(File),
    Gzip(flate2::write::GzEncoder<File>),
    Bzip2(bzip2::write::BzEncoder<File>),
    Xz(xz2::write::XzEncoder<File>),
    Zstd(zstd::stream::write::Encoder<'static, File>),
}

impl Write for Encoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Gzip(w) => w.write(buf),
            Self::Bzip2(w) => w.write(buf),
            Self::Xz(w) => w.write(buf),
            Self::Zstd(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Gzip(w) => w.flush(),
            Self::Bzip2(w) => w.flush(),
            Self::Xz(w) => w.flush(),
            Self::Zstd(w) => w.flush(),
        }
    }
}

impl Encoder {
    fn finish(self) -> io::Result<File> {
        match self {
            Self::Plain(w) => Ok(w),
            Self::Gzip(w) => w.finish(),
            Self::Bzip2(w) => w.finish(),
            Self::Xz(w) => w.finish(),
            Self::Zstd(w) => w.finish(),
        }
    }
}

/// A package archive being written.
///
/// Entries are emitted in append order with normalized ownership
/// (`root:root`) and, when `SOURCE_DATE_EPOCH` is set, normalized
/// timestamps, so identical inputs produce byte-identical archives.
pub struct ArchiveWriter {
    builder: tar::Builder<Encoder>,
    path: PathBuf,
    /// (device, inode) -> archive path of the first occurrence; later
    /// occurrences become tar hardlink entries.
    inodes: HashMap<(u64, u64), String>,
    epoch: Option<u64>,
}

impl std::fmt::Debug for ArchiveWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveWriter").field("path", &self.path).finish_non_exhaustive()
    }
}

impl ArchiveWriter {
    /// Create an archive at `path` with the given compression; `level`
    /// defaults to the format's standard level (zstd 9).
    pub fn create(path: &Path, compression: Compression, level: Option<i32>) -> Result<Self> {
        let file = File::create(path).map_err(|e| Error::fs(path, e))?;
        let level = level.unwrap_or_else(|| compression.default_level());
        let encoder = match compression {
            Compression::Plain => Encoder::Plain(file),
            Compression::Gzip => Encoder::Gzip(flate2::write::GzEncoder::new(
                file,
                flate2::Compression::new(level as u32),
            )),
            Compression::Bzip2 => Encoder::Bzip2(bzip2::write::BzEncoder::new(
                file,
                bzip2::Compression::new(level as u32),
            )),
            Compression::Xz => Encoder::Xz(xz2::write::XzEncoder::new(file, level as u32)),
            Compression::Zstd => Encoder::Zstd(
                zstd::stream::write::Encoder::new(file, level).map_err(|e| Error::fs(path, e))?,
            ),
        };
        debug!(path = %path.display(), ?compression, level, "creating archive");
        let epoch = std::env::var("SOURCE_DATE_EPOCH").ok().and_then(|v| v.parse().ok());
        Ok(Self {
            builder: tar::Builder::new(encoder),
            path: path.to_path_buf(),
            inodes: HashMap::new(),
            epoch,
        })
    }

    fn member_name(name: &str) -> String {
        if name.starts_with("./") {
            name.to_string()
        } else {
            format!("./{}", name.trim_start_matches('/'))
        }
    }

    fn base_header(&self, mode: u32, size: u64) -> tar::Header {
        let mut header = tar::Header::new_ustar();
        header.set_mode(mode);
        header.set_size(size);
        header.set_uid(0);
        header.set_gid(0);
        let _ = header.set_username("root");
        let _ = header.set_groupname("root");
        header.set_mtime(self.epoch.unwrap_or(0));
        header
    }

    /// Append an in-memory buffer as a regular file member.
    pub fn append_buffer(&mut self, name: &str, bytes: &[u8], mode: u32) -> Result<()> {
        let member = Self::member_name(name);
        trace!(member = %member, size = bytes.len(), "appending buffer");
        let mut header = self.base_header(mode, bytes.len() as u64);
        header.set_entry_type(tar::EntryType::Regular);
        self.builder
            .append_data(&mut header, &member, bytes)
            .map_err(|e| Error::fs(&self.path, e))
    }

    /// Append a filesystem path as a member named `name`.
    ///
    /// Regular files with a link count above one are linkified: the
    /// second and later occurrences of an inode become tar hardlink
    /// entries pointing at the first.
    pub fn append_path(&mut self, source: &Path, name: &str) -> Result<()> {
        #[cfg(unix)]
        use std::os::unix::fs::MetadataExt;

        let member = Self::member_name(name);
        let meta = std::fs::symlink_metadata(source).map_err(|e| Error::fs(source, e))?;
        let mtime = self.normalized_mtime(&meta);

        if meta.file_type().is_symlink() {
            let target = std::fs::read_link(source).map_err(|e| Error::fs(source, e))?;
            let mut header = self.base_header(0o777, 0);
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_mtime(mtime);
            self.builder
                .append_link(&mut header, &member, &target)
                .map_err(|e| Error::fs(&self.path, e))?;
            return Ok(());
        }
        if meta.is_dir() {
            let mut header = self.base_header(meta.permissions_mode(), 0);
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mtime(mtime);
            self.builder
                .append_data(&mut header, format!("{member}/"), io::empty())
                .map_err(|e| Error::fs(&self.path, e))?;
            return Ok(());
        }

        #[cfg(unix)]
        if meta.nlink() > 1 {
            let key = (meta.dev(), meta.ino());
            if let Some(first) = self.inodes.get(&key).cloned() {
                trace!(member = %member, link = %first, "linkifying hardlink");
                let mut header = self.base_header(meta.permissions_mode(), 0);
                header.set_entry_type(tar::EntryType::Link);
                header.set_mtime(mtime);
                self.builder
                    .append_link(&mut header, &member, &first)
                    .map_err(|e| Error::fs(&self.path, e))?;
                return Ok(());
            }
            self.inodes.insert(key, member.clone());
        }

        let mut header = self.base_header(meta.permissions_mode(), meta.len());
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mtime(mtime);
        let file = File::open(source).map_err(|e| Error::fs(source, e))?;
        self.builder
            .append_data(&mut header, &member, file)
            .map_err(|e| Error::fs(&self.path, e))
    }

    fn normalized_mtime(&self, meta: &std::fs::Metadata) -> u64 {
        let actual = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());
        match self.epoch {
            Some(epoch) => actual.min(epoch),
            None => actual,
        }
    }

    /// Flush the tar stream and finalize the compressor.
    pub fn finish(self) -> Result<()> {
        let encoder = self.builder.into_inner().map_err(|e| Error::fs(&self.path, e))?;
        let file = encoder.finish().map_err(|e| Error::fs(&self.path, e))?;
        file.sync_all().map_err(|e| Error::fs(&self.path, e))?;
        debug!(path = %self.path.display(), "archive finished");
        Ok(())
    }
}

trait PermissionsModeExt {
    fn permissions_mode(&self) -> u32;
}

impl PermissionsModeExt for std::fs::Metadata {
    #[cfg(unix)]
    fn permissions_mode(&self) -> u32 {
        use std::os::unix::fs::PermissionsExt;
        self.permissions().mode() & 0o7777
    }

    #[cfg(not(unix))]
    fn permissions_mode(&self) -> u32 {
        0o644
    }
}
