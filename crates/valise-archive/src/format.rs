//! Compression format detection and defaults.

use std::path::Path;
use valise_core::{Error, Result};

/// Compression applied around the tar stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Uncompressed tar.
    Plain,
    /// gzip (deflate).
    Gzip,
    /// bzip2.
    Bzip2,
    /// xz (lzma2).
    Xz,
    /// zstandard, the default for published packages.
    #[default]
    Zstd,
}

/// lz4 frame magic; the format is recognized so the error names it.
const LZ4_MAGIC: [u8; 4] = [0x04, 0x22, 0x4d, 0x18];

impl Compression {
    /// Parse a user-facing format name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "none" | "plain" => Some(Self::Plain),
            "gzip" => Some(Self::Gzip),
            "bzip2" => Some(Self::Bzip2),
            "xz" => Some(Self::Xz),
            "zstd" => Some(Self::Zstd),
            _ => None,
        }
    }

    /// Short name used in file extensions and diagnostics.
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Plain => "tar",
            Self::Gzip => "gz",
            Self::Bzip2 => "bz2",
            Self::Xz => "xz",
            Self::Zstd => "zst",
        }
    }

    /// Default compression level for the write side.
    pub const fn default_level(self) -> i32 {
        match self {
            Self::Plain => 0,
            Self::Gzip | Self::Bzip2 => 6,
            Self::Xz => 6,
            Self::Zstd => 9,
        }
    }

    /// Detect the compression from the first bytes of a stream.
    ///
    /// Anything that does not carry a known compression magic is treated
    /// as an uncompressed tar; the tar layer reports real corruption.
    pub fn detect(magic: &[u8]) -> Result<Self> {
        if magic.starts_with(&[0x1f, 0x8b]) {
            Ok(Self::Gzip)
        } else if magic.starts_with(b"BZh") {
            Ok(Self::Bzip2)
        } else if magic.starts_with(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]) {
            Ok(Self::Xz)
        } else if magic.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Ok(Self::Zstd)
        } else if magic.starts_with(&LZ4_MAGIC) {
            Err(Error::parse("archive", "lz4-compressed archives are not supported"))
        } else {
            Ok(Self::Plain)
        }
    }

    /// Detect the compression of a file by reading its magic.
    pub fn detect_path(path: &Path) -> Result<Self> {
        use std::io::Read;
        let mut file = std::fs::File::open(path).map_err(|e| Error::fs(path, e))?;
        let mut magic = [0u8; 6];
        let n = file.read(&mut magic).map_err(|e| Error::fs(path, e))?;
        Self::detect(&magic[..n])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_detection() {
        assert_eq!(Compression::detect(&[0x1f, 0x8b, 0x08]).unwrap(), Compression::Gzip);
        assert_eq!(Compression::detect(b"BZh91AY").unwrap(), Compression::Bzip2);
        assert_eq!(
            Compression::detect(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]).unwrap(),
            Compression::Xz
        );
        assert_eq!(Compression::detect(&[0x28, 0xb5, 0x2f, 0xfd]).unwrap(), Compression::Zstd);
        assert_eq!(Compression::detect(b"ustar").unwrap(), Compression::Plain);
        assert!(Compression::detect(&[0x04, 0x22, 0x4d, 0x18]).is_err());
    }

    #[test]
    fn name_parsing() {
        assert_eq!(Compression::parse("zstd"), Some(Compression::Zstd));
        assert_eq!(Compression::parse("none"), Some(Compression::Plain));
        assert_eq!(Compression::parse("lzip"), None);
        assert_eq!(Compression::Zstd.default_level(), 9);
    }
}
