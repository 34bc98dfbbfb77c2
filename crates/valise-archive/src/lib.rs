//! Streamed archive I/O for binary packages.
//!
//! A binary package is a tar archive compressed with one of
//! `{none, gzip, bzip2, xz, zstd}` (zstd at level 9 by default). The
//! reader auto-detects the compression from the stream magic; the writer
//! supports appending files from disk as well as raw in-memory buffers
//! (used to stage synthesized `props.plist`/`files.plist` members), and
//! resolves hardlinks through an inode map.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod format;
mod reader;
mod writer;

pub use format::Compression;
pub use reader::ArchiveReader;
pub use writer::ArchiveWriter;

/// Archive member holding the canonical package record.
pub const PROPS_PLIST: &str = "props.plist";
/// Archive member holding the file manifest.
pub const FILES_PLIST: &str = "files.plist";
/// Optional executable install hook member.
pub const INSTALL_HOOK: &str = "INSTALL";
/// Optional executable remove hook member.
pub const REMOVE_HOOK: &str = "REMOVE";

/// Strip the `./` prefix tar members are stored with.
pub(crate) fn normalize_member(name: &str) -> &str {
    name.strip_prefix("./").unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Read;

    fn build_archive(dir: &std::path::Path, compression: Compression) -> std::path::PathBuf {
        let path = dir.join(format!("pkg.{}.xbps", compression.extension()));
        let mut writer = ArchiveWriter::create(&path, compression, None).unwrap();
        let mut props = valise_plist::Value::map();
        props.insert("pkgver", valise_plist::Value::from("demo-1.0_1"));
        writer
            .append_buffer(PROPS_PLIST, &valise_plist::to_bytes(&props), 0o644)
            .unwrap();
        writer.append_buffer("usr/bin/demo", b"#!/bin/sh\nexit 0\n", 0o755).unwrap();
        writer.finish().unwrap();
        path
    }

    #[test]
    fn roundtrip_each_compression() {
        let dir = tempfile::tempdir().unwrap();
        for compression in [
            Compression::Plain,
            Compression::Gzip,
            Compression::Bzip2,
            Compression::Xz,
            Compression::Zstd,
        ] {
            let path = build_archive(dir.path(), compression);
            let detected = Compression::detect_path(&path).unwrap();
            assert_eq!(detected, compression, "{compression:?}");

            let body = ArchiveReader::read_member(&path, "usr/bin/demo").unwrap().unwrap();
            assert_eq!(body, b"#!/bin/sh\nexit 0\n");

            let props = ArchiveReader::read_member_document(&path, PROPS_PLIST).unwrap();
            assert_eq!(props.get_str("pkgver"), Some("demo-1.0_1"));
        }
    }

    #[test]
    fn entries_iterate_in_archive_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = build_archive(dir.path(), Compression::Zstd);
        let mut reader = ArchiveReader::open(&path).unwrap();
        let mut names = Vec::new();
        for entry in reader.entries().unwrap() {
            let mut entry = entry.unwrap();
            names.push(entry.path().unwrap().display().to_string());
            // Bodies must be readable during streaming iteration.
            let mut sink = Vec::new();
            entry.read_to_end(&mut sink).unwrap();
        }
        assert_eq!(names, ["./props.plist", "./usr/bin/demo"]);
    }

    #[test]
    fn missing_member_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = build_archive(dir.path(), Compression::Gzip);
        assert!(ArchiveReader::read_member(&path, "no/such/member").unwrap().is_none());
    }
}
