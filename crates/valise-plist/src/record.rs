//! Package record <-> document conversion.
//!
//! The on-disk key set follows the established index format:
//! dashed keys (`automatic-install`, `shlib-provides`), file manifests as
//! arrays of dicts keyed by `file`. Unknown keys are ignored on read;
//! the pkgdb cleanup pass is the one place that edits them.

use crate::value::Value;
use valise_core::{pkg_name, Error, FileEntry, LinkEntry, PackageRecord, PkgState, Result};

fn file_entry_to_value(entry: &FileEntry) -> Value {
    let mut map = Value::map();
    map.insert("file", Value::from(entry.path.as_str()));
    if !entry.sha256.is_empty() {
        map.insert("sha256", Value::from(entry.sha256.as_str()));
    }
    map.insert("size", Value::from(entry.size));
    if entry.mutable {
        map.insert("mutable", Value::from(true));
    }
    map
}

fn file_entry_from_value(value: &Value) -> Option<FileEntry> {
    Some(FileEntry {
        path: value.get_str("file")?.to_string(),
        sha256: value.get_str("sha256").unwrap_or_default().to_string(),
        size: value.get_int("size").unwrap_or(0) as u64,
        mutable: value.get_bool("mutable"),
    })
}

/// Convert a package record into its document form.
pub fn pkg_to_value(record: &PackageRecord) -> Value {
    let mut map = Value::map();
    map.insert("pkgver", Value::from(record.pkgver.as_str()));
    map.insert("architecture", Value::from(record.architecture.as_str()));
    map.insert("state", Value::from(record.state.as_str()));
    if record.automatic_install {
        map.insert("automatic-install", Value::from(true));
    }
    if record.hold {
        map.insert("hold", Value::from(true));
    }
    if record.repolock {
        map.insert("repolock", Value::from(true));
    }
    if record.preserve {
        map.insert("preserve", Value::from(true));
    }
    if let Some(repository) = &record.repository {
        map.insert("repository", Value::from(repository.as_str()));
    }
    if !record.short_desc.is_empty() {
        map.insert("short_desc", Value::from(record.short_desc.as_str()));
    }
    if record.installed_size > 0 {
        map.insert("installed_size", Value::from(record.installed_size));
    }
    if record.filename_size > 0 {
        map.insert("filename-size", Value::from(record.filename_size));
    }
    for (key, list) in [
        ("run_depends", &record.run_depends),
        ("provides", &record.provides),
        ("replaces", &record.replaces),
        ("reverts", &record.reverts),
        ("conflicts", &record.conflicts),
        ("shlib-provides", &record.shlib_provides),
        ("shlib-requires", &record.shlib_requires),
        ("requiredby", &record.requiredby),
    ] {
        if !list.is_empty() {
            map.insert(key, Value::str_seq(list.iter().map(String::as_str)));
        }
    }
    if !record.alternatives.is_empty() {
        let mut groups = Value::map();
        for (group, triplets) in &record.alternatives {
            groups.insert(group.as_str(), Value::str_seq(triplets.iter().map(String::as_str)));
        }
        map.insert("alternatives", groups);
    }
    if !record.files.is_empty() {
        map.insert("files", Value::Seq(record.files.iter().map(file_entry_to_value).collect()));
    }
    if !record.conf_files.is_empty() {
        map.insert(
            "conf_files",
            Value::Seq(record.conf_files.iter().map(file_entry_to_value).collect()),
        );
    }
    if !record.links.is_empty() {
        let links = record
            .links
            .iter()
            .map(|link| {
                let mut m = Value::map();
                m.insert("file", Value::from(link.path.as_str()));
                m.insert("target", Value::from(link.target.as_str()));
                m
            })
            .collect();
        map.insert("links", Value::Seq(links));
    }
    if !record.dirs.is_empty() {
        let dirs = record
            .dirs
            .iter()
            .map(|dir| {
                let mut m = Value::map();
                m.insert("file", Value::from(dir.as_str()));
                m
            })
            .collect();
        map.insert("dirs", Value::Seq(dirs));
    }
    map
}

/// The file/link/dir manifest carried by a package's `files.plist`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileManifest {
    /// Regular files.
    pub files: Vec<FileEntry>,
    /// User-editable files.
    pub conf_files: Vec<FileEntry>,
    /// Symbolic links.
    pub links: Vec<LinkEntry>,
    /// Owned directories.
    pub dirs: Vec<String>,
}

impl FileManifest {
    /// Extract the manifest of a package record.
    pub fn of(record: &PackageRecord) -> Self {
        Self {
            files: record.files.clone(),
            conf_files: record.conf_files.clone(),
            links: record.links.clone(),
            dirs: record.dirs.clone(),
        }
    }

    /// Apply this manifest to a record, replacing its file lists.
    pub fn apply(self, record: &mut PackageRecord) {
        record.files = self.files;
        record.conf_files = self.conf_files;
        record.links = self.links;
        record.dirs = self.dirs;
    }
}

/// Parse a `files.plist` document.
pub fn manifest_from_value(value: &Value) -> FileManifest {
    FileManifest {
        files: value
            .get_seq("files")
            .unwrap_or_default()
            .iter()
            .filter_map(file_entry_from_value)
            .collect(),
        conf_files: value
            .get_seq("conf_files")
            .unwrap_or_default()
            .iter()
            .filter_map(file_entry_from_value)
            .collect(),
        links: value
            .get_seq("links")
            .unwrap_or_default()
            .iter()
            .filter_map(|v| {
                Some(LinkEntry {
                    path: v.get_str("file")?.to_string(),
                    target: v.get_str("target").unwrap_or_default().to_string(),
                })
            })
            .collect(),
        dirs: value
            .get_seq("dirs")
            .unwrap_or_default()
            .iter()
            .filter_map(|v| v.get_str("file").map(str::to_string))
            .collect(),
    }
}

/// Serialize a file manifest as a `files.plist` document.
pub fn manifest_to_value(manifest: &FileManifest) -> Value {
    let record = PackageRecord {
        files: manifest.files.clone(),
        conf_files: manifest.conf_files.clone(),
        links: manifest.links.clone(),
        dirs: manifest.dirs.clone(),
        ..PackageRecord::default()
    };
    let mut full = pkg_to_value(&record);
    let mut out = Value::map();
    for key in ["files", "conf_files", "links", "dirs"] {
        if let Some(part) = full.remove(key) {
            out.insert(key, part);
        }
    }
    out
}

/// Convert a document into a package record; unknown keys are ignored.
pub fn pkg_from_value(value: &Value) -> Result<PackageRecord> {
    let pkgver = value
        .get_str("pkgver")
        .ok_or_else(|| Error::parse("package record", "missing 'pkgver'"))?
        .to_string();
    let pkgname = pkg_name(&pkgver)
        .ok_or_else(|| Error::parse("package record", format!("bad pkgver '{pkgver}'")))?
        .to_string();
    let state = match value.get_str("state") {
        Some(s) => PkgState::parse(s)
            .ok_or_else(|| Error::parse("package record", format!("unknown state '{s}'")))?,
        None => PkgState::NotInstalled,
    };
    let mut alternatives = std::collections::BTreeMap::new();
    if let Some(groups) = value.get("alternatives").and_then(Value::as_map) {
        for (group, triplets) in groups {
            alternatives.insert(
                group.clone(),
                triplets
                    .as_seq()
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            );
        }
    }
    let files: Vec<FileEntry> = value
        .get_seq("files")
        .unwrap_or_default()
        .iter()
        .filter_map(file_entry_from_value)
        .collect();
    let conf_files: Vec<FileEntry> = value
        .get_seq("conf_files")
        .unwrap_or_default()
        .iter()
        .filter_map(file_entry_from_value)
        .collect();
    let links: Vec<LinkEntry> = value
        .get_seq("links")
        .unwrap_or_default()
        .iter()
        .filter_map(|v| {
            Some(LinkEntry {
                path: v.get_str("file")?.to_string(),
                target: v.get_str("target").unwrap_or_default().to_string(),
            })
        })
        .collect();
    let dirs: Vec<String> = value
        .get_seq("dirs")
        .unwrap_or_default()
        .iter()
        .filter_map(|v| v.get_str("file").map(str::to_string))
        .collect();

    Ok(PackageRecord {
        pkgname,
        pkgver,
        architecture: value.get_str("architecture").unwrap_or(valise_core::ARCH_NOARCH).to_string(),
        state,
        automatic_install: value.get_bool("automatic-install"),
        hold: value.get_bool("hold"),
        repolock: value.get_bool("repolock"),
        preserve: value.get_bool("preserve"),
        run_depends: value.get_str_seq("run_depends"),
        provides: value.get_str_seq("provides"),
        replaces: value.get_str_seq("replaces"),
        reverts: value.get_str_seq("reverts"),
        conflicts: value.get_str_seq("conflicts"),
        shlib_provides: value.get_str_seq("shlib-provides"),
        shlib_requires: value.get_str_seq("shlib-requires"),
        alternatives,
        requiredby: value.get_str_seq("requiredby"),
        files,
        conf_files,
        links,
        dirs,
        repository: value.get_str("repository").map(str::to_string),
        installed_size: value.get_int("installed_size").unwrap_or(0) as u64,
        filename_size: value.get_int("filename-size").unwrap_or(0) as u64,
        short_desc: value.get_str("short_desc").unwrap_or_default().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_record() -> PackageRecord {
        let mut record = PackageRecord::from_pkgver("gawk-5.2.2_1").unwrap();
        record.architecture = "x86_64".into();
        record.state = PkgState::Installed;
        record.automatic_install = true;
        record.run_depends = vec!["glibc>=2.36".into(), "mpfr>=4.0".into()];
        record.provides = vec!["awk-0_1".into()];
        record.shlib_requires = vec!["libc.so.6".into(), "libmpfr.so.6".into()];
        record.alternatives.insert(
            "awk".into(),
            vec!["awk:/usr/bin/awk:/usr/bin/gawk".into()],
        );
        record.files.push(FileEntry {
            path: "/usr/bin/gawk".into(),
            sha256: "ab".repeat(32),
            size: 755_112,
            mutable: false,
        });
        record.conf_files.push(FileEntry {
            path: "/etc/gawk.conf".into(),
            sha256: "cd".repeat(32),
            size: 120,
            mutable: false,
        });
        record.links.push(LinkEntry { path: "/usr/bin/awk".into(), target: "gawk".into() });
        record.dirs = vec!["/usr/share/awk".into()];
        record.installed_size = 2_401_280;
        record.repository = Some("https://repo.example.org/current".into());
        record
    }

    #[test]
    fn record_roundtrip() {
        let record = sample_record();
        let value = pkg_to_value(&record);
        let back = pkg_from_value(&value).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn roundtrip_through_wire_format() {
        let record = sample_record();
        let bytes = crate::to_bytes(&pkg_to_value(&record));
        let back = pkg_from_value(&crate::from_bytes(&bytes).unwrap()).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let mut value = pkg_to_value(&sample_record());
        value.insert("transaction", Value::from("install"));
        value.insert("skip-obsoletes", Value::from(true));
        let back = pkg_from_value(&value).unwrap();
        assert_eq!(back.pkgver, "gawk-5.2.2_1");
    }

    #[test]
    fn missing_pkgver_is_rejected() {
        let value = Value::map();
        assert!(pkg_from_value(&value).is_err());
    }
}
