//! Streaming extraction of one install/update entry.
//!
//! Archive order is load-bearing: optional `INSTALL`/`REMOVE` hooks come
//! first, then `props.plist` and `files.plist`, then the payload. The
//! pre-install hook runs as soon as it is extracted, before any payload
//! lands on disk.

use crate::hooks::{run_hook, HookPhase};
use crate::{hash_file, rooted};
use std::collections::BTreeSet;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use valise_core::{
    glob_match, pkg_version, Config, Error, Event, EventSink, FileEntry, PackageRecord, PkgState,
    Result,
};
use valise_pkgdb::PkgDb;
use valise_resolver::TransactionEntry;

/// Where the archive for a transaction entry lives locally.
pub(crate) fn archive_location(config: &Config, entry: &TransactionEntry) -> Result<PathBuf> {
    if let Some(path) = &entry.archive_path {
        return Ok(path.clone());
    }
    let file = format!("{}.{}.xbps", entry.record.pkgver, entry.record.architecture);
    if let Some(repository) = &entry.repository {
        if !repository.contains("://") {
            let candidate = Path::new(repository).join(&file);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }
    let cached = config.cachedir_path().join(&file);
    if cached.is_file() {
        return Ok(cached);
    }
    Err(Error::not_found(file))
}

/// Extract one install/update entry and return the new record in
/// `unpacked` state. The caller persists it and runs configure.
pub(crate) fn unpack_entry(
    db: &PkgDb,
    config: &Config,
    entry: &TransactionEntry,
    sink: &dyn EventSink,
) -> Result<PackageRecord> {
    let archive = archive_location(config, entry)?;
    let pkgname = entry.record.pkgname.as_str();
    let old = db.records().get(pkgname).cloned();
    let update = entry.previous.is_some();
    let metadir_pkg = config.metadir().join(pkgname);
    std::fs::create_dir_all(&metadir_pkg).map_err(|e| Error::fs(&metadir_pkg, e))?;
    debug!(pkgver = %entry.record.pkgver, archive = %archive.display(), update, "unpacking");

    let mut props: Option<valise_plist::Value> = None;
    let mut manifest: Option<valise_plist::FileManifest> = None;
    let mut reader = valise_archive::ArchiveReader::open(&archive)?;
    for member in reader.entries()? {
        let mut member = member.map_err(|e| Error::parse("archive", e.to_string()))?;
        let raw_path = member
            .path()
            .map_err(|e| Error::parse("archive", e.to_string()))?
            .to_string_lossy()
            .into_owned();
        let name = raw_path.strip_prefix("./").unwrap_or(&raw_path).to_string();
        match name.as_str() {
            "" => continue,
            valise_archive::INSTALL_HOOK => {
                let script = metadir_pkg.join(valise_archive::INSTALL_HOOK);
                write_member(&mut member, &script, 0o755)?;
                let version = pkg_version(&entry.record.pkgver).unwrap_or("");
                run_hook(
                    &script,
                    &config.rootdir,
                    HookPhase::Pre,
                    pkgname,
                    version,
                    update,
                    sink,
                )?;
            }
            valise_archive::REMOVE_HOOK => {
                write_member(&mut member, &metadir_pkg.join(valise_archive::REMOVE_HOOK), 0o755)?;
            }
            valise_archive::PROPS_PLIST => {
                let mut body = Vec::new();
                member.read_to_end(&mut body).map_err(|e| Error::fs(&archive, e))?;
                props = Some(valise_plist::from_bytes(&body)?);
            }
            valise_archive::FILES_PLIST => {
                let mut body = Vec::new();
                member.read_to_end(&mut body).map_err(|e| Error::fs(&archive, e))?;
                let doc = valise_plist::from_bytes(&body)?;
                // Keep the per-package manifest copy current.
                valise_plist::externalize(&doc, &metadir_pkg.join(valise_archive::FILES_PLIST))?;
                manifest = Some(valise_plist::manifest_from_value(&doc));
            }
            _ => {
                extract_payload(
                    config,
                    &mut member,
                    &name,
                    entry,
                    old.as_ref(),
                    manifest.as_ref(),
                    sink,
                )?;
            }
        }
    }

    let props = props
        .ok_or_else(|| Error::parse("archive", format!("{} lacks props.plist", archive.display())))?;
    let mut record = valise_plist::pkg_from_value(&props)?;
    if let Some(manifest) = manifest {
        manifest.apply(&mut record);
    }
    record.state = PkgState::Unpacked;
    record.repository = entry.repository.clone();
    record.automatic_install =
        entry.automatic && old.as_ref().map_or(true, |o| o.automatic_install);
    record.requiredby.clear();

    if update {
        if let Some(old) = &old {
            prune_obsoletes(config, old, &record, sink)?;
        }
    }
    Ok(record)
}

fn write_member(member: &mut tar::Entry<'_, impl Read>, dest: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::fs(parent, e))?;
    }
    let mut file = std::fs::File::create(dest).map_err(|e| Error::fs(dest, e))?;
    std::io::copy(member, &mut file).map_err(|e| Error::fs(dest, e))?;
    std::fs::set_permissions(dest, std::fs::Permissions::from_mode(mode))
        .map_err(|e| Error::fs(dest, e))?;
    Ok(())
}

fn extract_payload(
    config: &Config,
    member: &mut tar::Entry<'_, impl Read>,
    name: &str,
    entry: &TransactionEntry,
    old: Option<&PackageRecord>,
    manifest: Option<&valise_plist::FileManifest>,
    sink: &dyn EventSink,
) -> Result<()> {
    let path = format!("/{}", name.trim_end_matches('/'));
    if config.noextract.iter().any(|pattern| glob_match(pattern, &path)) {
        trace!(path = %path, "skipping (noextract)");
        return Ok(());
    }
    let dest = rooted(&config.rootdir, &path);
    let kind = member.header().entry_type();
    let mode = member.header().mode().unwrap_or(0o644) & 0o7777;

    match kind {
        tar::EntryType::Directory => {
            std::fs::create_dir_all(&dest).map_err(|e| Error::fs(&dest, e))?;
            set_mode(&dest, mode)?;
        }
        tar::EntryType::Symlink => {
            let target = member
                .link_name()
                .map_err(|e| Error::parse("archive", e.to_string()))?
                .ok_or_else(|| Error::parse("archive", format!("symlink '{path}' has no target")))?
                .to_string_lossy()
                .into_owned();
            replace_with(&dest, |dest| {
                std::os::unix::fs::symlink(&target, dest).map_err(|e| Error::fs(dest, e))
            })?;
        }
        tar::EntryType::Link => {
            let target = member
                .link_name()
                .map_err(|e| Error::parse("archive", e.to_string()))?
                .ok_or_else(|| Error::parse("archive", format!("hardlink '{path}' has no target")))?
                .to_string_lossy()
                .into_owned();
            let target = rooted(&config.rootdir, target.trim_start_matches("./"));
            replace_with(&dest, |dest| {
                std::fs::hard_link(&target, dest).map_err(|e| Error::fs(dest, e))
            })?;
        }
        _ => {
            let conf_entry = manifest.and_then(|m| m.conf_files.iter().find(|f| f.path == path));
            match conf_entry {
                Some(new_entry) => {
                    extract_conf_file(config, member, entry, &path, &dest, mode, new_entry, old, sink)?;
                }
                None => {
                    extract_regular(member, &dest, mode)?;
                }
            }
        }
    }
    Ok(())
}

/// Write-then-rename extraction of a regular file.
fn extract_regular(member: &mut tar::Entry<'_, impl Read>, dest: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let parent = dest
        .parent()
        .ok_or_else(|| Error::parse("archive", format!("bad destination {}", dest.display())))?;
    std::fs::create_dir_all(parent).map_err(|e| Error::fs(parent, e))?;
    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| Error::fs(parent, e))?;
    std::io::copy(member, &mut temp).map_err(|e| Error::fs(temp.path(), e))?;
    temp.as_file()
        .set_permissions(std::fs::Permissions::from_mode(mode))
        .map_err(|e| Error::fs(temp.path(), e))?;
    // An existing symlink would make persist() follow it; clear first.
    match std::fs::symlink_metadata(dest) {
        Ok(meta) if meta.file_type().is_symlink() => {
            std::fs::remove_file(dest).map_err(|e| Error::fs(dest, e))?;
        }
        _ => {}
    }
    temp.persist(dest).map_err(|e| Error::fs(dest, e.error))?;
    Ok(())
}

fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| Error::fs(path, e))
}

fn replace_with(dest: &Path, create: impl FnOnce(&Path) -> Result<()>) -> Result<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::fs(parent, e))?;
    }
    match std::fs::symlink_metadata(dest) {
        Ok(meta) if meta.is_dir() => {
            return Err(Error::fs(
                dest,
                std::io::Error::new(std::io::ErrorKind::AlreadyExists, "directory in the way"),
            ));
        }
        Ok(_) => std::fs::remove_file(dest).map_err(|e| Error::fs(dest, e))?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(Error::fs(dest, err)),
    }
    create(dest)
}

/// Three-way configuration file policy.
///
/// Fresh install: extract. Installed and unmodified (disk hash equals
/// the stored hash): overwrite. Installed and modified: extract to
/// `<path>.new-<version>_<revision>` and report for review.
#[allow(clippy::too_many_arguments)]
fn extract_conf_file(
    config: &Config,
    member: &mut tar::Entry<'_, impl Read>,
    entry: &TransactionEntry,
    path: &str,
    dest: &Path,
    mode: u32,
    new_entry: &FileEntry,
    old: Option<&PackageRecord>,
    sink: &dyn EventSink,
) -> Result<()> {
    if !dest.exists() {
        return extract_regular(member, dest, mode);
    }
    let disk_hash = hash_file(dest)?;
    if disk_hash == new_entry.sha256 {
        trace!(path = %path, "configuration file already current");
        return Ok(());
    }
    let stored_hash = old.and_then(|o| {
        o.conf_files
            .iter()
            .chain(&o.files)
            .find(|f| f.path == path)
            .map(|f| f.sha256.as_str())
    });
    if stored_hash == Some(disk_hash.as_str()) {
        // Untouched by the user; safe to overwrite.
        return extract_regular(member, dest, mode);
    }
    let version = pkg_version(&entry.record.pkgver).unwrap_or("0");
    let new_path = format!("{path}.new-{version}");
    let new_dest = rooted(&config.rootdir, &new_path);
    extract_regular(member, &new_dest, mode)?;
    sink.emit(&Event::ConfigFileKept { path: path.to_string(), new_path });
    Ok(())
}

/// Remove paths owned by the old version that the new one no longer
/// ships: files and links unconditionally, directories only when empty,
/// modified configuration files never.
pub(crate) fn prune_obsoletes(
    config: &Config,
    old: &PackageRecord,
    new: &PackageRecord,
    sink: &dyn EventSink,
) -> Result<()> {
    if old.preserve {
        warn!(pkgver = %old.pkgver, "preserve is set, keeping all previous files");
        return Ok(());
    }
    let keep: BTreeSet<&str> = new
        .files
        .iter()
        .chain(&new.conf_files)
        .map(|f| f.path.as_str())
        .chain(new.links.iter().map(|l| l.path.as_str()))
        .chain(new.dirs.iter().map(String::as_str))
        .collect();
    let preserved =
        |path: &str| config.preserved_files.iter().any(|pattern| glob_match(pattern, path));

    let removable = old
        .files
        .iter()
        .map(|f| f.path.as_str())
        .chain(old.links.iter().map(|l| l.path.as_str()));
    for path in removable {
        if keep.contains(path) || preserved(path) {
            continue;
        }
        let dest = rooted(&config.rootdir, path);
        match std::fs::remove_file(&dest) {
            Ok(()) => sink.emit(&Event::ObsoleteRemoved { path: path.to_string() }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(Error::fs(&dest, err)),
        }
    }
    for conf in &old.conf_files {
        let path = conf.path.as_str();
        if keep.contains(path) || preserved(path) {
            continue;
        }
        let dest = rooted(&config.rootdir, path);
        match hash_file(&dest) {
            Ok(disk_hash) if disk_hash == conf.sha256 => {
                std::fs::remove_file(&dest).map_err(|e| Error::fs(&dest, e))?;
                sink.emit(&Event::ObsoleteRemoved { path: path.to_string() });
            }
            Ok(_) => {
                sink.emit(&Event::Warning {
                    message: format!("keeping modified configuration file '{path}'"),
                });
            }
            Err(_) => {}
        }
    }
    let mut old_dirs: Vec<&String> = old.dirs.iter().filter(|d| !keep.contains(d.as_str())).collect();
    // Depth-first so nested directories empty out before their parents.
    old_dirs.sort_by_key(|d| std::cmp::Reverse(d.len()));
    for dir in old_dirs {
        let dest = rooted(&config.rootdir, dir);
        match std::fs::remove_dir(&dest) {
            Ok(()) => sink.emit(&Event::ObsoleteRemoved { path: dir.clone() }),
            // Shared or non-empty directories stay.
            Err(_) => {}
        }
    }
    Ok(())
}
