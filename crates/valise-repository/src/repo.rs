//! A single repository: published index, stage index, index metadata.

use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use valise_core::{Error, PackageRecord, Result};
use valise_plist::{pkg_from_value, pkg_to_value, Value};

/// Reserved index key carrying the signed metadata block.
pub const IDX_META_KEY: &str = "_INDEX_META_";

/// Signed index metadata: signer identity, public key, and the
/// signature over the index digest.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdxMeta {
    /// Signer identity (a URL or mail address).
    pub signed_by: String,
    /// Raw public key bytes.
    pub public_key: Vec<u8>,
    /// Signature over the index digest.
    pub signature: Vec<u8>,
}

impl IdxMeta {
    fn to_value(&self) -> Value {
        let mut map = Value::map();
        map.insert("signed-by", Value::from(self.signed_by.as_str()));
        map.insert("public-key", Value::Bytes(self.public_key.clone()));
        map.insert("signature", Value::Bytes(self.signature.clone()));
        map
    }

    fn from_value(value: &Value) -> Option<Self> {
        Some(Self {
            signed_by: value.get_str("signed-by")?.to_string(),
            public_key: value.get("public-key")?.as_bytes()?.to_vec(),
            signature: value.get("signature")?.as_bytes()?.to_vec(),
        })
    }
}

/// SHA-256 digest of an index mapping, computed over its canonical
/// externalized form with the metadata block removed.
pub fn index_digest(index: &BTreeMap<String, PackageRecord>) -> Vec<u8> {
    let mut doc = Value::map();
    for (pkgname, record) in index {
        doc.insert(pkgname.as_str(), pkg_to_value(record));
    }
    Sha256::digest(valise_plist::to_bytes(&doc)).to_vec()
}

/// A repository handle.
#[derive(Debug, Clone, Default)]
pub struct Repository {
    /// Identifying URL.
    pub url: String,
    /// Local directory holding the index documents and archives.
    pub root: PathBuf,
    /// Published index: pkgname -> latest record for the target arch.
    pub idx: BTreeMap<String, PackageRecord>,
    /// Stage index: packages queued for promotion.
    pub stage: BTreeMap<String, PackageRecord>,
    /// Signed index metadata, when present.
    pub idxmeta: Option<IdxMeta>,
}

impl Repository {
    /// Document name of the published index for `arch`.
    pub fn repodata_name(arch: &str) -> String {
        format!("{arch}-repodata")
    }

    /// Document name of the stage index for `arch`.
    pub fn stagedata_name(arch: &str) -> String {
        format!("{arch}-stagedata")
    }

    /// Open a repository rooted at `root` for the target `arch`.
    ///
    /// Records whose architecture neither equals the target nor is
    /// `noarch` are skipped. A missing repodata document yields an
    /// empty index.
    pub fn open(url: &str, root: &Path, arch: &str) -> Result<Self> {
        let mut repo = Self {
            url: url.to_string(),
            root: root.to_path_buf(),
            ..Self::default()
        };
        let (idx, idxmeta) = Self::load_index(&root.join(Self::repodata_name(arch)), arch)?;
        repo.idx = idx;
        repo.idxmeta = idxmeta;
        let (stage, _) = Self::load_index(&root.join(Self::stagedata_name(arch)), arch)?;
        repo.stage = stage;
        debug!(url, idx = repo.idx.len(), stage = repo.stage.len(), "repository opened");
        Ok(repo)
    }

    fn load_index(
        path: &Path,
        arch: &str,
    ) -> Result<(BTreeMap<String, PackageRecord>, Option<IdxMeta>)> {
        let mut index = BTreeMap::new();
        let mut meta = None;
        if !path.exists() {
            trace!(path = %path.display(), "index document not present");
            return Ok((index, meta));
        }
        let doc = valise_plist::internalize(path)?;
        let map = doc
            .as_map()
            .ok_or_else(|| Error::parse("repository index", "root is not a mapping"))?;
        for (key, value) in map {
            if key == IDX_META_KEY {
                meta = IdxMeta::from_value(value);
                continue;
            }
            let record = pkg_from_value(value)?;
            if !record.matches_arch(arch) {
                trace!(pkgver = %record.pkgver, arch = %record.architecture, "skipping foreign arch");
                continue;
            }
            index.insert(key.clone(), record);
        }
        Ok((index, meta))
    }

    /// Build an in-memory repository (used by planners under test and
    /// by the consistency engine before publication).
    pub fn in_memory(url: &str, records: impl IntoIterator<Item = PackageRecord>) -> Self {
        let mut repo = Self { url: url.to_string(), ..Self::default() };
        for record in records {
            repo.idx.insert(record.pkgname.clone(), record);
        }
        repo
    }

    /// Serialize an index mapping, attaching `meta` when given.
    pub fn index_to_value(
        index: &BTreeMap<String, PackageRecord>,
        meta: Option<&IdxMeta>,
    ) -> Value {
        let mut doc = Value::map();
        for (pkgname, record) in index {
            doc.insert(pkgname.as_str(), pkg_to_value(record));
        }
        if let Some(meta) = meta {
            doc.insert(IDX_META_KEY, meta.to_value());
        }
        doc
    }

    /// Atomically write the published index for `arch`.
    pub fn write_index(&self, arch: &str) -> Result<()> {
        let doc = Self::index_to_value(&self.idx, self.idxmeta.as_ref());
        valise_plist::externalize(&doc, &self.root.join(Self::repodata_name(arch)))
    }

    /// Atomically write the stage index for `arch`; an empty stage
    /// removes the document.
    pub fn write_stage(&self, arch: &str) -> Result<()> {
        let path = self.root.join(Self::stagedata_name(arch));
        if self.stage.is_empty() {
            match std::fs::remove_file(&path) {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                Err(err) => return Err(Error::fs(&path, err)),
            }
        }
        valise_plist::externalize(&Self::index_to_value(&self.stage, None), &path)
    }

    /// Expected archive location for a record in this repository.
    pub fn archive_path(&self, record: &PackageRecord) -> PathBuf {
        self.root.join(format!("{}.{}.xbps", record.pkgver, record.architecture))
    }
}

/// Exclusive publish-side lock on a repository directory.
#[derive(Debug)]
pub struct RepoLock {
    file: File,
    path: PathBuf,
}

impl RepoLock {
    /// Take the lock; fails immediately with [`Error::LockBusy`] when
    /// another publisher holds it.
    pub fn acquire(repo_root: &Path) -> Result<Self> {
        std::fs::create_dir_all(repo_root).map_err(|e| Error::fs(repo_root, e))?;
        let path = repo_root.join(".lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::fs(&path, e))?;
        file.try_lock_exclusive().map_err(|_| Error::LockBusy { path: path.clone() })?;
        trace!(path = %path.display(), "repository locked");
        Ok(Self { file, path })
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        trace!(path = %self.path.display(), "repository unlocked");
    }
}
