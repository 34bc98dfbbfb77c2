//! Repository key store.
//!
//! `repokeys.plist` maps a signer URL to its public key. A repository's
//! index metadata is only honored when the embedded public key matches
//! the registered one; first use requires an explicit registration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use valise_core::{Error, Result};
use valise_plist::Value;

/// A registered repository signing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoKey {
    /// Raw public key bytes.
    pub public_key: Vec<u8>,
    /// Signer identity the key was registered under.
    pub signed_by: String,
}

/// The on-disk key store.
#[derive(Debug, Default)]
pub struct RepoKeys {
    path: PathBuf,
    keys: BTreeMap<String, RepoKey>,
}

impl RepoKeys {
    /// Load the key store; a missing file yields an empty store.
    pub fn open(path: &Path) -> Result<Self> {
        let mut store = Self { path: path.to_path_buf(), keys: BTreeMap::new() };
        if !path.exists() {
            return Ok(store);
        }
        let doc = valise_plist::internalize(path)?;
        let map = doc
            .as_map()
            .ok_or_else(|| Error::parse("repokeys", "root is not a mapping"))?;
        for (url, entry) in map {
            let Some(bytes) = entry.get("public-key").and_then(Value::as_bytes) else {
                continue;
            };
            let expected = entry.get_int("public-key-size").unwrap_or(bytes.len() as i64);
            if expected != bytes.len() as i64 {
                return Err(Error::parse(
                    "repokeys",
                    format!("key for '{url}' has inconsistent size"),
                ));
            }
            store.keys.insert(
                url.clone(),
                RepoKey {
                    public_key: bytes.to_vec(),
                    signed_by: entry.get_str("signature-by").unwrap_or(url.as_str()).to_string(),
                },
            );
        }
        debug!(path = %path.display(), keys = store.keys.len(), "repokeys loaded");
        Ok(store)
    }

    /// Look up the registered key for a repository URL.
    pub fn lookup(&self, url: &str) -> Option<&RepoKey> {
        self.keys.get(url)
    }

    /// Whether `public_key` is the registered key for `url`.
    pub fn is_trusted(&self, url: &str, public_key: &[u8]) -> bool {
        self.lookup(url).is_some_and(|key| key.public_key == public_key)
    }

    /// Register (or replace) the key for a repository URL.
    pub fn register(&mut self, url: &str, signed_by: &str, public_key: Vec<u8>) {
        debug!(url, signed_by, "registering repository key");
        self.keys.insert(
            url.to_string(),
            RepoKey { public_key, signed_by: signed_by.to_string() },
        );
    }

    /// Remove the key for a repository URL.
    pub fn unregister(&mut self, url: &str) -> bool {
        self.keys.remove(url).is_some()
    }

    /// Registered URLs in sorted order.
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    /// Persist the store atomically.
    pub fn flush(&self) -> Result<()> {
        let mut doc = Value::map();
        for (url, key) in &self.keys {
            let mut entry = Value::map();
            entry.insert("public-key", Value::Bytes(key.public_key.clone()));
            entry.insert("public-key-size", Value::from(key.public_key.len() as u64));
            entry.insert("signature-by", Value::from(key.signed_by.as_str()));
            doc.insert(url.as_str(), entry);
        }
        valise_plist::externalize(&doc, &self.path)
    }
}
