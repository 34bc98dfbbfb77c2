//! Minisign-style detached signatures.
//!
//! Ed25519 keys with an 8-byte key id; the SHA-512 digest of the
//! message is what gets signed, so signing large index files never
//! buffers them twice. The wire format is line-oriented text:
//!
//! ```text
//! untrusted comment: <free text>
//! <base64 payload>
//! trusted comment: <free text>
//! ```
//!
//! Key files carry a comment line plus a base64 payload. Secret keys
//! are encrypted with a SHA-512-derived keystream over passphrase and
//! salt; without a passphrase they are stored in the clear (and say so
//! in their comment).

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signer, Verifier};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha512};
use std::path::Path;
use tracing::debug;
use valise_core::{Error, Result};
use zeroize::Zeroize;

/// Algorithm tag in key and signature payloads.
const ALG_ED25519: &[u8; 2] = b"Ed";
/// Secret-key protection tags.
const KDF_NONE: &[u8; 2] = b"Un";
const KDF_SHA512: &[u8; 2] = b"Sx";

const KEY_ID_BYTES: usize = 8;
const SALT_BYTES: usize = 32;

fn untrusted_line(comment: &str) -> String {
    format!("untrusted comment: {comment}")
}

fn parse_payload(path: &Path, text: &str) -> Result<Vec<u8>> {
    let line = text
        .lines()
        .nth(1)
        .ok_or_else(|| Error::parse("signature file", format!("{} is truncated", path.display())))?;
    BASE64
        .decode(line.trim().as_bytes())
        .map_err(|e| Error::parse("signature file", format!("{}: {e}", path.display())))
}

/// A verifying key with its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    /// Key id matching signatures to keys.
    pub key_id: [u8; KEY_ID_BYTES],
    key: ed25519_dalek::VerifyingKey,
}

impl PublicKey {
    /// Raw payload bytes (`Ed` + key id + key), the form stored in
    /// `repokeys.plist` and index metadata.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + KEY_ID_BYTES + 32);
        out.extend_from_slice(ALG_ED25519);
        out.extend_from_slice(&self.key_id);
        out.extend_from_slice(self.key.as_bytes());
        out
    }

    /// Decode the raw payload form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 2 + KEY_ID_BYTES + 32 || &bytes[..2] != ALG_ED25519 {
            return Err(Error::parse("public key", "bad length or algorithm"));
        }
        let mut key_id = [0u8; KEY_ID_BYTES];
        key_id.copy_from_slice(&bytes[2..2 + KEY_ID_BYTES]);
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes[2 + KEY_ID_BYTES..]);
        let key = ed25519_dalek::VerifyingKey::from_bytes(&key)
            .map_err(|e| Error::parse("public key", e.to_string()))?;
        Ok(Self { key_id, key })
    }

    /// Decode the base64 payload form.
    pub fn decode(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded.trim().as_bytes())
            .map_err(|e| Error::parse("public key", e.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Write the two-line public-key file.
    pub fn write(&self, path: &Path, comment: &str) -> Result<()> {
        let text =
            format!("{}\n{}\n", untrusted_line(comment), BASE64.encode(self.to_bytes()));
        std::fs::write(path, text).map_err(|e| Error::fs(path, e))
    }

    /// Read a public-key file.
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::fs(path, e))?;
        Self::from_bytes(&parse_payload(path, &text)?)
    }
}

/// A signing key with its identity.
pub struct SecretKey {
    /// Key id copied into every signature.
    pub key_id: [u8; KEY_ID_BYTES],
    key: ed25519_dalek::SigningKey,
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKey").field("key_id", &self.key_id).finish_non_exhaustive()
    }
}

impl SecretKey {
    /// The matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey { key_id: self.key_id, key: self.key.verifying_key() }
    }

    /// Write the secret-key file, encrypted when a passphrase is given.
    pub fn write(&self, path: &Path, passphrase: Option<&str>) -> Result<()> {
        let mut payload = Vec::with_capacity(2 + 2 + KEY_ID_BYTES + SALT_BYTES + 32);
        payload.extend_from_slice(ALG_ED25519);
        let mut secret = self.key.to_bytes();
        match passphrase {
            Some(passphrase) => {
                let mut salt = [0u8; SALT_BYTES];
                OsRng.fill_bytes(&mut salt);
                let mut keystream = keystream(passphrase, &salt);
                for (byte, pad) in secret.iter_mut().zip(&keystream) {
                    *byte ^= pad;
                }
                keystream.zeroize();
                payload.extend_from_slice(KDF_SHA512);
                payload.extend_from_slice(&self.key_id);
                payload.extend_from_slice(&salt);
            }
            None => {
                payload.extend_from_slice(KDF_NONE);
                payload.extend_from_slice(&self.key_id);
                payload.extend_from_slice(&[0u8; SALT_BYTES]);
            }
        }
        payload.extend_from_slice(&secret);
        secret.zeroize();
        let comment = if passphrase.is_some() {
            "valise secret key"
        } else {
            "valise secret key (unencrypted)"
        };
        let text = format!("{}\n{}\n", untrusted_line(comment), BASE64.encode(&payload));
        payload.zeroize();
        std::fs::write(path, text).map_err(|e| Error::fs(path, e))?;
        debug!(path = %path.display(), "secret key written");
        Ok(())
    }

    /// Read a secret-key file; `passphrase` must match how it was
    /// written.
    pub fn read(path: &Path, passphrase: Option<&str>) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::fs(path, e))?;
        let payload = parse_payload(path, &text)?;
        if payload.len() != 2 + 2 + KEY_ID_BYTES + SALT_BYTES + 32
            || &payload[..2] != ALG_ED25519
        {
            return Err(Error::parse("secret key", "bad length or algorithm"));
        }
        let kdf = &payload[2..4];
        let mut key_id = [0u8; KEY_ID_BYTES];
        key_id.copy_from_slice(&payload[4..4 + KEY_ID_BYTES]);
        let salt = &payload[4 + KEY_ID_BYTES..4 + KEY_ID_BYTES + SALT_BYTES];
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&payload[4 + KEY_ID_BYTES + SALT_BYTES..]);
        match (kdf, passphrase) {
            (k, None) if k == KDF_NONE => {}
            (k, Some(passphrase)) if k == KDF_SHA512 => {
                let mut pad = keystream(passphrase, salt);
                for (byte, pad) in secret.iter_mut().zip(&pad) {
                    *byte ^= pad;
                }
                pad.zeroize();
            }
            _ => {
                return Err(Error::SignatureInvalid {
                    target: format!("{} (passphrase mismatch)", path.display()),
                });
            }
        }
        let key = ed25519_dalek::SigningKey::from_bytes(&secret);
        secret.zeroize();
        Ok(Self { key_id, key })
    }
}

fn keystream(passphrase: &str, salt: &[u8]) -> [u8; 64] {
    let mut hasher = Sha512::new();
    hasher.update(passphrase.as_bytes());
    hasher.update(salt);
    hasher.finalize().into()
}

/// A detached signature with its comments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Minisig {
    /// Id of the signing key.
    pub key_id: [u8; KEY_ID_BYTES],
    /// Free-text comment outside the signed data.
    pub untrusted_comment: String,
    /// Comment carried alongside the signature.
    pub trusted_comment: String,
    signature: ed25519_dalek::Signature,
}

impl Minisig {
    /// Raw signature bytes.
    pub fn signature_bytes(&self) -> Vec<u8> {
        self.signature.to_bytes().to_vec()
    }

    /// Rebuild from raw signature bytes and a key id (the form stored
    /// in index metadata).
    pub fn from_parts(key_id: [u8; KEY_ID_BYTES], signature: &[u8]) -> Result<Self> {
        let signature = ed25519_dalek::Signature::from_slice(signature)
            .map_err(|e| Error::parse("signature", e.to_string()))?;
        Ok(Self {
            key_id,
            untrusted_comment: String::new(),
            trusted_comment: String::new(),
            signature,
        })
    }

    /// Write the three-line signature file.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut payload = Vec::with_capacity(2 + KEY_ID_BYTES + 64);
        payload.extend_from_slice(ALG_ED25519);
        payload.extend_from_slice(&self.key_id);
        payload.extend_from_slice(&self.signature.to_bytes());
        let text = format!(
            "{}\n{}\ntrusted comment: {}\n",
            untrusted_line(&self.untrusted_comment),
            BASE64.encode(&payload),
            self.trusted_comment
        );
        std::fs::write(path, text).map_err(|e| Error::fs(path, e))
    }

    /// Read a signature file.
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::fs(path, e))?;
        let payload = parse_payload(path, &text)?;
        if payload.len() != 2 + KEY_ID_BYTES + 64 || &payload[..2] != ALG_ED25519 {
            return Err(Error::parse("signature", "bad length or algorithm"));
        }
        let mut key_id = [0u8; KEY_ID_BYTES];
        key_id.copy_from_slice(&payload[2..2 + KEY_ID_BYTES]);
        let signature = ed25519_dalek::Signature::from_slice(&payload[2 + KEY_ID_BYTES..])
            .map_err(|e| Error::parse("signature", e.to_string()))?;
        let untrusted_comment = text
            .lines()
            .next()
            .and_then(|l| l.strip_prefix("untrusted comment: "))
            .unwrap_or("")
            .to_string();
        let trusted_comment = text
            .lines()
            .nth(2)
            .and_then(|l| l.strip_prefix("trusted comment: "))
            .unwrap_or("")
            .to_string();
        Ok(Self { key_id, untrusted_comment, trusted_comment, signature })
    }
}

/// Generate a fresh key pair with a random key id.
pub fn generate() -> (SecretKey, PublicKey) {
    let key = ed25519_dalek::SigningKey::generate(&mut OsRng);
    let mut key_id = [0u8; KEY_ID_BYTES];
    OsRng.fill_bytes(&mut key_id);
    let secret = SecretKey { key_id, key };
    let public = secret.public_key();
    (secret, public)
}

/// Sign a message: the SHA-512 digest of `message` is what is signed.
pub fn sign(secret: &SecretKey, message: &[u8], trusted_comment: &str) -> Minisig {
    let digest = Sha512::digest(message);
    Minisig {
        key_id: secret.key_id,
        untrusted_comment: "signature from valise secret key".to_string(),
        trusted_comment: trusted_comment.to_string(),
        signature: secret.key.sign(digest.as_slice()),
    }
}

/// Verify a detached signature over `message`.
pub fn verify(public: &PublicKey, message: &[u8], signature: &Minisig) -> Result<()> {
    if public.key_id != signature.key_id {
        return Err(Error::SignatureInvalid { target: "key id mismatch".to_string() });
    }
    let digest = Sha512::digest(message);
    public
        .key
        .verify(digest.as_slice(), &signature.signature)
        .map_err(|_| Error::SignatureInvalid { target: "digest signature".to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sign_and_verify_roundtrip() {
        let (secret, public) = generate();
        let sig = sign(&secret, b"index payload", "timestamp:1700000000");
        verify(&public, b"index payload", &sig).unwrap();
        assert!(verify(&public, b"tampered payload", &sig).is_err());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let (secret, _) = generate();
        let (_, other_public) = generate();
        let sig = sign(&secret, b"message", "");
        assert!(matches!(
            verify(&other_public, b"message", &sig),
            Err(Error::SignatureInvalid { .. })
        ));
    }

    #[test]
    fn signature_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (secret, public) = generate();
        let sig = sign(&secret, b"message", "trusted words");
        let path = dir.path().join("index.minisig");
        sig.write(&path).unwrap();

        let loaded = Minisig::read(&path).unwrap();
        assert_eq!(loaded, sig);
        assert_eq!(loaded.trusted_comment, "trusted words");
        verify(&public, b"message", &loaded).unwrap();
    }

    #[test]
    fn key_files_roundtrip_with_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let (secret, public) = generate();
        let sec_path = dir.path().join("valise.key");
        let pub_path = dir.path().join("valise.pub");
        secret.write(&sec_path, Some("hunter2")).unwrap();
        public.write(&pub_path, "valise public key").unwrap();

        let loaded_public = PublicKey::read(&pub_path).unwrap();
        assert_eq!(loaded_public, public);

        let loaded_secret = SecretKey::read(&sec_path, Some("hunter2")).unwrap();
        let sig = sign(&loaded_secret, b"message", "");
        verify(&public, b"message", &sig).unwrap();

        // Wrong or missing passphrase fails.
        assert!(SecretKey::read(&sec_path, None).is_err());
        let wrong = SecretKey::read(&sec_path, Some("wrong"));
        match wrong {
            Err(_) => {}
            Ok(key) => {
                // Keystream decryption with the wrong passphrase yields
                // a different key; signatures must not verify.
                let sig = sign(&key, b"message", "");
                assert!(verify(&public, b"message", &sig).is_err());
            }
        }
    }

    #[test]
    fn unencrypted_key_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let (secret, public) = generate();
        let path = dir.path().join("plain.key");
        secret.write(&path, None).unwrap();
        let loaded = SecretKey::read(&path, None).unwrap();
        let sig = sign(&loaded, b"data", "");
        verify(&public, b"data", &sig).unwrap();
    }

    #[test]
    fn public_key_payload_form() {
        let (_, public) = generate();
        let decoded = PublicKey::from_bytes(&public.to_bytes()).unwrap();
        assert_eq!(decoded, public);
        let encoded = BASE64.encode(public.to_bytes());
        assert_eq!(PublicKey::decode(&encoded).unwrap(), public);
    }
}
