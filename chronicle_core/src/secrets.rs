//! Secrets codec for OAuth credentials at rest.
//!
//! `Connection` only ever holds `SealedSecret`s. Plaintext exists solely inside
//! the token lifecycle manager, which seals on write and opens on read.

use crate::{Error, Result};
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

const NONCE_LEN: usize = 12;

/// Opaque encrypted credential bytes (nonce + ciphertext for the AES codec).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedSecret(pub Vec<u8>);

impl fmt::Debug for SealedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SealedSecret({} bytes)", self.0.len())
    }
}

/// Encrypt/decrypt collaborator invoked at the Connection read/write boundary.
pub trait SecretsCodec: Send + Sync {
    fn seal(&self, plaintext: &str) -> Result<SealedSecret>;
    fn open(&self, sealed: &SealedSecret) -> Result<String>;
}

/// AES-256-GCM codec with a random 96-bit nonce prepended to each ciphertext.
#[derive(Clone)]
pub struct AesGcmSecretsCodec {
    cipher: Aes256Gcm,
}

impl AesGcmSecretsCodec {
    pub fn new(master_key: &[u8; 32]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(master_key)
            .map_err(|e| Error::BackendMessage(format!("invalid master key: {e}")))?;
        Ok(Self { cipher })
    }

    /// Load the master key from `path`, or generate one if it doesn't exist.
    pub fn generate_or_load_key(path: &Path) -> std::io::Result<[u8; 32]> {
        if path.exists() {
            let bytes = std::fs::read(path)?;
            if bytes.len() != 32 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!(
                        "master key file must be exactly 32 bytes, got {}",
                        bytes.len()
                    ),
                ));
            }
            let mut key = [0u8; 32];
            key.copy_from_slice(&bytes);
            Ok(key)
        } else {
            let mut key = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut key);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, key)?;
            tracing::info!(path = %path.display(), "generated new master key");
            Ok(key)
        }
    }
}

impl SecretsCodec for AesGcmSecretsCodec {
    fn seal(&self, plaintext: &str) -> Result<SealedSecret> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| Error::BackendMessage(format!("encrypt: {e}")))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(SealedSecret(out))
    }

    fn open(&self, sealed: &SealedSecret) -> Result<String> {
        if sealed.0.len() < NONCE_LEN {
            return Err(Error::BackendMessage(
                "ciphertext too short (missing nonce)".to_string(),
            ));
        }
        let (nonce_bytes, ciphertext) = sealed.0.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| Error::BackendMessage(format!("decrypt: {e}")))?;
        String::from_utf8(plaintext).map_err(|e| Error::backend("decrypted secret is not utf-8", e))
    }
}
