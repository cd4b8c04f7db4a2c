//! AES-256-GCM encryption filter for the QSF container format.
//!
//! The encode transform seals every chunk independently: a fresh 12-byte IV
//! from the thread CSPRNG, then `IV ‖ ciphertext ‖ tag` as one output chunk.
//! Chunk boundaries survive encryption, so streaming decrypt needs no
//! buffering. Key material never enters the manifest: configs carry only a
//! short key fingerprint that a reader-side key store resolves.
#![cfg_attr(docsrs, feature(doc_cfg))]

mod aes_gcm;
mod key_store;

pub use self::aes_gcm::{AesGcmDecoder, AesGcmEncoder, AesGcmFactory, AES_GCM_CONFIG_TYPE};
pub use self::key_store::{load_or_generate, read_key_file, KeyStore};

use rand::distr::StandardUniform;
use rand::RngExt;
use sha2::{Digest, Sha256};

/// A 256-bit AES-GCM key.
///
/// The `Debug` form shows only the fingerprint; raw bytes never leak into
/// logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Key([u8; 32]);

impl Key {
    /// Draws a fresh key from the thread CSPRNG.
    pub fn generate() -> Self {
        let bytes: Vec<u8> = rand::rng().sample_iter(StandardUniform).take(32).collect();
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Self(key)
    }

    /// Wraps raw key bytes.
    #[inline]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw key bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The key's public fingerprint: first 8 bytes of SHA-256 over the raw
    /// key, lowercase hex. 16 characters, deterministic per key.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..8])
    }
}

impl TryFrom<&[u8]> for Key {
    type Error = std::io::Error;

    fn try_from(bytes: &[u8]) -> std::io::Result<Self> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("aes-256-gcm keys are 32 bytes, got {}", bytes.len()),
            )
        })?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Key").field(&self.fingerprint()).finish()
    }
}

pub(crate) fn random_bytes(len: usize) -> Vec<u8> {
    rand::rng().sample_iter(StandardUniform).take(len).collect()
}
