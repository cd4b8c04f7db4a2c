//! The AES-256-GCM filter: per-chunk seal on the write path, per-chunk open
//! on the read path, and the factory that binds manifest configs to keys.

use std::collections::HashMap;

use aead::generic_array::GenericArray;
use aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use bytes::{BufMut, Bytes, BytesMut};
use serde::Deserialize;

use qsf_core::filter::{
    BoxTransform, DecoderFactory, DecoderFilter, EncoderFilter, Transform,
};
use qsf_core::manifest::{FilterConfig, FilterResult, StreamConfigRecord};
use qsf_core::resolver::FilterSlot;
use qsf_core::{Error, Result};

use crate::{random_bytes, Key};

/// The `type` discriminant of this filter's manifest config.
pub const AES_GCM_CONFIG_TYPE: &str = "AesGcm.config";

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// The manifest body this filter declares and recognizes.
#[derive(Debug, Deserialize)]
struct AesGcmConfig {
    #[serde(rename = "keyId")]
    key_id: String,
}

struct SealTransform {
    cipher: Aes256Gcm,
}

impl Transform for SealTransform {
    fn update(&mut self, chunk: Bytes) -> Result<Bytes> {
        // One input chunk, one output chunk: IV ‖ ciphertext ‖ tag.
        let iv = random_bytes(IV_LEN);
        let nonce = GenericArray::from_slice(&iv);
        let sealed = self
            .cipher
            .encrypt(nonce, chunk.as_ref())
            .map_err(|_| Error::filter("aes-gcm seal rejected the chunk"))?;
        let mut out = BytesMut::with_capacity(IV_LEN + sealed.len());
        out.put_slice(&iv);
        out.put_slice(&sealed);
        Ok(out.freeze())
    }

    fn finish(&mut self) -> Result<Bytes> {
        Ok(Bytes::new())
    }
}

struct OpenTransform {
    cipher: Aes256Gcm,
}

impl Transform for OpenTransform {
    fn update(&mut self, chunk: Bytes) -> Result<Bytes> {
        if chunk.len() < IV_LEN + TAG_LEN {
            return Err(Error::DecryptFailure);
        }
        let (iv, sealed) = chunk.split_at(IV_LEN);
        let nonce = GenericArray::from_slice(iv);
        let plain = self
            .cipher
            .decrypt(nonce, sealed)
            .map_err(|_| Error::DecryptFailure)?;
        Ok(plain.into())
    }

    fn finish(&mut self) -> Result<Bytes> {
        Ok(Bytes::new())
    }
}

fn cipher_for(key: &Key) -> Aes256Gcm {
    let key = GenericArray::clone_from_slice(key.as_bytes());
    Aes256Gcm::new(&key)
}

/// Write-path encryption filter.
#[derive(Debug)]
pub struct AesGcmEncoder {
    key: Key,
}

impl AesGcmEncoder {
    /// Creates an encoder sealing with `key`.
    #[inline]
    pub fn new(key: Key) -> Self {
        Self { key }
    }
}

impl EncoderFilter for AesGcmEncoder {
    fn encode(&mut self) -> Result<BoxTransform> {
        Ok(Box::new(SealTransform {
            cipher: cipher_for(&self.key),
        }))
    }

    fn config(&self) -> Result<FilterConfig> {
        // Only the fingerprint travels; the reader's key store resolves it.
        Ok(FilterConfig::Other(serde_json::json!({
            "type": AES_GCM_CONFIG_TYPE,
            "keyId": self.key.fingerprint(),
        })))
    }

    fn result(&self) -> Option<FilterResult> {
        Some(FilterResult::Other(serde_json::json!({
            "type": "AesGcm.result",
            "keyId": self.key.fingerprint(),
        })))
    }
}

/// Read-path encryption filter.
#[derive(Debug)]
pub struct AesGcmDecoder {
    key: Key,
}

impl AesGcmDecoder {
    /// Creates a decoder opening with `key`.
    #[inline]
    pub fn new(key: Key) -> Self {
        Self { key }
    }
}

impl DecoderFilter for AesGcmDecoder {
    fn decode(&mut self) -> Result<BoxTransform> {
        Ok(Box::new(OpenTransform {
            cipher: cipher_for(&self.key),
        }))
    }
}

/// Claims `"AesGcm.config"` slots whose `keyId` is in its ring.
///
/// Slots naming an unknown key are left unresolved; the consumer then sees
/// [`Error::UnresolvedFilter`] at `decode()` time and can still take the raw
/// stream.
#[derive(Debug, Default)]
pub struct AesGcmFactory {
    keys: HashMap<String, Key>,
}

impl AesGcmFactory {
    /// Creates an empty key ring.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a key under its own fingerprint.
    pub fn with_key(mut self, key: Key) -> Self {
        self.keys.insert(key.fingerprint(), key);
        self
    }

    /// Adds a key under an explicit id (rotated or imported key stores).
    pub fn with_key_for(mut self, key_id: impl Into<String>, key: Key) -> Self {
        self.keys.insert(key_id.into(), key);
        self
    }

    /// Number of keys in the ring.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the ring is empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl DecoderFactory for AesGcmFactory {
    fn detect(
        &self,
        _record: &StreamConfigRecord,
        mut slots: Vec<FilterSlot>,
    ) -> Result<Vec<FilterSlot>> {
        for slot in &mut slots {
            if slot.instance.is_some() || slot.input.type_name() != AES_GCM_CONFIG_TYPE {
                continue;
            }
            let FilterConfig::Other(value) = &slot.input else {
                continue;
            };
            let config: AesGcmConfig = match serde_json::from_value(value.clone()) {
                Ok(config) => config,
                Err(e) => {
                    tracing::debug!(error = %e, "malformed AesGcm.config, leaving unresolved");
                    continue;
                }
            };
            match self.keys.get(&config.key_id) {
                Some(key) => slot.instance = Some(Box::new(AesGcmDecoder::new(key.clone()))),
                None => {
                    tracing::debug!(key_id = %config.key_id, "no key for stream, leaving unresolved");
                }
            }
        }
        Ok(slots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seal_open(seal_key: &Key, open_key: &Key, plaintext: &[u8]) -> Result<Bytes> {
        let mut encoder = AesGcmEncoder::new(seal_key.clone());
        let mut seal = encoder.encode().expect("transform");
        let sealed = seal.update(Bytes::copy_from_slice(plaintext)).expect("ok");
        assert_eq!(sealed.len(), plaintext.len() + IV_LEN + TAG_LEN);

        let mut open = AesGcmDecoder::new(open_key.clone()).decode().expect("transform");
        open.update(sealed)
    }

    #[test]
    fn test_roundtrip() {
        let key = Key::generate();
        let plain = seal_open(&key, &key, b"top secret payload").expect("opens");
        assert_eq!(&plain[..], b"top secret payload");
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed_with = Key::generate();
        let opened_with = Key::generate();
        assert!(matches!(
            seal_open(&sealed_with, &opened_with, b"top secret payload"),
            Err(Error::DecryptFailure)
        ));
    }

    #[test]
    fn test_fresh_iv_per_seal() {
        let key = Key::generate();
        let mut encoder = AesGcmEncoder::new(key);
        let mut seal = encoder.encode().expect("transform");
        let a = seal.update(Bytes::from_static(b"same bytes")).expect("ok");
        let b = seal.update(Bytes::from_static(b"same bytes")).expect("ok");
        assert_ne!(a, b, "two seals of the same chunk must differ");
    }

    #[test]
    fn test_short_chunk_is_a_decrypt_failure() {
        let mut open = AesGcmDecoder::new(Key::generate()).decode().expect("transform");
        assert!(matches!(
            open.update(Bytes::from_static(b"short")),
            Err(Error::DecryptFailure)
        ));
    }

    #[test]
    fn test_config_carries_fingerprint_not_key() {
        let key = Key::from_bytes([0x42; 32]);
        let encoder = AesGcmEncoder::new(key.clone());
        let config = encoder.config().expect("ok");
        let value = serde_json::to_value(&config).expect("serializable");
        assert_eq!(value["type"], AES_GCM_CONFIG_TYPE);
        assert_eq!(value["keyId"], key.fingerprint());
        assert!(!value.to_string().contains(&hex::encode(key.as_bytes())));
    }

    #[test]
    fn test_factory_leaves_unknown_keys_unresolved() {
        let stored = Key::generate();
        let other = Key::generate();
        let factory = AesGcmFactory::new().with_key(stored.clone());

        let config_for = |key: &Key| {
            FilterConfig::Other(serde_json::json!({
                "type": AES_GCM_CONFIG_TYPE,
                "keyId": key.fingerprint(),
            }))
        };
        let record = StreamConfigRecord {
            stream_id: qsf_core::Varint::new(0).expect("in range"),
            combine_id: None,
            filters: vec![],
        };
        let slots = vec![
            FilterSlot::new(config_for(&stored)),
            FilterSlot::new(config_for(&other)),
        ];
        let slots = factory.detect(&record, slots).expect("ok");
        assert!(slots[0].instance.is_some());
        assert!(slots[1].instance.is_none());
    }
}
