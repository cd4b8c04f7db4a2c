//! Content-addressing filter.
//!
//! The encode transform is a pass-through that folds every input byte into a
//! SHA-256 accumulator; at flush it publishes a CIDv1 string (multicodec
//! `raw`, multihash `sha2-256`, base32-lower, the `bafkrei…` form). Because
//! the accumulator must see plaintext, a CID filter goes first in encode
//! order when combined with compression or encryption.

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use cid::Cid;
use multihash::Multihash;
use sha2::{Digest, Sha256};

use crate::manifest::{CidConfig, CidResult, FilterConfig, FilterResult, StreamConfigRecord};
use crate::resolver::FilterSlot;
use crate::{Error, Result};

use super::{BoxTransform, DecoderFactory, DecoderFilter, EncoderFilter, Transform};

const RAW_CODEC: u64 = 0x55;
const SHA2_256: u64 = 0x12;

/// Renders a SHA-256 digest as a CIDv1 `raw` string.
pub(crate) fn cid_of_digest(digest: &[u8]) -> Result<String> {
    let multihash = Multihash::<64>::wrap(SHA2_256, digest).map_err(Error::filter)?;
    // CIDv1 renders base32-lower by default, which yields the `bafkrei…`
    // prefix for raw + sha2-256.
    Ok(Cid::new_v1(RAW_CODEC, multihash).to_string())
}

/// Hashes `bytes` in one go and renders the CID.
pub fn cid_of(bytes: &[u8]) -> Result<String> {
    cid_of_digest(&Sha256::digest(bytes))
}

/// Shared cell a CID encode transform publishes its result into.
#[derive(Debug, Default, Clone)]
pub(crate) struct CidSlot(Arc<OnceLock<String>>);

impl CidSlot {
    pub(crate) fn get(&self) -> Option<&String> {
        self.0.get()
    }

    fn publish(&self, cid: String) {
        let _ = self.0.set(cid);
    }
}

struct CidEncodeTransform {
    hasher: Sha256,
    slot: CidSlot,
}

impl Transform for CidEncodeTransform {
    fn update(&mut self, chunk: Bytes) -> Result<Bytes> {
        self.hasher.update(&chunk);
        Ok(chunk)
    }

    fn finish(&mut self) -> Result<Bytes> {
        let digest = self.hasher.finalize_reset();
        self.slot.publish(cid_of_digest(&digest)?);
        Ok(Bytes::new())
    }
}

/// Write-path content-addressing filter.
#[derive(Debug, Default)]
pub struct CidEncoder {
    combine_id: Option<String>,
    slot: CidSlot,
}

impl CidEncoder {
    /// Creates a standalone CID encoder.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an encoder bound to a collector slot.
    pub(crate) fn with_slot(combine_id: Option<String>, slot: CidSlot) -> Self {
        Self { combine_id, slot }
    }

    /// The computed CID, available once the stream has been flushed.
    pub fn cid(&self) -> Option<String> {
        self.slot.get().cloned()
    }

    /// A lightweight handle that outlives the encoder once it moves into a
    /// [`WriteEntry`](crate::writer::WriteEntry).
    pub fn handle(&self) -> CidHandle {
        CidHandle(self.slot.clone())
    }
}

/// Observes a [`CidEncoder`]'s resolved value after the encoder itself has
/// been consumed by the writer.
#[derive(Debug, Clone)]
pub struct CidHandle(CidSlot);

impl CidHandle {
    /// The computed CID, available once the stream has been flushed.
    pub fn get(&self) -> Option<String> {
        self.0.get().cloned()
    }
}

impl EncoderFilter for CidEncoder {
    fn encode(&mut self) -> Result<BoxTransform> {
        Ok(Box::new(CidEncodeTransform {
            hasher: Sha256::new(),
            slot: self.slot.clone(),
        }))
    }

    fn config(&self) -> Result<FilterConfig> {
        Ok(FilterConfig::Cid(CidConfig {
            combine_id: self.combine_id.clone(),
        }))
    }

    fn result(&self) -> Option<FilterResult> {
        self.slot
            .get()
            .map(|cid| FilterResult::Cid(CidResult { cid: cid.clone() }))
    }
}

struct CidVerifyTransform {
    hasher: Sha256,
    expected: Option<String>,
}

impl Transform for CidVerifyTransform {
    fn update(&mut self, chunk: Bytes) -> Result<Bytes> {
        self.hasher.update(&chunk);
        Ok(chunk)
    }

    fn finish(&mut self) -> Result<Bytes> {
        let computed = cid_of_digest(&self.hasher.finalize_reset())?;
        if let Some(expected) = self.expected.take() {
            if computed != expected {
                return Err(Error::CidMismatch { expected, computed });
            }
        }
        Ok(Bytes::new())
    }
}

/// Read-path content-addressing filter.
///
/// Without an expected CID the transform only re-derives the identifier
/// (verifying chunking integrity); with one, a disagreement at flush is
/// [`Error::CidMismatch`].
#[derive(Debug, Default)]
pub struct CidDecoder {
    expected: Option<String>,
}

impl CidDecoder {
    /// Creates a decoder with no expectation.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a decoder that verifies against `expected` at flush.
    pub fn expecting(expected: impl Into<String>) -> Self {
        Self {
            expected: Some(expected.into()),
        }
    }
}

impl DecoderFilter for CidDecoder {
    fn decode(&mut self) -> Result<BoxTransform> {
        Ok(Box::new(CidVerifyTransform {
            hasher: Sha256::new(),
            expected: self.expected.take(),
        }))
    }
}

/// Claims `"CID.config"` slots with an expectation-free [`CidDecoder`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CidFactory;

impl DecoderFactory for CidFactory {
    fn detect(
        &self,
        _record: &StreamConfigRecord,
        mut slots: Vec<FilterSlot>,
    ) -> Result<Vec<FilterSlot>> {
        for slot in &mut slots {
            if slot.instance.is_none() && matches!(slot.input, FilterConfig::Cid(_)) {
                slot.instance = Some(Box::new(CidDecoder::new()));
            }
        }
        Ok(slots)
    }
}

/// Convenience constructor used by entry builders: `cid()`.
#[inline]
pub fn cid() -> CidEncoder {
    CidEncoder::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_chunked(chunks: &[&[u8]]) -> String {
        let mut encoder = CidEncoder::new();
        let mut transform = encoder.encode().expect("transform");
        for chunk in chunks {
            let out = transform.update(Bytes::copy_from_slice(chunk)).expect("ok");
            assert_eq!(&out[..], *chunk, "cid transform must pass bytes through");
        }
        assert!(transform.finish().expect("ok").is_empty());
        encoder.cid().expect("resolved after flush")
    }

    #[test]
    fn test_cid_prefix_and_chunking_independence() {
        let whole = hash_chunked(&[b"content with cid"]);
        let split = hash_chunked(&[b"content ", b"with", b" cid"]);
        assert!(whole.starts_with("bafkrei"), "got {whole}");
        assert_eq!(whole, split);
        assert_ne!(whole, hash_chunked(&[b"different"]));
    }

    #[test]
    fn test_cid_of_matches_streaming() {
        assert_eq!(
            cid_of(b"content with cid").expect("ok"),
            hash_chunked(&[b"content with cid"])
        );
    }

    #[test]
    fn test_result_unresolved_before_flush() {
        let encoder = CidEncoder::new();
        assert!(encoder.result().is_none());
        assert!(encoder.cid().is_none());
    }

    #[test]
    fn test_verify_mismatch() {
        let expected = cid_of(b"the real content").expect("ok");
        let mut decoder = CidDecoder::expecting(expected.clone());
        let mut transform = decoder.decode().expect("transform");
        transform.update(Bytes::from_static(b"tampered")).expect("ok");
        match transform.finish() {
            Err(Error::CidMismatch { expected: e, computed }) => {
                assert_eq!(e, expected);
                assert!(computed.starts_with("bafkrei"));
            }
            other => panic!("expected CidMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_verify_without_expectation_passes() {
        let mut decoder = CidDecoder::new();
        let mut transform = decoder.decode().expect("transform");
        transform.update(Bytes::from_static(b"anything")).expect("ok");
        assert!(transform.finish().is_ok());
    }
}
