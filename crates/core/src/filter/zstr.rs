//! Compression filter (`ZStr`) over the stock flate2 streams.
//!
//! Three codecs are wire-visible: `deflate` (zlib-wrapped), `deflate-raw`
//! and `gzip`. The encode transform emits whatever the compressor has ready
//! after each chunk; the decode transform inflates symmetrically. The codec
//! name travels in the config so the decoder factory can rebuild the right
//! inflater without sniffing.

use std::fmt::{self, Display, Formatter};
use std::io::{Result as IoResult, Write};
use std::str::FromStr;

use bytes::{Bytes, BytesMut};
use flate2::write::{DeflateDecoder, DeflateEncoder, GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder};
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::manifest::{FilterConfig, FilterResult, StreamConfigRecord, ZStrConfig, ZStrResult};
use crate::resolver::FilterSlot;
use crate::Result;

use super::{BoxTransform, DecoderFactory, DecoderFilter, EncoderFilter, Transform};

/// Compression codec selector.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZCodec {
    /// zlib-wrapped DEFLATE.
    #[default]
    #[serde(rename = "deflate")]
    Deflate,
    /// Raw DEFLATE, no wrapper.
    #[serde(rename = "deflate-raw")]
    DeflateRaw,
    /// gzip-wrapped DEFLATE.
    #[serde(rename = "gzip")]
    Gzip,
}

impl FromStr for ZCodec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "deflate" => Ok(Self::Deflate),
            "deflate-raw" => Ok(Self::DeflateRaw),
            "gzip" => Ok(Self::Gzip),
            _ => Err(format!("unknown compression codec: {s}")),
        }
    }
}

impl Display for ZCodec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deflate => write!(f, "deflate"),
            Self::DeflateRaw => write!(f, "deflate-raw"),
            Self::Gzip => write!(f, "gzip"),
        }
    }
}

/// Take-buffer sink for the write-side flate2 streams.
struct Writer {
    buf: BytesMut,
}

impl Writer {
    fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(8192),
        }
    }

    fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

impl Write for Writer {
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

enum Deflater {
    Deflate(ZlibEncoder<Writer>),
    DeflateRaw(DeflateEncoder<Writer>),
    Gzip(GzEncoder<Writer>),
}

impl Deflater {
    fn new(codec: ZCodec) -> Self {
        let level = Compression::default();
        match codec {
            ZCodec::Deflate => Self::Deflate(ZlibEncoder::new(Writer::new(), level)),
            ZCodec::DeflateRaw => Self::DeflateRaw(DeflateEncoder::new(Writer::new(), level)),
            ZCodec::Gzip => Self::Gzip(GzEncoder::new(Writer::new(), level)),
        }
    }

    fn write(&mut self, data: &[u8]) -> IoResult<()> {
        match self {
            Self::Deflate(encoder) => encoder.write_all(data),
            Self::DeflateRaw(encoder) => encoder.write_all(data),
            Self::Gzip(encoder) => encoder.write_all(data),
        }
    }

    fn take(&mut self) -> IoResult<Bytes> {
        match self {
            Self::Deflate(encoder) => {
                encoder.flush()?;
                Ok(encoder.get_mut().take())
            }
            Self::DeflateRaw(encoder) => {
                encoder.flush()?;
                Ok(encoder.get_mut().take())
            }
            Self::Gzip(encoder) => {
                encoder.flush()?;
                Ok(encoder.get_mut().take())
            }
        }
    }

    fn finish(self) -> IoResult<Bytes> {
        match self {
            Self::Deflate(encoder) => encoder.finish().map(|mut w| w.take()),
            Self::DeflateRaw(encoder) => encoder.finish().map(|mut w| w.take()),
            Self::Gzip(encoder) => encoder.finish().map(|mut w| w.take()),
        }
    }
}

enum Inflater {
    Deflate(ZlibDecoder<Writer>),
    DeflateRaw(DeflateDecoder<Writer>),
    Gzip(GzDecoder<Writer>),
}

impl Inflater {
    fn new(codec: ZCodec) -> Self {
        match codec {
            ZCodec::Deflate => Self::Deflate(ZlibDecoder::new(Writer::new())),
            ZCodec::DeflateRaw => Self::DeflateRaw(DeflateDecoder::new(Writer::new())),
            ZCodec::Gzip => Self::Gzip(GzDecoder::new(Writer::new())),
        }
    }

    fn write(&mut self, data: &[u8]) -> IoResult<()> {
        match self {
            Self::Deflate(decoder) => decoder.write_all(data),
            Self::DeflateRaw(decoder) => decoder.write_all(data),
            Self::Gzip(decoder) => decoder.write_all(data),
        }
    }

    fn take(&mut self) -> IoResult<Bytes> {
        match self {
            Self::Deflate(decoder) => {
                decoder.flush()?;
                Ok(decoder.get_mut().take())
            }
            Self::DeflateRaw(decoder) => {
                decoder.flush()?;
                Ok(decoder.get_mut().take())
            }
            Self::Gzip(decoder) => {
                decoder.flush()?;
                Ok(decoder.get_mut().take())
            }
        }
    }

    fn finish(self) -> IoResult<Bytes> {
        match self {
            Self::Deflate(decoder) => decoder.finish().map(|mut w| w.take()),
            Self::DeflateRaw(decoder) => decoder.finish().map(|mut w| w.take()),
            Self::Gzip(decoder) => decoder.finish().map(|mut w| w.take()),
        }
    }
}

struct ZStrEncodeTransform {
    deflater: Option<Deflater>,
}

impl Transform for ZStrEncodeTransform {
    fn update(&mut self, chunk: Bytes) -> Result<Bytes> {
        match &mut self.deflater {
            Some(deflater) => {
                deflater.write(&chunk)?;
                Ok(deflater.take()?)
            }
            None => Ok(Bytes::new()),
        }
    }

    fn finish(&mut self) -> Result<Bytes> {
        match self.deflater.take() {
            Some(deflater) => Ok(deflater.finish()?),
            None => Ok(Bytes::new()),
        }
    }
}

struct ZStrDecodeTransform {
    inflater: Option<Inflater>,
}

impl Transform for ZStrDecodeTransform {
    fn update(&mut self, chunk: Bytes) -> Result<Bytes> {
        match &mut self.inflater {
            Some(inflater) => {
                inflater.write(&chunk)?;
                Ok(inflater.take()?)
            }
            None => Ok(Bytes::new()),
        }
    }

    fn finish(&mut self) -> Result<Bytes> {
        match self.inflater.take() {
            Some(inflater) => Ok(inflater.finish()?),
            None => Ok(Bytes::new()),
        }
    }
}

/// Write-path compression filter.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZStrEncoder {
    codec: ZCodec,
}

impl ZStrEncoder {
    /// Creates an encoder for `codec`.
    #[inline]
    pub fn new(codec: ZCodec) -> Self {
        Self { codec }
    }
}

impl EncoderFilter for ZStrEncoder {
    fn encode(&mut self) -> Result<BoxTransform> {
        Ok(Box::new(ZStrEncodeTransform {
            deflater: Some(Deflater::new(self.codec)),
        }))
    }

    fn config(&self) -> Result<FilterConfig> {
        Ok(FilterConfig::ZStr(ZStrConfig { codec: self.codec }))
    }

    fn result(&self) -> Option<FilterResult> {
        Some(FilterResult::ZStr(ZStrResult { codec: self.codec }))
    }
}

/// Read-path compression filter.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZStrDecoder {
    codec: ZCodec,
}

impl ZStrDecoder {
    /// Creates a decoder for `codec`.
    #[inline]
    pub fn new(codec: ZCodec) -> Self {
        Self { codec }
    }
}

impl DecoderFilter for ZStrDecoder {
    fn decode(&mut self) -> Result<BoxTransform> {
        Ok(Box::new(ZStrDecodeTransform {
            inflater: Some(Inflater::new(self.codec)),
        }))
    }
}

/// Claims `"ZStr.config"` slots, rebuilding the inflater from the `codec`
/// field.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZStrFactory;

impl DecoderFactory for ZStrFactory {
    fn detect(
        &self,
        _record: &StreamConfigRecord,
        mut slots: Vec<FilterSlot>,
    ) -> Result<Vec<FilterSlot>> {
        for slot in &mut slots {
            if slot.instance.is_some() {
                continue;
            }
            if let FilterConfig::ZStr(config) = &slot.input {
                slot.instance = Some(Box::new(ZStrDecoder::new(config.codec)));
            }
        }
        Ok(slots)
    }
}

/// Convenience constructor used by entry builders: `zstr(ZCodec::Gzip)`.
#[inline]
pub fn zstr(codec: ZCodec) -> ZStrEncoder {
    ZStrEncoder::new(codec)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(codec: ZCodec, input: &[u8]) -> (Bytes, Bytes) {
        let mut encoder = ZStrEncoder::new(codec);
        let mut enc = encoder.encode().expect("transform");
        let mut packed = BytesMut::new();
        for piece in input.chunks(700) {
            packed.extend_from_slice(&enc.update(Bytes::copy_from_slice(piece)).expect("ok"));
        }
        packed.extend_from_slice(&enc.finish().expect("ok"));
        let packed = packed.freeze();

        let mut dec = ZStrDecoder::new(codec).decode().expect("transform");
        let mut plain = BytesMut::new();
        plain.extend_from_slice(&dec.update(packed.clone()).expect("ok"));
        plain.extend_from_slice(&dec.finish().expect("ok"));
        (packed, plain.freeze())
    }

    #[test]
    fn test_deflate_shrinks_repetitive_input() {
        let input = "compress me ".repeat(200);
        let (packed, plain) = roundtrip(ZCodec::Deflate, input.as_bytes());
        assert!(packed.len() < input.len());
        assert_eq!(&plain[..], input.as_bytes());
    }

    #[test]
    fn test_gzip_wrapper_magic() {
        let (packed, plain) = roundtrip(ZCodec::Gzip, b"gzip wrapped payload");
        assert_eq!(&packed[..2], &[0x1f, 0x8b]);
        assert_eq!(&plain[..], b"gzip wrapped payload");
    }

    #[test]
    fn test_deflate_raw_has_no_zlib_header() {
        let (packed, _) = roundtrip(ZCodec::DeflateRaw, b"raw stream");
        assert_ne!(packed[0], 0x78);
    }

    #[test]
    fn test_codec_names() {
        for codec in [ZCodec::Deflate, ZCodec::DeflateRaw, ZCodec::Gzip] {
            assert_eq!(codec.to_string().parse::<ZCodec>(), Ok(codec));
        }
        assert!("zstd".parse::<ZCodec>().is_err());
        assert_eq!(
            serde_json::to_value(ZCodec::DeflateRaw).expect("serializable"),
            serde_json::json!("deflate-raw")
        );
    }

    #[test]
    fn test_factory_claims_only_zstr_slots() {
        let record = StreamConfigRecord {
            stream_id: crate::varint::Varint::new(0).expect("in range"),
            combine_id: None,
            filters: vec![],
        };
        let slots = vec![
            FilterSlot::new(FilterConfig::Cid(Default::default())),
            FilterSlot::new(FilterConfig::ZStr(ZStrConfig { codec: ZCodec::Gzip })),
        ];
        let slots = ZStrFactory.detect(&record, slots).expect("ok");
        assert!(slots[0].instance.is_none());
        assert!(slots[1].instance.is_some());
    }
}
