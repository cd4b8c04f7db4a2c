//! Manifest records carried inside MANIFEST_ENTRY frames.
//!
//! Records are typed documents over a pluggable byte serializer
//! ([`ManifestCodec`], default UTF-8 JSON). Filter configs and results are
//! open tagged unions: the string `type` field is the sole dispatch key, and
//! unknown tags round-trip opaquely so third-party filters need no support
//! from the engine.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::filter::zstr::ZCodec;
use crate::varint::Varint;
use crate::{Error, Result};

/// Byte serializer for manifest payloads.
///
/// Implementations must be lossless for the record schemas in this module.
/// The default is [`JsonManifestCodec`]; a binary serializer can be swapped
/// in through [`WriterOptions`](crate::writer::QsfWriter::with_codec) and
/// [`ReaderOptions`](crate::reader::ReaderOptions::codec).
pub trait ManifestCodec: Send + Sync + 'static {
    /// Serializes a record value to bytes.
    fn encode(&self, value: &Value) -> Result<Bytes>;
    /// Deserializes bytes back into a record value.
    fn decode(&self, bytes: &[u8]) -> Result<Value>;
}

/// The default manifest serializer: UTF-8 JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonManifestCodec;

impl ManifestCodec for JsonManifestCodec {
    fn encode(&self, value: &Value) -> Result<Bytes> {
        serde_json::to_vec(value).map(Bytes::from).map_err(Error::Json)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value> {
        serde_json::from_slice(bytes).map_err(Error::ManifestDecode)
    }
}

/// Declares one filter applied to a stream, in encode order.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterConfig {
    /// Content addressing (`"CID.config"`).
    Cid(CidConfig),
    /// Compression (`"ZStr.config"`).
    ZStr(ZStrConfig),
    /// Any other config object carrying a string `type` discriminant.
    Other(Value),
}

/// `"CID.config"` body.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct CidConfig {
    /// Label grouping this stream with its collector siblings.
    #[serde(rename = "combineId", skip_serializing_if = "Option::is_none", default)]
    pub combine_id: Option<String>,
}

/// `"ZStr.config"` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZStrConfig {
    /// Which stock compression stream the encoder wrapped.
    pub codec: ZCodec,
}

/// Per-filter outcome reported in the `stream.result` record.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterResult {
    /// `"CID.result"`.
    Cid(CidResult),
    /// `"ZStr.result"`.
    ZStr(ZStrResult),
    /// Any other result object carrying a string `type` discriminant.
    Other(Value),
}

/// `"CID.result"` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CidResult {
    /// The computed content identifier (`bafkrei…`).
    pub cid: String,
}

/// `"ZStr.result"` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZStrResult {
    /// Codec echoed from the config.
    pub codec: ZCodec,
}

/// Serialized shape of a tagged body: the `type` discriminant plus the
/// variant's own fields, flattened.
#[derive(Serialize)]
struct Tagged<'a, T> {
    #[serde(rename = "type")]
    tag: &'a str,
    #[serde(flatten)]
    body: &'a T,
}

fn tagged_to_value<T: Serialize, E: serde::ser::Error>(
    tag: &str,
    body: &T,
) -> std::result::Result<Value, E> {
    serde_json::to_value(Tagged { tag, body }).map_err(E::custom)
}

fn untag<T, E>(value: Value) -> std::result::Result<T, E>
where
    T: DeserializeOwned,
    E: serde::de::Error,
{
    serde_json::from_value(value).map_err(E::custom)
}

fn tag_of<E: serde::de::Error>(value: &Value) -> std::result::Result<String, E> {
    value
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| E::custom("filter object has no string `type` field"))
}

macro_rules! open_tagged_union {
    ($name:ident, $cid_tag:literal, $zstr_tag:literal) => {
        impl $name {
            /// The `type` discriminant this entry dispatches on.
            pub fn type_name(&self) -> &str {
                match self {
                    Self::Cid(_) => $cid_tag,
                    Self::ZStr(_) => $zstr_tag,
                    Self::Other(value) => {
                        value.get("type").and_then(Value::as_str).unwrap_or_default()
                    }
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                let value = match self {
                    Self::Cid(body) => tagged_to_value($cid_tag, body)?,
                    Self::ZStr(body) => tagged_to_value($zstr_tag, body)?,
                    Self::Other(value) => value.clone(),
                };
                value.serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(
                deserializer: D,
            ) -> std::result::Result<Self, D::Error> {
                let value = Value::deserialize(deserializer)?;
                match tag_of(&value)?.as_str() {
                    $cid_tag => untag(value).map(Self::Cid),
                    $zstr_tag => untag(value).map(Self::ZStr),
                    _ => Ok(Self::Other(value)),
                }
            }
        }
    };
}

open_tagged_union!(FilterConfig, "CID.config", "ZStr.config");
open_tagged_union!(FilterResult, "CID.result", "ZStr.result");

/// `stream.config`: announces a stream before its header frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfigRecord {
    /// Identifier of the stream, in self-describing object form.
    #[serde(rename = "streamId")]
    pub stream_id: Varint,
    /// Opaque label grouping logically related streams.
    #[serde(rename = "combineId", skip_serializing_if = "Option::is_none", default)]
    pub combine_id: Option<String>,
    /// Filter pipeline declarations, in encode order.
    pub filters: Vec<FilterConfig>,
}

/// `stream.result`: closes a stream's book-keeping after its trailer frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamResultRecord {
    /// Identifier of the stream, in self-describing object form.
    #[serde(rename = "streamId")]
    pub stream_id: Varint,
    /// Container byte offset of the first STREAM_DATA frame header.
    pub offset: u64,
    /// Total STREAM_DATA payload bytes for this stream.
    pub length: u64,
    /// Filter outcomes, in encode order; filters without a result are absent.
    #[serde(rename = "filterResult", default)]
    pub filter_results: Vec<FilterResult>,
}

/// A typed manifest record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ManifestRecord {
    /// `stream.config`.
    #[serde(rename = "stream.config")]
    Config(StreamConfigRecord),
    /// `stream.result`.
    #[serde(rename = "stream.result")]
    Result(StreamResultRecord),
}

impl ManifestRecord {
    /// Types a decoded manifest value.
    ///
    /// Fails with [`Error::UnknownManifestShape`] when the `type` field is
    /// absent or unknown, or when the body does not structurally match the
    /// declared record schema (malformed `streamId`, negative counters).
    /// Callers treat that as non-fatal and keep the raw frame.
    pub fn classify(value: Value) -> Result<Self> {
        match value.get("type").and_then(Value::as_str) {
            Some("stream.config" | "stream.result") => {
                serde_json::from_value(value).map_err(|_| Error::UnknownManifestShape)
            }
            _ => Err(Error::UnknownManifestShape),
        }
    }

    /// Serializes back into the value form fed to a [`ManifestCodec`].
    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(Error::Json)
    }

    /// The stream this record belongs to.
    pub fn stream_id(&self) -> u64 {
        match self {
            Self::Config(r) => r.stream_id.value(),
            Self::Result(r) => r.stream_id.value(),
        }
    }
}

/// The serialized empty record used as the trailer payload.
pub(crate) fn empty_record() -> Value {
    Value::Object(serde_json::Map::new())
}
