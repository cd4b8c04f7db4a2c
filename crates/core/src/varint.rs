//! QUIC variable-length integers (RFC 9000 §16).
//!
//! The high two bits of the first byte select the encoded width (1, 2, 4 or
//! 8 bytes); the remaining bits are the big-endian value. The codec is used
//! for frame headers on the wire and, in object form, inside manifest
//! records so stream identifiers stay self-describing.

use std::fmt::{self, Display, Formatter};

use bytes::{BufMut, BytesMut};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

/// A non-negative integer in the 62-bit varint value range.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Varint(u64);

/// Width tag of an encoded varint, as it appears in manifest JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VarintWidth {
    /// One byte, 6 value bits.
    #[serde(rename = "1B")]
    One,
    /// Two bytes, 14 value bits.
    #[serde(rename = "2B")]
    Two,
    /// Four bytes, 30 value bits.
    #[serde(rename = "4B")]
    Four,
    /// Eight bytes, 62 value bits.
    #[serde(rename = "8B")]
    Eight,
}

impl VarintWidth {
    /// Number of bytes this width occupies on the wire.
    #[inline]
    pub fn len(self) -> usize {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Four => 4,
            Self::Eight => 8,
        }
    }

    /// Largest value representable at this width.
    #[inline]
    pub fn capacity(self) -> u64 {
        match self {
            Self::One => (1 << 6) - 1,
            Self::Two => (1 << 14) - 1,
            Self::Four => (1 << 30) - 1,
            Self::Eight => Varint::MAX,
        }
    }
}

impl Varint {
    /// Largest encodable value, `2^62 - 1`.
    pub const MAX: u64 = (1 << 62) - 1;

    /// Creates a varint, failing with [`Error::ValueOutOfRange`] above
    /// [`Varint::MAX`].
    #[inline]
    pub fn new(value: u64) -> Result<Self> {
        if value > Self::MAX {
            return Err(Error::ValueOutOfRange(value));
        }
        Ok(Self(value))
    }

    /// The numeric value.
    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }

    /// Minimum width that fits the value.
    pub fn width(self) -> VarintWidth {
        match self.0 {
            v if v < 1 << 6 => VarintWidth::One,
            v if v < 1 << 14 => VarintWidth::Two,
            v if v < 1 << 30 => VarintWidth::Four,
            _ => VarintWidth::Eight,
        }
    }

    /// Number of bytes `encode` will write.
    #[inline]
    pub fn encoded_len(self) -> usize {
        self.width().len()
    }

    /// Appends the minimal encoding to `buf`.
    pub fn encode(self, buf: &mut BytesMut) {
        match self.width() {
            VarintWidth::One => buf.put_u8(self.0 as u8),
            VarintWidth::Two => buf.put_u16(0b01 << 14 | self.0 as u16),
            VarintWidth::Four => buf.put_u32(0b10 << 30 | self.0 as u32),
            VarintWidth::Eight => buf.put_u64(0b11 << 62 | self.0),
        }
    }

    /// Decodes one varint starting at `buf[offset]`.
    ///
    /// Returns the value and the number of bytes consumed. Fails with
    /// [`Error::Truncated`] when fewer bytes remain than the width tag in
    /// the first byte demands.
    pub fn decode(buf: &[u8], offset: usize) -> Result<(Self, usize)> {
        let first = *buf.get(offset).ok_or(Error::Truncated)?;
        let width = 1usize << (first >> 6);
        if buf.len() - offset < width {
            return Err(Error::Truncated);
        }
        let mut value = u64::from(first & 0x3f);
        for &b in &buf[offset + 1..offset + width] {
            value = value << 8 | u64::from(b);
        }
        Ok((Self(value), width))
    }
}

impl Display for Varint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl From<Varint> for u64 {
    #[inline]
    fn from(v: Varint) -> Self {
        v.0
    }
}

impl From<u32> for Varint {
    #[inline]
    fn from(v: u32) -> Self {
        Self(u64::from(v))
    }
}

impl TryFrom<u64> for Varint {
    type Error = Error;

    #[inline]
    fn try_from(v: u64) -> Result<Self> {
        Self::new(v)
    }
}

/// Wire shape of the manifest object form: `{"f": "2B", "v": "0x4d2"}`.
#[derive(Serialize, Deserialize)]
struct VarintObject {
    f: VarintWidth,
    v: String,
}

impl Serialize for Varint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        VarintObject {
            f: self.width(),
            v: format!("{:#x}", self.0),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Varint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let obj = VarintObject::deserialize(deserializer)?;
        let digits = obj
            .v
            .strip_prefix("0x")
            .or_else(|| obj.v.strip_prefix("0X"))
            .unwrap_or(&obj.v);
        let value = u64::from_str_radix(digits, 16)
            .map_err(|e| D::Error::custom(format_args!("invalid varint hex {:?}: {e}", obj.v)))?;
        // A non-minimal width tag is legal on the wire, but the value must
        // still fit the declared width.
        if value > obj.f.capacity() {
            return Err(D::Error::custom(format_args!(
                "value {value:#x} does not fit width {:?}",
                obj.f
            )));
        }
        Ok(Self(value))
    }
}
