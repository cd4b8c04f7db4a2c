//! Wire frames: `varint(type) ‖ varint(stream_id) ‖ varint(length) ‖ payload`.
//!
//! Every byte of a QSF container belongs to exactly one frame. The header is
//! three varints (3 bytes minimum, 24 maximum); the payload length must match
//! the third varint exactly. Unknown type codes are preserved rather than
//! rejected so reserved frames pass through old readers.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::varint::Varint;
use crate::{Error, Result};

/// Frame type codes assigned by the format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Opens a logical stream. Empty payload.
    StreamHeader = 0x01,
    /// One encoded chunk of stream content.
    StreamData = 0x02,
    /// Closes a logical stream. Payload is a serialized record, reserved.
    StreamTrailer = 0x03,
    /// A serialized manifest record.
    ManifestEntry = 0x04,
    /// Reserved, never emitted by the writer.
    Index = 0x05,
    /// Reserved, never emitted by the writer.
    Footer = 0x06,
}

impl TryFrom<u64> for FrameType {
    type Error = u64;

    fn try_from(code: u64) -> std::result::Result<Self, u64> {
        match code {
            0x01 => Ok(Self::StreamHeader),
            0x02 => Ok(Self::StreamData),
            0x03 => Ok(Self::StreamTrailer),
            0x04 => Ok(Self::ManifestEntry),
            0x05 => Ok(Self::Index),
            0x06 => Ok(Self::Footer),
            other => Err(other),
        }
    }
}

/// A decoded wire frame.
///
/// `frame_type` keeps the raw code: decoding a frame with an unassigned type
/// is not an error, downstream stages decide whether to skip it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw type code from the wire.
    pub frame_type: u64,
    /// Identifier of the logical stream this frame belongs to.
    pub stream_id: u64,
    /// Frame payload, exactly as long as the length varint declared.
    pub payload: Bytes,
}

impl Frame {
    /// Creates a frame with an assigned type.
    #[inline]
    pub fn new(frame_type: FrameType, stream_id: u64, payload: Bytes) -> Self {
        Self {
            frame_type: frame_type as u64,
            stream_id,
            payload,
        }
    }

    /// A STREAM_HEADER frame for `stream_id`.
    #[inline]
    pub fn header(stream_id: u64) -> Self {
        Self::new(FrameType::StreamHeader, stream_id, Bytes::new())
    }

    /// A STREAM_DATA frame carrying one encoded chunk.
    #[inline]
    pub fn data(stream_id: u64, payload: Bytes) -> Self {
        Self::new(FrameType::StreamData, stream_id, payload)
    }

    /// A STREAM_TRAILER frame.
    #[inline]
    pub fn trailer(stream_id: u64, payload: Bytes) -> Self {
        Self::new(FrameType::StreamTrailer, stream_id, payload)
    }

    /// A MANIFEST_ENTRY frame carrying a serialized record for `stream_id`.
    #[inline]
    pub fn manifest(stream_id: u64, payload: Bytes) -> Self {
        Self::new(FrameType::ManifestEntry, stream_id, payload)
    }

    /// The assigned frame type, if the code is known.
    #[inline]
    pub fn kind(&self) -> Option<FrameType> {
        FrameType::try_from(self.frame_type).ok()
    }

    /// Number of bytes `encode` will write.
    pub fn encoded_len(&self) -> Result<usize> {
        let len = Varint::new(self.payload.len() as u64)?;
        Ok(Varint::new(self.frame_type)?.encoded_len()
            + Varint::new(self.stream_id)?.encoded_len()
            + len.encoded_len()
            + self.payload.len())
    }

    /// Appends the encoded frame to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        Varint::new(self.frame_type)?.encode(buf);
        Varint::new(self.stream_id)?.encode(buf);
        Varint::new(self.payload.len() as u64)?.encode(buf);
        buf.extend_from_slice(&self.payload);
        Ok(())
    }

    /// Decodes one frame starting at `buf[offset]`.
    ///
    /// Returns the frame and the total bytes consumed. Fails with
    /// [`Error::Truncated`] when a varint or the payload would read past the
    /// end of the buffer.
    pub fn decode(buf: &[u8], offset: usize) -> Result<(Self, usize)> {
        let (frame_type, n1) = Varint::decode(buf, offset)?;
        let (stream_id, n2) = Varint::decode(buf, offset + n1)?;
        let (len, n3) = Varint::decode(buf, offset + n1 + n2)?;
        let header = n1 + n2 + n3;
        let len = usize::try_from(len.value()).map_err(|_| Error::ValueOutOfRange(len.value()))?;
        let body = offset + header;
        if buf.len() - body < len {
            return Err(Error::Truncated);
        }
        let frame = Self {
            frame_type: frame_type.value(),
            stream_id: stream_id.value(),
            payload: Bytes::copy_from_slice(&buf[body..body + len]),
        };
        Ok((frame, header + len))
    }
}

/// Returns a lazy iterator over `(frame, offset_in_buf)` pairs.
///
/// An empty buffer yields no items; a trailing partial frame yields one
/// [`Error::Truncated`] item and then ends.
pub fn iter_frames(buf: &[u8]) -> Frames<'_> {
    Frames { buf, offset: 0, done: false }
}

/// Iterator returned by [`iter_frames`].
#[derive(Debug)]
pub struct Frames<'a> {
    buf: &'a [u8],
    offset: usize,
    done: bool,
}

impl Iterator for Frames<'_> {
    type Item = Result<(Frame, usize)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.buf.len() {
            return None;
        }
        match Frame::decode(self.buf, self.offset) {
            Ok((frame, consumed)) => {
                let at = self.offset;
                self.offset += consumed;
                Some(Ok((frame, at)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Frame codec for [`FramedRead`]/[`FramedWrite`], stitching frames split
/// across arbitrary input chunks.
///
/// Clean EOF between frames ends the stream; EOF inside a frame is
/// [`Error::Truncated`].
///
/// [`FramedRead`]: tokio_util::codec::FramedRead
/// [`FramedWrite`]: tokio_util::codec::FramedWrite
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let (frame_type, n1) = match Varint::decode(src, 0) {
            Ok(v) => v,
            Err(Error::Truncated) => return Ok(None),
            Err(e) => return Err(e),
        };
        let (stream_id, n2) = match Varint::decode(src, n1) {
            Ok(v) => v,
            Err(Error::Truncated) => return Ok(None),
            Err(e) => return Err(e),
        };
        let (len, n3) = match Varint::decode(src, n1 + n2) {
            Ok(v) => v,
            Err(Error::Truncated) => return Ok(None),
            Err(e) => return Err(e),
        };
        let header = n1 + n2 + n3;
        let len = usize::try_from(len.value()).map_err(|_| Error::ValueOutOfRange(len.value()))?;
        if src.len() - header < len {
            src.reserve(header + len - src.len());
            return Ok(None);
        }
        src.advance(header);
        let payload = src.split_to(len).freeze();
        Ok(Some(Frame {
            frame_type: frame_type.value(),
            stream_id: stream_id.value(),
            payload,
        }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(Error::Truncated),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        frame.encode(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Frame {
        Frame::data(7, Bytes::from_static(b"payload bytes"))
    }

    #[test]
    fn test_roundtrip() {
        let frame = sample();
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).expect("encodable");
        assert_eq!(buf.len(), frame.encoded_len().expect("in range"));

        let (decoded, consumed) = Frame::decode(&buf, 0).expect("decodable");
        assert_eq!(decoded, frame);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn test_minimum_header() {
        let frame = Frame::header(0);
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).expect("encodable");
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn test_unknown_type_tolerated() {
        let frame = Frame {
            frame_type: 0x2a,
            stream_id: 1,
            payload: Bytes::from_static(b"??"),
        };
        let mut buf = BytesMut::new();
        frame.encode(&mut buf).expect("encodable");
        let (decoded, _) = Frame::decode(&buf, 0).expect("decodable");
        assert_eq!(decoded.frame_type, 0x2a);
        assert_eq!(decoded.kind(), None);
    }

    #[test]
    fn test_truncated_payload() {
        let mut buf = BytesMut::new();
        sample().encode(&mut buf).expect("encodable");
        assert!(matches!(
            Frame::decode(&buf[..buf.len() - 1], 0),
            Err(Error::Truncated)
        ));
        assert!(matches!(Frame::decode(&buf[..2], 0), Err(Error::Truncated)));
    }

    #[test]
    fn test_iter_frames() {
        let mut buf = BytesMut::new();
        Frame::header(0).encode(&mut buf).expect("encodable");
        let second_at = buf.len();
        sample().encode(&mut buf).expect("encodable");

        let frames: Vec<_> = iter_frames(&buf).collect::<Result<_>>().expect("all ok");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].1, 0);
        assert_eq!(frames[1], (sample(), second_at));

        assert_eq!(iter_frames(&[]).count(), 0);
    }

    #[test]
    fn test_iter_frames_stops_after_error() {
        let mut buf = BytesMut::new();
        Frame::header(0).encode(&mut buf).expect("encodable");
        buf.extend_from_slice(&[0x02]); // dangling partial frame
        let items: Vec<_> = iter_frames(&buf).collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(Error::Truncated)));
    }

    #[test]
    fn test_codec_incremental() {
        let mut buf = BytesMut::new();
        sample().encode(&mut buf).expect("encodable");

        let mut codec = FrameCodec;
        let mut partial = BytesMut::new();
        for (i, b) in buf.iter().enumerate() {
            partial.extend_from_slice(&[*b]);
            let decoded = codec.decode(&mut partial).expect("no fatal error");
            if i + 1 < buf.len() {
                assert!(decoded.is_none(), "decoded early at byte {i}");
            } else {
                assert_eq!(decoded, Some(sample()));
            }
        }
        assert!(partial.is_empty());
    }

    #[test]
    fn test_codec_eof_mid_frame() {
        let mut buf = BytesMut::new();
        sample().encode(&mut buf).expect("encodable");
        buf.truncate(buf.len() - 4);

        let mut codec = FrameCodec;
        assert!(matches!(codec.decode_eof(&mut buf), Err(Error::Truncated)));
    }
}
