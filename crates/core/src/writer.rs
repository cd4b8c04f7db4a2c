//! The container writer.
//!
//! Entries are processed strictly sequentially; stream ids are assigned from
//! a monotonic counter in entry order. Each entry becomes one contiguous
//! block of frames: `MANIFEST_ENTRY(stream.config)`, `STREAM_HEADER`, zero
//! or more `STREAM_DATA`, `STREAM_TRAILER`, `MANIFEST_ENTRY(stream.result)`.

use std::fmt::{self, Debug, Formatter};
use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;

use crate::filter::{EncoderFilter, Pipeline};
use crate::frame::Frame;
use crate::manifest::{
    self, FilterConfig, JsonManifestCodec, ManifestCodec, ManifestRecord, StreamConfigRecord,
    StreamResultRecord,
};
use crate::varint::Varint;
use crate::{Error, Result};

/// The bytes fed into one logical stream.
pub enum EntrySource {
    /// A single chunk handed over up front.
    Once(Bytes),
    /// A pull-based chunk stream.
    Stream(BoxStream<'static, io::Result<Bytes>>),
}

impl EntrySource {
    /// Wraps an [`AsyncRead`] source.
    pub fn from_reader(reader: impl AsyncRead + Send + 'static) -> Self {
        Self::Stream(ReaderStream::new(reader).boxed())
    }

    /// Wraps a chunk stream.
    pub fn from_stream(stream: impl futures_util::Stream<Item = io::Result<Bytes>> + Send + 'static) -> Self {
        Self::Stream(stream.boxed())
    }

    fn into_stream(self) -> BoxStream<'static, io::Result<Bytes>> {
        match self {
            Self::Once(bytes) => futures_util::stream::iter([Ok(bytes)]).boxed(),
            Self::Stream(stream) => stream,
        }
    }
}

impl Debug for EntrySource {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Once(bytes) => f.debug_tuple("Once").field(&bytes.len()).finish(),
            Self::Stream(_) => f.debug_tuple("Stream").finish(),
        }
    }
}

impl From<Bytes> for EntrySource {
    fn from(bytes: Bytes) -> Self {
        Self::Once(bytes)
    }
}

impl From<Vec<u8>> for EntrySource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Once(bytes.into())
    }
}

impl From<&'static str> for EntrySource {
    fn from(s: &'static str) -> Self {
        Self::Once(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for EntrySource {
    fn from(s: String) -> Self {
        Self::Once(s.into_bytes().into())
    }
}

/// One stream to append: a byte source plus its encode pipeline.
#[must_use = "a WriteEntry does nothing until passed to write_entry"]
pub struct WriteEntry {
    source: EntrySource,
    encoders: Vec<Box<dyn EncoderFilter>>,
    combine_id: Option<String>,
}

impl WriteEntry {
    /// Starts an entry over `source` with an empty pipeline.
    pub fn new(source: impl Into<EntrySource>) -> Self {
        Self {
            source: source.into(),
            encoders: Vec::new(),
            combine_id: None,
        }
    }

    /// Appends an encoder filter; filters apply left to right.
    pub fn encoder(mut self, encoder: impl EncoderFilter + 'static) -> Self {
        self.encoders.push(Box::new(encoder));
        self
    }

    /// Appends an already boxed encoder filter.
    pub fn boxed_encoder(mut self, encoder: Box<dyn EncoderFilter>) -> Self {
        self.encoders.push(encoder);
        self
    }

    /// Sets the record-level grouping label explicitly.
    ///
    /// When unset, the writer lifts the first `combineId` a filter config
    /// declares (in practice: a collector-minted CID filter).
    pub fn combine_id(mut self, combine_id: impl Into<String>) -> Self {
        self.combine_id = Some(combine_id.into());
        self
    }
}

impl Debug for WriteEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteEntry")
            .field("source", &self.source)
            .field("encoders", &self.encoders.len())
            .field("combine_id", &self.combine_id)
            .finish()
    }
}

/// Writes a QSF container to an [`AsyncWrite`] sink.
///
/// The sink is exclusive to this writer. Errors propagate after a
/// best-effort flush of already-emitted frames; the partial container left
/// on the sink must be discarded by the caller.
pub struct QsfWriter<W> {
    sink: W,
    codec: Arc<dyn ManifestCodec>,
    next_id: u64,
    written: u64,
    scratch: BytesMut,
}

impl<W: AsyncWrite + Unpin> QsfWriter<W> {
    /// Creates a writer with the default JSON manifest codec.
    pub fn new(sink: W) -> Self {
        Self::with_codec(sink, Arc::new(JsonManifestCodec))
    }

    /// Creates a writer with a custom manifest codec.
    pub fn with_codec(sink: W, codec: Arc<dyn ManifestCodec>) -> Self {
        Self {
            sink,
            codec,
            next_id: 0,
            written: 0,
            scratch: BytesMut::with_capacity(4096),
        }
    }

    /// Total bytes emitted to the sink so far.
    #[inline]
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Appends one entry and returns its `stream.result` record.
    pub async fn write_entry(&mut self, entry: WriteEntry) -> Result<StreamResultRecord> {
        match self.write_entry_inner(entry).await {
            Ok(record) => Ok(record),
            Err(e) => {
                // Keep whatever already hit the wire consistent on disk; the
                // container is still partial and must be discarded.
                let _ = self.sink.flush().await;
                Err(e)
            }
        }
    }

    async fn write_entry_inner(&mut self, entry: WriteEntry) -> Result<StreamResultRecord> {
        let WriteEntry {
            source,
            mut encoders,
            combine_id,
        } = entry;
        let stream_id = self.next_id;
        self.next_id += 1;

        // Transforms are instantiated before the configs are read: filters
        // may finalize per-stream state (key material, collector slots) at
        // instantiation time.
        let mut transforms = Vec::with_capacity(encoders.len());
        for encoder in &mut encoders {
            transforms.push(encoder.encode()?);
        }
        let mut pipeline = Pipeline::new(transforms);

        let filters = encoders
            .iter()
            .map(|encoder| encoder.config())
            .collect::<Result<Vec<_>>>()?;
        let combine_id = combine_id.or_else(|| {
            filters.iter().find_map(|config| match config {
                FilterConfig::Cid(cid) => cid.combine_id.clone(),
                _ => None,
            })
        });

        let record = StreamConfigRecord {
            stream_id: Varint::new(stream_id)?,
            combine_id,
            filters,
        };
        let payload = self.codec.encode(&ManifestRecord::Config(record).to_value()?)?;
        self.write_frame(Frame::manifest(stream_id, payload)).await?;
        self.write_frame(Frame::header(stream_id)).await?;

        // Offset of the first STREAM_DATA frame header; data frames follow
        // the header immediately, so this holds even before one is emitted.
        let offset = self.written;
        let mut length = 0u64;

        let mut source = source.into_stream();
        while let Some(chunk) = source.next().await {
            let chunk = chunk.map_err(Error::Io)?;
            if chunk.is_empty() {
                continue;
            }
            let out = pipeline.update(chunk)?;
            if !out.is_empty() {
                length += out.len() as u64;
                self.write_frame(Frame::data(stream_id, out)).await?;
            }
        }
        for out in pipeline.finish()? {
            length += out.len() as u64;
            self.write_frame(Frame::data(stream_id, out)).await?;
        }

        let trailer = self.codec.encode(&manifest::empty_record())?;
        self.write_frame(Frame::trailer(stream_id, trailer)).await?;

        let filter_results = encoders
            .iter()
            .filter_map(|encoder| encoder.result())
            .collect();
        let record = StreamResultRecord {
            stream_id: Varint::new(stream_id)?,
            offset,
            length,
            filter_results,
        };
        let payload = self
            .codec
            .encode(&ManifestRecord::Result(record.clone()).to_value()?)?;
        self.write_frame(Frame::manifest(stream_id, payload)).await?;

        tracing::debug!(stream_id, offset, length, "stream written");
        Ok(record)
    }

    async fn write_frame(&mut self, frame: Frame) -> Result<()> {
        self.scratch.clear();
        frame.encode(&mut self.scratch)?;
        self.sink.write_all(&self.scratch).await?;
        self.written += self.scratch.len() as u64;
        Ok(())
    }

    /// Flushes and shuts down the sink, returning it.
    pub async fn finish(mut self) -> Result<W> {
        self.sink.flush().await?;
        self.sink.shutdown().await?;
        Ok(self.sink)
    }
}

impl<W> Debug for QsfWriter<W> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("QsfWriter")
            .field("next_id", &self.next_id)
            .field("written", &self.written)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{iter_frames, FrameType};
    use crate::manifest::JsonManifestCodec;

    fn frames_of(buf: &[u8]) -> Vec<(Frame, usize)> {
        iter_frames(buf).collect::<Result<_>>().expect("well-formed")
    }

    fn classify(codec: &JsonManifestCodec, frame: &Frame) -> ManifestRecord {
        ManifestRecord::classify(codec.decode(&frame.payload).expect("decodable"))
            .expect("known shape")
    }

    #[tokio::test]
    async fn test_single_raw_entry_layout() {
        let mut writer = QsfWriter::new(Vec::new());
        let record = writer
            .write_entry(WriteEntry::new("hello raw world"))
            .await
            .expect("written");
        let buf = writer.finish().await.expect("finished");

        assert_eq!(record.stream_id.value(), 0);
        assert_eq!(record.length, 15);
        assert!(record.filter_results.is_empty());

        let frames = frames_of(&buf);
        let kinds: Vec<_> = frames.iter().map(|(f, _)| f.kind().expect("known")).collect();
        assert_eq!(
            kinds,
            vec![
                FrameType::ManifestEntry,
                FrameType::StreamHeader,
                FrameType::StreamData,
                FrameType::StreamTrailer,
                FrameType::ManifestEntry,
            ]
        );
        assert_eq!(&frames[2].0.payload[..], b"hello raw world");

        // Offset points at the data frame's header, not its payload.
        assert_eq!(record.offset as usize, frames[2].1);

        let codec = JsonManifestCodec;
        assert!(matches!(
            classify(&codec, &frames[0].0),
            ManifestRecord::Config(_)
        ));
        let ManifestRecord::Result(result) = classify(&codec, &frames[4].0) else {
            panic!("expected result record");
        };
        assert_eq!(result, record);
    }

    #[tokio::test]
    async fn test_empty_stream_has_no_data_frames() {
        let mut writer = QsfWriter::new(Vec::new());
        let record = writer
            .write_entry(WriteEntry::new(Bytes::new()))
            .await
            .expect("written");
        let buf = writer.finish().await.expect("finished");

        assert_eq!(record.length, 0);
        let frames = frames_of(&buf);
        assert!(frames
            .iter()
            .all(|(f, _)| f.kind() != Some(FrameType::StreamData)));
        // Offset is where the first data frame would have started.
        assert_eq!(record.offset as usize, frames[2].1);
    }

    #[tokio::test]
    async fn test_stream_ids_are_sequential() {
        let mut writer = QsfWriter::new(Vec::new());
        for expected in 0..3 {
            let record = writer
                .write_entry(WriteEntry::new("x"))
                .await
                .expect("written");
            assert_eq!(record.stream_id.value(), expected);
        }
    }

    #[tokio::test]
    async fn test_streamed_source_chunks_become_data_frames() {
        let chunks = vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd"))];
        let entry = WriteEntry::new(EntrySource::from_stream(futures_util::stream::iter(chunks)));

        let mut writer = QsfWriter::new(Vec::new());
        let record = writer.write_entry(entry).await.expect("written");
        let buf = writer.finish().await.expect("finished");

        assert_eq!(record.length, 4);
        let data: Vec<_> = frames_of(&buf)
            .into_iter()
            .filter(|(f, _)| f.kind() == Some(FrameType::StreamData))
            .collect();
        assert_eq!(data.len(), 2);
        assert_eq!(&data[0].0.payload[..], b"ab");
        assert_eq!(&data[1].0.payload[..], b"cd");
    }
}
