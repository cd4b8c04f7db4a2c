//! The container reader.
//!
//! `QsfReader` turns an arbitrarily chunked byte source into a sequence of
//! stream-begin / stream-end events. Internally the pipeline is staged:
//! bytes → frames ([`FrameCodec`](crate::frame::FrameCodec) under
//! `FramedRead`), frames → typed manifest records, then the binder matches
//! configs to headers, copies data frames into bounded per-stream pipes and
//! closes them on trailers. Everything that is not a begin/end event is
//! dropped before the public boundary.

use std::collections::VecDeque;
use std::fmt::{self, Debug, Formatter};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_channel::mpsc;
use futures_util::{Stream, StreamExt};
use tokio::io::AsyncRead;

use crate::filter::cid::CidFactory;
use crate::filter::zstr::ZStrFactory;
use crate::filter::{DecoderFactory, Pipeline};
use crate::manifest::{FilterConfig, JsonManifestCodec, ManifestCodec, StreamResultRecord};
use crate::pipe::{PipeReader, DEFAULT_HIGH_WATER_MARK};
use crate::resolver::{self, FilterSlot};
use crate::varint::Varint;
use crate::Result;

mod binder;

/// The `stream.result` record, re-surfaced as the stream-end event.
pub type StreamFileEnd = StreamResultRecord;

/// Reader tuning knobs.
pub struct ReaderOptions {
    decoders: Vec<Arc<dyn DecoderFactory>>,
    high_water_mark: usize,
    codec: Arc<dyn ManifestCodec>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            decoders: Vec::new(),
            high_water_mark: DEFAULT_HIGH_WATER_MARK,
            codec: Arc::new(JsonManifestCodec),
        }
    }
}

impl ReaderOptions {
    /// Creates the default options.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an additional decoder factory.
    ///
    /// The built-in CID and ZStr factories are always consulted first; user
    /// factories run after them, in registration order.
    pub fn decoder(mut self, factory: impl DecoderFactory + 'static) -> Self {
        self.decoders.push(Arc::new(factory));
        self
    }

    /// Sets the per-stream pipe high-water mark, in chunks.
    pub fn high_water_mark(mut self, chunks: usize) -> Self {
        self.high_water_mark = chunks;
        self
    }

    /// Swaps the manifest byte serializer.
    pub fn codec(mut self, codec: Arc<dyn ManifestCodec>) -> Self {
        self.codec = codec;
        self
    }

    fn factories(&self) -> Vec<Arc<dyn DecoderFactory>> {
        let mut factories: Vec<Arc<dyn DecoderFactory>> =
            vec![Arc::new(CidFactory), Arc::new(ZStrFactory)];
        factories.extend(self.decoders.iter().cloned());
        factories
    }
}

impl Debug for ReaderOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderOptions")
            .field("decoders", &self.decoders.len())
            .field("high_water_mark", &self.high_water_mark)
            .finish()
    }
}

/// A begin or end event for one logical stream, correlated by stream id.
#[derive(Debug)]
pub enum StreamEvent {
    /// A stream's framing header arrived; its bytes are now flowing.
    Begin(StreamFileBegin),
    /// A stream's `stream.result` record arrived.
    End(StreamFileEnd),
}

impl StreamEvent {
    /// The numeric stream id this event belongs to.
    pub fn stream_id(&self) -> u64 {
        match self {
            Self::Begin(begin) => begin.stream_id.value(),
            Self::End(end) => end.stream_id.value(),
        }
    }
}

/// A stream opened: config fields plus the live byte channel.
#[derive(Debug)]
pub struct StreamFileBegin {
    /// Identifier of the stream, in self-describing object form.
    pub stream_id: Varint,
    /// Grouping label from the config record, if any.
    pub combine_id: Option<String>,
    /// Filter declarations, in encode order.
    pub filters: Vec<FilterConfig>,
    /// The encoded bytes of the stream, as they arrive.
    pub stream: PipeReader,
    slots: Vec<FilterSlot>,
}

impl StreamFileBegin {
    /// Pipes the stream through the resolved decoders, in reverse encode
    /// order, yielding plaintext.
    ///
    /// Fails with [`Error::UnresolvedFilter`](crate::Error::UnresolvedFilter)
    /// when a declared filter found no factory. The failure happens here and
    /// not earlier, so a consumer without the factory can still take
    /// [`stream`](Self::stream) raw.
    pub fn decode(mut self) -> Result<DecodeStream> {
        let pipeline = resolver::decode_pipeline(&mut self.slots)?;
        Ok(DecodeStream::new(self.stream, pipeline))
    }

    /// Gives up on decoding and takes the raw encoded byte channel.
    pub fn into_stream(self) -> PipeReader {
        self.stream
    }
}

/// Plaintext chunks of one stream: the raw pipe driven through the decode
/// pipeline, with a flush when the pipe ends.
pub struct DecodeStream {
    inner: PipeReader,
    pipeline: Pipeline,
    flushed: VecDeque<Bytes>,
    done: bool,
}

impl DecodeStream {
    fn new(inner: PipeReader, pipeline: Pipeline) -> Self {
        Self {
            inner,
            pipeline,
            flushed: VecDeque::new(),
            done: false,
        }
    }

    /// Collects the whole plaintext into one buffer.
    pub async fn read_to_end(mut self) -> Result<Bytes> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out.freeze())
    }
}

impl Debug for DecodeStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeStream").field("done", &self.done).finish()
    }
}

impl Stream for DecodeStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(chunk) = this.flushed.pop_front() {
                return Poll::Ready(Some(Ok(chunk)));
            }
            if this.done {
                return Poll::Ready(None);
            }
            match ready!(this.inner.poll_next_unpin(cx)) {
                Some(Ok(chunk)) => match this.pipeline.update(chunk) {
                    Ok(out) if out.is_empty() => {}
                    Ok(out) => return Poll::Ready(Some(Ok(out))),
                    Err(e) => {
                        this.done = true;
                        return Poll::Ready(Some(Err(e)));
                    }
                },
                Some(Err(e)) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    this.done = true;
                    match this.pipeline.finish() {
                        Ok(chunks) => this.flushed.extend(chunks),
                        Err(e) => return Poll::Ready(Some(Err(e))),
                    }
                }
            }
        }
    }
}

/// Reads a QSF container, yielding [`StreamEvent`]s.
///
/// The byte source is exclusive to this reader. Dropping the reader cancels
/// the whole pipeline; dropping one begin-event's pipe cancels only that
/// stream.
#[derive(Debug)]
pub struct QsfReader {
    events: mpsc::Receiver<Result<StreamEvent>>,
}

impl QsfReader {
    /// Starts a reader with default options.
    pub fn new(input: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::with_options(input, ReaderOptions::default())
    }

    /// Starts a reader with explicit options.
    ///
    /// Must be called from within a tokio runtime: the stage pipeline runs
    /// as a background task feeding a bounded event queue.
    pub fn with_options(input: impl AsyncRead + Send + Unpin + 'static, options: ReaderOptions) -> Self {
        let (tx, rx) = mpsc::channel(options.high_water_mark);
        tokio::spawn(binder::drive(input, options, tx));
        Self { events: rx }
    }
}

impl Stream for QsfReader {
    type Item = Result<StreamEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}
