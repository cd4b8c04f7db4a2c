//! The binder stage: matches manifest records to frames and owns the
//! per-stream byte pipes.

use std::collections::HashMap;
use std::sync::Arc;

use futures_channel::mpsc;
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;

use crate::filter::DecoderFactory;
use crate::frame::{Frame, FrameCodec, FrameType};
use crate::manifest::{ManifestCodec, ManifestRecord, StreamConfigRecord};
use crate::pipe::{pipe, PipeWriter};
use crate::reader::{ReaderOptions, StreamEvent, StreamFileBegin};
use crate::resolver::{self, FilterSlot};
use crate::{Error, Result};

/// The event consumer went away; unwind the pipeline quietly.
struct Cancelled;

type SendOutcome = std::result::Result<(), Cancelled>;

/// A parked `stream.config` waiting for its STREAM_HEADER.
struct PendingStream {
    config: StreamConfigRecord,
    slots: Vec<FilterSlot>,
}

struct Binder {
    factories: Vec<Arc<dyn DecoderFactory>>,
    codec: Arc<dyn ManifestCodec>,
    high_water_mark: usize,
    pending_configs: HashMap<u64, PendingStream>,
    open_pipes: HashMap<u64, PipeWriter>,
    events: mpsc::Sender<Result<StreamEvent>>,
}

/// Drives the whole read pipeline: frames in, events out.
pub(super) async fn drive(
    input: impl AsyncRead + Send + Unpin + 'static,
    options: ReaderOptions,
    events: mpsc::Sender<Result<StreamEvent>>,
) {
    let factories = options.factories();
    let mut binder = Binder {
        factories,
        codec: options.codec,
        high_water_mark: options.high_water_mark,
        pending_configs: HashMap::new(),
        open_pipes: HashMap::new(),
        events,
    };

    let mut frames = FramedRead::new(input, FrameCodec);
    while let Some(next) = frames.next().await {
        let outcome = match next {
            Ok(frame) => binder.handle(frame).await,
            Err(e) => {
                // Framing errors poison the remaining byte stream.
                binder.fail_open_streams(&e);
                let _ = binder.send(Err(e)).await;
                return;
            }
        };
        if outcome.is_err() {
            return;
        }
    }
    binder.finish();
}

impl Binder {
    async fn send(&mut self, item: Result<StreamEvent>) -> SendOutcome {
        futures_util::future::poll_fn(|cx| self.events.poll_ready(cx))
            .await
            .map_err(|_| Cancelled)?;
        self.events.try_send(item).map_err(|_| Cancelled)
    }

    async fn handle(&mut self, frame: Frame) -> SendOutcome {
        if frame.kind() == Some(FrameType::ManifestEntry) {
            match self.parse_manifest(&frame) {
                Some(record) => return self.handle_record(record).await,
                None => {
                    tracing::debug!(
                        stream_id = frame.stream_id,
                        "unrecognized manifest body, dropping at event boundary"
                    );
                    return Ok(());
                }
            }
        }
        self.handle_frame(frame).await
    }

    /// Types a MANIFEST_ENTRY body. `None` keeps the frame raw: both
    /// serializer rejections and unknown shapes are non-fatal.
    fn parse_manifest(&self, frame: &Frame) -> Option<ManifestRecord> {
        let value = match self.codec.decode(&frame.payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(stream_id = frame.stream_id, error = %e, "manifest decode failed");
                return None;
            }
        };
        match ManifestRecord::classify(value) {
            Ok(record) => {
                if record.stream_id() != frame.stream_id {
                    tracing::warn!(
                        frame_stream_id = frame.stream_id,
                        record_stream_id = record.stream_id(),
                        "manifest record id disagrees with its frame header"
                    );
                }
                Some(record)
            }
            Err(e) => {
                tracing::debug!(stream_id = frame.stream_id, error = %e, "unknown manifest shape");
                None
            }
        }
    }

    async fn handle_record(&mut self, record: ManifestRecord) -> SendOutcome {
        match record {
            ManifestRecord::Config(config) => {
                let id = config.stream_id.value();
                match resolver::resolve(&self.factories, &config) {
                    Ok(slots) => {
                        self.pending_configs.insert(id, PendingStream { config, slots });
                        Ok(())
                    }
                    // A factory failure is fatal for this stream only.
                    Err(e) => self.send(Err(e)).await,
                }
            }
            ManifestRecord::Result(result) => self.send(Ok(StreamEvent::End(result))).await,
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> SendOutcome {
        let id = frame.stream_id;
        match frame.kind() {
            Some(FrameType::StreamHeader) => {
                let Some(PendingStream { config, slots }) = self.pending_configs.remove(&id) else {
                    tracing::debug!(stream_id = id, "header without pending config, dropping");
                    return Ok(());
                };
                let (writer, reader) = pipe(self.high_water_mark);
                self.open_pipes.insert(id, writer);
                let begin = StreamFileBegin {
                    stream_id: config.stream_id,
                    combine_id: config.combine_id,
                    filters: config.filters,
                    stream: reader,
                    slots,
                };
                self.send(Ok(StreamEvent::Begin(begin))).await
            }
            Some(FrameType::StreamData) => {
                match self.open_pipes.get_mut(&id) {
                    Some(writer) => {
                        // Suspends while the consumer is at the high-water
                        // mark; a closed pipe means the consumer cancelled.
                        if writer.send(frame.payload).await.is_err() {
                            tracing::debug!(stream_id = id, "consumer cancelled, draining");
                            self.open_pipes.remove(&id);
                        }
                    }
                    None => {
                        tracing::trace!(stream_id = id, "no open pipe, frame drained");
                    }
                }
                Ok(())
            }
            Some(FrameType::StreamTrailer) => {
                // The trailer body is reserved; nothing in it is load-bearing.
                if let Some(mut writer) = self.open_pipes.remove(&id) {
                    writer.close();
                }
                Ok(())
            }
            other => {
                tracing::debug!(stream_id = id, frame_type = frame.frame_type, kind = ?other, "frame dropped at event boundary");
                Ok(())
            }
        }
    }

    /// Input ended mid-stream: whoever is still open gets the error.
    fn fail_open_streams(&mut self, error: &Error) {
        for (_, mut writer) in self.open_pipes.drain() {
            writer.send_error(clone_fatal(error));
            writer.close();
        }
    }

    /// Clean EOF. Streams without a trailer are truncated.
    fn finish(&mut self) {
        for (id, mut writer) in self.open_pipes.drain() {
            tracing::warn!(stream_id = id, "input ended before stream trailer");
            writer.send_error(Error::Truncated);
            writer.close();
        }
    }
}

/// Fatal framing errors carried into per-stream pipes.
fn clone_fatal(error: &Error) -> Error {
    match error {
        Error::ValueOutOfRange(v) => Error::ValueOutOfRange(*v),
        _ => Error::Truncated,
    }
}
