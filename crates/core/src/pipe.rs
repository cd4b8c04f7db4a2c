//! Bounded byte channels connecting the binder to stream consumers.
//!
//! A pipe carries the encoded bytes of one logical stream. The writer half
//! stays inside the binder; the reader half is handed out on the
//! stream-begin event. The channel is bounded by a high-water mark so a slow
//! consumer of one stream suspends the binder's copy instead of inflating
//! memory, and dropping the reader cancels the stream (the binder drains
//! subsequent data frames to discard).

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_channel::mpsc;
use futures_util::{Stream, StreamExt};

use crate::{Error, Result};

/// Default per-stream high-water mark, in chunks.
pub const DEFAULT_HIGH_WATER_MARK: usize = 16;

/// Creates a bounded byte pipe.
///
/// `high_water_mark` is the number of chunks buffered before
/// [`PipeWriter::send`] suspends.
pub fn pipe(high_water_mark: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(high_water_mark);
    (PipeWriter { tx }, PipeReader { rx })
}

/// The feeding half of a byte pipe, owned by the binder.
#[derive(Debug)]
pub struct PipeWriter {
    tx: mpsc::Sender<Result<Bytes>>,
}

impl PipeWriter {
    /// Sends one chunk, suspending while the pipe is at its high-water mark.
    ///
    /// Fails with [`Error::Closed`] once the reader half is gone.
    pub async fn send(&mut self, chunk: Bytes) -> Result<()> {
        futures_util::future::poll_fn(|cx| self.tx.poll_ready(cx))
            .await
            .map_err(|_| Error::Closed)?;
        self.tx.try_send(Ok(chunk)).map_err(|_| Error::Closed)
    }

    /// Injects a fatal error; the reader observes it on its next pull.
    pub fn send_error(&mut self, error: Error) {
        // Clone so the error lands even when the buffer is full.
        let _ = self.tx.clone().try_send(Err(error));
    }

    /// Closes the pipe from the sending side (normal completion).
    pub fn close(&mut self) {
        self.tx.close_channel();
    }

    /// Whether the reader half has been dropped or cancelled.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The consuming half of a byte pipe.
///
/// Yields the chunks the binder copied out of STREAM_DATA frames. Dropping
/// the reader (or calling [`cancel`](Self::cancel)) cancels the stream
/// without affecting the rest of the container.
#[derive(Debug)]
pub struct PipeReader {
    rx: mpsc::Receiver<Result<Bytes>>,
}

impl PipeReader {
    /// Stops the stream: the binder's next write fails fast and later data
    /// frames for this stream are drained to discard.
    pub fn cancel(&mut self) {
        self.rx.close();
    }

    /// Collects every remaining chunk into one buffer.
    pub async fn read_to_end(mut self) -> Result<Bytes> {
        let mut out = BytesMut::new();
        while let Some(chunk) = self.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out.freeze())
    }
}

impl Stream for PipeReader {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_next_unpin(cx)
    }
}
