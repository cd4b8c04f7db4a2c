//! Filter contracts and the built-in filters.
//!
//! A filter is a unit of transformation with distinct encode and decode
//! halves and a declared manifest config. The engine talks to filters
//! through three seams: [`EncoderFilter`] on the write path,
//! [`DecoderFilter`] on the read path, and [`DecoderFactory`] to bind
//! manifest-declared configs to decoder instances.

use bytes::Bytes;

use crate::manifest::{FilterConfig, FilterResult, StreamConfigRecord};
use crate::resolver::FilterSlot;
use crate::Result;

pub mod cid;
pub mod collector;
pub mod zstr;

/// A boxed single-use byte transform.
pub type BoxTransform = Box<dyn Transform>;

/// A chunk-in/chunk-out byte transform with a flush hook.
///
/// `update` consumes one chunk and yields at most one output chunk; an empty
/// return means the transform is buffering. `finish` flushes whatever state
/// remains. Transforms own their in-flight state (hash accumulator,
/// compression dictionary, cipher randomness) and serve exactly one stream.
pub trait Transform: Send {
    /// Feeds one chunk through the transform.
    fn update(&mut self, chunk: Bytes) -> Result<Bytes>;

    /// Flushes buffered state at end of stream.
    fn finish(&mut self) -> Result<Bytes>;
}

/// The write half of a filter.
///
/// The writer instantiates the transform *before* reading the config: some
/// filters finalize per-stream state (key material, collector registration)
/// at instantiation time and only then is their config stable.
pub trait EncoderFilter: Send {
    /// Creates this filter's encode transform.
    fn encode(&mut self) -> Result<BoxTransform>;

    /// The config to declare in the `stream.config` record.
    fn config(&self) -> Result<FilterConfig>;

    /// The outcome to report in the `stream.result` record, once the encode
    /// transform has been flushed. `None` entries are omitted from the
    /// record.
    fn result(&self) -> Option<FilterResult>;
}

/// The read half of a filter.
pub trait DecoderFilter: Send {
    /// Creates this filter's decode transform.
    fn decode(&mut self) -> Result<BoxTransform>;
}

/// Binds manifest-declared filter configs to [`DecoderFilter`] instances.
///
/// Factories run as a left-to-right fold over the slot list (see
/// [`resolver`](crate::resolver)). By convention a factory fills `instance`
/// only on slots whose `input` carries its recognized `type` discriminant
/// and whose `instance` is still empty: first claim wins. The engine does
/// not enforce the convention.
pub trait DecoderFactory: Send + Sync {
    /// One fold step: inspect the record, claim matching slots.
    fn detect(&self, record: &StreamConfigRecord, slots: Vec<FilterSlot>)
        -> Result<Vec<FilterSlot>>;
}

/// An ordered chain of transforms.
///
/// `update` threads each stage's output into the next; an empty
/// intermediate output short-circuits (the stage is buffering). `finish`
/// flushes stage *i* and pushes its residue through stages *i+1…*,
/// preserving chunk boundaries: one `Vec` entry per emitted chunk.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<BoxTransform>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("stages", &self.stages.len()).finish()
    }
}

impl Pipeline {
    /// Builds a pipeline from stages in application order.
    #[inline]
    pub fn new(stages: Vec<BoxTransform>) -> Self {
        Self { stages }
    }

    /// Whether the pipeline has no stages (pass-through).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Feeds one chunk through every stage.
    pub fn update(&mut self, chunk: Bytes) -> Result<Bytes> {
        let mut chunk = chunk;
        for stage in &mut self.stages {
            if chunk.is_empty() {
                break;
            }
            chunk = stage.update(chunk)?;
        }
        Ok(chunk)
    }

    /// Flushes every stage in order.
    pub fn finish(&mut self) -> Result<Vec<Bytes>> {
        let mut out = Vec::new();
        for i in 0..self.stages.len() {
            let mut residue = self.stages[i].finish()?;
            for j in i + 1..self.stages.len() {
                if residue.is_empty() {
                    break;
                }
                residue = self.stages[j].update(residue)?;
            }
            if !residue.is_empty() {
                out.push(residue);
            }
        }
        Ok(out)
    }
}
