//! Error types shared by every QSF pipeline stage.
//!
//! The discriminants are part of the format contract: callers match on them
//! to decide whether a failure is fatal for the whole container, fatal for a
//! single stream, or recoverable.

use std::error::Error as StdError;
use std::io::Error as IoError;

/// A boxed error type for dynamic error handling.
pub type BoxedError = Box<dyn StdError + Send + Sync>;

/// Result type which has [`Error`] as its error type.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type used throughout the QSF engine.
///
/// Fatality depends on where the error surfaces:
///
/// - [`Truncated`](Error::Truncated) and [`ValueOutOfRange`](Error::ValueOutOfRange)
///   abort the reader; the byte stream itself is unusable.
/// - [`ManifestDecode`](Error::ManifestDecode) and
///   [`UnknownManifestShape`](Error::UnknownManifestShape) never escape the
///   manifest stage; the offending frame is forwarded unparsed instead.
/// - [`CidMismatch`](Error::CidMismatch) and [`DecryptFailure`](Error::DecryptFailure)
///   are fatal for a single stream's decode and surface on the consumer's read.
/// - [`UnresolvedFilter`](Error::UnresolvedFilter) and
///   [`EmptyCollector`](Error::EmptyCollector) are synchronous API failures.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The byte stream ended in the middle of a varint or a frame payload.
    #[error("byte stream truncated mid-frame")]
    Truncated,

    /// A varint value exceeds the 62-bit maximum.
    #[error("value {0} exceeds the 62-bit varint range")]
    ValueOutOfRange(u64),

    /// The byte serializer rejected a MANIFEST_ENTRY body.
    #[error("manifest body rejected by serializer: {0}")]
    ManifestDecode(#[source] serde_json::Error),

    /// A MANIFEST_ENTRY body decoded, but matches no known record schema.
    #[error("manifest record matches no known schema")]
    UnknownManifestShape,

    /// The CID computed over the decoded bytes disagrees with the expected one.
    #[error("cid mismatch: expected {expected}, computed {computed}")]
    CidMismatch {
        /// The CID the decoder was told to verify against.
        expected: String,
        /// The CID actually computed over the decoded bytes.
        computed: String,
    },

    /// AES-GCM tag verification failed, or a ciphertext chunk was malformed.
    #[error("decrypt failure: authentication tag rejected")]
    DecryptFailure,

    /// `decode()` was invoked on a stream whose filter had no matching factory.
    #[error("no decoder factory resolved filter {0:?}")]
    UnresolvedFilter(String),

    /// A CID collector with no registered slots was asked for its result.
    #[error("cid collector has no registered slots")]
    EmptyCollector,

    /// The peer side of a byte pipe is gone.
    #[error("byte pipe closed by peer")]
    Closed,

    /// I/O error from the sink or source.
    #[error(transparent)]
    Io(#[from] IoError),

    /// JSON serialization error outside the manifest-decode path.
    #[error(transparent)]
    Json(serde_json::Error),

    /// Any other error raised by a filter implementation.
    #[error("filter error: {0}")]
    Filter(#[source] BoxedError),
}

impl Error {
    /// Wraps any error type raised by a custom filter.
    #[inline]
    pub fn filter(error: impl Into<BoxedError>) -> Self {
        Self::Filter(error.into())
    }
}

impl From<Error> for IoError {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            e => Self::other(e),
        }
    }
}
