//! The core crate of the QSF container format.
//!
//! QSF (QUIC Stream File) multiplexes independent byte streams into a
//! single file or byte sequence. Each stream passes through a composable
//! filter pipeline (content addressing, compression, encryption) declared
//! in manifest records that travel in-band, so readers start consuming
//! streams as soon as their framing headers arrive.
//!
//! # Writing
//!
//! ```ignore
//! use qsf_core::filter::cid::cid;
//! use qsf_core::filter::zstr::{zstr, ZCodec};
//! use qsf_core::writer::{QsfWriter, WriteEntry};
//!
//! let mut writer = QsfWriter::new(file);
//! writer
//!     .write_entry(WriteEntry::new("hello").encoder(cid()).encoder(zstr(ZCodec::Deflate)))
//!     .await?;
//! writer.finish().await?;
//! ```
//!
//! # Reading
//!
//! ```ignore
//! use futures_util::StreamExt;
//! use qsf_core::reader::{QsfReader, StreamEvent};
//!
//! let mut reader = QsfReader::new(file);
//! while let Some(event) = reader.next().await {
//!     match event? {
//!         StreamEvent::Begin(begin) => {
//!             let plaintext = begin.decode()?.read_to_end().await?;
//!         }
//!         StreamEvent::End(end) => println!("stream {} done", end.stream_id),
//!     }
//! }
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

mod error;
pub mod filter;
pub mod frame;
pub mod manifest;
pub mod pipe;
pub mod reader;
pub mod resolver;
pub mod varint;
pub mod writer;

pub use self::error::{BoxedError, Error, Result};
pub use self::frame::{Frame, FrameType};
pub use self::manifest::{ManifestCodec, ManifestRecord, StreamConfigRecord, StreamResultRecord};
pub use self::reader::{QsfReader, ReaderOptions, StreamEvent, StreamFileBegin, StreamFileEnd};
pub use self::varint::Varint;
pub use self::writer::{EntrySource, QsfWriter, WriteEntry};

/// Conventional file extension for QSF containers.
pub const FILE_EXTENSION: &str = "qsf";

/// Unregistered MIME type for QSF containers.
pub const MIME_TYPE: &str = "application/x.qsf";
