//! QSF is a streaming container format: independent byte streams,
//! multiplexed into one file, each run through a composable filter pipeline
//! (content addressing, compression, encryption).
//!
//! This crate re-exports the engine from [`qsf_core`] and, with the
//! `crypto` feature (default), the AES-256-GCM filter from `qsf-crypto`.
#![cfg_attr(docsrs, feature(doc_cfg))]

pub use qsf_core as core;
#[doc(no_inline)]
pub use qsf_core::*;

#[cfg(feature = "crypto")]
#[cfg_attr(docsrs, doc(cfg(feature = "crypto")))]
#[doc(no_inline)]
pub use qsf_crypto as crypto;
