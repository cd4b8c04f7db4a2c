//! Combines per-stream CIDs into a single group identifier.
//!
//! A collector hands out ordered [`CidEncoder`] slots. Once every member
//! stream has been flushed, the combined CID is the CIDv1 `raw` hash of the
//! canonical JSON array of the member CID strings, in registration order.

use sha2::{Digest, Sha256};

use crate::filter::cid::{cid_of_digest, CidEncoder, CidSlot};
use crate::{Error, Result};

/// Orders CID filter slots and derives their combined identifier.
#[derive(Debug, Default)]
pub struct CidCollector {
    combine_id: Option<String>,
    slots: Vec<CidSlot>,
}

impl CidCollector {
    /// Creates a collector with no grouping label.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a collector whose member configs carry `combine_id`.
    pub fn with_combine_id(combine_id: impl Into<String>) -> Self {
        Self {
            combine_id: Some(combine_id.into()),
            slots: Vec::new(),
        }
    }

    /// The grouping label members declare, if any.
    pub fn combine_id(&self) -> Option<&str> {
        self.combine_id.as_deref()
    }

    /// Registers the next member slot and returns its encoder.
    pub fn slot(&mut self) -> CidEncoder {
        let slot = CidSlot::default();
        self.slots.push(slot.clone());
        CidEncoder::with_slot(self.combine_id.clone(), slot)
    }

    /// The resolved member CIDs, in registration order.
    ///
    /// Fails while any member stream has not been flushed yet.
    pub fn member_cids(&self) -> Result<Vec<String>> {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.get().cloned().ok_or_else(|| {
                    Error::filter(format!("collector slot {i} has not resolved its cid"))
                })
            })
            .collect()
    }

    /// The combined CID over all member CIDs.
    ///
    /// Fails with [`Error::EmptyCollector`] when no slot was registered.
    pub fn result(&self) -> Result<String> {
        if self.slots.is_empty() {
            return Err(Error::EmptyCollector);
        }
        let members = self.member_cids()?;
        let canonical = serde_json::to_vec(&members).map_err(Error::Json)?;
        cid_of_digest(&Sha256::digest(&canonical))
    }
}
