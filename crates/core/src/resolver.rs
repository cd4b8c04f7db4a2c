//! Binds manifest-declared filter configs to decoder instances.
//!
//! For every `stream.config` record the reader builds one [`FilterSlot`] per
//! declared filter, then folds the factory list over the slots left to
//! right. Factories fill `instance` on the slots they recognize; whatever is
//! still empty when the consumer calls `decode()` fails at that point, not
//! earlier, so a consumer without the right factory can still take the raw
//! stream.

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use crate::filter::{DecoderFactory, DecoderFilter, Pipeline};
use crate::manifest::{FilterConfig, StreamConfigRecord};
use crate::{Error, Result};

/// One filter position in a stream's declared pipeline.
pub struct FilterSlot {
    /// The config as it appeared in the `stream.config` record.
    pub input: FilterConfig,
    /// The decoder a factory assigned, if any claimed the slot.
    pub instance: Option<Box<dyn DecoderFilter>>,
}

impl FilterSlot {
    /// Creates an unclaimed slot.
    #[inline]
    pub fn new(input: FilterConfig) -> Self {
        Self {
            input,
            instance: None,
        }
    }
}

impl Debug for FilterSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterSlot")
            .field("input", &self.input.type_name())
            .field("resolved", &self.instance.is_some())
            .finish()
    }
}

/// Runs the factory fold for one `stream.config` record.
///
/// Factory errors are fatal for the stream (they propagate out of the
/// binder); an unclaimed slot is not, it surfaces later, from
/// [`decode_pipeline`].
pub fn resolve(
    factories: &[Arc<dyn DecoderFactory>],
    record: &StreamConfigRecord,
) -> Result<Vec<FilterSlot>> {
    let mut slots: Vec<FilterSlot> = record.filters.iter().cloned().map(FilterSlot::new).collect();
    for factory in factories {
        slots = factory.detect(record, slots)?;
    }
    Ok(slots)
}

/// Composes the resolved decode transforms in reverse declaration order.
///
/// Fails with [`Error::UnresolvedFilter`] naming the first slot no factory
/// claimed.
pub fn decode_pipeline(slots: &mut [FilterSlot]) -> Result<Pipeline> {
    let mut transforms = Vec::with_capacity(slots.len());
    for slot in slots.iter_mut() {
        let Some(instance) = slot.instance.as_mut() else {
            return Err(Error::UnresolvedFilter(slot.input.type_name().to_owned()));
        };
        transforms.push(instance.decode()?);
    }
    transforms.reverse();
    Ok(Pipeline::new(transforms))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::filter::cid::CidFactory;
    use crate::filter::zstr::ZStrFactory;
    use crate::filter::{BoxTransform, Transform};
    use crate::manifest::CidConfig;
    use crate::varint::Varint;

    fn record(filters: Vec<FilterConfig>) -> StreamConfigRecord {
        StreamConfigRecord {
            stream_id: Varint::new(0).expect("in range"),
            combine_id: None,
            filters,
        }
    }

    struct NoopDecoder;

    impl DecoderFilter for NoopDecoder {
        fn decode(&mut self) -> Result<BoxTransform> {
            struct Noop;
            impl Transform for Noop {
                fn update(&mut self, chunk: bytes::Bytes) -> Result<bytes::Bytes> {
                    Ok(chunk)
                }
                fn finish(&mut self) -> Result<bytes::Bytes> {
                    Ok(bytes::Bytes::new())
                }
            }
            Ok(Box::new(Noop))
        }
    }

    /// Claims every still-empty slot, regardless of type.
    struct GreedyFactory;

    impl DecoderFactory for GreedyFactory {
        fn detect(
            &self,
            _record: &StreamConfigRecord,
            mut slots: Vec<FilterSlot>,
        ) -> Result<Vec<FilterSlot>> {
            for slot in &mut slots {
                if slot.instance.is_none() {
                    slot.instance = Some(Box::new(NoopDecoder));
                }
            }
            Ok(slots)
        }
    }

    #[test]
    fn test_builtin_factories_claim_their_slots() {
        let factories: Vec<Arc<dyn DecoderFactory>> =
            vec![Arc::new(CidFactory), Arc::new(ZStrFactory)];
        let record = record(vec![
            FilterConfig::Cid(CidConfig::default()),
            FilterConfig::ZStr(crate::manifest::ZStrConfig {
                codec: crate::filter::zstr::ZCodec::Deflate,
            }),
        ]);
        let mut slots = resolve(&factories, &record).expect("ok");
        assert!(slots.iter().all(|s| s.instance.is_some()));
        assert!(decode_pipeline(&mut slots).is_ok());
    }

    #[test]
    fn test_unresolved_slot_fails_at_decode_time() {
        let factories: Vec<Arc<dyn DecoderFactory>> = vec![Arc::new(CidFactory)];
        let record = record(vec![
            FilterConfig::Cid(CidConfig::default()),
            FilterConfig::Other(json!({ "type": "Vendor.config" })),
        ]);
        let mut slots = resolve(&factories, &record).expect("fold itself succeeds");
        assert!(slots[1].instance.is_none());

        match decode_pipeline(&mut slots) {
            Err(Error::UnresolvedFilter(name)) => assert_eq!(name, "Vendor.config"),
            other => panic!("expected UnresolvedFilter, got {other:?}"),
        }
    }

    #[test]
    fn test_first_claim_wins() {
        // CidFactory runs first; the greedy factory only gets the leftovers.
        let factories: Vec<Arc<dyn DecoderFactory>> =
            vec![Arc::new(CidFactory), Arc::new(GreedyFactory)];
        let record = record(vec![
            FilterConfig::Cid(CidConfig::default()),
            FilterConfig::Other(json!({ "type": "Vendor.config" })),
        ]);
        let mut slots = resolve(&factories, &record).expect("ok");
        assert!(decode_pipeline(&mut slots).is_ok());
    }
}
