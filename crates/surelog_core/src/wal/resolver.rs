//! Segment recovery.
//!
//! Replays a segment's records to rebuild its uncommitted events and id
//! counter. Resolution is pure: it reads bytes and fills a map, and running
//! it twice over the same bytes yields the same result. Truncating the
//! damaged tail is left to the caller.

use super::record::{Record, RecordReader};
use crate::handlers::CorruptionReport;
use crate::types::EventId;
use std::collections::BTreeMap;
use surelog_codec::EventCodec;

/// Outcome of replaying a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Largest id in any readable record, or 0 for an empty segment.
    pub max_id: u32,
    /// Offset just past the last readable record.
    pub end_offset: u64,
    /// The unreadable tail, if any.
    pub corruption: Option<CorruptionReport>,
}

/// Replays `data` from `start`, inserting BEGINs into `uncommitted` and
/// removing COMMITs from it.
pub fn resolve<E>(
    data: &[u8],
    start: usize,
    codec: &dyn EventCodec<E>,
    uncommitted: &mut BTreeMap<EventId, E>,
    location: &str,
) -> Resolution {
    resolve_with(data, start, codec, uncommitted, location, |_, _| {})
}

/// Like [`resolve`], also handing every readable record and its offset to
/// `visit` before it is applied.
pub fn resolve_with<E, F>(
    data: &[u8],
    start: usize,
    codec: &dyn EventCodec<E>,
    uncommitted: &mut BTreeMap<EventId, E>,
    location: &str,
    mut visit: F,
) -> Resolution
where
    F: FnMut(u64, &Record<E>),
{
    let mut reader = RecordReader::new(data, start, codec);
    let mut max_id = 0;
    let mut corruption = None;

    for item in reader.by_ref() {
        match item {
            Ok((offset, record)) => {
                visit(offset, &record);
                max_id = max_id.max(record.id().as_u32());
                match record {
                    Record::Begin { id, event } => {
                        uncommitted.insert(id, event);
                    }
                    Record::Commit { id } => {
                        uncommitted.remove(&id);
                    }
                }
            }
            Err(fault) => {
                corruption = Some(CorruptionReport {
                    location: location.to_string(),
                    offset: fault.offset,
                    length: data.len() as u64,
                    reason: fault.reason.to_string(),
                });
            }
        }
    }

    Resolution {
        max_id,
        end_offset: reader.position(),
        corruption,
    }
}
