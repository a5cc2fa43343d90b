//! Property-based test generators using proptest.
//!
//! Provides strategies for generating events and operation sequences.

use crate::fixtures::Parcel;
use proptest::prelude::*;

/// Strategy for generating parcels.
pub fn parcel_strategy() -> impl Strategy<Value = Parcel> {
    (
        any::<u64>(),
        prop::string::string_regex("[a-z]{1,12}").expect("Invalid regex"),
    )
        .prop_map(|(number, route)| Parcel::new(number, route))
}

/// Strategy for generating batches of parcels.
pub fn parcels_strategy(max: usize) -> impl Strategy<Value = Vec<Parcel>> {
    prop::collection::vec(parcel_strategy(), 1..=max)
}

/// Strategy for generating raw byte payloads.
pub fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// One step against a running log.
#[derive(Debug, Clone)]
pub enum LogOp {
    /// Submit a parcel.
    Submit(Parcel),
    /// Rotate segments.
    Rotate,
}

/// Strategy for generating operation sequences, mostly submissions.
pub fn log_ops_strategy(max: usize) -> impl Strategy<Value = Vec<LogOp>> {
    prop::collection::vec(
        prop_oneof![
            4 => parcel_strategy().prop_map(LogOp::Submit),
            1 => Just(LogOp::Rotate),
        ],
        1..=max,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crash::SegmentFile;
    use crate::fixtures::{fast_config, parcel_codec, Script, TestLog};
    use proptest::test_runner::Config as ProptestConfig;
    use std::sync::Arc;
    use surelog_core::inspect::{list_segments, scan_segment};
    use surelog_core::wal::RecordTag;
    use surelog_core::{CorruptionReport, Segment, SegmentContext};
    use surelog_storage::InMemoryDirectory;

    fn context(max_event_id: u32) -> SegmentContext<Parcel> {
        SegmentContext::new(
            Arc::new(parcel_codec()),
            Arc::new(|_: &CorruptionReport| {}),
            max_event_id,
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn begin_ids_count_up_from_one(ops in log_ops_strategy(40), max_event_id in 1u32..8) {
            let test_log = TestLog::new();
            test_log.processor.set(Script::Defer);
            let log = test_log
                .open_with(fast_config().max_event_id(max_event_id))
                .unwrap();

            let mut submitted = 0;
            for op in &ops {
                match op {
                    LogOp::Submit(parcel) => {
                        log.submit(parcel).unwrap();
                        submitted += 1;
                    }
                    LogOp::Rotate => log.rotate().unwrap(),
                }
            }
            log.close().unwrap();
            drop(log);

            let directory = test_log.directory();
            let mut begun = 0;
            for entry in list_segments(&directory).unwrap() {
                let scan = scan_segment(&directory, &entry.name, &parcel_codec(), true).unwrap();
                prop_assert!(scan.is_clean());
                let ids: Vec<u32> = scan
                    .records
                    .iter()
                    .filter(|r| r.tag == RecordTag::Begin)
                    .map(|r| r.id.as_u32())
                    .collect();
                let expected: Vec<u32> = (1..=ids.len() as u32).collect();
                prop_assert_eq!(&ids, &expected);
                prop_assert!(scan.max_id <= max_event_id);
                begun += ids.len();
            }
            prop_assert_eq!(begun, submitted);
        }

        #[test]
        fn recovery_is_idempotent(parcels in parcels_strategy(12), cut in 0u64..64) {
            let mut file = SegmentFile::parcels();
            for (i, parcel) in parcels.iter().enumerate() {
                file = file.begin(i as u32 + 1, parcel);
            }
            let header_len = SegmentFile::parcels().len();
            let keep = file.len().saturating_sub(cut).max(header_len);
            let mut bytes = file.into_bytes();
            bytes.truncate(keep as usize);

            let dir = InMemoryDirectory::new();
            dir.put("part.0", bytes);
            let ctx = context(1000);

            let first = Segment::open(&dir, "part.0", &ctx).unwrap();
            let recovered = first.uncommitted_snapshot();
            first.close().unwrap();
            let after_first = dir.contents("part.0").unwrap();

            let reports = Arc::new(parking_lot::Mutex::new(0));
            let counter = Arc::clone(&reports);
            let ctx = SegmentContext::new(
                Arc::new(parcel_codec()),
                Arc::new(move |_: &CorruptionReport| *counter.lock() += 1),
                1000,
            );
            let second = Segment::open(&dir, "part.0", &ctx).unwrap();
            prop_assert_eq!(*reports.lock(), 0);
            prop_assert_eq!(second.uncommitted_snapshot(), recovered.clone());
            prop_assert_eq!(dir.contents("part.0").unwrap(), after_first);

            let events: Vec<Parcel> = recovered.into_iter().map(|(_, p)| p).collect();
            prop_assert_eq!(&events[..], &parcels[..events.len()]);
        }
    }
}
