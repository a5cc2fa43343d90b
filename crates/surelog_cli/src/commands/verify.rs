//! Verify command implementation.

use super::{open_directory, scan, PayloadCodec};
use std::collections::BTreeSet;
use std::path::Path;
use surelog_core::inspect::{list_segments, SegmentScan};
use surelog_core::wal::RecordTag;

/// Verification result for one segment.
#[derive(Debug)]
pub struct VerifyResult {
    /// Segment name.
    pub segment: String,
    /// Number of records checked.
    pub records_checked: usize,
    /// List of problems found.
    pub errors: Vec<String>,
}

impl VerifyResult {
    fn new(segment: &str) -> Self {
        Self {
            segment: segment.to_string(),
            records_checked: 0,
            errors: Vec::new(),
        }
    }

    fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Runs the verify command.
pub fn run(
    path: &Path,
    codec: PayloadCodec,
    descriptor: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Verifying log at {}", path.display());
    println!();

    let directory = open_directory(path)?;
    let entries = list_segments(&directory)?;
    if entries.is_empty() {
        println!("No segments found (this may be normal for a new log)");
    }

    let mut all_ok = true;
    for entry in entries {
        let result = match scan(&directory, &entry.name, codec) {
            Ok(segment) => verify_segment(&segment, descriptor),
            Err(e) => {
                let mut result = VerifyResult::new(&entry.name);
                result.errors.push(e.to_string());
                result
            }
        };
        print_result(&result);
        all_ok &= result.is_ok();
    }

    println!();
    if all_ok {
        println!("✓ Log verification passed");
        Ok(())
    } else {
        println!("✗ Log verification failed");
        Err("Verification failed".into())
    }
}

/// Checks one scanned segment.
///
/// Besides readability, BEGIN ids must strictly increase and every COMMIT
/// must name an id begun earlier in the same segment.
pub fn verify_segment<E>(segment: &SegmentScan<E>, descriptor: Option<&str>) -> VerifyResult {
    let mut result = VerifyResult::new(&segment.name);

    match (&segment.header, descriptor) {
        (None, _) => result.errors.push("Header is missing or truncated".to_string()),
        (Some(header), Some(expected)) if header.type_descriptor != expected => {
            result.errors.push(format!(
                "Event type mismatch: expected {}, found {}",
                expected, header.type_descriptor
            ));
        }
        _ => {}
    }

    let mut begun = BTreeSet::new();
    let mut last_begin = 0;
    for record in &segment.records {
        result.records_checked += 1;
        let id = record.id.as_u32();
        match record.tag {
            RecordTag::Begin => {
                if id <= last_begin {
                    result.errors.push(format!(
                        "BEGIN {} at offset {} does not follow {}",
                        id, record.offset, last_begin
                    ));
                }
                last_begin = last_begin.max(id);
                begun.insert(id);
            }
            RecordTag::Commit => {
                if !begun.contains(&id) {
                    result.errors.push(format!(
                        "COMMIT {} at offset {} has no BEGIN",
                        id, record.offset
                    ));
                }
            }
        }
    }

    if let Some(corruption) = &segment.corruption {
        result.errors.push(corruption.to_string());
    }

    result
}

fn print_result(result: &VerifyResult) {
    let mark = if result.is_ok() { "✓" } else { "✗" };
    println!(
        "  {} {}: {} records checked",
        mark, result.segment, result.records_checked
    );
    for error in &result.errors {
        println!("      - {}", error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use surelog_core::inspect::ScannedRecord;
    use surelog_core::wal::Header;
    use surelog_core::{CorruptionReport, EventId};

    fn record(offset: u64, tag: RecordTag, id: u32) -> ScannedRecord {
        ScannedRecord {
            offset,
            tag,
            id: EventId::new(id),
        }
    }

    fn scan_of(records: Vec<ScannedRecord>) -> SegmentScan<()> {
        SegmentScan {
            name: "part.0".to_string(),
            location: "/tmp/log/part.0".to_string(),
            size: 64,
            header: Some(Header::new("orders/v1")),
            records,
            uncommitted: BTreeMap::new(),
            max_id: 0,
            corruption: None,
        }
    }

    #[test]
    fn well_formed_segment_passes() {
        let segment = scan_of(vec![
            record(15, RecordTag::Begin, 1),
            record(25, RecordTag::Begin, 2),
            record(35, RecordTag::Commit, 2),
        ]);
        let result = verify_segment(&segment, Some("orders/v1"));
        assert!(result.is_ok());
        assert_eq!(result.records_checked, 3);
    }

    #[test]
    fn descriptor_mismatch_fails() {
        let segment = scan_of(vec![]);
        assert!(!verify_segment(&segment, Some("orders/v2")).is_ok());
        assert!(verify_segment(&segment, None).is_ok());
    }

    #[test]
    fn ordering_problems_are_reported() {
        let segment = scan_of(vec![
            record(15, RecordTag::Begin, 2),
            record(25, RecordTag::Begin, 2),
            record(35, RecordTag::Commit, 7),
        ]);
        let result = verify_segment(&segment, None);
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn corruption_fails() {
        let mut segment = scan_of(vec![]);
        segment.corruption = Some(CorruptionReport {
            location: segment.location.clone(),
            offset: 15,
            length: 64,
            reason: "record truncated".to_string(),
        });
        assert!(!verify_segment(&segment, None).is_ok());
    }
}
