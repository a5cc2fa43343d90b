//! Dump command implementation.

use super::{open_directory, scan, OutputFormat, PayloadCodec};
use serde::Serialize;
use std::path::Path;
use surelog_core::inspect::SegmentScan;
use surelog_core::wal::RecordTag;

/// Record representation for output.
#[derive(Debug, Serialize)]
pub struct RecordInfo {
    /// Offset in the segment file.
    pub offset: u64,
    /// Record type.
    pub record_type: &'static str,
    /// Event id.
    pub id: u32,
    /// Whether the event is still uncommitted (BEGIN records only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<bool>,
    /// Decoded payload of an uncommitted event (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Full dump of one segment.
#[derive(Debug, Serialize)]
pub struct SegmentDump {
    /// Segment name.
    pub segment: String,
    /// Event type descriptor from the header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<String>,
    /// Records in file order.
    pub records: Vec<RecordInfo>,
    /// Description of an unreadable tail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corruption: Option<String>,
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    segment: &str,
    codec: PayloadCodec,
    limit: Option<usize>,
    payloads: bool,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let directory = open_directory(path)?;
    let scanned = scan(&directory, segment, codec)?;
    let dump = build_dump(scanned, limit, payloads);

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&dump)?);
        }
        OutputFormat::Text => {
            print_text_output(&dump);
        }
    }

    Ok(())
}

/// Converts a scan into its printable form.
pub fn build_dump(
    mut scanned: SegmentScan<serde_json::Value>,
    limit: Option<usize>,
    payloads: bool,
) -> SegmentDump {
    let max_records = limit.unwrap_or(usize::MAX);
    let records = scanned
        .records
        .iter()
        .take(max_records)
        .map(|record| {
            let (record_type, pending, payload) = match record.tag {
                RecordTag::Begin => {
                    let pending = scanned.uncommitted.contains_key(&record.id);
                    let payload = if payloads {
                        scanned.uncommitted.remove(&record.id)
                    } else {
                        None
                    };
                    ("BEGIN", Some(pending), payload)
                }
                RecordTag::Commit => ("COMMIT", None, None),
            };
            RecordInfo {
                offset: record.offset,
                record_type,
                id: record.id.as_u32(),
                pending,
                payload,
            }
        })
        .collect();

    SegmentDump {
        segment: scanned.name,
        descriptor: scanned.header.map(|h| h.type_descriptor),
        records,
        corruption: scanned.corruption.map(|c| c.to_string()),
    }
}

fn print_text_output(dump: &SegmentDump) {
    println!("Segment: {}", dump.segment);
    if let Some(descriptor) = &dump.descriptor {
        println!("Event type: {descriptor}");
    }
    println!("{:>10}  {:<6}  {:>10}", "OFFSET", "TYPE", "ID");
    for record in &dump.records {
        let mut line = format!(
            "{:>10}  {:<6}  {:>10}",
            record.offset, record.record_type, record.id
        );
        if record.pending == Some(true) {
            line.push_str("  pending");
        }
        if let Some(payload) = &record.payload {
            line.push_str(&format!("  {payload}"));
        }
        println!("{line}");
    }
    if let Some(corruption) = &dump.corruption {
        println!();
        println!("Corruption: {corruption}");
    }
}
