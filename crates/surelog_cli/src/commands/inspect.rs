//! Inspect command implementation.

use super::{open_directory, scan, OutputFormat, PayloadCodec};
use serde::Serialize;
use std::path::Path;
use surelog_core::inspect::{list_segments, SegmentKind};

/// Log directory inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Directory path.
    pub path: String,
    /// Total size of all segments in bytes.
    pub total_size: u64,
    /// Uncommitted events across all segments.
    pub total_uncommitted: usize,
    /// Per-segment details, sealed first.
    pub segments: Vec<SegmentSummary>,
}

/// Summary of a single segment.
#[derive(Debug, Serialize)]
pub struct SegmentSummary {
    /// Segment name.
    pub name: String,
    /// Whether this is the current segment.
    pub current: bool,
    /// Size in bytes.
    pub size: u64,
    /// Event type descriptor from the header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<String>,
    /// Readable records.
    pub records: usize,
    /// Largest event id seen.
    pub max_id: u32,
    /// Number of uncommitted events.
    pub uncommitted: usize,
    /// Uncommitted event ids (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uncommitted_ids: Option<Vec<u32>>,
    /// Description of an unreadable tail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corruption: Option<String>,
    /// Error that stopped the scan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    codec: PayloadCodec,
    show_uncommitted: bool,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let directory = open_directory(path)?;
    let entries = list_segments(&directory)?;
    if entries.is_empty() {
        return Err(format!("No log segments found at {}", path.display()).into());
    }

    let mut result = InspectResult {
        path: path.display().to_string(),
        total_size: 0,
        total_uncommitted: 0,
        segments: Vec::with_capacity(entries.len()),
    };

    for entry in entries {
        result.total_size += entry.size;
        let mut summary = SegmentSummary {
            name: entry.name.clone(),
            current: entry.kind == SegmentKind::Current,
            size: entry.size,
            descriptor: None,
            records: 0,
            max_id: 0,
            uncommitted: 0,
            uncommitted_ids: None,
            corruption: None,
            error: None,
        };

        match scan(&directory, &entry.name, codec) {
            Ok(segment) => {
                summary.descriptor = segment.header.map(|h| h.type_descriptor);
                summary.records = segment.records.len();
                summary.max_id = segment.max_id;
                summary.uncommitted = segment.uncommitted.len();
                summary.corruption = segment.corruption.map(|c| c.to_string());
                if show_uncommitted {
                    summary.uncommitted_ids =
                        Some(segment.uncommitted.keys().map(|id| id.as_u32()).collect());
                }
            }
            Err(e) => summary.error = Some(e.to_string()),
        }

        result.total_uncommitted += summary.uncommitted;
        result.segments.push(summary);
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        OutputFormat::Text => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("surelog Directory Inspection");
    println!("============================");
    println!();
    println!("Path: {}", result.path);
    println!("Total size:  {}", format_size(result.total_size));
    println!("Uncommitted: {}", result.total_uncommitted);
    println!();
    println!("Segments:");
    for segment in &result.segments {
        let role = if segment.current { " (current)" } else { "" };
        println!("  {}{}", segment.name, role);
        println!("    Size:        {}", format_size(segment.size));
        if let Some(descriptor) = &segment.descriptor {
            println!("    Event type:  {descriptor}");
        }
        println!("    Records:     {}", segment.records);
        println!("    Max id:      {}", segment.max_id);
        println!("    Uncommitted: {}", segment.uncommitted);
        if let Some(ids) = &segment.uncommitted_ids {
            let ids: Vec<String> = ids.iter().map(u32::to_string).collect();
            println!("    Ids:         {}", ids.join(", "));
        }
        if let Some(corruption) = &segment.corruption {
            println!("    Corruption:  {corruption}");
        }
        if let Some(error) = &segment.error {
            println!("    Error:       {error}");
        }
    }
}

pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
