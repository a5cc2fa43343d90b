//! Read-only inspection of log directories.
//!
//! Nothing here writes: damaged tails are reported, not truncated, and
//! missing segments are not created. Safe to run against a live log, though
//! a segment being appended to may show a spurious torn tail.

use crate::error::CoreResult;
use crate::handlers::CorruptionReport;
use crate::manager::{sealed_segments, CURRENT_SEGMENT};
use crate::types::EventId;
use crate::wal::{resolve_with, Header, RecordTag};
use std::collections::BTreeMap;
use surelog_codec::EventCodec;
use surelog_storage::{StorageDirectory, StorageError};

/// Role of a segment in its directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// `part.current`.
    Current,
    /// `part.<index>`.
    Sealed(u64),
}

/// A segment found in a log directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentEntry {
    /// Name within the directory.
    pub name: String,
    /// Current or sealed.
    pub kind: SegmentKind,
    /// Location for diagnostics.
    pub location: String,
    /// Size in bytes.
    pub size: u64,
}

/// Lists segments: sealed ones in index order, then the current one.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn list_segments(directory: &dyn StorageDirectory) -> CoreResult<Vec<SegmentEntry>> {
    let mut names: Vec<(String, SegmentKind)> = sealed_segments(directory)?
        .into_iter()
        .map(|(index, name)| (name, SegmentKind::Sealed(index)))
        .collect();
    if directory.exists(CURRENT_SEGMENT)? {
        names.push((CURRENT_SEGMENT.to_string(), SegmentKind::Current));
    }

    names
        .into_iter()
        .map(|(name, kind)| {
            let size = directory.open(&name)?.size()?;
            Ok(SegmentEntry {
                location: directory.locate(&name),
                name,
                kind,
                size,
            })
        })
        .collect()
}

/// A readable record and where it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScannedRecord {
    /// Offset of the record's first byte.
    pub offset: u64,
    /// BEGIN or COMMIT.
    pub tag: RecordTag,
    /// Event id.
    pub id: EventId,
}

/// Everything a scan learned about one segment.
#[derive(Debug, Clone)]
pub struct SegmentScan<E> {
    /// Name within the directory.
    pub name: String,
    /// Location for diagnostics.
    pub location: String,
    /// Size in bytes.
    pub size: u64,
    /// The header, unless torn.
    pub header: Option<Header>,
    /// Readable records in file order.
    pub records: Vec<ScannedRecord>,
    /// Events begun and never committed.
    pub uncommitted: BTreeMap<EventId, E>,
    /// Largest id seen.
    pub max_id: u32,
    /// The unreadable tail, if any.
    pub corruption: Option<CorruptionReport>,
}

impl<E> SegmentScan<E> {
    /// Returns `true` when the header and every record were readable.
    pub fn is_clean(&self) -> bool {
        self.header.is_some() && self.corruption.is_none()
    }
}

/// Reads a segment's header without scanning its records.
///
/// Returns `None` for a torn header.
///
/// # Errors
///
/// Returns [`StorageError::NotFound`] for a missing segment, or an error for
/// an unsupported version.
pub fn read_header(directory: &dyn StorageDirectory, name: &str) -> CoreResult<Option<Header>> {
    let bytes = read_existing(directory, name)?;
    Ok(Header::decode(&bytes, &directory.locate(name))?.map(|(header, _)| header))
}

/// Scans a segment, decoding events with `codec`.
///
/// With `check_descriptor`, a header naming another event type is an
/// error; without it, the codec is trusted to read whatever is there.
///
/// # Errors
///
/// Returns [`StorageError::NotFound`] for a missing segment, or an error for
/// an unsupported version or (when checked) a foreign event type.
pub fn scan_segment<E>(
    directory: &dyn StorageDirectory,
    name: &str,
    codec: &dyn EventCodec<E>,
    check_descriptor: bool,
) -> CoreResult<SegmentScan<E>> {
    let location = directory.locate(name);
    let bytes = read_existing(directory, name)?;
    let size = bytes.len() as u64;

    let mut scan = SegmentScan {
        name: name.to_string(),
        location,
        size,
        header: None,
        records: Vec::new(),
        uncommitted: BTreeMap::new(),
        max_id: 0,
        corruption: None,
    };

    let Some((header, start)) = Header::decode(&bytes, &scan.location)? else {
        if size > 0 {
            scan.corruption = Some(CorruptionReport {
                location: scan.location.clone(),
                offset: 0,
                length: size,
                reason: "segment header truncated".to_string(),
            });
        }
        return Ok(scan);
    };
    if check_descriptor {
        header.verify(codec.type_descriptor(), &scan.location)?;
    }

    let mut records = Vec::new();
    let resolution = resolve_with(
        &bytes,
        start,
        codec,
        &mut scan.uncommitted,
        &scan.location,
        |offset, record| {
            records.push(ScannedRecord {
                offset,
                tag: record.tag(),
                id: record.id(),
            });
        },
    );

    scan.header = Some(header);
    scan.records = records;
    scan.max_id = resolution.max_id;
    scan.corruption = resolution.corruption;
    Ok(scan)
}

fn read_existing(directory: &dyn StorageDirectory, name: &str) -> CoreResult<Vec<u8>> {
    if !directory.exists(name)? {
        return Err(StorageError::not_found(name).into());
    }
    Ok(directory.open(name)?.read_all()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::wal::{encode_begin, encode_commit};
    use surelog_codec::BytesCodec;
    use surelog_storage::InMemoryDirectory;

    fn segment_bytes(descriptor: &str) -> Vec<u8> {
        let codec = BytesCodec::default();
        let mut bytes = Vec::new();
        Header::new(descriptor).encode(&mut bytes).unwrap();
        encode_begin(EventId::new(1), &b"one".to_vec(), &codec, &mut bytes).unwrap();
        encode_begin(EventId::new(2), &b"two".to_vec(), &codec, &mut bytes).unwrap();
        encode_commit(EventId::new(1), &mut bytes);
        bytes
    }

    #[test]
    fn lists_sealed_then_current() {
        let dir = InMemoryDirectory::new();
        dir.put("part.current", vec![0; 3]);
        dir.put("part.10", vec![0; 10]);
        dir.put("part.9", vec![0; 9]);
        dir.put("notes.txt", vec![]);

        let entries = list_segments(&dir).unwrap();
        let kinds: Vec<_> = entries.iter().map(|e| (e.name.as_str(), e.kind, e.size)).collect();
        assert_eq!(
            kinds,
            vec![
                ("part.9", SegmentKind::Sealed(9), 9),
                ("part.10", SegmentKind::Sealed(10), 10),
                ("part.current", SegmentKind::Current, 3),
            ]
        );
    }

    #[test]
    fn scan_reports_records_and_uncommitted() {
        let dir = InMemoryDirectory::new();
        dir.put("part.0", segment_bytes("bytes"));

        let scan = scan_segment::<Vec<u8>>(&dir, "part.0", &BytesCodec::default(), true).unwrap();
        assert!(scan.is_clean());
        assert_eq!(
            scan.records.iter().map(|r| (r.tag, r.id.as_u32())).collect::<Vec<_>>(),
            vec![(RecordTag::Begin, 1), (RecordTag::Begin, 2), (RecordTag::Commit, 1)]
        );
        assert_eq!(scan.records[0].offset, 11);
        assert_eq!(scan.max_id, 2);
        assert_eq!(
            scan.uncommitted.into_iter().collect::<Vec<_>>(),
            vec![(EventId::new(2), b"two".to_vec())]
        );
    }

    #[test]
    fn scan_never_truncates() {
        let dir = InMemoryDirectory::new();
        let mut bytes = segment_bytes("bytes");
        bytes.extend_from_slice(&[0, 0, 0]);
        dir.put("part.0", bytes.clone());

        let scan = scan_segment::<Vec<u8>>(&dir, "part.0", &BytesCodec::default(), true).unwrap();
        assert_eq!(scan.corruption.unwrap().offset, bytes.len() as u64 - 3);
        assert_eq!(dir.contents("part.0").unwrap(), bytes);
    }

    #[test]
    fn descriptor_check_is_optional() {
        let dir = InMemoryDirectory::new();
        dir.put("part.0", segment_bytes("raw/v1"));

        assert!(matches!(
            scan_segment::<Vec<u8>>(&dir, "part.0", &BytesCodec::default(), true),
            Err(CoreError::TypeMismatch { .. })
        ));
        let scan = scan_segment::<Vec<u8>>(&dir, "part.0", &BytesCodec::default(), false).unwrap();
        assert_eq!(scan.header.unwrap().type_descriptor, "raw/v1");
    }

    #[test]
    fn missing_segment_is_not_created() {
        let dir = InMemoryDirectory::new();
        assert!(matches!(
            read_header(&dir, "part.3"),
            Err(CoreError::Storage(StorageError::NotFound { .. }))
        ));
        assert!(!dir.exists("part.3").unwrap());
    }

    #[test]
    fn torn_header_scan() {
        let dir = InMemoryDirectory::new();
        dir.put("part.current", vec![0, 0]);
        let scan = scan_segment::<Vec<u8>>(&dir, "part.current", &BytesCodec::default(), true).unwrap();
        assert!(scan.header.is_none());
        assert_eq!(scan.corruption.unwrap().length, 2);
        assert!(read_header(&dir, "part.current").unwrap().is_none());
    }
}
