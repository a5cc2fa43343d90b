//! Segment files: the on-disk write-ahead log.
//!
//! A log directory holds one *current* segment, `part.current`, which takes
//! all new appends, and any number of *sealed* segments `part.0`..`part.k-1`
//! that only ever receive COMMIT records from the retry worker.
//!
//! ## Segment Format
//!
//! All integers are big-endian.
//!
//! ```text
//! header:  | version: i32 (= 0) | descriptor_len: u16 | descriptor: UTF-8 |
//! record:  | tag: i32 | id: i32 | payload (BEGIN only) |
//! ```
//!
//! Tag 0 is BEGIN and carries the codec-encoded event immediately after the
//! id. Tag 1 is COMMIT and carries nothing else. An id is uncommitted when
//! its BEGIN appears with no later COMMIT.
//!
//! ## Recovery Policy
//!
//! Opening a segment replays its records to rebuild the uncommitted set and
//! the id counter.
//!
//! - **Unreadable tail** (truncated record, unknown tag, undecodable
//!   payload): reported once to the corruption handler, then truncated away.
//!   Records before it are kept. The counter resumes after the largest id
//!   seen anywhere in the segment.
//! - **Torn header** (file shorter than its header): reported as corruption
//!   at offset 0 and rewritten.
//! - **Wrong version or event type**: fatal, the segment is not opened.

mod header;
mod record;
mod resolver;
mod segment;

pub use header::{Header, FORMAT_VERSION};
pub use record::{
    decode_record, encode_begin, encode_commit, Record, RecordError, RecordFault, RecordReader,
    RecordTag,
};
pub use resolver::{resolve, resolve_with, Resolution};
pub use segment::{BeginOutcome, Segment, SegmentContext};
