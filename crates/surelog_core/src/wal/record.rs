//! BEGIN and COMMIT records.

use crate::error::CoreResult;
use crate::types::EventId;
use surelog_codec::{CodecError, EventCodec};
use thiserror::Error;

/// Tag at the start of every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum RecordTag {
    /// An event was issued an id.
    Begin = 0,
    /// An event was processed (or given up on).
    Commit = 1,
}

impl RecordTag {
    /// Converts a raw tag to a record tag.
    #[must_use]
    pub const fn from_i32(tag: i32) -> Option<Self> {
        match tag {
            0 => Some(Self::Begin),
            1 => Some(Self::Commit),
            _ => None,
        }
    }

    /// Returns the raw tag value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }
}

/// A decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record<E> {
    /// BEGIN with its event.
    Begin {
        /// Event id.
        id: EventId,
        /// The event.
        event: E,
    },
    /// COMMIT.
    Commit {
        /// Event id.
        id: EventId,
    },
}

impl<E> Record<E> {
    /// Returns the record's tag.
    pub fn tag(&self) -> RecordTag {
        match self {
            Self::Begin { .. } => RecordTag::Begin,
            Self::Commit { .. } => RecordTag::Commit,
        }
    }

    /// Returns the record's event id.
    pub fn id(&self) -> EventId {
        match self {
            Self::Begin { id, .. } | Self::Commit { id } => *id,
        }
    }
}

/// Why a record could not be read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// The segment ends inside the record.
    #[error("record truncated")]
    Truncated,

    /// The tag is neither BEGIN nor COMMIT.
    #[error("unknown record tag {0}")]
    UnknownTag(i32),

    /// Ids are always positive.
    #[error("invalid event id {0}")]
    InvalidId(i32),

    /// The BEGIN payload is malformed.
    #[error("unreadable event payload: {0}")]
    Payload(CodecError),
}

/// A record that could not be read, and where it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFault {
    /// Offset of the record's first byte.
    pub offset: u64,
    /// Why it could not be read.
    pub reason: RecordError,
}

/// Appends a BEGIN record to `out`.
///
/// # Errors
///
/// Returns an error if the codec cannot encode the event.
pub fn encode_begin<E>(
    id: EventId,
    event: &E,
    codec: &dyn EventCodec<E>,
    out: &mut Vec<u8>,
) -> CoreResult<()> {
    out.extend_from_slice(&RecordTag::Begin.as_i32().to_be_bytes());
    out.extend_from_slice(&id.as_u32().to_be_bytes());
    codec.encode(event, out)?;
    Ok(())
}

/// Appends a COMMIT record to `out`.
pub fn encode_commit(id: EventId, out: &mut Vec<u8>) {
    out.extend_from_slice(&RecordTag::Commit.as_i32().to_be_bytes());
    out.extend_from_slice(&id.as_u32().to_be_bytes());
}

fn take_i32(input: &mut &[u8]) -> Result<i32, RecordError> {
    let (raw, rest) = input
        .split_first_chunk::<4>()
        .ok_or(RecordError::Truncated)?;
    *input = rest;
    Ok(i32::from_be_bytes(*raw))
}

/// Decodes one record from the front of `input`, advancing it.
///
/// # Errors
///
/// Returns the reason the record is unreadable. `input` is left at an
/// unspecified position in that case.
pub fn decode_record<E>(
    input: &mut &[u8],
    codec: &dyn EventCodec<E>,
) -> Result<Record<E>, RecordError> {
    let raw_tag = take_i32(input)?;
    let tag = RecordTag::from_i32(raw_tag).ok_or(RecordError::UnknownTag(raw_tag))?;

    let raw_id = take_i32(input)?;
    let id = u32::try_from(raw_id)
        .ok()
        .filter(|id| *id > 0)
        .map(EventId::new)
        .ok_or(RecordError::InvalidId(raw_id))?;

    match tag {
        RecordTag::Begin => {
            let event = codec.decode(input).map_err(|e| match e {
                CodecError::UnexpectedEof => RecordError::Truncated,
                other => RecordError::Payload(other),
            })?;
            Ok(Record::Begin { id, event })
        }
        RecordTag::Commit => Ok(Record::Commit { id }),
    }
}

/// Iterates over the records of a segment, yielding each with its offset.
///
/// Stops after the first unreadable record; nothing after it can be framed.
pub struct RecordReader<'a, E> {
    data: &'a [u8],
    position: usize,
    codec: &'a dyn EventCodec<E>,
    finished: bool,
}

impl<'a, E> RecordReader<'a, E> {
    /// Creates a reader over `data`, starting at `start` (the end of the
    /// header). Offsets are relative to the start of `data`.
    pub fn new(data: &'a [u8], start: usize, codec: &'a dyn EventCodec<E>) -> Self {
        Self {
            data,
            position: start.min(data.len()),
            codec,
            finished: false,
        }
    }

    /// Offset just past the last record read.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position as u64
    }
}

impl<E> Iterator for RecordReader<'_, E> {
    type Item = Result<(u64, Record<E>), RecordFault>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.position >= self.data.len() {
            return None;
        }

        let start = self.position;
        let mut input = &self.data[start..];
        match decode_record(&mut input, self.codec) {
            Ok(record) => {
                self.position = self.data.len() - input.len();
                Some(Ok((start as u64, record)))
            }
            Err(reason) => {
                self.finished = true;
                Some(Err(RecordFault {
                    offset: start as u64,
                    reason,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use surelog_codec::BytesCodec;

    fn begin(id: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        encode_begin(EventId::new(id), &payload.to_vec(), &BytesCodec::default(), &mut out).unwrap();
        out
    }

    #[test]
    fn begin_layout() {
        assert_eq!(
            begin(3, b"hi"),
            [0, 0, 0, 0, 0, 0, 0, 3, 0, 0, 0, 2, b'h', b'i']
        );
    }

    #[test]
    fn commit_layout() {
        let mut out = Vec::new();
        encode_commit(EventId::new(258), &mut out);
        assert_eq!(out, [0, 0, 0, 1, 0, 0, 1, 2]);
    }

    #[test]
    fn reader_yields_offsets() {
        let bytes = BytesCodec::default();
        let codec: &dyn EventCodec<Vec<u8>> = &bytes;
        let mut data = begin(1, b"a");
        let second = data.len() as u64;
        encode_commit(EventId::new(1), &mut data);

        let records: Vec<_> = RecordReader::new(&data, 0, codec)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            records,
            vec![
                (
                    0,
                    Record::Begin {
                        id: EventId::new(1),
                        event: b"a".to_vec()
                    }
                ),
                (second, Record::Commit { id: EventId::new(1) }),
            ]
        );
    }

    #[test]
    fn reader_stops_at_truncated_record() {
        let bytes = BytesCodec::default();
        let codec: &dyn EventCodec<Vec<u8>> = &bytes;
        let mut data = begin(1, b"abc");
        let torn = data.len() as u64;
        data.extend_from_slice(&begin(2, b"def")[..10]);

        let mut reader = RecordReader::new(&data, 0, codec);
        assert!(reader.next().unwrap().is_ok());
        assert_eq!(
            reader.next().unwrap(),
            Err(RecordFault {
                offset: torn,
                reason: RecordError::Truncated
            })
        );
        assert!(reader.next().is_none());
        assert_eq!(reader.position(), torn);
    }

    #[test]
    fn unknown_tag_is_a_fault() {
        let bytes = BytesCodec::default();
        let codec: &dyn EventCodec<Vec<u8>> = &bytes;
        let data: [u8; 8] = [0, 0, 0, 7, 0, 0, 0, 1];
        let fault = RecordReader::new(&data, 0, codec).next().unwrap().unwrap_err();
        assert_eq!(fault.reason, RecordError::UnknownTag(7));
    }

    #[test]
    fn non_positive_ids_are_faults() {
        let bytes = BytesCodec::default();
        let codec: &dyn EventCodec<Vec<u8>> = &bytes;
        let zero: [u8; 8] = [0, 0, 0, 1, 0, 0, 0, 0];
        let negative: [u8; 8] = [0, 0, 0, 1, 0xff, 0xff, 0xff, 0xff];
        assert_eq!(
            decode_record(&mut &zero[..], codec),
            Err(RecordError::InvalidId(0))
        );
        assert_eq!(
            decode_record(&mut &negative[..], codec),
            Err(RecordError::InvalidId(-1))
        );
    }

    #[test]
    fn tag_round_trip() {
        for tag in [RecordTag::Begin, RecordTag::Commit] {
            assert_eq!(RecordTag::from_i32(tag.as_i32()), Some(tag));
        }
        assert_eq!(RecordTag::from_i32(2), None);
    }
}
