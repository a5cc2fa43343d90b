//! Error types for surelog core.

use crate::types::EventId;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in surelog core operations.
///
/// Two conditions are deliberately absent: an exhausted id counter is the
/// [`crate::BeginOutcome::RotationRequired`] value, and an unreadable record
/// tail is a [`crate::CorruptionReport`] routed to the corruption handler.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] surelog_storage::StorageError),

    /// Event codec error.
    #[error("codec error: {0}")]
    Codec(#[from] surelog_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A segment header carries an unsupported format version.
    #[error("segment {location} has format version {found}, expected {expected}")]
    VersionMismatch {
        /// Segment location.
        location: String,
        /// Version this build reads and writes.
        expected: i32,
        /// Version found in the header.
        found: i32,
    },

    /// A segment was written for a different event type.
    #[error("segment {location} holds events of type {found:?}, expected {expected:?}")]
    TypeMismatch {
        /// Segment location.
        location: String,
        /// Descriptor of the configured codec.
        expected: String,
        /// Descriptor found in the header.
        found: String,
    },

    /// A segment header is complete but malformed.
    #[error("invalid header in {location}: {message}")]
    InvalidHeader {
        /// Segment location.
        location: String,
        /// Description of the problem.
        message: String,
    },

    /// A BEGIN or COMMIT record could not be made durable.
    ///
    /// The event may or may not be processed in the future; the caller can
    /// no longer rely on it.
    #[error("durable append to {segment} failed (next id {next_id}): {source}")]
    Durability {
        /// Segment location.
        segment: String,
        /// The next id the segment would have issued.
        next_id: u32,
        /// The underlying storage failure.
        #[source]
        source: surelog_storage::StorageError,
    },

    /// A commit named an id the segment never issued.
    #[error("cannot commit {id}: segment has issued {counter} ids")]
    UnknownEvent {
        /// The rejected id.
        id: EventId,
        /// The segment's id counter.
        counter: u32,
    },

    /// The segment was closed by a rotation or shutdown.
    #[error("segment {location} is closed")]
    SegmentClosed {
        /// Segment location.
        location: String,
    },

    /// The log has been shut down.
    #[error("log is shut down")]
    Closed,

    /// Configuration was rejected.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid header error.
    pub fn invalid_header(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidHeader {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns `true` for the fatal durability error.
    #[must_use]
    pub fn is_durability(&self) -> bool {
        matches!(self, Self::Durability { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durability_error_names_segment_and_next_id() {
        let err = CoreError::Durability {
            segment: "/var/log/part.current".into(),
            next_id: 17,
            source: surelog_storage::StorageError::Io(io::Error::new(
                io::ErrorKind::Other,
                "disk full",
            )),
        };
        let message = err.to_string();
        assert!(message.contains("part.current"));
        assert!(message.contains("17"));
        assert!(message.contains("disk full"));
        assert!(err.is_durability());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn type_mismatch_mentions_both_descriptors() {
        let err = CoreError::TypeMismatch {
            location: "memory:part.0".into(),
            expected: "orders/v2".into(),
            found: "orders/v1".into(),
        };
        let message = err.to_string();
        assert!(message.contains("orders/v2"));
        assert!(message.contains("orders/v1"));
        assert!(!err.is_durability());
    }
}
