//! Segment header encoding.

use crate::error::{CoreError, CoreResult};

/// Segment format version written by this build.
pub const FORMAT_VERSION: i32 = 0;

/// Size of the fixed part of a header: version (4) + descriptor length (2).
const FIXED_LEN: usize = 6;

/// The header at the start of every segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Format version.
    pub version: i32,
    /// Event type descriptor of the codec that wrote the segment.
    pub type_descriptor: String,
}

impl Header {
    /// Creates a current-version header for the given descriptor.
    #[must_use]
    pub fn new(type_descriptor: impl Into<String>) -> Self {
        Self {
            version: FORMAT_VERSION,
            type_descriptor: type_descriptor.into(),
        }
    }

    /// Number of bytes [`Header::encode`] writes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        FIXED_LEN + self.type_descriptor.len()
    }

    /// Appends the encoded header to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if the descriptor does not fit a
    /// `u16` length.
    pub fn encode(&self, out: &mut Vec<u8>) -> CoreResult<()> {
        let len = u16::try_from(self.type_descriptor.len()).map_err(|_| {
            CoreError::invalid_config(format!(
                "type descriptor is {} bytes, at most {} allowed",
                self.type_descriptor.len(),
                u16::MAX
            ))
        })?;
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(self.type_descriptor.as_bytes());
        Ok(())
    }

    /// Decodes a header from the start of a segment.
    ///
    /// Returns `Ok(None)` when the bytes end before the header does, which
    /// happens when a crash interrupted segment creation. Otherwise returns
    /// the header and the offset of the first record.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::VersionMismatch`] as soon as the version is
    /// readable and unsupported, and [`CoreError::InvalidHeader`] for a
    /// descriptor that is not UTF-8.
    pub fn decode(bytes: &[u8], location: &str) -> CoreResult<Option<(Self, usize)>> {
        let Some((version, rest)) = bytes.split_first_chunk::<4>() else {
            return Ok(None);
        };
        let version = i32::from_be_bytes(*version);
        if version != FORMAT_VERSION {
            return Err(CoreError::VersionMismatch {
                location: location.to_string(),
                expected: FORMAT_VERSION,
                found: version,
            });
        }

        let Some((len, rest)) = rest.split_first_chunk::<2>() else {
            return Ok(None);
        };
        let len = usize::from(u16::from_be_bytes(*len));
        let Some(descriptor) = rest.get(..len) else {
            return Ok(None);
        };
        let type_descriptor = std::str::from_utf8(descriptor)
            .map_err(|e| CoreError::invalid_header(location, format!("descriptor is not UTF-8: {e}")))?
            .to_string();

        Ok(Some((
            Self {
                version,
                type_descriptor,
            },
            FIXED_LEN + len,
        )))
    }

    /// Checks that the segment holds events of the expected type.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TypeMismatch`] when the descriptors differ.
    pub fn verify(&self, expected: &str, location: &str) -> CoreResult<()> {
        if self.type_descriptor != expected {
            return Err(CoreError::TypeMismatch {
                location: location.to_string(),
                expected: expected.to_string(),
                found: self.type_descriptor.clone(),
            });
        }
        Ok(())
    }
}
