//! # surelog codec
//!
//! Event codecs for the surelog write-ahead log.
//!
//! A BEGIN record stores the event payload immediately after the event id,
//! with no length prefix of its own. Every codec must therefore be
//! **self-delimiting**: [`EventCodec::decode`] consumes exactly the bytes of
//! one event from the front of its input and leaves the rest untouched.
//!
//! Each codec also names the event type it handles. The name is written into
//! every segment header and checked on reopen, so a log written for one event
//! schema is never read back as another.
//!
//! ## Usage
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use surelog_codec::{CborCodec, EventCodec};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct Order {
//!     id: u64,
//!     sku: String,
//! }
//!
//! let codec = CborCodec::<Order>::with_descriptor("shop.Order/v1");
//! let mut bytes = Vec::new();
//! codec.encode(&Order { id: 7, sku: "A-1".into() }, &mut bytes).unwrap();
//!
//! let mut input = bytes.as_slice();
//! let order = codec.decode(&mut input).unwrap();
//! assert_eq!(order.id, 7);
//! assert!(input.is_empty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;

pub use error::{CodecError, CodecResult};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::io;
use std::marker::PhantomData;

/// Encodes and decodes one event type to and from a byte stream.
pub trait EventCodec<E>: Send + Sync {
    /// Returns the descriptor stored in segment headers for this event type.
    fn type_descriptor(&self) -> &str;

    /// Appends the encoding of `event` to `out`.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be represented.
    fn encode(&self, event: &E, out: &mut Vec<u8>) -> CodecResult<()>;

    /// Decodes one event from the front of `input`, advancing it past the
    /// consumed bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedEof`] if the input ends mid-event and
    /// [`CodecError::DecodingFailed`] if the bytes are malformed.
    fn decode(&self, input: &mut &[u8]) -> CodecResult<E>;
}

/// CBOR codec for any serde type.
///
/// CBOR items are self-delimiting, so consecutive events can be decoded
/// from one buffer.
pub struct CborCodec<T> {
    descriptor: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> CborCodec<T> {
    /// Creates a codec whose descriptor is the Rust type name of `T`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_descriptor(std::any::type_name::<T>())
    }

    /// Creates a codec with an explicit, stable descriptor.
    ///
    /// Prefer this for logs that must survive refactors which move or rename
    /// the event type.
    #[must_use]
    pub fn with_descriptor(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for CborCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for CborCodec<T> {
    fn clone(&self) -> Self {
        Self::with_descriptor(self.descriptor.clone())
    }
}

impl<T> fmt::Debug for CborCodec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CborCodec")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

impl<T> EventCodec<T> for CborCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn type_descriptor(&self) -> &str {
        &self.descriptor
    }

    fn encode(&self, event: &T, out: &mut Vec<u8>) -> CodecResult<()> {
        ciborium::ser::into_writer(event, out)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))
    }

    fn decode(&self, input: &mut &[u8]) -> CodecResult<T> {
        ciborium::de::from_reader(&mut *input).map_err(|e| match e {
            ciborium::de::Error::Io(io) if io.kind() == io::ErrorKind::UnexpectedEof => {
                CodecError::UnexpectedEof
            }
            other => CodecError::decoding_failed(other.to_string()),
        })
    }
}

/// Codec for raw byte payloads, framed with a big-endian `u32` length.
#[derive(Debug, Clone)]
pub struct BytesCodec {
    descriptor: String,
}

impl BytesCodec {
    /// Descriptor used by [`BytesCodec::default`].
    pub const DEFAULT_DESCRIPTOR: &'static str = "bytes";

    /// Creates a bytes codec with an explicit descriptor.
    #[must_use]
    pub fn with_descriptor(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
        }
    }
}

impl Default for BytesCodec {
    fn default() -> Self {
        Self::with_descriptor(Self::DEFAULT_DESCRIPTOR)
    }
}

impl EventCodec<Vec<u8>> for BytesCodec {
    fn type_descriptor(&self) -> &str {
        &self.descriptor
    }

    fn encode(&self, event: &Vec<u8>, out: &mut Vec<u8>) -> CodecResult<()> {
        let len = u32::try_from(event.len())
            .map_err(|_| CodecError::PayloadTooLarge { len: event.len() })?;
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(event);
        Ok(())
    }

    fn decode(&self, input: &mut &[u8]) -> CodecResult<Vec<u8>> {
        let Some((prefix, rest)) = input.split_first_chunk::<4>() else {
            return Err(CodecError::UnexpectedEof);
        };
        let len = u32::from_be_bytes(*prefix) as usize;
        if rest.len() < len {
            return Err(CodecError::UnexpectedEof);
        }
        let (payload, rest) = rest.split_at(len);
        *input = rest;
        Ok(payload.to_vec())
    }
}
