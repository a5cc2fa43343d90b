//! CLI command implementations.

pub mod dump;
pub mod inspect;
pub mod verify;

use clap::ValueEnum;
use std::path::Path;
use surelog_codec::{BytesCodec, CborCodec, CodecError, CodecResult, EventCodec};
use surelog_core::inspect::{scan_segment, SegmentScan};
use surelog_core::CoreResult;
use surelog_storage::FileDirectory;
use tracing::debug;

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text.
    Text,
    /// Pretty-printed JSON.
    Json,
}

/// Encoding of event payloads in the inspected log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PayloadCodec {
    /// CBOR items, as written by `CborCodec`.
    Cbor,
    /// Length-prefixed raw bytes, as written by `BytesCodec`.
    Bytes,
}

/// Decodes payloads of either supported encoding into JSON for display.
///
/// Read-only: encoding is refused.
pub struct PayloadView {
    codec: PayloadCodec,
}

impl PayloadView {
    pub fn new(codec: PayloadCodec) -> Self {
        Self { codec }
    }
}

impl EventCodec<serde_json::Value> for PayloadView {
    fn type_descriptor(&self) -> &str {
        match self.codec {
            PayloadCodec::Cbor => "cbor",
            PayloadCodec::Bytes => BytesCodec::DEFAULT_DESCRIPTOR,
        }
    }

    fn encode(&self, _event: &serde_json::Value, _out: &mut Vec<u8>) -> CodecResult<()> {
        Err(CodecError::encoding_failed("payload views are read-only"))
    }

    fn decode(&self, input: &mut &[u8]) -> CodecResult<serde_json::Value> {
        match self.codec {
            PayloadCodec::Cbor => {
                let value = CborCodec::<ciborium::Value>::new().decode(input)?;
                serde_json::to_value(&value).map_err(|e| CodecError::decoding_failed(e.to_string()))
            }
            PayloadCodec::Bytes => {
                let bytes = BytesCodec::default().decode(input)?;
                Ok(serde_json::Value::String(hex(&bytes)))
            }
        }
    }
}

/// Opens an existing log directory without creating anything.
pub fn open_directory(path: &Path) -> Result<FileDirectory, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("Log directory not found: {}", path.display()).into());
    }
    debug!(path = %path.display(), "opening log directory");
    Ok(FileDirectory::open(path, false)?)
}

/// Scans one segment, decoding payloads for display.
///
/// The header's descriptor is not checked; the chosen codec is trusted.
pub fn scan(
    directory: &FileDirectory,
    name: &str,
    codec: PayloadCodec,
) -> CoreResult<SegmentScan<serde_json::Value>> {
    scan_segment(directory, name, &PayloadView::new(codec), false)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use surelog_core::wal::{encode_begin, Header};
    use surelog_core::EventId;

    #[test]
    fn cbor_payloads_become_json() {
        let cbor = CborCodec::<(String, u32)>::with_descriptor("pair");
        let mut bytes = Vec::new();
        cbor.encode(&("a".to_string(), 7), &mut bytes).unwrap();

        let view = PayloadView::new(PayloadCodec::Cbor);
        let mut input = bytes.as_slice();
        assert_eq!(view.decode(&mut input).unwrap(), serde_json::json!(["a", 7]));
        assert!(input.is_empty());
    }

    #[test]
    fn byte_payloads_become_hex() {
        let mut bytes = Vec::new();
        BytesCodec::default().encode(&vec![0xde, 0xad], &mut bytes).unwrap();

        let view = PayloadView::new(PayloadCodec::Bytes);
        assert_eq!(view.decode(&mut bytes.as_slice()).unwrap(), serde_json::json!("dead"));
    }

    #[test]
    fn scan_ignores_descriptor() {
        let temp = tempfile::tempdir().unwrap();
        let mut bytes = Vec::new();
        Header::new("orders/v2").encode(&mut bytes).unwrap();
        let codec = BytesCodec::default();
        encode_begin(EventId::new(1), &b"x".to_vec(), &codec, &mut bytes).unwrap();
        std::fs::write(temp.path().join("part.0"), &bytes).unwrap();

        let dir = open_directory(temp.path()).unwrap();
        let scan = scan(&dir, "part.0", PayloadCodec::Bytes).unwrap();
        assert!(scan.is_clean());
        assert_eq!(scan.uncommitted[&EventId::new(1)], serde_json::json!("78"));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        assert!(open_directory(&temp.path().join("absent")).is_err());
    }
}
