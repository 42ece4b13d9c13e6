//! Payload encoding for key-value writes and decoding for reads.
//!
//! Encoded values carry common flags whose top byte names the format, so a
//! reader can tell JSON from raw bytes regardless of which SDK wrote them.

use std::fmt;

use crate::error::{Error, ErrorKind, Result};

const FORMAT_SHIFT: u32 = 24;
const FORMAT_JSON: u32 = 2;
const FORMAT_BINARY: u32 = 3;
const FORMAT_STRING: u32 = 4;

/// Common flags for JSON documents.
pub const JSON_FLAGS: u32 = FORMAT_JSON << FORMAT_SHIFT;
/// Common flags for raw binary documents.
pub const BINARY_FLAGS: u32 = FORMAT_BINARY << FORMAT_SHIFT;
/// Common flags for raw string documents.
pub const STRING_FLAGS: u32 = FORMAT_STRING << FORMAT_SHIFT;

/// Document content handed to or returned from a transcoder.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Json(serde_json::Value),
    Bytes(Vec<u8>),
    Text(String),
}

/// Bytes plus common flags, ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedValue {
    pub bytes: Vec<u8>,
    pub flags: u32,
}

pub trait Transcoder: Send + Sync + fmt::Debug {
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the payload cannot be represented.
    fn encode(&self, value: &Payload) -> Result<EncodedValue>;

    /// # Errors
    ///
    /// Returns `InvalidArgument` if the flags name an unsupported format or
    /// the bytes do not parse.
    fn decode(&self, bytes: &[u8], flags: u32) -> Result<Payload>;
}

fn format_of(flags: u32) -> u32 {
    flags >> FORMAT_SHIFT
}

// ---------------------------------------------------------------------------
// JsonTranscoder
// ---------------------------------------------------------------------------

/// Default transcoder: JSON values and strings, encoded with `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTranscoder;

impl Transcoder for JsonTranscoder {
    fn encode(&self, value: &Payload) -> Result<EncodedValue> {
        let bytes = match value {
            Payload::Json(json) => serde_json::to_vec(json),
            Payload::Text(text) => serde_json::to_vec(text),
            Payload::Bytes(_) => {
                return Err(Error::invalid_argument(
                    "raw bytes are not supported by the JSON transcoder",
                ))
            }
        }
        .map_err(|e| Error::new(ErrorKind::InvalidArgument, "failed to encode JSON").with_source(e))?;
        Ok(EncodedValue {
            bytes,
            flags: JSON_FLAGS,
        })
    }

    fn decode(&self, bytes: &[u8], flags: u32) -> Result<Payload> {
        match format_of(flags) {
            // Legacy documents may be written with zero flags.
            0 | FORMAT_JSON => serde_json::from_slice(bytes).map(Payload::Json).map_err(|e| {
                Error::new(ErrorKind::InvalidArgument, "failed to decode JSON").with_source(e)
            }),
            FORMAT_STRING => String::from_utf8(bytes.to_vec())
                .map(Payload::Text)
                .map_err(|e| Error::invalid_argument("string document is not UTF-8").with_source(e)),
            other => Err(Error::invalid_argument(format!(
                "JSON transcoder cannot decode format {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// RawBinaryTranscoder
// ---------------------------------------------------------------------------

/// Passes raw bytes through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBinaryTranscoder;

impl Transcoder for RawBinaryTranscoder {
    fn encode(&self, value: &Payload) -> Result<EncodedValue> {
        match value {
            Payload::Bytes(bytes) => Ok(EncodedValue {
                bytes: bytes.clone(),
                flags: BINARY_FLAGS,
            }),
            _ => Err(Error::invalid_argument(
                "only raw bytes are supported by the binary transcoder",
            )),
        }
    }

    fn decode(&self, bytes: &[u8], flags: u32) -> Result<Payload> {
        if format_of(flags) == FORMAT_BINARY {
            Ok(Payload::Bytes(bytes.to_vec()))
        } else {
            Err(Error::invalid_argument(
                "binary transcoder can only decode binary documents",
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn json_encode_sets_common_flags() {
        let encoded = JsonTranscoder.encode(&Payload::Json(json!({"a": 1}))).unwrap();
        assert_eq!(encoded.flags, JSON_FLAGS);
        assert_eq!(encoded.bytes, br#"{"a":1}"#);
    }

    #[test]
    fn json_rejects_raw_bytes() {
        let err = JsonTranscoder.encode(&Payload::Bytes(vec![1, 2])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn json_decodes_legacy_zero_flags() {
        let value = JsonTranscoder.decode(b"[1,2]", 0).unwrap();
        assert_eq!(value, Payload::Json(json!([1, 2])));
    }

    #[test]
    fn json_decode_of_binary_document_fails() {
        let err = JsonTranscoder.decode(&[0xff], BINARY_FLAGS).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn binary_passes_bytes_through() {
        let encoded = RawBinaryTranscoder.encode(&Payload::Bytes(vec![0, 1, 2])).unwrap();
        assert_eq!(encoded.flags, BINARY_FLAGS);
        let decoded = RawBinaryTranscoder.decode(&encoded.bytes, encoded.flags).unwrap();
        assert_eq!(decoded, Payload::Bytes(vec![0, 1, 2]));
    }
}
