//! Payload codec capability.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Failure to turn a payload into bytes or back.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload encoding failed: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("payload decoding failed: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Schema-keyed binary codec for event payloads.
///
/// The store treats payload bytes as opaque. Aggregators receive a codec at construction
/// time instead of being tied to one wire format, so the fold logic stays independent of
/// serialization.
///
/// ## Implementations
///
/// - [`JsonCodec`]: serde_json, the format used by the shipped aggregators
///
/// Other formats only need to round-trip the payload structs through serde.
pub trait PayloadCodec: Clone + Send + Sync + 'static {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// JSON payload codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(CodecError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_reports_malformed_payloads() {
        let err = JsonCodec.decode::<Vec<i32>>(b"not json").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }
}
