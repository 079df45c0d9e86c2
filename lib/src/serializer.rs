use std::io::{Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use serde::{de::DeserializeOwned, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SerializerError {
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),
}

/// Bytes codec for everything that crosses the broker boundary: task
/// messages, result records, revocation records.
///
/// Values are encoded as JSON; when `compression` is set the payload is
/// additionally run through zlib. Both sides of a queue must agree on the
/// compression flag.
#[derive(Debug, Clone, Default)]
pub struct Serializer {
    compression: bool,
}

impl Serializer {
    pub fn new(compression: bool) -> Self {
        Self { compression }
    }

    pub fn compression(&self) -> bool {
        self.compression
    }

    pub fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializerError> {
        let raw = serde_json::to_vec(value)?;
        if !self.compression {
            return Ok(raw);
        }

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw)?;
        Ok(encoder.finish()?)
    }

    pub fn deserialize<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, SerializerError> {
        if !self.compression {
            return Ok(serde_json::from_slice(data)?);
        }

        let mut decoder = ZlibDecoder::new(data);
        let mut raw = Vec::new();
        decoder.read_to_end(&mut raw)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip() {
        let serializer = Serializer::default();
        let value = json!({"args": [1, 2, 3], "name": "send-email", "eta": null});
        let data = serializer.serialize(&value).unwrap();
        let back: serde_json::Value = serializer.deserialize(&data).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_round_trip_compressed() {
        let serializer = Serializer::new(true);
        let value = json!({"payload": "x".repeat(4096)});
        let data = serializer.serialize(&value).unwrap();
        assert!(data.len() < 4096);
        let back: serde_json::Value = serializer.deserialize(&data).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_null_is_a_value() {
        // A serialized null must be distinguishable from "nothing stored";
        // the storage layer expresses absence as None, never as null bytes.
        let serializer = Serializer::default();
        let data = serializer.serialize(&serde_json::Value::Null).unwrap();
        assert!(!data.is_empty());
        let back: serde_json::Value = serializer.deserialize(&data).unwrap();
        assert!(back.is_null());
    }
}
