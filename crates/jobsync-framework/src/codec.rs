//! Compression for oversized status fields
//!
//! The framework controller stores large fields as base64-encoded gzip of
//! their JSON form.

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;

use jobsync_common::{Error, Result};

/// Decode a base64(gzip(json)) field
pub fn decompress_field<T: DeserializeOwned>(encoded: &str) -> Result<T> {
    let compressed = STANDARD
        .decode(encoded.trim())
        .map_err(|e| codec_error(format!("invalid base64: {e}")))?;

    let mut json = String::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_string(&mut json)
        .map_err(|e| codec_error(format!("invalid gzip: {e}")))?;

    serde_json::from_str(&json).map_err(|e| codec_error(e.to_string()))
}

/// Encode a value as base64(gzip(json))
pub fn compress_field<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| codec_error(format!("gzip failed: {e}")))?;
    let compressed = encoder
        .finish()
        .map_err(|e| codec_error(format!("gzip failed: {e}")))?;

    Ok(STANDARD.encode(compressed))
}

fn codec_error(msg: String) -> Error {
    Error::serialization_for_kind("compressed field", msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn decodes_controller_encoded_statuses() {
        let statuses = json!([{"name": "worker", "taskStatuses": [{"index": 0, "state": "Running"}]}]);
        let encoded = compress_field(&statuses).unwrap();
        let decoded: Value = decompress_field(&encoded).unwrap();
        assert_eq!(decoded, statuses);
    }

    #[test]
    fn rejects_bad_base64() {
        let err = decompress_field::<Value>("not base64 !!").unwrap_err();
        assert!(err.to_string().contains("invalid base64"));
    }

    #[test]
    fn rejects_non_gzip_payload() {
        let encoded = STANDARD.encode(b"plain text");
        let err = decompress_field::<Value>(&encoded).unwrap_err();
        assert!(err.to_string().contains("invalid gzip"));
    }
}
