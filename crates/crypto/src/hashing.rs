//! SHA-256 hashing and canonical JSON serialization.

use crate::{CryptoError, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Compute the SHA-256 of a byte slice as a 64-char lowercase hex string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute the SHA-256 of a file, streaming in 64 KiB blocks.
pub fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path)?;
    hash_stream(file)
}

/// Compute the SHA-256 of an arbitrary reader.
pub fn hash_stream<R: Read>(mut reader: R) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 65536];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Serialize a JSON value canonically: object keys sorted at every level,
/// compact separators, no trailing whitespace.
///
/// Ledger chaining and manifest signing both hash these bytes, so the
/// output for a given value must never change across versions.
pub fn canonical_json_bytes(value: &Value) -> Result<Vec<u8>> {
    let sorted = sort_value(value);
    serde_json::to_vec(&sorted).map_err(|e| CryptoError::Serialization(e.to_string()))
}

fn sort_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in entries {
                out.insert(k.clone(), sort_value(v));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_value).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_hash_bytes_known_vector() {
        // sha256("abc")
        assert_eq!(
            hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_file_matches_hash_bytes() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"ransomeye bundle content").unwrap();
        tmp.flush().unwrap();

        let from_file = hash_file(tmp.path()).unwrap();
        assert_eq!(from_file, hash_bytes(b"ransomeye bundle content"));
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let a = json!({"b": 1, "a": {"z": true, "m": [ {"k2": 2, "k1": 1} ]}});
        let b = json!({"a": {"m": [ {"k1": 1, "k2": 2} ], "z": true}, "b": 1});

        let bytes_a = canonical_json_bytes(&a).unwrap();
        let bytes_b = canonical_json_bytes(&b).unwrap();
        assert_eq!(bytes_a, bytes_b);
        assert!(!bytes_a.ends_with(b" "));
    }

    #[test]
    fn test_canonical_json_is_stable() {
        let v = json!({"run_id": "r1", "passed": true, "metrics": {"error_count": 0}});
        assert_eq!(
            canonical_json_bytes(&v).unwrap(),
            canonical_json_bytes(&v).unwrap()
        );
    }
}
