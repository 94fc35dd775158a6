//! Deterministic fingerprints for jobs and files

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Definition fields that never participate in the fingerprint.
///
/// These vary per submission or per dispatch without changing what the job
/// does, so including them would defeat cache-hit detection.
const VOLATILE_FIELDS: &[&str] = &[
    "job_id",
    "parent_id",
    "targets",
    "restrict",
    "created_at",
    "transmitted_at",
    "returned_at",
];

/// Fingerprint a job as Sha256 hex over `(verb, canonical definition)`.
///
/// Canonical form is JSON with object keys sorted (serde_json maps preserve
/// insertion order, so the map is rebuilt sorted) and volatile fields
/// removed. Two byte-identical canonical forms always produce the same sha.
pub fn job_sha(verb: &str, definition: &Map<String, Value>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verb.as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical_json(definition).as_bytes());
    hex_digest(hasher)
}

/// Render a definition map as canonical JSON: sorted keys, volatile fields
/// stripped, nested objects sorted recursively.
pub fn canonical_json(definition: &Map<String, Value>) -> String {
    let mut keys: Vec<&String> = definition
        .keys()
        .filter(|k| !VOLATILE_FIELDS.contains(&k.as_str()))
        .collect();
    keys.sort();

    let mut canonical = Map::new();
    for key in keys {
        canonical.insert(key.clone(), sort_value(&definition[key]));
    }
    Value::Object(canonical).to_string()
}

fn sort_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), sort_value(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_value).collect()),
        other => other.clone(),
    }
}

/// Fingerprint a file's contents as Sha256 hex, reading in chunks.
pub fn file_sha(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 10240];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_digest(hasher))
}

/// Fingerprint a byte slice as Sha256 hex.
pub fn bytes_sha(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_digest(hasher)
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_job_sha_deterministic() {
        let a = map(json!({"command": "echo hi", "timeout": 600}));
        let b = map(json!({"timeout": 600, "command": "echo hi"}));
        assert_eq!(job_sha("RUN", &a), job_sha("RUN", &b));
    }

    #[test]
    fn test_job_sha_differs_on_verb() {
        let def = map(json!({"command": "echo hi"}));
        assert_ne!(job_sha("RUN", &def), job_sha("QUERY", &def));
    }

    #[test]
    fn test_job_sha_differs_on_content() {
        let a = map(json!({"command": "echo hi"}));
        let b = map(json!({"command": "echo bye"}));
        assert_ne!(job_sha("RUN", &a), job_sha("RUN", &b));
    }

    #[test]
    fn test_job_sha_ignores_volatile_fields() {
        let a = map(json!({"command": "echo hi", "job_id": "x", "targets": ["n1"]}));
        let b = map(json!({"command": "echo hi", "job_id": "y", "targets": ["n2", "n3"]}));
        assert_eq!(job_sha("RUN", &a), job_sha("RUN", &b));
    }

    #[test]
    fn test_canonical_json_sorts_nested() {
        let def = map(json!({"b": {"z": 1, "a": 2}, "a": 1}));
        assert_eq!(canonical_json(&def), r#"{"a":1,"b":{"a":2,"z":1}}"#);
    }

    #[test]
    fn test_bytes_sha_known_value() {
        // Sha256 of the empty input
        assert_eq!(
            bytes_sha(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_file_sha_matches_bytes_sha() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload");
        std::fs::write(&path, b"directord").unwrap();
        assert_eq!(file_sha(&path).unwrap(), bytes_sha(b"directord"));
    }
}
