//! File-backed datastore: one directory per table, one JSON file per key
//!
//! Writes are atomic via write-temp + rename. Keys are percent-encoded so
//! arbitrary strings map bijectively onto file names. Single-writer per
//! table is assumed.

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;

use super::Datastore;
use crate::error::DatastoreError;

const SUFFIX: &str = ".json";

/// JSON-per-key directory store
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a table directory
    pub async fn open(root: PathBuf) -> Result<Self, DatastoreError> {
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}{}", encode_key(key), SUFFIX))
    }
}

#[async_trait]
impl Datastore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, DatastoreError> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let value =
                    serde_json::from_slice(&bytes).map_err(|source| DatastoreError::Corrupt {
                        key: key.to_string(),
                        source,
                    })?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), DatastoreError> {
        let path = self.path_for(key);
        let tmp = self.root.join(format!(".{}.tmp", encode_key(key)));
        let bytes = serde_json::to_vec(&value)?;
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), DatastoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn scan(&self, prefix: Option<&str>) -> Result<Vec<(String, Value)>, DatastoreError> {
        let mut results = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(encoded) = name.strip_suffix(SUFFIX) else {
                continue;
            };
            if encoded.starts_with('.') {
                continue; // in-flight temp file
            }
            let key = decode_key(encoded);
            if let Some(p) = prefix {
                if !key.starts_with(p) {
                    continue;
                }
            }
            if let Some(value) = self.get(&key).await? {
                results.push((key, value));
            }
        }
        Ok(results)
    }

    async fn clear(&self) -> Result<usize, DatastoreError> {
        let mut count = 0;
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(SUFFIX) && !name.starts_with('.') {
                tokio::fs::remove_file(entry.path()).await?;
                count += 1;
            }
        }
        Ok(count)
    }
}

/// Percent-encode everything outside `[A-Za-z0-9._-]`
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'_' | b'-' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

fn decode_key(encoded: &str) -> String {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_encoding_roundtrip() {
        for key in ["plain", "with space", "a/b/c", "query:nodes", "%weird%"] {
            let encoded = encode_key(key);
            assert!(!encoded.contains('/'));
            assert_eq!(decode_key(&encoded), key);
        }
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("workers");

        {
            let store = FileStore::open(root.clone()).await.unwrap();
            store.put("node/1", json!({"alive": true})).await.unwrap();
        }

        let store = FileStore::open(root).await.unwrap();
        assert_eq!(
            store.get("node/1").await.unwrap().unwrap(),
            json!({"alive": true})
        );
    }

    #[tokio::test]
    async fn test_scan_skips_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().to_path_buf()).await.unwrap();
        store.put("k", json!(1)).await.unwrap();
        tokio::fs::write(dir.path().join(".k.tmp"), b"{").await.unwrap();

        let all = store.scan(None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, "k");
    }
}
