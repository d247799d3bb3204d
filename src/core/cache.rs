//! On-disk, per-item stores keyed by item id.
//!
//! - [`DetailCache`]: raw detail payloads (`html/<id>.<ext>`), consulted
//!   before any network fetch.
//! - [`RecordStore`]: normalized records (`records/<id>.json`), written before
//!   an id is checkpointed so normalized output survives interrupted runs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::fs;

use crate::domain::NormalizedRecord;

use super::fsutil::{read_json, write_bytes_atomic, write_json_atomic};

pub const DETAIL_CACHE_DIR: &str = "html";
pub const RECORDS_DIR: &str = "records";

/// Raw detail payloads, one file per id
pub struct DetailCache {
    dir: PathBuf,
    extension: String,
}

impl DetailCache {
    /// Open (and create) the cache directory
    pub async fn open(out_dir: &Path, extension: &str) -> Result<Self> {
        let dir = out_dir.join(DETAIL_CACHE_DIR);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;

        Ok(Self {
            dir,
            extension: extension.trim_start_matches('.').to_string(),
        })
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", file_stem_for_id(id), self.extension))
    }

    pub fn has(&self, id: &str) -> bool {
        self.path_for(id).is_file()
    }

    pub async fn read(&self, id: &str) -> Result<Vec<u8>> {
        let path = self.path_for(id);
        fs::read(&path)
            .await
            .with_context(|| format!("Failed to read cached detail: {}", path.display()))
    }

    pub async fn write(&self, id: &str, payload: &[u8]) -> Result<()> {
        write_bytes_atomic(&self.path_for(id), payload).await
    }
}

/// Normalized records, one JSON file per id
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub async fn open(out_dir: &Path) -> Result<Self> {
        let dir = out_dir.join(RECORDS_DIR);
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create records directory: {}", dir.display()))?;

        Ok(Self { dir })
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem_for_id(id)))
    }

    pub async fn load(&self, id: &str) -> Result<Option<NormalizedRecord>> {
        read_json(&self.path_for(id)).await
    }

    pub async fn store(&self, id: &str, record: &NormalizedRecord) -> Result<()> {
        write_json_atomic(&self.path_for(id), record).await
    }
}

/// Filesystem-safe file stem for an item id.
///
/// Ids made only of `[A-Za-z0-9._-]` are used as-is. Anything else is
/// replaced by `_` and suffixed with a hash of the original id, so distinct
/// ids never share a file.
pub fn file_stem_for_id(id: &str) -> String {
    let is_safe = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');

    if !id.is_empty() && id.chars().all(is_safe) && !id.starts_with('.') {
        return id.to_string();
    }

    let sanitized: String = id
        .chars()
        .map(|c| if is_safe(c) { c } else { '_' })
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    let digest = hasher.finalize();

    format!("{}-{}", sanitized.trim_start_matches('.'), hex::encode(&digest[..6]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_safe_ids_are_kept() {
        assert_eq!(file_stem_for_id("10381COMPETITIVE_CALLen"), "10381COMPETITIVE_CALLen");
        assert_eq!(file_stem_for_id("HORIZON-CL4-2024.01"), "HORIZON-CL4-2024.01");
    }

    #[test]
    fn test_unsafe_ids_are_hashed_apart() {
        let a = file_stem_for_id("a/b");
        let b = file_stem_for_id("a:b");

        assert!(a.starts_with("a_b-"));
        assert!(b.starts_with("a_b-"));
        assert_ne!(a, b);
        assert!(!file_stem_for_id("../etc").contains('/'));
    }

    #[tokio::test]
    async fn test_detail_cache_roundtrip() {
        let temp = TempDir::new().unwrap();
        let cache = DetailCache::open(temp.path(), "html").await.unwrap();

        assert!(!cache.has("A"));
        cache.write("A", b"<html>payload</html>").await.unwrap();

        assert!(cache.has("A"));
        assert_eq!(cache.read("A").await.unwrap(), b"<html>payload</html>");
        assert_eq!(cache.path_for("A"), temp.path().join("html").join("A.html"));
    }

    #[tokio::test]
    async fn test_record_store_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = RecordStore::open(temp.path()).await.unwrap();
        let record = NormalizedRecord::new("s:A", "s", "Title", "https://x/A", json!({"k": 1}));

        assert!(store.load("A").await.unwrap().is_none());
        store.store("A", &record).await.unwrap();
        assert_eq!(store.load("A").await.unwrap(), Some(record));
    }
}
