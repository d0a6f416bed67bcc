//! "Already processed" lookups against the persisted artifact

use crate::helpers::identifier_from_value;
use crate::models::VideoId;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Builds, once per artifact path, the set of canonical identifiers the
/// artifact already contains. The artifact is the only source of truth.
pub struct SyncStateTracker {
    full_crawl: bool,
    cache: Mutex<HashMap<PathBuf, Arc<HashSet<String>>>>,
}

impl SyncStateTracker {
    pub fn new(full_crawl: bool) -> Self {
        Self {
            full_crawl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn full_crawl(&self) -> bool {
        self.full_crawl
    }

    pub fn already_processed(&self, id: &VideoId, artifact: &Path) -> bool {
        if self.full_crawl {
            return false;
        }
        self.processed_keys(artifact).contains(&id.key())
    }

    /// Canonical identifiers present in the artifact, cached per path
    pub fn processed_keys(&self, artifact: &Path) -> Arc<HashSet<String>> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .entry(artifact.to_path_buf())
            .or_insert_with(|| Arc::new(build_index(artifact)))
            .clone()
    }

    pub fn clear_cache(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn build_index(artifact: &Path) -> HashSet<String> {
    let content = match std::fs::read_to_string(artifact) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("No artifact at {} yet", artifact.display());
            return HashSet::new();
        }
        Err(e) => {
            log::warn!("Cannot read {}: {}; treating as empty", artifact.display(), e);
            return HashSet::new();
        }
    };
    let items = match serde_json::from_str::<Value>(&content) {
        Ok(Value::Array(items)) => items,
        Ok(_) => {
            log::warn!("{} is not a JSON array; treating as empty", artifact.display());
            return HashSet::new();
        }
        Err(e) => {
            log::warn!("Cannot parse {}: {}; treating as empty", artifact.display(), e);
            return HashSet::new();
        }
    };
    let keys: HashSet<String> = items
        .iter()
        .filter_map(identifier_from_value)
        .map(|id| id.key())
        .collect();
    log::info!(
        "{} already holds {} identifiers ({} entries)",
        artifact.display(),
        keys.len(),
        items.len()
    );
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("timeline.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_all_identifier_locations_recognized() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            r#"[
                {"videoUrl": "https://www.bilibili.com/video/BV1aaaaaaaaa"},
                {"cover": "1bbbbbbbbbb.jpg"},
                {"video": {"bv": "BV1ccccccccc"}},
                {"bv": "bv1ddddddddd"},
                "not an object"
            ]"#,
        );
        let tracker = SyncStateTracker::new(false);
        for raw in ["BV1AAAAAAAAA", "BV1bbbbbbbbbb", "1ccccccccc", "BV1ddddddddd"] {
            assert!(tracker.already_processed(&VideoId::parse(raw).unwrap(), &path), "{}", raw);
        }
        assert!(!tracker.already_processed(&VideoId::parse("BV1eeeeeeeee").unwrap(), &path));
    }

    #[test]
    fn test_curated_multibyte_covers_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), r#"[{"cover": "1号活动.jpg"}, {"bv": "BV111"}]"#);
        let tracker = SyncStateTracker::new(false);
        assert!(tracker.already_processed(&VideoId::parse("BV111").unwrap(), &path));
        assert_eq!(tracker.processed_keys(&path).len(), 1);
    }

    #[test]
    fn test_cache_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), r#"[{"bv": "BV111"}]"#);
        let tracker = SyncStateTracker::new(false);
        let id = VideoId::parse("BV222").unwrap();
        assert!(!tracker.already_processed(&id, &path));

        write(dir.path(), r#"[{"bv": "BV111"}, {"bv": "BV222"}]"#);
        assert!(!tracker.already_processed(&id, &path));
        tracker.clear_cache();
        assert!(tracker.already_processed(&id, &path));
    }

    #[test]
    fn test_full_crawl_bypasses() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), r#"[{"bv": "BV111"}]"#);
        let tracker = SyncStateTracker::new(true);
        assert!(!tracker.already_processed(&VideoId::parse("BV111").unwrap(), &path));
    }

    #[test]
    fn test_missing_or_corrupt_artifact_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = SyncStateTracker::new(false);
        assert!(tracker.processed_keys(&dir.path().join("absent.json")).is_empty());
        let corrupt = write(dir.path(), "{not json");
        assert!(tracker.processed_keys(&corrupt).is_empty());
    }
}
