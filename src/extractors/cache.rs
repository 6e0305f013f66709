//! Per-channel-id resolved-stream cache with optional disk persistence.
//!
//! Repurposes the teacher's `DashMap`-backed, short-TTL manifest cache into
//! the HEAD-revalidated, channel-id-keyed cache §4.2 describes: there is no
//! TTL here, entries live until explicitly evicted (failed HEAD validation)
//! or overwritten.

use super::ResolvedStream;
use base64::Engine;
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone, Default)]
pub struct ResolvedStreamCache {
    entries: Arc<DashMap<String, ResolvedStream>>,
}

impl ResolvedStreamCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, channel_id: &str) -> Option<ResolvedStream> {
        self.entries.get(channel_id).map(|e| e.clone())
    }

    pub fn insert(&self, channel_id: &str, stream: ResolvedStream) {
        self.entries.insert(channel_id.to_string(), stream);
    }

    pub fn evict(&self, channel_id: &str) {
        self.entries.remove(channel_id);
    }

    /// Serialize every entry as `base64(utf8(json(cache)))` and write it to
    /// `path` (§6: "one cache file per extractor that opts in").
    pub fn persist(&self, path: &Path) -> std::io::Result<()> {
        let snapshot: std::collections::HashMap<String, ResolvedStream> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let json = serde_json::to_string(&snapshot)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(json);
        std::fs::write(path, encoded)
    }

    /// Load a previously persisted cache file, if present. Missing or
    /// corrupt files are treated as an empty cache rather than a hard error
    /// — losing a warm cache is not load-bearing for correctness.
    pub fn load(path: &Path) -> Self {
        let cache = Self::new();
        let Ok(encoded) = std::fs::read_to_string(path) else {
            debug!("no persisted extractor cache at {}", path.display());
            return cache;
        };
        let decoded = match base64::engine::general_purpose::STANDARD.decode(encoded.trim()) {
            Ok(d) => d,
            Err(e) => {
                warn!("persisted extractor cache at {} is not valid base64: {e}", path.display());
                return cache;
            }
        };
        match serde_json::from_slice::<std::collections::HashMap<String, ResolvedStream>>(&decoded) {
            Ok(map) => {
                for (k, v) in map {
                    cache.entries.insert(k, v);
                }
                cache
            }
            Err(e) => {
                warn!("persisted extractor cache at {} is not valid json: {e}", path.display());
                cache
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::EndpointKind;
    use std::collections::HashMap;

    fn sample(url: &str) -> ResolvedStream {
        ResolvedStream {
            destination_url: url.to_string(),
            request_headers: HashMap::new(),
            endpoint_kind: EndpointKind::HlsManifestProxy,
        }
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let cache = ResolvedStreamCache::new();
        cache.insert("123", sample("https://o.example/a.m3u8"));
        assert_eq!(cache.get("123").unwrap().destination_url, "https://o.example/a.m3u8");
    }

    #[test]
    fn evict_removes_entry() {
        let cache = ResolvedStreamCache::new();
        cache.insert("123", sample("https://o.example/a.m3u8"));
        cache.evict("123");
        assert!(cache.get("123").is_none());
    }

    #[test]
    fn persist_and_load_roundtrip_through_base64_json() {
        let dir = std::env::temp_dir().join(format!("streamgate-cache-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cache.b64");

        let cache = ResolvedStreamCache::new();
        cache.insert("42", sample("https://o.example/42.css"));
        cache.persist(&path).unwrap();

        // Persisted form must actually be base64-wrapped JSON, not raw JSON.
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(serde_json::from_str::<serde_json::Value>(&raw).is_err());
        assert!(base64::engine::general_purpose::STANDARD.decode(raw.trim()).is_ok());

        let loaded = ResolvedStreamCache::load(&path);
        assert_eq!(loaded.get("42").unwrap().destination_url, "https://o.example/42.css");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn load_missing_file_returns_empty_cache() {
        let cache = ResolvedStreamCache::load(Path::new("/nonexistent/path/cache.b64"));
        assert!(cache.get("anything").is_none());
    }
}
