//! Extractor registry (§4.1): resolves a channel URL to the right
//! [`Extractor`] instance by, in order, an explicit host hint, a
//! substring/regex match on the URL, and finally the generic fallback.
//!
//! Instances are built once per family and memoised — every call after the
//! first reuses the same [`core::CoreExtractor`], so its cache, cookie jar,
//! and coalescing locks persist across requests.

use super::core::CoreExtractor;
use super::dlhd::DlhdRecipe;
use super::generic::GenericRecipe;
use super::simple::SimpleRecipe;
use super::vavoo::VavooRecipe;
use super::vixsrc::VixSrcRecipe;
use super::Extractor;
use crate::config::Config;
use dashmap::DashMap;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

static DLHD_PATH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"stream-\d+\.php").unwrap());
static VIXSRC_PATH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"vixsrc\.[a-z]+/(?:playlist|movie|tv|iframe)").unwrap());

/// Normalize a host hint or URL-derived tag onto the closed family set
/// (§4.1: `daddylive`→`dlhd`, `sportzonline`→`sportsonline`).
fn canonical_family(tag: &str) -> &'static str {
    match tag {
        "dlhd" | "daddylive" => "dlhd",
        "sportsonline" | "sportzonline" => "sportsonline",
        "vavoo" => "vavoo",
        "vixsrc" => "vixsrc",
        "mixdrop" => "mixdrop",
        "voe" => "voe",
        "streamtape" => "streamtape",
        "orion" => "orion",
        _ => "generic",
    }
}

/// Guess a family tag from the URL alone, via substring/regex matching
/// (§4.1's second resolution step).
pub fn detect_from_url(url: &str) -> &'static str {
    let lower = url.to_ascii_lowercase();
    if DLHD_PATH.is_match(&lower) || lower.contains("daddylive") || lower.contains("dlhd") {
        return "dlhd";
    }
    if VIXSRC_PATH.is_match(&lower) {
        return "vixsrc";
    }
    if lower.contains("vavoo.to") {
        return "vavoo";
    }
    if lower.contains("sportsonline") || lower.contains("sportzonline") {
        return "sportsonline";
    }
    if lower.contains("mixdrop") || lower.contains("mdy48tn97") {
        return "mixdrop";
    }
    if lower.contains("voe.sx") || lower.contains("voesx") {
        return "voe";
    }
    if lower.contains("streamtape") {
        return "streamtape";
    }
    if lower.contains("orion") {
        return "orion";
    }
    "generic"
}

pub struct ExtractorRegistry {
    config: Config,
    instances: DashMap<&'static str, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn new(config: Config) -> Self {
        Self { config, instances: DashMap::new() }
    }

    fn build(&self, family: &'static str, generic_headers: &HashMap<String, String>) -> Arc<dyn Extractor> {
        let proxies = self.config.proxies_for(family).to_vec();
        match family {
            "dlhd" => Arc::new(CoreExtractor::new(DlhdRecipe::new(), proxies, Some(self.config.dlhd_cache_path.clone()))),
            "vavoo" => Arc::new(CoreExtractor::new(VavooRecipe::new(), proxies, None)),
            "vixsrc" => Arc::new(CoreExtractor::new(VixSrcRecipe, proxies, None)),
            "sportsonline" => Arc::new(CoreExtractor::new(SimpleRecipe::sportsonline(), proxies, None)),
            "mixdrop" => Arc::new(CoreExtractor::new(SimpleRecipe::mixdrop(), proxies, None)),
            "voe" => Arc::new(CoreExtractor::new(SimpleRecipe::voe(), proxies, None)),
            "streamtape" => Arc::new(CoreExtractor::new(SimpleRecipe::streamtape(), proxies, None)),
            "orion" => Arc::new(CoreExtractor::new(SimpleRecipe::orion(), proxies, None)),
            _ => Arc::new(CoreExtractor::new(GenericRecipe { client_headers: generic_headers.clone() }, proxies, None)),
        }
    }

    /// Resolve the extractor for `url`, preferring an explicit `host_hint`
    /// tag (e.g. the `host` query param on `/extractor/video`) over
    /// URL-sniffing. `generic_headers` is only consulted when resolution
    /// falls through to the generic fallback.
    pub fn resolve(&self, url: &str, host_hint: Option<&str>, generic_headers: &HashMap<String, String>) -> Arc<dyn Extractor> {
        let family = match host_hint {
            Some(hint) => canonical_family(hint),
            None => detect_from_url(url),
        };

        if let Some(existing) = self.instances.get(family) {
            return existing.clone();
        }

        let instance = self.build(family, generic_headers);
        self.instances.entry(family).or_insert(instance).clone()
    }

    pub async fn shutdown(&self) {
        for entry in self.instances.iter() {
            entry.value().close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev_config() -> Config {
        Config {
            port: 7860,
            bind: "0.0.0.0".into(),
            base_url: "http://localhost:7860".into(),
            api_password: None,
            global_proxies: vec![],
            vavoo_proxies: vec![],
            dlhd_proxies: vec![],
            dlhd_cache_path: std::env::temp_dir().join("streamgate-registry-test.dlhd_cache"),
            is_dev: true,
        }
    }

    #[test]
    fn canonical_family_applies_aliases() {
        assert_eq!(canonical_family("daddylive"), "dlhd");
        assert_eq!(canonical_family("sportzonline"), "sportsonline");
        assert_eq!(canonical_family("unknown-tag"), "generic");
    }

    #[test]
    fn detect_from_url_matches_dlhd_stream_path() {
        assert_eq!(detect_from_url("https://daddylive.sx/watch/stream-123.php"), "dlhd");
    }

    #[test]
    fn detect_from_url_falls_back_to_generic() {
        assert_eq!(detect_from_url("https://unknown.example/video.m3u8"), "generic");
    }

    #[tokio::test]
    async fn resolve_memoises_instances_per_family() {
        let registry = ExtractorRegistry::new(dev_config());
        let headers = HashMap::new();
        let a = registry.resolve("https://unknown.example/video.m3u8", None, &headers);
        let b = registry.resolve("https://unknown.example/other.m3u8", None, &headers);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn host_hint_overrides_url_sniffing() {
        let registry = ExtractorRegistry::new(dev_config());
        let headers = HashMap::new();
        let instance = registry.resolve("https://anything.example/x", Some("vavoo"), &headers);
        assert_eq!(instance.family(), "vavoo");
    }
}
