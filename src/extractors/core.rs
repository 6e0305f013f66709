//! Shared extractor machinery (§4.2, §5): per-instance session (cookie
//! jar), per-channel-id cache with HEAD revalidation, concurrent-extraction
//! coalescing, and opt-in disk persistence. Every concrete site recipe
//! plugs into this once instead of re-implementing it.

use super::cache::ResolvedStreamCache;
use super::scrape::{channel_id, pick_proxy};
use super::{Extractor, ResolvedStream};
use crate::error::{ProxyError, Result};
use crate::http_retry::{retry_with_backoff, ExponentialRetryConfig};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

/// A single site's scraping recipe. All the session/cache/coalescing
/// machinery around it is provided by [`CoreExtractor`].
#[async_trait]
pub trait SiteRecipe: Send + Sync + 'static {
    /// Site-family tag (§4.1's closed set: `vavoo`, `dlhd`, `vixsrc`, ...).
    fn family(&self) -> &'static str;

    /// Perform one resolution attempt. Called under the per-channel-id
    /// coalescing lock and retried with exponential backoff by the core.
    async fn resolve(&self, client: &Client, proxy: Option<&str>, url: &str) -> Result<ResolvedStream>;

    /// Override to key the cache/coalescing lock by something other than
    /// the default trailing-digits heuristic.
    fn channel_id(&self, url: &str) -> String {
        channel_id(url)
    }
}

pub struct CoreExtractor<R: SiteRecipe> {
    recipe: R,
    client: AsyncMutex<Client>,
    cache: ResolvedStreamCache,
    locks: DashMap<String, Arc<AsyncMutex<()>>>,
    proxies: Vec<String>,
    persist_path: Option<PathBuf>,
}

fn build_client() -> Client {
    Client::builder()
        .cookie_store(true)
        .pool_idle_timeout(Duration::from_secs(90))
        .connect_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(60))
        .build()
        .expect("failed to build extractor HTTP client")
}

impl<R: SiteRecipe> CoreExtractor<R> {
    pub fn new(recipe: R, proxies: Vec<String>, persist_path: Option<PathBuf>) -> Self {
        let cache = match &persist_path {
            Some(path) => ResolvedStreamCache::load(path),
            None => ResolvedStreamCache::new(),
        };
        Self {
            recipe,
            client: AsyncMutex::new(build_client()),
            cache,
            locks: DashMap::new(),
            proxies,
            persist_path,
        }
    }

    fn lock_for(&self, channel_id: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .entry(channel_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn persist(&self) {
        if let Some(path) = &self.persist_path {
            if let Err(e) = self.cache.persist(path) {
                warn!("failed to persist {} extractor cache: {e}", self.recipe.family());
            }
        }
    }

    /// HEAD-validate a cached entry (§3: "accepting only HTTP 200").
    async fn validate(&self, client: &Client, stream: &ResolvedStream) -> bool {
        let mut req = client.head(&stream.destination_url);
        for (k, v) in &stream.request_headers {
            req = req.header(k.as_str(), v.as_str());
        }
        matches!(req.send().await, Ok(resp) if resp.status().as_u16() == 200)
    }

    /// Cheap keep-alive GET against the original channel URL to refresh
    /// anti-bot session cookies through the instance's proxy (§4.2).
    async fn keep_alive(&self, client: &Client, url: &str) {
        let proxied = pick_proxy(&self.proxies).and_then(|p| {
            let proxy = reqwest::Proxy::all(p.as_str()).ok()?;
            Client::builder().proxy(proxy).cookie_store(true).build().ok()
        });
        let client = proxied.as_ref().unwrap_or(client);
        let _ = client.get(url).send().await;
    }
}

#[async_trait]
impl<R: SiteRecipe> Extractor for CoreExtractor<R> {
    async fn extract(&self, url: &str, force_refresh: bool) -> Result<ResolvedStream> {
        let channel_id = self.recipe.channel_id(url);

        if !force_refresh {
            if let Some(stream) = self.cache.get(&channel_id) {
                let client = self.client.lock().await.clone();
                if self.validate(&client, &stream).await {
                    debug!("{} cache hit for channel {channel_id}, validated", self.recipe.family());
                    self.keep_alive(&client, url).await;
                    return Ok(stream);
                }
                debug!("{} cache entry for channel {channel_id} failed HEAD validation, evicting", self.recipe.family());
                self.cache.evict(&channel_id);
            }
        }

        let lock = self.lock_for(&channel_id);
        let _guard = lock.lock().await;

        // Double-checked: a waiter that arrives after the holder populated
        // the cache should return immediately without its own handshake.
        if !force_refresh {
            if let Some(stream) = self.cache.get(&channel_id) {
                let client = self.client.lock().await.clone();
                if self.validate(&client, &stream).await {
                    return Ok(stream);
                }
                self.cache.evict(&channel_id);
            }
        }

        crate::metrics::record_extractor_handshake(self.recipe.family());

        let client = self.client.lock().await.clone();
        let proxy = pick_proxy(&self.proxies).cloned();
        let retry_config = ExponentialRetryConfig::default();

        let result = retry_with_backoff(&retry_config, || {
            let client = client.clone();
            let proxy = proxy.clone();
            async move { self.recipe.resolve(&client, proxy.as_deref(), url).await.map_err(|e| e.to_string()) }
        })
        .await;

        match result {
            Ok(stream) => {
                self.cache.insert(&channel_id, stream.clone());
                self.persist();
                Ok(stream)
            }
            Err(msg) => {
                // Transport errors on the final failure reset the session
                // (§4.2): replace the client so the next extraction starts
                // with a clean cookie jar rather than a possibly-poisoned one.
                *self.client.lock().await = build_client();
                if msg.to_ascii_lowercase().contains("403") || msg.to_ascii_lowercase().contains("forbidden") {
                    warn!("{} extraction forbidden for channel {channel_id}", self.recipe.family());
                    Err(ProxyError::UpstreamForbidden)
                } else {
                    Err(ProxyError::Extractor(msg))
                }
            }
        }
    }

    async fn close(&self) {
        self.persist();
        *self.client.lock().await = build_client();
    }

    async fn invalidate_cache_for_url(&self, url: &str) {
        let id = self.recipe.channel_id(url);
        self.cache.evict(&id);
        self.persist();
    }

    fn family(&self) -> &'static str {
        self.recipe.family()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::EndpointKind;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingRecipe {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl SiteRecipe for CountingRecipe {
        fn family(&self) -> &'static str {
            "counting"
        }

        async fn resolve(&self, _client: &Client, _proxy: Option<&str>, url: &str) -> Result<ResolvedStream> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ResolvedStream {
                destination_url: url.to_string(),
                request_headers: HashMap::new(),
                endpoint_kind: EndpointKind::HlsManifestProxy,
            })
        }
    }

    #[tokio::test]
    async fn force_refresh_bypasses_cache() {
        let calls = Arc::new(AtomicU32::new(0));
        let extractor = CoreExtractor::new(CountingRecipe { calls: calls.clone() }, vec![], None);

        extractor.extract("https://o.example/stream-1.php", false).await.ok();
        extractor.extract("https://o.example/stream-1.php", true).await.ok();

        // The recipe never reaches a real network, so HEAD validation fails
        // and both calls fall through to `resolve` — this only asserts the
        // resolve path is reachable and doesn't panic under force_refresh.
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn invalidate_cache_for_url_evicts_entry() {
        let calls = Arc::new(AtomicU32::new(0));
        let extractor = CoreExtractor::new(CountingRecipe { calls }, vec![], None);
        extractor.cache.insert(
            "1",
            ResolvedStream {
                destination_url: "https://o.example/x".to_string(),
                request_headers: HashMap::new(),
                endpoint_kind: EndpointKind::HlsManifestProxy,
            },
        );
        extractor.invalidate_cache_for_url("https://o.example/stream-1.php").await;
        assert!(extractor.cache.get("1").is_none());
    }
}
