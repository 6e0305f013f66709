use crate::config::Config;
use crate::decrypt::InitSegmentCache;
use crate::extractors::registry::ExtractorRegistry;
use metrics_exporter_prometheus::PrometheusHandle;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Shared HTTP client for connection pooling, used whenever a request
    /// doesn't need a per-family proxy (see `server::relay::client_for`).
    pub http_client: Client,
    pub registry: Arc<ExtractorRegistry>,
    pub init_segment_cache: Arc<InitSegmentCache>,
    pub metrics_handle: PrometheusHandle,
}

impl AppState {
    pub fn new(config: Config, metrics_handle: PrometheusHandle) -> Self {
        let http_client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(60))
            .build()
            .expect("failed to build http client");

        let registry = Arc::new(ExtractorRegistry::new(config.clone()));

        Self {
            config: Arc::new(config),
            http_client,
            registry,
            init_segment_cache: Arc::new(InitSegmentCache::new()),
            metrics_handle,
        }
    }
}
