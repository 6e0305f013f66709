//! Per-site extractor recipes and the shared machinery they run on (§4.1, §4.2).
//!
//! An extractor turns an opaque channel URL into a [`ResolvedStream`]: the
//! real upstream URL plus the exact headers needed to fetch it. The hard
//! parts — session (cookie jar) continuity, per-channel-id result caching
//! with HEAD revalidation, concurrent-extraction coalescing, and optional
//! disk persistence — are not duplicated per site; they live once in
//! [`core::Extractor`] and every site plugs in a [`SiteRecipe`].

pub mod cache;
pub mod core;
pub mod decode;
pub mod dlhd;
pub mod generic;
pub mod registry;
pub mod scrape;
pub mod simple;
pub mod vavoo;
pub mod vixsrc;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tells the caller which proxy route further requests for this stream
/// should be routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// Known-HLS origin — route through `/proxy/hls/manifest.m3u8` for the
    /// full §4.3 rewrite.
    HlsManifestProxy,
    /// Format not known ahead of time — route through the generic
    /// `/proxy/manifest.m3u8` dispatcher, which sniffs content-type/path
    /// and picks the HLS or DASH pipeline itself (§4.5).
    HlsProxy,
    /// A single playable file (no adaptive manifest) — route through
    /// `/proxy/stream` for byte-for-byte passthrough.
    ProxyStreamEndpoint,
}

/// The result of a successful extraction (§3, "Resolved stream").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedStream {
    pub destination_url: String,
    pub request_headers: HashMap<String, String>,
    pub endpoint_kind: EndpointKind,
}

/// Every extractor implements this contract (§4.1).
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Resolve `url` to a [`ResolvedStream`], bypassing the cache when
    /// `force_refresh` is set.
    async fn extract(&self, url: &str, force_refresh: bool) -> Result<ResolvedStream>;

    /// Release the extractor's session (cookie jar, any persisted cache
    /// flush). Called at shutdown or after a terminal retry failure.
    async fn close(&self);

    /// Optional capability: invalidate the cached result for the channel
    /// that `url` belongs to. Implemented by extractors that cache (used by
    /// the key-fetch endpoint on non-2xx, §4.7).
    async fn invalidate_cache_for_url(&self, _url: &str) {}

    /// The extractor's site-family tag, used for upstream proxy-pool
    /// selection (§4.5) and the HLS rewriter's VixSrc flag (§9 Open
    /// Question (a)).
    fn family(&self) -> &'static str;
}
