//! Fallback extractor (§4.1): returns the channel URL unchanged, forwarding
//! a filtered subset of the client's own headers instead of performing any
//! site-specific handshake.

use super::core::SiteRecipe;
use super::{EndpointKind, ResolvedStream};
use crate::error::Result;
use crate::util::{is_ip_revealing, FORCED_USER_AGENT};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;

/// Client headers worth preserving when forwarding to an unknown origin:
/// auth-bearing and session/referrer headers. Anything not in this list is
/// dropped rather than blindly forwarded.
const FORWARDED_HEADERS: &[&str] = &["authorization", "referer", "cookie", "x-api-key"];

pub struct GenericRecipe {
    /// Headers captured from the inbound client request, pre-filtered by
    /// the caller down to [`FORWARDED_HEADERS`] minus [`is_ip_revealing`].
    pub client_headers: HashMap<String, String>,
}

/// Apply §4.1's header filter: keep auth/referer/cookie, always drop
/// anything that would reveal the client's IP.
pub fn filter_client_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .filter(|(k, _)| !is_ip_revealing(k))
        .filter(|(k, _)| FORWARDED_HEADERS.iter().any(|f| f.eq_ignore_ascii_case(k)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[async_trait]
impl SiteRecipe for GenericRecipe {
    fn family(&self) -> &'static str {
        "generic"
    }

    async fn resolve(&self, _client: &Client, _proxy: Option<&str>, url: &str) -> Result<ResolvedStream> {
        let mut headers = filter_client_headers(&self.client_headers);
        headers.entry("user-agent".to_string()).or_insert_with(|| FORCED_USER_AGENT.to_string());

        Ok(ResolvedStream {
            destination_url: url.to_string(),
            request_headers: headers,
            endpoint_kind: EndpointKind::HlsProxy,
        })
    }
}
