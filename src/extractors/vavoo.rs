//! Vavoo extractor (§4.1, SPEC_FULL.md §4.1 "Vavoo"): a two-step signed
//! handshake against Vavoo's own app-ping and resolve endpoints, grounded in
//! `original_source/extractors/vavoo.py`.

use super::core::SiteRecipe;
use super::{EndpointKind, ResolvedStream};
use crate::error::{ProxyError, Result};
use crate::util::FORCED_USER_AGENT;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::RwLock;

const PING_ENDPOINT: &str = "https://www.vavoo.tv/api/app/ping";
const RESOLVE_ENDPOINT: &str = "https://vavoo.to/mediahubmx-resolve.json";

/// Fixed device-fingerprint token the Vavoo Android app presents on ping
/// (original_source/extractors/vavoo.py). Not a secret — it is baked into
/// the public app binary and is the same for every client.
const PING_TOKEN: &str = "tosFwQCJMS8qrW_AjLoHPQ41646J5dRNha6ZWHnijoYQQQoADQoXYSo7ki7O5-CsgN4CH0uRk6EEoJ0728ar9scCRQW3ZkbfrPfeCXW2VgopSW2FWDqPOoVYIuVPAOnXCZ5g";

pub struct VavooRecipe {
    /// Short-TTL in-memory cache for the addon signature: it isn't
    /// channel-specific, so refetching it per channel extraction would be
    /// wasteful, but it must still expire (§4.1: "cache the signature... for
    /// a short TTL").
    signature: RwLock<Option<(String, std::time::Instant)>>,
}

const SIGNATURE_TTL: std::time::Duration = std::time::Duration::from_secs(300);

impl VavooRecipe {
    pub fn new() -> Self {
        Self { signature: RwLock::new(None) }
    }

    async fn get_signature(&self, client: &Client) -> Result<String> {
        if let Some((sig, fetched_at)) = self.signature.read().await.clone() {
            if fetched_at.elapsed() < SIGNATURE_TTL {
                return Ok(sig);
            }
        }

        let payload = json!({
            "token": PING_TOKEN,
            "reason": "app-blur",
            "locale": "de",
            "theme": "dark",
            "metadata": {
                "device": {"type": "Handset", "brand": "google", "model": "Pixel"},
                "os": {"name": "android", "version": "13"},
                "app": {"platform": "android", "version": "3.1.21"},
                "version": {"package": "tv.vavoo.app", "binary": "3.1.21", "js": "3.1.21"}
            },
            "package": "tv.vavoo.app",
            "version": "3.1.21",
            "process": "app",
            "adblockEnabled": true,
            "proxy": {"supported": ["ss", "openvpn"], "engine": "ss", "enabled": true, "autoServer": true, "id": "de-fra"},
        });

        let resp = client
            .post(PING_ENDPOINT)
            .header("user-agent", "okhttp/4.11.0")
            .header("accept", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProxyError::UpstreamTransient(e.to_string()))?;

        let body: serde_json::Value =
            resp.json().await.map_err(|e| ProxyError::Extractor(format!("vavoo ping returned non-JSON: {e}")))?;
        let sig = body
            .get("addonSig")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProxyError::Extractor("vavoo ping response missing addonSig".into()))?
            .to_string();

        *self.signature.write().await = Some((sig.clone(), std::time::Instant::now()));
        Ok(sig)
    }
}

impl Default for VavooRecipe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SiteRecipe for VavooRecipe {
    fn family(&self) -> &'static str {
        "vavoo"
    }

    async fn resolve(&self, client: &Client, _proxy: Option<&str>, url: &str) -> Result<ResolvedStream> {
        if !url.contains("vavoo.to") {
            return Err(ProxyError::BadRequest("not a vavoo.to URL".into()));
        }

        let signature = self.get_signature(client).await?;

        let resolve_body = json!({
            "language": "de",
            "region": "AT",
            "url": url,
            "clientVersion": "3.1.21",
        });

        let resp = client
            .post(RESOLVE_ENDPOINT)
            .header("user-agent", "MediaHubMX/2")
            .header("accept", "application/json")
            .header("mediahubmx-signature", signature)
            .json(&resolve_body)
            .send()
            .await
            .map_err(|e| ProxyError::UpstreamTransient(e.to_string()))?;

        let body: serde_json::Value =
            resp.json().await.map_err(|e| ProxyError::Extractor(format!("vavoo resolve returned non-JSON: {e}")))?;

        let destination_url = body
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|v| v.get("url"))
            .or_else(|| body.get("url"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProxyError::Extractor("vavoo resolve response carried no url".into()))?
            .to_string();

        let mut headers = HashMap::new();
        headers.insert("user-agent".to_string(), FORCED_USER_AGENT.to_string());
        headers.insert("referer".to_string(), "https://vavoo.to/".to_string());

        Ok(ResolvedStream { destination_url, request_headers: headers, endpoint_kind: EndpointKind::ProxyStreamEndpoint })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_vavoo_url_is_rejected() {
        let recipe = VavooRecipe::new();
        let client = Client::new();
        let err = recipe.resolve(&client, None, "https://other.example/x").await.unwrap_err();
        assert!(matches!(err, ProxyError::BadRequest(_)));
    }

    // The ping/resolve endpoints are fixed real hosts (AUTH_ENDPOINT-style),
    // so the list-vs-object response shapes are exercised directly rather
    // than through a mocked HTTP round trip.
    #[test]
    fn list_shaped_resolve_response_yields_first_url() {
        let resolve_resp: serde_json::Value = json!([{"url": "https://cdn.example/out.m3u8"}]);
        let destination = resolve_resp.as_array().and_then(|a| a.first()).and_then(|v| v.get("url")).and_then(|v| v.as_str());
        assert_eq!(destination, Some("https://cdn.example/out.m3u8"));
    }

    #[test]
    fn object_shaped_resolve_response_yields_url() {
        let resolve_resp: serde_json::Value = json!({"url": "https://cdn.example/out.m3u8"});
        let destination = resolve_resp.as_array().and_then(|arr| arr.first()).and_then(|v| v.get("url")).or_else(|| resolve_resp.get("url")).and_then(|v| v.as_str());
        assert_eq!(destination, Some("https://cdn.example/out.m3u8"));
    }
}
