//! `POST /generate_urls` (§6): batch-build proxy URLs from a JSON array of
//! already-resolved `{destination_url, endpoint, request_headers}` triples,
//! without touching the extractor registry.

use crate::error::{ProxyError, Result};
use crate::server::state::AppState;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct UrlSpec {
    destination_url: String,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    request_headers: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateUrlsRequest {
    urls: Vec<UrlSpec>,
}

fn default_endpoint(destination_url: &str) -> &'static str {
    let lower = destination_url.to_ascii_lowercase();
    if lower.ends_with(".mpd") {
        "/proxy/mpd/manifest.m3u8"
    } else if lower.ends_with(".m3u8") {
        "/proxy/hls/manifest.m3u8"
    } else {
        "/proxy/manifest.m3u8"
    }
}

pub async fn generate_urls(State(state): State<AppState>, Json(req): Json<GenerateUrlsRequest>) -> Result<Response> {
    if req.urls.is_empty() {
        return Err(ProxyError::BadRequest("'urls' must be a non-empty array".into()));
    }

    let generated: Vec<_> = req
        .urls
        .iter()
        .map(|spec| {
            let endpoint = spec.endpoint.as_deref().unwrap_or_else(|| default_endpoint(&spec.destination_url));
            let mut proxy_url = format!("{}{}?d={}", state.config.base_url, endpoint, crate::util::urlenc(&spec.destination_url));
            proxy_url.push_str(&crate::util::encode_header_params(&spec.request_headers));
            json!({
                "destination_url": spec.destination_url,
                "proxy_url": proxy_url,
            })
        })
        .collect();

    Ok(Json(json!({ "urls": generated })).into_response())
}
