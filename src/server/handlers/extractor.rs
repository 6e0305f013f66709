//! Resolve-only routes (§6): `/extractor`, `/extractor/video`. Runs the
//! extractor registry exactly like `proxy::relay_core` does, but returns the
//! resolved stream as JSON (or a 302 redirect) instead of relaying it.

use crate::error::Result;
use crate::extractors::generic::filter_client_headers;
use crate::server::state::AppState;
use crate::server::params;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Redirect, Response};
use serde_json::json;
use std::collections::HashMap;

fn header_map_to_plain(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_ascii_lowercase(), v.to_string())))
        .collect()
}

/// `/extractor`, `/extractor/video` (§6): resolve a channel URL without
/// relaying it. Accepts URL-encoded or Base64-encoded `url`/`d`, an
/// optional `host` hint, and `redirect_stream=true` to 302 straight to the
/// computed `proxy_url` instead of returning JSON.
pub async fn resolve(State(state): State<AppState>, Query(query): Query<HashMap<String, String>>, headers: HeaderMap) -> Result<Response> {
    let target_url = params::target_url_maybe_base64(&query)?;
    let force_refresh = params::bool_param(&query, "force", false);
    let redirect_stream = params::bool_param(&query, "redirect_stream", false);
    let api_password = params::api_password_param(&query);

    let generic_headers = filter_client_headers(&header_map_to_plain(&headers));
    let extractor = state.registry.resolve(&target_url, query.get("host").map(String::as_str), &generic_headers);

    let resolved = extractor.extract(&target_url, force_refresh).await?;

    let endpoint = if resolved.destination_url.to_ascii_lowercase().ends_with(".mpd") {
        "/proxy/mpd/manifest.m3u8"
    } else {
        match resolved.endpoint_kind {
            crate::extractors::EndpointKind::ProxyStreamEndpoint => "/proxy/stream",
            crate::extractors::EndpointKind::HlsManifestProxy => "/proxy/hls/manifest.m3u8",
            crate::extractors::EndpointKind::HlsProxy => "/proxy/manifest.m3u8",
        }
    };

    let mut proxy_url = format!("{}{}?d={}", state.config.base_url, endpoint, crate::util::urlenc(&resolved.destination_url));
    proxy_url.push_str(&crate::util::header_and_password_suffix(&resolved.request_headers, api_password.as_deref()));

    if redirect_stream {
        return Ok(Redirect::to(&proxy_url).into_response());
    }

    Ok(axum::Json(json!({
        "destination_url": resolved.destination_url,
        "request_headers": resolved.request_headers,
        "endpoint_type": resolved.endpoint_kind,
        "proxy_url": proxy_url,
    }))
    .into_response())
}
