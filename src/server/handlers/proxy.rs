//! Resolve-and-relay routes (§4.5, §6): `/proxy/manifest.m3u8`,
//! `/proxy/hls/manifest.m3u8`, `/proxy/mpd/manifest.m3u8`, `/proxy/stream`,
//! and `/proxy/hls/segment.{ts,m4s,mp4,aac}` all share one dispatcher.
//!
//! Every one of these routes re-resolves its target through the extractor
//! registry before relaying, same as the original implementation calling its
//! extractor lookup on every proxied request rather than only at the
//! top-level entry point. For a destination the registry doesn't recognise
//! (the common case for a recursive `d=` call onto an already-resolved CDN
//! URL) the generic extractor is a no-op passthrough, so this costs nothing
//! beyond a family lookup.

use crate::dash::{self, ClearKeyInjection, DecryptParams, HlsFromMpdContext, MpdRewriteContext};
use crate::error::{ProxyError, Result};
use crate::extractors::generic::filter_client_headers;
use crate::extractors::registry::detect_from_url;
use crate::hls::{rewrite_hls, RewriteContext};
use crate::metrics;
use crate::server::relay;
use crate::server::state::AppState;
use crate::server::url_validation::validate_origin_url;
use crate::server::{auth, params};
use crate::util::looks_like_manifest_path;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::collections::HashMap;
use std::time::Instant;

fn header_map_to_plain(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_ascii_lowercase(), v.to_string())))
        .collect()
}

/// Merge `h_*` query-supplied headers on top of the extractor's own
/// resolved headers, case-insensitively overriding any duplicate (§4.5).
fn merge_query_headers(mut resolved: HashMap<String, String>, query: &HashMap<String, String>) -> HashMap<String, String> {
    for (name, value) in params::headers_from_query(query) {
        resolved.retain(|k, _| !k.eq_ignore_ascii_case(&name));
        resolved.insert(name, value);
    }
    resolved
}

async fn relay_core(state: AppState, query: HashMap<String, String>, inbound: HeaderMap, route: &'static str, document_ends_m3u8: bool) -> Result<Response> {
    let start = Instant::now();
    let target_url = params::target_url(&query)?;
    let force_refresh = params::bool_param(&query, "force", false);
    let redirect_stream = params::bool_param(&query, "redirect_stream", true);
    let api_password = params::api_password_param(&query);

    let generic_headers = filter_client_headers(&header_map_to_plain(&inbound));
    let extractor = state.registry.resolve(&target_url, query.get("host").map(String::as_str), &generic_headers);

    let resolved = match extractor.extract(&target_url, force_refresh).await {
        Ok(r) => r,
        Err(_) => extractor.extract(&target_url, true).await?,
    };

    let is_vixsrc = extractor.family() == "vixsrc";
    let stream_headers = merge_query_headers(resolved.request_headers, &query);

    if !redirect_stream {
        let endpoint = if resolved.destination_url.to_ascii_lowercase().ends_with(".mpd") {
            "/proxy/mpd/manifest.m3u8"
        } else {
            "/proxy/hls/manifest.m3u8"
        };
        let proxy_url = build_proxy_url(&state, endpoint, &resolved.destination_url, &stream_headers, api_password.as_deref());
        metrics::record_request(route, 200);
        return Ok(axum::Json(json!({
            "destination_url": resolved.destination_url,
            "request_headers": stream_headers,
            "endpoint_type": resolved.endpoint_kind,
            "proxy_url": proxy_url,
        }))
        .into_response());
    }

    let response = fetch_and_dispatch(&state, &resolved.destination_url, stream_headers, &query, &target_url, is_vixsrc, &inbound, document_ends_m3u8).await;

    match &response {
        Ok(resp) => metrics::record_request(route, resp.status().as_u16()),
        Err(_) => metrics::record_request(route, 502),
    }
    metrics::record_duration(route, start);
    response
}

fn build_proxy_url(state: &AppState, endpoint: &str, destination_url: &str, headers: &HashMap<String, String>, api_password: Option<&str>) -> String {
    let mut url = format!("{}{}?d={}", state.config.base_url, endpoint, crate::util::urlenc(destination_url));
    url.push_str(&crate::util::header_and_password_suffix(headers, api_password));
    url
}

/// Fetch `document_url` with the resolved/merged headers and dispatch to the
/// HLS rewriter, the DASH rewriter (or DASH→HLS converter), or a raw
/// passthrough relay, by sniffing the upstream response (§4.5).
#[allow(clippy::too_many_arguments)]
async fn fetch_and_dispatch(
    state: &AppState,
    document_url: &str,
    stream_headers: HashMap<String, String>,
    query: &HashMap<String, String>,
    channel_url: &str,
    is_vixsrc: bool,
    inbound: &HeaderMap,
    document_ends_m3u8: bool,
) -> Result<Response> {
    validate_origin_url(document_url)?;

    let api_password = params::api_password_param(query);
    let family = detect_from_url(document_url);
    let client = relay::client_for(&state.http_client, &state.config, family);

    let is_manifest_target = looks_like_manifest_path(document_url);
    let mut builder = relay::apply_outbound_headers(client.get(document_url), &stream_headers, is_manifest_target);
    if !is_manifest_target {
        let conditional = relay::inbound_conditional_headers(inbound);
        builder = relay::apply_outbound_headers(builder, &conditional, false);
    }

    let resp = builder.send().await.map_err(ProxyError::OriginFetchError)?;
    let content_type = relay::content_type_of(&resp);
    let is_hls = relay::looks_like_hls(content_type.as_deref(), document_url, "")
        || crate::util::is_newkso_css_manifest(document_url);
    let is_dash = !is_hls && relay::looks_like_dash(content_type.as_deref(), document_url, "");

    if is_hls {
        let body = resp.text().await.map_err(ProxyError::OriginFetchError)?;
        let ctx = RewriteContext {
            document_url,
            proxy_base: &state.config.base_url,
            upstream_headers: &stream_headers,
            channel_url,
            api_password: api_password.as_deref(),
            is_vixsrc,
        };
        return Ok(relay::hls_response(rewrite_hls(&body, &ctx)));
    }

    if is_dash {
        let body = resp.text().await.map_err(ProxyError::OriginFetchError)?;
        let clearkey = params::clearkey_from_query(query);
        let format_hls = query.get("format").map(|f| f != "mpd").unwrap_or(document_ends_m3u8);

        if format_hls {
            let mpd = dash::parse_mpd(&body)?;
            let decrypt = clearkey.as_ref().map(|(kid, key)| DecryptParams { key_hex: key, key_id_hex: kid });
            let ctx = HlsFromMpdContext {
                document_url,
                proxy_base: &state.config.base_url,
                upstream_headers: &stream_headers,
                api_password: api_password.as_deref(),
                decrypt,
            };
            let out = match query.get("rep_id") {
                Some(rep_id) => dash::media_playlist_from_mpd(&mpd, rep_id, &ctx)?,
                None => dash::master_playlist_from_mpd(&mpd, &ctx),
            };
            return Ok(relay::hls_response(out));
        }

        let ck = clearkey.as_ref().map(|(kid, key)| ClearKeyInjection { kid_hex: kid, key_hex: key });
        let ctx = MpdRewriteContext {
            document_url,
            proxy_base: &state.config.base_url,
            upstream_headers: &stream_headers,
            api_password: api_password.as_deref(),
            clearkey: ck,
        };
        let out = dash::rewrite_mpd(&body, &ctx)?;
        return Ok(relay::dash_response(out));
    }

    Ok(relay::passthrough_response(resp, document_url))
}

pub async fn manifest(State(state): State<AppState>, Query(query): Query<HashMap<String, String>>, headers: HeaderMap) -> Result<Response> {
    relay_core(state, query, headers, "proxy_manifest", true).await
}

pub async fn hls_manifest(State(state): State<AppState>, Query(query): Query<HashMap<String, String>>, headers: HeaderMap) -> Result<Response> {
    relay_core(state, query, headers, "proxy_hls_manifest", true).await
}

pub async fn mpd_manifest(State(state): State<AppState>, Query(query): Query<HashMap<String, String>>, headers: HeaderMap) -> Result<Response> {
    relay_core(state, query, headers, "proxy_mpd_manifest", true).await
}

pub async fn stream(State(state): State<AppState>, Query(query): Query<HashMap<String, String>>, headers: HeaderMap) -> Result<Response> {
    relay_core(state, query, headers, "proxy_stream", false).await
}

pub async fn hls_segment(State(state): State<AppState>, Query(query): Query<HashMap<String, String>>, headers: HeaderMap) -> Result<Response> {
    relay_core(state, query, headers, "proxy_hls_segment", false).await
}

/// `/proxy/ip` (§6): the public IP as seen through any configured global
/// proxy, diagnostic only.
pub async fn proxy_ip(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    // Reuses the same password gate as every other data endpoint even though
    // it's wired in the protected router, so no extra check here.
    let _ = auth::require_api_password;
    let client = relay::client_for(&state.http_client, &state.config, "global");
    let resp = client
        .get("https://api.ipify.org?format=json")
        .send()
        .await
        .map_err(ProxyError::OriginFetchError)?;
    let body: serde_json::Value = resp.json().await.map_err(ProxyError::OriginFetchError)?;
    let _ = headers;
    Ok(axum::Json(body).into_response())
}

/// Fallback for unmatched routes (§6: `OPTIONS /{*}`). Real CORS preflight
/// requests are already short-circuited by the `CorsLayer` before reaching
/// here; this only has to answer a bare `OPTIONS` with no body and return
/// 404 for anything else that doesn't match a route.
pub async fn options_preflight(method: axum::http::Method) -> impl IntoResponse {
    if method == axum::http::Method::OPTIONS {
        axum::http::StatusCode::NO_CONTENT
    } else {
        axum::http::StatusCode::NOT_FOUND
    }
}
