//! Shared upstream-fetch and response-building primitives for every proxy
//! route (§4.5): proxy-pool client selection, outbound header normalisation,
//! content-type sniffing, and the three response shapes (HLS, DASH,
//! byte-for-byte passthrough).

use crate::config::Config;
use crate::extractors::scrape::pick_proxy;
use crate::util::{is_ip_revealing, FORCED_USER_AGENT};
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use reqwest::{Client, RequestBuilder};
use std::collections::HashMap;
use std::time::Duration;

fn build_proxied_client(proxy: &str) -> Option<Client> {
    let proxy = reqwest::Proxy::all(proxy).ok()?;
    Client::builder()
        .proxy(proxy)
        .connect_timeout(Duration::from_secs(30))
        .timeout(Duration::from_secs(60))
        .build()
        .ok()
}

/// Pick the client to issue an upstream request with: a freshly-built
/// proxied client when `family` has a configured pool, otherwise the shared
/// pooled client — `reqwest` can't switch proxies per-request on one client.
pub fn client_for(shared: &Client, config: &Config, family: &str) -> Client {
    match pick_proxy(config.proxies_for(family)).and_then(|p| build_proxied_client(p)) {
        Some(client) => client,
        None => shared.clone(),
    }
}

/// Apply §4.5's header normalisation to an outbound request: forced UA,
/// forwarded Referer/Origin/Authorization/Range (manifests always drop
/// Range), IP-revealing headers always dropped.
pub fn apply_outbound_headers(builder: RequestBuilder, headers: &HashMap<String, String>, is_manifest: bool) -> RequestBuilder {
    let mut builder = builder.header(reqwest::header::USER_AGENT, FORCED_USER_AGENT);
    for (k, v) in headers {
        if is_ip_revealing(k) || k.eq_ignore_ascii_case("user-agent") {
            continue;
        }
        if is_manifest && k.eq_ignore_ascii_case("range") {
            continue;
        }
        builder = builder.header(k.as_str(), v.as_str());
    }
    builder
}

/// Range/If-None-Match/If-Modified-Since off the *inbound* client request to
/// this proxy, forwarded only for media fetches (§4.5).
pub fn inbound_conditional_headers(inbound: &HeaderMap) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for name in ["range", "if-none-match", "if-modified-since"] {
        if let Some(v) = inbound.get(name).and_then(|v| v.to_str().ok()) {
            out.insert(name.to_string(), v.to_string());
        }
    }
    out
}

pub fn content_type_of(resp: &reqwest::Response) -> Option<String> {
    resp.headers().get(reqwest::header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).map(str::to_string)
}

/// Sniff whether a fetched manifest body is HLS, by content type, URL
/// extension, or the document's own `#EXTM3U` header (§4.5).
pub fn looks_like_hls(content_type: Option<&str>, url: &str, body: &str) -> bool {
    if let Some(ct) = content_type {
        if ct.contains("mpegurl") {
            return true;
        }
    }
    url.to_ascii_lowercase().ends_with(".m3u8") || body.trim_start().starts_with("#EXTM3U")
}

/// Sniff whether a fetched manifest body is DASH (§4.5).
pub fn looks_like_dash(content_type: Option<&str>, url: &str, body: &str) -> bool {
    if let Some(ct) = content_type {
        if ct.contains("dash+xml") {
            return true;
        }
    }
    url.to_ascii_lowercase().ends_with(".mpd") || body.trim_start().starts_with("<MPD") || body.contains("<MPD ") || body.contains("<MPD>")
}

pub const HLS_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const DASH_CONTENT_TYPE: &str = "application/dash+xml";

pub fn hls_response(body: String) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HLS_CONTENT_TYPE),
            (header::CONTENT_DISPOSITION, "attachment; filename=stream.m3u8"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        body,
    )
        .into_response()
}

pub fn dash_response(body: String) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, DASH_CONTENT_TYPE),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        body,
    )
        .into_response()
}

/// Relay a segment/media response byte-for-byte: preserves status,
/// `Content-Type`/`Content-Length`/`Content-Range`/`Accept-Ranges`/
/// `Last-Modified`/`ETag`, adds permissive CORS, and corrects a `.ts` URL
/// served with a non-`mpeg2` content type to `video/MP2T` (§4.5).
pub fn passthrough_response(upstream: reqwest::Response, request_url: &str) -> Response {
    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut headers = HeaderMap::new();
    for name in [
        header::CONTENT_TYPE,
        header::CONTENT_LENGTH,
        header::CONTENT_RANGE,
        header::ACCEPT_RANGES,
        header::LAST_MODIFIED,
        header::ETAG,
    ] {
        if let Some(v) = upstream.headers().get(&name) {
            headers.insert(name, v.clone());
        }
    }

    if request_url.to_ascii_lowercase().ends_with(".ts") {
        let needs_fix = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_none_or(|ct| !ct.contains("mpeg2"));
        if needs_fix {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("video/MP2T"));
        }
    }

    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));

    let stream = upstream.bytes_stream();
    (status, headers, Body::from_stream(stream)).into_response()
}
