//! AES-128 key-fetch endpoint (§4.7): `/key`. Two mutually-exclusive modes —
//! a static hex key returned verbatim, or a proxied fetch of the upstream
//! key URL with cache invalidation on failure.

use crate::error::{ProxyError, Result};
use crate::http_retry::{fetch_with_retry, RetryConfig};
use crate::server::relay;
use crate::server::state::AppState;
use crate::server::{auth as _auth, params};
use crate::util::hex_decode;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;

/// `host` hints recognised for upstream proxy-pool selection (§4.7): the
/// `newkso.ru` key host belongs to the DLHD family in addition to the
/// registry's own URL-sniffing.
fn family_for_key_url(url: &str) -> &'static str {
    if url.contains("newkso.ru") {
        "dlhd"
    } else {
        crate::extractors::registry::detect_from_url(url)
    }
}

pub async fn fetch_key(State(state): State<AppState>, Query(query): Query<HashMap<String, String>>, inbound: HeaderMap) -> Result<Response> {
    if let Some(static_key) = query.get("static_key") {
        let bytes = hex_decode(static_key).ok_or_else(|| ProxyError::BadRequest("invalid static_key hex".into()))?;
        return Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response());
    }

    let key_url = query.get("key_url").cloned().ok_or_else(|| ProxyError::BadRequest("missing 'key_url' parameter".into()))?;
    let headers = params::headers_from_query(&query);

    let family = family_for_key_url(&key_url);
    let client = relay::client_for(&state.http_client, &state.config, family);
    // Range is never meaningful on a single AES key — always stripped.
    let _ = inbound;

    match fetch_with_retry(&client, &key_url, &headers, &RetryConfig::default()).await {
        Ok(resp) => {
            let out_status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            let body = resp.bytes().await.map_err(ProxyError::OriginFetchError)?;
            Ok((out_status, body).into_response())
        }
        Err(e) => {
            if let Some(channel_url) = query.get("original_channel_url") {
                let generic_headers = HashMap::new();
                let extractor = state.registry.resolve(channel_url, None, &generic_headers);
                extractor.invalidate_cache_for_url(channel_url).await;
            }
            Err(ProxyError::OriginFetchError(e))
        }
    }
}
