//! Server-side ClearKey decrypt endpoint (§4.6): `/decrypt/segment.mp4`.
//! Fetches the init segment (cached by URL) and the media segment, then
//! fuses them into one playable MP4 under CENC ClearKey decryption.

use crate::decrypt::{decrypt_segment, parse_hex16};
use crate::error::{ProxyError, Result};
use crate::server::relay;
use crate::server::state::AppState;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use std::collections::HashMap;

async fn fetch_bytes(state: &AppState, url: &str, family: &str) -> Result<Bytes> {
    let client = relay::client_for(&state.http_client, &state.config, family);
    let resp = client.get(url).send().await.map_err(ProxyError::OriginFetchError)?;
    resp.bytes().await.map_err(ProxyError::OriginFetchError)
}

pub async fn decrypt(State(state): State<AppState>, Query(query): Query<HashMap<String, String>>) -> Result<Response> {
    let url = query.get("url").cloned().ok_or_else(|| ProxyError::BadRequest("missing 'url' parameter".into()))?;
    let init_url = query.get("init_url").cloned().ok_or_else(|| ProxyError::BadRequest("missing 'init_url' parameter".into()))?;
    let key_hex = query.get("key").cloned().ok_or_else(|| ProxyError::BadRequest("missing 'key' parameter".into()))?;
    let _key_id_hex = query.get("key_id").cloned().ok_or_else(|| ProxyError::BadRequest("missing 'key_id' parameter".into()))?;

    let key = parse_hex16(&key_hex)?;
    let family = crate::extractors::registry::detect_from_url(&url);

    let init = match state.init_segment_cache.get(&init_url) {
        Some(cached) => cached,
        None => {
            let fetched = fetch_bytes(&state, &init_url, family).await?;
            state.init_segment_cache.insert(init_url.clone(), fetched.clone());
            fetched
        }
    };
    let media = fetch_bytes(&state, &url, family).await?;

    let mp4 = decrypt_segment(&init, &media, &key)?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "video/mp4")],
        mp4,
    )
        .into_response())
}
