//! DRM license endpoint (§4.8): `/license`. Either synthesises a W3C
//! ClearKey JWK-set response locally, or forwards the incoming request
//! verbatim to an upstream license server.

use crate::error::{ProxyError, Result};
use crate::server::params;
use crate::server::relay;
use crate::server::state::AppState;
use crate::util::hex_decode;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use serde_json::json;
use std::collections::HashMap;

fn b64url_nopad(bytes: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// `clearkey=<kid>:<key>` — synthesise the JWK-set response (§4.8, mode 1).
fn clearkey_response(combined: &str) -> Result<Response> {
    let (kid_hex, key_hex) = combined.split_once(':').ok_or_else(|| ProxyError::BadRequest("clearkey must be kid:key".into()))?;
    let kid = hex_decode(kid_hex).ok_or_else(|| ProxyError::BadRequest("invalid clearkey kid hex".into()))?;
    let key = hex_decode(key_hex).ok_or_else(|| ProxyError::BadRequest("invalid clearkey key hex".into()))?;

    let body = json!({
        "keys": [{
            "kty": "oct",
            "k": b64url_nopad(&key),
            "kid": b64url_nopad(&kid),
            "type": "temporary",
        }],
        "type": "temporary",
    });

    Ok((StatusCode::OK, [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")], axum::Json(body)).into_response())
}

/// `url=<license_url>` — forward method, body, and `h_*` headers; relay
/// status/body/Content-Type with permissive CORS (§4.8, mode 2).
async fn forward_license(state: &AppState, license_url: &str, method: Method, body: Bytes, query: &HashMap<String, String>) -> Result<Response> {
    let headers = params::headers_from_query(query);
    let family = crate::extractors::registry::detect_from_url(license_url);
    let client = relay::client_for(&state.http_client, &state.config, family);

    let mut builder = client.request(method, license_url);
    builder = relay::apply_outbound_headers(builder, &headers, false);
    if !body.is_empty() {
        builder = builder.body(body);
    }

    let resp = builder.send().await.map_err(ProxyError::OriginFetchError)?;
    let status = StatusCode::from_u16(resp.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = resp
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    let out_body = resp.bytes().await.map_err(ProxyError::OriginFetchError)?;

    let mut response = (status, out_body).into_response();
    response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    response.headers_mut().insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    Ok(response)
}

pub async fn license(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    method: Method,
    _headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    if let Some(combined) = query.get("clearkey") {
        return clearkey_response(combined);
    }

    let license_url = query.get("url").cloned().ok_or_else(|| ProxyError::BadRequest("missing 'url' parameter".into()))?;
    forward_license(&state, &license_url, method, body, &query).await
}
