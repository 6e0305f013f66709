//! Query-parameter helpers shared by every handler (§6 "Common query
//! parameters"): target-URL extraction (plain or Base64), header
//! propagation, and ClearKey parsing.

use crate::error::{ProxyError, Result};
use crate::util::decode_header_params;
use base64::Engine;
use std::collections::HashMap;

/// `d` or `url` — the target URL (§6). Returns [`ProxyError::BadRequest`]
/// when neither is present.
pub fn target_url(query: &HashMap<String, String>) -> Result<String> {
    query
        .get("d")
        .or_else(|| query.get("url"))
        .cloned()
        .ok_or_else(|| ProxyError::BadRequest("missing 'd' or 'url' parameter".into()))
}

/// Same as [`target_url`], but also accepts a Base64-encoded value — used
/// only by `/extractor` (§6).
pub fn target_url_maybe_base64(query: &HashMap<String, String>) -> Result<String> {
    let raw = target_url(query)?;
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Ok(raw);
    }
    match base64::engine::general_purpose::STANDARD.decode(&raw) {
        Ok(bytes) => String::from_utf8(bytes).map_err(|_| ProxyError::BadRequest("invalid base64 url".into())),
        Err(_) => Ok(raw),
    }
}

/// `h_<name>=<value>` pairs, turned into a plain header map.
pub fn headers_from_query(query: &HashMap<String, String>) -> HashMap<String, String> {
    decode_header_params(query)
}

/// `api_password` query parameter, if present.
pub fn api_password_param(query: &HashMap<String, String>) -> Option<String> {
    query.get("api_password").cloned()
}

/// A `kid_hex, key_hex` pair, resolved from either `clearkey=<kid>:<key>` or
/// the separate `key_id` + `key` parameters (§6, §4.8).
pub fn clearkey_from_query(query: &HashMap<String, String>) -> Option<(String, String)> {
    if let Some(combined) = query.get("clearkey") {
        let (kid, key) = combined.split_once(':')?;
        return Some((kid.to_string(), key.to_string()));
    }
    let kid = query.get("key_id")?;
    let key = query.get("key")?;
    Some((kid.clone(), key.clone()))
}

/// A `true`/`false`-valued query parameter, defaulting when absent or unparseable.
pub fn bool_param(query: &HashMap<String, String>, name: &str, default: bool) -> bool {
    query
        .get(name)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}
