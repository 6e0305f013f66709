//! Shared helpers: URL encoding, header-query (de)serialization, and the
//! client-IP-revealing header blocklist used by every component that forwards
//! client headers upstream or embeds upstream headers in a proxied URL.

use std::collections::HashMap;
use url::Url;

/// Headers that could reveal the player's real IP to the upstream origin.
/// Dropped everywhere client headers are forwarded (§4.1, §4.5, Invariant 6).
pub const IP_REVEALING_HEADERS: &[&str] =
    &["x-forwarded-for", "x-real-ip", "forwarded", "via"];

pub fn is_ip_revealing(header_name: &str) -> bool {
    IP_REVEALING_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(header_name))
}

/// Modern desktop Chrome UA forced onto every upstream relay fetch (§4.5),
/// regardless of what the player sent.
pub const FORCED_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Percent-encode a string for safe embedding as a single query value.
pub fn urlenc(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Resolve `maybe_relative` against `base`, returning it unchanged if it is
/// already absolute or fails to parse as relative.
pub fn abs_url(base: &str, maybe_relative: &str) -> String {
    if maybe_relative.starts_with("http://") || maybe_relative.starts_with("https://") {
        return maybe_relative.to_string();
    }
    match Url::parse(base).and_then(|b| b.join(maybe_relative)) {
        Ok(joined) => joined.to_string(),
        Err(_) => maybe_relative.to_string(),
    }
}

/// Serialize a header map into repeated `&h_<name>=<value>` query fragments.
pub fn encode_header_params(headers: &HashMap<String, String>) -> String {
    let mut out = String::new();
    for (k, v) in headers {
        out.push_str(&format!("&h_{}={}", urlenc(k), urlenc(v)));
    }
    out
}

/// Serialize headers plus an optional API password into one query suffix,
/// shared by every rewriter that builds proxy URLs (HLS, DASH, DASH→HLS).
pub fn header_and_password_suffix(headers: &HashMap<String, String>, api_password: Option<&str>) -> String {
    let mut suffix = encode_header_params(headers);
    if let Some(pw) = api_password {
        suffix.push_str(&format!("&api_password={}", urlenc(pw)));
    }
    suffix
}

/// Parse `h_<name>` query params back into a header map, turning `_` into `-`
/// in the header name (per §6: "`_`→`-` only on the key endpoint" is the
/// narrowest wording, but every proxied-header consumer in this crate uses
/// the same underscore convention for names that are otherwise valid query
/// keys, e.g. `h_x-custom` is passed as `h_x-custom` directly since `-` is a
/// legal query-key character; only literal underscores that stand in for a
/// hyphen in the header name are translated).
pub fn decode_header_params(query: &HashMap<String, String>) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    for (k, v) in query {
        if let Some(name) = k.strip_prefix("h_") {
            headers.insert(name.replace('_', "-"), v.clone());
        }
    }
    headers
}

/// Whether a path looks like a manifest reference rather than a media segment.
pub fn looks_like_manifest_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".m3u8")
        || lower.ends_with(".php")
        || lower.ends_with(".mpd")
        || lower.ends_with(".isml/manifest")
        || lower.contains("playlist")
}

/// Derive the proxy segment extension to preserve from a source path, per §4.3.
pub fn segment_extension(path: &str) -> &'static str {
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".mp4") || lower.ends_with(".m4s") || lower.ends_with(".isml") {
        ".mp4"
    } else if lower.ends_with(".aac") {
        ".aac"
    } else if lower.ends_with(".m4a") {
        ".m4a"
    } else {
        ".ts"
    }
}

/// `newkso.ru`-hosted `.css` is HLS, never a key (Open Question (d)).
pub fn is_newkso_css_manifest(url: &str) -> bool {
    url.contains("newkso.ru") && url.to_ascii_lowercase().ends_with(".css")
}

/// Decode an even-length hex string into raw bytes (static key / ClearKey
/// `kid`/`key` parameters, §4.7, §4.8). Returns `None` on malformed input.
pub fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlenc_escapes_reserved_chars() {
        assert_eq!(urlenc("https://a.example/b?c=d"), "https%3A%2F%2Fa.example%2Fb%3Fc%3Dd");
    }

    #[test]
    fn abs_url_resolves_relative_paths() {
        assert_eq!(
            abs_url("https://o.example/a/b.m3u8", "key.bin"),
            "https://o.example/a/key.bin"
        );
    }

    #[test]
    fn abs_url_leaves_absolute_urls_untouched() {
        assert_eq!(
            abs_url("https://o.example/a/b.m3u8", "https://other.example/k.bin"),
            "https://other.example/k.bin"
        );
    }

    #[test]
    fn header_params_roundtrip() {
        let mut headers = HashMap::new();
        headers.insert("x-channel-key".to_string(), "abc".to_string());
        let encoded = encode_header_params(&headers);
        assert!(encoded.contains("h_x-channel-key=abc"));
    }

    #[test]
    fn decode_header_params_translates_underscore_to_hyphen() {
        let mut query = HashMap::new();
        query.insert("h_x_channel_key".to_string(), "abc".to_string());
        let headers = decode_header_params(&query);
        assert_eq!(headers.get("x-channel-key"), Some(&"abc".to_string()));
    }

    #[test]
    fn ip_revealing_headers_are_detected_case_insensitively() {
        assert!(is_ip_revealing("X-Forwarded-For"));
        assert!(is_ip_revealing("via"));
        assert!(!is_ip_revealing("authorization"));
    }

    #[test]
    fn manifest_path_detection() {
        assert!(looks_like_manifest_path("/a/b.m3u8"));
        assert!(looks_like_manifest_path("/stream-1.php"));
        assert!(looks_like_manifest_path("/live/playlist"));
        assert!(!looks_like_manifest_path("/seg1.ts"));
    }

    #[test]
    fn segment_extension_mapping() {
        assert_eq!(segment_extension("/a/init.mp4"), ".mp4");
        assert_eq!(segment_extension("/a/seg.m4s"), ".mp4");
        assert_eq!(segment_extension("/a/audio.aac"), ".aac");
        assert_eq!(segment_extension("/a/audio.m4a"), ".m4a");
        assert_eq!(segment_extension("/a/seg1.ts"), ".ts");
        assert_eq!(segment_extension("/a/seg1"), ".ts");
    }

    #[test]
    fn newkso_css_detected_as_manifest() {
        assert!(is_newkso_css_manifest("https://windnew.newkso.ru/wind/abc/mono.css"));
        assert!(!is_newkso_css_manifest("https://other.example/mono.css"));
    }
}
