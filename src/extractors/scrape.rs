//! Small scraping helpers shared by every site recipe: channel-id extraction,
//! attribute/tag regex scans, and the random proxy pick used for §4.5-style
//! upstream proxy selection.

use rand::seq::SliceRandom;
use regex::Regex;
use std::sync::LazyLock;

static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)").unwrap());

/// Extract the stable numeric channel id from a channel URL (§3: "the
/// numeric portion of `stream-<N>.php` or `premium<N>/mono.m3u8`"). Falls
/// back to the whole URL when no digits are present, so every channel still
/// gets a stable (if coarse) cache key.
pub fn channel_id(url: &str) -> String {
    DIGITS
        .find_iter(url)
        .last()
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| url.to_string())
}

/// Pick one proxy uniformly at random from a non-empty pool.
pub fn pick_proxy(proxies: &[String]) -> Option<&String> {
    proxies.choose(&mut rand::thread_rng())
}

/// Find the first capture group of `pattern` in `haystack`.
pub fn find_first(pattern: &Regex, haystack: &str) -> Option<String> {
    pattern.captures(haystack).and_then(|c| c.get(1)).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_id_extracts_trailing_digits() {
        assert_eq!(channel_id("https://daddylive.sx/watch/stream-123.php"), "123");
        assert_eq!(channel_id("https://x.example/premium456/mono.m3u8"), "456");
    }

    #[test]
    fn channel_id_falls_back_to_whole_url() {
        assert_eq!(channel_id("https://x.example/no-digits-here"), "https://x.example/no-digits-here");
    }

    #[test]
    fn pick_proxy_returns_none_for_empty_pool() {
        assert!(pick_proxy(&[]).is_none());
    }

    #[test]
    fn pick_proxy_returns_member_of_pool() {
        let pool = vec!["http://a.example".to_string(), "http://b.example".to_string()];
        let picked = pick_proxy(&pool).unwrap();
        assert!(pool.contains(picked));
    }
}
