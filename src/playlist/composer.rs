//! Line-oriented M3U merge (§4.9). Fetching is the caller's job — this
//! module takes already-downloaded bodies so the merge logic itself stays a
//! pure function, testable without a network.

use crate::util::{header_and_password_suffix, urlenc};
use std::collections::HashMap;

/// One playlist definition out of the semicolon-separated input list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistDefinition {
    pub url: String,
    pub sort: bool,
    pub noproxy: bool,
}

fn parse_bool(s: &str) -> bool {
    s.trim().eq_ignore_ascii_case("true")
}

fn parse_definition(raw: &str) -> PlaylistDefinition {
    let raw = raw.trim();
    if let Some((url_part, opts_part)) = raw.split_once('|') {
        let mut def = PlaylistDefinition { url: url_part.trim().to_string(), sort: false, noproxy: false };
        for kv in opts_part.split('|') {
            let Some((k, v)) = kv.split_once('=') else { continue };
            match k.trim().to_ascii_lowercase().as_str() {
                "sort" => def.sort = parse_bool(v),
                "noproxy" => def.noproxy = parse_bool(v),
                _ => {}
            }
        }
        def
    } else if let Some((_, url)) = raw.split_once('&') {
        // Legacy `opaque&url` form: no options, the part before `&` is discarded.
        PlaylistDefinition { url: url.trim().to_string(), sort: false, noproxy: false }
    } else {
        PlaylistDefinition { url: raw.to_string(), sort: false, noproxy: false }
    }
}

/// Parse the semicolon-separated definition list.
pub fn parse_definitions(input: &str) -> Vec<PlaylistDefinition> {
    input.split(';').map(str::trim).filter(|s| !s.is_empty()).map(parse_definition).collect()
}

/// A definition paired with its downloaded body, or `None` if the fetch failed.
pub struct PlaylistInput {
    pub definition: PlaylistDefinition,
    pub body: Option<String>,
}

pub struct ComposeContext<'a> {
    pub proxy_base: &'a str,
    pub api_password: Option<&'a str>,
}

struct Item {
    header_lines: Vec<String>,
    url_line: String,
    sort_key: String,
}

fn is_plutotv(url: &str) -> bool {
    url.to_ascii_lowercase().contains("pluto.tv")
}

/// `#EXTVLCOPT:http-header=Name: Value` or `#EXTVLCOPT:http-<name>=value`.
fn parse_extvlcopt(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("#EXTVLCOPT:")?;
    let (key, value) = rest.split_once('=')?;
    if key.eq_ignore_ascii_case("http-header") {
        let (name, val) = value.split_once(':')?;
        Some((name.trim().to_string(), val.trim().to_string()))
    } else {
        key.strip_prefix("http-").map(|name| (name.trim().to_string(), value.trim().to_string()))
    }
}

/// `#EXTHTTP:{"Referrer":"https://x", ...}` — overwrites, doesn't merge with,
/// any VLC-origin headers captured so far for the current item.
fn parse_exthttp(line: &str) -> Option<HashMap<String, String>> {
    let json_str = line.strip_prefix("#EXTHTTP:")?.trim();
    let value: serde_json::Value = serde_json::from_str(json_str).ok()?;
    let obj = value.as_object()?;
    Some(obj.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
}

fn extract_channel_name(header_lines: &[String]) -> String {
    header_lines
        .iter()
        .find(|l| l.starts_with("#EXTINF"))
        .and_then(|l| l.rsplit_once(','))
        .map(|(_, name)| name.trim().to_string())
        .unwrap_or_default()
}

fn rewrite_url(url: &str, clearkey: Option<&str>, headers: &HashMap<String, String>, noproxy: bool, ctx: &ComposeContext) -> String {
    if noproxy || is_plutotv(url) {
        return url.to_string();
    }
    let mut out = format!("{}/proxy/manifest.m3u8?url={}", ctx.proxy_base, urlenc(url));
    if let Some(ck) = clearkey {
        out.push_str(&format!("&clearkey={}", urlenc(ck)));
    }
    out.push_str(&header_and_password_suffix(headers, ctx.api_password));
    out
}

fn process_playlist(body: &str, definition: &PlaylistDefinition, ctx: &ComposeContext, header_captured: &mut bool, header_out: &mut Option<String>) -> Vec<Item> {
    let mut items = Vec::new();
    let mut header_lines: Vec<String> = Vec::new();
    let mut clearkey: Option<String> = None;
    let mut headers: HashMap<String, String> = HashMap::new();

    for raw in body.lines() {
        let line = raw.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix('#') {
            let tag = format!("#{rest}");

            if tag.starts_with("#EXTM3U") {
                if !*header_captured {
                    *header_out = Some(tag);
                    *header_captured = true;
                }
                continue;
            }
            if tag.starts_with("#EXT-X-VERSION") {
                continue;
            }
            if let Some(value) = tag.strip_prefix("#KODIPROP:inputstream.adaptive.license_key=") {
                if value != "0000" {
                    clearkey = Some(value.to_string());
                }
                continue; // stripped from output unconditionally
            }
            if let Some((name, value)) = parse_extvlcopt(&tag) {
                headers.insert(name, value);
                header_lines.push(tag);
                continue;
            }
            if let Some(map) = parse_exthttp(&tag) {
                headers = map;
                header_lines.push(tag);
                continue;
            }
            header_lines.push(tag);
        } else {
            let sort_key = extract_channel_name(&header_lines);
            let url_line = rewrite_url(line, clearkey.as_deref(), &headers, definition.noproxy, ctx);
            items.push(Item { header_lines: std::mem::take(&mut header_lines), url_line, sort_key });
            clearkey = None;
            headers.clear();
        }
    }

    items
}

fn write_item(out: &mut String, item: &Item) {
    for line in &item.header_lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&item.url_line);
    out.push('\n');
}

fn flush_sorted(buffer: &mut Vec<Item>, out: &mut String) {
    buffer.sort_by(|a, b| a.sort_key.to_ascii_lowercase().cmp(&b.sort_key.to_ascii_lowercase()));
    for item in buffer.drain(..) {
        write_item(out, &item);
    }
}

/// Merge every successfully-downloaded input into one playlist body.
pub fn compose(inputs: &[PlaylistInput], ctx: &ComposeContext) -> String {
    let mut out = String::new();
    let mut header_captured = false;
    let mut header_out: Option<String> = None;
    let mut sort_buffer: Vec<Item> = Vec::new();
    let mut in_sort_run = false;

    for input in inputs {
        let Some(body) = &input.body else { continue };
        let items = process_playlist(body, &input.definition, ctx, &mut header_captured, &mut header_out);

        if input.definition.sort {
            sort_buffer.extend(items);
            in_sort_run = true;
        } else {
            if in_sort_run {
                flush_sorted(&mut sort_buffer, &mut out);
                in_sort_run = false;
            }
            for item in &items {
                write_item(&mut out, item);
            }
        }
    }
    if in_sort_run {
        flush_sorted(&mut sort_buffer, &mut out);
    }

    format!("{}\n{out}", header_out.unwrap_or_else(|| "#EXTM3U".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pipe_options() {
        let defs = parse_definitions("https://a.example/p1.m3u8|sort=true|noproxy=false");
        assert_eq!(defs.len(), 1);
        assert!(defs[0].sort);
        assert!(!defs[0].noproxy);
        assert_eq!(defs[0].url, "https://a.example/p1.m3u8");
    }

    #[test]
    fn parses_legacy_opaque_and_url_form() {
        let defs = parse_definitions("mylist&https://a.example/p1.m3u8");
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].url, "https://a.example/p1.m3u8");
        assert!(!defs[0].sort && !defs[0].noproxy);
    }

    #[test]
    fn parses_multiple_definitions() {
        let defs = parse_definitions("https://a.example/p1.m3u8 ; https://b.example/p2.m3u8|sort=true");
        assert_eq!(defs.len(), 2);
        assert!(!defs[0].sort);
        assert!(defs[1].sort);
    }

    #[test]
    fn kodiprop_is_stripped_and_captured_as_clearkey() {
        let body = "#EXTM3U\n#EXTINF:-1,Channel A\n#KODIPROP:inputstream.adaptive.license_key=aabb:ccdd\nhttps://o.example/a.m3u8\n";
        let ctx = ComposeContext { proxy_base: "https://p.example", api_password: None };
        let inputs = [PlaylistInput { definition: PlaylistDefinition { url: "x".into(), sort: false, noproxy: false }, body: Some(body.to_string()) }];
        let out = compose(&inputs, &ctx);
        assert!(!out.contains("KODIPROP"));
        assert!(out.contains("clearkey=aabb%3Accdd"));
    }

    #[test]
    fn kodiprop_placeholder_0000_is_ignored() {
        let body = "#EXTM3U\n#EXTINF:-1,Channel A\n#KODIPROP:inputstream.adaptive.license_key=0000\nhttps://o.example/a.m3u8\n";
        let ctx = ComposeContext { proxy_base: "https://p.example", api_password: None };
        let inputs = [PlaylistInput { definition: PlaylistDefinition { url: "x".into(), sort: false, noproxy: false }, body: Some(body.to_string()) }];
        let out = compose(&inputs, &ctx);
        assert!(!out.contains("clearkey="));
    }

    #[test]
    fn extvlcopt_header_is_captured_and_kept_in_output() {
        let body = "#EXTM3U\n#EXTINF:-1,Channel A\n#EXTVLCOPT:http-header=Referer: https://r.example\nhttps://o.example/a.m3u8\n";
        let ctx = ComposeContext { proxy_base: "https://p.example", api_password: None };
        let inputs = [PlaylistInput { definition: PlaylistDefinition { url: "x".into(), sort: false, noproxy: false }, body: Some(body.to_string()) }];
        let out = compose(&inputs, &ctx);
        assert!(out.contains("#EXTVLCOPT:http-header=Referer: https://r.example"));
        assert!(out.contains("h_Referer=https%3A%2F%2Fr.example") || out.contains("h_referer=https%3A%2F%2Fr.example"));
    }

    #[test]
    fn noproxy_passes_url_through_unchanged() {
        let body = "#EXTM3U\n#EXTINF:-1,Channel A\nhttps://o.example/a.m3u8\n";
        let ctx = ComposeContext { proxy_base: "https://p.example", api_password: None };
        let inputs = [PlaylistInput { definition: PlaylistDefinition { url: "x".into(), sort: false, noproxy: true }, body: Some(body.to_string()) }];
        let out = compose(&inputs, &ctx);
        assert!(out.contains("https://o.example/a.m3u8"));
        assert!(!out.contains("/proxy/manifest.m3u8"));
    }

    #[test]
    fn plutotv_passes_through_even_without_noproxy() {
        let body = "#EXTM3U\n#EXTINF:-1,Channel A\nhttps://service.pluto.tv/stitch/a.m3u8\n";
        let ctx = ComposeContext { proxy_base: "https://p.example", api_password: None };
        let inputs = [PlaylistInput { definition: PlaylistDefinition { url: "x".into(), sort: false, noproxy: false }, body: Some(body.to_string()) }];
        let out = compose(&inputs, &ctx);
        assert!(out.contains("https://service.pluto.tv/stitch/a.m3u8"));
        assert!(!out.contains("/proxy/manifest.m3u8"));
    }

    #[test]
    fn e6_sort_merges_adjacent_sorted_playlists_case_insensitively() {
        let a = "#EXTM3U\n#EXTINF:-1,Gamma\nhttps://o.example/gamma.m3u8\n#EXTINF:-1,alpha\nhttps://o.example/alpha.m3u8\n";
        let b = "#EXTM3U\n#EXTINF:-1,Beta\nhttps://o.example/beta.m3u8\n";
        let ctx = ComposeContext { proxy_base: "https://p.example", api_password: None };
        let inputs = [
            PlaylistInput { definition: PlaylistDefinition { url: "a".into(), sort: true, noproxy: false }, body: Some(a.to_string()) },
            PlaylistInput { definition: PlaylistDefinition { url: "b".into(), sort: true, noproxy: false }, body: Some(b.to_string()) },
        ];
        let out = compose(&inputs, &ctx);
        let alpha_pos = out.find("alpha").unwrap();
        let beta_pos = out.find("Beta").unwrap();
        let gamma_pos = out.find("Gamma").unwrap();
        assert!(alpha_pos < beta_pos && beta_pos < gamma_pos);
        assert_eq!(out.lines().next().unwrap(), "#EXTM3U");
    }

    #[test]
    fn non_sort_playlist_flushes_pending_sort_buffer_first() {
        let sorted = "#EXTM3U\n#EXTINF:-1,Zed\nhttps://o.example/zed.m3u8\n";
        let plain = "#EXTM3U\n#EXTINF:-1,Plain\nhttps://o.example/plain.m3u8\n";
        let ctx = ComposeContext { proxy_base: "https://p.example", api_password: None };
        let inputs = [
            PlaylistInput { definition: PlaylistDefinition { url: "a".into(), sort: true, noproxy: false }, body: Some(sorted.to_string()) },
            PlaylistInput { definition: PlaylistDefinition { url: "b".into(), sort: false, noproxy: false }, body: Some(plain.to_string()) },
        ];
        let out = compose(&inputs, &ctx);
        assert!(out.find("Zed").unwrap() < out.find("Plain").unwrap());
    }

    #[test]
    fn failed_fetch_is_skipped() {
        let ctx = ComposeContext { proxy_base: "https://p.example", api_password: None };
        let inputs = [PlaylistInput { definition: PlaylistDefinition { url: "a".into(), sort: false, noproxy: false }, body: None }];
        let out = compose(&inputs, &ctx);
        assert_eq!(out.trim(), "#EXTM3U");
    }
}
