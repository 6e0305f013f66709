//! Raw-line HLS rewriter (§4.3).
//!
//! Unlike a typed-struct parser/serializer, a raw-line scanner never drops a
//! tag it doesn't model — every line not explicitly rewritten below passes
//! through byte-for-byte. This is the same reason the teacher's own LL-HLS
//! module falls back to raw-line capture around its typed parser: a
//! round-trip through a typed model silently loses unrecognised tags.

use crate::util::{
    abs_url, header_and_password_suffix, looks_like_manifest_path, segment_extension, urlenc,
};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static URI_ATTR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"URI="([^"]*)""#).unwrap());
static BANDWIDTH_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"BANDWIDTH=(\d+)").unwrap());

pub struct RewriteContext<'a> {
    /// Absolute URL the document was fetched from, for resolving relative URIs.
    pub document_url: &'a str,
    /// This proxy's own externally-visible base URL.
    pub proxy_base: &'a str,
    /// Upstream headers to repeat as `h_<k>=<v>` on every rewritten URL.
    pub upstream_headers: &'a HashMap<String, String>,
    /// Originating channel URL, for key-fetch cache attribution.
    pub channel_url: &'a str,
    pub api_password: Option<&'a str>,
    /// Explicit flag resolving Open Question (a): whether the upstream
    /// originator is VixSrc, triggering the quality-filter short-circuit.
    pub is_vixsrc: bool,
}

fn extract_uri(line: &str) -> Option<&str> {
    URI_ATTR.captures(line).map(|c| c.get(1).unwrap().as_str())
}

fn extract_bandwidth(line: &str) -> u64 {
    BANDWIDTH_ATTR
        .captures(line)
        .and_then(|c| c.get(1).unwrap().as_str().parse().ok())
        .unwrap_or(0)
}

fn replace_uri_attr(line: &str, new_uri: &str) -> String {
    URI_ATTR
        .replace(line, |_: &regex::Captures| format!(r#"URI="{new_uri}""#))
        .into_owned()
}

fn suffix(ctx: &RewriteContext) -> String {
    header_and_password_suffix(ctx.upstream_headers, ctx.api_password)
}

fn rewrite_key_line(line: &str, ctx: &RewriteContext) -> String {
    let Some(uri) = extract_uri(line) else {
        return line.to_string();
    };
    let abs = abs_url(ctx.document_url, uri);
    let mut new_uri = format!(
        "{}/key?key_url={}&original_channel_url={}",
        ctx.proxy_base,
        urlenc(&abs),
        urlenc(ctx.channel_url)
    );
    new_uri.push_str(&suffix(ctx));
    replace_uri_attr(line, &new_uri)
}

fn rewrite_map_line(line: &str, ctx: &RewriteContext) -> String {
    let Some(uri) = extract_uri(line) else {
        return line.to_string();
    };
    let abs = abs_url(ctx.document_url, uri);
    let mut new_uri = format!(
        "{}/proxy/hls/segment.mp4?d={}",
        ctx.proxy_base,
        urlenc(&abs)
    );
    new_uri.push_str(&suffix(ctx));
    replace_uri_attr(line, &new_uri)
}

fn rewrite_media_line(line: &str, ctx: &RewriteContext) -> String {
    let Some(uri) = extract_uri(line) else {
        return line.to_string();
    };
    let abs = abs_url(ctx.document_url, uri);
    let mut new_uri = format!(
        "{}/proxy/hls/manifest.m3u8?d={}",
        ctx.proxy_base,
        urlenc(&abs)
    );
    new_uri.push_str(&suffix(ctx));
    replace_uri_attr(line, &new_uri)
}

fn rewrite_url_line(line: &str, ctx: &RewriteContext) -> String {
    let abs = abs_url(ctx.document_url, line);
    let mut out = if looks_like_manifest_path(line) {
        format!(
            "{}/proxy/hls/manifest.m3u8?d={}",
            ctx.proxy_base,
            urlenc(&abs)
        )
    } else {
        format!(
            "{}/proxy/hls/segment{}?d={}",
            ctx.proxy_base,
            segment_extension(line),
            urlenc(&abs)
        )
    };
    out.push_str(&suffix(ctx));
    out
}

/// Rewrite every URI reference in an HLS document per §4.3, including the
/// VixSrc quality-filter short-circuit when `ctx.is_vixsrc` is set.
pub fn rewrite_hls(body: &str, ctx: &RewriteContext) -> String {
    // (text, Some(variant_group)) — variant_group is set on both the
    // `#EXT-X-STREAM-INF:` tag line and its following URL line, so the
    // VixSrc filter can drop a whole losing variant in one pass.
    let mut lines_out: Vec<(String, Option<usize>)> = Vec::new();
    let mut group_bandwidths: Vec<u64> = Vec::new();
    let mut pending_group: Option<usize> = None;

    for raw in body.lines() {
        let line = raw.trim_end_matches('\r');

        if line.is_empty() {
            lines_out.push((String::new(), None));
            pending_group = None;
            continue;
        }

        if line.starts_with("#EXT-X-KEY:") {
            lines_out.push((rewrite_key_line(line, ctx), None));
            pending_group = None;
        } else if line.starts_with("#EXT-X-MAP:") {
            lines_out.push((rewrite_map_line(line, ctx), None));
            pending_group = None;
        } else if line.starts_with("#EXT-X-MEDIA:") || line.starts_with("#EXT-X-I-FRAME-STREAM-INF:")
        {
            lines_out.push((rewrite_media_line(line, ctx), None));
            pending_group = None;
        } else if line.starts_with("#EXT-X-STREAM-INF:") {
            let group = group_bandwidths.len();
            group_bandwidths.push(extract_bandwidth(line));
            lines_out.push((line.to_string(), Some(group)));
            pending_group = Some(group);
        } else if let Some(stripped) = line.strip_prefix('#') {
            let _ = stripped;
            lines_out.push((line.to_string(), None));
            pending_group = None;
        } else {
            let group = pending_group.take();
            lines_out.push((rewrite_url_line(line, ctx), group));
        }
    }

    let winning_group = if ctx.is_vixsrc && !group_bandwidths.is_empty() {
        group_bandwidths
            .iter()
            .enumerate()
            .max_by_key(|(_, &bw)| bw)
            .map(|(idx, _)| idx)
    } else {
        None
    };

    let mut out_lines: Vec<String> = Vec::with_capacity(lines_out.len());
    for (text, group) in lines_out {
        if ctx.is_vixsrc {
            if let Some(g) = group {
                if Some(g) != winning_group {
                    continue;
                }
            }
        }
        out_lines.push(text);
    }

    let mut result = out_lines.join("\n");
    result.push('\n');
    result
}
