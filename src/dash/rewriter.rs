//! MPD-in / MPD-out rewriter (§4.4).
//!
//! Operates on the raw `quick-xml` token stream rather than a typed DOM:
//! inserting a `ContentProtection` element at an arbitrary position under an
//! arbitrary-namespace `AdaptationSet`, while leaving every other sibling
//! untouched, doesn't fit a struct-shaped model cleanly. Mirrors the
//! `xml.etree.ElementTree` tag-walk the original Python implementation uses
//! for the same rewrite.

use crate::error::{ProxyError, Result};
use crate::util::{abs_url, header_and_password_suffix, urlenc};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashMap;
use std::io::Cursor;

const CLEARKEY_SCHEME_URN: &str = "urn:uuid:e2719d58-a985-b3c9-781a-007147f192ec";
const CLEARKEY_NS: &str = "http://dashif.org/guidelines/clearKey";
const CENC_NS: &str = "urn:mpeg:cenc:2013";

pub struct ClearKeyInjection<'a> {
    pub kid_hex: &'a str,
    pub key_hex: &'a str,
}

pub struct MpdRewriteContext<'a> {
    pub document_url: &'a str,
    pub proxy_base: &'a str,
    pub upstream_headers: &'a HashMap<String, String>,
    pub api_password: Option<&'a str>,
    pub clearkey: Option<ClearKeyInjection<'a>>,
}

fn suffix(ctx: &MpdRewriteContext) -> String {
    header_and_password_suffix(ctx.upstream_headers, ctx.api_password)
}

fn rewrite_manifest_url(ctx: &MpdRewriteContext, value: &str) -> String {
    let abs = abs_url(ctx.document_url, value);
    format!(
        "{}/proxy/mpd/manifest.m3u8?d={}{}",
        ctx.proxy_base,
        urlenc(&abs),
        suffix(ctx)
    )
}

fn rewrite_license_url(ctx: &MpdRewriteContext, value: &str) -> String {
    let abs = abs_url(ctx.document_url, value);
    format!("{}/license?url={}{}", ctx.proxy_base, urlenc(&abs), suffix(ctx))
}

/// 32 hex chars -> dashed GUID form, e.g. the `cenc:default_KID` attribute shape.
fn dashed_guid(kid_hex: &str) -> String {
    if kid_hex.len() != 32 || !kid_hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return kid_hex.to_string();
    }
    format!(
        "{}-{}-{}-{}-{}",
        &kid_hex[0..8],
        &kid_hex[8..12],
        &kid_hex[12..16],
        &kid_hex[16..20],
        &kid_hex[20..32]
    )
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn content_protection_scheme(e: &BytesStart) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| ProxyError::PlaylistModifyError(e.to_string()))?;
        if attr.key.as_ref() == b"schemeIdUri" {
            let value = attr
                .unescape_value()
                .map_err(|e| ProxyError::PlaylistModifyError(e.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn rewrite_attrs(e: &BytesStart, ctx: &MpdRewriteContext, rewrite: &[&str]) -> Result<BytesStart<'static>> {
    let name = local_name(e);
    let mut out = BytesStart::new(name);
    for attr in e.attributes() {
        let attr = attr.map_err(|e| ProxyError::PlaylistModifyError(e.to_string()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| ProxyError::PlaylistModifyError(e.to_string()))?
            .into_owned();
        if rewrite.contains(&key.as_str()) {
            out.push_attribute((key.as_str(), rewrite_manifest_url(ctx, &value).as_str()));
        } else {
            out.push_attribute((key.as_str(), value.as_str()));
        }
    }
    Ok(out)
}

fn write_clearkey_content_protection<W: std::io::Write>(
    writer: &mut Writer<W>,
    ctx: &MpdRewriteContext,
    ck: &ClearKeyInjection,
) -> Result<()> {
    let mut cp = BytesStart::new("ContentProtection");
    cp.push_attribute(("schemeIdUri", CLEARKEY_SCHEME_URN));
    cp.push_attribute(("value", "ClearKey1.0"));
    cp.push_attribute(("cenc:default_KID", dashed_guid(ck.kid_hex).as_str()));
    cp.push_attribute(("xmlns:cenc", CENC_NS));
    cp.push_attribute(("xmlns:clearkey", CLEARKEY_NS));

    let map = |e: quick_xml::Error| ProxyError::PlaylistModifyError(e.to_string());

    writer.write_event(Event::Start(cp)).map_err(map)?;

    let license_url = format!(
        "{}/license?clearkey={}:{}{}",
        ctx.proxy_base,
        ck.kid_hex,
        ck.key_hex,
        suffix(ctx)
    );

    for tag in ["Laurl", "clearkey:Laurl"] {
        writer.write_event(Event::Start(BytesStart::new(tag))).map_err(map)?;
        writer
            .write_event(Event::Text(BytesText::new(&license_url)))
            .map_err(map)?;
        writer.write_event(Event::End(BytesEnd::new(tag))).map_err(map)?;
    }

    writer
        .write_event(Event::End(BytesEnd::new("ContentProtection")))
        .map_err(map)?;
    Ok(())
}

/// Rewrite every playlist/license reference in an MPD document per §4.4,
/// optionally synthesising a ClearKey `ContentProtection` into every
/// `AdaptationSet` and stripping any pre-existing non-ClearKey one.
pub fn rewrite_mpd(body: &str, ctx: &MpdRewriteContext) -> Result<String> {
    let map = |e: quick_xml::Error| ProxyError::PlaylistModifyError(e.to_string());

    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Cursor::new(Vec::new()));

    // None | Some("BaseURL") | Some("Laurl") — which element's text content
    // to rewrite when the next Text event arrives.
    let mut pending_text: Option<&'static str> = None;
    let mut skip_until_depth: Option<usize> = None;
    let mut depth: usize = 0;

    loop {
        let event = reader.read_event().map_err(map)?;

        match event {
            Event::Eof => {
                writer.write_event(Event::Eof).map_err(map)?;
                break;
            }
            Event::Start(e) => {
                depth += 1;
                if skip_until_depth.is_some() {
                    continue;
                }
                match local_name(&e).as_str() {
                    "BaseURL" => {
                        pending_text = Some("BaseURL");
                        writer.write_event(Event::Start(e.into_owned())).map_err(map)?;
                    }
                    "Laurl" => {
                        pending_text = Some("Laurl");
                        writer.write_event(Event::Start(e.into_owned())).map_err(map)?;
                    }
                    "SegmentTemplate" => {
                        let rewritten = rewrite_attrs(&e, ctx, &["media", "initialization"])?;
                        writer.write_event(Event::Start(rewritten)).map_err(map)?;
                    }
                    "SegmentURL" => {
                        let rewritten = rewrite_attrs(&e, ctx, &["media"])?;
                        writer.write_event(Event::Start(rewritten)).map_err(map)?;
                    }
                    "ContentProtection" => {
                        let scheme = content_protection_scheme(&e)?;
                        let is_clearkey = scheme.as_deref().is_some_and(|s| s.eq_ignore_ascii_case(CLEARKEY_SCHEME_URN));
                        if ctx.clearkey.is_some() && !is_clearkey {
                            skip_until_depth = Some(depth);
                            continue;
                        }
                        writer.write_event(Event::Start(e.into_owned())).map_err(map)?;
                    }
                    "AdaptationSet" => {
                        writer.write_event(Event::Start(e.into_owned())).map_err(map)?;
                        if let Some(ck) = &ctx.clearkey {
                            write_clearkey_content_protection(&mut writer, ctx, ck)?;
                        }
                    }
                    _ => {
                        writer.write_event(Event::Start(e.into_owned())).map_err(map)?;
                    }
                }
            }
            Event::Empty(e) => {
                if skip_until_depth.is_some() {
                    continue;
                }
                match local_name(&e).as_str() {
                    "SegmentTemplate" => {
                        let rewritten = rewrite_attrs(&e, ctx, &["media", "initialization"])?;
                        writer.write_event(Event::Empty(rewritten)).map_err(map)?;
                    }
                    "SegmentURL" => {
                        let rewritten = rewrite_attrs(&e, ctx, &["media"])?;
                        writer.write_event(Event::Empty(rewritten)).map_err(map)?;
                    }
                    "ContentProtection" => {
                        let scheme = content_protection_scheme(&e)?;
                        let is_clearkey = scheme.as_deref().is_some_and(|s| s.eq_ignore_ascii_case(CLEARKEY_SCHEME_URN));
                        if ctx.clearkey.is_some() && !is_clearkey {
                            continue;
                        }
                        writer.write_event(Event::Empty(e.into_owned())).map_err(map)?;
                    }
                    "AdaptationSet" => {
                        let mut start = BytesStart::new("AdaptationSet");
                        for attr in e.attributes() {
                            start.push_attribute(attr.map_err(map)?);
                        }
                        writer.write_event(Event::Start(start)).map_err(map)?;
                        if let Some(ck) = &ctx.clearkey {
                            write_clearkey_content_protection(&mut writer, ctx, ck)?;
                        }
                        writer
                            .write_event(Event::End(BytesEnd::new("AdaptationSet")))
                            .map_err(map)?;
                    }
                    _ => {
                        writer.write_event(Event::Empty(e.into_owned())).map_err(map)?;
                    }
                }
            }
            Event::Text(e) => {
                if skip_until_depth.is_some() {
                    continue;
                }
                match pending_text {
                    Some("BaseURL") => {
                        let text = e.unescape().map_err(map)?.into_owned();
                        let new_url = rewrite_manifest_url(ctx, &text);
                        writer.write_event(Event::Text(BytesText::new(&new_url))).map_err(map)?;
                    }
                    Some("Laurl") => {
                        let text = e.unescape().map_err(map)?.into_owned();
                        let new_url = rewrite_license_url(ctx, &text);
                        writer.write_event(Event::Text(BytesText::new(&new_url))).map_err(map)?;
                    }
                    _ => {
                        writer.write_event(Event::Text(e.into_owned())).map_err(map)?;
                    }
                }
            }
            Event::End(e) => {
                let name = local_name(&e);
                if let Some(skip_depth) = skip_until_depth {
                    if depth == skip_depth {
                        skip_until_depth = None;
                    }
                    depth -= 1;
                    continue;
                }
                if name == "BaseURL" || name == "Laurl" {
                    pending_text = None;
                }
                writer.write_event(Event::End(e.into_owned())).map_err(map)?;
                depth -= 1;
            }
            other => {
                writer.write_event(other).map_err(map)?;
            }
        }
    }

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| ProxyError::PlaylistModifyError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(headers: &'a HashMap<String, String>, clearkey: Option<ClearKeyInjection<'a>>) -> MpdRewriteContext<'a> {
        MpdRewriteContext {
            document_url: "https://o.example/content/manifest.mpd",
            proxy_base: "https://p.example",
            upstream_headers: headers,
            api_password: None,
            clearkey,
        }
    }

    #[test]
    fn rewrites_base_url_and_segment_template() {
        let headers = HashMap::new();
        let body = r#"<MPD><BaseURL>video/</BaseURL><Period><AdaptationSet><SegmentTemplate media="seg-$Number$.m4s" initialization="init.mp4"/></AdaptationSet></Period></MPD>"#;
        let out = rewrite_mpd(body, &ctx(&headers, None)).unwrap();
        assert!(out.contains("https://p.example/proxy/mpd/manifest.m3u8?d=https%3A%2F%2Fo.example%2Fcontent%2Fvideo%2F"));
        assert!(out.contains("media=\"https://p.example/proxy/mpd/manifest.m3u8?d="));
        assert!(out.contains("initialization=\"https://p.example/proxy/mpd/manifest.m3u8?d="));
    }

    #[test]
    fn rewrites_laurl_text() {
        let headers = HashMap::new();
        let body = r#"<MPD><Period><AdaptationSet><ContentProtection schemeIdUri="urn:uuid:9a04f079-9840-4286-ab92-e65be0885f95"><Laurl>https://lic.example/get</Laurl></ContentProtection></AdaptationSet></Period></MPD>"#;
        let out = rewrite_mpd(body, &ctx(&headers, None)).unwrap();
        assert!(out.contains("https://p.example/license?url=https%3A%2F%2Flic.example%2Fget"));
    }

    #[test]
    fn injects_clearkey_and_strips_other_content_protection() {
        let headers = HashMap::new();
        let ck = ClearKeyInjection {
            kid_hex: "00112233445566778899aabbccddeeff",
            key_hex: "ffeeddccbbaa99887766554433221100",
        };
        let body = r#"<MPD><Period><AdaptationSet><ContentProtection schemeIdUri="urn:uuid:9a04f079-9840-4286-ab92-e65be0885f95"><pssh>garbage</pssh></ContentProtection><Representation id="v0"/></AdaptationSet></Period></MPD>"#;
        let out = rewrite_mpd(body, &ctx(&headers, Some(ck))).unwrap();

        assert!(!out.contains("9a04f079-9840-4286-ab92-e65be0885f95"));
        assert!(!out.contains("<pssh>"));
        assert!(out.contains("urn:uuid:e2719d58-a985-b3c9-781a-007147f192ec"));
        assert!(out.contains("cenc:default_KID=\"00112233-4455-6677-8899-aabbccddeeff\""));
        assert!(out.contains("<Representation id=\"v0\"/>"));
    }

    #[test]
    fn self_closed_adaptation_set_still_gets_clearkey() {
        let headers = HashMap::new();
        let ck = ClearKeyInjection { kid_hex: "00112233445566778899aabbccddeeff", key_hex: "00112233445566778899aabbccddeeff" };
        let body = r#"<MPD><Period><AdaptationSet contentType="text"/></Period></MPD>"#;
        let out = rewrite_mpd(body, &ctx(&headers, Some(ck))).unwrap();
        assert!(out.contains("<AdaptationSet contentType=\"text\">"));
        assert!(out.contains("ContentProtection"));
        assert!(out.contains("</AdaptationSet>"));
    }
}
