//! Live/VOD DASH→HLS conversion (§4.4): turns a parsed [`Mpd`] into a master
//! or media HLS playlist, routing each segment through the relay (or the
//! decrypt endpoint, when a server-side ClearKey was supplied).

use super::model::{AdaptationSet, Mpd, SegmentTemplateInfo};
use crate::error::{ProxyError, Result};
use crate::util::{abs_url, header_and_password_suffix, urlenc};
use chrono::Utc;
use std::collections::HashMap;

pub struct DecryptParams<'a> {
    pub key_hex: &'a str,
    pub key_id_hex: &'a str,
}

pub struct HlsFromMpdContext<'a> {
    pub document_url: &'a str,
    pub proxy_base: &'a str,
    pub upstream_headers: &'a HashMap<String, String>,
    pub api_password: Option<&'a str>,
    pub decrypt: Option<DecryptParams<'a>>,
}

fn suffix(ctx: &HlsFromMpdContext) -> String {
    header_and_password_suffix(ctx.upstream_headers, ctx.api_password)
}

fn media_manifest_url(ctx: &HlsFromMpdContext, rep_id: &str) -> String {
    let mut url = format!(
        "{}/proxy/hls/manifest.m3u8?d={}&format=hls&rep_id={}",
        ctx.proxy_base,
        urlenc(ctx.document_url),
        urlenc(rep_id)
    );
    if let Some(d) = &ctx.decrypt {
        url.push_str(&format!("&clearkey={}:{}", d.key_id_hex, d.key_hex));
    }
    url.push_str(&suffix(ctx));
    url
}

fn segment_basename(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

fn segment_url(ctx: &HlsFromMpdContext, init_abs: Option<&str>, media_abs: &str) -> String {
    if let Some(d) = &ctx.decrypt {
        let mut url = format!("{}/decrypt/segment.mp4?url={}", ctx.proxy_base, urlenc(media_abs));
        if let Some(init) = init_abs {
            url.push_str(&format!("&init_url={}", urlenc(init)));
        }
        url.push_str(&format!("&key={}&key_id={}", d.key_hex, d.key_id_hex));
        url.push_str(&suffix(ctx));
        url
    } else {
        let mut url = format!(
            "{}/segment/{}?base_url={}",
            ctx.proxy_base,
            segment_basename(media_abs),
            urlenc(media_abs)
        );
        url.push_str(&suffix(ctx));
        url
    }
}

fn init_map_line(ctx: &HlsFromMpdContext, init_abs: &str) -> String {
    let mut url = format!("{}/segment/init.mp4?base_url={}", ctx.proxy_base, urlenc(init_abs));
    url.push_str(&suffix(ctx));
    format!("#EXT-X-MAP:URI=\"{url}\"")
}

fn resolve_base_url(document_url: &str, mpd: &Mpd, aset: &AdaptationSet, rep: &super::model::Representation) -> String {
    let mut base = document_url.to_string();
    if let Some(b) = &mpd.base_url {
        base = abs_url(&base, b);
    }
    if let Some(b) = &aset.base_url {
        base = abs_url(&base, b);
    }
    if let Some(b) = &rep.base_url {
        base = abs_url(&base, b);
    }
    base
}

/// Substitute `$RepresentationID$`, `$Number[%0Nd]$` and `$Time[%0Nd]$`
/// template tokens per the DASH spec's numeric-format-tag syntax.
fn substitute_template(template: &str, rep_id: &str, number: Option<u64>, time: Option<u64>) -> String {
    let mut s = template.replace("$RepresentationID$", rep_id);
    if let Some(n) = number {
        s = substitute_numeric_token(&s, "$Number", n);
    }
    if let Some(t) = time {
        s = substitute_numeric_token(&s, "$Time", t);
    }
    s
}

fn substitute_numeric_token(s: &str, token_prefix: &str, value: u64) -> String {
    let mut result = String::new();
    let mut rest = s;
    while let Some(start) = rest.find(token_prefix) {
        result.push_str(&rest[..start]);
        let after = &rest[start + token_prefix.len()..];
        let Some(end) = after.find('$') else {
            result.push_str(token_prefix);
            rest = after;
            continue;
        };
        let fmt_spec = &after[..end];
        let formatted = match fmt_spec.strip_prefix('%').and_then(|f| f.strip_suffix('d')) {
            Some(width_str) => {
                let width: usize = width_str.trim_start_matches('0').parse().unwrap_or(0);
                format!("{value:0width$}")
            }
            None => value.to_string(),
        };
        result.push_str(&formatted);
        rest = &after[end + 1..];
    }
    result.push_str(rest);
    result
}

struct SegmentEntry {
    number: u64,
    time: u64,
    duration_sec: f64,
}

fn build_segment_list(template: &SegmentTemplateInfo, is_dynamic: bool) -> Vec<SegmentEntry> {
    let timescale = template.timescale.max(1);

    if !template.timeline.is_empty() {
        let mut entries = Vec::new();
        let mut number = template.start_number;
        for &(t, d, r) in &template.timeline {
            for rep in 0..=r {
                entries.push(SegmentEntry {
                    number,
                    time: t + rep * d,
                    duration_sec: d as f64 / timescale as f64,
                });
                number += 1;
            }
        }
        if is_dynamic {
            // Live: keep only the trailing ~60s window (timeline-driven).
            const WINDOW_SECONDS: f64 = 60.0;
            let mut total = 0.0;
            let mut keep_from = 0;
            for (idx, seg) in entries.iter().enumerate().rev() {
                total += seg.duration_sec;
                keep_from = idx;
                if total >= WINDOW_SECONDS {
                    break;
                }
            }
            entries.split_off(keep_from)
        } else {
            entries
        }
    } else {
        // VOD, or live with no availability-start-time to anchor a live-edge
        // window against (`representation_segments` handles the anchored
        // live case before ever calling this): 100 segments from startNumber.
        const DEFAULT_SEGMENTS: u64 = 100;
        let duration_sec = template.duration.unwrap_or(timescale) as f64 / timescale as f64;
        let segment_time = |n: u64| (n - template.start_number) * template.duration.unwrap_or(timescale);
        (template.start_number..template.start_number + DEFAULT_SEGMENTS)
            .map(|n| SegmentEntry {
                number: n,
                time: segment_time(n),
                duration_sec,
            })
            .collect()
    }
}

/// Windowed segment list for the live, duration-template (no timeline) case:
/// the segment "now" sits at, using the MPD's own wall-clock start time.
fn build_live_duration_window(
    template: &SegmentTemplateInfo,
    availability_start: chrono::DateTime<Utc>,
) -> Vec<SegmentEntry> {
    const LIVE_EDGE_BUFFER_SECONDS: f64 = 20.0;
    const LIVE_WINDOW_SEGMENTS: i64 = 10;

    let timescale = template.timescale.max(1);
    let duration = template.duration.unwrap_or(timescale);
    let duration_sec = duration as f64 / timescale as f64;

    let elapsed = (Utc::now() - availability_start).num_milliseconds() as f64 / 1000.0;
    let current = template.start_number as i64
        + ((elapsed - LIVE_EDGE_BUFFER_SECONDS) / duration_sec).floor() as i64;
    let current = current.max(template.start_number as i64);
    let window_start = (current - (LIVE_WINDOW_SEGMENTS - 1)).max(template.start_number as i64);

    (window_start..=current)
        .map(|n| {
            let n = n as u64;
            SegmentEntry {
                number: n,
                time: (n - template.start_number) * duration,
                duration_sec,
            }
        })
        .collect()
}

fn representation_segments(mpd: &Mpd, template: &SegmentTemplateInfo) -> Vec<SegmentEntry> {
    if template.timeline.is_empty() && mpd.is_dynamic {
        if let Some(start) = mpd.availability_start_time {
            return build_live_duration_window(template, start);
        }
    }
    build_segment_list(template, mpd.is_dynamic)
}

/// Build the HLS master playlist enumerating every audio/video Representation.
pub fn master_playlist_from_mpd(mpd: &Mpd, ctx: &HlsFromMpdContext) -> String {
    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:7\n");

    let audio_sets: Vec<&AdaptationSet> = mpd.adaptation_sets.iter().filter(|a| a.is_audio()).collect();
    let video_sets: Vec<&AdaptationSet> = mpd.adaptation_sets.iter().filter(|a| !a.is_audio()).collect();
    let has_audio = !audio_sets.is_empty();

    for (i, aset) in audio_sets.iter().enumerate() {
        for rep in &aset.representations {
            let lang = aset.lang.as_deref().unwrap_or("und");
            out.push_str(&format!(
                "#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"audio\",NAME=\"Audio {} ({})\",LANGUAGE=\"{}\",DEFAULT={},AUTOSELECT=YES,URI=\"{}\"\n",
                lang,
                rep.bandwidth,
                lang,
                if i == 0 { "YES" } else { "NO" },
                media_manifest_url(ctx, &rep.id)
            ));
        }
    }

    for aset in &video_sets {
        for rep in &aset.representations {
            let mut attrs = format!("BANDWIDTH={}", rep.bandwidth);
            if let (Some(w), Some(h)) = (rep.width, rep.height) {
                attrs.push_str(&format!(",RESOLUTION={w}x{h}"));
            }
            if let Some(fr) = &rep.frame_rate {
                attrs.push_str(&format!(",FRAME-RATE={fr}"));
            }
            if let Some(codecs) = &rep.codecs {
                attrs.push_str(&format!(",CODECS=\"{codecs}\""));
            }
            if has_audio {
                attrs.push_str(",AUDIO=\"audio\"");
            }
            out.push_str(&format!("#EXT-X-STREAM-INF:{attrs}\n"));
            out.push_str(&media_manifest_url(ctx, &rep.id));
            out.push('\n');
        }
    }

    out
}

/// Build the HLS media playlist for a single Representation.
pub fn media_playlist_from_mpd(mpd: &Mpd, rep_id: &str, ctx: &HlsFromMpdContext) -> Result<String> {
    let (aset, rep) = mpd
        .find_representation(rep_id)
        .ok_or_else(|| ProxyError::BadRequest(format!("unknown representation id {rep_id}")))?;

    let template = rep
        .segment_template
        .as_ref()
        .or(aset.segment_template.as_ref())
        .ok_or_else(|| ProxyError::ConversionError("representation has no SegmentTemplate".into()))?;

    let effective_base = resolve_base_url(ctx.document_url, mpd, aset, rep);

    let init_abs = template
        .initialization
        .as_ref()
        .map(|tmpl| abs_url(&effective_base, &substitute_template(tmpl, rep_id, None, None)));

    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:7\n");

    if ctx.decrypt.is_none() {
        if let Some(init_abs) = &init_abs {
            out.push_str(&init_map_line(ctx, init_abs));
            out.push('\n');
        }
    }

    let segments = representation_segments(mpd, template);
    let target_duration = segments.iter().map(|s| s.duration_sec.ceil() as u64).max().unwrap_or(1);

    out.push_str(&format!("#EXT-X-TARGETDURATION:{target_duration}\n"));
    out.push_str(&format!(
        "#EXT-X-MEDIA-SEQUENCE:{}\n",
        segments.first().map(|s| s.number).unwrap_or(template.start_number)
    ));

    if mpd.is_dynamic {
        out.push_str("#EXT-X-START:TIME-OFFSET=-18.0,PRECISE=YES\n");
    } else {
        out.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n");
    }

    let media_tmpl = template
        .media
        .as_ref()
        .ok_or_else(|| ProxyError::ConversionError("SegmentTemplate has no media attribute".into()))?;

    for seg in &segments {
        out.push_str(&format!("#EXTINF:{:.3},\n", seg.duration_sec));
        let rel = substitute_template(media_tmpl, rep_id, Some(seg.number), Some(seg.time));
        let media_abs = abs_url(&effective_base, &rel);
        out.push_str(&segment_url(ctx, init_abs.as_deref(), &media_abs));
        out.push('\n');
    }

    if !mpd.is_dynamic {
        out.push_str("#EXT-X-ENDLIST\n");
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dash::model::parse_mpd;

    fn ctx<'a>(headers: &'a HashMap<String, String>, decrypt: Option<DecryptParams<'a>>) -> HlsFromMpdContext<'a> {
        HlsFromMpdContext {
            document_url: "https://o.example/content/manifest.mpd",
            proxy_base: "https://p.example",
            upstream_headers: headers,
            api_password: None,
            decrypt,
        }
    }

    const VOD_MPD: &str = r#"<MPD type="static">
  <Period>
    <AdaptationSet contentType="video" mimeType="video/mp4">
      <SegmentTemplate media="v/$RepresentationID$/seg-$Number%05d$.m4s" initialization="v/$RepresentationID$/init.mp4" startNumber="1" timescale="1000" duration="4000"/>
      <Representation id="v0" bandwidth="2000000" width="1920" height="1080" codecs="avc1.640028"/>
    </AdaptationSet>
    <AdaptationSet contentType="audio" mimeType="audio/mp4" lang="en">
      <SegmentTemplate media="a/$RepresentationID$/seg-$Number%05d$.m4s" initialization="a/$RepresentationID$/init.mp4" startNumber="1" timescale="48000" duration="192000"/>
      <Representation id="a0" bandwidth="128000"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

    #[test]
    fn e4_master_playlist_lists_audio_and_video() {
        let mpd = parse_mpd(VOD_MPD).unwrap();
        let headers = HashMap::new();
        let out = master_playlist_from_mpd(&mpd, &ctx(&headers, None));
        assert!(out.contains("#EXT-X-MEDIA:TYPE=AUDIO"));
        assert!(out.contains("rep_id=a0"));
        assert!(out.contains("#EXT-X-STREAM-INF:BANDWIDTH=2000000,RESOLUTION=1920x1080"));
        assert!(out.contains("AUDIO=\"audio\""));
        assert!(out.contains("rep_id=v0"));
    }

    #[test]
    fn e5_vod_media_playlist_has_100_segments_and_endlist() {
        let mpd = parse_mpd(VOD_MPD).unwrap();
        let headers = HashMap::new();
        let out = media_playlist_from_mpd(&mpd, "v0", &ctx(&headers, None)).unwrap();
        assert!(out.contains("#EXT-X-PLAYLIST-TYPE:VOD"));
        assert!(out.contains("#EXT-X-ENDLIST"));
        assert_eq!(out.matches("#EXTINF:").count(), 100);
        assert!(out.contains("#EXT-X-MAP:URI="));
        assert!(out.contains("seg-00001.m4s"));
    }

    #[test]
    fn e5_master_playlist_forwards_clearkey_onto_media_urls() {
        let mpd = parse_mpd(VOD_MPD).unwrap();
        let headers = HashMap::new();
        let decrypt = Some(DecryptParams { key_hex: "ccdd", key_id_hex: "aabb" });
        let out = master_playlist_from_mpd(&mpd, &ctx(&headers, decrypt));
        for line in out.lines().filter(|l| l.starts_with("https://p.example")) {
            assert!(line.contains("clearkey=aabb:ccdd"), "missing clearkey forward on: {line}");
        }
    }

    #[test]
    fn decrypt_mode_omits_map_and_routes_to_decrypt_endpoint() {
        let mpd = parse_mpd(VOD_MPD).unwrap();
        let headers = HashMap::new();
        let decrypt = Some(DecryptParams { key_hex: "aa".repeat(16).leak(), key_id_hex: "bb".repeat(16).leak() });
        let out = media_playlist_from_mpd(&mpd, "v0", &ctx(&headers, decrypt)).unwrap();
        assert!(!out.contains("#EXT-X-MAP:URI="));
        assert!(out.contains("/decrypt/segment.mp4?url="));
        assert!(out.contains("&init_url="));
    }

    const LIVE_TIMELINE_MPD: &str = r#"<MPD type="dynamic">
  <Period>
    <AdaptationSet contentType="video">
      <Representation id="v0" bandwidth="1000000">
        <SegmentTemplate media="seg-$Time$.m4s" initialization="init.mp4" timescale="1000">
          <SegmentTimeline>
            <S t="0" d="4000" r="40"/>
          </SegmentTimeline>
        </SegmentTemplate>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;

    #[test]
    fn live_timeline_keeps_trailing_60_second_window() {
        let mpd = parse_mpd(LIVE_TIMELINE_MPD).unwrap();
        let headers = HashMap::new();
        let out = media_playlist_from_mpd(&mpd, "v0", &ctx(&headers, None)).unwrap();
        assert!(!out.contains("#EXT-X-ENDLIST"));
        assert!(out.contains("#EXT-X-START:TIME-OFFSET=-18.0,PRECISE=YES"));
        // 41 segments of 4s each = 164s total; only the trailing ~60s (15 segments) survive.
        let count = out.matches("#EXTINF:").count();
        assert!(count <= 16 && count >= 14, "expected ~15 segments, got {count}");
    }

    #[test]
    fn substitute_numeric_token_honours_zero_padding() {
        let s = substitute_numeric_token("seg-$Number%05d$.ts", "$Number", 7);
        assert_eq!(s, "seg-00007.ts");
    }
}
