//! Minimal MPD object model used by the DASH→HLS converter (§4.4).
//!
//! Only the elements the converter actually walks are modelled; anything
//! else in the document (EventStream, Metrics, UTCTiming, ...) is ignored.
//! The ClearKey/URL rewriter in [`super::rewriter`] works on the raw token
//! stream instead and does not use this model.

use crate::error::{ProxyError, Result};
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

#[derive(Debug, Clone, Default)]
pub struct SegmentTemplateInfo {
    pub media: Option<String>,
    pub initialization: Option<String>,
    pub start_number: u64,
    pub timescale: u64,
    pub duration: Option<u64>,
    /// Expanded `(t, d, r)` entries from a `SegmentTimeline`, empty when the
    /// template is duration-based instead.
    pub timeline: Vec<(u64, u64, u64)>,
}

#[derive(Debug, Clone)]
pub struct Representation {
    pub id: String,
    pub bandwidth: u64,
    pub mime_type: Option<String>,
    pub codecs: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<String>,
    pub base_url: Option<String>,
    pub segment_template: Option<SegmentTemplateInfo>,
}

#[derive(Debug, Clone)]
pub struct AdaptationSet {
    pub content_type: Option<String>,
    pub mime_type: Option<String>,
    pub lang: Option<String>,
    pub base_url: Option<String>,
    pub segment_template: Option<SegmentTemplateInfo>,
    pub representations: Vec<Representation>,
}

impl AdaptationSet {
    pub fn is_audio(&self) -> bool {
        if self.content_type.as_deref() == Some("audio") {
            return true;
        }
        if let Some(mt) = &self.mime_type {
            return mt.starts_with("audio/");
        }
        self.representations
            .iter()
            .any(|r| r.mime_type.as_deref().is_some_and(|mt| mt.starts_with("audio/")))
    }
}

#[derive(Debug, Clone)]
pub struct Mpd {
    pub is_dynamic: bool,
    pub availability_start_time: Option<DateTime<Utc>>,
    pub base_url: Option<String>,
    pub adaptation_sets: Vec<AdaptationSet>,
}

impl Mpd {
    pub fn find_representation(&self, rep_id: &str) -> Option<(&AdaptationSet, &Representation)> {
        self.adaptation_sets.iter().find_map(|aset| {
            aset.representations
                .iter()
                .find(|r| r.id == rep_id)
                .map(|rep| (aset, rep))
        })
    }
}

fn attr(e: &BytesStart, name: &str) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name.as_bytes())
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

/// Parse a single-Period MPD into the model above. Multi-Period MPDs are
/// flattened — all AdaptationSets across Periods are merged, which matches
/// every manifest shape this crate's extractors actually produce.
pub fn parse_mpd(body: &str) -> Result<Mpd> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut mpd = Mpd {
        is_dynamic: false,
        availability_start_time: None,
        base_url: None,
        adaptation_sets: Vec::new(),
    };

    let mut cur_adaptation: Option<AdaptationSet> = None;
    let mut cur_representation: Option<Representation> = None;
    let mut pending_template: Option<SegmentTemplateInfo> = None;
    let mut template_owner_is_representation = false;
    let mut capturing_base_url = false;
    let mut timeline_acc: Vec<(u64, u64, u64)> = Vec::new();
    let mut last_timeline_end: u64 = 0;

    macro_rules! open_element {
        ($e:expr) => {{
            match local_name(&$e).as_str() {
                "MPD" => {
                    mpd.is_dynamic = attr(&$e, "type").as_deref() == Some("dynamic");
                    mpd.availability_start_time = attr(&$e, "availabilityStartTime")
                        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                        .map(|dt| dt.with_timezone(&Utc));
                }
                "Period" => {}
                "BaseURL" => capturing_base_url = true,
                "AdaptationSet" => {
                    cur_adaptation = Some(AdaptationSet {
                        content_type: attr(&$e, "contentType"),
                        mime_type: attr(&$e, "mimeType"),
                        lang: attr(&$e, "lang"),
                        base_url: None,
                        segment_template: None,
                        representations: Vec::new(),
                    });
                }
                "Representation" => {
                    cur_representation = Some(Representation {
                        id: attr(&$e, "id").unwrap_or_default(),
                        bandwidth: attr(&$e, "bandwidth").and_then(|v| v.parse().ok()).unwrap_or(0),
                        mime_type: attr(&$e, "mimeType"),
                        codecs: attr(&$e, "codecs"),
                        width: attr(&$e, "width").and_then(|v| v.parse().ok()),
                        height: attr(&$e, "height").and_then(|v| v.parse().ok()),
                        frame_rate: attr(&$e, "frameRate"),
                        base_url: None,
                        segment_template: None,
                    });
                }
                "SegmentTemplate" => {
                    template_owner_is_representation = cur_representation.is_some();
                    pending_template = Some(SegmentTemplateInfo {
                        media: attr(&$e, "media"),
                        initialization: attr(&$e, "initialization"),
                        start_number: attr(&$e, "startNumber").and_then(|v| v.parse().ok()).unwrap_or(1),
                        timescale: attr(&$e, "timescale").and_then(|v| v.parse().ok()).unwrap_or(1),
                        duration: attr(&$e, "duration").and_then(|v| v.parse().ok()),
                        timeline: Vec::new(),
                    });
                    timeline_acc.clear();
                    last_timeline_end = 0;
                }
                "S" => {
                    let d: u64 = attr(&$e, "d").and_then(|v| v.parse().ok()).unwrap_or(0);
                    let r: u64 = attr(&$e, "r").and_then(|v| v.parse().ok()).unwrap_or(0);
                    let t: u64 = attr(&$e, "t").and_then(|v| v.parse().ok()).unwrap_or(last_timeline_end);
                    timeline_acc.push((t, d, r));
                    last_timeline_end = t + d * (r + 1);
                }
                _ => {}
            }
        }};
    }

    macro_rules! close_element {
        ($name:expr) => {{
            match $name {
                "BaseURL" => capturing_base_url = false,
                "SegmentTemplate" => {
                    if let Some(mut tmpl) = pending_template.take() {
                        tmpl.timeline = std::mem::take(&mut timeline_acc);
                        if template_owner_is_representation {
                            if let Some(rep) = cur_representation.as_mut() {
                                rep.segment_template = Some(tmpl);
                            }
                        } else if let Some(aset) = cur_adaptation.as_mut() {
                            aset.segment_template = Some(tmpl);
                        }
                    }
                }
                "Representation" => {
                    if let Some(rep) = cur_representation.take() {
                        if let Some(aset) = cur_adaptation.as_mut() {
                            aset.representations.push(rep);
                        }
                    }
                }
                "AdaptationSet" => {
                    if let Some(aset) = cur_adaptation.take() {
                        mpd.adaptation_sets.push(aset);
                    }
                }
                "Period" => {}
                _ => {}
            }
        }};
    }

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ProxyError::PlaylistParseError(format!("mpd parse error: {e}")))?;

        match event {
            Event::Eof => break,
            Event::Start(e) => open_element!(e),
            Event::Empty(e) => {
                let name = local_name(&e);
                open_element!(e);
                close_element!(name.as_str());
            }
            Event::Text(e) if capturing_base_url => {
                let text = e
                    .unescape()
                    .map_err(|e| ProxyError::PlaylistParseError(e.to_string()))?
                    .into_owned();
                if let Some(rep) = cur_representation.as_mut() {
                    rep.base_url = Some(text);
                } else if let Some(aset) = cur_adaptation.as_mut() {
                    aset.base_url = Some(text);
                } else {
                    mpd.base_url = Some(text);
                }
            }
            Event::End(e) => close_element!(local_name(&e).as_str()),
            _ => {}
        }
    }

    Ok(mpd)
}
