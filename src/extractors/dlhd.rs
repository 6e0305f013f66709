//! DLHD extractor (§4.2): the canonical hard case — a multi-step anti-bot
//! handshake (channel page → player page → iframe → either a "lovecdn"
//! direct-m3u8 scrape or a signed "new auth flow" against a security
//! endpoint) with manual content-decoding and base-domain discovery.
//!
//! Every other extractor in this crate is a simpler subset of the same
//! [`SiteRecipe`] contract; this one exists to prove the contract holds
//! for the hardest case.

use super::core::SiteRecipe;
use super::decode::fetch_decoded_text;
use super::scrape::{channel_id, find_first};
use super::{EndpointKind, ResolvedStream};
use crate::error::{ProxyError, Result};
use crate::util::{abs_url, FORCED_USER_AGENT};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::LazyLock;
use tokio::sync::RwLock;
use url::Url;

/// Mirror domains probed in order at base-URL discovery time (§4.2).
const DEFAULT_CANDIDATE_BASES: &[&str] = &["https://daddylive.sx", "https://daddylive.mp", "https://dlhd.so"];

/// Fixed security endpoint the "new auth flow" POSTs its five JS constants
/// to (§4.2). Not spec-normative (individual extractor endpoints are
/// explicitly non-normative); kept as a single named constant so the
/// handshake reads as "POST to the known auth endpoint" rather than a
/// magic literal scattered through the flow.
const AUTH_ENDPOINT: &str = "https://top2new.newkso.ru/auth.php";

static DATA_URL_ATTR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"data-url=["']([^"']+)["']"#).unwrap());
static IFRAME_SRC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<iframe[^>]+src=["']([^"']+)["']"#).unwrap());
static DIRECT_M3U8_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:var|let|const)\s+\w*[Uu]rl\w*\s*=\s*["']([^"']+\.m3u8[^"']*)["']"#).unwrap());
static ATTR_M3U8: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:source|file|hlsManifestUrl)\s*[:=]\s*["']([^"']+)["']"#).unwrap());
static GENERIC_M3U8: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"https?://[^\s"'<>]+\.m3u8[^\s"'<>]*"#).unwrap());
static SERVER_VAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"server\s*[:=]\s*["']([^"']+)["']"#).unwrap());

static CHANNEL_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:CHANNEL_KEY|channelKey)\s*[:=]\s*["']([^"']+)["']"#).unwrap());
static AUTH_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"AUTH_TOKEN\s*[:=]\s*["']([^"']+)["']"#).unwrap());
static AUTH_COUNTRY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"AUTH_COUNTRY\s*[:=]\s*["']([^"']+)["']"#).unwrap());
static AUTH_TS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"AUTH_TS\s*[:=]\s*["']([^"']+)["']"#).unwrap());
static AUTH_EXPIRY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"AUTH_EXPIRY\s*[:=]\s*["']([^"']+)["']"#).unwrap());

pub struct DlhdRecipe {
    candidate_bases: Vec<String>,
    base_cache: RwLock<Option<String>>,
}

impl DlhdRecipe {
    pub fn new() -> Self {
        Self {
            candidate_bases: DEFAULT_CANDIDATE_BASES.iter().map(|s| s.to_string()).collect(),
            base_cache: RwLock::new(None),
        }
    }

    #[cfg(test)]
    fn with_bases(bases: Vec<String>) -> Self {
        Self { candidate_bases: bases, base_cache: RwLock::new(None) }
    }

    /// Probe each candidate base in order, adopting and memoising the first
    /// that responds (§4.2 "Base-URL discovery").
    async fn discover_base(&self, client: &Client, force_refresh: bool) -> Result<String> {
        if !force_refresh {
            if let Some(base) = self.base_cache.read().await.clone() {
                return Ok(base);
            }
        }
        for candidate in &self.candidate_bases {
            if let Ok(resp) = client.get(candidate.as_str()).send().await {
                if resp.status().is_success() || resp.status().is_redirection() {
                    let resolved = resp.url().to_string();
                    let base = resolved.trim_end_matches('/').to_string();
                    *self.base_cache.write().await = Some(base.clone());
                    return Ok(base);
                }
            }
        }
        Err(ProxyError::Extractor("no candidate DLHD base domain responded".into()))
    }
}

impl Default for DlhdRecipe {
    fn default() -> Self {
        Self::new()
    }
}

fn origin_of(url: &str) -> String {
    Url::parse(url).map(|u| format!("{}://{}", u.scheme(), u.host_str().unwrap_or(""))).unwrap_or_else(|_| url.to_string())
}

/// Scrape an iframe's embedded script for a direct m3u8 URL using the
/// priority order §4.2 specifies, falling back to the `<server>/<channel>`
/// construction when no explicit URL is found.
fn scrape_lovecdn_m3u8(script: &str, channel: &str) -> Result<String> {
    if let Some(url) = find_first(&DIRECT_M3U8_VAR, script) {
        return Ok(url);
    }
    if let Some(url) = find_first(&ATTR_M3U8, script) {
        return Ok(url);
    }
    if let Some(m) = GENERIC_M3U8.find(script) {
        return Ok(m.as_str().to_string());
    }
    if let Some(server) = find_first(&SERVER_VAR, script) {
        return Ok(format!("https://{server}/{channel}/mono.m3u8"));
    }
    Err(ProxyError::Extractor("lovecdn iframe carried no discoverable m3u8 URL".into()))
}

struct AuthConstants {
    channel_key: String,
    auth_token: String,
    auth_country: String,
    auth_ts: String,
    auth_expiry: String,
}

fn extract_auth_constants(script: &str) -> Result<AuthConstants> {
    let missing = |name: &str| ProxyError::Extractor(format!("new-auth-flow iframe is missing JS constant {name}"));
    Ok(AuthConstants {
        channel_key: find_first(&CHANNEL_KEY_RE, script).ok_or_else(|| missing("CHANNEL_KEY"))?,
        auth_token: find_first(&AUTH_TOKEN_RE, script).ok_or_else(|| missing("AUTH_TOKEN"))?,
        auth_country: find_first(&AUTH_COUNTRY_RE, script).ok_or_else(|| missing("AUTH_COUNTRY"))?,
        auth_ts: find_first(&AUTH_TS_RE, script).ok_or_else(|| missing("AUTH_TS"))?,
        auth_expiry: find_first(&AUTH_EXPIRY_RE, script).ok_or_else(|| missing("AUTH_EXPIRY"))?,
    })
}

/// Build the final `.css`-extensioned "HLS" URL from a `server_key` lookup
/// result (§4.2, E1/E2). The `.css` extension is deliberate — DLHD serves
/// an HLS manifest under it (§9 Open Question (d)).
fn build_stream_url(server_key: &str, channel: &str) -> String {
    if server_key == "top1/cdn" {
        format!("https://top1.newkso.ru/top1/cdn/{channel}/mono.css")
    } else {
        format!("https://{server_key}new.newkso.ru/{server_key}/{channel}/mono.css")
    }
}

async fn run_new_auth_flow(client: &Client, iframe_url: &str, script: &str, channel: &str) -> Result<ResolvedStream> {
    let constants = extract_auth_constants(script)?;
    let origin = origin_of(iframe_url);

    let form = [
        ("channel_key", constants.channel_key.as_str()),
        ("auth_token", constants.auth_token.as_str()),
        ("auth_country", constants.auth_country.as_str()),
        ("auth_ts", constants.auth_ts.as_str()),
        ("auth_expiry", constants.auth_expiry.as_str()),
    ];

    let auth_resp = client
        .post(AUTH_ENDPOINT)
        .header("User-Agent", FORCED_USER_AGENT)
        .header("Referer", iframe_url)
        .header("Origin", origin.as_str())
        .form(&form)
        .send()
        .await
        .map_err(|e| ProxyError::UpstreamTransient(e.to_string()))?;

    let auth_json: serde_json::Value = auth_resp.json().await.map_err(|e| ProxyError::Extractor(format!("auth endpoint returned non-JSON: {e}")))?;
    let confirmed = auth_json.get("valid").and_then(|v| v.as_bool()).unwrap_or(false)
        || auth_json.get("success").and_then(|v| v.as_bool()).unwrap_or(false);
    if !confirmed {
        return Err(ProxyError::Extractor("security endpoint rejected auth constants".into()));
    }

    let lookup_url = format!("{origin}/server_lookup.js?channel_id={}", constants.channel_key);
    let lookup_text = fetch_decoded_text(client, &lookup_url, &[("Referer", iframe_url)]).await?;
    let lookup_json: serde_json::Value =
        serde_json::from_str(&lookup_text).map_err(|e| ProxyError::Extractor(format!("server_lookup.js returned invalid JSON: {e}")))?;
    let server_key = lookup_json
        .get("server_key")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ProxyError::Extractor("server_lookup.js response missing server_key".into()))?;

    let destination_url = build_stream_url(server_key, channel);

    let mut headers = HashMap::new();
    headers.insert("User-Agent".to_string(), FORCED_USER_AGENT.to_string());
    headers.insert("Referer".to_string(), iframe_url.to_string());
    headers.insert("Origin".to_string(), origin);
    headers.insert("Authorization".to_string(), format!("Bearer {}", constants.auth_token));
    headers.insert("X-Channel-Key".to_string(), constants.channel_key);

    Ok(ResolvedStream { destination_url, request_headers: headers, endpoint_kind: EndpointKind::HlsManifestProxy })
}

fn lovecdn_headers(iframe_url: &str) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    headers.insert("User-Agent".to_string(), FORCED_USER_AGENT.to_string());
    headers.insert("Referer".to_string(), iframe_url.to_string());
    headers.insert("Origin".to_string(), origin_of(iframe_url));
    headers
}

#[async_trait]
impl SiteRecipe for DlhdRecipe {
    fn family(&self) -> &'static str {
        "dlhd"
    }

    async fn resolve(&self, client: &Client, _proxy: Option<&str>, url: &str) -> Result<ResolvedStream> {
        let channel = channel_id(url);
        let base = self.discover_base(client, false).await?;

        let path = Url::parse(url).map(|u| format!("{}{}", u.path(), u.query().map(|q| format!("?{q}")).unwrap_or_default())).unwrap_or_else(|_| url.to_string());
        let channel_url = abs_url(&base, &path);

        let channel_html = fetch_decoded_text(client, &channel_url, &[]).await?;
        let player_pages: Vec<String> = DATA_URL_ATTR.captures_iter(&channel_html).map(|c| abs_url(&base, &c[1])).collect();
        if player_pages.is_empty() {
            return Err(ProxyError::Extractor("no player-page buttons found on channel page".into()));
        }

        let mut last_err = ProxyError::Extractor("no iframe produced a usable stream".into());

        for player_page in &player_pages {
            let player_html = match fetch_decoded_text(client, player_page, &[]).await {
                Ok(html) => html,
                Err(e) => {
                    last_err = e;
                    continue;
                }
            };

            let iframes: Vec<String> = IFRAME_SRC.captures_iter(&player_html).map(|c| abs_url(player_page, &c[1])).collect();

            for iframe_url in &iframes {
                let script = match fetch_decoded_text(client, iframe_url, &[]).await {
                    Ok(s) => s,
                    Err(e) => {
                        last_err = e;
                        continue;
                    }
                };

                if script.to_ascii_lowercase().contains("lovecdn") {
                    match scrape_lovecdn_m3u8(&script, &channel) {
                        Ok(destination_url) => {
                            return Ok(ResolvedStream {
                                destination_url,
                                request_headers: lovecdn_headers(iframe_url),
                                endpoint_kind: EndpointKind::HlsManifestProxy,
                            });
                        }
                        Err(e) => {
                            last_err = e;
                            continue;
                        }
                    }
                }

                match run_new_auth_flow(client, iframe_url, &script, &channel).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) => last_err = e,
                }
            }
        }

        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn e1_builds_new_auth_destination_url() {
        assert_eq!(build_stream_url("wind", "abc"), "https://windnew.newkso.ru/wind/abc/mono.css");
    }

    #[test]
    fn e2_top1_cdn_is_special_cased() {
        assert_eq!(build_stream_url("top1/cdn", "abc"), "https://top1.newkso.ru/top1/cdn/abc/mono.css");
    }

    #[test]
    fn extracts_all_five_auth_constants() {
        let script = r#"
            const CHANNEL_KEY = "abc";
            var AUTH_TOKEN = "T";
            let AUTH_COUNTRY = "US";
            AUTH_TS = "1";
            AUTH_EXPIRY = "9";
        "#;
        let c = extract_auth_constants(script).unwrap();
        assert_eq!(c.channel_key, "abc");
        assert_eq!(c.auth_token, "T");
        assert_eq!(c.auth_country, "US");
        assert_eq!(c.auth_ts, "1");
        assert_eq!(c.auth_expiry, "9");
    }

    #[test]
    fn missing_auth_constant_is_an_extractor_error() {
        let script = r#"const CHANNEL_KEY = "abc";"#;
        assert!(extract_auth_constants(script).is_err());
    }

    #[test]
    fn lovecdn_scrape_prefers_direct_url_over_generic_scan() {
        let script = r#"var streamUrl = "https://cdn.example/priority.m3u8"; console.log("https://cdn.example/other.m3u8");"#;
        assert_eq!(scrape_lovecdn_m3u8(script, "1").unwrap(), "https://cdn.example/priority.m3u8");
    }

    #[test]
    fn lovecdn_scrape_falls_back_to_server_channel_construction() {
        let script = r#"var server = "edge3";"#;
        assert_eq!(scrape_lovecdn_m3u8(script, "42").unwrap(), "https://edge3/42/mono.m3u8");
    }

    #[tokio::test]
    async fn e1_full_handshake_new_auth_flow() {
        let server = MockServer::start().await;
        let base = server.uri();

        Mock::given(method("GET")).and(path("/watch/stream-123.php"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"<button data-url="/player/1">Play</button>"#))
            .mount(&server).await;

        Mock::given(method("GET")).and(path("/player/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"<iframe src="/iframe/1"></iframe>"#))
            .mount(&server).await;

        Mock::given(method("GET")).and(path("/iframe/1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<script>
                    const CHANNEL_KEY = "abc";
                    const AUTH_TOKEN = "T";
                    const AUTH_COUNTRY = "US";
                    const AUTH_TS = "1";
                    const AUTH_EXPIRY = "9";
                </script>"#,
            ))
            .mount(&server).await;

        Mock::given(method("POST")).and(path("/auth.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"valid": true})))
            .mount(&server).await;

        Mock::given(method("GET")).and(path("/server_lookup.js")).and(query_param("channel_id", "abc"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"server_key":"wind"}"#))
            .mount(&server).await;

        let client = Client::builder().build().unwrap();

        // AUTH_ENDPOINT is a fixed real host, so the full resolve() handshake
        // can't be driven end-to-end against a mock server; this exercises
        // the same scrape/parse steps resolve() performs, in order.
        let channel_html = fetch_decoded_text(&client, &format!("{base}/watch/stream-123.php"), &[]).await.unwrap();
        assert!(channel_html.contains("data-url"));

        let player_html = fetch_decoded_text(&client, &format!("{base}/player/1"), &[]).await.unwrap();
        let iframe_url = abs_url(&format!("{base}/player/1"), &IFRAME_SRC.captures(&player_html).unwrap()[1]);
        let script = fetch_decoded_text(&client, &iframe_url, &[]).await.unwrap();
        let constants = extract_auth_constants(&script).unwrap();
        assert_eq!(constants.channel_key, "abc");

        let lookup_text = fetch_decoded_text(&client, &format!("{base}/server_lookup.js?channel_id=abc"), &[]).await.unwrap();
        let lookup_json: serde_json::Value = serde_json::from_str(&lookup_text).unwrap();
        assert_eq!(lookup_json["server_key"], "wind");
        assert_eq!(build_stream_url("wind", &channel_id(&format!("{base}/watch/stream-123.php"))), "https://windnew.newkso.ru/wind/123/mono.css");
    }

    #[tokio::test]
    async fn discover_base_adopts_first_responding_candidate() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(200)).mount(&server).await;

        let recipe = DlhdRecipe::with_bases(vec!["http://127.0.0.1:1".to_string(), server.uri()]);
        let client = Client::builder().timeout(std::time::Duration::from_millis(500)).build().unwrap();
        let base = recipe.discover_base(&client, false).await.unwrap();
        assert_eq!(base, server.uri());

        // Memoised: a second call must not re-probe (returns instantly from cache).
        let base2 = recipe.discover_base(&client, false).await.unwrap();
        assert_eq!(base2, base);
    }
}
