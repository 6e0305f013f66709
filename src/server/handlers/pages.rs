//! Static landing/diagnostic pages (§6: `/`, `/builder`, `/info`, `/api/info`).
//!
//! These serve a minimal hand-written page rather than a templating engine —
//! there's no asset pipeline in this crate, so the HTML lives inline.

use crate::server::state::AppState;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

const PAGE_STYLE: &str = "body{font-family:sans-serif;background:#0f1115;color:#e6e6e6;margin:2rem}a{color:#8ab4f8}code{background:#1b1e24;padding:0.1rem 0.3rem;border-radius:3px}";

fn html_page(title: &str, body: &str) -> Response {
    let page = format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>{title}</title><style>{PAGE_STYLE}</style></head><body>{body}</body></html>"
    );
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/html; charset=utf-8")], page).into_response()
}

pub async fn root() -> Response {
    html_page(
        "streamgate",
        r#"<h1>streamgate</h1>
<p>Adaptive-streaming reverse proxy: HLS/DASH rewriting, ClearKey decryption, and M3U playlist composition.</p>
<ul>
<li><a href="/builder">/builder</a> — playlist builder</li>
<li><a href="/info">/info</a> — server status</li>
<li><a href="/api/info">/api/info</a> — server status (JSON)</li>
<li><code>/proxy/manifest.m3u8?d=&lt;url&gt;</code> — resolve + relay a channel URL</li>
</ul>"#,
    )
}

pub async fn builder() -> Response {
    html_page(
        "playlist builder",
        r#"<h1>Playlist builder</h1>
<form method="get" action="/playlist" target="_blank">
<label>Playlist URLs (one per line, composed with <code>;</code>):</label><br>
<textarea name="url" rows="6" cols="60" placeholder="https://example.com/a.m3u8&#10;https://example.com/b.m3u8|sort=true"></textarea><br>
<button type="submit">Build</button>
</form>"#,
    )
}

pub async fn info(State(state): State<AppState>) -> Response {
    let body = format!(
        r#"<h1>Server status</h1>
<p>Bind: <code>{}:{}</code></p>
<p>Base URL: <code>{}</code></p>
<p>API password required: <code>{}</code></p>
<p>Global proxies: <code>{}</code>, Vavoo proxies: <code>{}</code>, DLHD proxies: <code>{}</code></p>"#,
        state.config.bind,
        state.config.port,
        state.config.base_url,
        state.config.api_password.is_some(),
        state.config.global_proxies.len(),
        state.config.vavoo_proxies.len(),
        state.config.dlhd_proxies.len(),
    );
    html_page("streamgate status", &body)
}

pub async fn api_info(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "proxy": "streamgate",
        "status": "ok",
        "features": [
            "hls_proxy",
            "dash_proxy",
            "dash_to_hls_conversion",
            "clearkey_decrypt",
            "playlist_builder",
            "proxy_pools",
            "multi_extractor",
        ],
        "proxy_config": {
            "global": state.config.global_proxies.len(),
            "vavoo": state.config.vavoo_proxies.len(),
            "dlhd": state.config.dlhd_proxies.len(),
        },
        "endpoints": {
            "/proxy/manifest.m3u8": "resolve + relay, dispatches HLS or DASH",
            "/proxy/hls/manifest.m3u8": "HLS proxy — ?d=<url>",
            "/proxy/mpd/manifest.m3u8": "DASH proxy — ?d=<url>",
            "/proxy/stream": "generic byte passthrough",
            "/key": "AES-128 key proxy",
            "/decrypt/segment.mp4": "server-side ClearKey decrypt",
            "/license": "DRM license proxy/synthesis",
            "/playlist": "playlist builder",
            "/segment/{name}": "segment relay via base_url",
            "/proxy/ip": "public IP as seen through any configured proxy",
            "/extractor": "resolve only, no relay",
        },
    }))
}
