pub mod auth;
pub mod handlers;
pub mod params;
pub mod relay;
pub mod state;
pub mod url_validation;

use crate::config::Config;
use axum::http::Method;
use axum::routing::{any, get, post};
use axum::{middleware, Router};
use state::AppState;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Routes that don't carry an upstream payload and are never gated behind
/// `api_password` — static/diagnostic pages plus liveness/metrics (§6).
fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::pages::root))
        .route("/builder", get(handlers::pages::builder))
        .route("/info", get(handlers::pages::info))
        .route("/api/info", get(handlers::pages::api_info))
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics))
}

/// Every route that resolves, relays, or otherwise touches an upstream
/// origin (§6) — gated behind `api_password` when one is configured.
fn protected_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/extractor", get(handlers::extractor::resolve))
        .route("/extractor/video", get(handlers::extractor::resolve))
        .route("/proxy/manifest.m3u8", get(handlers::proxy::manifest))
        .route("/proxy/hls/manifest.m3u8", get(handlers::proxy::hls_manifest))
        .route("/proxy/mpd/manifest.m3u8", get(handlers::proxy::mpd_manifest))
        .route("/proxy/stream", get(handlers::proxy::stream))
        .route("/proxy/hls/segment.ts", get(handlers::proxy::hls_segment))
        .route("/proxy/hls/segment.m4s", get(handlers::proxy::hls_segment))
        .route("/proxy/hls/segment.mp4", get(handlers::proxy::hls_segment))
        .route("/proxy/hls/segment.aac", get(handlers::proxy::hls_segment))
        .route("/proxy/ip", get(handlers::proxy::proxy_ip))
        .route("/segment/{name}", get(handlers::segment::serve_segment))
        .route("/decrypt/segment.mp4", get(handlers::decrypt::decrypt))
        .route("/key", get(handlers::key::fetch_key))
        .route("/license", get(handlers::license::license).post(handlers::license::license))
        .route("/playlist", get(handlers::playlist::build))
        .route("/generate_urls", post(handlers::generate_urls::generate_urls))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_api_password))
}

/// Assemble the full router over an already-built [`AppState`] (§6's whole
/// route table). Split out from [`start`] so integration tests can bind
/// their own listener instead of going through `from_env`/real bind.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .merge(public_routes())
        .merge(protected_routes(&state))
        .fallback(any(handlers::proxy::options_preflight))
        .layer(cors)
        .with_state(state)
}

/// Start the Axum HTTP server
pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let metrics_handle = crate::metrics::install();
    let addr = format!("{}:{}", config.bind, config.port);

    let state = AppState::new(config, metrics_handle);
    let registry = state.registry.clone();
    let app = build_router(state);

    let listener = match tokio::net::TcpListener::bind(addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind to address {addr}: {e}");
            return Err(e.into());
        }
    };

    info!("streamgate listening on http://{addr}");

    let result = axum::serve(listener, app).await;
    registry.shutdown().await;

    if let Err(e) = result {
        error!("server error: {e}");
        return Err(e.into());
    }

    Ok(())
}
