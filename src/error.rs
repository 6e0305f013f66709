//! Crate-wide error type and its HTTP mapping.
//!
//! Every fallible path in the crate returns `Result<T, ProxyError>` (aliased as
//! `Result<T>` here) so that handlers can simply `?`-propagate and let
//! `IntoResponse` perform the status-code mapping in one place.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{debug, error, warn};

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("extractor error: {0}")]
    Extractor(String),

    #[error("upstream transient failure: {0}")]
    UpstreamTransient(String),

    #[error("upstream forbidden")]
    UpstreamForbidden,

    #[error("client disconnected")]
    ClientGone,

    #[error("upstream disconnected mid-stream")]
    UpstreamGone,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid origin: {0}")]
    InvalidOrigin(String),

    #[error("playlist parse error: {0}")]
    PlaylistParseError(String),

    #[error("playlist modify error: {0}")]
    PlaylistModifyError(String),

    #[error("conversion error: {0}")]
    ConversionError(String),

    #[error("origin fetch error: {0}")]
    OriginFetchError(#[from] reqwest::Error),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match &self {
            ProxyError::ClientGone => {
                debug!("client disconnected");
                return (StatusCode::from_u16(499).unwrap(), "").into_response();
            }
            ProxyError::UpstreamForbidden => {
                warn!("upstream returned forbidden");
            }
            ProxyError::UpstreamTransient(msg) => {
                warn!("upstream transient failure: {msg}");
            }
            ProxyError::BadRequest(msg) => {
                warn!("bad request: {msg}");
            }
            ProxyError::Unauthorized => {
                warn!("unauthorized request");
            }
            ProxyError::InvalidOrigin(msg) => {
                warn!("invalid origin rejected: {msg}");
            }
            ProxyError::UpstreamGone => {
                error!("upstream disconnected mid-stream");
            }
            other => {
                error!("unhandled error: {other}");
            }
        }

        let (status, body) = match self {
            ProxyError::Extractor(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ProxyError::UpstreamTransient(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ProxyError::UpstreamForbidden => (
                StatusCode::SERVICE_UNAVAILABLE,
                "upstream forbidden".to_string(),
            ),
            ProxyError::ClientGone => unreachable!("handled above"),
            ProxyError::UpstreamGone => (
                StatusCode::BAD_GATEWAY,
                "upstream disconnected".to_string(),
            ),
            ProxyError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ProxyError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "invalid API password".to_string(),
            ),
            ProxyError::InvalidOrigin(msg) => (StatusCode::BAD_REQUEST, msg),
            ProxyError::PlaylistParseError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ProxyError::PlaylistModifyError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ProxyError::ConversionError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ProxyError::OriginFetchError(e) => (StatusCode::BAD_GATEWAY, e.to_string()),
            ProxyError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, body).into_response()
    }
}
