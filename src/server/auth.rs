//! API-password gate (§6: `api_password` query param or `x-api-password`
//! header, compared against `Config.api_password`). Applied as middleware
//! ahead of every route rather than duplicated per handler.

use crate::error::{ProxyError, Result};
use crate::server::state::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

fn password_from_query(query: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "api_password")
        .map(|(_, v)| v.into_owned())
}

pub async fn require_api_password(State(state): State<AppState>, req: Request, next: Next) -> Result<Response> {
    let Some(expected) = &state.config.api_password else {
        return Ok(next.run(req).await);
    };

    let header_password = req
        .headers()
        .get("x-api-password")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let query_password = req.uri().query().and_then(password_from_query);

    let supplied = header_password.or(query_password);
    if supplied.as_deref() == Some(expected.as_str()) {
        Ok(next.run(req).await)
    } else {
        Err(ProxyError::Unauthorized)
    }
}
