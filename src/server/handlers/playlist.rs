//! `/playlist` (§4.9, §6): downloads every definition in parallel and
//! streams back one merged M3U playlist.

use crate::error::Result;
use crate::playlist::{compose, parse_definitions, ComposeContext, PlaylistInput};
use crate::server::params;
use crate::server::state::AppState;
use crate::server::url_validation::validate_origin_url;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::future::join_all;
use std::collections::HashMap;

pub async fn build(State(state): State<AppState>, Query(query): Query<HashMap<String, String>>) -> Result<Response> {
    let raw = query.get("url").or_else(|| query.get("d")).cloned().unwrap_or_default();
    let api_password = params::api_password_param(&query);
    let definitions = parse_definitions(&raw);

    let fetches = definitions.into_iter().map(|definition| {
        let client = state.http_client.clone();
        async move {
            if validate_origin_url(&definition.url).is_err() {
                return PlaylistInput { definition, body: None };
            }
            let resp = client.get(&definition.url).send().await.ok();
            let body = match resp {
                Some(resp) if resp.status().is_success() => resp.text().await.ok(),
                _ => None,
            };
            PlaylistInput { definition, body }
        }
    });

    let inputs: Vec<PlaylistInput> = join_all(fetches).await;

    let ctx = ComposeContext {
        proxy_base: &state.config.base_url,
        api_password: api_password.as_deref(),
    };
    let body = compose(&inputs, &ctx);

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")],
        body,
    )
        .into_response())
}
