//! `/segment/{name}` (§4.4, §6): relay one DASH→HLS segment using the
//! `base_url=` the converter embedded in the media playlist it emitted.

use crate::error::{ProxyError, Result};
use crate::http_retry::{fetch_with_retry, RetryConfig};
use crate::metrics;
use crate::server::params;
use crate::server::relay;
use crate::server::state::AppState;
use crate::server::url_validation::validate_origin_url;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use std::time::Instant;

pub async fn serve_segment(
    Path(name): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Result<Response> {
    let start = Instant::now();

    let base_url = query.get("base_url").cloned().ok_or_else(|| ProxyError::BadRequest("missing 'base_url' parameter".into()))?;
    validate_origin_url(&base_url)?;

    let segment_url = if base_url.ends_with('/') {
        format!("{base_url}{name}")
    } else {
        format!("{base_url}/{name}")
    };

    let headers = params::headers_from_query(&query);
    let family = crate::extractors::registry::detect_from_url(&segment_url);
    let client = relay::client_for(&state.http_client, &state.config, family);

    match fetch_with_retry(&client, &segment_url, &headers, &RetryConfig::default()).await {
        Ok(response) => {
            metrics::record_request("segment", response.status().as_u16());
            metrics::record_duration("segment", start);
            Ok(relay::passthrough_response(response, &segment_url))
        }
        Err(e) => {
            metrics::record_origin_error();
            metrics::record_request("segment", 502);
            metrics::record_duration("segment", start);
            Err(ProxyError::OriginFetchError(e))
        }
    }
}
