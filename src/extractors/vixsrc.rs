//! VixSrc extractor (§4.1, SPEC_FULL.md §4.1 "VixSrc"): URL passthrough with
//! an `is_vixsrc` flag threaded to the HLS rewriter's quality-filter branch
//! (§4.3, Open Question (a)), grounded in `original_source/extractors/vixsrc.py`.

use super::core::SiteRecipe;
use super::{EndpointKind, ResolvedStream};
use crate::error::Result;
use crate::util::FORCED_USER_AGENT;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use url::Url;

pub struct VixSrcRecipe;

#[async_trait]
impl SiteRecipe for VixSrcRecipe {
    fn family(&self) -> &'static str {
        "vixsrc"
    }

    async fn resolve(&self, _client: &Client, _proxy: Option<&str>, url: &str) -> Result<ResolvedStream> {
        let origin = Url::parse(url)
            .map(|u| format!("{}://{}", u.scheme(), u.host_str().unwrap_or("")))
            .unwrap_or_else(|_| url.to_string());

        let mut headers = HashMap::new();
        headers.insert("user-agent".to_string(), FORCED_USER_AGENT.to_string());
        headers.insert("referer".to_string(), origin);

        Ok(ResolvedStream { destination_url: url.to_string(), request_headers: headers, endpoint_kind: EndpointKind::HlsManifestProxy })
    }
}
