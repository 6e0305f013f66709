//! Manual response-body decoding shared by every scraping recipe that must
//! disable automatic decompression to see the raw anti-bot challenge bytes
//! a site serves (§4.2).

use crate::error::{ProxyError, Result};
use async_compression::tokio::bufread::ZstdDecoder;
use flate2::read::{DeflateDecoder, GzDecoder};
use reqwest::Client;
use std::io::Read;
use tokio::io::{AsyncReadExt, BufReader};

/// GET `url`, honouring `Content-Encoding` by hand rather than relying on
/// reqwest's automatic decompression (not enabled in this build).
pub async fn fetch_decoded_text(client: &Client, url: &str, headers: &[(&str, &str)]) -> Result<String> {
    let mut req = client.get(url).header("Accept-Encoding", "gzip, deflate, zstd");
    for (k, v) in headers {
        req = req.header(*k, *v);
    }
    let resp = req.send().await.map_err(|e| ProxyError::UpstreamTransient(e.to_string()))?;
    if resp.status() == reqwest::StatusCode::FORBIDDEN {
        return Err(ProxyError::UpstreamForbidden);
    }
    let encoding = resp
        .headers()
        .get(reqwest::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = resp.bytes().await.map_err(|e| ProxyError::UpstreamTransient(e.to_string()))?;

    let text = match encoding.as_deref() {
        Some("gzip") => {
            let mut out = String::new();
            GzDecoder::new(&bytes[..])
                .read_to_string(&mut out)
                .map_err(|e| ProxyError::Extractor(format!("gzip decode failed: {e}")))?;
            out
        }
        Some("deflate") => {
            let mut out = String::new();
            DeflateDecoder::new(&bytes[..])
                .read_to_string(&mut out)
                .map_err(|e| ProxyError::Extractor(format!("deflate decode failed: {e}")))?;
            out
        }
        Some("zstd") => {
            let mut decoder = ZstdDecoder::new(BufReader::new(&bytes[..]));
            let mut out = String::new();
            decoder
                .read_to_string(&mut out)
                .await
                .map_err(|e| ProxyError::Extractor(format!("zstd decode failed: {e}")))?;
            out
        }
        _ => String::from_utf8_lossy(&bytes).into_owned(),
    };
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetches_uncompressed_body_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(200).set_body_string("hello")).mount(&server).await;
        let client = Client::new();
        let text = fetch_decoded_text(&client, &server.uri(), &[]).await.unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn forbidden_status_maps_to_upstream_forbidden() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(ResponseTemplate::new(403)).mount(&server).await;
        let client = Client::new();
        let err = fetch_decoded_text(&client, &server.uri(), &[]).await.unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamForbidden));
    }
}
