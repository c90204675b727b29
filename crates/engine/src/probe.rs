//! HEAD/GET-with-Range probe; derives total size and range support
//! (spec §4.C).

use crate::error::{EngineError, Result};
use reqwest::Client;

/// Result of probing a URL before planning chunks.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// Total content length, if the server advertised one.
    pub total_size: Option<u64>,
    /// Whether the server is willing to serve `Range: bytes=a-b` requests.
    pub accept_range: bool,
    /// The URL after following redirects.
    pub effective_url: String,
}

/// Issue a HEAD request, falling back to a ranged GET probe for servers
/// that advertise size without an explicit `Accept-Ranges` header
/// (grounded on `chunked.rs::get_file_info`, extended with the ranged-GET
/// fallback per spec §4.C "successful 206 response to a probe range").
pub async fn probe(client: &Client, url: &str) -> Result<ProbeResult> {
    let response = client.head(url).send().await.map_err(map_probe_error)?;

    if response.status().is_client_error() || response.status().is_server_error() {
        return Err(EngineError::HttpStatus {
            status: response.status().as_u16(),
            url: url.to_string(),
        });
    }

    let effective_url = response.url().to_string();
    let total_size = response.content_length();
    let accept_range = response
        .headers()
        .get(reqwest::header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("bytes"))
        .unwrap_or(false);

    if accept_range || total_size.is_none() {
        return Ok(ProbeResult {
            total_size,
            accept_range,
            effective_url,
        });
    }

    // Some servers omit Accept-Ranges on HEAD but honor a ranged GET; probe
    // a single byte to find out rather than trusting the absent header.
    let probe_response = client
        .get(url)
        .header(reqwest::header::RANGE, "bytes=0-0")
        .send()
        .await
        .map_err(map_probe_error)?;

    let accept_range = probe_response.status().as_u16() == 206;

    Ok(ProbeResult {
        total_size,
        accept_range,
        effective_url,
    })
}

fn map_probe_error(err: reqwest::Error) -> EngineError {
    EngineError::from(err)
}
