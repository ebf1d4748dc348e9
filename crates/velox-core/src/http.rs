//! HTTP client facade.
//!
//! Wraps `reqwest` with the two operations the rest of the engine needs:
//! probing a URL for size/range-support, and opening a ranged streaming
//! GET. Kept as its own module so the controller and worker never touch
//! `reqwest` headers directly.

use crate::error::VeloxError;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{info, warn};
use velox_types::ProbeInfo;

const HEAD_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const TOTAL_TIMEOUT: Duration = Duration::from_secs(120);

pub fn build_client(user_agent: &str) -> Result<Client, VeloxError> {
    let mut builder = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(TOTAL_TIMEOUT);
    if !user_agent.is_empty() {
        builder = builder.user_agent(user_agent.to_string());
    }
    builder
        .build()
        .map_err(|e| VeloxError::Unknown(format!("failed to build HTTP client: {e}")))
}

/// Probe a URL for size and range support.
///
/// Tries HEAD first. If HEAD doesn't return `Content-Length` (common on
/// redirecting CDNs — GitHub releases among them), falls back to a
/// `Range: bytes=0-0` GET and reads `Content-Range`/`Content-Length` from
/// that response instead. This fallback is a supplement over a bare HEAD
/// probe, grounded in the teacher's `probe_url`.
pub async fn probe_size(client: &Client, url: &str) -> Result<ProbeInfo, VeloxError> {
    info!("probing {url}");

    let head = client
        .head(url)
        .timeout(HEAD_TIMEOUT)
        .send()
        .await?;

    let final_url = head.url().to_string();
    let mut total_size = head
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok());
    let content_type = head
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let mut supports_range = head
        .headers()
        .get(reqwest::header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(|s| s == "bytes")
        .unwrap_or(false);

    if total_size.is_none() {
        info!("HEAD on {final_url} had no Content-Length, trying partial GET");
        match client
            .get(&final_url)
            .header(reqwest::header::RANGE, "bytes=0-0")
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status();
                if status == StatusCode::PARTIAL_CONTENT {
                    supports_range = true;
                    if let Some(size) = parse_content_range_total(&response) {
                        total_size = Some(size);
                    }
                } else if status == StatusCode::OK {
                    supports_range = false;
                    total_size = response
                        .headers()
                        .get(reqwest::header::CONTENT_LENGTH)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse().ok());
                }
            }
            Err(e) => warn!("partial GET probe failed, continuing without size: {e}"),
        }
    }

    let file_name = velox_types::file_name_from_url(&final_url);

    Ok(ProbeInfo {
        url: url.to_string(),
        final_url: Some(final_url),
        file_name,
        total_size,
        supports_range,
        content_type,
    })
}

fn parse_content_range_total(response: &reqwest::Response) -> Option<u64> {
    let value = response
        .headers()
        .get(reqwest::header::CONTENT_RANGE)?
        .to_str()
        .ok()?;
    let total = value.rsplit('/').next()?;
    if total == "*" {
        return None;
    }
    total.parse().ok()
}

/// Open a streaming GET for a byte range. `end` is inclusive; `None` means
/// open-ended (`Range: bytes=start-`).
pub async fn open_ranged_stream(
    client: &Client,
    url: &str,
    start: u64,
    end: Option<u64>,
) -> Result<reqwest::Response, VeloxError> {
    let range = match end {
        Some(end) => format!("bytes={start}-{end}"),
        None if start == 0 => String::new(),
        None => format!("bytes={start}-"),
    };

    let mut request = client.get(url);
    if !range.is_empty() {
        request = request.header(reqwest::header::RANGE, range);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() && status != StatusCode::PARTIAL_CONTENT {
        return Err(VeloxError::ServerError {
            status: status.as_u16(),
            message: format!("ranged GET failed for bytes {start}-{end:?}"),
        });
    }
    Ok(response)
}
