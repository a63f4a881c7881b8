use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{
    header::{HeaderMap, HeaderValue, CONTENT_LENGTH, CONTENT_RANGE, COOKIE, RANGE, REFERER},
    StatusCode,
};
use tracing::debug;
use url::Url;

use crate::{
    capture::Cookie,
    error::{AttemptError, DownloadError, ProbeError},
    options::Options,
};

use super::{chunk::ChunkSpec, MediaSource};

/// HTTP access to one remote resource, replaying the captured cookies.
///
/// Built once per job and shared read-only by every worker.
pub struct DownloadClient {
    client: reqwest::Client,
    url: Url,
}

impl DownloadClient {
    pub fn new(url: Url, cookies: &[Cookie], options: &Options) -> Result<Self, DownloadError> {
        let mut headers = HeaderMap::new();
        headers.insert(REFERER, HeaderValue::from_str(&options.referer)?);

        if !cookies.is_empty() {
            let mut cookie = HeaderValue::from_str(&cookie_header(cookies))?;
            cookie.set_sensitive(true);
            headers.insert(COOKIE, cookie);
        }

        let client = reqwest::Client::builder()
            .user_agent(options.user_agent.as_str())
            .default_headers(headers)
            .timeout(options.per_attempt_timeout)
            .build()?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl MediaSource for DownloadClient {
    fn describe(&self) -> String {
        self.url.to_string()
    }

    async fn content_length(&self) -> Result<u64, ProbeError> {
        let response = self.client.head(self.url.clone()).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Status(status));
        }

        let value = response
            .headers()
            .get(CONTENT_LENGTH)
            .ok_or(ProbeError::MissingLength)?;
        let text = value
            .to_str()
            .map_err(|_| ProbeError::InvalidLength(format!("{value:?}")))?;
        let length = text
            .trim()
            .parse::<u64>()
            .map_err(|_| ProbeError::InvalidLength(text.to_string()))?;

        if length == 0 {
            return Err(ProbeError::ZeroLength);
        }

        Ok(length)
    }

    async fn fetch_range(&self, spec: &ChunkSpec) -> Result<Bytes, AttemptError> {
        let response = self
            .client
            .get(self.url.clone())
            .header(RANGE, spec.range_header())
            .send()
            .await?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => {
                if let Some(value) = response.headers().get(CONTENT_RANGE) {
                    let received = value.to_str().unwrap_or_default();
                    if parse_content_range(received) != Some((spec.start, spec.end)) {
                        return Err(AttemptError::RangeMismatch {
                            start: spec.start,
                            end: spec.end,
                            received: received.to_string(),
                        });
                    }
                }
            }
            // a full response is only the requested span if the span starts at zero
            StatusCode::OK if spec.start != 0 => {
                return Err(AttemptError::RangeMismatch {
                    start: spec.start,
                    end: spec.end,
                    received: "full content".to_string(),
                });
            }
            StatusCode::OK => {}
            status => return Err(AttemptError::Status(status)),
        }

        if let Some(announced) = response.content_length() {
            if announced != spec.len() {
                return Err(AttemptError::LengthMismatch {
                    expected: spec.len(),
                    received: announced,
                });
            }
        }

        let bytes = response.bytes().await?;
        if bytes.len() as u64 != spec.len() {
            return Err(AttemptError::LengthMismatch {
                expected: spec.len(),
                received: bytes.len() as u64,
            });
        }

        debug!(chunk = spec.index, bytes = bytes.len(), "range fetched");

        Ok(bytes)
    }
}

fn cookie_header(cookies: &[Cookie]) -> String {
    cookies
        .iter()
        .map(|cookie| format!("{}={}", cookie.name, cookie.value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Parses `bytes <start>-<end>/<total>` into the inclusive range.
fn parse_content_range(value: &str) -> Option<(u64, u64)> {
    let rest = value.trim().strip_prefix("bytes ")?;
    let (range, _total) = rest.split_once('/')?;
    let (start, end) = range.split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}
