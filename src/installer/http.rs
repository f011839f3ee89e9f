//! HTTP seam for the catalog feed and the direct download fallback.
//!
//! Every call blocks until the response body is read, so the caller never has
//! more than one request in flight.

use crate::model::config::DownloadConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl FetchResponse {
    /// 200 and 302 count as success, matching what the raw endpoints return.
    pub fn is_success(&self) -> bool {
        matches!(self.status, 200 | 302)
    }
}

/// The request never produced a status code.
#[derive(Debug, thiserror::Error)]
#[error("request to {url} failed: {reason}")]
pub struct FetchError {
    pub url: String,
    pub reason: String,
}

pub trait Fetcher {
    fn get(&self, url: &str) -> Result<FetchResponse, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new(config: &DownloadConfig) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout())
            .build()
            .map_err(|err| FetchError {
                url: String::new(),
                reason: format!("failed to build HTTP client: {err}"),
            })?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn get(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let failed = |err: reqwest::Error| FetchError {
            url: url.to_string(),
            reason: err.to_string(),
        };

        let response = self.client.get(url).send().map_err(failed)?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(failed)?.to_vec();
        tracing::debug!("GET {url} -> {status} ({} bytes)", body.len());

        Ok(FetchResponse { status, body })
    }
}
