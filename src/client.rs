// src/client.rs
//
// Shared HTTP client speaking the file-server wire contract. All request
// tasks clone one client so connections are pooled across the run.

use anyhow::{Context, Result};
use reqwest::StatusCode;
use tracing::debug;

use crate::config::EndpointConfig;
use crate::constants::{POOL_MAX_IDLE_PER_HOST, REQUEST_TIMEOUT};

/// One raw HTTP exchange: the final status and whatever body came back.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub status: StatusCode,
    pub body: String,
}

#[derive(Clone)]
pub struct FileServerClient {
    http: reqwest::Client,
    endpoint: EndpointConfig,
}

impl FileServerClient {
    pub fn new(endpoint: EndpointConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, endpoint })
    }

    pub fn file_url(&self, file_name: &str) -> String {
        self.endpoint.file_url(file_name)
    }

    /// GET the stored bytes for `file_name`.
    pub async fn get(&self, file_name: &str) -> Result<Exchange> {
        debug!("GET {}", file_name);
        let resp = self
            .http
            .get(self.file_url(file_name))
            .send()
            .await
            .context("GET request failed")?;
        Self::finish(resp).await
    }

    /// PUT `body` as the new contents of `file_name`.
    pub async fn put(&self, file_name: &str, body: String) -> Result<Exchange> {
        debug!("PUT {} ({} bytes)", file_name, body.len());
        let resp = self
            .http
            .put(self.file_url(file_name))
            .body(body)
            .send()
            .await
            .context("PUT request failed")?;
        Self::finish(resp).await
    }

    /// DELETE `file_name`.
    pub async fn delete(&self, file_name: &str) -> Result<Exchange> {
        debug!("DELETE {}", file_name);
        let resp = self
            .http
            .delete(self.file_url(file_name))
            .send()
            .await
            .context("DELETE request failed")?;
        Self::finish(resp).await
    }

    async fn finish(resp: reqwest::Response) -> Result<Exchange> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .context("failed to read response body")?;
        Ok(Exchange { status, body })
    }
}
