use anyhow::{Context, Result};
use bytes::Bytes;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, de::DeserializeOwned};
use std::time::Duration;
use tessera_core::ArtifactDescriptor;
use tessera_core::upload::{
    ChunkUploadResponse, InitUploadRequest, InitUploadResponse, UploadStatusResponse,
};

/// Retry policy for idempotent requests (chunk writes and status reads).
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before the first retry; doubled on every further attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Error body rendered by the server for every failed request.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

/// A non-success response from the server.
#[derive(Debug, thiserror::Error)]
#[error("API error ({status}): {message}")]
pub struct ApiFailure {
    pub status: StatusCode,
    pub code: Option<String>,
    pub message: String,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid server URL")?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            token: token.map(str::to_string),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("failed to build API URL")
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let failure = match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(parsed) => ApiFailure {
                status,
                code: Some(parsed.code),
                message: parsed.message,
            },
            Err(_) => ApiFailure {
                status,
                code: None,
                message: body,
            },
        };
        Err(failure.into())
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let response = self.authorize(req).send().await?;
        let response = Self::check(response).await?;
        Ok(response.json::<T>().await?)
    }

    async fn send_empty(&self, req: reqwest::RequestBuilder) -> Result<()> {
        let response = self.authorize(req).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Retries on transport errors and 5xx responses. Returns immediately on
    /// success or 4xx (client errors that won't resolve with retries).
    async fn send_with_retry<F>(&self, make_request: F) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0;

        loop {
            match self.authorize(make_request()).send().await {
                Ok(response) if response.status().is_server_error() => {
                    attempt += 1;
                    if attempt > self.retry.max_retries {
                        return Self::check(response).await;
                    }
                    let delay = self.backoff(attempt);
                    tracing::warn!(status = %response.status(), ?delay, "Server error, retrying");
                    tokio::time::sleep(delay).await;
                }
                Ok(response) => return Self::check(response).await,
                Err(e) => {
                    attempt += 1;
                    if attempt > self.retry.max_retries {
                        return Err(e.into());
                    }
                    let delay = self.backoff(attempt);
                    tracing::warn!(error = %e, ?delay, "Request error, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.retry
            .base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.url("/v1/health")?;
        let response = self.http.get(url).send().await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn whoami(&self) -> Result<WhoamiResponse> {
        let url = self.url("/v1/auth/whoami")?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn init_upload(&self, req: &InitUploadRequest) -> Result<InitUploadResponse> {
        let url = self.url("/v1/uploads")?;
        self.send_json(self.http.post(url).json(req)).await
    }

    /// Upload one chunk. Chunk writes are idempotent, so failures are retried.
    pub async fn upload_chunk(
        &self,
        session_id: &str,
        index: u32,
        total_chunks: u32,
        data: Bytes,
    ) -> Result<ChunkUploadResponse> {
        let mut url = self.url(&format!("/v1/uploads/{session_id}/chunks/{index}"))?;
        url.query_pairs_mut()
            .append_pair("total_chunks", &total_chunks.to_string());

        let response = self
            .send_with_retry(|| {
                self.http
                    .put(url.clone())
                    .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                    .body(data.clone())
            })
            .await?;
        Ok(response.json().await?)
    }

    pub async fn upload_status(&self, session_id: &str) -> Result<UploadStatusResponse> {
        let url = self.url(&format!("/v1/uploads/{session_id}"))?;
        let response = self.send_with_retry(|| self.http.get(url.clone())).await?;
        Ok(response.json().await?)
    }

    pub async fn merge(&self, session_id: &str) -> Result<ArtifactDescriptor> {
        let url = self.url(&format!("/v1/uploads/{session_id}/merge"))?;
        self.send_json(self.http.post(url)).await
    }

    pub async fn abort(&self, session_id: &str) -> Result<()> {
        let url = self.url(&format!("/v1/uploads/{session_id}"))?;
        self.send_empty(self.http.delete(url)).await
    }
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Deserialize)]
pub struct WhoamiResponse {
    pub principal: String,
    pub authenticated_via: String,
}
