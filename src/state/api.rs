//! Score API client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::error::ApiError;

/// JSON body of the submit-score request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubmitBody {
    pub score: u64,
    pub time: u32,
}

/// Everything needed to issue one submit-score request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub url: String,
    pub auth_token: String,
    pub body: SubmitBody,
}

/// Raw response. Interpretation is left to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Issues submit-score requests.
#[async_trait]
pub trait ScoreApi: Send + Sync {
    async fn submit(&self, request: &SubmitRequest) -> Result<ApiResponse, ApiError>;
}

/// `reqwest`-backed implementation.
#[derive(Debug, Clone)]
pub struct HttpScoreApi {
    client: reqwest::Client,
}

impl HttpScoreApi {
    pub fn new(timeout: Duration) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ScoreApi for HttpScoreApi {
    async fn submit(&self, request: &SubmitRequest) -> Result<ApiResponse, ApiError> {
        let response = self
            .client
            .post(&request.url)
            .bearer_auth(&request.auth_token)
            .json(&request.body)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(status, error = %e, "failed to read submit-score response body");
                String::new()
            }
        };

        Ok(ApiResponse { status, body })
    }
}
