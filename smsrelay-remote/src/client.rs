use crate::session::{is_token_expired, TokenSource};
use crate::types::{SmsRequestDto, StatusUpdate};
use async_trait::async_trait;
use smsrelay::config::normalize_base_url;
use smsrelay::{MessageRequest, Outcome, RelayError, RemoteQueueClient, RequestId, Result};
use std::sync::Arc;
use std::time::Duration;

/// HTTP client for the backend's message request queue.
pub struct HttpQueueClient {
    base_url: String,
    http_client: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
}

impl HttpQueueClient {
    pub fn new(base_url: &str, tokens: Arc<dyn TokenSource>, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: normalize_base_url(base_url),
            http_client,
            tokens,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{base}/sms-requests[/{id}]`. The id is pushed as a single
    /// percent-encoded path segment, so `/` or `..` in it stay inside it.
    fn requests_url(&self, id: Option<&RequestId>) -> std::result::Result<reqwest::Url, String> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| format!("invalid base URL {}: {}", self.base_url, e))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| format!("base URL {} cannot take a path", self.base_url))?;
            segments.pop_if_empty().push("sms-requests");
            if let Some(id) = id {
                segments.push(id.as_str());
            }
        }
        Ok(url)
    }

    /// A usable bearer token, or `None` when there is none or it expired.
    fn bearer(&self) -> Option<String> {
        let token = self.tokens.token()?;
        if is_token_expired(&token) {
            tracing::warn!("[REMOTE] Session token expired, skipping request");
            return None;
        }
        Some(token)
    }
}

#[async_trait]
impl RemoteQueueClient for HttpQueueClient {
    async fn fetch_pending(&self) -> Result<Vec<MessageRequest>> {
        let token = self
            .bearer()
            .ok_or_else(|| RelayError::Fetch("no valid session token".to_string()))?;
        let url = self.requests_url(None).map_err(RelayError::Fetch)?;

        let response = self
            .http_client
            .get(url.clone())
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| RelayError::Fetch(format!("Failed to fetch {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(RelayError::Fetch(format!(
                "Backend returned error: {}",
                response.status()
            )));
        }

        // Rows are decoded one by one so a single malformed row cannot
        // block the rest of the queue.
        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| RelayError::Fetch(format!("Failed to parse message requests: {}", e)))?;

        let total = rows.len();
        let requests: Vec<MessageRequest> = rows
            .into_iter()
            .enumerate()
            .filter_map(|(index, row)| match serde_json::from_value::<SmsRequestDto>(row) {
                Ok(dto) => Some(MessageRequest::from(dto)),
                Err(e) => {
                    tracing::warn!(
                        "[REMOTE] Skipping malformed message request at index {}: {}",
                        index,
                        e
                    );
                    None
                }
            })
            .collect();

        tracing::debug!(
            "[REMOTE] Fetched {} message request(s), {} skipped",
            requests.len(),
            total - requests.len()
        );
        Ok(requests)
    }

    async fn push_status(&self, id: &RequestId, outcome: Outcome) -> Result<()> {
        let token = self
            .bearer()
            .ok_or_else(|| RelayError::Push("no valid session token".to_string()))?;
        let url = self.requests_url(Some(id)).map_err(RelayError::Push)?;

        let response = self
            .http_client
            .put(url)
            .bearer_auth(token)
            .json(&StatusUpdate { status: outcome })
            .send()
            .await
            .map_err(|e| RelayError::Push(format!("Failed to update request {}: {}", id, e)))?;

        if !response.status().is_success() {
            return Err(RelayError::Push(format!(
                "Backend returned error for request {}: {}",
                id,
                response.status()
            )));
        }

        tracing::debug!("[REMOTE] Request {} updated to {}", id, outcome);
        Ok(())
    }
}
