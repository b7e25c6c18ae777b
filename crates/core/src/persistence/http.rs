//! HTTP transport for the remote persistence API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

use super::client::{RemoteApi, RemoteRequest, RemoteResponse};
use super::error::RemoteError;

/// `POST {base_url}/{operation}` with `{operation, payload}`
pub struct HttpRemoteApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemoteApi {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("tessera/0.1")
            .build()
            .context("Failed to create HTTP client for remote API")?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url_for(&self, operation: &str) -> String {
        format!("{}/{}", self.base_url, operation)
    }
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn send(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteError> {
        let mut builder = self
            .client
            .post(self.url_for(&request.operation))
            .json(&json!({ "operation": request.operation, "payload": request.payload }));

        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(key) = &request.idempotency_key {
            builder = builder.header("Idempotency-Key", key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RemoteError::from_transport(&e))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::from_transport(&e))?;

        if !status.is_success() {
            return Err(RemoteError::from_status(status.as_u16(), &text));
        }

        let body: Value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text)
                .map_err(|e| RemoteError::Other(format!("invalid response body: {}", e)))?
        };

        Ok(RemoteResponse {
            id: extract_id(&body),
            body,
        })
    }
}

/// `id` may be a string or a number, top-level or under `data`
fn extract_id(body: &Value) -> Option<String> {
    [&body["id"], &body["data"]["id"]]
        .into_iter()
        .find_map(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}
