//! # Durable Client
//!
//! Bounded-concurrency, retrying wrapper around the remote persistence API.
//!
//! A single counting semaphore is shared by every clone of the client, so the
//! number of in-flight remote calls is capped process-wide no matter how many
//! tasks are persisting at once. A permit is held for one attempt only and is
//! released before backing off.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::error::RemoteError;

/// One outbound create against the remote API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
    pub operation: String,
    pub payload: Value,
    /// Lets the remote collapse a retried create into the original one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl RemoteRequest {
    pub fn create(operation: impl Into<String>, payload: Value) -> Self {
        Self {
            operation: operation.into(),
            payload,
            idempotency_key: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Safe to replay after an ambiguous failure
    pub fn is_idempotent(&self) -> bool {
        self.idempotency_key.is_some()
    }
}

/// What the remote answered
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteResponse {
    /// Identifier of the object the call created or touched
    pub id: Option<String>,
    #[serde(default)]
    pub body: Value,
}

/// The remote persistence API. Reached only through [`DurableClient`].
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn send(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteError>;
}

/// Exponential backoff with symmetric jitter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay added or removed at random (0.25 = ±25%)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// `base_delay * 2^(attempt-1)`, capped at `max_delay`. `attempt` is 1-based.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Backoff with jitter applied
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        if self.jitter <= 0.0 {
            return backoff;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        backoff.mul_f64(factor)
    }
}

/// Retrying client with a process-wide concurrency cap
#[derive(Clone)]
pub struct DurableClient {
    api: Arc<dyn RemoteApi>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    retry: RetryPolicy,
}

impl DurableClient {
    pub fn new(api: Arc<dyn RemoteApi>, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            api,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Send `request`, retrying transient failures up to `max_attempts` total attempts.
    ///
    /// Terminal errors return immediately. A create without an idempotency key
    /// is not replayed when the failure means the write may already have landed.
    #[tracing::instrument(skip(self, request), fields(operation = %request.operation))]
    pub async fn call(
        &self,
        request: &RemoteRequest,
        max_attempts: u32,
    ) -> Result<RemoteResponse, RemoteError> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|_| RemoteError::Other("client semaphore closed".to_string()))?;
                self.api.send(request).await
            };

            let err = match result {
                Ok(response) => return Ok(response),
                Err(err) => err,
            };

            if !err.is_retryable() {
                tracing::debug!(error = %err, "Terminal remote error, not retrying");
                return Err(err);
            }
            if !request.is_idempotent() && err.may_have_applied() {
                tracing::warn!(
                    error = %err,
                    "Create without idempotency key may have been applied, not retrying"
                );
                return Err(err);
            }
            if attempt >= max_attempts {
                tracing::warn!(
                    attempts = attempt,
                    error = %err,
                    "Remote call failed after final attempt"
                );
                return Err(err);
            }

            let delay = self.retry.delay_for_attempt(attempt);
            tracing::warn!(
                attempt,
                max_attempts,
                wait_ms = delay.as_millis() as u64,
                error = %err,
                "Retryable remote error, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
