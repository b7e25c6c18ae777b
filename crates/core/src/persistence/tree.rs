//! Tree writes: one remote target, then its children in caller order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::client::{DurableClient, RemoteRequest};

/// Remote container that a result's children are written under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceTarget {
    pub id: String,
    pub work_item_id: String,
}

/// One child write under a target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Writable {
    /// Local key, unique within the tree
    pub key: String,
    /// Remote operation, e.g. `create_section`
    pub operation: String,
    pub payload: Value,
    /// Key of an earlier write this one references
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_key: Option<String>,
}

impl Writable {
    pub fn new(key: impl Into<String>, operation: impl Into<String>, payload: Value) -> Self {
        Self {
            key: key.into(),
            operation: operation.into(),
            payload,
            parent_key: None,
        }
    }

    pub fn under(mut self, parent_key: impl Into<String>) -> Self {
        self.parent_key = Some(parent_key.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrittenChild {
    pub key: String,
    pub remote_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistFailure {
    pub key: String,
    pub error: String,
}

impl std::fmt::Display for PersistFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.key, self.error)
    }
}

/// What a tree write achieved; partial success is reported, not hidden
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistOutcome {
    pub target: PersistenceTarget,
    pub written: Vec<WrittenChild>,
    pub failures: Vec<PersistFailure>,
}

impl PersistOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

impl DurableClient {
    /// Write `items` under `target` sequentially, in the order given.
    ///
    /// A failed write is recorded and its siblings still run. Items whose
    /// `parent_key` refers to a failed write are skipped and recorded as failures.
    #[tracing::instrument(
        skip(self, target, items),
        fields(target = %target.id, items = items.len())
    )]
    pub async fn persist_tree(
        &self,
        target: &PersistenceTarget,
        items: Vec<Writable>,
        max_attempts: u32,
    ) -> PersistOutcome {
        let mut outcome = PersistOutcome {
            target: target.clone(),
            written: Vec::new(),
            failures: Vec::new(),
        };
        let mut remote_ids: HashMap<String, Option<String>> = HashMap::new();

        for item in items {
            let mut payload = match item.payload {
                Value::Object(map) => map,
                other => {
                    let mut map = serde_json::Map::new();
                    map.insert("value".to_string(), other);
                    map
                }
            };
            payload.insert("target_id".to_string(), Value::String(target.id.clone()));

            if let Some(parent_key) = &item.parent_key {
                match remote_ids.get(parent_key) {
                    Some(Some(parent_id)) => {
                        payload.insert("parent_id".to_string(), Value::String(parent_id.clone()));
                    }
                    Some(None) => {
                        outcome.failures.push(PersistFailure {
                            key: item.key,
                            error: format!("parent '{}' returned no remote id", parent_key),
                        });
                        continue;
                    }
                    None => {
                        outcome.failures.push(PersistFailure {
                            key: item.key,
                            error: format!("skipped: parent '{}' was not written", parent_key),
                        });
                        continue;
                    }
                }
            }

            let request = RemoteRequest::create(item.operation, Value::Object(payload))
                .with_idempotency_key(format!("{}:{}", target.id, item.key));

            match self.call(&request, max_attempts).await {
                Ok(response) => {
                    remote_ids.insert(item.key.clone(), response.id.clone());
                    outcome.written.push(WrittenChild {
                        key: item.key,
                        remote_id: response.id,
                    });
                }
                Err(e) => {
                    tracing::warn!(key = %item.key, error = %e, "Child write failed, continuing");
                    outcome.failures.push(PersistFailure {
                        key: item.key,
                        error: e.to_string(),
                    });
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::client::{RemoteApi, RemoteResponse};
    use crate::persistence::error::RemoteError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Records requests, rejects any whose key contains "bad"
    struct RecordingApi {
        seen: Mutex<Vec<RemoteRequest>>,
    }

    #[async_trait]
    impl RemoteApi for RecordingApi {
        async fn send(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteError> {
            self.seen.lock().unwrap().push(request.clone());
            let key = request.idempotency_key.clone().unwrap_or_default();
            if key.contains("bad") {
                return Err(RemoteError::Validation("rejected".to_string()));
            }
            Ok(RemoteResponse {
                id: Some(format!("remote-{}", key)),
                body: Value::Null,
            })
        }
    }

    fn target() -> PersistenceTarget {
        PersistenceTarget {
            id: "report-1".to_string(),
            work_item_id: "a-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_children_written_in_order_with_parent_ids() {
        let api = Arc::new(RecordingApi {
            seen: Mutex::new(Vec::new()),
        });
        let client = DurableClient::new(api.clone(), 2);

        let items = vec![
            Writable::new("section", "create_section", json!({ "title": "Findings" })),
            Writable::new("block", "create_block", json!({ "text": "..." })).under("section"),
        ];
        let outcome = client.persist_tree(&target(), items, 1).await;

        assert!(outcome.is_complete());
        let seen = api.seen.lock().unwrap();
        assert_eq!(seen[0].operation, "create_section");
        assert_eq!(seen[1].operation, "create_block");
        assert_eq!(seen[1].payload["target_id"], json!("report-1"));
        assert_eq!(seen[1].payload["parent_id"], json!("remote-report-1:section"));
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_siblings() {
        let api = Arc::new(RecordingApi {
            seen: Mutex::new(Vec::new()),
        });
        let client = DurableClient::new(api.clone(), 2);

        let items = vec![
            Writable::new("bad-section", "create_section", json!({})),
            Writable::new("block", "create_block", json!({})).under("bad-section"),
            Writable::new("source", "create_source", json!({ "url": "x" })),
        ];
        let outcome = client.persist_tree(&target(), items, 1).await;

        assert_eq!(outcome.written.len(), 1);
        assert_eq!(outcome.written[0].key, "source");
        assert_eq!(outcome.failures.len(), 2);
        assert!(outcome.failures[1].error.contains("skipped"));
        // the dependent block never reached the remote
        assert_eq!(api.seen.lock().unwrap().len(), 2);
    }
}
