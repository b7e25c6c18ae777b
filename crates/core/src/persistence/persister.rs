//! Maps work results onto remote trees.

use serde_json::json;

use super::client::{DurableClient, RemoteRequest};
use super::error::RemoteError;
use super::tree::{PersistOutcome, PersistenceTarget, Writable};
use crate::models::{ChildResult, WorkResult};

/// Persists one run's results through a shared [`DurableClient`]
#[derive(Clone)]
pub struct ResultPersister {
    client: DurableClient,
    run_id: String,
    max_attempts: u32,
}

impl ResultPersister {
    pub fn new(client: DurableClient, run_id: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            client,
            run_id: run_id.into(),
            max_attempts,
        }
    }

    /// Create the container for a top-level result.
    ///
    /// The idempotency key is derived from the run and work item, so a replayed
    /// create lands on the same remote object.
    pub async fn create_target(
        &self,
        result: &WorkResult,
    ) -> Result<PersistenceTarget, RemoteError> {
        let request = RemoteRequest::create(
            "create_report",
            json!({
                "run_id": self.run_id,
                "work_item_id": result.work_item_id,
                "title": result.title,
            }),
        )
        .with_idempotency_key(format!("{}:{}", self.run_id, result.work_item_id));

        let response = self.client.call(&request, self.max_attempts).await?;
        let id = response.id.ok_or_else(|| {
            RemoteError::Other(format!(
                "create_report for '{}' returned no id",
                result.work_item_id
            ))
        })?;

        Ok(PersistenceTarget {
            id,
            work_item_id: result.work_item_id.clone(),
        })
    }

    /// Writes for one result: sources first, then a section, then the block
    /// that references the section.
    pub fn writables_for(result: &WorkResult, key_prefix: &str) -> Vec<Writable> {
        let mut items: Vec<Writable> = result
            .used_calls
            .iter()
            .enumerate()
            .map(|(i, call)| {
                Writable::new(
                    format!("{}source-{}", key_prefix, i),
                    "create_source",
                    json!({
                        "tool": call.tool,
                        "summary": call.call_summary,
                        "result_count": call.result_count,
                        "truncated": call.truncated,
                    }),
                )
            })
            .collect();

        let section_key = format!("{}section", key_prefix);
        items.push(Writable::new(
            section_key.clone(),
            "create_section",
            json!({
                "work_item_id": result.work_item_id,
                "title": result.title,
            }),
        ));
        items.push(
            Writable::new(
                format!("{}block", key_prefix),
                "create_block",
                json!({ "content": result.payload }),
            )
            .under(section_key),
        );

        items
    }

    /// Persist a top-level result under its target
    pub async fn persist_result(
        &self,
        target: &PersistenceTarget,
        result: &WorkResult,
    ) -> PersistOutcome {
        self.client
            .persist_tree(target, Self::writables_for(result, ""), self.max_attempts)
            .await
    }

    /// Persist a dependent result under its parent's target
    pub async fn persist_child(
        &self,
        parent: &PersistenceTarget,
        child: &ChildResult,
    ) -> PersistOutcome {
        let prefix = format!("{}/", child.result.work_item_id);
        self.client
            .persist_tree(
                parent,
                Self::writables_for(&child.result, &prefix),
                self.max_attempts,
            )
            .await
    }
}
