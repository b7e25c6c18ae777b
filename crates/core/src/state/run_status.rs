//! Terminal status records for runs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::db::RunDb;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub status: RunStatus,
    pub outputs: Value,
    pub updated_at: DateTime<Utc>,
}

/// External run-tracking record
#[async_trait]
pub trait RunStatusStore: Send + Sync {
    async fn mark(&self, run_id: &str, status: RunStatus, outputs: &Value) -> Result<()>;
}

pub struct SqliteRunStatusStore {
    db: Arc<RunDb>,
}

impl SqliteRunStatusStore {
    pub fn new(db: Arc<RunDb>) -> Self {
        Self { db }
    }

    pub fn load(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let conn = self.db.connection();
        let conn = conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let row = conn
            .query_row(
                "SELECT status, outputs_json, updated_at FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query run record")?;

        let Some((status, outputs_json, updated_at)) = row else {
            return Ok(None);
        };

        Ok(Some(RunRecord {
            run_id: run_id.to_string(),
            status: RunStatus::parse(&status)
                .ok_or_else(|| anyhow::anyhow!("Unknown run status '{}'", status))?,
            outputs: serde_json::from_str(&outputs_json).context("Corrupt run outputs")?,
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .context("Corrupt run timestamp")?
                .with_timezone(&Utc),
        }))
    }
}

#[async_trait]
impl RunStatusStore for SqliteRunStatusStore {
    async fn mark(&self, run_id: &str, status: RunStatus, outputs: &Value) -> Result<()> {
        let conn = self.db.connection();
        let conn = conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        conn.execute(
            "INSERT OR REPLACE INTO runs (run_id, status, outputs_json, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                run_id,
                status.as_str(),
                serde_json::to_string(outputs)?,
                Utc::now().to_rfc3339()
            ],
        )
        .context("Failed to write run record")?;

        Ok(())
    }
}
