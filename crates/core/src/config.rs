//! # Configuration
//!
//! `OrchestratorConfig` is read from `.tessera/config.json`; every field has a
//! default so a partial file (or none at all) is valid. Endpoints and secrets
//! come from the environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::budget::BudgetLimits;
use crate::compaction::CompactionConfig;
use crate::persistence::RetryPolicy;
use crate::tools::PhaseTools;

pub const DEFAULT_CONFIG_PATH: &str = ".tessera/config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Planning output beyond this is truncated
    pub max_planned_items: usize,
    pub max_children_per_parent: usize,
    pub budgets: BudgetLimits,
    pub compaction: CompactionConfig,
    /// Wall-clock bound for each fan-out phase
    pub phase_timeout_secs: u64,
    pub planning_tools: PhaseTools,
    pub execution_tools: PhaseTools,
    pub persistence: PersistenceConfig,
    pub workspace_id: String,
    pub tenant_id: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_planned_items: 10,
            max_children_per_parent: 5,
            budgets: BudgetLimits::default(),
            compaction: CompactionConfig::default(),
            phase_timeout_secs: 600,
            planning_tools: PhaseTools::none(),
            execution_tools: PhaseTools::all(),
            persistence: PersistenceConfig::default(),
            workspace_id: "default".to_string(),
            tenant_id: "default".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from `.tessera/config.json`
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Missing file → defaults; unreadable or malformed file → error
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Malformed config {}", path.display()))
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_secs(self.phase_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Process-wide cap on in-flight remote calls
    pub max_concurrent: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            request_timeout_secs: 30,
        }
    }
}

impl PersistenceConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            ..RetryPolicy::default()
        }
    }
}

/// Where the collaborators live
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub agent_url: String,
    pub remote_url: String,
    pub query_url: Option<String>,
    pub searxng_url: Option<String>,
    pub agent_token: Option<String>,
    pub remote_token: Option<String>,
    pub query_token: Option<String>,
}

impl EndpointConfig {
    /// Read `TESSERA_*` variables
    pub fn from_env() -> Result<Self> {
        let required = |name: &str| {
            std::env::var(name).with_context(|| format!("{} must be set", name))
        };
        let optional = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        Ok(Self {
            agent_url: required("TESSERA_AGENT_URL")?,
            remote_url: required("TESSERA_REMOTE_URL")?,
            query_url: optional("TESSERA_QUERY_URL"),
            searxng_url: optional("TESSERA_SEARXNG_URL"),
            agent_token: optional("TESSERA_AGENT_TOKEN"),
            remote_token: optional("TESSERA_REMOTE_TOKEN"),
            query_token: optional("TESSERA_QUERY_TOKEN"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = OrchestratorConfig::load_from(dir.path().join("config.json")).unwrap();
        assert_eq!(config.max_planned_items, 10);
        assert_eq!(config.compaction.min_rows_to_compact, 20);
        assert_eq!(config.persistence.max_attempts, 4);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let file = config_file(
            r#"{
                "max_planned_items": 3,
                "budgets": { "query_calls": 2 },
                "persistence": { "max_concurrent": 8 }
            }"#,
        );

        let config = OrchestratorConfig::load_from(file.path()).unwrap();
        assert_eq!(config.max_planned_items, 3);
        assert_eq!(config.budgets.query_calls, 2);
        assert_eq!(config.budgets.web_search_calls, 4);
        assert_eq!(config.persistence.max_concurrent, 8);
        assert_eq!(config.persistence.max_attempts, 4);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let file = config_file("{ not json");

        let err = OrchestratorConfig::load_from(file.path()).unwrap_err();
        assert!(err.to_string().contains("Malformed config"));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = PersistenceConfig::default().retry_policy();
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
    }
}
