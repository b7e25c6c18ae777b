//! # Tessera Models
//!
//! Data carried between phases: planned work, executed results, and the
//! outcome of a fan-out phase.

use serde::{Deserialize, Serialize};

use crate::budget::CallRecord;

/// A planned unit of work. Immutable once planned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub title: String,
    /// Free-form instructions for the executing agent
    #[serde(default)]
    pub spec: serde_json::Value,
}

impl WorkItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>, spec: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            spec,
        }
    }
}

/// Output of executing a [`WorkItem`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkResult {
    pub work_item_id: String,
    pub title: String,
    pub payload: serde_json::Value,
    /// Audit trail of external calls made while producing this result
    #[serde(default)]
    pub used_calls: Vec<CallRecord>,
}

/// A dependent work item, tagged with the result it was planned from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildWorkItem {
    pub parent_id: String,
    pub item: WorkItem,
}

/// Result of executing a [`ChildWorkItem`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildResult {
    pub parent_id: String,
    pub result: WorkResult,
}

/// A single task that did not produce a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub task_id: String,
    pub title: String,
    pub error: String,
}

impl std::fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.task_id, self.title, self.error)
    }
}

/// Everything a parallel phase produced. Never an error on partial failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseOutcome<T> {
    pub successes: Vec<T>,
    pub failures: Vec<TaskFailure>,
}

impl<T> Default for PhaseOutcome<T> {
    fn default() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<T> PhaseOutcome<T> {
    pub fn counts(&self) -> PhaseCounts {
        PhaseCounts {
            succeeded: self.successes.len(),
            failed: self.failures.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.successes.is_empty() && self.failures.is_empty()
    }
}

/// Success/failure tally for one phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseCounts {
    pub succeeded: usize,
    pub failed: usize,
}

impl PhaseCounts {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}
