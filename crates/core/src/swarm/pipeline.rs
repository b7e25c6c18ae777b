//! # Pipeline Stages
//!
//! The run state machine. Stages only move forward; `Failed` is reachable
//! from anywhere and is terminal, as is `Done`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Goal → work items
    PlanningA,
    /// Work items → results
    ExecutingA,
    /// Results → dependent work items
    PlanningB,
    /// Dependent work items → results
    ExecutingB,
    /// Results → remote store
    Persisting,
    Done,
    Failed,
}

impl PipelineStage {
    /// Number of working phases
    pub const PHASE_TOTAL: usize = 5;

    pub fn phase_name(&self) -> Option<&'static str> {
        match self {
            Self::PlanningA => Some("planning"),
            Self::ExecutingA => Some("execution"),
            Self::PlanningB => Some("dependent_planning"),
            Self::ExecutingB => Some("dependent_execution"),
            Self::Persisting => Some("persistence"),
            Self::Done | Self::Failed => None,
        }
    }

    /// 1-based position among the working phases
    pub fn phase_index(&self) -> Option<usize> {
        match self {
            Self::PlanningA => Some(1),
            Self::ExecutingA => Some(2),
            Self::PlanningB => Some(3),
            Self::ExecutingB => Some(4),
            Self::Persisting => Some(5),
            Self::Done | Self::Failed => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    pub stage: PipelineStage,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            stage: PipelineStage::PlanningA,
        }
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move to the next stage; terminal stages stay put
    pub fn advance(&mut self) {
        self.stage = match self.stage {
            PipelineStage::PlanningA => PipelineStage::ExecutingA,
            PipelineStage::ExecutingA => PipelineStage::PlanningB,
            PipelineStage::PlanningB => PipelineStage::ExecutingB,
            PipelineStage::ExecutingB => PipelineStage::Persisting,
            PipelineStage::Persisting => PipelineStage::Done,
            PipelineStage::Done => PipelineStage::Done,
            PipelineStage::Failed => PipelineStage::Failed,
        };
    }

    pub fn fail(&mut self) {
        self.stage = PipelineStage::Failed;
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.stage, PipelineStage::Done | PipelineStage::Failed)
    }

    pub fn is_success(&self) -> bool {
        self.stage == PipelineStage::Done
    }
}
