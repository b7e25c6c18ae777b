//! # Run Orchestration
//!
//! ## Pipeline Flow
//!
//! ```text
//! Goal → Plan → Execute(N) → Plan dependents (per result) → Execute(M) → Persist
//! ```
//!
//! - `orchestrator` - the phase sequencer
//! - `fanout` - concurrent phase execution with per-task failure capture
//! - `pipeline` - run state machine
//! - `events` / `progress` - lifecycle events and the sinks they go to

pub mod events;
pub mod fanout;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;

pub use events::{
    EventBody, LogEvent, PhaseEvent, PhaseStatus, ProgressEvent, TaskEvent, TaskStatus,
};
pub use fanout::{run_phase, TaskLabel};
pub use orchestrator::{new_run_id, Orchestrator, RunRequest, RunSummary};
pub use pipeline::{Pipeline, PipelineStage};
pub use progress::{BroadcastSink, ProgressSink, ProgressTracker, TracingSink};
