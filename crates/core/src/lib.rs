//! # Tessera Core
//!
//! Orchestration fabric for agent-driven analysis pipelines: phase
//! sequencing, per-invocation call budgets, result compaction and durable
//! persistence against a flaky remote API.
//!
//! ## Architecture
//!
//! - `swarm/` - Orchestrator, fan-out, pipeline state machine, progress events
//! - `agent/` - Agent-run capability and its typed invocation context
//! - `tools/` - Injected tool backends bound to per-invocation budgets
//! - `budget/` - Call budget guard
//! - `compaction/` - Bounded summaries of large tool results
//! - `persistence/` - Retrying, concurrency-capped remote client and tree writes
//! - `state/` - SQLite run status records
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tessera_core::swarm::{Orchestrator, RunRequest};
//!
//! let orchestrator = Orchestrator::new(config, agent, tools, client);
//! let summary = orchestrator.run(RunRequest::new("Why did margins fall?")).await?;
//! ```

pub mod agent;
pub mod budget;
pub mod compaction;
pub mod config;
pub mod models;
pub mod persistence;
pub mod state;
pub mod swarm;
pub mod tools;
