//! Core orchestration logic.
//!
//! This module contains:
//! - Task: Units of work and their run rules
//! - Pipeline: Ordered tasks and construction-time validation
//! - Orchestrator: Main execution engine
//! - RunLog: Append-only JSONL event log

pub mod orchestrator;
pub mod pipeline;
pub mod run_log;
pub mod task;

// Re-export commonly used types
pub use orchestrator::Orchestrator;
pub use pipeline::{Pipeline, PipelineError};
pub use run_log::RunLog;
pub use task::{render_remediation, Dependency, FnBody, Observer, Progress, Task, TaskBody, TaskError};
