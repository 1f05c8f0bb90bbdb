//! Event types emitted while a pipeline runs.
//!
//! Every observable change in a run (a task starting, reporting progress,
//! finishing or being skipped) is recorded as an immutable event. The CLI
//! renders them live and `--report` persists them as JSON Lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single event in a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    /// Id of the task, when the task declares one
    pub task_id: Option<String>,

    /// Title of the task (None for run-level events)
    pub task_title: Option<String>,

    /// Type of event
    pub event_type: EventType,

    /// Human-readable summary (NO secrets)
    pub message: String,

    /// Time taken in milliseconds (for finished tasks)
    pub duration_ms: Option<u64>,

    /// Error message if failed or skipped on an unmet dependency
    pub error: Option<String>,
}

impl Event {
    /// Create a run-level event with the current timestamp
    pub fn run(run_id: Uuid, event_type: EventType, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            task_id: None,
            task_title: None,
            event_type,
            message: message.into(),
            duration_ms: None,
            error: None,
        }
    }

    /// Create a task-level event with the current timestamp
    pub fn task(
        run_id: Uuid,
        task_id: Option<&str>,
        task_title: &str,
        event_type: EventType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.map(str::to_string),
            task_title: Some(task_title.to_string()),
            ..Self::run(run_id, event_type, message)
        }
    }

    /// Create an event with duration information
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Create an event with error information
    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

/// Types of events that can occur during pipeline execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A new run has started
    RunStarted,

    /// A task body is about to run
    TaskStarted,

    /// A task reported an incremental status message
    TaskProgress,

    /// A task body resolved
    TaskSucceeded,

    /// A task body returned an error
    TaskFailed,

    /// A task was not run (disabled, dependency not met, or run halted)
    TaskSkipped,

    /// An `exit_on_error` task failed and the run stopped
    RunHalted,

    /// All tasks were visited and a verdict was computed
    RunCompleted,
}
