//! Run report and per-task outcomes.
//!
//! A RunReport is the result of one execution of a pipeline: the outcome of
//! every declared task, why skipped tasks did not run, and the verdict
//! derived from the terminal task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::Event;

/// Outcome of a single task. Recorded once, never reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "message")]
pub enum TaskOutcome {
    /// The body never ran (disabled, skipped, or the run halted first)
    NotRun,

    /// The body resolved with this message
    Succeeded(String),

    /// The body failed; the message is already prefixed with `failed: `
    Failed(String),
}

impl TaskOutcome {
    /// Whether this outcome satisfies a dependency requiring `required_success`.
    ///
    /// `NotRun` satisfies neither requirement, so skips propagate to dependents.
    pub fn satisfies(&self, required_success: bool) -> bool {
        match self {
            TaskOutcome::Succeeded(_) => required_success,
            TaskOutcome::Failed(_) => !required_success,
            TaskOutcome::NotRun => false,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded(_))
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            TaskOutcome::Succeeded(m) | TaskOutcome::Failed(m) => Some(m),
            TaskOutcome::NotRun => None,
        }
    }
}

impl Default for TaskOutcome {
    fn default() -> Self {
        Self::NotRun
    }
}

/// Why a task did not run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SkipReason {
    /// `enabled` was false
    Disabled,

    /// A dependency id is not declared anywhere in the pipeline
    UnmetDependency { dependency: String },

    /// A dependency finished with the wrong outcome (or did not run)
    DependencyNotSatisfied {
        dependency: String,
        required_success: bool,
    },

    /// An earlier `exit_on_error` task failed
    Halted,
}

/// Result of one task within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: Option<String>,
    pub title: String,
    pub outcome: TaskOutcome,
    pub skipped: Option<SkipReason>,

    /// Manual steps attached to a failure, if any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remediation: Vec<String>,
}

/// Overall pipeline verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Succeeded,
    Failed,
}

/// Report of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique identifier for this run
    pub run_id: Uuid,

    /// Name of the pipeline that ran
    pub pipeline_name: String,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished or halted
    pub completed_at: DateTime<Utc>,

    /// One entry per declared task, in declaration order
    pub tasks: Vec<TaskResult>,

    /// Title of the `exit_on_error` task that stopped the run
    pub halted_by: Option<String>,

    /// Id of the task whose outcome decides the verdict
    pub terminal_task: String,

    pub verdict: Verdict,

    /// Every event emitted during the run, in order
    pub events: Vec<Event>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.verdict == Verdict::Succeeded
    }

    pub fn is_halted(&self) -> bool {
        self.halted_by.is_some()
    }

    /// Look up a task result by id
    pub fn task(&self, id: &str) -> Option<&TaskResult> {
        self.tasks.iter().find(|t| t.id.as_deref() == Some(id))
    }

    /// Outcome of a task by id (`NotRun` for unknown ids)
    pub fn outcome(&self, id: &str) -> TaskOutcome {
        self.task(id)
            .map(|t| t.outcome.clone())
            .unwrap_or_default()
    }

    /// Process exit status for this run
    pub fn exit_code(&self) -> i32 {
        if self.succeeded() && !self.is_halted() {
            0
        } else {
            1
        }
    }
}
