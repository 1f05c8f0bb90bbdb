//! Tasks: the unit of work the orchestrator sequences.
//!
//! A task is a titled body plus the rules deciding whether it runs: an
//! `enabled` flag, direct dependencies on earlier tasks and whether a
//! failure halts the whole run.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Event, EventType};

/// Errors a task body can return
#[derive(Debug, Error)]
pub enum TaskError {
    /// Missing configuration, files or credentials
    #[error("{message}")]
    Setup {
        message: String,
        remediation: Vec<String>,
    },

    /// A dependency id that no task in the pipeline declares
    #[error("Task '{task}' depends on '{dependency}', which is not declared in this pipeline")]
    UnmetDependency { task: String, dependency: String },

    /// A remote call failed in a way a later attempt might not
    #[error("{0}")]
    TransientApi(String),

    /// The remote side is in a state only a human can resolve
    #[error("{message}")]
    TerminalState {
        message: String,
        remediation: Vec<String>,
    },
}

impl TaskError {
    pub fn setup(message: impl Into<String>) -> Self {
        Self::Setup {
            message: message.into(),
            remediation: Vec::new(),
        }
    }

    pub fn setup_with(message: impl Into<String>, remediation: Vec<String>) -> Self {
        Self::Setup {
            message: message.into(),
            remediation,
        }
    }

    pub fn terminal(message: impl Into<String>, remediation: Vec<String>) -> Self {
        Self::TerminalState {
            message: message.into(),
            remediation,
        }
    }

    /// Manual steps that resolve this error
    pub fn remediation(&self) -> &[String] {
        match self {
            Self::Setup { remediation, .. } | Self::TerminalState { remediation, .. } => {
                remediation
            }
            _ => &[],
        }
    }

    /// The message followed by numbered remediation steps
    pub fn render(&self) -> String {
        render_remediation(&self.to_string(), self.remediation())
    }
}

/// Format a message with numbered manual steps underneath
pub fn render_remediation(message: &str, steps: &[String]) -> String {
    let mut out = message.to_string();
    for (i, step) in steps.iter().enumerate() {
        out.push_str(&format!("\n  {}. {}", i + 1, step));
    }
    out
}

/// A dependency on an earlier task's outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub id: String,

    /// `true` requires the dependency to have succeeded, `false` to have failed
    pub required_success: bool,
}

/// Receives every event as it is emitted
pub type Observer = Arc<dyn Fn(&Event) + Send + Sync>;

/// Progress reporter handed to a running task body.
///
/// Reporting never fails the task; events are forwarded to the observer
/// immediately and collected for the run report.
pub struct Progress {
    run_id: Uuid,
    task_id: Option<String>,
    title: String,
    observer: Option<Observer>,
    events: Mutex<Vec<Event>>,
}

impl Progress {
    pub(crate) fn new(
        run_id: Uuid,
        task_id: Option<String>,
        title: String,
        observer: Option<Observer>,
    ) -> Self {
        Self {
            run_id,
            task_id,
            title,
            observer,
            events: Mutex::new(Vec::new()),
        }
    }

    /// A reporter that is not attached to any run
    pub fn detached(title: impl Into<String>) -> Self {
        Self::new(Uuid::nil(), None, title.into(), None)
    }

    /// Report a status message for the running task
    pub fn report(&self, message: impl Into<String>) {
        let event = Event::task(
            self.run_id,
            self.task_id.as_deref(),
            &self.title,
            EventType::TaskProgress,
            message,
        );
        tracing::debug!(task = %self.title, message = %event.message, "progress");

        if let Some(observer) = &self.observer {
            observer(&event);
        }
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    /// Messages reported so far
    pub fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .map(|events| events.iter().map(|e| e.message.clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn into_events(self) -> Vec<Event> {
        self.events.into_inner().unwrap_or_default()
    }
}

/// The work a task performs against the pipeline context
#[async_trait]
pub trait TaskBody<C: Send>: Send + Sync {
    /// Run the body, resolving with a human-readable success message
    async fn run(&self, ctx: &mut C, progress: &Progress) -> Result<String, TaskError>;
}

/// Adapts a synchronous closure into a [`TaskBody`]
pub struct FnBody<F>(pub F);

#[async_trait]
impl<C, F> TaskBody<C> for FnBody<F>
where
    C: Send,
    F: Fn(&mut C, &Progress) -> Result<String, TaskError> + Send + Sync,
{
    async fn run(&self, ctx: &mut C, progress: &Progress) -> Result<String, TaskError> {
        (self.0)(ctx, progress)
    }
}

/// A single step in a pipeline
pub struct Task<C> {
    /// Unique id; only tasks with an id can be depended on
    pub id: Option<String>,

    pub title: String,

    pub enabled: bool,

    /// Direct dependencies, checked in order
    pub depends_on: Vec<Dependency>,

    /// A failure stops the run
    pub exit_on_error: bool,

    body: Box<dyn TaskBody<C>>,
}

impl<C: Send + 'static> Task<C> {
    pub fn new(title: impl Into<String>, body: impl TaskBody<C> + 'static) -> Self {
        Self {
            id: None,
            title: title.into(),
            enabled: true,
            depends_on: Vec::new(),
            exit_on_error: false,
            body: Box::new(body),
        }
    }

    /// Build a task from a synchronous closure
    pub fn from_fn<F>(title: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut C, &Progress) -> Result<String, TaskError> + Send + Sync + 'static,
    {
        Self::new(title, FnBody(f))
    }
}

impl<C> Task<C> {
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>, required_success: bool) -> Self {
        self.depends_on.push(Dependency {
            id: id.into(),
            required_success,
        });
        self
    }

    pub fn exit_on_error(mut self, exit_on_error: bool) -> Self {
        self.exit_on_error = exit_on_error;
        self
    }

    pub(crate) fn body(&self) -> &dyn TaskBody<C> {
        self.body.as_ref()
    }
}

impl<C> std::fmt::Debug for Task<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("enabled", &self.enabled)
            .field("depends_on", &self.depends_on)
            .field("exit_on_error", &self.exit_on_error)
            .finish_non_exhaustive()
    }
}
