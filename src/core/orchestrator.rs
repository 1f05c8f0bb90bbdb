//! Main orchestrator for pipeline execution.
//!
//! Runs tasks strictly in declaration order, decides per task whether it
//! runs (enabled flag, direct dependencies, halted run), records exactly one
//! outcome per task and derives the verdict from the terminal task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    Event, EventType, RunReport, SkipReason, TaskOutcome, TaskResult, Verdict,
};

use super::pipeline::Pipeline;
use super::run_log::RunLog;
use super::task::{Observer, Progress, Task, TaskError};

/// Main pipeline orchestrator
#[derive(Default)]
pub struct Orchestrator {
    /// Receives events as they happen (CLI rendering)
    observer: Option<Observer>,

    /// Optional JSONL sink for every event
    run_log: Option<RunLog>,
}

/// Collects events for one run and forwards them to the observer and log
struct Recorder<'a> {
    run_id: Uuid,
    observer: Option<Observer>,
    run_log: Option<&'a RunLog>,
    events: Vec<Event>,
}

impl Recorder<'_> {
    async fn emit(&mut self, event: Event) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
        self.persist(event).await;
    }

    /// Record an event the observer has already seen. A failing run log is
    /// reported once and then detached; the run itself carries on.
    async fn persist(&mut self, event: Event) {
        if let Some(log) = self.run_log {
            if let Err(e) = log.append(&event).await {
                warn!(
                    path = %log.path().display(),
                    error = %format!("{:#}", e),
                    "Run log write failed, continuing without it"
                );
                self.run_log = None;
            }
        }
        self.events.push(event);
    }
}

impl Orchestrator {
    /// Create a new orchestrator
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward every event to `observer` as it is emitted
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Append every event to a JSONL run log
    pub fn with_run_log(mut self, run_log: RunLog) -> Self {
        self.run_log = Some(run_log);
        self
    }

    /// Execute a pipeline against `ctx`. Only an invalid pipeline is an error;
    /// task failures are recorded in the report.
    #[instrument(skip(self, pipeline, ctx), fields(pipeline = %pipeline.name))]
    pub async fn run<C: Send>(&self, pipeline: &Pipeline<C>, ctx: &mut C) -> Result<RunReport> {
        pipeline.validate()?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(%run_id, "Starting pipeline execution");

        let mut recorder = Recorder {
            run_id,
            observer: self.observer.clone(),
            run_log: self.run_log.as_ref(),
            events: Vec::new(),
        };
        recorder
            .emit(Event::run(
                run_id,
                EventType::RunStarted,
                format!("Pipeline '{}' started", pipeline.name),
            ))
            .await;

        let mut outcomes: HashMap<&str, TaskOutcome> = HashMap::new();
        let mut results = Vec::with_capacity(pipeline.tasks.len());
        let mut halted_by: Option<String> = None;

        for task in &pipeline.tasks {
            if halted_by.is_some() {
                recorder
                    .emit(skip_event(run_id, task, "skipped: run halted", None))
                    .await;
                results.push(skipped(task, SkipReason::Halted));
                continue;
            }

            if let Some(reason) = self.skip_reason(pipeline, task, &outcomes) {
                let error = match &reason {
                    SkipReason::UnmetDependency { dependency } => {
                        let err = TaskError::UnmetDependency {
                            task: task_label(task).to_string(),
                            dependency: dependency.clone(),
                        };
                        warn!(task = %task.title, error = %err, "Unmet dependency");
                        Some(err.to_string())
                    }
                    other => {
                        debug!(task = %task.title, reason = ?other, "Skipping task");
                        None
                    }
                };
                recorder
                    .emit(skip_event(run_id, task, &skip_message(&reason), error))
                    .await;
                if let Some(id) = task.id.as_deref() {
                    outcomes.insert(id, TaskOutcome::NotRun);
                }
                results.push(skipped(task, reason));
                continue;
            }

            let result = self.execute_task(&mut recorder, task, ctx).await;
            if task.exit_on_error && matches!(result.outcome, TaskOutcome::Failed(_)) {
                error!(task = %task.title, "Task failed, halting run");
                halted_by = Some(task.title.clone());
                recorder
                    .emit(
                        Event::run(
                            run_id,
                            EventType::RunHalted,
                            format!("Run halted: '{}' failed", task.title),
                        )
                        .with_error(result.outcome.message().unwrap_or_default().to_string()),
                    )
                    .await;
            }
            if let Some(id) = task.id.as_deref() {
                outcomes.insert(id, result.outcome.clone());
            }
            results.push(result);
        }

        let verdict = match outcomes.get(pipeline.terminal.as_str()) {
            Some(TaskOutcome::Succeeded(_)) => Verdict::Succeeded,
            _ => Verdict::Failed,
        };

        if halted_by.is_none() {
            info!(%run_id, ?verdict, "Run completed");
            recorder
                .emit(Event::run(
                    run_id,
                    EventType::RunCompleted,
                    format!("Pipeline '{}' completed: {:?}", pipeline.name, verdict),
                ))
                .await;
        }

        Ok(RunReport {
            run_id,
            pipeline_name: pipeline.name.clone(),
            started_at,
            completed_at: Utc::now(),
            tasks: results,
            halted_by,
            terminal_task: pipeline.terminal.clone(),
            verdict,
            events: recorder.events,
        })
    }

    /// Decide whether a task must be skipped. Only direct dependencies are checked.
    fn skip_reason<C>(
        &self,
        pipeline: &Pipeline<C>,
        task: &Task<C>,
        outcomes: &HashMap<&str, TaskOutcome>,
    ) -> Option<SkipReason> {
        if !task.enabled {
            return Some(SkipReason::Disabled);
        }

        for dep in &task.depends_on {
            if !pipeline.declares(&dep.id) {
                return Some(SkipReason::UnmetDependency {
                    dependency: dep.id.clone(),
                });
            }

            let satisfied = outcomes
                .get(dep.id.as_str())
                .map(|outcome| outcome.satisfies(dep.required_success))
                .unwrap_or(false);
            if !satisfied {
                return Some(SkipReason::DependencyNotSatisfied {
                    dependency: dep.id.clone(),
                    required_success: dep.required_success,
                });
            }
        }

        None
    }

    /// Run one task body and record its outcome
    async fn execute_task<C: Send>(
        &self,
        recorder: &mut Recorder<'_>,
        task: &Task<C>,
        ctx: &mut C,
    ) -> TaskResult {
        let run_id = recorder.run_id;
        recorder
            .emit(Event::task(
                run_id,
                task.id.as_deref(),
                &task.title,
                EventType::TaskStarted,
                task.title.clone(),
            ))
            .await;

        let progress = Progress::new(
            run_id,
            task.id.clone(),
            task.title.clone(),
            recorder.observer.clone(),
        );
        let started = Instant::now();
        let result = task.body().run(ctx, &progress).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        for event in progress.into_events() {
            recorder.persist(event).await;
        }

        let (outcome, remediation) = match result {
            Ok(message) => {
                info!(task = %task.title, duration_ms, "Task succeeded");
                recorder
                    .emit(
                        Event::task(
                            run_id,
                            task.id.as_deref(),
                            &task.title,
                            EventType::TaskSucceeded,
                            message.clone(),
                        )
                        .with_duration(duration_ms),
                    )
                    .await;
                (TaskOutcome::Succeeded(message), Vec::new())
            }
            Err(e) => {
                let message = format!("failed: {}", e);
                error!(task = %task.title, error = %e, duration_ms, "Task failed");
                recorder
                    .emit(
                        Event::task(
                            run_id,
                            task.id.as_deref(),
                            &task.title,
                            EventType::TaskFailed,
                            message.clone(),
                        )
                        .with_duration(duration_ms)
                        .with_error(e.to_string()),
                    )
                    .await;
                (TaskOutcome::Failed(message), e.remediation().to_vec())
            }
        };

        TaskResult {
            id: task.id.clone(),
            title: task.title.clone(),
            outcome,
            skipped: None,
            remediation,
        }
    }
}

fn task_label<C>(task: &Task<C>) -> &str {
    task.id.as_deref().unwrap_or(task.title.as_str())
}

fn skipped<C>(task: &Task<C>, reason: SkipReason) -> TaskResult {
    TaskResult {
        id: task.id.clone(),
        title: task.title.clone(),
        outcome: TaskOutcome::NotRun,
        skipped: Some(reason),
        remediation: Vec::new(),
    }
}

fn skip_message(reason: &SkipReason) -> String {
    match reason {
        SkipReason::Disabled => "skipped: disabled".to_string(),
        SkipReason::UnmetDependency { dependency } => {
            format!("skipped: unmet dependency '{}'", dependency)
        }
        SkipReason::DependencyNotSatisfied {
            dependency,
            required_success,
        } => format!(
            "skipped: '{}' did not {}",
            dependency,
            if *required_success { "succeed" } else { "fail" }
        ),
        SkipReason::Halted => "skipped: run halted".to_string(),
    }
}

fn skip_event<C>(run_id: Uuid, task: &Task<C>, message: &str, error: Option<String>) -> Event {
    let event = Event::task(
        run_id,
        task.id.as_deref(),
        &task.title,
        EventType::TaskSkipped,
        message,
    );
    match error {
        Some(error) => event.with_error(error),
        None => event,
    }
}
