//! Sequencing, dependency gating and halting of the orchestrator.

use std::sync::{Arc, Mutex};

use extdeploy::core::{PipelineError, RunLog};
use extdeploy::domain::{SkipReason, Verdict};
use extdeploy::{EventType, Orchestrator, Pipeline, Task, TaskError, TaskOutcome};
use tempfile::TempDir;

type Trace = Vec<String>;

fn ok(id: &str) -> Task<Trace> {
    let name = id.to_string();
    Task::from_fn(format!("Task {}", id), move |trace: &mut Trace, _| {
        trace.push(name.clone());
        Ok(format!("{} done", name))
    })
    .with_id(id)
}

fn fail(id: &str) -> Task<Trace> {
    let name = id.to_string();
    Task::from_fn(format!("Task {}", id), move |trace: &mut Trace, _| {
        trace.push(name.clone());
        Err(TaskError::TransientApi(format!("{} broke", name)))
    })
    .with_id(id)
}

#[tokio::test]
async fn test_tasks_run_in_declaration_order() {
    let pipeline = Pipeline::new("ordered", "c")
        .task(ok("a"))
        .task(ok("b"))
        .task(ok("c"));

    let mut trace = Trace::new();
    let report = Orchestrator::new().run(&pipeline, &mut trace).await.unwrap();

    assert_eq!(trace, vec!["a", "b", "c"]);
    assert_eq!(report.verdict, Verdict::Succeeded);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.tasks.len(), 3);
}

#[tokio::test]
async fn test_failure_dependency_runs_fallback() {
    let pipeline = Pipeline::new("fallback", "recover")
        .task(fail("upload"))
        .task(ok("recover").depends_on("upload", false))
        .task(ok("publish").depends_on("upload", true));

    let mut trace = Trace::new();
    let report = Orchestrator::new().run(&pipeline, &mut trace).await.unwrap();

    assert_eq!(trace, vec!["upload", "recover"]);
    assert_eq!(
        report.task("publish").unwrap().skipped,
        Some(SkipReason::DependencyNotSatisfied {
            dependency: "upload".to_string(),
            required_success: true,
        })
    );
    assert!(report.succeeded());
}

#[tokio::test]
async fn test_disabled_task_satisfies_neither_dependency_kind() {
    let pipeline = Pipeline::new("disabled", "c")
        .task(ok("a").enabled(false))
        .task(ok("b").depends_on("a", true))
        .task(ok("c").depends_on("a", false));

    let mut trace = Trace::new();
    let report = Orchestrator::new().run(&pipeline, &mut trace).await.unwrap();

    assert!(trace.is_empty());
    assert_eq!(report.task("a").unwrap().skipped, Some(SkipReason::Disabled));
    assert_eq!(report.outcome("b"), TaskOutcome::NotRun);
    assert_eq!(report.outcome("c"), TaskOutcome::NotRun);
    assert_eq!(report.verdict, Verdict::Failed);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_exit_on_error_halts_remaining_tasks() {
    let pipeline = Pipeline::new("halting", "c")
        .task(fail("a").exit_on_error(true))
        .task(ok("b").depends_on("a", false))
        .task(ok("c"));

    let mut trace = Trace::new();
    let report = Orchestrator::new().run(&pipeline, &mut trace).await.unwrap();

    assert_eq!(trace, vec!["a"]);
    assert_eq!(report.halted_by.as_deref(), Some("Task a"));
    assert_eq!(report.task("b").unwrap().skipped, Some(SkipReason::Halted));
    assert_eq!(report.task("c").unwrap().skipped, Some(SkipReason::Halted));
    assert_eq!(report.exit_code(), 1);

    let types: Vec<EventType> = report.events.iter().map(|e| e.event_type).collect();
    assert!(types.contains(&EventType::RunHalted));
    assert!(!types.contains(&EventType::RunCompleted));
}

#[tokio::test]
async fn test_failure_without_exit_on_error_continues() {
    let pipeline = Pipeline::new("continuing", "b")
        .task(fail("a"))
        .task(ok("b"));

    let mut trace = Trace::new();
    let report = Orchestrator::new().run(&pipeline, &mut trace).await.unwrap();

    assert_eq!(trace, vec!["a", "b"]);
    assert!(!report.is_halted());
    assert_eq!(
        report.outcome("a"),
        TaskOutcome::Failed("failed: a broke".to_string())
    );
    assert!(report.succeeded());
}

#[tokio::test]
async fn test_undeclared_dependency_skips_with_one_event() {
    let pipeline = Pipeline::new("ghosts", "b")
        .task(ok("a").depends_on("ghost", true))
        .task(ok("b"));

    let mut trace = Trace::new();
    let report = Orchestrator::new().run(&pipeline, &mut trace).await.unwrap();

    assert_eq!(trace, vec!["b"]);
    assert_eq!(
        report.task("a").unwrap().skipped,
        Some(SkipReason::UnmetDependency {
            dependency: "ghost".to_string()
        })
    );

    let skips: Vec<_> = report
        .events
        .iter()
        .filter(|e| e.event_type == EventType::TaskSkipped)
        .collect();
    assert_eq!(skips.len(), 1);
    assert!(skips[0].error.as_deref().unwrap().contains("ghost"));
}

#[tokio::test]
async fn test_invalid_pipeline_rejected_before_running() {
    let pipeline = Pipeline::new("broken", "b")
        .task(ok("a").depends_on("b", true))
        .task(ok("b"));

    let mut trace = Trace::new();
    let err = Orchestrator::new()
        .run(&pipeline, &mut trace)
        .await
        .unwrap_err();

    assert!(trace.is_empty());
    assert_eq!(
        err.downcast_ref::<PipelineError>(),
        Some(&PipelineError::ForwardReference {
            task: "a".to_string(),
            dependency: "b".to_string(),
        })
    );
}

#[tokio::test]
async fn test_verdict_comes_from_terminal_task() {
    let pipeline = Pipeline::new("terminal", "a")
        .task(fail("a"))
        .task(ok("b"));

    let mut trace = Trace::new();
    let report = Orchestrator::new().run(&pipeline, &mut trace).await.unwrap();

    assert_eq!(report.outcome("b"), TaskOutcome::Succeeded("b done".to_string()));
    assert_eq!(report.verdict, Verdict::Failed);
}

#[tokio::test]
async fn test_only_direct_dependencies_are_checked() {
    // c depends on b only; b runs because a failed as required
    let pipeline = Pipeline::new("shallow", "c")
        .task(fail("a"))
        .task(ok("b").depends_on("a", false))
        .task(ok("c").depends_on("b", true));

    let mut trace = Trace::new();
    let report = Orchestrator::new().run(&pipeline, &mut trace).await.unwrap();

    assert_eq!(trace, vec!["a", "b", "c"]);
    assert!(report.succeeded());
}

#[tokio::test]
async fn test_observer_sees_progress_in_order() {
    let seen: Arc<Mutex<Vec<(EventType, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let pipeline: Pipeline<Trace> = Pipeline::new("progress", "work").task(
        Task::from_fn("Working", |_, progress| {
            progress.report("step one");
            progress.report("step two");
            Ok("finished".to_string())
        })
        .with_id("work"),
    );

    let orchestrator = Orchestrator::new().with_observer(move |event| {
        sink.lock()
            .unwrap()
            .push((event.event_type, event.message.clone()));
    });
    let mut trace = Trace::new();
    let report = orchestrator.run(&pipeline, &mut trace).await.unwrap();

    let seen = seen.lock().unwrap().clone();
    let types: Vec<EventType> = seen.iter().map(|(t, _)| *t).collect();
    assert_eq!(
        types,
        vec![
            EventType::RunStarted,
            EventType::TaskStarted,
            EventType::TaskProgress,
            EventType::TaskProgress,
            EventType::TaskSucceeded,
            EventType::RunCompleted,
        ]
    );
    assert_eq!(seen[2].1, "step one");
    assert_eq!(seen[3].1, "step two");

    let recorded: Vec<EventType> = report.events.iter().map(|e| e.event_type).collect();
    assert_eq!(recorded, types);
}

#[tokio::test]
async fn test_run_log_replays_report_events() {
    let dir = TempDir::new().unwrap();
    let log = RunLog::open(dir.path().join("runs").join("deploy.jsonl"))
        .await
        .unwrap();

    let pipeline = Pipeline::new("logged", "b")
        .task(fail("a"))
        .task(ok("b"));

    let mut trace = Trace::new();
    let report = Orchestrator::new()
        .with_run_log(log)
        .run(&pipeline, &mut trace)
        .await
        .unwrap();

    let replayed = RunLog::open(dir.path().join("runs").join("deploy.jsonl"))
        .await
        .unwrap()
        .replay()
        .await
        .unwrap();

    assert_eq!(replayed.len(), report.events.len());
    for (a, b) in replayed.iter().zip(report.events.iter()) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.event_type, b.event_type);
        assert_eq!(a.message, b.message);
    }
    assert!(replayed.iter().all(|e| e.run_id == report.run_id));
}

#[tokio::test]
async fn test_run_log_failure_does_not_stop_the_run() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("deploy.jsonl");
    let log = RunLog::open(&path).await.unwrap();

    // The first task turns the log file into a directory, so every later append fails
    let blocked = path.clone();
    let pipeline = Pipeline::new("unlogged", "publish")
        .task(
            Task::from_fn("Upload", move |trace: &mut Trace, _| {
                trace.push("upload".to_string());
                std::fs::remove_file(&blocked).unwrap();
                std::fs::create_dir(&blocked).unwrap();
                Ok("uploaded".to_string())
            })
            .with_id("upload"),
        )
        .task(ok("publish").depends_on("upload", true));

    let mut trace = Trace::new();
    let report = Orchestrator::new()
        .with_run_log(log)
        .run(&pipeline, &mut trace)
        .await
        .unwrap();

    assert_eq!(trace, vec!["upload", "publish"]);
    assert!(report.succeeded());
    assert_eq!(
        report.events.last().unwrap().event_type,
        EventType::RunCompleted
    );
    assert!(path.is_dir());
}
