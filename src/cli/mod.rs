//! Command-line interface for extdeploy.
//!
//! Provides commands for deploying an extension to the Chrome Web Store,
//! fetching a refresh token, checking the store status and packaging a
//! local dev bundle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use crate::adapters::{http_client, ChromeWebStore, Projection, StoreApi, StoreError};
use crate::config::credentials::{process_env, EnvReader, EXTENSION_PROJECT_FOLDER};
use crate::config::{load_config, StoreCredentials};
use crate::core::{render_remediation, Orchestrator, Pipeline, RunLog};
use crate::deploy::{build_deploy_pipeline, build_dev_bundle, DeployContext, DeployOptions};
use crate::domain::{Event, EventType, RunReport};

pub mod token;

/// extdeploy - Browser extension publishing pipeline
#[derive(Parser, Debug)]
#[command(name = "extdeploy")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Show debug logs and full API responses
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload and publish the packaged extension
    Deploy(DeployArgs),

    /// Authorize with Google and store the credentials as CI variables
    FetchToken(token::FetchTokenArgs),

    /// Show the store status of the extension
    Status {
        /// DRAFT or PUBLISHED
        #[arg(long, default_value = "DRAFT")]
        projection: Projection,
    },

    /// Package the built extension as a dev bundle (version + .9999)
    Bundle {
        /// Project folder (defaults to EXTENSION_PROJECT_FOLDER, then the current directory)
        #[arg(long)]
        project: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Default)]
pub struct DeployArgs {
    /// Prepare the live-test project in the current directory and deploy it
    #[arg(long)]
    pub no_project: bool,

    /// Upload only; publish manually from the dashboard
    #[arg(long)]
    pub no_publish: bool,

    /// Project folder (overrides EXTENSION_PROJECT_FOLDER)
    #[arg(long, env = "EXTENSION_PROJECT_FOLDER")]
    pub project: Option<PathBuf>,

    /// Write every run event to this file as JSON Lines
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Publish target (`default` or `trustedTesters`)
    #[arg(long)]
    pub target: Option<String>,

    /// Percentage of users receiving the update
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub deploy_percentage: Option<u8>,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Deploy(args) => deploy(args).await,
            Commands::FetchToken(args) => token::fetch_token(args).await,
            Commands::Status { projection } => show_status(projection, self.verbose).await,
            Commands::Bundle { project } => bundle(project),
        }
    }
}

/// Print an orchestrator event as it happens
pub fn render_event(event: &Event) {
    let title = event.task_title.as_deref().unwrap_or_default();
    match event.event_type {
        EventType::TaskStarted => eprintln!("◇  {}", title),
        EventType::TaskProgress => eprintln!("│  {}", event.message),
        EventType::TaskSucceeded => eprintln!("✅ {}", event.message),
        EventType::TaskFailed => eprintln!(
            "❌ {}: {}",
            title,
            event.error.as_deref().unwrap_or(&event.message)
        ),
        EventType::TaskSkipped => eprintln!("⏭️  {} ({})", title, event.message),
        EventType::RunHalted => eprintln!("🛑 {}", event.message),
        EventType::RunStarted | EventType::RunCompleted => {}
    }
}

/// Run a pipeline with live rendering and an optional JSONL report
pub async fn run_pipeline<C: Send>(
    pipeline: &Pipeline<C>,
    ctx: &mut C,
    report: Option<&Path>,
) -> Result<RunReport> {
    let mut orchestrator = Orchestrator::new().with_observer(render_event);
    if let Some(path) = report {
        orchestrator = orchestrator.with_run_log(RunLog::open(path).await?);
    }

    orchestrator.run(pipeline, ctx).await
}

/// Manual steps collected from the run. Skips were already rendered
/// live from their events.
pub fn remediation_blocks(report: &RunReport) -> Vec<String> {
    report
        .tasks
        .iter()
        .filter(|task| !task.remediation.is_empty())
        .map(|task| {
            let message = task.outcome.message().unwrap_or(&task.title);
            render_remediation(message, &task.remediation)
        })
        .collect()
}

/// Print the verdict and manual steps; exit 1 unless the run succeeded
pub fn finish_run(report: &RunReport, success: &str) {
    for block in remediation_blocks(report) {
        eprintln!("\n{}", block);
    }

    if report.exit_code() == 0 {
        eprintln!("\n✨ {}", success);
        return;
    }

    match &report.halted_by {
        Some(task) => eprintln!("\n[Run {} halted: '{}' failed]", report.run_id, task),
        None => eprintln!(
            "\n[Run {} failed: '{}' did not succeed]",
            report.run_id, report.terminal_task
        ),
    }
    std::process::exit(1);
}

/// Deploy the packaged extension
async fn deploy(args: DeployArgs) -> Result<()> {
    let mut env = EnvReader::new(process_env);
    let credentials = StoreCredentials::read(&mut env);

    let project = if args.no_project {
        std::env::current_dir().context("Failed to determine working directory")?
    } else if let Some(project) = args.project.clone() {
        project
    } else {
        PathBuf::from(env.require(EXTENSION_PROJECT_FOLDER))
    };
    env.finish()?;

    let config = load_config(Some(&project))?;
    let http = http_client(config.http_timeout).context("Failed to build HTTP client")?;
    let store = ChromeWebStore::new(http, config.store.clone(), credentials);

    let mut ctx = DeployContext {
        store: Arc::new(store),
        dist_dir: config.dist_dir(&project),
        artifacts_dir: config.artifacts_dir(&project),
        live_test: config.live_test.clone(),
        publish_target: args.target.clone().or(Some(config.store.publish_target.clone())),
        deploy_percentage: args.deploy_percentage.or(config.store.deploy_percentage),
        artifact: None,
    };

    if args.no_publish {
        eprintln!("⚠️  --no-publish: the extension will be uploaded but NOT published.");
        eprintln!("   Publish it manually from the Chrome Web Store developer dashboard.");
    }

    let pipeline = build_deploy_pipeline(DeployOptions {
        live_test: args.no_project,
        no_publish: args.no_publish,
    });

    let report = run_pipeline(&pipeline, &mut ctx, args.report.as_deref()).await?;
    let success = if args.no_publish {
        "Upload completed. Remember to publish manually."
    } else {
        "Deploy completed successfully!"
    };
    finish_run(&report, success);
    Ok(())
}

/// Show the store status of the extension
async fn show_status(projection: Projection, verbose: bool) -> Result<()> {
    let credentials = StoreCredentials::from_env()?;
    let config = load_config(None)?;
    let http = http_client(config.http_timeout).context("Failed to build HTTP client")?;
    let store = ChromeWebStore::new(http, config.store.clone(), credentials);

    eprintln!("🔍 Store status ({}) for {}", projection, store.extension_id());
    let status = match store.get_status(Some(projection), None).await {
        Ok(status) => status,
        Err(StoreError::Auth(e)) => {
            anyhow::bail!(
                "{}",
                render_remediation(
                    &format!("Invalid refresh token: {}", e),
                    &["Run `extdeploy fetch-token` to authorize again".to_string()],
                )
            );
        }
        Err(e) => return Err(e).context("Failed to fetch store status"),
    };

    if verbose {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let field = |key: &str| {
        status
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or("-")
            .to_string()
    };
    println!("Item:         {}", field("id"));
    println!("Version:      {}", field("crxVersion"));
    println!("Upload state: {}", field("uploadState"));
    if let Some(errors) = status.get("itemError").and_then(|v| v.as_array()) {
        for error in errors {
            let detail = error
                .get("error_detail")
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown error");
            println!("Error:        {}", detail);
        }
    }

    Ok(())
}

/// Package a dev bundle
fn bundle(project: Option<PathBuf>) -> Result<()> {
    let project = match project {
        Some(project) => project,
        None => match process_env(EXTENSION_PROJECT_FOLDER).filter(|p| !p.is_empty()) {
            Some(folder) => PathBuf::from(folder),
            None => std::env::current_dir().context("Failed to determine working directory")?,
        },
    };

    let config = load_config(Some(&project))?;
    let summary = build_dev_bundle(&config.dist_dir(&project), &config.artifacts_dir(&project))?;

    eprintln!(
        "📦 {} v{} ({} files)",
        summary.manifest.name, summary.manifest.version, summary.files
    );
    println!("{}", summary.path.display());
    Ok(())
}
