//! extdeploy - Browser extension publishing pipeline
//!
//! Packages a built browser extension, uploads it to the Chrome Web Store
//! and publishes it, and handles the OAuth dance that produces the refresh
//! token CI needs.
//!
//! # Architecture
//!
//! Every command is a short pipeline of tasks run strictly in order:
//! - Tasks declare direct dependencies on earlier tasks' outcomes
//! - A failing `exit_on_error` task halts the run
//! - The terminal task's outcome is the verdict
//! - Every state change is an event, optionally persisted as JSONL
//!
//! # Modules
//!
//! - `adapters`: Store API, identity provider, loopback listener, GitLab
//! - `core`: Orchestration logic (Task, Pipeline, Orchestrator, RunLog)
//! - `deploy`: The deploy and token-fetch pipelines, dev bundles
//! - `domain`: Data structures (Event, RunReport, ArtifactRef)
//! - `config`: Config file discovery and environment credentials
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Upload and publish
//! extdeploy deploy --project ./my-extension
//!
//! # Authorize and push credentials to GitLab
//! extdeploy fetch-token
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod deploy;
pub mod domain;

// Re-export main types at crate root for convenience
pub use crate::core::{Orchestrator, Pipeline, Task, TaskError};
pub use crate::domain::{Event, EventType, RunReport, TaskOutcome};
