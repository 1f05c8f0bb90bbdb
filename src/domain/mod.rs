//! Domain types for extdeploy.
//!
//! This module contains the core data structures:
//! - Events: Immutable records of what happened during a run
//! - Run: Per-task outcomes and the run report
//! - Artifact: Extension manifest and the packaged zip

pub mod artifact;
pub mod events;
pub mod run;

// Re-export commonly used types
pub use artifact::{ArtifactRef, ExtensionManifest, ManifestError};
pub use events::{Event, EventType};
pub use run::{RunReport, SkipReason, TaskOutcome, TaskResult, Verdict};
