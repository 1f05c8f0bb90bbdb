//! Deploy pipelines.
//!
//! The deploy pipeline locates the packaged extension, checks the store,
//! uploads and publishes it. State flows between tasks through
//! [`DeployContext`]; nothing is global.
//!
//! | id          | runs when                       | halts run on failure |
//! |-------------|---------------------------------|----------------------|
//! | `live-test` | `--no-project` only             | yes                  |
//! | `artifact`  | always                          | yes                  |
//! | `status`    | always                          | yes                  |
//! | `upload`    | `artifact` succeeded            | no                   |
//! | `manual`    | `upload` failed                 | no                   |
//! | `publish`   | `upload` succeeded, publishing  | no                   |

pub mod bundle;
pub mod token;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::adapters::{StoreApi, StoreError};
use crate::config::LiveTestSettings;
use crate::core::{Pipeline, Progress, Task, TaskBody, TaskError};
use crate::domain::{ArtifactRef, ExtensionManifest};

pub use bundle::{build_dev_bundle, BundleSummary};
pub use live_test::PrepareLiveTest;
pub use token::{build_token_pipeline, TokenContext};

pub const LIVE_TEST: &str = "live-test";
pub const ARTIFACT: &str = "artifact";
pub const STATUS: &str = "status";
pub const UPLOAD: &str = "upload";
pub const MANUAL: &str = "manual";
pub const PUBLISH: &str = "publish";

const DASHBOARD_URL: &str = "https://chrome.google.com/webstore/devconsole";

/// Flags shaping the deploy pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeployOptions {
    /// Prepare the live-test project in the current directory first
    pub live_test: bool,

    /// Stop after a successful upload
    pub no_publish: bool,
}

/// State threaded through every deploy task
pub struct DeployContext {
    pub store: Arc<dyn StoreApi>,

    /// Built extension (`<project>/<dist>`)
    pub dist_dir: PathBuf,

    /// Packaged zips (`<project>/<artifacts>`)
    pub artifacts_dir: PathBuf,

    pub live_test: LiveTestSettings,

    pub publish_target: Option<String>,

    pub deploy_percentage: Option<u8>,

    /// Set by the `artifact` task, read by later tasks
    pub artifact: Option<ArtifactRef>,
}

impl DeployContext {
    fn manifest(&self) -> Result<&ExtensionManifest, TaskError> {
        self.artifact
            .as_ref()
            .map(|a| &a.manifest)
            .ok_or_else(|| TaskError::setup("No artifact has been located"))
    }
}

/// Steps that fix an expired or revoked refresh token
fn reauthorize_steps() -> Vec<String> {
    vec![
        "Run `extdeploy fetch-token` to authorize again".to_string(),
        "Update GOOGLE_CLOUD_API_REFRESH_TOKEN in your .env file or CI variables".to_string(),
        "Re-run the deploy".to_string(),
    ]
}

/// Map a store failure onto the task error taxonomy
fn store_error(err: StoreError) -> TaskError {
    match err {
        StoreError::Auth(e) => TaskError::setup_with(
            format!("Invalid refresh token: {}", e),
            reauthorize_steps(),
        ),
        StoreError::InvalidArgument(msg) => TaskError::setup(msg),
        other => TaskError::TransientApi(other.to_string()),
    }
}

/// `artifact`: read the manifest and find the matching zip
pub struct LocateArtifact;

#[async_trait]
impl TaskBody<DeployContext> for LocateArtifact {
    async fn run(&self, ctx: &mut DeployContext, progress: &Progress) -> Result<String, TaskError> {
        let manifest = ExtensionManifest::load(&ctx.dist_dir).map_err(|e| {
            TaskError::setup_with(
                format!("Failed to read manifest.json: {}", e),
                vec![format!(
                    "Build the extension so {} exists",
                    ctx.dist_dir.join("manifest.json").display()
                )],
            )
        })?;
        progress.report(format!("Found {} v{}", manifest.name, manifest.version));

        let mut artifact = ArtifactRef::new(manifest, &ctx.artifacts_dir);
        debug!(path = %artifact.path.display(), "Looking for artifact");
        if !artifact.exists() {
            return Err(TaskError::setup_with(
                format!("Artifact not found: {}", artifact.path.display()),
                vec![format!(
                    "Package the built extension as {} in {}",
                    artifact.name,
                    ctx.artifacts_dir.display()
                )],
            ));
        }

        artifact
            .read()
            .map_err(|e| TaskError::setup(format!("Failed to read {}: {}", artifact.path.display(), e)))?;

        let message = format!(
            "{} ({})",
            artifact.name,
            artifact.sha256.as_deref().unwrap_or_default()
        );
        ctx.artifact = Some(artifact);
        Ok(message)
    }
}

/// `status`: confirm the credentials work and show the draft state
pub struct CheckStatus;

#[async_trait]
impl TaskBody<DeployContext> for CheckStatus {
    async fn run(&self, ctx: &mut DeployContext, progress: &Progress) -> Result<String, TaskError> {
        let status = ctx.store.get_status(None, None).await.map_err(store_error)?;
        debug!(status = %status, "Current store status");

        let field = |key: &str| status.get(key).and_then(|v| v.as_str()).map(str::to_string);
        if let Some(state) = field("uploadState") {
            progress.report(format!("Last upload: {}", state));
        }

        Ok(match field("crxVersion") {
            Some(version) => format!("Store item {} at v{}", ctx.store.extension_id(), version),
            None => format!("Store item {} reachable", ctx.store.extension_id()),
        })
    }
}

/// `upload`: send the zip as a new package for the existing item
pub struct UploadPackage;

#[async_trait]
impl TaskBody<DeployContext> for UploadPackage {
    async fn run(&self, ctx: &mut DeployContext, progress: &Progress) -> Result<String, TaskError> {
        let artifact = ctx
            .artifact
            .as_mut()
            .ok_or_else(|| TaskError::setup("No artifact has been located"))?;

        let package = artifact
            .read()
            .map_err(|e| TaskError::setup(format!("Failed to read {}: {}", artifact.path.display(), e)))?;
        progress.report(format!("Uploading {} ({} bytes)", artifact.name, package.len()));

        let response = ctx
            .store
            .upload_existing(Some(package), None)
            .await
            .map_err(store_error)?;

        if !response.is_success() {
            return Err(TaskError::terminal(
                format!("Upload failed: {}", response.failure_detail()),
                Vec::new(),
            ));
        }

        let manifest = ctx.manifest()?;
        Ok(format!(
            "Extension {} v{} uploaded successfully",
            manifest.name, manifest.version
        ))
    }
}

/// `manual`: explain what to do after a rejected upload
pub struct ManualIntervention;

#[async_trait]
impl TaskBody<DeployContext> for ManualIntervention {
    async fn run(&self, ctx: &mut DeployContext, _progress: &Progress) -> Result<String, TaskError> {
        let version = ctx
            .manifest()
            .map(|m| m.version.clone())
            .unwrap_or_else(|_| "the new version".to_string());

        Err(TaskError::terminal(
            "The store did not accept the upload; manual intervention required",
            vec![
                format!("Open the developer dashboard: {}", DASHBOARD_URL),
                format!(
                    "Check that item {} is not pending review and accepts new packages",
                    ctx.store.extension_id()
                ),
                format!("Make sure {} is greater than the published version", version),
                "Re-run the deploy once the item is updatable".to_string(),
            ],
        ))
    }
}

/// `publish`: submit the uploaded package
pub struct PublishExtension;

#[async_trait]
impl TaskBody<DeployContext> for PublishExtension {
    async fn run(&self, ctx: &mut DeployContext, progress: &Progress) -> Result<String, TaskError> {
        progress.report("Requesting publication");
        let response = ctx
            .store
            .publish(ctx.publish_target.as_deref(), None, ctx.deploy_percentage)
            .await
            .map_err(store_error)?;

        if !response.is_published() {
            return Err(TaskError::terminal(
                format!("Publication failed: {}", response.failure_detail()),
                vec![
                    format!("Open the developer dashboard: {}", DASHBOARD_URL),
                    "Resolve the status shown for the item and submit it for review".to_string(),
                ],
            ));
        }

        let manifest = ctx.manifest()?;
        let mut message = format!(
            "Extension {} v{} published successfully",
            manifest.name, manifest.version
        );
        if response.is_pending_review() {
            message.push_str(
                " (Pending Review - Your extension requires an in-depth review due to requested permissions)",
            );
        }
        Ok(message)
    }
}

/// Build the deploy pipeline. The terminal task is `publish`, or `upload`
/// when publishing is turned off.
pub fn build_deploy_pipeline(options: DeployOptions) -> Pipeline<DeployContext> {
    let terminal = if options.no_publish { UPLOAD } else { PUBLISH };

    Pipeline::<DeployContext>::new("deploy", terminal)
        .task(
            Task::new("Preparing live-test project", PrepareLiveTest)
                .with_id(LIVE_TEST)
                .enabled(options.live_test)
                .exit_on_error(true),
        )
        .task(
            Task::new("Locating extension artifact", LocateArtifact)
                .with_id(ARTIFACT)
                .exit_on_error(true),
        )
        .task(
            Task::new("Checking current store status", CheckStatus)
                .with_id(STATUS)
                .exit_on_error(true),
        )
        .task(
            Task::new("Uploading extension to Chrome Web Store", UploadPackage)
                .with_id(UPLOAD)
                .depends_on(ARTIFACT, true),
        )
        .task(
            Task::new("Manual intervention required", ManualIntervention)
                .with_id(MANUAL)
                .depends_on(UPLOAD, false),
        )
        .task(
            Task::new("Publishing extension", PublishExtension)
                .with_id(PUBLISH)
                .depends_on(UPLOAD, true)
                .enabled(!options.no_publish),
        )
}
