//! The deploy pipeline against an in-memory store.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use extdeploy::adapters::{
    AuthError, Projection, PublishResponse, StoreApi, StoreError, UploadResponse,
};
use extdeploy::config::LiveTestSettings;
use extdeploy::deploy::{
    build_deploy_pipeline, DeployContext, DeployOptions, ARTIFACT, LIVE_TEST, MANUAL, PUBLISH,
    STATUS, UPLOAD,
};
use extdeploy::domain::SkipReason;
use extdeploy::{Orchestrator, RunReport, TaskOutcome};
use tempfile::TempDir;

#[derive(Default)]
struct FakeStore {
    reject_token: bool,
    upload: UploadResponse,
    publish: PublishResponse,
    /// Returned (once) by `upload_existing` instead of `upload`
    upload_error: Mutex<Option<StoreError>>,
    calls: Mutex<Vec<String>>,
    uploaded: Mutex<Vec<u8>>,
    published_with: Mutex<Option<(Option<String>, Option<u8>)>>,
}

impl FakeStore {
    fn accepting() -> Self {
        Self {
            upload: UploadResponse {
                upload_state: Some("SUCCESS".to_string()),
                ..UploadResponse::default()
            },
            publish: PublishResponse {
                status: vec!["OK".to_string()],
                ..PublishResponse::default()
            },
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &str) -> Result<(), StoreError> {
        self.calls.lock().unwrap().push(call.to_string());
        if self.reject_token {
            return Err(AuthError::Rejected("Bad Request".to_string()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl StoreApi for FakeStore {
    fn extension_id(&self) -> &str {
        "abcdefghijklmnop"
    }

    async fn fetch_access_token(&self) -> Result<String, StoreError> {
        self.record("token")?;
        Ok("access".to_string())
    }

    async fn get_status(
        &self,
        _projection: Option<Projection>,
        _token: Option<&str>,
    ) -> Result<serde_json::Value, StoreError> {
        self.record("status")?;
        Ok(serde_json::json!({"id": "abcdefghijklmnop", "crxVersion": "1.2.2", "uploadState": "SUCCESS"}))
    }

    async fn upload_existing(
        &self,
        package: Option<Vec<u8>>,
        _token: Option<&str>,
    ) -> Result<UploadResponse, StoreError> {
        self.record("upload")?;
        if let Some(err) = self.upload_error.lock().unwrap().take() {
            return Err(err);
        }
        *self.uploaded.lock().unwrap() = package.unwrap_or_default();
        Ok(self.upload.clone())
    }

    async fn publish(
        &self,
        target: Option<&str>,
        _token: Option<&str>,
        deploy_percentage: Option<u8>,
    ) -> Result<PublishResponse, StoreError> {
        self.record("publish")?;
        *self.published_with.lock().unwrap() = Some((target.map(str::to_string), deploy_percentage));
        Ok(self.publish.clone())
    }
}

const ZIP_BYTES: &[u8] = b"PK\x03\x04 fake zip";
const ARTIFACT_NAME: &str = "My Ext(chrome)-1.2.3.zip";

/// A project with a built manifest and its packaged zip
fn project(root: &Path, with_zip: bool) -> (PathBuf, PathBuf) {
    let dist = root.join(".extension").join("dist");
    let artifacts = root.join(".extension").join("artifacts");
    std::fs::create_dir_all(&dist).unwrap();
    std::fs::create_dir_all(&artifacts).unwrap();
    std::fs::write(
        dist.join("manifest.json"),
        r#"{"name":"My Ext","version":"1.2.3","manifest_version":3}"#,
    )
    .unwrap();
    if with_zip {
        std::fs::write(artifacts.join(ARTIFACT_NAME), ZIP_BYTES).unwrap();
    }
    (dist, artifacts)
}

fn context(store: Arc<FakeStore>, dist: PathBuf, artifacts: PathBuf) -> DeployContext {
    DeployContext {
        store,
        live_test: LiveTestSettings {
            extension_dir: dist.join("unused"),
            artifacts_dir: artifacts.join("unused"),
        },
        dist_dir: dist,
        artifacts_dir: artifacts,
        publish_target: Some("default".to_string()),
        deploy_percentage: None,
        artifact: None,
    }
}

async fn deploy(ctx: &mut DeployContext, options: DeployOptions) -> RunReport {
    let pipeline = build_deploy_pipeline(options);
    Orchestrator::new().run(&pipeline, ctx).await.unwrap()
}

#[tokio::test]
async fn test_happy_path_uploads_and_publishes() {
    let dir = TempDir::new().unwrap();
    let (dist, artifacts) = project(dir.path(), true);
    let store = Arc::new(FakeStore::accepting());
    let mut ctx = context(store.clone(), dist, artifacts);
    ctx.deploy_percentage = Some(50);

    let report = deploy(&mut ctx, DeployOptions::default()).await;

    assert!(report.succeeded());
    assert_eq!(report.exit_code(), 0);
    assert_eq!(store.calls(), vec!["status", "upload", "publish"]);
    assert_eq!(store.uploaded.lock().unwrap().as_slice(), ZIP_BYTES);
    assert_eq!(
        *store.published_with.lock().unwrap(),
        Some((Some("default".to_string()), Some(50)))
    );

    assert_eq!(report.task(LIVE_TEST).unwrap().skipped, Some(SkipReason::Disabled));
    assert!(report.outcome(ARTIFACT).message().unwrap().starts_with(ARTIFACT_NAME));
    assert_eq!(
        report.outcome(UPLOAD),
        TaskOutcome::Succeeded("Extension My Ext v1.2.3 uploaded successfully".to_string())
    );
    assert_eq!(report.outcome(MANUAL), TaskOutcome::NotRun);
    assert_eq!(
        report.outcome(PUBLISH),
        TaskOutcome::Succeeded("Extension My Ext v1.2.3 published successfully".to_string())
    );

    let artifact = ctx.artifact.as_ref().unwrap();
    assert!(artifact.sha256.as_deref().unwrap().starts_with("sha256:"));
}

#[tokio::test]
async fn test_pending_review_still_succeeds() {
    let dir = TempDir::new().unwrap();
    let (dist, artifacts) = project(dir.path(), true);
    let store = Arc::new(FakeStore {
        publish: PublishResponse {
            status: vec!["ITEM_PENDING_REVIEW".to_string()],
            ..PublishResponse::default()
        },
        ..FakeStore::accepting()
    });
    let mut ctx = context(store, dist, artifacts);

    let report = deploy(&mut ctx, DeployOptions::default()).await;

    assert!(report.succeeded());
    assert!(report
        .outcome(PUBLISH)
        .message()
        .unwrap()
        .contains("Pending Review"));
}

#[tokio::test]
async fn test_rejected_upload_runs_manual_step() {
    let dir = TempDir::new().unwrap();
    let (dist, artifacts) = project(dir.path(), true);
    let store = Arc::new(FakeStore {
        upload: UploadResponse {
            upload_state: Some("FAILURE".to_string()),
            item_error: vec![extdeploy::adapters::webstore::ItemError {
                error_code: Some("PKG_INVALID_VERSION_NUMBER".to_string()),
                error_detail: Some("Version must be greater".to_string()),
            }],
            ..UploadResponse::default()
        },
        ..FakeStore::accepting()
    });
    let mut ctx = context(store.clone(), dist, artifacts);

    let report = deploy(&mut ctx, DeployOptions::default()).await;

    assert_eq!(
        report.outcome(UPLOAD),
        TaskOutcome::Failed("failed: Upload failed: Version must be greater".to_string())
    );
    assert!(matches!(report.outcome(MANUAL), TaskOutcome::Failed(_)));
    assert!(!report.task(MANUAL).unwrap().remediation.is_empty());
    assert!(matches!(
        report.task(PUBLISH).unwrap().skipped,
        Some(SkipReason::DependencyNotSatisfied { .. })
    ));
    assert!(!store.calls().contains(&"publish".to_string()));
    assert!(!report.is_halted());
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_upload_http_error_runs_manual_step() {
    let dir = TempDir::new().unwrap();
    let (dist, artifacts) = project(dir.path(), true);
    let store = Arc::new(FakeStore {
        upload_error: Mutex::new(Some(StoreError::Api {
            status: 500,
            body: "backendError".to_string(),
        })),
        ..FakeStore::accepting()
    });
    let mut ctx = context(store.clone(), dist, artifacts);

    let report = deploy(&mut ctx, DeployOptions::default()).await;

    assert_eq!(
        report.outcome(UPLOAD),
        TaskOutcome::Failed("failed: Store API error (500): backendError".to_string())
    );
    assert!(matches!(report.outcome(MANUAL), TaskOutcome::Failed(_)));
    assert!(!report.task(MANUAL).unwrap().remediation.is_empty());
    assert!(matches!(
        report.task(PUBLISH).unwrap().skipped,
        Some(SkipReason::DependencyNotSatisfied { .. })
    ));
    assert_eq!(store.calls(), vec!["status", "upload"]);
    assert!(!report.is_halted());
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_no_publish_stops_after_upload() {
    let dir = TempDir::new().unwrap();
    let (dist, artifacts) = project(dir.path(), true);
    let store = Arc::new(FakeStore::accepting());
    let mut ctx = context(store.clone(), dist, artifacts);

    let report = deploy(
        &mut ctx,
        DeployOptions {
            live_test: false,
            no_publish: true,
        },
    )
    .await;

    assert!(report.succeeded());
    assert_eq!(report.terminal_task, UPLOAD);
    assert_eq!(store.calls(), vec!["status", "upload"]);
    assert_eq!(report.task(PUBLISH).unwrap().skipped, Some(SkipReason::Disabled));
}

#[tokio::test]
async fn test_missing_artifact_halts_before_store_calls() {
    let dir = TempDir::new().unwrap();
    let (dist, artifacts) = project(dir.path(), false);
    let store = Arc::new(FakeStore::accepting());
    let mut ctx = context(store.clone(), dist, artifacts);

    let report = deploy(&mut ctx, DeployOptions::default()).await;

    assert!(report.is_halted());
    assert_eq!(report.exit_code(), 1);
    assert!(store.calls().is_empty());

    let message = report.outcome(ARTIFACT).message().unwrap().to_string();
    assert!(message.starts_with("failed: Artifact not found"));
    assert!(message.contains(ARTIFACT_NAME));
    assert!(!report.task(ARTIFACT).unwrap().remediation.is_empty());

    for id in [STATUS, UPLOAD, MANUAL, PUBLISH] {
        assert_eq!(report.task(id).unwrap().skipped, Some(SkipReason::Halted));
    }
}

#[tokio::test]
async fn test_rejected_refresh_token_halts_at_status() {
    let dir = TempDir::new().unwrap();
    let (dist, artifacts) = project(dir.path(), true);
    let store = Arc::new(FakeStore {
        reject_token: true,
        ..FakeStore::accepting()
    });
    let mut ctx = context(store.clone(), dist, artifacts);

    let report = deploy(&mut ctx, DeployOptions::default()).await;

    assert!(report.is_halted());
    assert_eq!(store.calls(), vec!["status"]);
    assert_eq!(
        report.outcome(STATUS),
        TaskOutcome::Failed("failed: Invalid refresh token: Bad Request".to_string())
    );
    let remediation = &report.task(STATUS).unwrap().remediation;
    assert!(remediation[0].contains("extdeploy fetch-token"));
}

#[tokio::test]
async fn test_blocked_publication_fails_the_run() {
    let dir = TempDir::new().unwrap();
    let (dist, artifacts) = project(dir.path(), true);
    let store = Arc::new(FakeStore {
        publish: PublishResponse {
            status: vec!["ITEM_NOT_UPDATABLE".to_string()],
            status_detail: vec!["Item is in review".to_string()],
            ..PublishResponse::default()
        },
        ..FakeStore::accepting()
    });
    let mut ctx = context(store, dist, artifacts);

    let report = deploy(&mut ctx, DeployOptions::default()).await;

    assert!(!report.succeeded());
    assert_eq!(
        report.outcome(PUBLISH),
        TaskOutcome::Failed("failed: Publication failed: Item is in review".to_string())
    );
    assert!(!report.task(PUBLISH).unwrap().remediation.is_empty());
}

#[tokio::test]
async fn test_live_test_prepares_project_then_deploys() {
    let dir = TempDir::new().unwrap();
    let sample = dir.path().join("sample");
    let extension_dir = sample.join("test").join("extension");
    let web_ext = sample.join("web-ext-artifacts");
    std::fs::create_dir_all(&extension_dir).unwrap();
    std::fs::create_dir_all(&web_ext).unwrap();
    std::fs::write(
        extension_dir.join("manifest.json"),
        r#"{"name":"Live Test: Demo","version":"0.0.1","manifest_version":3}"#,
    )
    .unwrap();
    std::fs::write(web_ext.join("live_test-0.0.1.zip"), ZIP_BYTES).unwrap();

    let project = dir.path().join("project");
    let store = Arc::new(FakeStore::accepting());
    let mut ctx = context(
        store.clone(),
        project.join(".extension").join("dist"),
        project.join(".extension").join("artifacts"),
    );
    ctx.live_test = LiveTestSettings {
        extension_dir,
        artifacts_dir: web_ext,
    };

    let report = deploy(
        &mut ctx,
        DeployOptions {
            live_test: true,
            no_publish: false,
        },
    )
    .await;

    assert!(report.succeeded(), "{:?}", report.tasks);
    assert!(report.outcome(LIVE_TEST).is_success());
    assert!(project
        .join(".extension")
        .join("artifacts")
        .join("Live Test- Demo(chrome)-0.0.1.zip")
        .is_file());
    assert_eq!(store.uploaded.lock().unwrap().as_slice(), ZIP_BYTES);
}
