//! Token-fetch pipeline.
//!
//! Walks the user through Google's consent screen, captures the redirect
//! on a loopback listener, exchanges the code for a refresh token and
//! stores the three Google credentials as CI variables.

use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::adapters::{LoopbackListener, OAuthClient, SecretEntry, SecretsSink};
use crate::config::credentials::{CLIENT_ID, CLIENT_SECRET, REFRESH_TOKEN};
use crate::config::OAuthCredentials;
use crate::core::{Pipeline, Progress, Task, TaskBody, TaskError};

pub const LOGIN: &str = "login";
pub const CODE: &str = "code";
pub const REFRESH: &str = "refresh-token";
pub const SECRET_CLIENT_ID: &str = "secret-client-id";
pub const SECRET_CLIENT_SECRET: &str = "secret-client-secret";
pub const SECRET_REFRESH_TOKEN: &str = "secret-refresh-token";
pub const FINISH: &str = "finish";

const KEYS_GUIDE_URL: &str = "https://github.com/fregante/chrome-webstore-upload-keys";

/// State threaded through the token-fetch tasks
pub struct TokenContext {
    pub oauth: OAuthClient,

    pub credentials: OAuthCredentials,

    pub secrets: Arc<dyn SecretsSink>,

    /// Taken (and dropped) by the `code` task
    pub listener: Option<LoopbackListener>,

    pub redirect_uri: String,

    /// Launch the platform browser instead of printing the URL
    pub open_browser: bool,

    /// `None` waits forever
    pub callback_timeout: Option<Duration>,

    /// `(protected, masked)` flags for every variable written
    pub secret_flags: (bool, bool),

    pub code: Option<String>,

    pub refresh_token: Option<String>,
}

impl TokenContext {
    pub fn new(
        oauth: OAuthClient,
        credentials: OAuthCredentials,
        secrets: Arc<dyn SecretsSink>,
        listener: LoopbackListener,
    ) -> Self {
        Self {
            oauth,
            credentials,
            secrets,
            redirect_uri: listener.redirect_uri(),
            listener: Some(listener),
            open_browser: true,
            callback_timeout: None,
            secret_flags: (true, true),
            code: None,
            refresh_token: None,
        }
    }
}

/// Platform command that opens a URL in the default browser
fn browser_command(url: &str) -> Command {
    if cfg!(target_os = "macos") {
        let mut cmd = Command::new("open");
        cmd.arg(url);
        cmd
    } else if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", "start", "", url]);
        cmd
    } else {
        let mut cmd = Command::new("xdg-open");
        cmd.arg(url);
        cmd
    }
}

pub fn open_in_browser(url: &str) -> std::io::Result<()> {
    browser_command(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
}

/// `login`: open (or print) the consent page
pub struct OpenLoginPage;

#[async_trait]
impl TaskBody<TokenContext> for OpenLoginPage {
    async fn run(&self, ctx: &mut TokenContext, progress: &Progress) -> Result<String, TaskError> {
        progress.report(format!("API keys guide: {}", KEYS_GUIDE_URL));

        let url = ctx
            .oauth
            .login_url(&ctx.redirect_uri)
            .map_err(|e| TaskError::setup(e.to_string()))?;
        let instructions = "Complete the process in the browser. Follow its steps and warnings (this is your own personal app)";

        if ctx.open_browser {
            match open_in_browser(&url) {
                Ok(()) => return Ok(instructions.to_string()),
                Err(e) => warn!(error = %e, "Could not launch a browser"),
            }
        }

        Ok(format!("{}\n\n   {}", instructions, url))
    }
}

/// `code`: wait for the redirect on the loopback listener
pub struct WaitForCode;

#[async_trait]
impl TaskBody<TokenContext> for WaitForCode {
    async fn run(&self, ctx: &mut TokenContext, _progress: &Progress) -> Result<String, TaskError> {
        let listener = ctx
            .listener
            .take()
            .ok_or_else(|| TaskError::setup("Callback listener already closed"))?;

        let code = listener
            .wait_for_code(ctx.callback_timeout)
            .await
            .map_err(|e| {
                TaskError::setup_with(
                    e.to_string(),
                    vec!["Run `extdeploy fetch-token` again and finish the consent screen".to_string()],
                )
            })?;

        debug!("Approval code received");
        ctx.code = Some(code);
        Ok("Approval code received from Google".to_string())
    }
}

/// `refresh-token`: exchange the approval code
pub struct ExchangeRefreshToken;

#[async_trait]
impl TaskBody<TokenContext> for ExchangeRefreshToken {
    async fn run(&self, ctx: &mut TokenContext, _progress: &Progress) -> Result<String, TaskError> {
        let code = ctx
            .code
            .as_deref()
            .ok_or_else(|| TaskError::setup("No approval code received"))?;

        let refresh_token = ctx
            .oauth
            .exchange_code(code, &ctx.redirect_uri)
            .await
            .map_err(|e| TaskError::TransientApi(e.to_string()))?;

        ctx.refresh_token = Some(refresh_token);
        Ok("Refresh token obtained successfully".to_string())
    }
}

/// Which credential a secrets task writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource {
    ClientId,
    ClientSecret,
    RefreshToken,
}

impl SecretSource {
    pub fn key(&self) -> &'static str {
        match self {
            SecretSource::ClientId => CLIENT_ID,
            SecretSource::ClientSecret => CLIENT_SECRET,
            SecretSource::RefreshToken => REFRESH_TOKEN,
        }
    }

    fn value(&self, ctx: &TokenContext) -> String {
        match self {
            SecretSource::ClientId => ctx.credentials.client_id.clone(),
            SecretSource::ClientSecret => ctx.credentials.client_secret.clone(),
            SecretSource::RefreshToken => ctx.refresh_token.clone().unwrap_or_default(),
        }
    }
}

/// Write one credential to the secrets sink
pub struct UpsertSecret(pub SecretSource);

#[async_trait]
impl TaskBody<TokenContext> for UpsertSecret {
    async fn run(&self, ctx: &mut TokenContext, _progress: &Progress) -> Result<String, TaskError> {
        let key = self.0.key();
        let (protected, masked) = ctx.secret_flags;
        let entry = SecretEntry::new(key, self.0.value(ctx)).with_flags(protected, masked);

        let outcome = ctx
            .secrets
            .upsert(&entry)
            .await
            .map_err(|e| TaskError::TransientApi(e.to_string()))?;

        Ok(outcome.describe(key))
    }
}

/// Build the token-fetch pipeline; `finish` is terminal
pub fn build_token_pipeline() -> Pipeline<TokenContext> {
    let secret = |id: &str, source: SecretSource| {
        Task::<TokenContext>::new(
            format!("Sending {} to GitLab", source.key()),
            UpsertSecret(source),
        )
        .with_id(id)
        .depends_on(REFRESH, true)
    };

    Pipeline::<TokenContext>::new("fetch-token", FINISH)
        .task(
            Task::new("Opening the login page in the browser", OpenLoginPage)
                .with_id(LOGIN)
                .exit_on_error(true),
        )
        .task(
            Task::new("Waiting for you in the browser", WaitForCode)
                .with_id(CODE)
                .exit_on_error(true),
        )
        .task(
            Task::new("Asking Google for the refresh token", ExchangeRefreshToken)
                .with_id(REFRESH)
                .exit_on_error(true),
        )
        .task(secret(SECRET_CLIENT_ID, SecretSource::ClientId))
        .task(secret(SECRET_CLIENT_SECRET, SecretSource::ClientSecret))
        .task(secret(SECRET_REFRESH_TOKEN, SecretSource::RefreshToken))
        .task(
            Task::from_fn("Finishing", |_: &mut TokenContext, _| {
                Ok("Process completed successfully! All Google variables were sent to GitLab.".to_string())
            })
            .with_id(FINISH)
            .depends_on(SECRET_CLIENT_ID, true)
            .depends_on(SECRET_CLIENT_SECRET, true)
            .depends_on(SECRET_REFRESH_TOKEN, true),
        )
}
