//! `extdeploy fetch-token`: interactive OAuth consent and secret propagation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use crate::adapters::{http_client, GitLabClient, LoopbackListener, OAuthClient};
use crate::config::credentials::{process_env, EnvReader};
use crate::config::{load_config, GitLabCredentials, OAuthCredentials};
use crate::deploy::{build_token_pipeline, TokenContext};

use super::{finish_run, run_pipeline};

#[derive(Args, Debug, Default)]
pub struct FetchTokenArgs {
    /// Print the login URL instead of opening a browser
    #[arg(long)]
    pub no_browser: bool,

    /// Seconds to wait for the browser callback (0 = wait forever)
    #[arg(long)]
    pub callback_timeout: Option<u64>,

    /// Write every run event to this file as JSON Lines
    #[arg(long)]
    pub report: Option<PathBuf>,
}

/// Resolve the callback wait from the flag, falling back to config
fn callback_timeout(flag: Option<u64>, configured: Option<Duration>) -> Option<Duration> {
    match flag {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => configured,
    }
}

pub async fn fetch_token(args: FetchTokenArgs) -> Result<()> {
    let mut env = EnvReader::new(process_env);
    let oauth_credentials = OAuthCredentials::read(&mut env);
    let gitlab_credentials = GitLabCredentials::read(&mut env);
    env.finish()?;

    let config = load_config(None)?;
    let http = http_client(config.http_timeout).context("Failed to build HTTP client")?;

    let listener = LoopbackListener::bind().await?;
    let oauth = OAuthClient::new(http.clone(), config.oauth.clone(), oauth_credentials.clone());
    let secrets = GitLabClient::new(http, &config.secrets, gitlab_credentials);

    let mut ctx = TokenContext::new(oauth, oauth_credentials, Arc::new(secrets), listener);
    ctx.open_browser = !args.no_browser;
    ctx.callback_timeout = callback_timeout(args.callback_timeout, config.oauth.callback_timeout);
    ctx.secret_flags = (config.secrets.protected, config.secrets.masked);

    eprintln!("🔑 Follow the steps at this URL to generate the API keys:");
    eprintln!("   https://github.com/fregante/chrome-webstore-upload-keys");
    eprintln!("   Callback listening on {}\n", ctx.redirect_uri);

    let pipeline = build_token_pipeline();
    let report = run_pipeline(&pipeline, &mut ctx, args.report.as_deref()).await?;
    finish_run(&report, "Refresh token stored in GitLab.");
    Ok(())
}
