//! Adapters for external systems.
//!
//! Each collaborator sits behind a trait where the pipelines need to swap
//! it for a fake: the extension store ([`StoreApi`]) and the CI secrets
//! store ([`SecretsSink`]). The OAuth client and loopback listener are only
//! used by the token flow and are concrete types.

pub mod gitlab;
pub mod identity;
pub mod loopback;
pub mod webstore;

use std::time::Duration;

pub use gitlab::{GitLabClient, SecretEntry, SecretsError, SecretsSink, UpsertOutcome};
pub use identity::{AuthError, OAuthClient};
pub use loopback::{CallbackError, LoopbackListener};
pub use webstore::{
    ChromeWebStore, Projection, PublishResponse, StoreApi, StoreError, UploadResponse,
};

/// Shared HTTP client with a per-request timeout and no retries
pub fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("extdeploy/", env!("CARGO_PKG_VERSION")))
        .build()
}
