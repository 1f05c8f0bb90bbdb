//! Chrome Web Store API client.
//!
//! Endpoints:
//! - GET  {api}/{version}/items/{id}?projection=DRAFT|PUBLISHED
//! - PUT  {upload}/{version}/items/{id}
//! - POST {api}/{version}/items/{id}/publish?publishTarget=...&deployPercentage=...
//!
//! Auth: Bearer access token, minted from the refresh token per operation
//! unless the caller passes one in.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::identity::{refresh_access_token, AuthError};
use crate::config::{StoreCredentials, StoreSettings};

const API_VERSION_HEADER: &str = "x-goog-api-version";

#[derive(Debug, Error)]
pub enum StoreError {
    /// The refresh token was rejected (expired, revoked, wrong client)
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Store API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Invalid store response: {0}")]
    InvalidResponse(String),
}

/// Which copy of the item `get_status` reports on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Projection {
    #[default]
    Draft,
    Published,
}

impl Projection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Projection::Draft => "DRAFT",
            Projection::Published => "PUBLISHED",
        }
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Projection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(Projection::Draft),
            "PUBLISHED" => Ok(Projection::Published),
            other => Err(format!(
                "Unknown projection '{}' (expected DRAFT or PUBLISHED)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub error_code: Option<String>,
    pub error_detail: Option<String>,
}

/// Response to an upload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub kind: Option<String>,
    pub id: Option<String>,
    pub upload_state: Option<String>,
    #[serde(default)]
    pub item_error: Vec<ItemError>,
}

impl UploadResponse {
    pub fn is_success(&self) -> bool {
        self.upload_state.as_deref() == Some("SUCCESS")
    }

    /// First error detail reported by the store
    pub fn failure_detail(&self) -> &str {
        self.item_error
            .first()
            .and_then(|e| e.error_detail.as_deref())
            .unwrap_or("Unknown error")
    }
}

/// Response to a publish request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub kind: Option<String>,
    pub item_id: Option<String>,
    #[serde(default)]
    pub status: Vec<String>,
    #[serde(default)]
    pub status_detail: Vec<String>,
}

impl PublishResponse {
    pub fn is_pending_review(&self) -> bool {
        self.status.iter().any(|s| s == "ITEM_PENDING_REVIEW")
    }

    pub fn is_published(&self) -> bool {
        self.status.iter().any(|s| s == "OK") || self.is_pending_review()
    }

    pub fn failure_detail(&self) -> &str {
        self.status_detail
            .first()
            .map(String::as_str)
            .unwrap_or("Unknown error")
    }
}

/// Operations against the extension store
#[async_trait]
pub trait StoreApi: Send + Sync {
    fn extension_id(&self) -> &str;

    /// Mint a fresh access token
    async fn fetch_access_token(&self) -> Result<String, StoreError>;

    async fn get_status(
        &self,
        projection: Option<Projection>,
        token: Option<&str>,
    ) -> Result<serde_json::Value, StoreError>;

    /// Upload a new package for the existing item
    async fn upload_existing(
        &self,
        package: Option<Vec<u8>>,
        token: Option<&str>,
    ) -> Result<UploadResponse, StoreError>;

    async fn publish(
        &self,
        target: Option<&str>,
        token: Option<&str>,
        deploy_percentage: Option<u8>,
    ) -> Result<PublishResponse, StoreError>;
}

/// Chrome Web Store API client
pub struct ChromeWebStore {
    http: reqwest::Client,
    settings: StoreSettings,
    credentials: StoreCredentials,
}

impl ChromeWebStore {
    pub fn new(http: reqwest::Client, settings: StoreSettings, credentials: StoreCredentials) -> Self {
        Self {
            http,
            settings,
            credentials,
        }
    }

    fn item_url(&self) -> String {
        format!(
            "{}/{}/items/{}",
            self.settings.api_url.trim_end_matches('/'),
            self.settings.api_version,
            self.credentials.extension_id
        )
    }

    fn upload_url(&self) -> String {
        format!(
            "{}/{}/items/{}",
            self.settings.upload_url.trim_end_matches('/'),
            self.settings.api_version,
            self.credentials.extension_id
        )
    }

    async fn resolve_token(&self, token: Option<&str>) -> Result<String, StoreError> {
        match token {
            Some(token) => Ok(token.to_string()),
            None => self.fetch_access_token().await,
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, StoreError> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(StoreError::Api {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| StoreError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl StoreApi for ChromeWebStore {
    fn extension_id(&self) -> &str {
        &self.credentials.extension_id
    }

    async fn fetch_access_token(&self) -> Result<String, StoreError> {
        debug!("Requesting store access token");
        let token = refresh_access_token(
            &self.http,
            &self.settings.token_url,
            &self.credentials.client_id,
            &self.credentials.client_secret,
            &self.credentials.refresh_token,
        )
        .await?;
        Ok(token)
    }

    async fn get_status(
        &self,
        projection: Option<Projection>,
        token: Option<&str>,
    ) -> Result<serde_json::Value, StoreError> {
        let token = self.resolve_token(token).await?;
        let projection = projection.unwrap_or_default();

        let response = self
            .http
            .get(self.item_url())
            .query(&[("projection", projection.as_str())])
            .bearer_auth(&token)
            .header(API_VERSION_HEADER, "2")
            .send()
            .await?;

        Self::read_json(response).await
    }

    async fn upload_existing(
        &self,
        package: Option<Vec<u8>>,
        token: Option<&str>,
    ) -> Result<UploadResponse, StoreError> {
        let package =
            package.ok_or_else(|| StoreError::InvalidArgument("Read stream missing".to_string()))?;
        let token = self.resolve_token(token).await?;

        debug!(bytes = package.len(), "Uploading package");
        let response = self
            .http
            .put(self.upload_url())
            .bearer_auth(&token)
            .header(API_VERSION_HEADER, "2")
            .body(package)
            .send()
            .await?;

        Self::read_json(response).await
    }

    async fn publish(
        &self,
        target: Option<&str>,
        token: Option<&str>,
        deploy_percentage: Option<u8>,
    ) -> Result<PublishResponse, StoreError> {
        let token = self.resolve_token(token).await?;
        let target = target.unwrap_or(self.settings.publish_target.as_str());

        let mut request = self
            .http
            .post(format!("{}/publish", self.item_url()))
            .query(&[("publishTarget", target)]);
        if let Some(percentage) = deploy_percentage {
            request = request.query(&[("deployPercentage", percentage)]);
        }

        let response = request
            .bearer_auth(&token)
            .header(API_VERSION_HEADER, "2")
            .body(Vec::new())
            .send()
            .await?;

        Self::read_json(response).await
    }
}
