//! GitLab CI/CD variable client.
//!
//! Endpoint: PUT {api}/projects/{project}/variables/{key}, falling back to
//! POST {api}/projects/{project}/variables when the variable does not exist.
//! Auth: PRIVATE-TOKEN header

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::{GitLabCredentials, SecretsSettings};

#[derive(Debug, Error)]
pub enum SecretsError {
    #[error("No value provided for variable {0}")]
    EmptyValue(String),

    #[error("Invalid GitLab API URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to create/update variable {key}: {source}")]
    Http {
        key: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to create/update variable {key}: HTTP {status}: {body}")]
    Api {
        key: String,
        status: u16,
        body: String,
    },
}

/// A CI variable to write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecretEntry {
    pub key: String,
    pub value: String,
    pub protected: bool,
    pub masked: bool,
}

impl SecretEntry {
    /// A protected, masked variable
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            protected: true,
            masked: true,
        }
    }

    pub fn with_flags(mut self, protected: bool, masked: bool) -> Self {
        self.protected = protected;
        self.masked = masked;
        self
    }
}

/// Which request stored the variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Updated,
    Created,
}

impl UpsertOutcome {
    pub fn describe(&self, key: &str) -> String {
        match self {
            UpsertOutcome::Updated => format!("Variable {} updated successfully", key),
            UpsertOutcome::Created => format!("Variable {} created successfully", key),
        }
    }
}

/// Destination for CI secrets
#[async_trait]
pub trait SecretsSink: Send + Sync {
    async fn upsert(&self, entry: &SecretEntry) -> Result<UpsertOutcome, SecretsError>;
}

/// GitLab project variables API client
pub struct GitLabClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
    project_id: String,
}

impl GitLabClient {
    pub fn new(http: reqwest::Client, settings: &SecretsSettings, credentials: GitLabCredentials) -> Self {
        Self {
            http,
            api_url: settings.api_url.clone(),
            token: credentials.access_token.trim().to_string(),
            project_id: credentials.project_id,
        }
    }

    /// `{api}/projects/{project}/variables[/{key}]`, percent-encoding the project id
    fn variables_url(&self, key: Option<&str>) -> Result<Url, SecretsError> {
        let mut url =
            Url::parse(&self.api_url).map_err(|e| SecretsError::InvalidUrl(e.to_string()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| SecretsError::InvalidUrl(self.api_url.clone()))?;
            segments
                .pop_if_empty()
                .push("projects")
                .push(&self.project_id)
                .push("variables");
            if let Some(key) = key {
                segments.push(key);
            }
        }
        Ok(url)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        entry: &SecretEntry,
    ) -> Result<reqwest::Response, SecretsError> {
        request
            .header("PRIVATE-TOKEN", &self.token)
            .json(entry)
            .send()
            .await
            .map_err(|source| SecretsError::Http {
                key: entry.key.clone(),
                source,
            })
    }

    async fn api_error(entry: &SecretEntry, response: reqwest::Response) -> SecretsError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        SecretsError::Api {
            key: entry.key.clone(),
            status,
            body,
        }
    }
}

#[async_trait]
impl SecretsSink for GitLabClient {
    async fn upsert(&self, entry: &SecretEntry) -> Result<UpsertOutcome, SecretsError> {
        if entry.value.is_empty() {
            return Err(SecretsError::EmptyValue(entry.key.clone()));
        }

        let update_url = self.variables_url(Some(&entry.key))?;
        debug!(key = %entry.key, "Updating CI variable");
        let response = self.send(self.http.put(update_url), entry).await?;

        if response.status() == StatusCode::NOT_FOUND {
            let create_url = self.variables_url(None)?;
            debug!(key = %entry.key, "Variable not found, creating");
            let response = self.send(self.http.post(create_url), entry).await?;
            if !response.status().is_success() {
                return Err(Self::api_error(entry, response).await);
            }
            return Ok(UpsertOutcome::Created);
        }

        if !response.status().is_success() {
            return Err(Self::api_error(entry, response).await);
        }

        Ok(UpsertOutcome::Updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(api_url: &str, project_id: &str) -> GitLabClient {
        GitLabClient::new(
            reqwest::Client::new(),
            &SecretsSettings {
                api_url: api_url.to_string(),
                ..SecretsSettings::default()
            },
            GitLabCredentials {
                access_token: "  glpat-token\n".to_string(),
                project_id: project_id.to_string(),
            },
        )
    }

    #[test]
    fn test_variables_url_encodes_project_path() {
        let client = client("https://gitlab.example.com/api/v4/", "group/extension");

        assert_eq!(
            client.variables_url(Some("GOOGLE_CLOUD_API_CLIENT_ID")).unwrap().as_str(),
            "https://gitlab.example.com/api/v4/projects/group%2Fextension/variables/GOOGLE_CLOUD_API_CLIENT_ID"
        );
        assert_eq!(
            client.variables_url(None).unwrap().as_str(),
            "https://gitlab.example.com/api/v4/projects/group%2Fextension/variables"
        );
    }

    #[test]
    fn test_token_is_trimmed() {
        assert_eq!(client("https://gitlab.com/api/v4", "1").token, "glpat-token");
    }

    #[test]
    fn test_secret_entry_defaults() {
        let entry = SecretEntry::new("KEY", "value");
        assert!(entry.protected);
        assert!(entry.masked);

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"key": "KEY", "value": "value", "protected": true, "masked": true})
        );
    }

    #[tokio::test]
    async fn test_empty_value_rejected_without_request() {
        let client = client("http://127.0.0.1:9/api/v4", "1");
        let err = client.upsert(&SecretEntry::new("KEY", "")).await.unwrap_err();
        assert!(matches!(err, SecretsError::EmptyValue(ref key) if key == "KEY"));
    }
}
