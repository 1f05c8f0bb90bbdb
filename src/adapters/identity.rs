//! Google identity provider client.
//!
//! Two exchanges: an authorization code from the consent screen becomes a
//! long-lived refresh token, and a refresh token becomes a short-lived
//! access token for the store API.

use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

use crate::config::{OAuthCredentials, OAuthSettings};

/// Errors talking to the identity provider
#[derive(Debug, Error)]
pub enum AuthError {
    /// The provider refused; the message is its `error_description` verbatim
    #[error("{0}")]
    Rejected(String),

    /// The authorization code could not be exchanged
    #[error("Error while getting the refresh token: {0}")]
    Exchange(String),

    #[error("Failed to reach identity provider: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid login URL: {0}")]
    InvalidUrl(String),
}

/// Error body returned by Google's OAuth endpoints
#[derive(Debug, Default, Deserialize)]
struct ProviderError {
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Pick the most specific message from an error body
fn provider_message(status: reqwest::StatusCode, body: &str) -> String {
    let parsed: ProviderError = serde_json::from_str(body).unwrap_or_default();
    parsed
        .error_description
        .filter(|d| !d.is_empty())
        .or(parsed.error.filter(|e| !e.is_empty()))
        .unwrap_or_else(|| format!("HTTP {}", status))
}

/// Exchange a refresh token for an access token
pub async fn refresh_access_token(
    http: &reqwest::Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<String, AuthError> {
    let response = http
        .post(token_url)
        .form(&[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .await?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    if !status.is_success() {
        return Err(AuthError::Rejected(provider_message(status, &body)));
    }

    let token: TokenResponse = serde_json::from_str(&body)
        .map_err(|e| AuthError::Rejected(format!("Invalid token response: {}", e)))?;

    token
        .access_token
        .ok_or_else(|| AuthError::Rejected("Token response did not include an access token".to_string()))
}

/// Client for the interactive consent flow
pub struct OAuthClient {
    http: reqwest::Client,
    settings: OAuthSettings,
    credentials: OAuthCredentials,
}

impl OAuthClient {
    pub fn new(http: reqwest::Client, settings: OAuthSettings, credentials: OAuthCredentials) -> Self {
        Self {
            http,
            settings,
            credentials,
        }
    }

    /// Consent page URL that redirects back to `redirect_uri` with a code
    pub fn login_url(&self, redirect_uri: &str) -> Result<String, AuthError> {
        let url = Url::parse_with_params(
            &self.settings.auth_url,
            &[
                ("response_type", "code"),
                ("access_type", "offline"),
                ("client_id", self.credentials.client_id.trim()),
                ("scope", self.settings.scope.as_str()),
                ("redirect_uri", redirect_uri),
            ],
        )
        .map_err(|e| AuthError::InvalidUrl(e.to_string()))?;

        Ok(url.to_string())
    }

    /// Exchange an authorization code for a refresh token
    pub async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<String, AuthError> {
        let response = self
            .http
            .post(&self.settings.token_url)
            .form(&[
                ("code", code),
                ("client_id", self.credentials.client_id.trim()),
                ("client_secret", self.credentials.client_secret.trim()),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| AuthError::Exchange(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        let token: TokenResponse = match serde_json::from_str(&body) {
            Ok(token) => token,
            Err(_) if !status.is_success() => {
                return Err(AuthError::Exchange(provider_message(status, &body)))
            }
            Err(e) => return Err(AuthError::Exchange(format!("Invalid token response: {}", e))),
        };

        if let Some(error) = token.error {
            let detail = token.error_description.unwrap_or(error);
            return Err(AuthError::Exchange(detail));
        }
        if !status.is_success() {
            return Err(AuthError::Exchange(format!("HTTP {}", status)));
        }

        token
            .refresh_token
            .ok_or_else(|| AuthError::Exchange("response did not include a refresh token".to_string()))
    }

    /// Exchange a refresh token for an access token using this client's registration
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<String, AuthError> {
        refresh_access_token(
            &self.http,
            &self.settings.token_url,
            &self.credentials.client_id,
            &self.credentials.client_secret,
            refresh_token,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_message_prefers_description() {
        let status = reqwest::StatusCode::BAD_REQUEST;
        assert_eq!(
            provider_message(status, r#"{"error":"invalid_grant","error_description":"Bad Request"}"#),
            "Bad Request"
        );
        assert_eq!(provider_message(status, r#"{"error":"invalid_grant"}"#), "invalid_grant");
        assert_eq!(provider_message(status, "<html>"), "HTTP 400 Bad Request");
    }

    #[test]
    fn test_login_url() {
        let client = OAuthClient::new(
            reqwest::Client::new(),
            OAuthSettings::default(),
            OAuthCredentials {
                client_id: " my-client.apps.googleusercontent.com ".to_string(),
                client_secret: "secret".to_string(),
            },
        );

        let url = client.login_url("http://127.0.0.1:8123").unwrap();
        let parsed = Url::parse(&url).unwrap();
        let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();

        assert!(url.starts_with("https://accounts.google.com/o/oauth2/auth?"));
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["client_id"], "my-client.apps.googleusercontent.com");
        assert_eq!(params["scope"], "https://www.googleapis.com/auth/chromewebstore");
        assert_eq!(params["redirect_uri"], "http://127.0.0.1:8123");
        assert!(!url.contains("secret"));
    }
}
