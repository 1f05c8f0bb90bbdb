//! Credentials read from the environment.
//!
//! Every command reads the variables it needs in one pass and reports all
//! missing ones together. Values are never printed; `Debug` masks them.

use std::fmt;

use thiserror::Error;

pub const EXTENSION_ARTIFACT_ID: &str = "EXTENSION_ARTIFACT_ID";
pub const EXTENSION_PROJECT_FOLDER: &str = "EXTENSION_PROJECT_FOLDER";
pub const CLIENT_ID: &str = "GOOGLE_CLOUD_API_CLIENT_ID";
pub const CLIENT_SECRET: &str = "GOOGLE_CLOUD_API_CLIENT_SECRET";
pub const REFRESH_TOKEN: &str = "GOOGLE_CLOUD_API_REFRESH_TOKEN";
pub const GITLAB_ACCESS_TOKEN: &str = "GIT_LAB_ACCESS_TOKEN";
pub const GITLAB_PROJECT_ID: &str = "GIT_LAB_PROJECT_ID";

/// One or more required environment variables are unset or empty
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Missing required environment variables: {}", .0.join(", "))]
pub struct MissingEnv(pub Vec<String>);

/// Reads variables through a lookup function, remembering which are missing
pub struct EnvReader<F> {
    lookup: F,
    missing: Vec<String>,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    pub fn new(lookup: F) -> Self {
        Self {
            lookup,
            missing: Vec::new(),
        }
    }

    /// Read a required variable; empty values count as missing
    pub fn require(&mut self, name: &str) -> String {
        match self.optional(name) {
            Some(value) => value,
            None => {
                if !self.missing.iter().any(|m| m == name) {
                    self.missing.push(name.to_string());
                }
                String::new()
            }
        }
    }

    pub fn optional(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.trim().is_empty())
    }

    /// Fail with every variable that was required but absent
    pub fn finish(self) -> Result<(), MissingEnv> {
        if self.missing.is_empty() {
            Ok(())
        } else {
            Err(MissingEnv(self.missing))
        }
    }
}

/// Lookup backed by the process environment
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Credentials for the store API
#[derive(Clone, PartialEq, Eq)]
pub struct StoreCredentials {
    pub extension_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl StoreCredentials {
    pub fn from_env() -> Result<Self, MissingEnv> {
        let mut env = EnvReader::new(process_env);
        let creds = Self::read(&mut env);
        env.finish()?;
        Ok(creds)
    }

    pub fn read<F: Fn(&str) -> Option<String>>(env: &mut EnvReader<F>) -> Self {
        Self {
            extension_id: env.require(EXTENSION_ARTIFACT_ID),
            client_id: env.require(CLIENT_ID),
            client_secret: env.require(CLIENT_SECRET),
            refresh_token: env.require(REFRESH_TOKEN),
        }
    }
}

impl fmt::Debug for StoreCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("extension_id", &self.extension_id)
            .field("client_id", &mask(&self.client_id))
            .field("client_secret", &"***")
            .field("refresh_token", &"***")
            .finish()
    }
}

/// OAuth client registration used by the consent flow
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl OAuthCredentials {
    pub fn read<F: Fn(&str) -> Option<String>>(env: &mut EnvReader<F>) -> Self {
        Self {
            client_id: env.require(CLIENT_ID),
            client_secret: env.require(CLIENT_SECRET),
        }
    }
}

impl fmt::Debug for OAuthCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthCredentials")
            .field("client_id", &mask(&self.client_id))
            .field("client_secret", &"***")
            .finish()
    }
}

/// Access to the CI variable store
#[derive(Clone, PartialEq, Eq)]
pub struct GitLabCredentials {
    pub access_token: String,
    pub project_id: String,
}

impl GitLabCredentials {
    pub fn read<F: Fn(&str) -> Option<String>>(env: &mut EnvReader<F>) -> Self {
        Self {
            access_token: env.require(GITLAB_ACCESS_TOKEN),
            project_id: env.require(GITLAB_PROJECT_ID),
        }
    }
}

impl fmt::Debug for GitLabCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitLabCredentials")
            .field("access_token", &"***")
            .field("project_id", &self.project_id)
            .finish()
    }
}

/// Keep the first few characters of an identifier for log correlation
pub fn mask(value: &str) -> String {
    let prefix: String = value.chars().take(4).collect();
    format!("{}***", prefix)
}
