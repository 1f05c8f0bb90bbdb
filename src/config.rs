//! Configuration for extdeploy.
//!
//! Configuration sources (highest priority first):
//! 1. CLI flags (applied by the command that needs them)
//! 2. Config file (.extdeploy/config.yaml)
//! 3. Built-in defaults (Chrome Web Store, Google OAuth, gitlab.com)
//!
//! Config file discovery:
//! - Searches the project folder and its parents, then the working directory
//!   and its parents, for .extdeploy/config.yaml
//! - `live_test` paths are relative to the directory containing .extdeploy/
//! - `paths.dist` / `paths.artifacts` are relative to the project folder
//!
//! Credentials never live in the config file; see [`credentials`].

pub mod credentials;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

pub use credentials::{GitLabCredentials, MissingEnv, OAuthCredentials, StoreCredentials};

/// Directory holding the config file
pub const CONFIG_DIR: &str = ".extdeploy";

pub const DEFAULT_DIST_DIR: &str = ".extension/dist";
pub const DEFAULT_ARTIFACTS_DIR: &str = ".extension/artifacts";

pub const DEFAULT_STORE_API_URL: &str = "https://www.googleapis.com/chromewebstore";
pub const DEFAULT_STORE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/chromewebstore";
pub const DEFAULT_STORE_TOKEN_URL: &str = "https://www.googleapis.com/oauth2/v4/token";
pub const DEFAULT_STORE_API_VERSION: &str = "v1.1";
pub const DEFAULT_PUBLISH_TARGET: &str = "default";

pub const DEFAULT_OAUTH_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const DEFAULT_OAUTH_TOKEN_URL: &str = "https://accounts.google.com/o/oauth2/token";
pub const DEFAULT_OAUTH_SCOPE: &str = "https://www.googleapis.com/auth/chromewebstore";
pub const DEFAULT_CALLBACK_TIMEOUT_SECS: u64 = 600;

pub const DEFAULT_GITLAB_API_URL: &str = "https://gitlab.com/api/v4";

pub const DEFAULT_LIVE_TEST_EXTENSION_DIR: &str = "test/extension";
pub const DEFAULT_LIVE_TEST_ARTIFACTS_DIR: &str = "web-ext-artifacts";

pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub live_test: LiveTestConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Built extension, relative to the project folder
    pub dist: Option<String>,
    /// Packaged zips, relative to the project folder
    pub artifacts: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    pub api_url: Option<String>,
    pub upload_url: Option<String>,
    pub token_url: Option<String>,
    pub api_version: Option<String>,
    pub publish_target: Option<String>,
    pub deploy_percentage: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuthConfig {
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    pub scope: Option<String>,
    pub callback_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecretsConfig {
    pub api_url: Option<String>,
    pub protected: Option<bool>,
    pub masked: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LiveTestConfig {
    pub extension_dir: Option<String>,
    pub artifacts_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpConfig {
    pub timeout_seconds: Option<u64>,
}

/// Store API endpoints and publish defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    pub api_url: String,
    pub upload_url: String,
    pub token_url: String,
    pub api_version: String,
    pub publish_target: String,
    pub deploy_percentage: Option<u8>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_STORE_API_URL.to_string(),
            upload_url: DEFAULT_STORE_UPLOAD_URL.to_string(),
            token_url: DEFAULT_STORE_TOKEN_URL.to_string(),
            api_version: DEFAULT_STORE_API_VERSION.to_string(),
            publish_target: DEFAULT_PUBLISH_TARGET.to_string(),
            deploy_percentage: None,
        }
    }
}

/// OAuth consent flow endpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthSettings {
    pub auth_url: String,
    pub token_url: String,
    pub scope: String,
    /// `None` waits for the browser callback forever
    pub callback_timeout: Option<Duration>,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            auth_url: DEFAULT_OAUTH_AUTH_URL.to_string(),
            token_url: DEFAULT_OAUTH_TOKEN_URL.to_string(),
            scope: DEFAULT_OAUTH_SCOPE.to_string(),
            callback_timeout: Some(Duration::from_secs(DEFAULT_CALLBACK_TIMEOUT_SECS)),
        }
    }
}

/// CI variable store settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretsSettings {
    pub api_url: String,
    pub protected: bool,
    pub masked: bool,
}

impl Default for SecretsSettings {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_GITLAB_API_URL.to_string(),
            protected: true,
            masked: true,
        }
    }
}

/// Sources for the `--no-project` live-test preparation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveTestSettings {
    pub extension_dir: PathBuf,
    pub artifacts_dir: PathBuf,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Built extension dir, relative to the project folder
    pub dist: PathBuf,
    /// Artifact dir, relative to the project folder
    pub artifacts: PathBuf,
    pub store: StoreSettings,
    pub oauth: OAuthSettings,
    pub secrets: SecretsSettings,
    pub live_test: LiveTestSettings,
    /// Per-request HTTP timeout
    pub http_timeout: Duration,
}

impl ResolvedConfig {
    /// Defaults with relative paths anchored at `base`
    pub fn defaults(base: &Path) -> Self {
        Self::from_file(ConfigFile::default(), None, base)
    }

    /// Built extension directory inside `project`
    pub fn dist_dir(&self, project: &Path) -> PathBuf {
        project.join(&self.dist)
    }

    /// Artifact directory inside `project`
    pub fn artifacts_dir(&self, project: &Path) -> PathBuf {
        project.join(&self.artifacts)
    }

    fn from_file(file: ConfigFile, config_file: Option<PathBuf>, base: &Path) -> Self {
        let store_defaults = StoreSettings::default();
        let oauth_defaults = OAuthSettings::default();
        let secrets_defaults = SecretsSettings::default();

        let callback_timeout = match file.oauth.callback_timeout_seconds {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => oauth_defaults.callback_timeout,
        };

        Self {
            config_file,
            dist: PathBuf::from(file.paths.dist.as_deref().unwrap_or(DEFAULT_DIST_DIR)),
            artifacts: PathBuf::from(
                file.paths.artifacts.as_deref().unwrap_or(DEFAULT_ARTIFACTS_DIR),
            ),
            store: StoreSettings {
                api_url: file.store.api_url.unwrap_or(store_defaults.api_url),
                upload_url: file.store.upload_url.unwrap_or(store_defaults.upload_url),
                token_url: file.store.token_url.unwrap_or(store_defaults.token_url),
                api_version: file.store.api_version.unwrap_or(store_defaults.api_version),
                publish_target: file
                    .store
                    .publish_target
                    .unwrap_or(store_defaults.publish_target),
                deploy_percentage: file.store.deploy_percentage,
            },
            oauth: OAuthSettings {
                auth_url: file.oauth.auth_url.unwrap_or(oauth_defaults.auth_url),
                token_url: file.oauth.token_url.unwrap_or(oauth_defaults.token_url),
                scope: file.oauth.scope.unwrap_or(oauth_defaults.scope),
                callback_timeout,
            },
            secrets: SecretsSettings {
                api_url: file.secrets.api_url.unwrap_or(secrets_defaults.api_url),
                protected: file.secrets.protected.unwrap_or(secrets_defaults.protected),
                masked: file.secrets.masked.unwrap_or(secrets_defaults.masked),
            },
            live_test: LiveTestSettings {
                extension_dir: resolve_path(
                    base,
                    file.live_test
                        .extension_dir
                        .as_deref()
                        .unwrap_or(DEFAULT_LIVE_TEST_EXTENSION_DIR),
                ),
                artifacts_dir: resolve_path(
                    base,
                    file.live_test
                        .artifacts_dir
                        .as_deref()
                        .unwrap_or(DEFAULT_LIVE_TEST_ARTIFACTS_DIR),
                ),
            },
            http_timeout: Duration::from_secs(
                file.http.timeout_seconds.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
            ),
        }
    }
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let file: ConfigFile = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    file.validate()
        .with_context(|| format!("Invalid config file: {}", path.display()))?;
    Ok(file)
}

impl ConfigFile {
    /// Range checks serde cannot express
    fn validate(&self) -> Result<()> {
        if let Some(percentage) = self.store.deploy_percentage {
            if percentage > 100 {
                bail!("store.deploy_percentage must be between 0 and 100, got {}", percentage);
            }
        }
        Ok(())
    }
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration, searching from the project folder (if any) and then
/// the working directory. Read once at startup and passed down.
pub fn load_config(project: Option<&Path>) -> Result<ResolvedConfig> {
    let cwd = std::env::current_dir().context("Failed to determine working directory")?;

    let config_file = project
        .and_then(find_config_file)
        .or_else(|| find_config_file(&cwd));

    match config_file {
        Some(config_path) => {
            let file = load_config_file(&config_path)?;

            // Base directory is the parent of .extdeploy/
            let base_dir = config_path
                .parent()
                .and_then(|p| p.parent())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| cwd.clone());

            tracing::debug!(path = %config_path.display(), "Loaded config file");
            Ok(ResolvedConfig::from_file(file, Some(config_path), &base_dir))
        }
        None => Ok(ResolvedConfig::defaults(&cwd)),
    }
}
