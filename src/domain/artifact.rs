//! Extension manifest and packaged artifacts.
//!
//! The artifact name is derived from the built manifest; the deploy pipeline
//! computes it once and every later task reads the same [`ArtifactRef`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Characters that may not appear in an artifact file name
const FORBIDDEN_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Browser tag embedded in every artifact name
pub const BROWSER: &str = "chrome";

/// Version suffix used for locally packaged dev bundles
pub const DEV_VERSION_SUFFIX: &str = ".9999";

/// Errors reading a manifest from disk
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Manifest not found at {0}")]
    NotFound(PathBuf),

    #[error("Failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The fields of `manifest.json` the pipeline cares about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    pub name: String,
    pub version: String,
}

impl ExtensionManifest {
    /// Read `manifest.json` from a directory
    pub fn load(dir: &Path) -> Result<Self, ManifestError> {
        let path = dir.join("manifest.json");
        if !path.exists() {
            return Err(ManifestError::NotFound(path));
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;

        serde_json::from_str(&content).map_err(|source| ManifestError::Parse { path, source })
    }

    /// File name of the packaged artifact for this manifest
    pub fn artifact_name(&self) -> String {
        artifact_file_name(&self.name, &self.version)
    }

    /// File name of the dev bundle for this manifest
    pub fn dev_artifact_name(&self) -> String {
        artifact_file_name(&self.name, &self.dev_version())
    }

    pub fn dev_version(&self) -> String {
        format!("{}{}", self.version, DEV_VERSION_SUFFIX)
    }
}

/// Build `<name>(chrome)-<version>.zip`, sanitised for the filesystem
pub fn artifact_file_name(name: &str, version: &str) -> String {
    sanitize_file_name(&format!("{}({})-{}.zip", name, BROWSER, version))
}

/// Replace every forbidden character with `-`
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if FORBIDDEN_CHARS.contains(&c) { '-' } else { c })
        .collect()
}

/// A packaged extension located on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Sanitised file name
    pub name: String,

    /// Absolute path of the zip
    pub path: PathBuf,

    /// Name and version taken from the manifest
    pub manifest: ExtensionManifest,

    /// `sha256:<hex>` of the zip, once it has been read
    pub sha256: Option<String>,
}

impl ArtifactRef {
    pub fn new(manifest: ExtensionManifest, artifacts_dir: &Path) -> Self {
        let name = manifest.artifact_name();
        Self {
            path: artifacts_dir.join(&name),
            name,
            manifest,
            sha256: None,
        }
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Read the zip and record its digest
    pub fn read(&mut self) -> std::io::Result<Vec<u8>> {
        let bytes = std::fs::read(&self.path)?;
        self.sha256 = Some(compute_hash(&bytes));
        Ok(bytes)
    }
}

/// SHA-256 of a byte slice as `sha256:<hex>`
pub fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}
