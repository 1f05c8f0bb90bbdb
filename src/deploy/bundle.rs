//! Dev bundle packaging.
//!
//! Zips the built extension with its manifest version suffixed `.9999`, so
//! a locally installed dev build always outranks the store release.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::CompressionMethod;

use crate::domain::ExtensionManifest;

/// What `build_dev_bundle` produced
#[derive(Debug, Clone)]
pub struct BundleSummary {
    pub path: PathBuf,
    pub manifest: ExtensionManifest,
    pub files: usize,
}

/// Rewrite `version` in a manifest, keeping every other key. Returns the
/// rewritten JSON and the manifest as it was on disk.
fn dev_manifest(raw: &str) -> Result<(serde_json::Value, ExtensionManifest)> {
    let mut value: serde_json::Value =
        serde_json::from_str(raw).context("Failed to parse manifest.json")?;
    let manifest: ExtensionManifest =
        serde_json::from_value(value.clone()).context("manifest.json is missing name or version")?;

    if let Some(obj) = value.as_object_mut() {
        obj.insert(
            "version".to_string(),
            serde_json::Value::String(manifest.dev_version()),
        );
    }

    Ok((value, manifest))
}

/// Relative file paths under `root`, sorted, using `/` separators
fn collect_files(root: &Path, dir: &Path, files: &mut Vec<(String, PathBuf)>) -> Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read directory: {}", dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(root, &path, files)?;
        } else {
            let relative = path
                .strip_prefix(root)
                .with_context(|| format!("{} is outside {}", path.display(), root.display()))?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push((name, path));
        }
    }

    files.sort();
    Ok(())
}

/// Zip `dist_dir` into `artifacts_dir` as `<name>(chrome)-<version>.9999.zip`
pub fn build_dev_bundle(dist_dir: &Path, artifacts_dir: &Path) -> Result<BundleSummary> {
    let manifest_path = dist_dir.join("manifest.json");
    let raw = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("Failed to read manifest: {}", manifest_path.display()))?;
    let (manifest_json, original) = dev_manifest(&raw)?;

    std::fs::create_dir_all(artifacts_dir)
        .with_context(|| format!("Failed to create directory: {}", artifacts_dir.display()))?;

    let path = artifacts_dir.join(original.dev_artifact_name());
    if path.exists() {
        debug!(path = %path.display(), "Replacing existing bundle");
        std::fs::remove_file(&path)
            .with_context(|| format!("Failed to remove {}", path.display()))?;
    }

    let mut files = Vec::new();
    collect_files(dist_dir, dist_dir, &mut files)?;

    let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, source) in &files {
        zip.start_file(name.as_str(), options)?;
        if name == "manifest.json" {
            let content = serde_json::to_vec_pretty(&manifest_json)?;
            zip.write_all(&content)?;
        } else {
            let bytes = std::fs::read(source)
                .with_context(|| format!("Failed to read {}", source.display()))?;
            zip.write_all(&bytes)?;
        }
    }
    zip.finish()?;

    info!(path = %path.display(), files = files.len(), "Dev bundle written");

    Ok(BundleSummary {
        path,
        manifest: ExtensionManifest {
            version: original.dev_version(),
            ..original
        },
        files: files.len(),
    })
}
