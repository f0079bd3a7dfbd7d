use anyhow::{Context, Result};
use pkgflow_core::TrustTier;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;

use crate::fs_utils::{remove_file_if_exists, write_atomically};
use crate::layout::DeviceLayout;

/// Platform-visible description of an installed package, read by the home
/// screen and the launcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformManifest {
    pub id: String,
    pub version: String,
    pub label: String,
    pub exec: PathBuf,
    pub icon: Option<PathBuf>,
    pub tier: TrustTier,
}

pub fn write_manifest(layout: &DeviceLayout, manifest: &PlatformManifest) -> Result<PathBuf> {
    let path = layout.manifest_path(&manifest.id);
    let payload = toml::to_string(manifest).context("failed to serialize platform manifest")?;
    write_atomically(&path, payload.as_bytes())
        .with_context(|| format!("failed to write platform manifest: {}", path.display()))?;
    Ok(path)
}

pub fn read_manifest_raw(layout: &DeviceLayout, id: &str) -> Result<Option<String>> {
    let path = layout.manifest_path(id);
    match fs::read_to_string(&path) {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err)
            .with_context(|| format!("failed to read platform manifest: {}", path.display())),
    }
}

pub fn read_manifest(layout: &DeviceLayout, id: &str) -> Result<Option<PlatformManifest>> {
    let Some(raw) = read_manifest_raw(layout, id)? else {
        return Ok(None);
    };
    let manifest = toml::from_str(&raw).with_context(|| {
        format!(
            "failed to parse platform manifest: {}",
            layout.manifest_path(id).display()
        )
    })?;
    Ok(Some(manifest))
}

pub fn restore_manifest_raw(layout: &DeviceLayout, id: &str, raw: &str) -> Result<()> {
    let path = layout.manifest_path(id);
    write_atomically(&path, raw.as_bytes())
        .with_context(|| format!("failed to restore platform manifest: {}", path.display()))
}

pub fn remove_manifest(layout: &DeviceLayout, id: &str) -> Result<()> {
    let path = layout.manifest_path(id);
    remove_file_if_exists(&path)
        .with_context(|| format!("failed to remove platform manifest: {}", path.display()))
}
