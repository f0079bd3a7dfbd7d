use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path};

use anyhow::{anyhow, Context};
use semver::Version;
use serde::{Deserialize, Serialize};

/// File name of the package descriptor inside an unpacked package.
pub const DESCRIPTOR_FILE: &str = "config.toml";

/// File name of the plugin descriptor inside a plugin directory.
pub const PLUGIN_DESCRIPTOR_FILE: &str = "plugin.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppControl {
    pub operation: String,
    pub src: String,
    pub uri: Option<String>,
    pub mime: Option<String>,
}

/// Identity and capability declarations of an application package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageDescriptor {
    pub id: String,
    pub name: String,
    pub version: Version,
    pub start_file: String,
    pub icon: Option<String>,
    #[serde(default)]
    pub background_service: bool,
    #[serde(default)]
    pub native_plugins: Vec<String>,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    #[serde(default)]
    pub app_controls: Vec<AppControl>,
}

impl PackageDescriptor {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let descriptor: Self =
            toml::from_str(input).context("failed to parse package descriptor")?;

        if !is_package_id(&descriptor.id) {
            return Err(anyhow!("invalid package id '{}'", descriptor.id));
        }
        if descriptor.name.trim().is_empty() || descriptor.name.chars().any(char::is_control) {
            return Err(anyhow!(
                "package '{}' needs a non-empty single-line name",
                descriptor.id
            ));
        }
        validate_relative(&descriptor.start_file)
            .with_context(|| format!("invalid start file for '{}'", descriptor.id))?;
        if let Some(icon) = &descriptor.icon {
            validate_relative(icon)
                .with_context(|| format!("invalid icon path for '{}'", descriptor.id))?;
        }
        for plugin in &descriptor.native_plugins {
            validate_relative(plugin)
                .with_context(|| format!("invalid native plugin path for '{}'", descriptor.id))?;
        }

        let mut seen = HashSet::new();
        for control in &descriptor.app_controls {
            if control.operation.trim().is_empty() {
                return Err(anyhow!(
                    "app control in '{}' has an empty operation",
                    descriptor.id
                ));
            }
            validate_relative(&control.src).with_context(|| {
                format!(
                    "invalid app control source for operation '{}'",
                    control.operation
                )
            })?;
            let key = (
                control.operation.as_str(),
                control.uri.as_deref(),
                control.mime.as_deref(),
            );
            if !seen.insert(key) {
                return Err(anyhow!(
                    "duplicate app control declaration '{}' in '{}'",
                    control.operation,
                    descriptor.id
                ));
            }
        }

        Ok(descriptor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub name: String,
    pub library: String,
    #[serde(default)]
    pub requires: Vec<String>,
}

impl PluginDescriptor {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let descriptor: Self =
            toml::from_str(input).context("failed to parse plugin descriptor")?;
        if !is_package_id(&descriptor.name) {
            return Err(anyhow!("invalid plugin name '{}'", descriptor.name));
        }
        validate_relative(&descriptor.library)
            .with_context(|| format!("invalid library path for plugin '{}'", descriptor.name))?;
        if descriptor.requires.contains(&descriptor.name) {
            return Err(anyhow!("plugin '{}' requires itself", descriptor.name));
        }
        Ok(descriptor)
    }
}

pub fn is_package_id(value: &str) -> bool {
    let bytes = value.as_bytes();
    if bytes.is_empty() || bytes.len() > 128 {
        return false;
    }
    bytes[0].is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
        && !value.ends_with(".backup")
}

fn validate_relative(value: &str) -> anyhow::Result<()> {
    if value.trim().is_empty() {
        return Err(anyhow!("path must not be empty"));
    }
    let path = Path::new(value);
    if path
        .components()
        .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
    {
        return Err(anyhow!("path must be relative without '..': {value}"));
    }
    Ok(())
}
