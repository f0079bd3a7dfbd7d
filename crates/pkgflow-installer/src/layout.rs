use anyhow::{Context, Result};
use pkgflow_core::StorageLocation;
use std::fs;
use std::path::{Path, PathBuf};

/// Suffix shared by the backup directory and the backup database id of an
/// update in flight.
pub const BACKUP_SUFFIX: &str = ".backup";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceLayout {
    prefix: PathBuf,
}

impl DeviceLayout {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn apps_dir(&self) -> PathBuf {
        self.prefix.join("apps")
    }

    pub fn external_apps_dir(&self) -> PathBuf {
        self.prefix.join("external").join("apps")
    }

    pub fn plugins_dir(&self) -> PathBuf {
        self.prefix.join("plugins")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.prefix.join("state")
    }

    pub fn tmp_state_dir(&self) -> PathBuf {
        self.state_dir().join("tmp")
    }

    pub fn installed_state_dir(&self) -> PathBuf {
        self.state_dir().join("installed")
    }

    pub fn plugin_state_dir(&self) -> PathBuf {
        self.state_dir().join("plugins")
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.state_dir().join("manifests")
    }

    pub fn record_path(&self, id: &str) -> PathBuf {
        self.installed_state_dir().join(format!("{id}.receipt"))
    }

    pub fn plugin_record_path(&self, name: &str) -> PathBuf {
        self.plugin_state_dir().join(format!("{name}.plugin"))
    }

    pub fn manifest_path(&self, id: &str) -> PathBuf {
        self.manifests_dir().join(format!("{id}.toml"))
    }

    pub fn plugin_dir(&self, name: &str) -> PathBuf {
        self.plugins_dir().join(name)
    }

    pub fn package_root(&self, id: &str, location: StorageLocation) -> PathBuf {
        match location {
            StorageLocation::Internal => self.apps_dir().join(id),
            StorageLocation::External => self.external_apps_dir().join(id),
        }
    }

    pub fn package_paths(&self, id: &str, location: StorageLocation) -> PackagePaths {
        PackagePaths::new(self.package_root(id, location), location)
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.apps_dir(),
            self.external_apps_dir(),
            self.plugins_dir(),
            self.state_dir(),
            self.tmp_state_dir(),
            self.installed_state_dir(),
            self.plugin_state_dir(),
            self.manifests_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagePaths {
    root: PathBuf,
    location: StorageLocation,
}

impl PackagePaths {
    pub fn new(root: PathBuf, location: StorageLocation) -> Self {
        Self { root, location }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn location(&self) -> StorageLocation {
        self.location
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn src_dir(&self) -> PathBuf {
        self.root.join("res").join("wgt")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn shared_dir(&self) -> PathBuf {
        self.root.join("shared")
    }

    pub fn shared_res_dir(&self) -> PathBuf {
        self.shared_dir().join("res")
    }

    pub fn shared_data_dir(&self) -> PathBuf {
        self.shared_dir().join("data")
    }

    pub fn backup_root(&self) -> PathBuf {
        let mut name = self
            .root
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        name.push(BACKUP_SUFFIX);
        self.root.with_file_name(name)
    }

    pub fn launcher_path(&self, id: &str) -> PathBuf {
        self.bin_dir().join(id)
    }
}

pub fn default_user_prefix() -> Result<PathBuf> {
    if cfg!(windows) {
        let app_data = std::env::var("LOCALAPPDATA")
            .context("LOCALAPPDATA is not set; cannot resolve Windows user prefix")?;
        return Ok(PathBuf::from(app_data).join("Pkgflow"));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve user prefix")?;
    Ok(PathBuf::from(home).join(".pkgflow"))
}
