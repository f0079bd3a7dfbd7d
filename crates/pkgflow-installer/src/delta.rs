use std::fs;
use std::io;
use std::path::{Component, Path};

use anyhow::{anyhow, Context, Result};
use pkgflow_core::{DeltaManifest, InstallError, InstallResult, DELTA_MANIFEST_FILE};
use tracing::{debug, info};

use crate::collaborators::LabelManager;
use crate::fs_utils::{move_file_or_copy, remove_dir_if_exists};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaReport {
    pub deleted: usize,
    pub added: usize,
    pub modified: usize,
}

/// Applies an add/delete/modify manifest from a staged update tree onto an
/// installed tree. Entries are relative to both roots.
pub struct DeltaPatcher<'a> {
    staged_root: &'a Path,
    installed_root: &'a Path,
    manifest: DeltaManifest,
}

impl<'a> DeltaPatcher<'a> {
    pub fn new(staged_root: &'a Path, installed_root: &'a Path, manifest: DeltaManifest) -> Self {
        Self {
            staged_root,
            installed_root,
            manifest,
        }
    }

    pub fn load(staged_root: &'a Path, installed_root: &'a Path) -> InstallResult<Self> {
        let path = staged_root.join(DELTA_MANIFEST_FILE);
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read delta manifest {}", path.display()))
            .map_err(InstallError::delta)?;
        let manifest = DeltaManifest::parse(&raw).map_err(InstallError::delta)?;
        Ok(Self::new(staged_root, installed_root, manifest))
    }

    pub fn manifest(&self) -> &DeltaManifest {
        &self.manifest
    }

    pub fn verify(&self) -> InstallResult<()> {
        self.verify_entries().map_err(InstallError::delta)
    }

    fn verify_entries(&self) -> Result<()> {
        let manifest = &self.manifest;
        for entry in manifest
            .add
            .iter()
            .chain(&manifest.delete)
            .chain(&manifest.modify)
        {
            check_relative(entry)?;
        }
        for entry in manifest.delete.iter().chain(&manifest.modify) {
            if !exists(&self.installed_root.join(entry))? {
                return Err(anyhow!("'{entry}' is not present in the installed package"));
            }
        }
        for entry in manifest.add.iter().chain(&manifest.modify) {
            if !exists(&self.staged_root.join(entry))? {
                return Err(anyhow!("'{entry}' is missing from the update package"));
            }
        }
        // Only regular files can be replaced in place.
        for entry in &manifest.modify {
            if self.installed_root.join(entry).is_dir() || self.staged_root.join(entry).is_dir() {
                return Err(anyhow!("'{entry}' is a directory and cannot be modified"));
            }
        }
        Ok(())
    }

    /// Verifies, then deletes, adds, modifies and finally relabels the shared
    /// resources. A failure after verification leaves the tree partially
    /// patched; undoing that is the caller's job.
    pub fn apply(
        &self,
        labels: &dyn LabelManager,
        package_id: &str,
        shared_res_dir: &Path,
    ) -> InstallResult<DeltaReport> {
        self.verify()?;

        let mut report = DeltaReport::default();
        for entry in &self.manifest.delete {
            let target = self.installed_root.join(entry);
            remove_dir_if_exists(&target)
                .with_context(|| format!("failed to delete '{entry}'"))
                .map_err(InstallError::delta)?;
            report.deleted += 1;
        }

        for entry in &self.manifest.add {
            self.add_entry(entry).map_err(InstallError::delta)?;
            report.added += 1;
        }

        for entry in &self.manifest.modify {
            self.modify_entry(entry).map_err(InstallError::delta)?;
            report.modified += 1;
        }

        labels
            .label_shared_resources(package_id, shared_res_dir)
            .context("failed to relabel shared resources")
            .map_err(InstallError::delta)?;

        info!(
            package = %package_id,
            deleted = report.deleted,
            added = report.added,
            modified = report.modified,
            "delta applied"
        );
        Ok(report)
    }

    fn add_entry(&self, entry: &str) -> Result<()> {
        let source = self.staged_root.join(entry);
        let target = self.installed_root.join(entry);
        if source.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("failed to create directory '{entry}'"))?;
            return Ok(());
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create parent of '{entry}'"))?;
        }
        move_file_or_copy(&source, &target).with_context(|| format!("failed to add '{entry}'"))?;
        debug!(entry, "added");
        Ok(())
    }

    fn modify_entry(&self, entry: &str) -> Result<()> {
        let source = self.staged_root.join(entry);
        let target = self.installed_root.join(entry);
        remove_dir_if_exists(&target)
            .with_context(|| format!("failed to remove old '{entry}'"))?;
        move_file_or_copy(&source, &target)
            .with_context(|| format!("failed to replace '{entry}'"))?;
        debug!(entry, "modified");
        Ok(())
    }
}

fn check_relative(entry: &str) -> Result<()> {
    let escapes = Path::new(entry)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if entry.is_empty() || escapes {
        return Err(anyhow!("delta entry '{entry}' must be a relative path inside the package"));
    }
    if entry == DELTA_MANIFEST_FILE {
        return Err(anyhow!("delta entry '{entry}' names the delta manifest itself"));
    }
    Ok(())
}

fn exists(path: &Path) -> Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("failed to stat {}", path.display())),
    }
}
