//! Snapshot of a previous installation while an update is in flight.
//!
//! The marker is the `<root>.backup` directory plus the `<id>.backup`
//! database row. Both only exist between the start of an update and its
//! commit or rollback; finding either at startup means the device stopped
//! mid-update.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use tracing::{debug, warn};

use crate::database::{backup_id, list_record_ids, read_record, remove_record, write_record};
use crate::database::PackageRecord;
use crate::fs_utils::{copy_dir_recursive, make_tmp_dir, move_dir_or_copy, remove_dir_if_exists};
use crate::layout::{DeviceLayout, PackagePaths, BACKUP_SUFFIX};

pub fn begin_backup(paths: &PackagePaths) -> Result<()> {
    let backup = paths.backup_root();
    remove_dir_if_exists(&backup)
        .with_context(|| format!("failed to clear stale backup {}", backup.display()))?;
    fs::rename(paths.root(), &backup).with_context(|| {
        format!(
            "failed to move {} to {}",
            paths.root().display(),
            backup.display()
        )
    })?;
    fs::create_dir_all(paths.root())
        .with_context(|| format!("failed to create {}", paths.root().display()))?;
    debug!(root = %paths.root().display(), "previous installation moved to backup");
    Ok(())
}

/// Copies the live root aside. Used when the update patches the live tree in
/// place.
pub fn begin_copy_backup(paths: &PackagePaths) -> Result<()> {
    let backup = paths.backup_root();
    remove_dir_if_exists(&backup)
        .with_context(|| format!("failed to clear stale backup {}", backup.display()))?;
    if let Err(err) = copy_dir_recursive(paths.root(), &backup) {
        let _ = remove_dir_if_exists(&backup);
        return Err(err).with_context(|| {
            format!("failed to snapshot {} for update", paths.root().display())
        });
    }
    debug!(root = %paths.root().display(), "previous installation copied to backup");
    Ok(())
}

/// Puts the backup back in place of whatever the live root holds. Returns
/// `false` when there was no backup to restore.
pub fn restore_backup(paths: &PackagePaths) -> Result<bool> {
    let backup = paths.backup_root();
    if !backup.is_dir() {
        return Ok(false);
    }
    remove_dir_if_exists(paths.root())
        .with_context(|| format!("failed to clear partial update {}", paths.root().display()))?;
    fs::rename(&backup, paths.root()).with_context(|| {
        format!(
            "failed to restore {} from {}",
            paths.root().display(),
            backup.display()
        )
    })?;
    debug!(root = %paths.root().display(), "previous installation restored");
    Ok(true)
}

/// Drops the backup directory. The directory is first moved out of the
/// marker position so an interrupted delete cannot look like a pending
/// update.
pub fn commit_backup(layout: &DeviceLayout, paths: &PackagePaths) -> Result<()> {
    let backup = paths.backup_root();
    if !backup.exists() {
        return Ok(());
    }

    let trash = make_tmp_dir(layout, "trash")?;
    let target = trash.join("root");
    if let Err(err) = move_dir_or_copy(&backup, &target) {
        warn!(backup = %backup.display(), "could not move backup to trash: {err:#}");
        remove_dir_if_exists(&backup)?;
    }
    if let Err(err) = remove_dir_if_exists(&trash) {
        warn!(trash = %trash.display(), "failed to remove committed backup: {err:#}");
    }
    Ok(())
}

pub fn save_backup_row(layout: &DeviceLayout, previous: &PackageRecord) -> Result<()> {
    write_record(layout, &backup_id(&previous.id), previous)?;
    Ok(())
}

pub fn read_backup_row(layout: &DeviceLayout, id: &str) -> Result<Option<PackageRecord>> {
    read_record(layout, &backup_id(id))
}

pub fn remove_backup_row(layout: &DeviceLayout, id: &str) -> Result<bool> {
    remove_record(layout, &backup_id(id))
}

pub fn restore_backup_row(layout: &DeviceLayout, id: &str) -> Result<Option<PackageRecord>> {
    let Some(previous) = read_backup_row(layout, id)? else {
        return Ok(None);
    };
    write_record(layout, id, &previous)?;
    remove_backup_row(layout, id)?;
    Ok(Some(previous))
}

pub fn pending_recoveries(layout: &DeviceLayout) -> Result<Vec<String>> {
    let mut pending = BTreeSet::new();

    for dir in [layout.apps_dir(), layout.external_apps_dir()] {
        if !dir.exists() {
            continue;
        }
        for entry in
            fs::read_dir(&dir).with_context(|| format!("failed to read {}", dir.display()))?
        {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.strip_suffix(BACKUP_SUFFIX)) else {
                continue;
            };
            pending.insert(id.to_string());
        }
    }

    for id in list_record_ids(layout)? {
        if let Some(id) = id.strip_suffix(BACKUP_SUFFIX) {
            pending.insert(id.to_string());
        }
    }

    Ok(pending.into_iter().collect())
}
