//! Task lists per request kind. Each constructor returns the ordered tasks a
//! job of that kind carries; the tasks themselves only read and write their
//! context.

mod install;
mod plugin;
mod rds;
mod recovery;
mod uninstall;

pub use install::install_tasks;
pub use plugin::{next_ready_plugin, plugin_tasks};
pub use rds::rds_update_tasks;
pub use recovery::recovery_tasks;
pub use uninstall::uninstall_tasks;

use pkgflow_core::{is_package_id, InstallError, InstallResult, StorageLocation};

use crate::database::{backup_id, record_exists};
use crate::layout::DeviceLayout;

pub(crate) fn require_package_id(id: &str) -> InstallResult<()> {
    if is_package_id(id) {
        return Ok(());
    }
    Err(InstallError::ArgumentInvalid(format!(
        "'{id}' is not a valid package id"
    )))
}

/// Refuses to touch a package whose previous update never committed or
/// rolled back.
pub(crate) fn ensure_no_pending_update(layout: &DeviceLayout, id: &str) -> InstallResult<()> {
    let dir_marker = [StorageLocation::Internal, StorageLocation::External]
        .into_iter()
        .map(|location| layout.package_paths(id, location).backup_root())
        .find(|backup| backup.exists());
    if let Some(backup) = dir_marker {
        return Err(InstallError::FatalError(format!(
            "package {id} has an interrupted update at {}; run recovery first",
            backup.display()
        )));
    }
    if record_exists(layout, &backup_id(id)) {
        return Err(InstallError::FatalError(format!(
            "package {id} has an interrupted database update; run recovery first"
        )));
    }
    Ok(())
}
