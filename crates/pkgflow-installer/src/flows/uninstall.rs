use pkgflow_core::{InstallError, InstallResult, StorageLocation};
use tracing::{info, warn};

use super::{ensure_no_pending_update, require_package_id};
use crate::context::UninstallContext;
use crate::database::{read_record, remove_record};
use crate::engine::Task;
use crate::fs_utils::remove_dir_if_exists;
use crate::layout::PackagePaths;
use crate::manifest::remove_manifest;

/// Uninstall has nothing to compensate: once files go, the remaining steps
/// only drop bookkeeping for them.
pub fn uninstall_tasks() -> Vec<Task<UninstallContext>> {
    vec![
        Task::new("resolve_package", resolve_package),
        Task::new("terminate_running", terminate_running),
        Task::new("remove_files", remove_files),
        Task::new("unregister_security_policy", unregister_security_policy),
        Task::new("remove_database_record", remove_database_record),
        Task::new("remove_manifest", remove_platform_manifest),
    ]
}

fn resolve_package(ctx: &mut UninstallContext) -> InstallResult<()> {
    let id = ctx.package_id.clone();
    require_package_id(&id)?;
    ensure_no_pending_update(&ctx.layout, &id)?;

    let record = read_record(&ctx.layout, &id).map_err(InstallError::fatal)?;
    let paths = match &record {
        Some(record) => PackagePaths::new(record.root.clone(), record.location),
        None => [StorageLocation::Internal, StorageLocation::External]
            .into_iter()
            .map(|location| ctx.layout.package_paths(&id, location))
            .find(|paths| paths.root().exists())
            .ok_or_else(|| InstallError::PackageNotFound(id.clone()))?,
    };

    ctx.removed_abnormally = record.is_some() && !paths.root().exists();
    ctx.orphaned_files = record.is_none();
    if ctx.removed_abnormally {
        warn!(package = %id, "package files are already gone; cleaning up records");
    }
    if ctx.orphaned_files {
        warn!(package = %id, "package files have no database record; removing them");
    }

    ctx.record = record;
    ctx.paths = Some(paths);
    ctx.signal.send_start("uninstall");
    ctx.report(10, "resolving package");
    Ok(())
}

fn terminate_running(ctx: &mut UninstallContext) -> InstallResult<()> {
    ctx.report(20, "stopping application");
    ctx.services
        .runtime
        .terminate(&ctx.package_id)
        .map_err(InstallError::uninstall)
}

fn remove_files(ctx: &mut UninstallContext) -> InstallResult<()> {
    ctx.report(50, "removing files");
    if ctx.removed_abnormally {
        return Ok(());
    }
    let Some(paths) = ctx.paths.clone() else {
        return Err(InstallError::FatalError(
            "package layout is not available at this step".to_string(),
        ));
    };
    remove_dir_if_exists(paths.root()).map_err(InstallError::uninstall)?;
    if paths.location() == StorageLocation::External {
        ctx.services
            .external
            .remove(&ctx.package_id)
            .map_err(InstallError::uninstall)?;
    }
    Ok(())
}

fn unregister_security_policy(ctx: &mut UninstallContext) -> InstallResult<()> {
    ctx.report(70, "removing security policy");
    if let Err(err) = ctx.services.policy.unregister(&ctx.package_id) {
        warn!(package = %ctx.package_id, "security policy removal failed: {err:#}");
    }
    Ok(())
}

fn remove_database_record(ctx: &mut UninstallContext) -> InstallResult<()> {
    ctx.report(85, "updating package database");
    remove_record(&ctx.layout, &ctx.package_id).map_err(InstallError::uninstall)?;
    Ok(())
}

fn remove_platform_manifest(ctx: &mut UninstallContext) -> InstallResult<()> {
    ctx.report(95, "removing manifest");
    remove_manifest(&ctx.layout, &ctx.package_id).map_err(InstallError::uninstall)?;
    info!(
        package = %ctx.package_id,
        manifest = %ctx.manifest_path.display(),
        "package uninstalled"
    );
    Ok(())
}
