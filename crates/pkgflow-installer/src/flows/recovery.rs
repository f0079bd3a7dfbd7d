use pkgflow_core::{InstallError, InstallOrigin, InstallResult, StorageLocation};
use pkgflow_security::evaluate_trust_level;
use tracing::{info, warn};

use super::require_package_id;
use crate::backup::{read_backup_row, remove_backup_row, restore_backup, restore_backup_row};
use crate::context::RecoveryContext;
use crate::database::{read_record, write_record};
use crate::engine::Task;
use crate::layout::PackagePaths;

pub fn recovery_tasks() -> Vec<Task<RecoveryContext>> {
    vec![
        Task::new("inspect_recovery_marker", inspect_recovery_marker),
        Task::new("restore_backup_dir", restore_backup_dir),
        Task::new("restore_backup_row", restore_row),
        Task::new("reverify_trust", reverify_trust),
    ]
}

fn inspect_recovery_marker(ctx: &mut RecoveryContext) -> InstallResult<()> {
    let id = ctx.package_id.clone();
    require_package_id(&id)?;
    let row = read_backup_row(&ctx.layout, &id).map_err(InstallError::fatal)?;

    let backup_dir = [StorageLocation::Internal, StorageLocation::External]
        .into_iter()
        .map(|location| ctx.layout.package_paths(&id, location))
        .find(|paths| paths.backup_root().is_dir());

    let paths = match (&row, &backup_dir) {
        (Some(row), _) => PackagePaths::new(row.root.clone(), row.location),
        (None, Some(paths)) => paths.clone(),
        (None, None) => {
            return Err(InstallError::PackageNotFound(format!(
                "no interrupted update found for {id}"
            )));
        }
    };

    ctx.backup_dir_found = paths.backup_root().is_dir();
    ctx.backup_row_found = row.is_some();
    info!(
        package = %id,
        backup_dir = ctx.backup_dir_found,
        backup_row = ctx.backup_row_found,
        "recovering interrupted update"
    );
    ctx.paths = Some(paths);
    ctx.signal.send_start("update");
    ctx.report(10, "inspecting recovery marker");
    Ok(())
}

fn restore_backup_dir(ctx: &mut RecoveryContext) -> InstallResult<()> {
    ctx.report(40, "restoring previous files");
    if !ctx.backup_dir_found {
        return Ok(());
    }
    let paths = ctx.paths()?.clone();
    restore_backup(&paths).map_err(InstallError::fatal)?;
    if paths.location() == StorageLocation::External {
        if let Err(err) = ctx.services.external.enable(&ctx.package_id) {
            warn!(package = %ctx.package_id, "failed to re-enable external storage: {err:#}");
        }
    }
    Ok(())
}

/// With the directory restored, the row is the matching record. A row
/// without a directory means the files were already committed, so only the
/// row goes.
fn restore_row(ctx: &mut RecoveryContext) -> InstallResult<()> {
    ctx.report(70, "restoring package database");
    if !ctx.backup_row_found {
        return Ok(());
    }
    if ctx.backup_dir_found {
        ctx.restored =
            restore_backup_row(&ctx.layout, &ctx.package_id).map_err(InstallError::fatal)?;
    } else {
        remove_backup_row(&ctx.layout, &ctx.package_id).map_err(InstallError::fatal)?;
    }
    Ok(())
}

/// Recomputes the tier of whatever is now live. Recovery forces the verdict,
/// so only the tier and certificate list can change.
fn reverify_trust(ctx: &mut RecoveryContext) -> InstallResult<()> {
    ctx.report(90, "re-verifying signatures");
    let paths = ctx.paths()?.clone();
    let Some(mut record) = read_record(&ctx.layout, &ctx.package_id).map_err(InstallError::fatal)?
    else {
        warn!(package = %ctx.package_id, "no package record after recovery");
        return Ok(());
    };
    if !paths.src_dir().is_dir() {
        warn!(package = %ctx.package_id, "no installed files after recovery");
        return Ok(());
    }

    let evaluation = evaluate_trust_level(
        paths.root(),
        ctx.services.verifier.as_ref(),
        InstallOrigin::Recovery,
    )?;
    record.tier = evaluation.tier;
    record.certificates = evaluation.certificates;
    write_record(&ctx.layout, &ctx.package_id, &record).map_err(InstallError::fatal)?;
    info!(package = %ctx.package_id, tier = %record.tier, "recovery complete");
    Ok(())
}
