use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use pkgflow_core::{InstallError, InstallResult, StorageLocation, DESCRIPTOR_FILE};
use pkgflow_security::is_signature_file_name;
use tracing::{info, warn};

use super::ensure_no_pending_update;
use super::install::{
    check_privileges, commit_update, create_temp_dir, evaluate_trust, parse_descriptor,
    register_security_policy, remove_temp_dir, restore_database, restore_manifest,
    restore_previous, unpack_package, write_database, write_platform_manifest,
};
use crate::backup::begin_copy_backup;
use crate::context::{InstallContext, InstallStep};
use crate::database::read_record;
use crate::delta::DeltaPatcher;
use crate::engine::Task;
use crate::layout::PackagePaths;

/// Incremental update: the staged package carries only changed files plus a
/// `.rds_delta` manifest, patched into the live tree after a copy snapshot.
pub fn rds_update_tasks() -> Vec<Task<InstallContext>> {
    vec![
        Task::new("create_temp_dir", create_temp_dir).with_compensation(remove_temp_dir),
        Task::new("unpack_package", unpack_package),
        Task::new("parse_descriptor", parse_descriptor),
        Task::new("check_rds_target", check_rds_target),
        Task::new("evaluate_trust", evaluate_trust),
        Task::new("check_privileges", check_privileges),
        Task::new("snapshot_for_delta", snapshot_for_delta).with_compensation(restore_previous),
        Task::new("apply_delta", apply_delta),
        Task::new("write_database", write_database).with_compensation(restore_database),
        Task::new("write_manifest", write_platform_manifest).with_compensation(restore_manifest),
        Task::new("register_security_policy", register_security_policy),
        Task::new("commit_update", commit_update),
        Task::new("remove_temp_dir", remove_temp_dir),
    ]
}

fn check_rds_target(ctx: &mut InstallContext) -> InstallResult<()> {
    let descriptor = ctx.descriptor()?.clone();
    let id = descriptor.id.as_str();
    ensure_no_pending_update(&ctx.layout, id)?;

    let Some(previous) = read_record(&ctx.layout, id).map_err(InstallError::fatal)? else {
        return Err(InstallError::RdsDeltaFailure(format!(
            "{id} is not installed; a delta needs an installed base"
        )));
    };
    if previous.version > descriptor.version {
        return Err(InstallError::PackageLowerVersion {
            installed: previous.version.to_string(),
            requested: descriptor.version.to_string(),
        });
    }
    let paths = PackagePaths::new(previous.root.clone(), previous.location);
    if !paths.src_dir().is_dir() {
        return Err(InstallError::RdsDeltaFailure(format!(
            "installed files of {id} are missing at {}",
            paths.src_dir().display()
        )));
    }

    info!(
        package = %id,
        from = %previous.version,
        to = %descriptor.version,
        "applying incremental update"
    );
    ctx.paths = Some(paths);
    ctx.is_update = true;
    ctx.previous = Some(previous);
    ctx.signal.send_start("update");
    ctx.signal.send_percent(ctx.step.percent());
    Ok(())
}

fn snapshot_for_delta(ctx: &mut InstallContext) -> InstallResult<()> {
    ctx.set_step(InstallStep::Backup);
    let paths = ctx.paths()?.clone();
    let id = ctx.package_id()?;
    let external = paths.location() == StorageLocation::External;

    if external {
        ctx.services.external.disable(id).map_err(InstallError::fatal)?;
    }
    if let Err(err) = begin_copy_backup(&paths) {
        if external {
            if let Err(enable_err) = ctx.services.external.enable(id) {
                warn!(package = %id, "failed to re-enable external storage: {enable_err:#}");
            }
        }
        return Err(InstallError::fatal(err));
    }
    Ok(())
}

fn apply_delta(ctx: &mut InstallContext) -> InstallResult<()> {
    ctx.set_step(InstallStep::Files);
    let staged = ctx.staged_dir()?.clone();
    let paths = ctx.paths()?.clone();
    let id = ctx.package_id()?;
    let src = paths.src_dir();

    let patcher = DeltaPatcher::load(&staged, &src)?;
    patcher.apply(ctx.services.labels.as_ref(), id, &paths.shared_res_dir())?;
    refresh_package_metadata(&staged, &src).map_err(InstallError::delta)
}

/// The descriptor and signatures describe the new version and are replaced
/// wholesale, whatever the delta lists.
fn refresh_package_metadata(staged: &Path, src: &Path) -> Result<()> {
    for entry in fs::read_dir(src).with_context(|| format!("failed to read {}", src.display()))? {
        let entry = entry?;
        let is_signature = entry
            .file_name()
            .to_str()
            .map(is_signature_file_name)
            .unwrap_or(false);
        if is_signature && entry.file_type()?.is_file() {
            fs::remove_file(entry.path())
                .with_context(|| format!("failed to drop stale {}", entry.path().display()))?;
        }
    }

    let entries =
        fs::read_dir(staged).with_context(|| format!("failed to read {}", staged.display()))?;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name != DESCRIPTOR_FILE && !is_signature_file_name(name) {
            continue;
        }
        let target = src.join(name);
        fs::copy(entry.path(), &target)
            .with_context(|| format!("failed to refresh {}", target.display()))?;
    }
    Ok(())
}
