use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use pkgflow_core::{
    InstallError, InstallResult, InstallationKind, PackageDescriptor, StorageLocation,
    DESCRIPTOR_FILE,
};
use pkgflow_security::{check_privilege_gates, evaluate_trust_level};
use tracing::{info, warn};

use super::{ensure_no_pending_update, require_package_id};
use crate::backup::{
    begin_backup, commit_backup, remove_backup_row, restore_backup, save_backup_row,
};
use crate::collaborators::PolicyRegistration;
use crate::context::{InstallContext, InstallStep};
use crate::database::{read_record, remove_record, write_record, PackageRecord};
use crate::engine::Task;
use crate::fs_utils::{
    copy_dir_recursive, current_unix_timestamp, dir_size, make_tmp_dir, move_dir_or_copy,
    remove_dir_if_exists,
};
use crate::launcher::write_launcher;
use crate::layout::PackagePaths;
use crate::manifest::{
    read_manifest_raw, remove_manifest, restore_manifest_raw, write_manifest, PlatformManifest,
};

pub fn install_tasks() -> Vec<Task<InstallContext>> {
    vec![
        Task::new("create_temp_dir", create_temp_dir).with_compensation(remove_temp_dir),
        Task::new("unpack_package", unpack_package),
        Task::new("parse_descriptor", parse_descriptor),
        Task::new("check_installation", check_installation),
        Task::new("check_storage", check_storage),
        Task::new("evaluate_trust", evaluate_trust),
        Task::new("check_privileges", check_privileges),
        Task::new("prepare_external", prepare_external).with_compensation(release_external),
        Task::new("backup_previous", backup_previous).with_compensation(restore_previous),
        Task::new("create_directories", create_directories)
            .with_compensation(remove_created_directories),
        Task::new("move_files", move_files),
        Task::new("preserve_user_data", preserve_user_data),
        Task::new("apply_labels", apply_labels),
        Task::new("write_database", write_database).with_compensation(restore_database),
        Task::new("write_manifest", write_platform_manifest).with_compensation(restore_manifest),
        Task::new("register_security_policy", register_security_policy),
        Task::new("commit_update", commit_update),
        Task::new("remove_temp_dir", remove_temp_dir),
    ]
}

pub(super) fn create_temp_dir(ctx: &mut InstallContext) -> InstallResult<()> {
    ctx.set_step(InstallStep::Start);
    ctx.layout.ensure_base_dirs().map_err(InstallError::fatal)?;
    let dir = make_tmp_dir(&ctx.layout, ctx.kind.as_str()).map_err(InstallError::fatal)?;
    ctx.temp_dir = Some(dir);
    Ok(())
}

pub(super) fn remove_temp_dir(ctx: &mut InstallContext) -> InstallResult<()> {
    if let Some(dir) = ctx.temp_dir.take() {
        if let Err(err) = remove_dir_if_exists(&dir) {
            warn!(dir = %dir.display(), "failed to remove temporary directory: {err:#}");
        }
    }
    Ok(())
}

pub(super) fn unpack_package(ctx: &mut InstallContext) -> InstallResult<()> {
    ctx.set_step(InstallStep::Unpack);
    let source = ctx.request.source.clone();
    if !source.exists() {
        return Err(InstallError::PackageNotFound(source.display().to_string()));
    }
    let temp_dir = ctx.temp_dir.clone().ok_or_else(|| {
        InstallError::FatalError("temporary directory was not created".to_string())
    })?;

    let staged = temp_dir.join("package");
    fs::create_dir_all(&staged)
        .with_context(|| format!("failed to create {}", staged.display()))
        .map_err(InstallError::fatal)?;
    ctx.services
        .unpacker
        .unpack(&source, &staged)
        .with_context(|| format!("failed to unpack {}", source.display()))
        .map_err(InstallError::invalid_package)?;
    ctx.staged_dir = Some(staged);
    Ok(())
}

pub(super) fn parse_descriptor(ctx: &mut InstallContext) -> InstallResult<()> {
    ctx.set_step(InstallStep::Configure);
    let staged = ctx.staged_dir()?.clone();
    let path = staged.join(DESCRIPTOR_FILE);
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))
        .map_err(InstallError::invalid_package)?;
    let descriptor = PackageDescriptor::from_toml_str(&raw).map_err(InstallError::invalid_package)?;

    if let Some(expected) = &ctx.request.expected_id {
        require_package_id(expected)?;
        if expected != &descriptor.id {
            return Err(InstallError::ArgumentInvalid(format!(
                "package id '{}' does not match requested id '{expected}'",
                descriptor.id
            )));
        }
    }
    // Delta packages only ship what changed.
    if ctx.kind == InstallationKind::Install && !staged.join(&descriptor.start_file).is_file() {
        return Err(InstallError::PackageInvalid(format!(
            "start file '{}' is missing from package '{}'",
            descriptor.start_file, descriptor.id
        )));
    }

    ctx.signal.set_package_id(descriptor.id.clone());
    ctx.descriptor = Some(descriptor);
    Ok(())
}

fn check_installation(ctx: &mut InstallContext) -> InstallResult<()> {
    let descriptor = ctx.descriptor()?.clone();
    let id = descriptor.id.as_str();
    ensure_no_pending_update(&ctx.layout, id)?;

    let previous = read_record(&ctx.layout, id).map_err(InstallError::fatal)?;
    let requested_location = ctx.request.mode.location;
    match previous {
        Some(previous) => {
            if previous.version > descriptor.version {
                return Err(InstallError::PackageLowerVersion {
                    installed: previous.version.to_string(),
                    requested: descriptor.version.to_string(),
                });
            }
            if previous.location != requested_location {
                return Err(InstallError::AlreadyInstalled(format!(
                    "{id} is installed on {} storage",
                    previous.location.as_str()
                )));
            }
            ctx.paths = Some(PackagePaths::new(previous.root.clone(), previous.location));
            ctx.is_update = true;
            ctx.previous = Some(previous);
        }
        None => {
            ctx.paths = Some(ctx.layout.package_paths(id, requested_location));
        }
    }

    info!(
        package = %id,
        version = %descriptor.version,
        update = ctx.is_update,
        "installing package"
    );
    ctx.signal
        .send_start(if ctx.is_update { "update" } else { "install" });
    ctx.signal.send_percent(ctx.step.percent());
    Ok(())
}

fn check_storage(ctx: &mut InstallContext) -> InstallResult<()> {
    let staged = ctx.staged_dir()?.clone();
    let needed = dir_size(&staged).map_err(InstallError::fatal)?;
    ctx.staged_size = needed;

    let Some(quota) = ctx.services.storage_quota_bytes else {
        return Ok(());
    };
    let mut used = dir_size(&ctx.layout.apps_dir()).map_err(InstallError::fatal)?
        + dir_size(&ctx.layout.external_apps_dir()).map_err(InstallError::fatal)?;
    if let Some(previous) = &ctx.previous {
        used = used.saturating_sub(dir_size(&previous.root).map_err(InstallError::fatal)?);
    }
    if used.saturating_add(needed) > quota {
        return Err(InstallError::OutOfStorage(format!(
            "{needed} bytes needed with {used} of {quota} bytes in use"
        )));
    }
    Ok(())
}

pub(super) fn evaluate_trust(ctx: &mut InstallContext) -> InstallResult<()> {
    ctx.set_step(InstallStep::Certify);
    let staged = ctx.staged_dir()?.clone();
    let evaluation = evaluate_trust_level(
        &staged,
        ctx.services.verifier.as_ref(),
        ctx.request.mode.origin,
    )?;
    info!(
        package = %ctx.signal.package_id(),
        tier = %evaluation.tier,
        signatures = evaluation.certificates.len(),
        "trust level evaluated"
    );
    ctx.trust = Some(evaluation);
    Ok(())
}

pub(super) fn check_privileges(ctx: &mut InstallContext) -> InstallResult<()> {
    check_privilege_gates(ctx.trust()?.tier, ctx.descriptor()?)
}

fn prepare_external(ctx: &mut InstallContext) -> InstallResult<()> {
    if ctx.paths()?.location() != StorageLocation::External {
        return Ok(());
    }
    let id = ctx.package_id()?;
    ctx.services
        .external
        .pre_install(id, ctx.staged_size)
        .map_err(InstallError::fatal)
}

fn release_external(ctx: &mut InstallContext) -> InstallResult<()> {
    if ctx.paths()?.location() != StorageLocation::External {
        return Ok(());
    }
    let id = ctx.package_id()?;
    ctx.services
        .external
        .post_install(id, false)
        .map_err(InstallError::fatal)
}

fn backup_previous(ctx: &mut InstallContext) -> InstallResult<()> {
    ctx.set_step(InstallStep::Backup);
    if !ctx.is_update {
        return Ok(());
    }
    let paths = ctx.paths()?.clone();
    let id = ctx.package_id()?;
    let external = paths.location() == StorageLocation::External;

    if external {
        ctx.services.external.disable(id).map_err(InstallError::fatal)?;
    }
    if let Err(err) = begin_backup(&paths) {
        if external {
            if let Err(enable_err) = ctx.services.external.enable(id) {
                warn!(package = %id, "failed to re-enable external storage: {enable_err:#}");
            }
        }
        return Err(InstallError::fatal(err));
    }
    Ok(())
}

/// Compensation shared with RDS updates: puts the snapshot back and
/// re-enables external storage.
pub(super) fn restore_previous(ctx: &mut InstallContext) -> InstallResult<()> {
    if !ctx.is_update {
        return Ok(());
    }
    let paths = ctx.paths()?.clone();
    let id = ctx.package_id()?;
    let restored = restore_backup(&paths);
    if paths.location() == StorageLocation::External {
        if let Err(err) = ctx.services.external.enable(id) {
            warn!(package = %id, "failed to re-enable external storage: {err:#}");
        }
    }
    match restored {
        Ok(true) => {
            info!(package = %id, "previous installation restored");
            Ok(())
        }
        Ok(false) => {
            warn!(package = %id, "no backup found to restore");
            Ok(())
        }
        Err(err) => Err(InstallError::fatal(err)),
    }
}

fn create_directories(ctx: &mut InstallContext) -> InstallResult<()> {
    let paths = ctx.paths()?;
    for dir in [
        paths.root().to_path_buf(),
        paths.bin_dir(),
        paths.src_dir(),
        paths.data_dir(),
        paths.shared_res_dir(),
        paths.shared_data_dir(),
    ] {
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))
            .map_err(InstallError::fatal)?;
    }
    Ok(())
}

fn remove_created_directories(ctx: &mut InstallContext) -> InstallResult<()> {
    if ctx.is_update {
        return Ok(());
    }
    remove_dir_if_exists(ctx.paths()?.root()).map_err(InstallError::fatal)
}

fn move_files(ctx: &mut InstallContext) -> InstallResult<()> {
    ctx.set_step(InstallStep::Files);
    let staged = ctx.staged_dir()?.clone();
    let paths = ctx.paths()?.clone();
    let descriptor = ctx.descriptor()?.clone();

    let src = paths.src_dir();
    remove_dir_if_exists(&src).map_err(InstallError::fatal)?;
    move_dir_or_copy(&staged, &src).map_err(InstallError::fatal)?;
    write_launcher(&paths, &descriptor.id, &descriptor.name, &descriptor.start_file)
        .map_err(InstallError::fatal)?;

    if let Some(icon) = &descriptor.icon {
        ctx.signal.send_icon_path(&src.join(icon));
    }
    Ok(())
}

fn preserve_user_data(ctx: &mut InstallContext) -> InstallResult<()> {
    if !ctx.is_update {
        return Ok(());
    }
    let paths = ctx.paths()?;
    let backup = PackagePaths::new(paths.backup_root(), paths.location());
    for (from, to) in [
        (backup.data_dir(), paths.data_dir()),
        (backup.shared_data_dir(), paths.shared_data_dir()),
    ] {
        if from.is_dir() {
            copy_dir_recursive(&from, &to).map_err(InstallError::fatal)?;
        }
    }
    Ok(())
}

fn apply_labels(ctx: &mut InstallContext) -> InstallResult<()> {
    ctx.set_step(InstallStep::Labels);
    let id = ctx.package_id()?;
    ctx.services
        .labels
        .label_package(id, ctx.paths()?)
        .map_err(InstallError::fatal)
}

fn build_record(ctx: &InstallContext) -> InstallResult<PackageRecord> {
    let descriptor = ctx.descriptor()?;
    let paths = ctx.paths()?;
    let trust = ctx.trust()?;
    Ok(PackageRecord {
        id: descriptor.id.clone(),
        name: descriptor.name.clone(),
        version: descriptor.version.clone(),
        tier: trust.tier,
        location: paths.location(),
        root: paths.root().to_path_buf(),
        start_file: descriptor.start_file.clone(),
        icon: descriptor.icon.clone(),
        certificates: trust.certificates.clone(),
        installed_at_unix: current_unix_timestamp().map_err(InstallError::fatal)?,
    })
}

/// Writes the `<id>.backup` row for updates, then the new record. A failure
/// writing the record removes the backup row again so no partial state
/// remains.
pub(super) fn write_database(ctx: &mut InstallContext) -> InstallResult<()> {
    ctx.set_step(InstallStep::Database);
    let record = build_record(ctx)?;

    if let Some(previous) = &ctx.previous {
        save_backup_row(&ctx.layout, previous).map_err(InstallError::fatal)?;
    }
    if let Err(err) = write_record(&ctx.layout, &record.id, &record) {
        if ctx.previous.is_some() {
            if let Err(cleanup) = remove_backup_row(&ctx.layout, &record.id) {
                warn!(package = %record.id, "failed to drop backup row: {cleanup:#}");
            }
        }
        return Err(InstallError::fatal(err));
    }
    Ok(())
}

pub(super) fn restore_database(ctx: &mut InstallContext) -> InstallResult<()> {
    let id = ctx.package_id()?.to_string();
    match &ctx.previous {
        Some(previous) => {
            write_record(&ctx.layout, &id, previous).map_err(InstallError::fatal)?;
            remove_backup_row(&ctx.layout, &id).map_err(InstallError::fatal)?;
        }
        None => {
            remove_record(&ctx.layout, &id).map_err(InstallError::fatal)?;
        }
    }
    Ok(())
}

pub(super) fn write_platform_manifest(ctx: &mut InstallContext) -> InstallResult<()> {
    let descriptor = ctx.descriptor()?.clone();
    let paths = ctx.paths()?.clone();
    let tier = ctx.trust()?.tier;

    ctx.previous_manifest =
        read_manifest_raw(&ctx.layout, &descriptor.id).map_err(InstallError::fatal)?;
    let icon: Option<PathBuf> = descriptor.icon.as_ref().map(|icon| paths.src_dir().join(icon));
    let manifest = PlatformManifest {
        id: descriptor.id.clone(),
        version: descriptor.version.to_string(),
        label: descriptor.name.clone(),
        exec: paths.launcher_path(&descriptor.id),
        icon,
        tier,
    };
    write_manifest(&ctx.layout, &manifest).map_err(InstallError::fatal)?;
    Ok(())
}

pub(super) fn restore_manifest(ctx: &mut InstallContext) -> InstallResult<()> {
    let id = ctx.package_id()?;
    let restored = match &ctx.previous_manifest {
        Some(raw) => restore_manifest_raw(&ctx.layout, id, raw),
        None => remove_manifest(&ctx.layout, id),
    };
    restored.map_err(InstallError::fatal)
}

pub(super) fn register_security_policy(ctx: &mut InstallContext) -> InstallResult<()> {
    ctx.set_step(InstallStep::Policy);
    let descriptor = ctx.descriptor()?;
    let registration = PolicyRegistration {
        package_id: descriptor.id.clone(),
        name: descriptor.name.clone(),
        version: descriptor.version.to_string(),
        certificates: ctx.trust()?.certificates.clone(),
    };
    if let Err(err) = ctx.services.policy.register(&registration) {
        warn!(
            package = %registration.package_id,
            "security policy registration failed: {err:#}"
        );
    }
    Ok(())
}

/// Everything here is best effort: a leftover marker is reconciled by the
/// recovery flow.
pub(super) fn commit_update(ctx: &mut InstallContext) -> InstallResult<()> {
    ctx.set_step(InstallStep::Commit);
    let paths = ctx.paths()?.clone();
    let id = ctx.package_id()?.to_string();

    if ctx.is_update {
        if let Err(err) = commit_backup(&ctx.layout, &paths) {
            warn!(package = %id, "failed to remove backup directory: {err:#}");
        }
        if let Err(err) = remove_backup_row(&ctx.layout, &id) {
            warn!(package = %id, "failed to remove backup row: {err:#}");
        }
    }

    if paths.location() == StorageLocation::External {
        if ctx.is_update {
            if let Err(err) = ctx.services.external.enable(&id) {
                warn!(package = %id, "failed to re-enable external storage: {err:#}");
            }
        }
        if let Err(err) = ctx.services.external.post_install(&id, true) {
            warn!(package = %id, "external storage post-install failed: {err:#}");
        }
    }
    info!(package = %id, update = ctx.is_update, "package committed");
    Ok(())
}
