use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use pkgflow_core::{InstallError, InstallResult, PluginDescriptor, PLUGIN_DESCRIPTOR_FILE};
use tracing::{debug, info};

use crate::context::PluginContext;
use crate::database::{
    read_plugin_records, remove_plugin_record, write_plugin_record, PluginRecord, PluginStatus,
};
use crate::engine::Task;
use crate::fs_utils::{copy_dir_recursive, remove_dir_if_exists};
use crate::layout::DeviceLayout;

/// Plugins whose required plugins are missing are recorded as waiting and
/// installed later by [`next_ready_plugin`].
pub fn plugin_tasks() -> Vec<Task<PluginContext>> {
    vec![
        Task::new("parse_plugin_descriptor", parse_plugin_descriptor),
        Task::new("check_plugin_dependencies", check_plugin_dependencies),
        Task::new("copy_plugin_files", copy_plugin_files).with_compensation(remove_plugin_files),
        Task::new("register_plugin", register_plugin).with_compensation(unregister_plugin),
    ]
}

fn plugin_failure(err: impl Into<anyhow::Error>) -> InstallError {
    InstallError::PluginInstallationFailed(format!("{:#}", err.into()))
}

fn parse_plugin_descriptor(ctx: &mut PluginContext) -> InstallResult<()> {
    let descriptor = read_plugin_descriptor(&ctx.source_dir).map_err(plugin_failure)?;
    let previous = read_plugin_records(&ctx.layout)
        .map_err(InstallError::fatal)?
        .into_iter()
        .find(|record| record.name == descriptor.name);

    ctx.signal.set_package_id(descriptor.name.clone());
    ctx.signal.send_start("install");
    ctx.report(20, "reading plugin descriptor");
    ctx.descriptor = Some(descriptor);
    ctx.previous = previous;
    Ok(())
}

fn read_plugin_descriptor(source_dir: &Path) -> Result<PluginDescriptor> {
    let path = source_dir.join(PLUGIN_DESCRIPTOR_FILE);
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let descriptor = PluginDescriptor::from_toml_str(&raw)?;
    let library = source_dir.join(&descriptor.library);
    if !library.is_file() {
        return Err(anyhow!(
            "plugin library '{}' is missing from {}",
            descriptor.library,
            source_dir.display()
        ));
    }
    Ok(descriptor)
}

fn check_plugin_dependencies(ctx: &mut PluginContext) -> InstallResult<()> {
    ctx.report(40, "checking plugin dependencies");
    let records = read_plugin_records(&ctx.layout).map_err(InstallError::fatal)?;
    let descriptor = ctx.descriptor()?;
    let missing: Vec<&String> = descriptor
        .requires
        .iter()
        .filter(|required| !is_installed(&records, required))
        .collect();
    if !missing.is_empty() {
        info!(
            plugin = %descriptor.name,
            missing = ?missing,
            "plugin waits for required plugins"
        );
    }
    let waiting = !missing.is_empty();
    ctx.waiting = waiting;
    Ok(())
}

fn is_installed(records: &[PluginRecord], name: &str) -> bool {
    records
        .iter()
        .any(|record| record.name == name && record.status == PluginStatus::Installed)
}

fn copy_plugin_files(ctx: &mut PluginContext) -> InstallResult<()> {
    ctx.report(70, "copying plugin files");
    if ctx.waiting {
        return Ok(());
    }
    let target = ctx.layout.plugin_dir(&ctx.descriptor()?.name);
    remove_dir_if_exists(&target).map_err(plugin_failure)?;
    copy_dir_recursive(&ctx.source_dir, &target).map_err(plugin_failure)?;
    debug!(target = %target.display(), "plugin files copied");
    Ok(())
}

fn remove_plugin_files(ctx: &mut PluginContext) -> InstallResult<()> {
    if ctx.waiting {
        return Ok(());
    }
    let target = ctx.layout.plugin_dir(&ctx.descriptor()?.name);
    remove_dir_if_exists(&target).map_err(InstallError::fatal)
}

fn register_plugin(ctx: &mut PluginContext) -> InstallResult<()> {
    ctx.report(90, "registering plugin");
    let descriptor = ctx.descriptor()?;
    let record = PluginRecord {
        name: descriptor.name.clone(),
        library: descriptor.library.clone(),
        requires: descriptor.requires.clone(),
        status: if ctx.waiting {
            PluginStatus::Waiting
        } else {
            PluginStatus::Installed
        },
        source_dir: absolute(&ctx.source_dir),
    };
    write_plugin_record(&ctx.layout, &record).map_err(plugin_failure)?;
    info!(plugin = %record.name, waiting = ctx.waiting, "plugin registered");
    Ok(())
}

fn unregister_plugin(ctx: &mut PluginContext) -> InstallResult<()> {
    let name = ctx.descriptor()?.name.clone();
    let restored = match &ctx.previous {
        Some(previous) => write_plugin_record(&ctx.layout, previous).map(|_| ()),
        None => remove_plugin_record(&ctx.layout, &name),
    };
    restored.map_err(InstallError::fatal)
}

fn absolute(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Source directory of the first waiting plugin whose required plugins are
/// all installed.
pub fn next_ready_plugin(layout: &DeviceLayout) -> Result<Option<PathBuf>> {
    let records = read_plugin_records(layout)?;
    Ok(records
        .iter()
        .filter(|record| record.status == PluginStatus::Waiting)
        .find(|record| {
            record
                .requires
                .iter()
                .all(|required| is_installed(&records, required))
        })
        .map(|record| record.source_dir.clone()))
}
