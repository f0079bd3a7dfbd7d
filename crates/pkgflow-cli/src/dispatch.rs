use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use pkgflow_core::{InstallMode, InstallOrigin};
use pkgflow_installer::{
    default_user_prefix, DeviceLayout, InstallRequest, Installer, InstallerConfig, JobObserver,
    JobReport, RunnableJob, CONFIG_FILE_NAME,
};
use tracing::{debug, info};

use crate::render::{
    records_json, render_plugin_lines, render_record_lines, render_report_line, OutputStyle,
    ProgressObserver,
};
use crate::{Commands, ModeArgs};

/// Config lookup order: `--config`, then `pkgflow.toml` in `--prefix`, then
/// the user prefix.
pub fn config_path(explicit: Option<&Path>, prefix: Option<&Path>) -> Result<PathBuf> {
    match (explicit, prefix) {
        (Some(path), _) => Ok(path.to_path_buf()),
        (None, Some(prefix)) => Ok(prefix.join(CONFIG_FILE_NAME)),
        (None, None) => Ok(default_user_prefix()?.join(CONFIG_FILE_NAME)),
    }
}

pub fn open_installer(config: Option<&Path>, prefix: Option<PathBuf>) -> Result<Installer> {
    let path = config_path(config, prefix.as_deref())?;
    let config = InstallerConfig::load(&path)?;
    let prefix = match prefix {
        Some(prefix) => prefix,
        None => config.resolve_prefix()?,
    };
    debug!(config = %path.display(), prefix = %prefix.display(), "opening installer");

    let layout = DeviceLayout::new(prefix);
    layout
        .ensure_base_dirs()
        .context("failed to prepare device prefix")?;
    Ok(Installer::new(layout, config.build_services()?))
}

pub(crate) fn install_mode(args: &ModeArgs) -> InstallMode {
    let mut mode = InstallMode::default();
    if args.external {
        mode = mode.external();
    }
    if args.preload {
        mode = mode.with_origin(InstallOrigin::Preload);
    } else if args.fota {
        mode = mode.with_origin(InstallOrigin::Fota);
    }
    mode
}

pub(crate) fn dispatch(
    installer: &Installer,
    command: Commands,
    style: OutputStyle,
) -> Result<ExitCode> {
    let jobs: Vec<Box<dyn RunnableJob>> = match command {
        Commands::List { json } => {
            print_list(installer, json)?;
            return Ok(ExitCode::SUCCESS);
        }
        Commands::Install { source, id, mode } => {
            let mut request = InstallRequest::new(source).with_mode(install_mode(&mode));
            if let Some(id) = id {
                request = request.with_expected_id(id);
            }
            vec![installer.install_job(request)]
        }
        Commands::UpdateDelta { source, id, mode } => {
            vec![installer.rds_update_job(source, id, install_mode(&mode))]
        }
        Commands::Uninstall { id } => vec![installer.uninstall_job(id)],
        Commands::Recover { id: Some(id) } => vec![installer.recovery_job(id)],
        Commands::Recover { id: None } => {
            let pending = installer.pending_recoveries()?;
            if pending.is_empty() {
                println!("no interrupted updates");
                return Ok(ExitCode::SUCCESS);
            }
            info!(count = pending.len(), "recovering interrupted updates");
            pending
                .into_iter()
                .map(|id| installer.recovery_job(id))
                .collect()
        }
        Commands::InstallPlugin { source } => vec![installer.plugin_job(source)],
    };

    let reports = run_jobs(installer, jobs, ProgressObserver::new(style))?;
    for report in &reports {
        println!("{}", render_report_line(report));
    }
    Ok(ExitCode::from(exit_code(&reports)))
}

/// Runs the jobs one after another. Plugin jobs started by the success
/// sweep are reported too.
pub fn run_jobs(
    installer: &Installer,
    jobs: Vec<Box<dyn RunnableJob>>,
    observer: impl JobObserver + 'static,
) -> Result<Vec<JobReport>> {
    let mut runner = installer.runner(observer);
    for job in jobs {
        runner.submit(job)?;
        runner.run_until_idle();
    }
    Ok(runner.take_reports())
}

/// The code of the first failed job, or zero.
pub fn exit_code(reports: &[JobReport]) -> u8 {
    reports
        .iter()
        .find(|report| !report.status.is_success())
        .map(|report| u8::try_from(report.status.as_u32()).unwrap_or(u8::MAX))
        .unwrap_or(0)
}

fn print_list(installer: &Installer, json: bool) -> Result<()> {
    let records = installer.installed_packages()?;
    let plugins = installer.plugins()?;
    if json {
        let rendered = serde_json::to_string_pretty(&records_json(&records, &plugins))
            .context("failed to render package list")?;
        println!("{rendered}");
        return Ok(());
    }

    if records.is_empty() && plugins.is_empty() {
        println!("no packages installed");
        return Ok(());
    }
    for line in render_record_lines(&records) {
        println!("{line}");
    }
    for line in render_plugin_lines(&plugins) {
        println!("plugin {line}");
    }
    Ok(())
}
