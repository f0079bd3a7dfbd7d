//! Per-job mutable state. Every accumulated field names the task that is its
//! only writer; all other tasks read it.

use std::path::PathBuf;
use std::sync::Arc;

use pkgflow_core::{
    ErrorCode, InstallError, InstallMode, InstallResult, InstallationKind, PackageDescriptor,
    PluginDescriptor,
};
use pkgflow_security::TrustEvaluation;

use crate::collaborators::Services;
use crate::database::{PackageRecord, PluginRecord};
use crate::engine::JobContext;
use crate::layout::{DeviceLayout, PackagePaths};
use crate::signal::PkgmgrSignal;

/// Milestones of an install or update, in order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum InstallStep {
    #[default]
    Start,
    Unpack,
    Configure,
    Certify,
    Backup,
    Files,
    Labels,
    Database,
    Policy,
    Commit,
    Done,
}

impl InstallStep {
    pub fn percent(self) -> u8 {
        match self {
            Self::Start => 0,
            Self::Unpack => 10,
            Self::Configure => 20,
            Self::Certify => 35,
            Self::Backup => 45,
            Self::Files => 60,
            Self::Labels => 70,
            Self::Database => 80,
            Self::Policy => 90,
            Self::Commit => 95,
            Self::Done => 100,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Start => "starting",
            Self::Unpack => "unpacking package",
            Self::Configure => "reading package descriptor",
            Self::Certify => "checking signatures",
            Self::Backup => "backing up previous version",
            Self::Files => "installing files",
            Self::Labels => "applying labels",
            Self::Database => "updating package database",
            Self::Policy => "registering security policy",
            Self::Commit => "committing",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub source: PathBuf,
    pub mode: InstallMode,
    pub expected_id: Option<String>,
}

impl InstallRequest {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            mode: InstallMode::default(),
            expected_id: None,
        }
    }

    pub fn with_mode(mut self, mode: InstallMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_expected_id(mut self, id: impl Into<String>) -> Self {
        self.expected_id = Some(id.into());
        self
    }

    /// Id used for signals until the descriptor is read.
    fn provisional_id(&self) -> String {
        if let Some(id) = &self.expected_id {
            return id.clone();
        }
        self.source
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.source.display().to_string())
    }
}

/// State of an install, update or RDS update job.
pub struct InstallContext {
    pub kind: InstallationKind,
    pub request: InstallRequest,
    pub layout: DeviceLayout,
    pub services: Arc<Services>,
    pub signal: PkgmgrSignal,
    /// Written by `create_temp_dir`.
    pub temp_dir: Option<PathBuf>,
    /// Written by `unpack_package`.
    pub staged_dir: Option<PathBuf>,
    /// Written by `parse_descriptor`.
    pub descriptor: Option<PackageDescriptor>,
    /// Written by `check_installation` or `check_rds_target`.
    pub paths: Option<PackagePaths>,
    /// Written by `check_installation` or `check_rds_target`.
    pub is_update: bool,
    /// Written by `check_installation` or `check_rds_target`.
    pub previous: Option<PackageRecord>,
    /// Written by `check_storage`.
    pub staged_size: u64,
    /// Written by `evaluate_trust`.
    pub trust: Option<TrustEvaluation>,
    /// Written by `write_manifest`.
    pub previous_manifest: Option<String>,
    /// Written by whichever task last reached a milestone.
    pub step: InstallStep,
}

impl InstallContext {
    pub fn new(
        kind: InstallationKind,
        request: InstallRequest,
        layout: DeviceLayout,
        services: Arc<Services>,
    ) -> Self {
        let signal = PkgmgrSignal::new(services.signals.clone(), request.provisional_id(), kind);
        Self {
            kind,
            request,
            layout,
            services,
            signal,
            temp_dir: None,
            staged_dir: None,
            descriptor: None,
            paths: None,
            is_update: false,
            previous: None,
            staged_size: 0,
            trust: None,
            previous_manifest: None,
            step: InstallStep::Start,
        }
    }

    pub fn set_step(&mut self, step: InstallStep) {
        self.step = step;
        self.signal.send_percent(step.percent());
    }

    pub fn staged_dir(&self) -> InstallResult<&PathBuf> {
        self.staged_dir
            .as_ref()
            .ok_or_else(|| missing("staged package directory"))
    }

    pub fn descriptor(&self) -> InstallResult<&PackageDescriptor> {
        self.descriptor
            .as_ref()
            .ok_or_else(|| missing("package descriptor"))
    }

    pub fn paths(&self) -> InstallResult<&PackagePaths> {
        self.paths.as_ref().ok_or_else(|| missing("package layout"))
    }

    pub fn trust(&self) -> InstallResult<&TrustEvaluation> {
        self.trust.as_ref().ok_or_else(|| missing("trust evaluation"))
    }

    pub fn package_id(&self) -> InstallResult<&str> {
        Ok(self.descriptor()?.id.as_str())
    }
}

impl JobContext for InstallContext {
    fn subject(&self) -> &str {
        self.signal.package_id()
    }

    fn progress(&self) -> (u8, &'static str) {
        (self.step.percent(), self.step.description())
    }

    fn finish(&mut self, status: ErrorCode) {
        if status.is_success() {
            self.set_step(InstallStep::Done);
        }
        self.signal.send_finish(status);
    }
}

pub struct UninstallContext {
    pub layout: DeviceLayout,
    pub services: Arc<Services>,
    pub signal: PkgmgrSignal,
    pub package_id: String,
    /// Written by `resolve_package`.
    pub record: Option<PackageRecord>,
    /// Written by `resolve_package`.
    pub paths: Option<PackagePaths>,
    /// Written by `resolve_package`.
    pub manifest_path: PathBuf,
    /// Record present but files missing. Written by `resolve_package`.
    pub removed_abnormally: bool,
    /// Files present but record missing. Written by `resolve_package`.
    pub orphaned_files: bool,
    /// Written by whichever task ran last.
    pub progress: (u8, &'static str),
}

impl UninstallContext {
    pub fn new(
        layout: DeviceLayout,
        services: Arc<Services>,
        package_id: impl Into<String>,
    ) -> Self {
        let package_id = package_id.into();
        let signal = PkgmgrSignal::new(
            services.signals.clone(),
            package_id.clone(),
            InstallationKind::Uninstall,
        );
        let manifest_path = layout.manifest_path(&package_id);
        Self {
            layout,
            services,
            signal,
            package_id,
            record: None,
            paths: None,
            manifest_path,
            removed_abnormally: false,
            orphaned_files: false,
            progress: (0, "starting"),
        }
    }

    pub fn report(&mut self, percent: u8, description: &'static str) {
        self.progress = (percent, description);
        self.signal.send_percent(percent);
    }
}

impl JobContext for UninstallContext {
    fn subject(&self) -> &str {
        &self.package_id
    }

    fn progress(&self) -> (u8, &'static str) {
        self.progress
    }

    fn finish(&mut self, status: ErrorCode) {
        if status.is_success() {
            self.report(100, "done");
        }
        self.signal.send_finish(status);
    }
}

pub struct RecoveryContext {
    pub layout: DeviceLayout,
    pub services: Arc<Services>,
    pub signal: PkgmgrSignal,
    pub package_id: String,
    /// Written by `inspect_recovery_marker`.
    pub paths: Option<PackagePaths>,
    /// Written by `inspect_recovery_marker`.
    pub backup_dir_found: bool,
    /// Written by `inspect_recovery_marker`.
    pub backup_row_found: bool,
    /// Written by `restore_backup_row`.
    pub restored: Option<PackageRecord>,
    /// Written by whichever task ran last.
    pub progress: (u8, &'static str),
}

impl RecoveryContext {
    pub fn new(
        layout: DeviceLayout,
        services: Arc<Services>,
        package_id: impl Into<String>,
    ) -> Self {
        let package_id = package_id.into();
        let signal = PkgmgrSignal::new(
            services.signals.clone(),
            package_id.clone(),
            InstallationKind::Recovery,
        );
        Self {
            layout,
            services,
            signal,
            package_id,
            paths: None,
            backup_dir_found: false,
            backup_row_found: false,
            restored: None,
            progress: (0, "starting"),
        }
    }

    pub fn report(&mut self, percent: u8, description: &'static str) {
        self.progress = (percent, description);
        self.signal.send_percent(percent);
    }

    pub fn paths(&self) -> InstallResult<&PackagePaths> {
        self.paths.as_ref().ok_or_else(|| missing("package layout"))
    }
}

impl JobContext for RecoveryContext {
    fn subject(&self) -> &str {
        &self.package_id
    }

    fn progress(&self) -> (u8, &'static str) {
        self.progress
    }

    fn finish(&mut self, status: ErrorCode) {
        if status.is_success() {
            self.report(100, "done");
        }
        self.signal.send_finish(status);
    }
}

pub struct PluginContext {
    pub layout: DeviceLayout,
    pub services: Arc<Services>,
    pub signal: PkgmgrSignal,
    pub source_dir: PathBuf,
    /// Written by `parse_plugin_descriptor`.
    pub descriptor: Option<PluginDescriptor>,
    /// Written by `parse_plugin_descriptor`.
    pub previous: Option<PluginRecord>,
    /// Written by `check_plugin_dependencies`.
    pub waiting: bool,
    /// Written by whichever task ran last.
    pub progress: (u8, &'static str),
}

impl PluginContext {
    pub fn new(
        layout: DeviceLayout,
        services: Arc<Services>,
        source_dir: impl Into<PathBuf>,
    ) -> Self {
        let source_dir = source_dir.into();
        let provisional = source_dir
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| source_dir.display().to_string());
        let signal = PkgmgrSignal::new(
            services.signals.clone(),
            provisional,
            InstallationKind::PluginInstall,
        );
        Self {
            layout,
            services,
            signal,
            source_dir,
            descriptor: None,
            previous: None,
            waiting: false,
            progress: (0, "starting"),
        }
    }

    pub fn report(&mut self, percent: u8, description: &'static str) {
        self.progress = (percent, description);
        self.signal.send_percent(percent);
    }

    pub fn descriptor(&self) -> InstallResult<&PluginDescriptor> {
        self.descriptor
            .as_ref()
            .ok_or_else(|| missing("plugin descriptor"))
    }
}

impl JobContext for PluginContext {
    fn subject(&self) -> &str {
        self.signal.package_id()
    }

    fn progress(&self) -> (u8, &'static str) {
        self.progress
    }

    fn finish(&mut self, status: ErrorCode) {
        if status.is_success() {
            self.report(100, "done");
        }
        self.signal.send_finish(status);
    }
}

fn missing(what: &str) -> InstallError {
    InstallError::FatalError(format!("{what} is not available at this step"))
}
