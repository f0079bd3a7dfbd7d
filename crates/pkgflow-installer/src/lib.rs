mod backup;
mod collaborators;
mod config;
mod context;
mod database;
mod delta;
mod engine;
mod flows;
mod fs_utils;
mod installer;
mod launcher;
mod layout;
mod manifest;
mod runner;
mod signal;
mod unpack;

pub use backup::{
    begin_backup, begin_copy_backup, commit_backup, pending_recoveries, restore_backup,
};
pub use collaborators::{
    AppRuntime, ExternalStorage, LabelManager, NoopAppRuntime, NoopExternalStorage,
    NoopLabelManager, NoopPolicyRegistrar, PackageUnpacker, PolicyRegistration,
    SecurityPolicyRegistrar, Services,
};
pub use config::{InstallerConfig, StorageConfig, TrustConfig, CONFIG_FILE_NAME};
pub use context::{
    InstallContext, InstallRequest, InstallStep, PluginContext, RecoveryContext,
    UninstallContext,
};
pub use database::{
    backup_id, list_records, read_plugin_records, read_record, PackageRecord, PluginRecord,
    PluginStatus,
};
pub use delta::{DeltaPatcher, DeltaReport};
pub use engine::{Job, JobContext, JobOutcome, JobState, RunnableJob, Task};
pub use flows::{
    install_tasks, next_ready_plugin, plugin_tasks, rds_update_tasks, recovery_tasks,
    uninstall_tasks,
};
pub use installer::Installer;
pub use layout::{default_user_prefix, DeviceLayout, PackagePaths, BACKUP_SUFFIX};
pub use manifest::{read_manifest, PlatformManifest};
pub use runner::{
    Busy, JobHandle, JobObserver, JobRegistry, JobReport, NoopObserver, Runner, RunnerSignal,
};
pub use signal::{MemorySignalSink, NullSignalSink, PkgmgrSignal, SignalSink, WriterSignalSink};
pub use unpack::DefaultUnpacker;

#[cfg(test)]
mod tests;
