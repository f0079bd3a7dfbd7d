use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use pkgflow_core::{InstallMode, InstallationKind};
use tracing::warn;

use crate::backup::pending_recoveries;
use crate::collaborators::Services;
use crate::context::{
    InstallContext, InstallRequest, PluginContext, RecoveryContext, UninstallContext,
};
use crate::database::{list_records, read_plugin_records, PackageRecord, PluginRecord};
use crate::engine::{Job, RunnableJob};
use crate::flows::{
    install_tasks, next_ready_plugin, plugin_tasks, rds_update_tasks, recovery_tasks,
    uninstall_tasks,
};
use crate::layout::DeviceLayout;
use crate::runner::{JobObserver, Runner};

#[derive(Clone)]
pub struct Installer {
    layout: DeviceLayout,
    services: Arc<Services>,
}

impl Installer {
    pub fn new(layout: DeviceLayout, services: Services) -> Self {
        Self {
            layout,
            services: Arc::new(services),
        }
    }

    pub fn layout(&self) -> &DeviceLayout {
        &self.layout
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn install_job(&self, request: InstallRequest) -> Box<dyn RunnableJob> {
        let context = InstallContext::new(
            InstallationKind::Install,
            request,
            self.layout.clone(),
            self.services.clone(),
        );
        Box::new(Job::new(InstallationKind::Install, context, install_tasks()))
    }

    pub fn rds_update_job(
        &self,
        source: impl Into<PathBuf>,
        package_id: impl Into<String>,
        mode: InstallMode,
    ) -> Box<dyn RunnableJob> {
        let request = InstallRequest::new(source)
            .with_mode(mode)
            .with_expected_id(package_id);
        let context = InstallContext::new(
            InstallationKind::RdsUpdate,
            request,
            self.layout.clone(),
            self.services.clone(),
        );
        Box::new(Job::new(InstallationKind::RdsUpdate, context, rds_update_tasks()))
    }

    pub fn uninstall_job(&self, package_id: impl Into<String>) -> Box<dyn RunnableJob> {
        let context = UninstallContext::new(self.layout.clone(), self.services.clone(), package_id);
        Box::new(Job::new(InstallationKind::Uninstall, context, uninstall_tasks()))
    }

    pub fn recovery_job(&self, package_id: impl Into<String>) -> Box<dyn RunnableJob> {
        let context = RecoveryContext::new(self.layout.clone(), self.services.clone(), package_id);
        Box::new(Job::new(InstallationKind::Recovery, context, recovery_tasks()))
    }

    pub fn plugin_job(&self, source_dir: impl Into<PathBuf>) -> Box<dyn RunnableJob> {
        let context = PluginContext::new(self.layout.clone(), self.services.clone(), source_dir);
        Box::new(Job::new(InstallationKind::PluginInstall, context, plugin_tasks()))
    }

    pub fn pending_recoveries(&self) -> Result<Vec<String>> {
        pending_recoveries(&self.layout)
    }

    pub fn installed_packages(&self) -> Result<Vec<PackageRecord>> {
        list_records(&self.layout)
    }

    pub fn plugins(&self) -> Result<Vec<PluginRecord>> {
        read_plugin_records(&self.layout)
    }

    /// A runner whose success sweep starts waiting plugins that became
    /// installable.
    pub fn runner(&self, observer: impl JobObserver + 'static) -> Runner {
        let installer = self.clone();
        Runner::new(observer).with_sweep(move || match next_ready_plugin(&installer.layout) {
            Ok(next) => next.map(|source_dir| installer.plugin_job(source_dir)),
            Err(err) => {
                warn!("failed to scan waiting plugins: {err:#}");
                None
            }
        })
    }
}
