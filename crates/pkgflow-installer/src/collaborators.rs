//! Boundaries to the platform subsystems the pipeline drives as black boxes.
//! Only their pass/fail contract matters to the installer.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use pkgflow_security::{CertificateInfo, SignatureVerifier, TrustStore};
use tracing::debug;

use crate::layout::PackagePaths;
use crate::signal::{NullSignalSink, SignalSink};
use crate::unpack::DefaultUnpacker;

pub trait PackageUnpacker: Send + Sync {
    fn unpack(&self, source: &Path, dest: &Path) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRegistration {
    pub package_id: String,
    pub name: String,
    pub version: String,
    pub certificates: Vec<CertificateInfo>,
}

pub trait SecurityPolicyRegistrar: Send + Sync {
    fn register(&self, registration: &PolicyRegistration) -> Result<()>;
    fn unregister(&self, package_id: &str) -> Result<()>;
}

pub trait LabelManager: Send + Sync {
    fn label_package(&self, package_id: &str, paths: &PackagePaths) -> Result<()>;
    fn label_shared_resources(&self, package_id: &str, shared_res_dir: &Path) -> Result<()>;
}

/// app2ext style relocation bookkeeping for packages on removable storage.
pub trait ExternalStorage: Send + Sync {
    fn pre_install(&self, package_id: &str, size_bytes: u64) -> Result<()>;
    fn post_install(&self, package_id: &str, success: bool) -> Result<()>;
    fn disable(&self, package_id: &str) -> Result<()>;
    fn enable(&self, package_id: &str) -> Result<()>;
    fn remove(&self, package_id: &str) -> Result<()>;
}

pub trait AppRuntime: Send + Sync {
    fn terminate(&self, package_id: &str) -> Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPolicyRegistrar;

impl SecurityPolicyRegistrar for NoopPolicyRegistrar {
    fn register(&self, registration: &PolicyRegistration) -> Result<()> {
        debug!(
            package = %registration.package_id,
            certificates = registration.certificates.len(),
            "security policy registration skipped"
        );
        Ok(())
    }

    fn unregister(&self, package_id: &str) -> Result<()> {
        debug!(package = %package_id, "security policy removal skipped");
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLabelManager;

impl LabelManager for NoopLabelManager {
    fn label_package(&self, package_id: &str, paths: &PackagePaths) -> Result<()> {
        debug!(package = %package_id, root = %paths.root().display(), "labeling skipped");
        Ok(())
    }

    fn label_shared_resources(&self, package_id: &str, shared_res_dir: &Path) -> Result<()> {
        debug!(
            package = %package_id,
            dir = %shared_res_dir.display(),
            "shared resource labeling skipped"
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExternalStorage;

impl ExternalStorage for NoopExternalStorage {
    fn pre_install(&self, package_id: &str, size_bytes: u64) -> Result<()> {
        debug!(package = %package_id, size_bytes, "external storage pre-install");
        Ok(())
    }

    fn post_install(&self, package_id: &str, success: bool) -> Result<()> {
        debug!(package = %package_id, success, "external storage post-install");
        Ok(())
    }

    fn disable(&self, package_id: &str) -> Result<()> {
        debug!(package = %package_id, "external storage disabled");
        Ok(())
    }

    fn enable(&self, package_id: &str) -> Result<()> {
        debug!(package = %package_id, "external storage enabled");
        Ok(())
    }

    fn remove(&self, package_id: &str) -> Result<()> {
        debug!(package = %package_id, "external storage removed");
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAppRuntime;

impl AppRuntime for NoopAppRuntime {
    fn terminate(&self, _package_id: &str) -> Result<()> {
        Ok(())
    }
}

pub struct Services {
    pub verifier: Box<dyn SignatureVerifier>,
    pub unpacker: Box<dyn PackageUnpacker>,
    pub policy: Box<dyn SecurityPolicyRegistrar>,
    pub labels: Box<dyn LabelManager>,
    pub external: Box<dyn ExternalStorage>,
    pub runtime: Box<dyn AppRuntime>,
    pub signals: Arc<dyn SignalSink>,
    pub storage_quota_bytes: Option<u64>,
}

impl Services {
    pub fn new(verifier: impl SignatureVerifier + 'static) -> Self {
        Self {
            verifier: Box::new(verifier),
            unpacker: Box::new(DefaultUnpacker),
            policy: Box::new(NoopPolicyRegistrar),
            labels: Box::new(NoopLabelManager),
            external: Box::new(NoopExternalStorage),
            runtime: Box::new(NoopAppRuntime),
            signals: Arc::new(NullSignalSink),
            storage_quota_bytes: None,
        }
    }

    pub fn with_unpacker(mut self, unpacker: impl PackageUnpacker + 'static) -> Self {
        self.unpacker = Box::new(unpacker);
        self
    }

    pub fn with_policy(mut self, policy: impl SecurityPolicyRegistrar + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn with_labels(mut self, labels: impl LabelManager + 'static) -> Self {
        self.labels = Box::new(labels);
        self
    }

    pub fn with_external(mut self, external: impl ExternalStorage + 'static) -> Self {
        self.external = Box::new(external);
        self
    }

    pub fn with_runtime(mut self, runtime: impl AppRuntime + 'static) -> Self {
        self.runtime = Box::new(runtime);
        self
    }

    pub fn with_signals(mut self, signals: Arc<dyn SignalSink>) -> Self {
        self.signals = signals;
        self
    }

    pub fn with_storage_quota(mut self, quota_bytes: Option<u64>) -> Self {
        self.storage_quota_bytes = quota_bytes;
        self
    }
}

impl Default for Services {
    fn default() -> Self {
        Self::new(TrustStore::new())
    }
}
