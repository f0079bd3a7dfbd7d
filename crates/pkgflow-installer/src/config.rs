use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use pkgflow_security::{TrustRoot, TrustStore};
use serde::{Deserialize, Serialize};

use crate::collaborators::Services;
use crate::layout::default_user_prefix;
use crate::signal::{NullSignalSink, SignalSink, WriterSignalSink};

pub const CONFIG_FILE_NAME: &str = "pkgflow.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub quota_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TrustConfig {
    pub roots: Vec<TrustRoot>,
    pub revoked: Vec<String>,
}

/// Installer settings read from `pkgflow.toml`.
///
/// `signals` is `stdout`, `none`, or the path of a file the package manager
/// signal lines are appended to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct InstallerConfig {
    pub prefix: Option<PathBuf>,
    pub signals: String,
    pub storage: StorageConfig,
    pub trust: TrustConfig,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            prefix: None,
            signals: "none".to_string(),
            storage: StorageConfig::default(),
            trust: TrustConfig::default(),
        }
    }
}

impl InstallerConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse installer config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read config: {}", path.display()));
            }
        };
        Self::from_toml_str(&raw).with_context(|| format!("invalid config: {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        for (index, root) in self.trust.roots.iter().enumerate() {
            if !is_ed25519_key_hex(&root.public_key) {
                return Err(anyhow!(
                    "trust.roots[{index}].public_key must be 64 hex characters"
                ));
            }
        }
        for key in &self.trust.revoked {
            if !is_ed25519_key_hex(key) {
                return Err(anyhow!("revoked key '{key}' must be 64 hex characters"));
            }
        }
        if self.signals.trim().is_empty() {
            return Err(anyhow!("signals must be 'stdout', 'none' or a file path"));
        }
        Ok(())
    }

    pub fn resolve_prefix(&self) -> Result<PathBuf> {
        match &self.prefix {
            Some(prefix) => Ok(prefix.clone()),
            None => default_user_prefix(),
        }
    }

    pub fn trust_store(&self) -> TrustStore {
        TrustStore::from_roots(&self.trust.roots, &self.trust.revoked)
    }

    pub fn signal_sink(&self) -> Result<Arc<dyn SignalSink>> {
        match self.signals.trim() {
            "none" => Ok(Arc::new(NullSignalSink)),
            "stdout" => Ok(Arc::new(WriterSignalSink::new(io::stdout()))),
            path => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("failed to open signal file: {path}"))?;
                Ok(Arc::new(WriterSignalSink::new(file)))
            }
        }
    }

    pub fn build_services(&self) -> Result<Services> {
        Ok(Services::new(self.trust_store())
            .with_signals(self.signal_sink()?)
            .with_storage_quota(self.storage.quota_bytes))
    }
}

fn is_ed25519_key_hex(value: &str) -> bool {
    let value = value.trim();
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}
