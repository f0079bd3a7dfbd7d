use serde::{Deserialize, Serialize};

/// The request kind a job was built for. Decides which task list the job
/// carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallationKind {
    Install,
    RdsUpdate,
    Recovery,
    Uninstall,
    PluginInstall,
}

impl InstallationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::RdsUpdate => "rds-update",
            Self::Recovery => "recovery",
            Self::Uninstall => "uninstall",
            Self::PluginInstall => "plugin-install",
        }
    }

    /// Value of the `start=` package manager signal before the flow has
    /// decided whether it is an update.
    pub fn signal_start_value(self) -> &'static str {
        match self {
            Self::Install | Self::PluginInstall => "install",
            Self::RdsUpdate | Self::Recovery => "update",
            Self::Uninstall => "uninstall",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum StorageLocation {
    #[default]
    Internal,
    External,
}

impl StorageLocation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::External => "external",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "internal" => Some(Self::Internal),
            "external" => Some(Self::External),
            _ => None,
        }
    }
}

/// Where an install request came from. Preload, FOTA and recovery installs
/// are trusted by construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum InstallOrigin {
    #[default]
    Normal,
    Preload,
    Fota,
    Recovery,
}

impl InstallOrigin {
    pub fn forces_verification(self) -> bool {
        matches!(self, Self::Preload | Self::Fota | Self::Recovery)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct InstallMode {
    pub location: StorageLocation,
    pub origin: InstallOrigin,
}

impl InstallMode {
    pub fn external(mut self) -> Self {
        self.location = StorageLocation::External;
        self
    }

    pub fn with_origin(mut self, origin: InstallOrigin) -> Self {
        self.origin = origin;
        self
    }
}
