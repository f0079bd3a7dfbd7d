mod archive;
mod delta;
mod descriptor;
mod error;
mod mode;
mod tier;

pub use archive::PackageFormat;
pub use delta::{DeltaManifest, DeltaSection, DELTA_MANIFEST_FILE};
pub use descriptor::{
    is_package_id, AppControl, PackageDescriptor, PluginDescriptor, DESCRIPTOR_FILE,
    PLUGIN_DESCRIPTOR_FILE,
};
pub use error::{ErrorCode, InstallError, InstallResult};
pub use mode::{InstallMode, InstallOrigin, InstallationKind, StorageLocation};
pub use tier::TrustTier;
