use thiserror::Error;

pub type InstallResult<T> = Result<T, InstallError>;

/// Stable status codes delivered through the finished callback and the
/// `error=` package manager signal. The numeric values are part of the wire
/// contract and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Success,
    PackageNotFound,
    PackageInvalid,
    PackageLowerVersion,
    SignatureNotFound,
    SignatureInvalid,
    CertificateExpired,
    PrivilegeLevelViolation,
    FatalError,
    OutOfStorage,
    ArgumentInvalid,
    PackageAlreadyInstalled,
    PluginInstallationFailed,
    UninstallationFailed,
    RdsDeltaFailure,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Success => 0,
            Self::PackageNotFound => 1,
            Self::PackageInvalid => 2,
            Self::PackageLowerVersion => 3,
            Self::SignatureNotFound => 21,
            Self::SignatureInvalid => 22,
            Self::CertificateExpired => 34,
            Self::PrivilegeLevelViolation => 42,
            Self::FatalError => 61,
            Self::OutOfStorage => 62,
            Self::ArgumentInvalid => 64,
            Self::PackageAlreadyInstalled => 121,
            Self::PluginInstallationFailed => 126,
            Self::UninstallationFailed => 127,
            Self::RdsDeltaFailure => 128,
        }
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        [
            Self::Success,
            Self::PackageNotFound,
            Self::PackageInvalid,
            Self::PackageLowerVersion,
            Self::SignatureNotFound,
            Self::SignatureInvalid,
            Self::CertificateExpired,
            Self::PrivilegeLevelViolation,
            Self::FatalError,
            Self::OutOfStorage,
            Self::ArgumentInvalid,
            Self::PackageAlreadyInstalled,
            Self::PluginInstallationFailed,
            Self::UninstallationFailed,
            Self::RdsDeltaFailure,
        ]
        .into_iter()
        .find(|code| code.as_u32() == value)
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstallError {
    #[error("package invalid: {0}")]
    PackageInvalid(String),
    #[error("package not found: {0}")]
    PackageNotFound(String),
    #[error("installed version {installed} is newer than {requested}")]
    PackageLowerVersion { installed: String, requested: String },
    #[error("signature invalid: {0}")]
    SignatureInvalid(String),
    #[error("no signature found in {0}")]
    SignatureNotFound(String),
    #[error("certificate revoked or expired: {0}")]
    CertificateExpired(String),
    #[error("privilege level violation: {0}")]
    PrivilegeLevelViolation(String),
    #[error("out of storage: {0}")]
    OutOfStorage(String),
    #[error("fatal error: {0}")]
    FatalError(String),
    #[error("package already installed: {0}")]
    AlreadyInstalled(String),
    #[error("rds delta failure: {0}")]
    RdsDeltaFailure(String),
    #[error("uninstallation failed: {0}")]
    UninstallationFailed(String),
    #[error("plugin installation failed: {0}")]
    PluginInstallationFailed(String),
    #[error("invalid argument: {0}")]
    ArgumentInvalid(String),
}

impl InstallError {
    /// Wraps an internal plumbing error, keeping the whole context chain.
    pub fn fatal(err: impl Into<anyhow::Error>) -> Self {
        Self::FatalError(format!("{:#}", err.into()))
    }

    pub fn invalid_package(err: impl Into<anyhow::Error>) -> Self {
        Self::PackageInvalid(format!("{:#}", err.into()))
    }

    pub fn delta(err: impl Into<anyhow::Error>) -> Self {
        Self::RdsDeltaFailure(format!("{:#}", err.into()))
    }

    pub fn uninstall(err: impl Into<anyhow::Error>) -> Self {
        Self::UninstallationFailed(format!("{:#}", err.into()))
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::PackageInvalid(_) => ErrorCode::PackageInvalid,
            Self::PackageNotFound(_) => ErrorCode::PackageNotFound,
            Self::PackageLowerVersion { .. } => ErrorCode::PackageLowerVersion,
            Self::SignatureInvalid(_) => ErrorCode::SignatureInvalid,
            Self::SignatureNotFound(_) => ErrorCode::SignatureNotFound,
            Self::CertificateExpired(_) => ErrorCode::CertificateExpired,
            Self::PrivilegeLevelViolation(_) => ErrorCode::PrivilegeLevelViolation,
            Self::OutOfStorage(_) => ErrorCode::OutOfStorage,
            Self::FatalError(_) => ErrorCode::FatalError,
            Self::AlreadyInstalled(_) => ErrorCode::PackageAlreadyInstalled,
            Self::RdsDeltaFailure(_) => ErrorCode::RdsDeltaFailure,
            Self::UninstallationFailed(_) => ErrorCode::UninstallationFailed,
            Self::PluginInstallationFailed(_) => ErrorCode::PluginInstallationFailed,
            Self::ArgumentInvalid(_) => ErrorCode::ArgumentInvalid,
        }
    }
}
