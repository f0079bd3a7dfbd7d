use pkgflow_core::{InstallError, InstallResult, PackageDescriptor, TrustTier};

/// Rejects a package that declares a capability its trust tier does not
/// allow. A gate failure is a hard failure, never a downgrade.
pub fn check_privilege_gates(tier: TrustTier, descriptor: &PackageDescriptor) -> InstallResult<()> {
    let gates = [
        (
            !descriptor.settings.is_empty(),
            TrustTier::Partner,
            "settings",
        ),
        (
            !descriptor.app_controls.is_empty(),
            TrustTier::Platform,
            "app-control declarations",
        ),
        (
            !descriptor.native_plugins.is_empty(),
            TrustTier::Partner,
            "bundled native plugins",
        ),
        (
            descriptor.background_service,
            TrustTier::Partner,
            "background service",
        ),
    ];

    for (declared, required, capability) in gates {
        if declared && !tier.at_least(required) {
            return Err(InstallError::PrivilegeLevelViolation(format!(
                "{capability} in '{}' require {required} tier, package has {tier}",
                descriptor.id
            )));
        }
    }
    Ok(())
}
