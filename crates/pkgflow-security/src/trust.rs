use std::path::Path;

use pkgflow_core::{InstallError, InstallOrigin, InstallResult, TrustTier};
use tracing::{debug, warn};

use crate::digest::content_digest;
use crate::signature::{find_signature_files, SignatureDocument};
use crate::verify::{SignatureVerdict, SignatureVerifier, Verification};

/// Signatures with a sequence number at or below this value are critical: an
/// invalid verdict on them fails the whole chain.
const CRITICAL_SEQUENCE_THRESHOLD: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainEntry {
    pub sequence_number: u32,
    pub is_author_signature: bool,
    pub visibility: TrustTier,
}

/// One processed signature as handed to the security-policy registrar and
/// stored with the package record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub sequence_number: u32,
    pub is_author: bool,
    pub fingerprint: String,
    pub tier: TrustTier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustEvaluation {
    pub tier: TrustTier,
    pub chain: Vec<ChainEntry>,
    pub certificates: Vec<CertificateInfo>,
}

/// Maximum tier among non-author entries, `Unknown` when none contributes.
pub fn effective_tier(chain: &[ChainEntry]) -> TrustTier {
    chain
        .iter()
        .filter(|entry| !entry.is_author_signature)
        .map(|entry| entry.visibility)
        .filter(|tier| *tier != TrustTier::Unknown)
        .max()
        .unwrap_or(TrustTier::Unknown)
}

/// Walks the signature chain of an unpacked package from the highest
/// sequence number down and derives the installation tier.
pub fn evaluate_trust_level(
    package_root: &Path,
    verifier: &dyn SignatureVerifier,
    origin: InstallOrigin,
) -> InstallResult<TrustEvaluation> {
    let (signed_root, files) = find_signature_files(package_root).map_err(InstallError::fatal)?;
    if files.is_empty() {
        return Err(InstallError::SignatureNotFound(
            package_root.display().to_string(),
        ));
    }
    let payload = content_digest(&signed_root).map_err(InstallError::fatal)?;

    let mut chain = Vec::with_capacity(files.len());
    let mut certificates = Vec::with_capacity(files.len());
    for file in &files {
        let mut verification = match SignatureDocument::read(&file.path) {
            Ok(document) => verifier.verify(&document, file.is_author, &payload),
            Err(err) => {
                warn!(path = %file.path.display(), "unreadable signature: {err:#}");
                Verification {
                    verdict: SignatureVerdict::Invalid,
                    visibility: TrustTier::Unknown,
                    fingerprint: String::new(),
                }
            }
        };

        if origin.forces_verification() && verification.verdict != SignatureVerdict::Verified {
            debug!(
                sequence = file.sequence_number,
                ?origin,
                "forcing signature verdict to verified"
            );
            verification.verdict = SignatureVerdict::Verified;
        }

        match verification.verdict {
            SignatureVerdict::Verified => {}
            SignatureVerdict::Revoked => {
                return Err(InstallError::CertificateExpired(format!(
                    "signature {} uses revoked key {}",
                    file.sequence_number, verification.fingerprint
                )));
            }
            SignatureVerdict::Invalid if file.sequence_number <= CRITICAL_SEQUENCE_THRESHOLD => {
                return Err(InstallError::SignatureInvalid(format!(
                    "signature {} in {} failed verification",
                    file.sequence_number,
                    signed_root.display()
                )));
            }
            SignatureVerdict::Invalid => {
                warn!(
                    sequence = file.sequence_number,
                    "ignoring invalid non-critical signature"
                );
                continue;
            }
        }

        let tier = if file.is_author {
            TrustTier::Unknown
        } else {
            verification.visibility
        };
        chain.push(ChainEntry {
            sequence_number: file.sequence_number,
            is_author_signature: file.is_author,
            visibility: tier,
        });
        certificates.push(CertificateInfo {
            sequence_number: file.sequence_number,
            is_author: file.is_author,
            fingerprint: verification.fingerprint,
            tier,
        });
    }

    let tier = effective_tier(&chain);
    debug!(%tier, signatures = chain.len(), "trust level evaluated");
    Ok(TrustEvaluation {
        tier,
        chain,
        certificates,
    })
}
