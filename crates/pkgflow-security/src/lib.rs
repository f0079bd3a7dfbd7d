mod digest;
mod ed25519;
mod privilege;
mod signature;
mod trust;
mod verify;

pub use digest::{content_digest, sha256_hex, sha256_hex_file};
pub use ed25519::{key_fingerprint, verify_ed25519_signature_hex};
pub use privilege::check_privilege_gates;
pub use signature::{
    find_signature_files, is_signature_file_name, SignatureDocument, SignatureFile,
    AUTHOR_SIGNATURE_FILE, LEGACY_SIGNATURE_DIR,
};
pub use trust::{effective_tier, evaluate_trust_level, CertificateInfo, ChainEntry, TrustEvaluation};
pub use verify::{SignatureVerdict, SignatureVerifier, TrustRoot, TrustStore, Verification};
