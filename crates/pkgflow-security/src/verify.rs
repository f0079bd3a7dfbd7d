use std::collections::{BTreeMap, BTreeSet};

use pkgflow_core::TrustTier;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ed25519::{key_fingerprint, verify_ed25519_signature_hex};
use crate::signature::SignatureDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureVerdict {
    Verified,
    Invalid,
    Revoked,
}

/// Verdict for one signature document plus the visibility of the root that
/// issued its key. Visibility is reported even for invalid signatures; the
/// caller decides whether to use it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub verdict: SignatureVerdict,
    pub visibility: TrustTier,
    pub fingerprint: String,
}

/// Cryptographic verification collaborator. The evaluator never inspects key
/// material itself; it only consumes the verdict.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, document: &SignatureDocument, is_author: bool, payload: &[u8])
        -> Verification;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrustRoot {
    pub public_key: String,
    pub tier: TrustTier,
}

/// Ed25519 verifier backed by a set of trusted distributor keys, each tagged
/// with the tier it grants, and a revocation list.
#[derive(Debug, Clone, Default)]
pub struct TrustStore {
    roots: BTreeMap<String, TrustTier>,
    revoked: BTreeSet<String>,
}

impl TrustStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_roots(roots: &[TrustRoot], revoked: &[String]) -> Self {
        let mut store = Self::new();
        for root in roots {
            store.add_root(&root.public_key, root.tier);
        }
        for key in revoked {
            store.revoke(key);
        }
        store
    }

    pub fn with_root(mut self, public_key_hex: &str, tier: TrustTier) -> Self {
        self.add_root(public_key_hex, tier);
        self
    }

    pub fn add_root(&mut self, public_key_hex: &str, tier: TrustTier) {
        self.roots.insert(normalize_key(public_key_hex), tier);
    }

    pub fn revoke(&mut self, public_key_hex: &str) {
        self.revoked.insert(normalize_key(public_key_hex));
    }

    pub fn root_count(&self) -> usize {
        self.roots.len()
    }
}

impl SignatureVerifier for TrustStore {
    fn verify(
        &self,
        document: &SignatureDocument,
        is_author: bool,
        payload: &[u8],
    ) -> Verification {
        let key = normalize_key(&document.public_key);
        let fingerprint = key_fingerprint(&key);
        let visibility = if is_author {
            TrustTier::Unknown
        } else {
            self.roots.get(&key).copied().unwrap_or(TrustTier::Unknown)
        };
        let outcome = |verdict| Verification {
            verdict,
            visibility,
            fingerprint: fingerprint.clone(),
        };

        if self.revoked.contains(&key) {
            return outcome(SignatureVerdict::Revoked);
        }

        match verify_ed25519_signature_hex(payload, &key, &document.signature) {
            Ok(true) => {}
            Ok(false) => return outcome(SignatureVerdict::Invalid),
            Err(err) => {
                debug!(fingerprint = %fingerprint, "malformed signature material: {err:#}");
                return outcome(SignatureVerdict::Invalid);
            }
        }

        if !is_author && !self.roots.contains_key(&key) {
            debug!(fingerprint = %fingerprint, "distributor key has no trusted root");
            return outcome(SignatureVerdict::Invalid);
        }

        outcome(SignatureVerdict::Verified)
    }
}

fn normalize_key(public_key_hex: &str) -> String {
    public_key_hex.trim().to_ascii_lowercase()
}
