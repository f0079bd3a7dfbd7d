use anyhow::{anyhow, Context, Result};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::digest::sha256_hex;

fn decode_fixed<const N: usize>(value_hex: &str, what: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(value_hex.trim())
        .with_context(|| format!("failed to decode Ed25519 {what} hex"))?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| anyhow!("invalid Ed25519 {what} length: expected {N} bytes, got {len}"))
}

/// Checks `signature_hex` over `payload`. Malformed hex or key material is an
/// error; a well-formed signature that does not match is `Ok(false)`.
pub fn verify_ed25519_signature_hex(
    payload: &[u8],
    public_key_hex: &str,
    signature_hex: &str,
) -> Result<bool> {
    let key_bytes = decode_fixed::<32>(public_key_hex, "public key")?;
    let signature_bytes = decode_fixed::<64>(signature_hex, "signature")?;

    let verifying_key =
        VerifyingKey::from_bytes(&key_bytes).context("invalid Ed25519 public key bytes")?;
    let signature = Signature::from_bytes(&signature_bytes);

    Ok(verifying_key.verify(payload, &signature).is_ok())
}

/// Short stable identifier of a public key, used in certificate lists.
pub fn key_fingerprint(public_key_hex: &str) -> String {
    let normalized = public_key_hex.trim().to_ascii_lowercase();
    let mut digest = sha256_hex(normalized.as_bytes());
    digest.truncate(16);
    digest
}
