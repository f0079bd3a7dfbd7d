use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const AUTHOR_SIGNATURE_FILE: &str = "author-signature.toml";

/// Older packages keep their signatures next to the web sources instead of
/// the package root.
pub const LEGACY_SIGNATURE_DIR: &str = "res/wgt";

/// A signature file found in a package, ordered by sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureFile {
    pub path: PathBuf,
    pub sequence_number: u32,
    pub is_author: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignatureDocument {
    pub public_key: String,
    pub signature: String,
}

impl SignatureDocument {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).context("failed to parse signature document")
    }

    pub fn read(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read signature {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid signature {}", path.display()))
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).context("failed to serialize signature document")
    }
}

pub fn is_signature_file_name(name: &str) -> bool {
    parse_signature_file_name(name).is_some()
}

/// Returns `(sequence_number, is_author)` for `author-signature.toml` (0) and
/// `signature<N>.toml` with `N >= 1`.
fn parse_signature_file_name(name: &str) -> Option<(u32, bool)> {
    if name == AUTHOR_SIGNATURE_FILE {
        return Some((0, true));
    }
    let number = name.strip_prefix("signature")?.strip_suffix(".toml")?;
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let sequence_number = number.parse::<u32>().ok()?;
    (sequence_number >= 1).then_some((sequence_number, false))
}

/// Locates signature files in the package root, falling back to the legacy
/// source directory. Returns the directory the signatures were found in (the
/// signed content root) and the files ordered from highest sequence number to
/// lowest.
pub fn find_signature_files(package_root: &Path) -> Result<(PathBuf, Vec<SignatureFile>)> {
    let found = scan_dir(package_root)?;
    if !found.is_empty() {
        return Ok((package_root.to_path_buf(), found));
    }

    let legacy = package_root.join(LEGACY_SIGNATURE_DIR);
    if legacy.is_dir() {
        let found = scan_dir(&legacy)?;
        if !found.is_empty() {
            return Ok((legacy, found));
        }
    }

    Ok((package_root.to_path_buf(), Vec::new()))
}

fn scan_dir(dir: &Path) -> Result<Vec<SignatureFile>> {
    let mut files = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let Some((sequence_number, is_author)) = parse_signature_file_name(&name) else {
            continue;
        };
        files.push(SignatureFile {
            path: entry.path(),
            sequence_number,
            is_author,
        });
    }

    files.sort_by(|a, b| b.sequence_number.cmp(&a.sequence_number));
    Ok(files)
}
