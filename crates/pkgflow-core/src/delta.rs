use std::path::{Component, Path};

use anyhow::{anyhow, Result};

/// File name of the delta manifest shipped at the root of an RDS package.
pub const DELTA_MANIFEST_FILE: &str = ".rds_delta";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaSection {
    Add,
    Delete,
    Modify,
}

impl DeltaSection {
    pub fn header(self) -> &'static str {
        match self {
            Self::Add => "#add",
            Self::Delete => "#delete",
            Self::Modify => "#modify",
        }
    }

    fn parse_header(line: &str) -> Option<Self> {
        match line {
            "#add" => Some(Self::Add),
            "#delete" => Some(Self::Delete),
            "#modify" => Some(Self::Modify),
            _ => None,
        }
    }
}

/// Relative paths an incremental update adds, deletes and modifies, in the
/// order they appear in the manifest file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaManifest {
    pub add: Vec<String>,
    pub delete: Vec<String>,
    pub modify: Vec<String>,
}

impl DeltaManifest {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut manifest = Self::default();
        let mut section = None;

        for (line_no, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if line.starts_with('#') {
                section = Some(DeltaSection::parse_header(line).ok_or_else(|| {
                    anyhow!("unknown delta section '{}' line={}", line, line_no + 1)
                })?);
                continue;
            }

            let Some(current) = section else {
                return Err(anyhow!(
                    "delta entry before any section header line={}",
                    line_no + 1
                ));
            };
            validate_entry(line)
                .map_err(|err| anyhow!("{err} line={}", line_no + 1))?;
            let entries = manifest.entries_mut(current);
            if entries.iter().any(|entry| entry == line) {
                return Err(anyhow!(
                    "delta entry '{}' is listed twice line={}",
                    line,
                    line_no + 1
                ));
            }
            entries.push(line.to_string());
        }

        for section in [DeltaSection::Add, DeltaSection::Delete, DeltaSection::Modify] {
            for entry in manifest.entries(section) {
                let clashes = [DeltaSection::Add, DeltaSection::Delete, DeltaSection::Modify]
                    .into_iter()
                    .filter(|other| *other != section)
                    .any(|other| manifest.entries(other).contains(entry));
                if clashes {
                    return Err(anyhow!(
                        "delta entry '{}' appears in more than one section",
                        entry
                    ));
                }
            }
        }

        Ok(manifest)
    }

    pub fn entries(&self, section: DeltaSection) -> &[String] {
        match section {
            DeltaSection::Add => &self.add,
            DeltaSection::Delete => &self.delete,
            DeltaSection::Modify => &self.modify,
        }
    }

    fn entries_mut(&mut self, section: DeltaSection) -> &mut Vec<String> {
        match section {
            DeltaSection::Add => &mut self.add,
            DeltaSection::Delete => &mut self.delete,
            DeltaSection::Modify => &mut self.modify,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.delete.is_empty() && self.modify.is_empty()
    }

    pub fn to_manifest_string(&self) -> String {
        let mut out = String::new();
        for section in [DeltaSection::Add, DeltaSection::Delete, DeltaSection::Modify] {
            out.push_str(section.header());
            out.push('\n');
            for entry in self.entries(section) {
                out.push_str(entry);
                out.push('\n');
            }
        }
        out
    }
}

fn validate_entry(entry: &str) -> Result<()> {
    let path = Path::new(entry);
    if path.is_absolute() {
        return Err(anyhow!("delta entry must be relative: {entry}"));
    }
    if path
        .components()
        .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir))
    {
        return Err(anyhow!("delta entry must not escape the package root: {entry}"));
    }
    if path.file_name().and_then(|name| name.to_str()) == Some(DELTA_MANIFEST_FILE) {
        return Err(anyhow!("delta entry must not name the delta manifest itself"));
    }
    Ok(())
}
