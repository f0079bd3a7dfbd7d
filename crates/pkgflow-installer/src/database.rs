use anyhow::{anyhow, Context, Result};
use pkgflow_core::{StorageLocation, TrustTier};
use pkgflow_security::CertificateInfo;
use semver::Version;
use std::fs;
use std::io;
use std::path::PathBuf;

use crate::fs_utils::{remove_file_if_exists, write_atomically};
use crate::layout::{DeviceLayout, BACKUP_SUFFIX};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
    pub id: String,
    pub name: String,
    pub version: Version,
    pub tier: TrustTier,
    pub location: StorageLocation,
    pub root: PathBuf,
    pub start_file: String,
    pub icon: Option<String>,
    pub certificates: Vec<CertificateInfo>,
    pub installed_at_unix: u64,
}

pub fn backup_id(id: &str) -> String {
    format!("{id}{BACKUP_SUFFIX}")
}

pub fn write_record(layout: &DeviceLayout, id: &str, record: &PackageRecord) -> Result<PathBuf> {
    let mut payload = String::new();
    payload.push_str(&format!("id={}\n", record.id));
    payload.push_str(&format!("name={}\n", record.name));
    payload.push_str(&format!("version={}\n", record.version));
    payload.push_str(&format!("tier={}\n", record.tier.as_str()));
    payload.push_str(&format!("location={}\n", record.location.as_str()));
    payload.push_str(&format!("root={}\n", record.root.display()));
    payload.push_str(&format!("start_file={}\n", record.start_file));
    if let Some(icon) = &record.icon {
        payload.push_str(&format!("icon={}\n", icon));
    }
    for certificate in &record.certificates {
        payload.push_str(&format!(
            "certificate={}:{}:{}:{}\n",
            certificate.sequence_number,
            if certificate.is_author { "author" } else { "distributor" },
            certificate.fingerprint,
            certificate.tier.as_str()
        ));
    }
    payload.push_str(&format!("installed_at_unix={}\n", record.installed_at_unix));

    let path = layout.record_path(id);
    write_atomically(&path, payload.as_bytes())
        .with_context(|| format!("failed to write package record: {}", path.display()))?;
    Ok(path)
}

pub fn read_record(layout: &DeviceLayout, id: &str) -> Result<Option<PackageRecord>> {
    let path = layout.record_path(id);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read package record: {}", path.display()));
        }
    };
    let record = parse_record(&raw)
        .with_context(|| format!("failed to parse package record: {}", path.display()))?;
    Ok(Some(record))
}

pub fn remove_record(layout: &DeviceLayout, id: &str) -> Result<bool> {
    let path = layout.record_path(id);
    if !path.exists() {
        return Ok(false);
    }
    remove_file_if_exists(&path)
        .with_context(|| format!("failed to remove package record: {}", path.display()))?;
    Ok(true)
}

pub fn record_exists(layout: &DeviceLayout, id: &str) -> bool {
    layout.record_path(id).is_file()
}

pub fn list_records(layout: &DeviceLayout) -> Result<Vec<PackageRecord>> {
    let mut records = Vec::new();
    for id in list_record_ids(layout)? {
        if id.ends_with(BACKUP_SUFFIX) {
            continue;
        }
        if let Some(record) = read_record(layout, &id)? {
            records.push(record);
        }
    }
    records.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(records)
}

pub fn list_record_ids(layout: &DeviceLayout) -> Result<Vec<String>> {
    let dir = layout.installed_state_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut ids = Vec::new();
    for entry in fs::read_dir(&dir)
        .with_context(|| format!("failed to read package database: {}", dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|v| v.to_str()) != Some("receipt") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|v| v.to_str()) else {
            continue;
        };
        ids.push(stem.to_string());
    }
    ids.sort();
    Ok(ids)
}

pub(crate) fn parse_record(raw: &str) -> Result<PackageRecord> {
    let mut id = None;
    let mut name = None;
    let mut version = None;
    let mut tier = None;
    let mut location = None;
    let mut root = None;
    let mut start_file = None;
    let mut icon = None;
    let mut certificates = Vec::new();
    let mut installed_at_unix = None;

    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        match k {
            "id" => id = Some(v.to_string()),
            "name" => name = Some(v.to_string()),
            "version" => {
                version = Some(Version::parse(v).with_context(|| format!("invalid version: {v}"))?)
            }
            "tier" => {
                tier = Some(TrustTier::parse(v).ok_or_else(|| anyhow!("invalid tier: {v}"))?)
            }
            "location" => {
                location = Some(
                    StorageLocation::parse(v).ok_or_else(|| anyhow!("invalid location: {v}"))?,
                )
            }
            "root" => root = Some(PathBuf::from(v)),
            "start_file" => start_file = Some(v.to_string()),
            "icon" => icon = Some(v.to_string()),
            "certificate" => certificates.push(parse_certificate(v)?),
            "installed_at_unix" => {
                installed_at_unix = Some(v.parse().context("installed_at_unix must be u64")?)
            }
            _ => {}
        }
    }

    Ok(PackageRecord {
        id: id.context("missing id")?,
        name: name.context("missing name")?,
        version: version.context("missing version")?,
        tier: tier.unwrap_or(TrustTier::Unknown),
        location: location.unwrap_or_default(),
        root: root.context("missing root")?,
        start_file: start_file.context("missing start_file")?,
        icon,
        certificates,
        installed_at_unix: installed_at_unix.context("missing installed_at_unix")?,
    })
}

fn parse_certificate(value: &str) -> Result<CertificateInfo> {
    let mut parts = value.splitn(4, ':');
    let (Some(sequence), Some(role), Some(fingerprint), Some(tier)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(anyhow!("invalid certificate entry: {value}"));
    };
    let is_author = match role {
        "author" => true,
        "distributor" => false,
        _ => return Err(anyhow!("invalid certificate role: {role}")),
    };
    Ok(CertificateInfo {
        sequence_number: sequence
            .parse()
            .with_context(|| format!("invalid certificate sequence: {sequence}"))?,
        is_author,
        fingerprint: fingerprint.to_string(),
        tier: TrustTier::parse(tier).ok_or_else(|| anyhow!("invalid certificate tier: {tier}"))?,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginStatus {
    Installed,
    Waiting,
}

impl PluginStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::Waiting => "waiting",
        }
    }

    fn parse(value: &str) -> Result<Self> {
        match value {
            "installed" => Ok(Self::Installed),
            "waiting" => Ok(Self::Waiting),
            _ => Err(anyhow!("invalid plugin status: {value}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRecord {
    pub name: String,
    pub library: String,
    pub requires: Vec<String>,
    pub status: PluginStatus,
    pub source_dir: PathBuf,
}

pub fn write_plugin_record(layout: &DeviceLayout, record: &PluginRecord) -> Result<PathBuf> {
    let mut payload = String::new();
    payload.push_str(&format!("name={}\n", record.name));
    payload.push_str(&format!("library={}\n", record.library));
    for required in &record.requires {
        payload.push_str(&format!("requires={}\n", required));
    }
    payload.push_str(&format!("status={}\n", record.status.as_str()));
    payload.push_str(&format!("source_dir={}\n", record.source_dir.display()));

    let path = layout.plugin_record_path(&record.name);
    write_atomically(&path, payload.as_bytes())
        .with_context(|| format!("failed to write plugin record: {}", path.display()))?;
    Ok(path)
}

pub fn read_plugin_records(layout: &DeviceLayout) -> Result<Vec<PluginRecord>> {
    let dir = layout.plugin_state_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for entry in fs::read_dir(&dir)
        .with_context(|| format!("failed to read plugin database: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file()
            || path.extension().and_then(|v| v.to_str()) != Some("plugin")
        {
            continue;
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read plugin record: {}", path.display()))?;
        let record = parse_plugin_record(&raw)
            .with_context(|| format!("failed to parse plugin record: {}", path.display()))?;
        records.push(record);
    }
    records.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(records)
}

pub fn remove_plugin_record(layout: &DeviceLayout, name: &str) -> Result<()> {
    let path = layout.plugin_record_path(name);
    remove_file_if_exists(&path)
        .with_context(|| format!("failed to remove plugin record: {}", path.display()))
}

fn parse_plugin_record(raw: &str) -> Result<PluginRecord> {
    let mut name = None;
    let mut library = None;
    let mut requires = Vec::new();
    let mut status = None;
    let mut source_dir = None;

    for line in raw.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        match k {
            "name" => name = Some(v.to_string()),
            "library" => library = Some(v.to_string()),
            "requires" => requires.push(v.to_string()),
            "status" => status = Some(PluginStatus::parse(v)?),
            "source_dir" => source_dir = Some(PathBuf::from(v)),
            _ => {}
        }
    }

    Ok(PluginRecord {
        name: name.context("missing name")?,
        library: library.context("missing library")?,
        requires,
        status: status.context("missing status")?,
        source_dir: source_dir.context("missing source_dir")?,
    })
}
