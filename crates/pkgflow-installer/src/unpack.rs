use anyhow::{anyhow, Context, Result};
use pkgflow_core::PackageFormat;
use std::path::Path;
use std::process::Command;

use crate::collaborators::PackageUnpacker;
use crate::fs_utils::copy_dir_recursive;

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultUnpacker;

impl PackageUnpacker for DefaultUnpacker {
    fn unpack(&self, source: &Path, dest: &Path) -> Result<()> {
        let format = PackageFormat::infer_from_path(source).ok_or_else(|| {
            anyhow!(
                "unsupported package source '{}'; expected a directory, .wgt, .zip, .tar or .tar.gz",
                source.display()
            )
        })?;

        match format {
            PackageFormat::Directory => copy_dir_recursive(source, dest),
            PackageFormat::Zip => extract_zip(source, dest),
            PackageFormat::TarGz | PackageFormat::Tar => extract_tar(source, dest),
        }
    }
}

fn extract_tar(archive_path: &Path, dst: &Path) -> Result<()> {
    run_command(
        Command::new("tar")
            .arg("-xf")
            .arg(archive_path)
            .arg("-C")
            .arg(dst),
        "failed to extract tar package",
    )
}

fn extract_zip(archive_path: &Path, dst: &Path) -> Result<()> {
    let mut unzip_command = Command::new("unzip");
    unzip_command.arg("-q").arg(archive_path).arg("-d").arg(dst);
    if run_command(&mut unzip_command, "failed to extract package with unzip").is_ok() {
        return Ok(());
    }

    run_command(
        Command::new("tar")
            .arg("-xf")
            .arg(archive_path)
            .arg("-C")
            .arg(dst),
        "failed to extract package with tar fallback",
    )
}

fn run_command(command: &mut Command, context_message: &str) -> Result<()> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(anyhow!(
        "{context_message}: status={} stderr='{}'",
        output.status,
        stderr.trim()
    ))
}
