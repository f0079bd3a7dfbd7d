use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::layout::PackagePaths;

/// Writes `bin/<id>`, a shell launcher that execs the package start file.
pub fn write_launcher(
    paths: &PackagePaths,
    package_id: &str,
    label: &str,
    start_file: &str,
) -> Result<PathBuf> {
    let launcher_path = paths.launcher_path(package_id);
    if let Some(parent) = launcher_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create launcher dir: {}", parent.display()))?;
    }

    let target = paths.src_dir().join(start_file);
    fs::write(&launcher_path, render_launcher(label, &target).as_bytes())
        .with_context(|| format!("failed writing launcher: {}", launcher_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut permissions = fs::metadata(&launcher_path)
            .with_context(|| format!("failed to inspect launcher: {}", launcher_path.display()))?
            .permissions();
        permissions.set_mode(0o755);
        fs::set_permissions(&launcher_path, permissions).with_context(|| {
            format!(
                "failed setting launcher permissions: {}",
                launcher_path.display()
            )
        })?;
    }

    Ok(launcher_path)
}

pub(crate) fn render_launcher(label: &str, target: &Path) -> String {
    let label: String = label.chars().filter(|c| !c.is_control()).collect();
    format!(
        "#!/bin/sh\n# {}\nexec \"{}\" \"$@\"\n",
        label.trim(),
        target.display()
    )
}
