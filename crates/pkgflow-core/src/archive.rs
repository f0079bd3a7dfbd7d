use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageFormat {
    Directory,
    Zip,
    TarGz,
    Tar,
}

impl PackageFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Directory => "dir",
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
            Self::Tar => "tar",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "dir" | "directory" => Some(Self::Directory),
            "zip" | "wgt" => Some(Self::Zip),
            "tar.gz" | "tgz" => Some(Self::TarGz),
            "tar" => Some(Self::Tar),
            _ => None,
        }
    }

    /// Infers the format of a package source. Directories are already
    /// unpacked; files are classified by extension.
    pub fn infer_from_path(path: &Path) -> Option<Self> {
        if path.is_dir() {
            return Some(Self::Directory);
        }

        let lower = path.file_name()?.to_str()?.to_ascii_lowercase();
        if lower.ends_with(".wgt") || lower.ends_with(".zip") {
            return Some(Self::Zip);
        }
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            return Some(Self::TarGz);
        }
        if lower.ends_with(".tar") {
            return Some(Self::Tar);
        }

        None
    }
}
