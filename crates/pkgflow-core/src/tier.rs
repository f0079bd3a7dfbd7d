use serde::{Deserialize, Serialize};

/// Installation privilege tier derived from a package's signature chain.
///
/// Variants are declared in ascending order so the derived `Ord` is the
/// privilege order: `Unknown < Public < Partner < Platform`.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum TrustTier {
    #[default]
    Unknown,
    Public,
    Partner,
    Platform,
}

impl TrustTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Public => "public",
            Self::Partner => "partner",
            Self::Platform => "platform",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "unknown" => Some(Self::Unknown),
            "public" => Some(Self::Public),
            "partner" => Some(Self::Partner),
            "platform" => Some(Self::Platform),
            _ => None,
        }
    }

    pub fn at_least(self, required: Self) -> bool {
        self >= required
    }
}

impl std::fmt::Display for TrustTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
