use std::fmt::{Display, Formatter};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Describes the single file serialization of a bag. This can be derived from the file extension
/// of an archive.
#[derive(
    Copy, Clone, Debug, Default, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveFormat {
    /// A deflate compressed `.zip` file.
    #[default]
    Zip,

    /// A gzip compressed tarball with the `.tgz` extension.
    #[serde(alias = "tar.gz")]
    Tgz,
}

impl ArchiveFormat {
    /// Tries to determine the format of an archive from its filename.
    pub fn try_from_path(path: impl AsRef<Path>) -> Option<ArchiveFormat> {
        Self::split_str(path.as_ref().to_string_lossy().as_ref()).map(|(_, format)| format)
    }

    /// Returns the file extension for this format, without the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tgz => "tgz",
        }
    }

    /// Split the given string into its filename and format, removing the extension.
    pub fn split_str(path: &str) -> Option<(&str, ArchiveFormat)> {
        if let Some(path) = path.strip_suffix(".zip") {
            Some((path, ArchiveFormat::Zip))
        } else if let Some(path) = path.strip_suffix(".tgz") {
            Some((path, ArchiveFormat::Tgz))
        } else {
            None
        }
    }
}

impl Display for ArchiveFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ArchiveFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "zip" => Ok(ArchiveFormat::Zip),
            "tgz" | "tar.gz" => Ok(ArchiveFormat::Tgz),
            other => Err(format!("unknown archive format '{other}'")),
        }
    }
}
