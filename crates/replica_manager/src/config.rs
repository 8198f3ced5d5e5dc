//! Configuration of the replica manager, usually read from a TOML file.

use std::path::{Path, PathBuf};

use fs_err as fs;
use replica_bag::ArchiveFormat;
use replica_store::StoreOptions;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The name of the odometer file inside the base directory, unless configured otherwise.
pub const DEFAULT_ODOMETER_FILE: &str = "odometer";

/// A configuration that parsed but can not be used.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Missing required field.
    #[error("Missing required field: {0}")]
    MissingRequiredField(String),

    /// Invalid value for a field.
    #[error("Invalid value for field {0}: {1}")]
    InvalidValue(String, String),
}

/// An error that occurred while loading a configuration.
#[derive(Error, Debug)]
pub enum LoadError {
    /// IO error while reading configuration file.
    #[error("IO error while reading configuration file: {0}")]
    IoError(#[from] std::io::Error),

    /// Error parsing configuration file.
    #[error("Error parsing configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Error validating configuration.
    #[error("Error validating configuration: {0}")]
    ValidationError(#[from] ValidationError),
}

/// The store groups the manager uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GroupsConfig {
    /// The group that holds archival packages.
    #[serde(default = "default_aip_group")]
    pub aip: String,

    /// The group that holds deletion catalogs and the packages of deleted objects.
    #[serde(default = "default_delete_group")]
    pub delete: String,
}

fn default_aip_group() -> String {
    "aip_store".to_string()
}

fn default_delete_group() -> String {
    "aip_delete".to_string()
}

impl Default for GroupsConfig {
    fn default() -> Self {
        Self {
            aip: default_aip_group(),
            delete: default_delete_group(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// The configuration of a [`crate::ReplicaManager`].
///
/// ```toml
/// base-dir = "/var/replicate"
/// store = "local"
/// archive-format = "zip"
///
/// [store-options]
/// root = "/mnt/replica"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ReplicaConfig {
    /// The local directory below which objects are staged.
    pub base_dir: PathBuf,

    /// The name of the object store backend, see [`replica_store::StoreRegistry`].
    pub store: String,

    /// Whether storage ids carry a `TYPE@` prefix.
    #[serde(default = "default_true")]
    pub prefix_types: bool,

    /// The format archives are written in.
    #[serde(default)]
    pub archive_format: ArchiveFormat,

    /// The names of the store groups.
    #[serde(default)]
    pub groups: GroupsConfig,

    /// Passed to the object store backend.
    #[serde(default)]
    pub store_options: StoreOptions,

    /// Where the odometer is kept. Defaults to `odometer` in the base directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub odometer_file: Option<PathBuf>,
}

impl ReplicaConfig {
    /// Constructs a configuration with default settings for everything but the base directory and
    /// the store backend.
    pub fn new(base_dir: impl Into<PathBuf>, store: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            store: store.into(),
            prefix_types: true,
            archive_format: ArchiveFormat::default(),
            groups: GroupsConfig::default(),
            store_options: StoreOptions::default(),
            odometer_file: None,
        }
    }

    /// Parses and validates a configuration from TOML.
    pub fn from_toml_str(contents: &str) -> Result<Self, LoadError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates the configuration file at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let contents = fs::read_to_string(path.as_ref())?;
        let config = Self::from_toml_str(&contents)?;
        tracing::debug!("loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.base_dir.as_os_str().is_empty() {
            return Err(ValidationError::MissingRequiredField("base-dir".to_string()));
        }
        if self.store.trim().is_empty() {
            return Err(ValidationError::MissingRequiredField("store".to_string()));
        }
        for (field, group) in [
            ("groups.aip", &self.groups.aip),
            ("groups.delete", &self.groups.delete),
        ] {
            if group.is_empty() || group.contains('/') {
                return Err(ValidationError::InvalidValue(
                    field.to_string(),
                    format!("'{group}' is not a valid group name"),
                ));
            }
        }
        if self.groups.aip == self.groups.delete {
            return Err(ValidationError::InvalidValue(
                "groups.delete".to_string(),
                "must differ from groups.aip".to_string(),
            ));
        }
        Ok(())
    }

    /// The path of the odometer file.
    pub fn odometer_path(&self) -> PathBuf {
        self.odometer_file
            .clone()
            .unwrap_or_else(|| self.base_dir.join(DEFAULT_ODOMETER_FILE))
    }
}

#[cfg(test)]
mod test {
    use super::{LoadError, ReplicaConfig, ValidationError};
    use assert_matches::assert_matches;
    use replica_bag::ArchiveFormat;
    use std::path::PathBuf;

    #[test]
    fn test_minimal() {
        let config = ReplicaConfig::from_toml_str(
            r#"
            base-dir = "/var/replicate"
            store = "local"

            [store-options]
            root = "/mnt/replica"
            "#,
        )
        .unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/var/replicate"));
        assert!(config.prefix_types);
        assert_eq!(config.archive_format, ArchiveFormat::Zip);
        assert_eq!(config.groups.aip, "aip_store");
        assert_eq!(config.groups.delete, "aip_delete");
        assert_eq!(config.store_options.root, Some(PathBuf::from("/mnt/replica")));
        assert_eq!(
            config.odometer_path(),
            PathBuf::from("/var/replicate").join("odometer")
        );
    }

    #[test]
    fn test_full() {
        let config = ReplicaConfig::from_toml_str(
            r#"
            base-dir = "/var/replicate"
            store = "content"
            prefix-types = false
            archive-format = "tgz"
            odometer-file = "/var/lib/replica/odometer"

            [groups]
            aip = "aips"
            delete = "trash"

            [store-options]
            url = "https://content.example.org/store/"
            username = "replica"
            password = "secret"
            max-retries = 5
            "#,
        )
        .unwrap();
        assert!(!config.prefix_types);
        assert_eq!(config.archive_format, ArchiveFormat::Tgz);
        assert_eq!(config.groups.delete, "trash");
        assert_eq!(config.store_options.max_retries, Some(5));
        assert_eq!(
            config.odometer_path(),
            PathBuf::from("/var/lib/replica/odometer")
        );
    }

    #[test]
    fn test_invalid() {
        assert_matches!(
            ReplicaConfig::from_toml_str("store = \"local\""),
            Err(LoadError::ParseError(_))
        );
        assert_matches!(
            ReplicaConfig::from_toml_str("base-dir = \"/tmp\"\nstore = \"\""),
            Err(LoadError::ValidationError(ValidationError::MissingRequiredField(field)))
                if field == "store"
        );

        let mut config = ReplicaConfig::new("/tmp", "local");
        config.groups.delete = config.groups.aip.clone();
        assert_matches!(config.validate(), Err(ValidationError::InvalidValue(..)));
    }

    #[test]
    fn test_from_path() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("replica.toml");
        std::fs::write(&path, "base-dir = \"/tmp\"\nstore = \"sync\"\n").unwrap();
        assert_eq!(
            ReplicaConfig::from_path(&path).unwrap(),
            ReplicaConfig::new("/tmp", "sync")
        );
        assert_matches!(
            ReplicaConfig::from_path(temp.path().join("missing.toml")),
            Err(LoadError::IoError(_))
        );
    }
}
