#![deny(missing_docs)]

//! Object stores hold opaque replica archives, addressed by a group (think of a bucket) and an
//! object id that is unique within the group.
//!
//! Every backend implements [`ObjectStore`]. Which one is used is a deployment decision, see
//! [`StoreRegistry`] for selecting a backend by name:
//!
//! * [`LocalStore`] keeps objects in a directory on local disk and moves files into place.
//! * [`MountableStore`] keeps objects on a mounted file system and copies files into place.
//! * [`SyncStore`] keeps objects in a directory watched by a sync agent and only ever publishes
//!   complete files.
//! * [`ContentStore`] talks to a remote content server over HTTP.

use std::path::Path;

mod content;
mod directory;
mod local;
mod mount;
mod registry;
mod sync;

pub use content::ContentStore;
pub use local::LocalStore;
pub use mount::MountableStore;
pub use registry::{StoreConstructor, StoreOptions, StoreRegistry};
pub use sync::SyncStore;

/// The name of the attribute holding the hex encoded MD5 checksum of an object.
pub const CHECKSUM_ATTRIBUTE: &str = "checksum";

/// The name of the attribute holding the size of an object in bytes.
pub const SIZE_ATTRIBUTE: &str = "sizebytes";

/// The name of the attribute holding the last modification time of an object in milliseconds since
/// the Unix epoch.
pub const MODIFIED_ATTRIBUTE: &str = "modified";

/// An error that can occur while talking to an object store.
#[derive(Debug, thiserror::Error)]
#[allow(missing_docs)]
pub enum StoreError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    HttpError(#[from] reqwest::Error),

    #[error("{method} {url} failed with status {status}")]
    UnexpectedStatus {
        method: reqwest::Method,
        url: url::Url,
        status: reqwest::StatusCode,
    },

    #[error("authentication with {0} failed")]
    AuthenticationFailed(url::Url),

    #[error("the '{store}' store is misconfigured: {reason}")]
    Misconfigured { store: String, reason: String },

    #[error("'{0}' is not a known object store")]
    UnknownStore(String),

    #[error("'{0}' is not a valid object name")]
    InvalidName(String),

    #[error("the server stored '{id}' with checksum {actual} but {expected} was sent")]
    ChecksumMismatch {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("failed to upload '{id}' after {attempts} attempts")]
    RetriesExhausted {
        id: String,
        attempts: u32,
        #[source]
        source: Box<StoreError>,
    },
}

/// A place where replica archives are kept.
///
/// Operations that transfer data report the number of bytes they moved; `0` means nothing
/// happened, either because the object was absent or because the store already held identical
/// content. Errors are reserved for failures of the store itself.
pub trait ObjectStore: std::fmt::Debug + Send + Sync {
    /// Prepares the store for use, e.g. creates directories or verifies credentials. Must be called
    /// once before any other operation.
    fn init(&mut self) -> Result<(), StoreError>;

    /// Returns true if the store holds an object `id` in `group`.
    fn object_exists(&self, group: &str, id: &str) -> Result<bool, StoreError>;

    /// Returns the value of the attribute `name` of an object, or `None` if either the object or
    /// the attribute is unknown. See [`CHECKSUM_ATTRIBUTE`], [`SIZE_ATTRIBUTE`] and
    /// [`MODIFIED_ATTRIBUTE`] for the attributes every store provides.
    fn object_attribute(&self, group: &str, id: &str, name: &str)
        -> Result<Option<String>, StoreError>;

    /// Copies the object to the file `destination` and returns the number of bytes written, or
    /// `0` without touching `destination` if the object does not exist.
    fn fetch_object(&self, group: &str, id: &str, destination: &Path) -> Result<u64, StoreError>;

    /// Stores the file `source` in `group`, using its file name as the object id. Returns the
    /// number of bytes uploaded.
    fn transfer_object(&self, group: &str, source: &Path) -> Result<u64, StoreError>;

    /// Deletes an object and returns the number of bytes it held, `0` if it did not exist.
    fn remove_object(&self, group: &str, id: &str) -> Result<u64, StoreError>;

    /// Moves an object from `source_group` to `destination_group` and returns the number of bytes
    /// moved, `0` if there was nothing to move.
    fn move_object(
        &self,
        source_group: &str,
        destination_group: &str,
        id: &str,
    ) -> Result<u64, StoreError>;
}

impl<S: ObjectStore + ?Sized> ObjectStore for Box<S> {
    fn init(&mut self) -> Result<(), StoreError> {
        (**self).init()
    }

    fn object_exists(&self, group: &str, id: &str) -> Result<bool, StoreError> {
        (**self).object_exists(group, id)
    }

    fn object_attribute(
        &self,
        group: &str,
        id: &str,
        name: &str,
    ) -> Result<Option<String>, StoreError> {
        (**self).object_attribute(group, id, name)
    }

    fn fetch_object(&self, group: &str, id: &str, destination: &Path) -> Result<u64, StoreError> {
        (**self).fetch_object(group, id, destination)
    }

    fn transfer_object(&self, group: &str, source: &Path) -> Result<u64, StoreError> {
        (**self).transfer_object(group, source)
    }

    fn remove_object(&self, group: &str, id: &str) -> Result<u64, StoreError> {
        (**self).remove_object(group, id)
    }

    fn move_object(
        &self,
        source_group: &str,
        destination_group: &str,
        id: &str,
    ) -> Result<u64, StoreError> {
        (**self).move_object(source_group, destination_group, id)
    }
}

/// Returns the object id under which `source` is stored: its file name.
pub(crate) fn object_id(source: &Path) -> Result<String, StoreError> {
    source
        .file_name()
        .and_then(|name| name.to_str())
        .map(ToString::to_string)
        .ok_or_else(|| StoreError::InvalidName(source.display().to_string()))
}
