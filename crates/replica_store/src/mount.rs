use std::path::{Path, PathBuf};

use fs_err as fs;

use crate::directory::DirectoryLayout;
use crate::{object_id, ObjectStore, StoreError};

/// An object store on a mounted file system, e.g. a network share.
///
/// Unlike [`crate::LocalStore`] transfers copy the source and leave it in place, the mount may be
/// slow or shared and the caller decides what happens to its staging area.
#[derive(Debug, Clone)]
pub struct MountableStore {
    layout: DirectoryLayout,
}

impl MountableStore {
    /// Constructs a store for the mount point `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            layout: DirectoryLayout::new(root),
        }
    }
}

impl ObjectStore for MountableStore {
    fn init(&mut self) -> Result<(), StoreError> {
        if !self.layout.root().is_dir() {
            return Err(StoreError::Misconfigured {
                store: "mount".to_string(),
                reason: format!("'{}' is not a mounted directory", self.layout.root().display()),
            });
        }
        Ok(())
    }

    fn object_exists(&self, group: &str, id: &str) -> Result<bool, StoreError> {
        Ok(self.layout.existing_object(group, id)?.is_some())
    }

    fn object_attribute(
        &self,
        group: &str,
        id: &str,
        name: &str,
    ) -> Result<Option<String>, StoreError> {
        self.layout.attribute(group, id, name)
    }

    fn fetch_object(&self, group: &str, id: &str, destination: &Path) -> Result<u64, StoreError> {
        self.layout.fetch(group, id, destination)
    }

    fn transfer_object(&self, group: &str, source: &Path) -> Result<u64, StoreError> {
        let id = object_id(source)?;
        let target = self.layout.prepare_target(group, &id)?;
        Ok(fs::copy(source, target)?)
    }

    fn remove_object(&self, group: &str, id: &str) -> Result<u64, StoreError> {
        self.layout.remove(group, id)
    }

    fn move_object(
        &self,
        source_group: &str,
        destination_group: &str,
        id: &str,
    ) -> Result<u64, StoreError> {
        self.layout.rename(source_group, destination_group, id)
    }
}
