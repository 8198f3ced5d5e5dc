use std::path::{Path, PathBuf};

use fs_err as fs;

use crate::directory::{same_content, DirectoryLayout};
use crate::{object_id, ObjectStore, StoreError};

/// The prefix of partially written objects. Sync agents are expected to ignore hidden files.
const PARTIAL_PREFIX: &str = ".partial-";

/// An object store in a directory that an external agent synchronizes with remote storage.
///
/// The agent may pick up a file the moment it appears, so objects are first written to a hidden
/// temporary file in the target group and then renamed into place. A half written object is never
/// visible under its final name.
#[derive(Debug, Clone)]
pub struct SyncStore {
    layout: DirectoryLayout,
}

impl SyncStore {
    /// Constructs a store for the synchronized directory `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            layout: DirectoryLayout::new(root),
        }
    }

    /// Writes the content of `source` to `target` through a temporary sibling.
    fn publish(&self, source: &Path, target: &Path) -> Result<u64, StoreError> {
        let parent = target.parent().unwrap_or(self.layout.root());
        let mut partial = tempfile::Builder::new()
            .prefix(PARTIAL_PREFIX)
            .tempfile_in(parent)?;
        let size = std::io::copy(&mut fs::File::open(source)?, &mut partial)?;
        partial.as_file().sync_all()?;
        partial.persist(target).map_err(|err| err.error)?;
        Ok(size)
    }
}

impl ObjectStore for SyncStore {
    fn init(&mut self) -> Result<(), StoreError> {
        self.layout.create_root()
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
        // Rewriting an unchanged file would make the agent upload it again.
        if same_content(source, &target)? {
            tracing::debug!("'{id}' is unchanged in group '{group}', skipping transfer");
            return Ok(0);
        }
        self.publish(source, &target)
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
