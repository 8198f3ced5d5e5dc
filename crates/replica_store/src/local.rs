use std::path::{Path, PathBuf};

use fs_err as fs;

use crate::directory::{same_content, DirectoryLayout};
use crate::{object_id, ObjectStore, StoreError};

/// An object store in a directory on local disk.
///
/// Transfers move the source file into the store: the staged archive is consumed. Transferring a
/// file whose content is already stored under the same id is a no-op that reports `0` bytes.
#[derive(Debug, Clone)]
pub struct LocalStore {
    layout: DirectoryLayout,
}

impl LocalStore {
    /// Constructs a store rooted at `root`. The directory is created by [`ObjectStore::init`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            layout: DirectoryLayout::new(root),
        }
    }

    /// The directory that holds the groups of this store.
    pub fn root(&self) -> &Path {
        self.layout.root()
    }
}

impl ObjectStore for LocalStore {
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
        if same_content(source, &target)? {
            tracing::debug!("'{id}' is unchanged in group '{group}', skipping transfer");
            fs::remove_file(source)?;
            return Ok(0);
        }

        let size = fs::metadata(source)?.len();
        if let Err(err) = fs::rename(source, &target) {
            // Staging and store may live on different file systems.
            tracing::debug!("{err}, falling back to copying");
            fs::copy(source, &target)?;
            fs::remove_file(source)?;
        }
        Ok(size)
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

#[cfg(test)]
mod test {
    use super::LocalStore;
    use crate::{ObjectStore, CHECKSUM_ATTRIBUTE};

    fn staged(dir: &std::path::Path, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_transfer_moves_file() {
        let temp = tempfile::tempdir().unwrap();
        let mut store = LocalStore::new(temp.path().join("store"));
        store.init().unwrap();

        let source = staged(temp.path(), "item@1-2.zip", b"1234567890");
        assert_eq!(store.transfer_object("aip", &source).unwrap(), 10);
        assert!(!source.exists());
        assert!(store.object_exists("aip", "item@1-2.zip").unwrap());
        assert_eq!(
            store
                .object_attribute("aip", "item@1-2.zip", CHECKSUM_ATTRIBUTE)
                .unwrap()
                .as_deref(),
            Some("e807f1fcf82d132f9bb018ca6738a19f")
        );
    }

    #[test]
    fn test_transfer_identical_content_is_skipped() {
        let temp = tempfile::tempdir().unwrap();
        let mut store = LocalStore::new(temp.path().join("store"));
        store.init().unwrap();

        let source = staged(temp.path(), "obj", b"abc");
        assert_eq!(store.transfer_object("aip", &source).unwrap(), 3);
        let source = staged(temp.path(), "obj", b"abc");
        assert_eq!(store.transfer_object("aip", &source).unwrap(), 0);
        let source = staged(temp.path(), "obj", b"abcd");
        assert_eq!(store.transfer_object("aip", &source).unwrap(), 4);
    }

    #[test]
    fn test_move_and_remove() {
        let temp = tempfile::tempdir().unwrap();
        let mut store = LocalStore::new(temp.path().join("store"));
        store.init().unwrap();
        let source = staged(temp.path(), "obj", b"abc");
        store.transfer_object("aip", &source).unwrap();

        assert_eq!(store.move_object("aip", "trash", "obj").unwrap(), 3);
        assert!(!store.object_exists("aip", "obj").unwrap());
        assert!(store.object_exists("trash", "obj").unwrap());
        assert_eq!(store.move_object("aip", "trash", "obj").unwrap(), 0);

        let fetched = temp.path().join("fetched").join("obj");
        assert_eq!(store.fetch_object("trash", "obj", &fetched).unwrap(), 3);
        assert_eq!(std::fs::read(&fetched).unwrap(), b"abc");

        assert_eq!(store.remove_object("trash", "obj").unwrap(), 3);
        assert_eq!(store.remove_object("trash", "obj").unwrap(), 0);
    }
}
