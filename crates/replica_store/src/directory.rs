//! The on-disk layout shared by the file system backed stores: every group is a directory below
//! the root and every object is a file in its group, `<root>/<group>/<id>`.

use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use fs_err as fs;

use crate::{StoreError, CHECKSUM_ATTRIBUTE, MODIFIED_ATTRIBUTE, SIZE_ATTRIBUTE};

#[derive(Debug, Clone)]
pub(crate) struct DirectoryLayout {
    root: PathBuf,
}

/// Group and object names must be a single plain path component.
fn validate_name(name: &str) -> Result<&str, StoreError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name => Ok(name),
        _ => Err(StoreError::InvalidName(name.to_string())),
    }
}

impl DirectoryLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn create_root(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn group_dir(&self, group: &str) -> Result<PathBuf, StoreError> {
        Ok(self.root.join(validate_name(group)?))
    }

    pub fn object_path(&self, group: &str, id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.group_dir(group)?.join(validate_name(id)?))
    }

    /// Returns the path of the object if it exists as a regular file.
    pub fn existing_object(&self, group: &str, id: &str) -> Result<Option<PathBuf>, StoreError> {
        let path = self.object_path(group, id)?;
        Ok(path.is_file().then_some(path))
    }

    pub fn attribute(
        &self,
        group: &str,
        id: &str,
        name: &str,
    ) -> Result<Option<String>, StoreError> {
        let Some(path) = self.existing_object(group, id)? else {
            return Ok(None);
        };
        let value = match name {
            CHECKSUM_ATTRIBUTE => Some(replica_digest::compute_file_md5_hex(&path)?),
            SIZE_ATTRIBUTE => Some(fs::metadata(&path)?.len().to_string()),
            MODIFIED_ATTRIBUTE => {
                let modified = fs::metadata(&path)?.modified()?;
                let millis = modified
                    .duration_since(UNIX_EPOCH)
                    .map_or(0, |duration| duration.as_millis());
                Some(millis.to_string())
            }
            _ => None,
        };
        Ok(value)
    }

    /// Copies the object to `destination`, creating its parent directory if needed.
    pub fn fetch(&self, group: &str, id: &str, destination: &Path) -> Result<u64, StoreError> {
        let Some(path) = self.existing_object(group, id)? else {
            return Ok(0);
        };
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(fs::copy(&path, destination)?)
    }

    pub fn remove(&self, group: &str, id: &str) -> Result<u64, StoreError> {
        let Some(path) = self.existing_object(group, id)? else {
            return Ok(0);
        };
        let size = fs::metadata(&path)?.len();
        fs::remove_file(&path)?;
        Ok(size)
    }

    /// Prepares the target of a transfer: returns its path and creates the group directory.
    pub fn prepare_target(&self, group: &str, id: &str) -> Result<PathBuf, StoreError> {
        let target = self.object_path(group, id)?;
        fs::create_dir_all(self.group_dir(group)?)?;
        Ok(target)
    }

    /// Moves an object between groups with a rename. Both groups live below the same root, so the
    /// rename never crosses a file system boundary.
    pub fn rename(
        &self,
        source_group: &str,
        destination_group: &str,
        id: &str,
    ) -> Result<u64, StoreError> {
        let Some(source) = self.existing_object(source_group, id)? else {
            return Ok(0);
        };
        let size = fs::metadata(&source)?.len();
        let target = self.prepare_target(destination_group, id)?;
        fs::rename(&source, &target)?;
        Ok(size)
    }
}

/// Returns true if `target` exists and holds exactly the bytes of `source`.
pub(crate) fn same_content(source: &Path, target: &Path) -> Result<bool, StoreError> {
    if !target.is_file() || fs::metadata(source)?.len() != fs::metadata(target)?.len() {
        return Ok(false);
    }
    Ok(replica_digest::compute_file_md5_hex(source)?
        == replica_digest::compute_file_md5_hex(target)?)
}

#[cfg(test)]
mod test {
    use super::{validate_name, DirectoryLayout};
    use crate::{StoreError, CHECKSUM_ATTRIBUTE, SIZE_ATTRIBUTE};
    use assert_matches::assert_matches;
    use rstest::rstest;

    #[rstest]
    #[case("aip_store", true)]
    #[case("item@123456789-99.zip", true)]
    #[case("", false)]
    #[case("..", false)]
    #[case(".", false)]
    #[case("a/b", false)]
    #[case("/etc", false)]
    fn test_validate_name(#[case] name: &str, #[case] valid: bool) {
        assert_eq!(validate_name(name).is_ok(), valid, "{name}");
    }

    #[test]
    fn test_attributes_of_missing_object() {
        let temp = tempfile::tempdir().unwrap();
        let layout = DirectoryLayout::new(temp.path());
        assert_eq!(layout.attribute("g", "missing", SIZE_ATTRIBUTE).unwrap(), None);
        assert_eq!(layout.fetch("g", "missing", &temp.path().join("x")).unwrap(), 0);
        assert!(!temp.path().join("x").exists());
    }

    #[test]
    fn test_attributes() {
        let temp = tempfile::tempdir().unwrap();
        let layout = DirectoryLayout::new(temp.path());
        let target = layout.prepare_target("g", "obj").unwrap();
        std::fs::write(&target, b"1234567890").unwrap();

        assert_eq!(
            layout.attribute("g", "obj", CHECKSUM_ATTRIBUTE).unwrap().as_deref(),
            Some("e807f1fcf82d132f9bb018ca6738a19f")
        );
        assert_eq!(
            layout.attribute("g", "obj", SIZE_ATTRIBUTE).unwrap().as_deref(),
            Some("10")
        );
        assert_eq!(layout.attribute("g", "obj", "colour").unwrap(), None);
        assert_matches!(
            layout.attribute("g", "../obj", SIZE_ATTRIBUTE),
            Err(StoreError::InvalidName(_))
        );
    }
}
