use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs_err as fs;
use replica_bag::properties::OBJECT_PROPERTIES_FILE;
use replica_bag::{ArchiveFormat, Bag, BagError, ObjectProperties, Packer, SizeMethod};

/// The bag type of deletion catalogs.
pub const DELETION_CATALOG_BAG_TYPE: &str = "DC";

/// A receipt of a deleted repository object: which object was deleted, who owned it and which
/// members were deleted along with it.
///
/// Catalogs are written when an object is deleted and consumed when it is restored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionCatalog {
    /// The canonical id of the deleted object.
    pub object_id: String,
    /// The canonical id of the former owner of the object.
    pub owner_id: Option<String>,
    /// The canonical ids of the members deleted with the object.
    pub member_ids: Vec<String>,
    /// When the object was deleted.
    pub created: Option<DateTime<Utc>>,
    /// The format the catalog is packed in.
    pub format: ArchiveFormat,
}

impl DeletionCatalog {
    /// A catalog of `object_id` without members. The creation time is set when it is packed.
    pub fn new(object_id: impl Into<String>, owner_id: Option<String>) -> Self {
        Self {
            object_id: object_id.into(),
            owner_id,
            member_ids: Vec::new(),
            created: None,
            format: ArchiveFormat::default(),
        }
    }

    /// Records a member deleted along with the object.
    pub fn add_member(&mut self, member_id: impl Into<String>) {
        self.member_ids.push(member_id.into());
    }

    fn properties(&self) -> ObjectProperties {
        ObjectProperties {
            bag_type: Some(DELETION_CATALOG_BAG_TYPE.to_string()),
            object_id: Some(self.object_id.clone()),
            owner_id: self.owner_id.clone(),
            other_ids: self.member_ids.clone(),
            created: self.created,
            ..ObjectProperties::default()
        }
    }
}

impl Packer for DeletionCatalog {
    fn pack(&mut self, bag_dir: &Path) -> Result<PathBuf, BagError> {
        if self.created.is_none() {
            self.created = Some(Utc::now());
        }

        // Left over from an interrupted run.
        if bag_dir.exists() {
            fs::remove_dir_all(bag_dir)?;
        }

        let mut bag = Bag::open(bag_dir)?;
        self.properties().write_to(&mut bag)?;
        bag.close()?;

        let dest_dir = bag_dir.parent().unwrap_or(Path::new("."));
        let archive = bag.deflate(dest_dir, self.format)?;
        bag.empty()?;
        Ok(archive)
    }

    fn unpack(&mut self, archive: &Path) -> Result<(), BagError> {
        self.format = ArchiveFormat::try_from_path(archive)
            .ok_or_else(|| BagError::UnsupportedArchiveType(archive.to_path_buf()))?;

        let mut bag = Bag::open(archive)?;
        let properties = ObjectProperties::read_from(&bag)?;
        bag.empty()?;
        fs::remove_file(archive)?;

        let properties =
            properties.ok_or_else(|| BagError::MissingPayload(OBJECT_PROPERTIES_FILE.to_string()))?;
        if let Some(object_id) = properties.object_id {
            self.object_id = object_id;
        }
        self.owner_id = properties.owner_id;
        self.member_ids = properties.other_ids;
        self.created = properties.created;
        Ok(())
    }

    fn size(&self, method: SizeMethod) -> Result<u64, BagError> {
        let size = match method {
            SizeMethod::Bytes => self
                .properties()
                .lines()
                .iter()
                .map(|line| line.len() as u64 + 1)
                .sum(),
            SizeMethod::Count => 1,
        };
        Ok(size)
    }
}

#[cfg(test)]
mod test {
    use super::DeletionCatalog;
    use replica_bag::{ArchiveFormat, Packer, SizeMethod};
    use rstest::rstest;

    #[rstest]
    #[case(ArchiveFormat::Zip)]
    #[case(ArchiveFormat::Tgz)]
    fn test_pack_unpack(#[case] format: ArchiveFormat) {
        let temp = tempfile::tempdir().unwrap();
        let mut catalog = DeletionCatalog::new("123456789/99", Some("123456789/2".to_string()));
        catalog.add_member("123456789/100");
        catalog.add_member("123456789/101");
        catalog.format = format;

        let bag_dir = temp.path().join("DELETION-RECORD@123456789-99");
        let archive = catalog.pack(&bag_dir).unwrap();
        assert_eq!(
            archive,
            temp.path()
                .join(format!("DELETION-RECORD@123456789-99.{}", format.extension()))
        );
        assert!(!bag_dir.exists());
        assert!(catalog.created.is_some());

        let mut restored = DeletionCatalog::new("", None);
        restored.unpack(&archive).unwrap();
        assert_eq!(restored, catalog);
        assert!(!archive.exists());
        assert!(!bag_dir.exists());
    }

    #[test]
    fn test_size() {
        let mut catalog = DeletionCatalog::new("1/2", None);
        assert_eq!(catalog.size(SizeMethod::Count).unwrap(), 1);
        // "bagType DC\n" + "objectId 1/2\n"
        assert_eq!(catalog.size(SizeMethod::Bytes).unwrap(), 24);
        catalog.add_member("1/3");
        assert_eq!(catalog.size(SizeMethod::Bytes).unwrap(), 37);
    }
}
