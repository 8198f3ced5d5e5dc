use std::path::{Path, PathBuf};

use fs_err as fs;
use parking_lot::Mutex;
use replica_bag::Packer;
use replica_store::{ObjectStore, StoreRegistry, SIZE_ATTRIBUTE};
use tracing::{debug, error, info, warn};

use crate::catalog::DeletionCatalog;
use crate::config::ReplicaConfig;
use crate::identifier::{self, ObjectResolver, ObjectType};
use crate::odometer::{Odometer, OdometerReading};
use crate::summary::{Operation, TransferSummary};
use crate::ReplicaError;

/// Converts a byte count to a signed odometer delta.
fn signed(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

/// The single entry point for moving packaged objects in and out of an object store.
///
/// The manager derives storage ids, stages files in its base directory, delegates to the
/// configured [`ObjectStore`] and keeps the [`Odometer`] up to date. Construct it once and share it
/// by reference; all methods take `&self` and odometer updates are serialized internally.
pub struct ReplicaManager {
    config: ReplicaConfig,
    store: Box<dyn ObjectStore>,
    resolver: Box<dyn ObjectResolver>,
    odometer: Option<Mutex<Odometer>>,
}

impl ReplicaManager {
    /// Constructs a manager for an uninitialized `store`.
    ///
    /// Fails if the configuration is invalid or the store can not be initialized. An odometer
    /// that can not be read is not fatal, the manager then runs without accounting.
    pub fn new(
        config: ReplicaConfig,
        mut store: Box<dyn ObjectStore>,
        resolver: impl ObjectResolver + 'static,
    ) -> Result<Self, ReplicaError> {
        config.validate()?;
        store.init()?;
        fs::create_dir_all(&config.base_dir)?;

        let odometer_path = config.odometer_path();
        let odometer = match Odometer::load(&odometer_path) {
            Ok(odometer) => Some(Mutex::new(odometer)),
            Err(err) => {
                warn!(
                    "the odometer at {} is unavailable, usage will not be recorded: {err}",
                    odometer_path.display()
                );
                None
            }
        };

        Ok(Self {
            config,
            store,
            resolver: Box::new(resolver),
            odometer,
        })
    }

    /// Constructs a manager with the store backend named in the configuration.
    pub fn from_config(
        config: ReplicaConfig,
        registry: &StoreRegistry,
        resolver: impl ObjectResolver + 'static,
    ) -> Result<Self, ReplicaError> {
        let store = registry.construct(&config.store, &config.store_options)?;
        Self::new(config, store, resolver)
    }

    /// The configuration the manager was constructed with.
    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    /// The group that holds archival packages.
    pub fn aip_group(&self) -> &str {
        &self.config.groups.aip
    }

    /// The group that holds deletion catalogs.
    pub fn delete_group(&self) -> &str {
        &self.config.groups.delete
    }

    /// The extension of the archives this manager writes, e.g. `zip`.
    pub fn archive_extension(&self) -> &'static str {
        self.config.archive_format.extension()
    }

    /// Returns the storage id of the object with the given canonical id.
    ///
    /// The type prefix is taken from the repository. If the repository no longer knows the object,
    /// the store is probed for every type in both groups and the first match wins. This is a best
    /// effort: if nothing matches, the id is returned without a prefix.
    pub fn storage_id(
        &self,
        canonical_id: &str,
        extension: Option<&str>,
    ) -> Result<String, ReplicaError> {
        let id = identifier::unprefixed_storage_id(canonical_id, extension);
        if !self.config.prefix_types {
            return Ok(id);
        }
        if let Some(object_type) = self.resolver.object_type(canonical_id) {
            return Ok(identifier::with_prefix(object_type.as_str(), &id));
        }

        debug!("'{canonical_id}' is not in the repository, probing the store for its type");
        for object_type in ObjectType::ALL {
            let candidate = identifier::with_prefix(object_type.as_str(), &id);
            for group in [self.aip_group(), self.delete_group()] {
                if self.store.object_exists(group, &candidate)? {
                    return Ok(candidate);
                }
            }
        }
        warn!("no stored object matches '{canonical_id}', using '{id}'");
        Ok(id)
    }

    /// Recovers the canonical id from a storage id.
    pub fn canonical_id(&self, storage_id: &str) -> String {
        identifier::canonical_id(storage_id)
    }

    /// Returns the storage id of the deletion catalog of an object.
    pub fn deletion_catalog_id(&self, canonical_id: &str, extension: Option<&str>) -> String {
        identifier::deletion_catalog_id(canonical_id, extension)
    }

    /// Returns the local path at which the object `id` of `group` is staged, creating the staging
    /// directory of the group.
    pub fn stage(&self, group: &str, id: &str) -> Result<PathBuf, ReplicaError> {
        for name in [group, id] {
            if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
                return Err(ReplicaError::InvalidName(name.to_string()));
            }
        }
        let dir = self.config.base_dir.join(group);
        fs::create_dir_all(&dir)?;
        Ok(dir.join(id))
    }

    /// Returns true if the store holds an object `id` in `group`.
    pub fn object_exists(&self, group: &str, id: &str) -> Result<bool, ReplicaError> {
        Ok(self.store.object_exists(group, id)?)
    }

    /// Returns an attribute of a stored object, see [`replica_store::CHECKSUM_ATTRIBUTE`] and its
    /// siblings.
    pub fn object_attribute(
        &self,
        group: &str,
        id: &str,
        name: &str,
    ) -> Result<Option<String>, ReplicaError> {
        Ok(self.store.object_attribute(group, id, name)?)
    }

    /// Downloads an object into the staging area. The summary carries the staged file, or no
    /// file if the store does not hold the object.
    pub fn fetch_object(&self, group: &str, id: &str) -> Result<TransferSummary, ReplicaError> {
        let destination = self.stage(group, id)?;
        if destination.is_file() {
            fs::remove_file(&destination)?;
        }

        let bytes = self.store.fetch_object(group, id, &destination)?;
        if bytes > 0 {
            self.record(|odometer| odometer.add_downloaded(bytes));
        }
        let mut summary = TransferSummary::new(Operation::Fetch, group, id, bytes);
        if destination.exists() {
            summary = summary.with_path(&destination);
        }
        info!("{summary}");
        Ok(summary)
    }

    /// Uploads `file` to `group` under its file name.
    ///
    /// A new object adds one to the object count; an update only changes the stored size by the
    /// difference to the previous version.
    pub fn transfer_object(
        &self,
        group: &str,
        file: &Path,
    ) -> Result<TransferSummary, ReplicaError> {
        let id = file
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ReplicaError::InvalidName(file.display().to_string()))?
            .to_string();

        let previous_size: Option<u64> = self
            .store
            .object_attribute(group, &id, SIZE_ATTRIBUTE)?
            .and_then(|size| size.parse().ok());
        let size = fs::metadata(file)?.len();

        let bytes = self.store.transfer_object(group, file)?;
        if bytes > 0 {
            self.record(|odometer| {
                odometer.add_uploaded(bytes);
                odometer.adjust_store_size(signed(size) - signed(previous_size.unwrap_or(0)));
                if previous_size.is_none() {
                    odometer.adjust_count(1);
                }
            });
        }
        let summary = TransferSummary::new(Operation::Transfer, group, &id, bytes).with_path(file);
        info!("{summary}");
        Ok(summary)
    }

    /// Deletes an object. The summary reports the number of bytes freed.
    pub fn remove_object(&self, group: &str, id: &str) -> Result<TransferSummary, ReplicaError> {
        let bytes = self.store.remove_object(group, id)?;
        if bytes > 0 {
            self.record(|odometer| {
                odometer.adjust_store_size(-signed(bytes));
                odometer.adjust_count(-1);
            });
        }
        let summary = TransferSummary::new(Operation::Remove, group, id, bytes);
        info!("{summary}");
        Ok(summary)
    }

    /// Moves an object between groups. No content crosses the network, so the odometer is not
    /// touched. [`TransferSummary::found`] tells whether anything was moved.
    pub fn move_object(
        &self,
        source_group: &str,
        destination_group: &str,
        id: &str,
    ) -> Result<TransferSummary, ReplicaError> {
        let bytes = self
            .store
            .move_object(source_group, destination_group, id)?;
        let summary = TransferSummary::new(Operation::Move, source_group, id, bytes)
            .with_destination_group(destination_group);
        info!("{summary}");
        Ok(summary)
    }

    /// The current odometer values, or `None` if the odometer is unavailable.
    pub fn odometer(&self) -> Option<OdometerReading> {
        self.odometer
            .as_ref()
            .map(|odometer| odometer.lock().reading())
    }

    /// Packs a deletion catalog and stores it in the delete group.
    pub fn record_deletion(
        &self,
        mut catalog: DeletionCatalog,
    ) -> Result<TransferSummary, ReplicaError> {
        catalog.format = self.config.archive_format;
        let bag_name = self.deletion_catalog_id(&catalog.object_id, None);
        let bag_dir = self.stage(self.delete_group(), &bag_name)?;

        let archive = catalog.pack(&bag_dir)?;
        let result = self.transfer_object(self.delete_group(), &archive);
        if archive.exists() {
            fs::remove_file(&archive)?;
        }
        result
    }

    /// Downloads and reads the deletion catalog of an object, or returns `None` if there is none.
    pub fn fetch_deletion_catalog(
        &self,
        canonical_id: &str,
    ) -> Result<Option<DeletionCatalog>, ReplicaError> {
        let id = self.deletion_catalog_id(canonical_id, Some(self.archive_extension()));
        let Some(archive) = self.fetch_object(self.delete_group(), &id)?.path else {
            return Ok(None);
        };
        let mut catalog = DeletionCatalog::new(canonical_id, None);
        catalog.unpack(&archive)?;
        Ok(Some(catalog))
    }

    /// Removes the deletion catalog of an object once it has been restored.
    pub fn discard_deletion_catalog(
        &self,
        canonical_id: &str,
    ) -> Result<TransferSummary, ReplicaError> {
        let id = self.deletion_catalog_id(canonical_id, Some(self.archive_extension()));
        self.remove_object(self.delete_group(), &id)
    }

    /// Applies `update` to the odometer and saves it. A failing save is logged; the operation that
    /// caused the update has already happened.
    fn record(&self, update: impl FnOnce(&mut Odometer)) {
        let Some(odometer) = &self.odometer else {
            return;
        };
        let mut odometer = odometer.lock();
        update(&mut *odometer);
        if let Err(err) = odometer.save() {
            error!(
                "failed to save the odometer to {}: {err}",
                odometer.path().display()
            );
        }
    }
}

impl std::fmt::Debug for ReplicaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaManager")
            .field("config", &self.config)
            .field("odometer", &self.odometer())
            .finish_non_exhaustive()
    }
}
