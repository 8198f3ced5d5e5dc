//! Replicates packaged repository objects to an object store.
//!
//! [`ReplicaManager`] is the entry point. It is configured with a [`ReplicaConfig`], owns an
//! [`replica_store::ObjectStore`] and records every byte it moves in an [`Odometer`]:
//!
//! ```no_run
//! use replica_manager::{NoResolver, ReplicaConfig, ReplicaManager};
//! use replica_store::StoreRegistry;
//!
//! let config = ReplicaConfig::from_path("/etc/replica.toml").unwrap();
//! let registry = StoreRegistry::default();
//! let manager = ReplicaManager::from_config(config, &registry, NoResolver).unwrap();
//! let id = manager.storage_id("123456789/99", Some("zip")).unwrap();
//! let summary = manager.fetch_object(manager.aip_group(), &id).unwrap();
//! println!("{summary}");
//! if let Some(archive) = summary.path {
//!     println!("restored {}", archive.display());
//! }
//! ```

#![deny(missing_docs)]

mod catalog;
pub mod config;
pub mod identifier;
mod manager;
pub mod odometer;
mod summary;

pub use catalog::{DeletionCatalog, DELETION_CATALOG_BAG_TYPE};
pub use config::{GroupsConfig, LoadError, ReplicaConfig, ValidationError};
pub use identifier::{NoResolver, ObjectResolver, ObjectType};
pub use manager::ReplicaManager;
pub use odometer::{Odometer, OdometerError, OdometerReading};
pub use summary::{Operation, TransferSummary};

/// An error that can occur while replicating objects.
#[derive(thiserror::Error, Debug)]
#[allow(missing_docs)]
pub enum ReplicaError {
    #[error(transparent)]
    StoreError(#[from] replica_store::StoreError),

    #[error(transparent)]
    BagError(#[from] replica_bag::BagError),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    LoadError(#[from] LoadError),

    #[error(transparent)]
    ValidationError(#[from] ValidationError),

    #[error("'{0}' is not a valid object name")]
    InvalidName(String),
}
