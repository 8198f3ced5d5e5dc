use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{ContentStore, LocalStore, MountableStore, ObjectStore, StoreError, SyncStore};

/// Settings shared by all object store backends. Each backend reads the options it needs and
/// reports the ones it misses as [`StoreError::Misconfigured`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct StoreOptions {
    /// The root directory of a file system backed store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// The base url of a content server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,

    /// The user to authenticate as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// The password of `username`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// How often a failed upload is retried.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

/// Creates an uninitialized store from its options.
pub type StoreConstructor = fn(&StoreOptions) -> Result<Box<dyn ObjectStore>, StoreError>;

fn required_root(store: &str, options: &StoreOptions) -> Result<PathBuf, StoreError> {
    options.root.clone().ok_or_else(|| StoreError::Misconfigured {
        store: store.to_string(),
        reason: "the 'root' option is required".to_string(),
    })
}

fn local_store(options: &StoreOptions) -> Result<Box<dyn ObjectStore>, StoreError> {
    Ok(Box::new(LocalStore::new(required_root("local", options)?)))
}

fn mountable_store(options: &StoreOptions) -> Result<Box<dyn ObjectStore>, StoreError> {
    Ok(Box::new(MountableStore::new(required_root("mount", options)?)))
}

fn sync_store(options: &StoreOptions) -> Result<Box<dyn ObjectStore>, StoreError> {
    Ok(Box::new(SyncStore::new(required_root("sync", options)?)))
}

fn content_store(options: &StoreOptions) -> Result<Box<dyn ObjectStore>, StoreError> {
    let url = options.url.clone().ok_or_else(|| StoreError::Misconfigured {
        store: "content".to_string(),
        reason: "the 'url' option is required".to_string(),
    })?;
    let mut store = ContentStore::new(url)?;
    if let Some(username) = &options.username {
        store = store.with_credentials(username, options.password.clone());
    }
    if let Some(max_retries) = options.max_retries {
        store = store.with_max_retries(max_retries);
    }
    Ok(Box::new(store))
}

/// Maps store names, as they appear in configuration, to the backends that implement them.
#[derive(Debug, Clone)]
pub struct StoreRegistry {
    constructors: BTreeMap<String, StoreConstructor>,
}

impl Default for StoreRegistry {
    /// A registry with the built in backends: `local`, `mount`, `sync` and `content`.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("local", local_store);
        registry.register("mount", mountable_store);
        registry.register("sync", sync_store);
        registry.register("content", content_store);
        registry
    }
}

impl StoreRegistry {
    /// A registry without any backends.
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Registers a backend under `name`, replacing any backend registered under the same name.
    pub fn register(&mut self, name: impl Into<String>, constructor: StoreConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    /// The names of all registered backends, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.constructors.keys().map(String::as_str)
    }

    /// Constructs the backend registered under `name` without initializing it.
    pub fn construct(
        &self,
        name: &str,
        options: &StoreOptions,
    ) -> Result<Box<dyn ObjectStore>, StoreError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| StoreError::UnknownStore(name.to_string()))?;
        constructor(options)
    }

    /// Constructs and initializes the backend registered under `name`.
    pub fn create(
        &self,
        name: &str,
        options: &StoreOptions,
    ) -> Result<Box<dyn ObjectStore>, StoreError> {
        let mut store = self.construct(name, options)?;
        store.init()?;
        tracing::debug!("initialized '{name}' object store");
        Ok(store)
    }
}

#[cfg(test)]
mod test {
    use super::{StoreOptions, StoreRegistry};
    use crate::{ObjectStore, StoreError};
    use assert_matches::assert_matches;

    #[test]
    fn test_default_names() {
        let registry = StoreRegistry::default();
        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["content", "local", "mount", "sync"]
        );
    }

    #[test]
    fn test_create() {
        let temp = tempfile::tempdir().unwrap();
        let registry = StoreRegistry::default();
        let options = StoreOptions {
            root: Some(temp.path().join("store")),
            ..StoreOptions::default()
        };
        let store = registry.create("local", &options).unwrap();
        assert!(temp.path().join("store").is_dir());
        assert!(!store.object_exists("aip", "missing").unwrap());

        assert_matches!(
            registry.create("tape", &options),
            Err(StoreError::UnknownStore(name)) if name == "tape"
        );
        assert_matches!(
            registry.create("content", &options),
            Err(StoreError::Misconfigured { store, .. }) if store == "content"
        );
        assert_matches!(
            registry.create("sync", &StoreOptions::default()),
            Err(StoreError::Misconfigured { store, .. }) if store == "sync"
        );
    }

    #[test]
    fn test_custom_backend() {
        fn broken(_: &StoreOptions) -> Result<Box<dyn ObjectStore>, StoreError> {
            Err(StoreError::UnknownStore("broken".to_string()))
        }
        let mut registry = StoreRegistry::empty();
        registry.register("broken", broken);
        assert_matches!(
            registry.create("broken", &StoreOptions::default()),
            Err(StoreError::UnknownStore(_))
        );
    }
}
