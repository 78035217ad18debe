//! The per-database registry of open collections (component C7).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{CResult, Error};
use crate::store::collection::Collection;

/// Opens and tracks every collection live under one database's directory.
/// Collections are opened lazily on first use and kept open for the life of
/// the database (or until explicitly dropped, which this registry doesn't
/// currently support — there's no drop-collection operation in scope).
pub struct CollectionRegistry {
    root: PathBuf,
    collections: DashMap<String, Arc<Collection>>,
}

impl CollectionRegistry {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf(), collections: DashMap::new() }
    }

    pub fn validate_name(name: &str) -> CResult<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("collection name must not be empty".into()));
        }
        if name.chars().any(|c| c.is_control()) {
            return Err(Error::InvalidArgument("collection name must not contain control characters".into()));
        }
        Ok(())
    }

    /// Creates a brand-new collection, failing if one by this name is
    /// already open or already has a log file on disk.
    pub fn create(&self, name: &str) -> CResult<Arc<Collection>> {
        Self::validate_name(name)?;
        if self.collections.contains_key(name) {
            return Err(Error::AlreadyExists(format!("collection {name}")));
        }
        let path = self.log_path(name);
        if path.exists() {
            return Err(Error::AlreadyExists(format!("collection {name}")));
        }
        let collection = Arc::new(Collection::open(name.to_string(), &path)?);
        self.collections.insert(name.to_string(), collection.clone());
        Ok(collection)
    }

    /// Returns the collection, opening it from disk on first access if a
    /// log file exists for it but it isn't loaded yet.
    pub fn get(&self, name: &str) -> CResult<Arc<Collection>> {
        if let Some(existing) = self.collections.get(name) {
            return Ok(existing.clone());
        }
        let path = self.log_path(name);
        if !path.exists() {
            return Err(Error::NotFound(format!("collection {name}")));
        }
        let collection = Arc::new(Collection::open(name.to_string(), &path)?);
        self.collections.insert(name.to_string(), collection.clone());
        Ok(collection)
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn list_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.list().into_iter().filter(|name| name.starts_with(prefix)).collect()
    }

    pub fn all(&self) -> Vec<Arc<Collection>> {
        self.collections.iter().map(|e| e.value().clone()).collect()
    }

    fn log_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.log", sanitize_filename(name)))
    }
}

/// Makes an opaque collection name (which may contain `/`, spec treats it as
/// just another byte in the name) safe to embed in a single path component.
pub fn sanitize_filename(name: &str) -> String {
    name.replace('%', "%25").replace('/', "%2F")
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_then_get_returns_the_same_collection() {
        let dir = tempdir().unwrap();
        let registry = CollectionRegistry::new(dir.path());
        let created = registry.create("widgets").unwrap();
        let fetched = registry.get("widgets").unwrap();
        assert!(Arc::ptr_eq(&created, &fetched));
    }

    #[test]
    fn create_twice_fails() {
        let dir = tempdir().unwrap();
        let registry = CollectionRegistry::new(dir.path());
        registry.create("widgets").unwrap();
        assert!(registry.create("widgets").is_err());
    }

    #[test]
    fn empty_and_control_character_names_are_rejected() {
        let dir = tempdir().unwrap();
        let registry = CollectionRegistry::new(dir.path());
        assert!(registry.create("").is_err());
        assert!(registry.create("widgets\n").is_err());
        assert!(registry.create("wid\0gets").is_err());
    }

    #[test]
    fn nested_names_are_sanitized_to_a_single_path_component() {
        let dir = tempdir().unwrap();
        let registry = CollectionRegistry::new(dir.path());
        registry.create("users/admins/audit").unwrap();
        let path = registry.log_path("users/admins/audit");
        assert_eq!(path.parent().unwrap(), dir.path());
    }

    #[test]
    fn list_is_sorted() {
        let dir = tempdir().unwrap();
        let registry = CollectionRegistry::new(dir.path());
        registry.create("zebra").unwrap();
        registry.create("apple").unwrap();
        assert_eq!(registry.list(), vec!["apple".to_string(), "zebra".to_string()]);
    }
}
