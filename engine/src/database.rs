//! A single project's database: its collections, transaction manager, and
//! background GC loop (component C8).

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use serde_json::{Map, Value};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::document::Document;
use crate::error::CResult;
use crate::store::collection::Collection;
use crate::store::registry::CollectionRegistry;
use crate::transaction::{Transaction, TransactionManager};

const META_FILE_NAME: &str = "meta";
const COLLECTIONS_DIR_NAME: &str = "collections";

#[derive(Serialize, Deserialize, Default)]
struct DatabaseMeta {
    collections: Vec<String>,
}

/// One project's isolated document store: a directory on disk, its open
/// collections, and the MVCC machinery (clock + transaction manager)
/// shared across all of them.
pub struct Database {
    root: PathBuf,
    clock: Clock,
    txn_manager: TransactionManager,
    registry: CollectionRegistry,
    config: EngineConfig,
}

impl Database {
    /// Opens (creating if absent) the database rooted at `root`, eagerly
    /// reloading every collection recorded in its meta file so the
    /// background GC loop has something to iterate from the start.
    pub fn open(root: impl AsRef<Path>, config: EngineConfig) -> CResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        let collections_dir = root.join(COLLECTIONS_DIR_NAME);
        std::fs::create_dir_all(&collections_dir)?;

        let registry = CollectionRegistry::new(&collections_dir);
        let meta_path = root.join(META_FILE_NAME);
        if meta_path.exists() {
            let data = std::fs::read(&meta_path)?;
            let meta: DatabaseMeta = serde_json::from_slice(&data)?;
            for name in &meta.collections {
                registry.get(name)?;
            }
        }

        Ok(Self { root, clock: Clock::new(), txn_manager: TransactionManager::new(), registry, config })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Creates a brand-new collection and records it in the meta file so a
    /// later `open` picks it back up.
    pub fn create_collection(&self, name: &str) -> CResult<Arc<Collection>> {
        let collection = self.registry.create(name)?;
        self.write_meta()?;
        Ok(collection)
    }

    pub fn get_collection(&self, name: &str) -> CResult<Arc<Collection>> {
        self.registry.get(name)
    }

    pub fn list_collections(&self) -> Vec<String> {
        self.registry.list()
    }

    pub fn list_collections_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.registry.list_with_prefix(prefix)
    }

    pub fn begin_transaction(&self) -> Transaction {
        self.txn_manager.begin(self.clock.new_txn_id(), &self.clock)
    }

    pub fn begin_read_only(&self) -> Transaction {
        self.txn_manager.begin_read_only(self.clock.new_txn_id(), &self.clock)
    }

    /// Opens a read-only transaction that sees dirty writes: uncommitted,
    /// and even since-aborted, versions attached to a chain.
    pub fn begin_read_uncommitted(&self) -> Transaction {
        self.txn_manager.begin_read_uncommitted(self.clock.new_txn_id(), &self.clock)
    }

    /// Inserts `document` into `collection` under `txn`, threading the
    /// database's shared clock and snapshot manager through so callers never
    /// have to juggle them directly.
    pub fn insert_document(&self, txn: &Transaction, collection: &str, document: Document) -> CResult<()> {
        self.registry.get(collection)?.insert(txn, document, self.txn_manager.snapshots(), &self.clock)
    }

    pub fn update_document(&self, txn: &Transaction, collection: &str, id: &str, updates: &Map<String, Value>) -> CResult<Document> {
        self.registry.get(collection)?.update(txn, id, updates, self.txn_manager.snapshots(), &self.clock)
    }

    pub fn delete_document(&self, txn: &Transaction, collection: &str, id: &str) -> CResult<()> {
        self.registry.get(collection)?.delete(txn, id, self.txn_manager.snapshots(), &self.clock)
    }

    pub fn find_document(&self, txn: &Transaction, collection: &str, id: &str) -> CResult<Option<Document>> {
        self.registry.get(collection)?.find_by_id(txn, id, self.txn_manager.snapshots())
    }

    pub fn list_documents(&self, txn: &Transaction, collection: &str) -> CResult<Vec<Document>> {
        self.registry.get(collection)?.list(txn, self.txn_manager.snapshots())
    }

    pub fn find_documents(&self, txn: &Transaction, collection: &str, field: &str, value: &Value) -> CResult<Vec<Document>> {
        self.registry.get(collection)?.find(txn, field, value, self.txn_manager.snapshots())
    }

    pub fn ensure_index(&self, collection: &str, field: &str) -> CResult<()> {
        self.registry.get(collection)?.ensure_index(field);
        Ok(())
    }

    /// Persists every write the transaction made (only now, at commit time,
    /// so aborted writes never touch disk), then finalizes its visibility.
    pub fn commit(&self, txn: &Transaction) -> CResult<()> {
        let write_set = txn.write_set_snapshot();
        let mut touched = HashSet::new();
        for entry in &write_set {
            let collection = self.registry.get(&entry.collection)?;
            collection.persist_commit(entry)?;
            touched.insert(entry.collection.clone());
        }
        if self.config.fsync_on_commit() {
            for name in touched {
                self.registry.get(&name)?.sync_log()?;
            }
        }
        self.txn_manager.commit(txn)
    }

    /// Rolls every write the transaction made back off its collections'
    /// in-memory chains. Nothing was ever persisted, so there's no on-disk
    /// cleanup to do.
    pub fn rollback(&self, txn: &Transaction) -> CResult<()> {
        let write_set = txn.write_set_snapshot();
        let mut heads = HashMap::new();
        for entry in &write_set {
            let collection = self.registry.get(&entry.collection)?;
            let slot = collection.slot_handle(&entry.doc_id);
            heads.insert((entry.collection.clone(), entry.doc_id.clone()), slot);
        }
        self.txn_manager.rollback(txn, &heads)
    }

    /// Runs one garbage-collection pass across every open collection,
    /// returning the number of versions trimmed.
    pub fn run_gc_once(&self) -> usize {
        let watermark = self.txn_manager.snapshots().oldest_active_snapshot_timestamp();
        self.registry.all().iter().map(|c| c.run_gc(watermark)).sum()
    }

    /// Flushes every open collection's log. Not required for correctness
    /// (replay recovers from an unflushed log the same way it recovers from
    /// a crash), but a courteous way to close out a database.
    pub fn close(&self) -> CResult<()> {
        for collection in self.registry.all() {
            collection.sync_log()?;
        }
        Ok(())
    }

    fn write_meta(&self) -> CResult<()> {
        let meta = DatabaseMeta { collections: self.registry.list() };
        let data = serde_json::to_vec_pretty(&meta)?;
        std::fs::write(self.root.join(META_FILE_NAME), data)?;
        Ok(())
    }
}

/// Spawns the database's background GC loop as a `tokio` task, returning a
/// token the caller can cancel to stop it (the instance manager cancels this
/// when it evicts the database). Must be called from within a tokio runtime.
pub fn spawn_gc_loop(database: Arc<Database>, interval: Duration) -> CancellationToken {
    let token = CancellationToken::new();
    let child_token = token.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = child_token.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = database.run_gc_once();
                    if removed > 0 {
                        log::debug!("background gc at {:?} removed {removed} stale versions", database.root());
                    }
                }
            }
        }
    });
    token
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn create_collection_persists_across_reopen() {
        let dir = tempdir().unwrap();
        {
            let db = Database::open(dir.path(), EngineConfig::default()).unwrap();
            db.create_collection("widgets").unwrap();
        }
        let db = Database::open(dir.path(), EngineConfig::default()).unwrap();
        assert_eq!(db.list_collections(), vec!["widgets".to_string()]);
    }

    #[test]
    fn commit_persists_write_and_rollback_does_not() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path(), EngineConfig::default()).unwrap();
        db.create_collection("widgets").unwrap();

        let txn = db.begin_transaction();
        let doc = Document::from_value(json!({"_id": "w1"})).unwrap();
        db.insert_document(&txn, "widgets", doc).unwrap();
        db.commit(&txn).unwrap();

        let reader = db.begin_read_only();
        assert!(db.find_document(&reader, "widgets", "w1").unwrap().is_some());

        let txn2 = db.begin_transaction();
        let doc2 = Document::from_value(json!({"_id": "w2"})).unwrap();
        db.insert_document(&txn2, "widgets", doc2).unwrap();
        db.rollback(&txn2).unwrap();

        let reader2 = db.begin_read_only();
        assert!(db.find_document(&reader2, "widgets", "w2").unwrap().is_none());
    }

    #[test]
    fn reopen_recovers_committed_documents() {
        let dir = tempdir().unwrap();
        {
            let db = Database::open(dir.path(), EngineConfig::default()).unwrap();
            db.create_collection("widgets").unwrap();
            let txn = db.begin_transaction();
            db.insert_document(&txn, "widgets", Document::from_value(json!({"_id": "w1"})).unwrap()).unwrap();
            db.commit(&txn).unwrap();
        }

        let db = Database::open(dir.path(), EngineConfig::default()).unwrap();
        let reader = db.begin_read_only();
        assert!(db.find_document(&reader, "widgets", "w1").unwrap().is_some());
    }
}
