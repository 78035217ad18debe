//! A single collection: its in-memory version chains, optional index, and
//! on-disk log (component C6).

use std::path::Path;
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use crate::clock::Clock;
use crate::document::Document;
use crate::error::{CResult, Error};
use crate::gc;
use crate::snapshot::SnapshotManager;
use crate::store::log::{CollectionLog, VersionRecord};
use crate::transaction::{Transaction, WriteSetEntry};
use crate::version::{find_visible, Payload, Version};

const MAX_CAS_RETRIES: usize = 32;

/// The mutable cell backing one document's version chain. `DashMap` gives
/// us lock-free lookup of the slot itself; the `RwLock` inside guards the
/// chain head against concurrent writers racing to attach a new version.
pub struct DocSlot {
    head: RwLock<Option<Arc<Version>>>,
}

impl DocSlot {
    fn new(head: Option<Arc<Version>>) -> Self {
        Self { head: RwLock::new(head) }
    }

    pub fn current(&self) -> Option<Arc<Version>> {
        self.head.read().clone()
    }

    /// Swaps the head from `expected` to `new`, succeeding only if nothing
    /// else changed it in between.
    fn try_cas(&self, expected: &Option<Arc<Version>>, new: Arc<Version>) -> bool {
        let mut guard = self.head.write();
        if heads_match(&guard, expected) {
            *guard = Some(new);
            true
        } else {
            false
        }
    }

    /// Used by transaction rollback: if the head is still exactly the
    /// version this transaction installed, put the prior head back.
    pub(crate) fn restore_if_current(&self, installed: &Arc<Version>, old_head: Option<Arc<Version>>) {
        let mut guard = self.head.write();
        if let Some(cur) = guard.as_ref() {
            if Arc::ptr_eq(cur, installed) {
                *guard = old_head;
            }
        }
    }
}

fn heads_match(a: &Option<Arc<Version>>, b: &Option<Arc<Version>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => Arc::ptr_eq(x, y),
        _ => false,
    }
}

/// A single-field equality index: serialized field value -> matching ids.
/// Serializing to a canonical JSON string sidesteps `serde_json::Value` not
/// implementing `Hash`/`Eq`.
struct Index {
    field: String,
    by_value: DashMap<String, DashSet<String>>,
}

impl Index {
    fn new(field: String) -> Self {
        Self { field, by_value: DashMap::new() }
    }

    fn key_for(value: Option<&Value>) -> String {
        value.map(|v| v.to_string()).unwrap_or_default()
    }

    fn add(&self, value: Option<&Value>, id: &str) {
        self.by_value.entry(Self::key_for(value)).or_default().insert(id.to_string());
    }

    fn remove(&self, value: Option<&Value>, id: &str) {
        if let Some(set) = self.by_value.get(&Self::key_for(value)) {
            set.remove(id);
        }
    }

    fn lookup(&self, value: &Value) -> Vec<String> {
        self.by_value
            .get(&Self::key_for(Some(value)))
            .map(|set| set.iter().map(|e| e.key().clone()).collect())
            .unwrap_or_default()
    }
}

/// An open, ready-to-query collection: its in-memory document slots, the
/// log backing them, and an optional index.
pub struct Collection {
    name: String,
    slots: DashMap<String, Arc<DocSlot>>,
    index: RwLock<Option<Index>>,
    log: Mutex<CollectionLog>,
}

impl Collection {
    /// Opens (or creates) the collection's log at `path` and replays it to
    /// rebuild every document's version chain.
    pub fn open(name: String, path: impl AsRef<Path>) -> CResult<Self> {
        let mut log = CollectionLog::open(path)?;
        let slots: DashMap<String, Arc<DocSlot>> = DashMap::new();

        log.replay(|record| {
            let doc_id = record.doc_id.clone();
            let timestamp = record.timestamp;
            let txn_id = record.txn_id;
            let payload = record.into_payload();
            let slot = slots.entry(doc_id).or_insert_with(|| Arc::new(DocSlot::new(None)));
            let next = slot.current();
            let version = Version::from_parts(timestamp, txn_id, payload, next);
            *slot.head.write() = Some(version);
        })?;

        Ok(Self { name, slots, index: RwLock::new(None), log: Mutex::new(log) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn slot(&self, id: &str) -> Arc<DocSlot> {
        self.slots.entry(id.to_string()).or_insert_with(|| Arc::new(DocSlot::new(None))).clone()
    }

    /// Exposes the slot for a document id so the database can restore a
    /// rolled-back transaction's prior chain head.
    pub(crate) fn slot_handle(&self, id: &str) -> Arc<DocSlot> {
        self.slot(id)
    }

    /// True if the current state of `id` — the newest version not written by
    /// `txn` itself, skipping over any aborted writers — is live, meaning a
    /// concurrent insert of the same id either already committed or will
    /// become visible on commit. Only the current state matters here: an
    /// older, since-deleted version further back in the chain is not a
    /// conflict.
    fn has_conflicting_live_version(head: &Option<Arc<Version>>, txn: &Transaction, snapshots: &SnapshotManager) -> bool {
        let mut cur = head.clone();
        while let Some(v) = cur {
            if v.txn_id == txn.id() {
                cur = v.next();
                continue;
            }
            if snapshots.is_aborted(v.txn_id) {
                cur = v.next();
                continue;
            }
            return !v.is_tombstone();
        }
        false
    }

    /// Resolves the document currently visible to `txn` for `id`, checking
    /// the transaction's own write-set before falling back to the chain.
    fn resolve_visible(&self, txn: &Transaction, snapshots: &SnapshotManager, id: &str) -> Option<Arc<Version>> {
        if let Some(own) = txn.own_write_version(&self.name, id) {
            return Some(own);
        }
        let slot = self.slots.get(id)?;
        let head = slot.current();
        find_visible(&head, |v| txn.snapshot().is_visible(v, snapshots))
    }

    pub fn insert(&self, txn: &Transaction, document: Document, snapshots: &SnapshotManager, clock: &Clock) -> CResult<()> {
        let id = document.id.clone();
        if txn.own_write_version(&self.name, &id).map_or(false, |v| !v.is_tombstone()) {
            return Err(Error::DuplicateId(id));
        }

        let slot = self.slot(&id);
        for _ in 0..MAX_CAS_RETRIES {
            let head = slot.current();
            if Self::has_conflicting_live_version(&head, txn, snapshots) {
                return Err(Error::DuplicateId(id));
            }

            let new_version = Version::create(Payload::Live(document.clone()), txn.id(), clock, head.clone());
            if slot.try_cas(&head, new_version.clone()) {
                self.index_add(&document);
                txn.record_write(WriteSetEntry {
                    collection: self.name.clone(),
                    doc_id: id,
                    old_head: head,
                    new_version,
                })?;
                return Ok(());
            }
        }
        Err(Error::Conflict(format!("insert into {}/{id} exceeded retry budget", self.name)))
    }

    pub fn update(
        &self,
        txn: &Transaction,
        id: &str,
        updates: &serde_json::Map<String, Value>,
        snapshots: &SnapshotManager,
        clock: &Clock,
    ) -> CResult<Document> {
        let slot = self.slot(id);
        for _ in 0..MAX_CAS_RETRIES {
            let head = slot.current();
            let visible = find_visible(&head, |v| {
                v.txn_id == txn.id() || txn.snapshot().is_visible(v, snapshots)
            });
            let current = match txn.own_write_version(&self.name, id) {
                Some(v) => Some(v),
                None => visible,
            };
            let Some(current) = current else {
                return Err(Error::NotFound(format!("document {id} in {}", self.name)));
            };
            if current.is_tombstone() {
                return Err(Error::NotFound(format!("document {id} in {}", self.name)));
            }
            let mut doc = current.as_document().expect("checked not tombstone above").clone();
            let old_fields = doc.fields.clone();
            doc.merge(updates);

            let new_version = Version::create(Payload::Live(doc.clone()), txn.id(), clock, head.clone());
            if slot.try_cas(&head, new_version.clone()) {
                self.index_swap(&old_fields, &doc);
                txn.record_write(WriteSetEntry {
                    collection: self.name.clone(),
                    doc_id: id.to_string(),
                    old_head: head,
                    new_version,
                })?;
                return Ok(doc);
            }
        }
        Err(Error::Conflict(format!("update of {}/{id} exceeded retry budget", self.name)))
    }

    pub fn delete(&self, txn: &Transaction, id: &str, snapshots: &SnapshotManager, clock: &Clock) -> CResult<()> {
        let slot = self.slot(id);
        for _ in 0..MAX_CAS_RETRIES {
            let head = slot.current();
            let visible = find_visible(&head, |v| {
                v.txn_id == txn.id() || txn.snapshot().is_visible(v, snapshots)
            });
            let current = match txn.own_write_version(&self.name, id) {
                Some(v) => Some(v),
                None => visible,
            };
            let Some(current) = current else {
                return Err(Error::NotFound(format!("document {id} in {}", self.name)));
            };
            if current.is_tombstone() {
                return Err(Error::NotFound(format!("document {id} in {}", self.name)));
            }
            let old_doc = current.as_document().expect("checked not tombstone above").clone();

            let new_version = Version::create(Payload::Tombstone, txn.id(), clock, head.clone());
            if slot.try_cas(&head, new_version.clone()) {
                self.index_remove(&old_doc);
                txn.record_write(WriteSetEntry {
                    collection: self.name.clone(),
                    doc_id: id.to_string(),
                    old_head: head,
                    new_version,
                })?;
                return Ok(());
            }
        }
        Err(Error::Conflict(format!("delete of {}/{id} exceeded retry budget", self.name)))
    }

    pub fn find_by_id(&self, txn: &Transaction, id: &str, snapshots: &SnapshotManager) -> CResult<Option<Document>> {
        Ok(self.resolve_visible(txn, snapshots, id).and_then(|v| v.as_document().cloned()))
    }

    /// Lists every document currently visible to `txn`, ordered by id for a
    /// stable iteration order regardless of the concurrent map's internals.
    pub fn list(&self, txn: &Transaction, snapshots: &SnapshotManager) -> CResult<Vec<Document>> {
        let mut ids: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        let mut out = Vec::new();
        for id in ids {
            if let Some(doc) = self.resolve_visible(txn, snapshots, &id).and_then(|v| v.as_document().cloned()) {
                out.push(doc);
            }
        }
        Ok(out)
    }

    /// Equality lookup on `field`. Uses the index when one covers `field`,
    /// otherwise falls back to a full scan.
    pub fn find(&self, txn: &Transaction, field: &str, value: &Value, snapshots: &SnapshotManager) -> CResult<Vec<Document>> {
        let candidates: Option<Vec<String>> = {
            let index = self.index.read();
            index.as_ref().filter(|idx| idx.field == field).map(|idx| idx.lookup(value))
        };

        match candidates {
            Some(ids) => {
                let mut out = Vec::new();
                for id in ids {
                    if let Some(doc) = self.resolve_visible(txn, snapshots, &id).and_then(|v| v.as_document().cloned()) {
                        if doc.get(field) == Some(value) {
                            out.push(doc);
                        }
                    }
                }
                out.sort_by(|a, b| a.id.cmp(&b.id));
                Ok(out)
            }
            None => Ok(self
                .list(txn, snapshots)?
                .into_iter()
                .filter(|doc| doc.get(field) == Some(value))
                .collect()),
        }
    }

    /// Builds (or replaces) a single-field equality index by scanning every
    /// current head version, live or not yet committed — approximate but
    /// self-correcting as writes continue to call `index_add`/`index_swap`.
    pub fn ensure_index(&self, field: &str) {
        let index = Index::new(field.to_string());
        for entry in self.slots.iter() {
            if let Some(v) = entry.value().current() {
                if let Some(doc) = v.as_document() {
                    index.add(doc.get(field), &doc.id);
                }
            }
        }
        *self.index.write() = Some(index);
    }

    fn index_add(&self, doc: &Document) {
        let index = self.index.read();
        if let Some(index) = index.as_ref() {
            index.add(doc.get(&index.field), &doc.id);
        }
    }

    fn index_remove(&self, doc: &Document) {
        let index = self.index.read();
        if let Some(index) = index.as_ref() {
            index.remove(doc.get(&index.field), &doc.id);
        }
    }

    fn index_swap(&self, old_fields: &serde_json::Map<String, Value>, new_doc: &Document) {
        let index = self.index.read();
        if let Some(index) = index.as_ref() {
            index.remove(old_fields.get(&index.field), &new_doc.id);
            index.add(new_doc.get(&index.field), &new_doc.id);
        }
    }

    /// Persists one already-committed write to the log. Called by the
    /// database on transaction commit, never at write time, so an aborted
    /// transaction's versions never reach disk.
    pub(crate) fn persist_commit(&self, entry: &WriteSetEntry) -> CResult<()> {
        let record = VersionRecord::new(entry.doc_id.clone(), entry.new_version.timestamp, entry.new_version.txn_id, &entry.new_version.payload);
        self.log.lock().append(&record)?;
        Ok(())
    }

    pub(crate) fn sync_log(&self) -> CResult<()> {
        self.log.lock().sync()
    }

    /// Runs garbage collection across every document slot, returning the
    /// total number of versions trimmed.
    pub fn run_gc(&self, watermark: Option<crate::clock::Timestamp>) -> usize {
        let mut total = 0;
        for entry in self.slots.iter() {
            let head = entry.value().current();
            total += gc::collect(&head, watermark);
        }
        total
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::Clock;
    use crate::transaction::TransactionManager;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::tempdir;

    fn setup() -> (Collection, Clock, TransactionManager) {
        let dir = tempdir().unwrap();
        let collection = Collection::open("widgets".into(), dir.path().join("widgets.log")).unwrap();
        let clock = Clock::new();
        let txns = TransactionManager::new();
        (collection, clock, txns)
    }

    #[test]
    fn insert_then_find_by_id_within_same_txn() {
        let (collection, clock, txns) = setup();
        let txn = txns.begin(clock.new_txn_id(), &clock);
        let doc = Document::from_value(json!({"_id": "w1", "name": "sprocket"})).unwrap();
        collection.insert(&txn, doc, txns.snapshots(), &clock).unwrap();

        let found = collection.find_by_id(&txn, "w1", txns.snapshots()).unwrap();
        assert_eq!(found.unwrap().get("name"), Some(&json!("sprocket")));
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let (collection, clock, txns) = setup();
        let txn = txns.begin(clock.new_txn_id(), &clock);
        let doc = Document::from_value(json!({"_id": "w1"})).unwrap();
        collection.insert(&txn, doc.clone(), txns.snapshots(), &clock).unwrap();
        assert!(collection.insert(&txn, doc, txns.snapshots(), &clock).is_err());
    }

    #[test]
    fn uncommitted_insert_is_invisible_to_other_transactions() {
        let (collection, clock, txns) = setup();
        let writer = txns.begin(clock.new_txn_id(), &clock);
        let doc = Document::from_value(json!({"_id": "w1"})).unwrap();
        collection.insert(&writer, doc, txns.snapshots(), &clock).unwrap();

        let reader = txns.begin_read_only(clock.new_txn_id(), &clock);
        assert!(collection.find_by_id(&reader, "w1", txns.snapshots()).unwrap().is_none());

        txns.commit(&writer).unwrap();
        let reader2 = txns.begin_read_only(clock.new_txn_id(), &clock);
        assert!(collection.find_by_id(&reader2, "w1", txns.snapshots()).unwrap().is_some());
    }

    #[test]
    fn update_merges_fields_and_delete_hides_document() {
        let (collection, clock, txns) = setup();
        let txn = txns.begin(clock.new_txn_id(), &clock);
        let doc = Document::from_value(json!({"_id": "w1", "stock": 5})).unwrap();
        collection.insert(&txn, doc, txns.snapshots(), &clock).unwrap();

        let updates = json!({"stock": 3});
        let serde_json::Value::Object(updates) = updates else { unreachable!() };
        let updated = collection.update(&txn, "w1", &updates, txns.snapshots(), &clock).unwrap();
        assert_eq!(updated.get("stock"), Some(&json!(3)));

        collection.delete(&txn, "w1", txns.snapshots(), &clock).unwrap();
        assert!(collection.find_by_id(&txn, "w1", txns.snapshots()).unwrap().is_none());
    }

    #[test]
    fn find_uses_index_when_present() {
        let (collection, clock, txns) = setup();
        let txn = txns.begin(clock.new_txn_id(), &clock);
        for (id, color) in [("w1", "red"), ("w2", "blue"), ("w3", "red")] {
            let doc = Document::from_value(json!({"_id": id, "color": color})).unwrap();
            collection.insert(&txn, doc, txns.snapshots(), &clock).unwrap();
        }
        collection.ensure_index("color");

        let reds = collection.find(&txn, "color", &json!("red"), txns.snapshots()).unwrap();
        assert_eq!(reds.iter().map(|d| d.id.clone()).collect::<Vec<_>>(), vec!["w1", "w3"]);
    }
}
