//! The external surface an adapter (HTTP handler, embedding application,
//! whatever sits on top) drives the engine through (component C11).
//!
//! This is a thin, synchronous-looking façade over [`InstanceManager`] and
//! [`Database`]: every call here acquires a lease, does one operation, and
//! lets the lease drop. Callers who need several operations inside one
//! transaction should acquire their own lease and talk to `Database`
//! directly instead of going through this trait per-call.

use serde_derive::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::document::Document;
use crate::error::CResult;
use crate::instance::InstanceManager;

/// A document as seen across the boundary: just its JSON value, `_id`
/// included. Kept separate from [`Document`] so the wire shape can evolve
/// independently of the internal representation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentDto(pub Value);

impl From<Document> for DocumentDto {
    fn from(doc: Document) -> Self {
        DocumentDto(doc.to_value())
    }
}

/// The operations every adapter needs, matching the engine's external
/// interface table one-for-one.
pub trait CoreApi {
    fn create_collection(&self, project: &str, collection: &str) -> CResult<()>;
    fn list_collections(&self, project: &str, prefix: Option<&str>) -> CResult<Vec<String>>;

    fn insert(&self, project: &str, collection: &str, document: Value) -> CResult<()>;
    fn get(&self, project: &str, collection: &str, id: &str) -> CResult<Option<DocumentDto>>;
    fn update(&self, project: &str, collection: &str, id: &str, updates: Map<String, Value>) -> CResult<DocumentDto>;
    fn delete(&self, project: &str, collection: &str, id: &str) -> CResult<()>;
    fn list(&self, project: &str, collection: &str) -> CResult<Vec<DocumentDto>>;
    fn find(&self, project: &str, collection: &str, field: &str, value: Value) -> CResult<Vec<DocumentDto>>;
    fn ensure_index(&self, project: &str, collection: &str, field: &str) -> CResult<()>;
}

/// The single-call, auto-committing implementation of [`CoreApi`]: every
/// method opens its own transaction, does the one operation, and commits or
/// rolls back before returning. Multi-operation transactions aren't
/// reachable through this trait by design (see module docs).
pub struct Engine {
    instances: InstanceManager,
}

impl Engine {
    pub fn new(instances: InstanceManager) -> Self {
        Self { instances }
    }
}

impl CoreApi for Engine {
    fn create_collection(&self, project: &str, collection: &str) -> CResult<()> {
        let lease = self.instances.acquire(project)?;
        lease.database().create_collection(collection)?;
        Ok(())
    }

    fn list_collections(&self, project: &str, prefix: Option<&str>) -> CResult<Vec<String>> {
        let lease = self.instances.acquire(project)?;
        Ok(match prefix {
            Some(prefix) => lease.database().list_collections_with_prefix(prefix),
            None => lease.database().list_collections(),
        })
    }

    fn insert(&self, project: &str, collection: &str, document: Value) -> CResult<()> {
        let lease = self.instances.acquire(project)?;
        let db = lease.database();
        let txn = db.begin_transaction();
        let doc = Document::from_value(document)?;
        match db.insert_document(&txn, collection, doc) {
            Ok(()) => db.commit(&txn),
            Err(err) => {
                db.rollback(&txn)?;
                Err(err)
            }
        }
    }

    fn get(&self, project: &str, collection: &str, id: &str) -> CResult<Option<DocumentDto>> {
        let lease = self.instances.acquire(project)?;
        let db = lease.database();
        let txn = db.begin_read_only();
        let result = db.find_document(&txn, collection, id)?;
        Ok(result.map(DocumentDto::from))
    }

    fn update(&self, project: &str, collection: &str, id: &str, updates: Map<String, Value>) -> CResult<DocumentDto> {
        let lease = self.instances.acquire(project)?;
        let db = lease.database();
        let txn = db.begin_transaction();
        match db.update_document(&txn, collection, id, &updates) {
            Ok(doc) => {
                db.commit(&txn)?;
                Ok(DocumentDto::from(doc))
            }
            Err(err) => {
                db.rollback(&txn)?;
                Err(err)
            }
        }
    }

    fn delete(&self, project: &str, collection: &str, id: &str) -> CResult<()> {
        let lease = self.instances.acquire(project)?;
        let db = lease.database();
        let txn = db.begin_transaction();
        match db.delete_document(&txn, collection, id) {
            Ok(()) => db.commit(&txn),
            Err(err) => {
                db.rollback(&txn)?;
                Err(err)
            }
        }
    }

    fn list(&self, project: &str, collection: &str) -> CResult<Vec<DocumentDto>> {
        let lease = self.instances.acquire(project)?;
        let db = lease.database();
        let txn = db.begin_read_only();
        Ok(db.list_documents(&txn, collection)?.into_iter().map(DocumentDto::from).collect())
    }

    fn find(&self, project: &str, collection: &str, field: &str, value: Value) -> CResult<Vec<DocumentDto>> {
        let lease = self.instances.acquire(project)?;
        let db = lease.database();
        let txn = db.begin_read_only();
        Ok(db.find_documents(&txn, collection, field, &value)?.into_iter().map(DocumentDto::from).collect())
    }

    fn ensure_index(&self, project: &str, collection: &str, field: &str) -> CResult<()> {
        let lease = self.instances.acquire(project)?;
        lease.database().ensure_index(collection, field)
    }
}
