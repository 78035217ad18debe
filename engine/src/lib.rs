//! `docstore-engine` is a multi-tenant, embedded document store: each
//! project gets its own isolated collection of JSON documents, versioned
//! under snapshot-isolated MVCC and persisted to an append-only log per
//! collection. Reads never block writes and writes never block reads —
//! every transaction works off an immutable version chain instead of a
//! shared lock.
//!
//! ## Getting started
//!
//! ```
//! use docstore_engine::config::EngineConfig;
//! use docstore_engine::instance::InstanceManager;
//! use docstore_engine::document::Document;
//! use serde_json::json;
//!
//! # fn main() -> docstore_engine::error::CResult<()> {
//! let dir = tempfile::tempdir().unwrap();
//! // `acquire` spawns the instance's background GC loop via `tokio::spawn`,
//! // so it needs a runtime in scope even though nothing here is async.
//! let rt = tokio::runtime::Runtime::new().unwrap();
//! let _guard = rt.enter();
//! let instances = InstanceManager::new(dir.path(), EngineConfig::default());
//! let lease = instances.acquire("acme-corp")?;
//! let db = lease.database();
//!
//! db.create_collection("widgets")?;
//! let txn = db.begin_transaction();
//! db.insert_document(&txn, "widgets", Document::from_value(json!({"_id": "w1", "stock": 5}))?)?;
//! db.commit(&txn)?;
//!
//! let reader = db.begin_read_only();
//! let found = db.find_document(&reader, "widgets", "w1")?.unwrap();
//! assert_eq!(found.get("stock"), Some(&json!(5)));
//! # Ok(())
//! # }
//! ```

pub mod buffer_pool;
pub mod clock;
pub mod config;
pub mod database;
pub mod document;
pub mod error;
pub mod gc;
pub mod instance;
pub mod interface;
pub mod snapshot;
pub mod store;
pub mod telemetry;
pub mod transaction;
pub mod version;
