//! Transactions: write-sets, commit/rollback, and read-your-own-writes
//! (component C5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::TxnId;
use crate::error::{CResult, Error};
use crate::snapshot::{Isolation, Snapshot, SnapshotManager};
use crate::version::Version;

/// One entry recorded when a transaction writes a document: the collection
/// name and document id it touched, plus the chain head it observed *before*
/// its write, so a rollback can CAS the head back.
#[derive(Clone)]
pub(crate) struct WriteSetEntry {
    pub collection: String,
    pub doc_id: String,
    pub old_head: Option<Arc<Version>>,
    pub new_version: Arc<Version>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TxnState {
    Active,
    Committed,
    Aborted,
}

struct TransactionInner {
    txn_id: TxnId,
    read_only: bool,
    snapshot: Snapshot,
    write_set: Mutex<Vec<WriteSetEntry>>,
    state: Mutex<TxnState>,
    finalized: AtomicBool,
}

/// A handle to one in-flight (or just-finalized) transaction. Cloning is
/// cheap and shares the same underlying state — callers hand clones to
/// concurrent collection operations within the same transaction.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    fn new(txn_id: TxnId, read_only: bool, snapshot: Snapshot) -> Self {
        Self {
            inner: Arc::new(TransactionInner {
                txn_id,
                read_only,
                snapshot,
                write_set: Mutex::new(Vec::new()),
                state: Mutex::new(TxnState::Active),
                finalized: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> TxnId {
        self.inner.txn_id
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.inner.snapshot
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    pub fn is_active(&self) -> bool {
        *self.inner.state.lock() == TxnState::Active
    }

    pub(crate) fn record_write(&self, entry: WriteSetEntry) -> CResult<()> {
        if self.inner.read_only {
            return Err(Error::InvalidArgument("cannot write in a read-only transaction".into()));
        }
        if !self.is_active() {
            return Err(Error::Closed("transaction is no longer active".into()));
        }
        self.inner.write_set.lock().push(entry);
        Ok(())
    }

    /// Returns this transaction's own version of `(collection, doc_id)` if
    /// it wrote one, newest write last. Checked before any chain walk so a
    /// transaction always sees its own writes regardless of snapshot
    /// timestamp ordering.
    pub(crate) fn own_write_version(&self, collection: &str, doc_id: &str) -> Option<Arc<Version>> {
        self.inner
            .write_set
            .lock()
            .iter()
            .rev()
            .find(|e| e.collection == collection && e.doc_id == doc_id)
            .map(|e| e.new_version.clone())
    }

    fn take_write_set(&self) -> Vec<WriteSetEntry> {
        std::mem::take(&mut self.inner.write_set.lock())
    }

    /// Clones the write-set without draining it. Used by the database to
    /// persist each entry before finalizing the commit.
    pub(crate) fn write_set_snapshot(&self) -> Vec<WriteSetEntry> {
        self.inner.write_set.lock().clone()
    }
}

/// Owns the snapshot manager and drives begin/commit/rollback. Collections
/// call back into `SnapshotManager` through the transaction manager rather
/// than directly, so commit/abort bookkeeping stays in one place.
pub struct TransactionManager {
    snapshots: SnapshotManager,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self { snapshots: SnapshotManager::new() }
    }

    pub fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    pub fn begin(&self, txn_id: TxnId, clock: &crate::clock::Clock) -> Transaction {
        self.begin_with_isolation(txn_id, Isolation::ReadCommitted, clock)
    }

    pub fn begin_read_only(&self, txn_id: TxnId, clock: &crate::clock::Clock) -> Transaction {
        let snapshot = self.snapshots.begin_snapshot(txn_id, Isolation::ReadCommitted, clock);
        Transaction::new(txn_id, true, snapshot)
    }

    /// Opens a read-write transaction under an explicit isolation level.
    /// `RepeatableRead` and `Serializable` currently resolve to the same
    /// visibility mechanism as `ReadCommitted`; see [`Isolation`].
    pub fn begin_with_isolation(&self, txn_id: TxnId, isolation: Isolation, clock: &crate::clock::Clock) -> Transaction {
        let snapshot = self.snapshots.begin_snapshot(txn_id, isolation, clock);
        Transaction::new(txn_id, false, snapshot)
    }

    /// Opens a read-only transaction that sees dirty (uncommitted, and even
    /// since-aborted) writes in addition to committed ones.
    pub fn begin_read_uncommitted(&self, txn_id: TxnId, clock: &crate::clock::Clock) -> Transaction {
        let snapshot = self.snapshots.begin_snapshot(txn_id, Isolation::ReadUncommitted, clock);
        Transaction::new(txn_id, true, snapshot)
    }

    /// Marks the transaction committed. The write-set is only needed for a
    /// rollback, so commit just drains it and lets it drop.
    pub fn commit(&self, txn: &Transaction) -> CResult<()> {
        let mut state = txn.inner.state.lock();
        if *state != TxnState::Active {
            return Err(Error::Closed("transaction already finalized".into()));
        }
        if txn.inner.finalized.swap(true, Ordering::SeqCst) {
            return Err(Error::Closed("transaction already finalized".into()));
        }
        *state = TxnState::Committed;
        drop(state);
        self.snapshots.commit_transaction(txn.inner.txn_id, &txn.inner.snapshot);
        txn.take_write_set();
        Ok(())
    }

    /// Marks the transaction aborted and CASes every chain head it touched
    /// back to the value observed before the write, newest writes undone
    /// first (in case two entries in the write-set target the same id).
    pub fn rollback(&self, txn: &Transaction, heads: &HashMap<(String, String), Arc<crate::store::collection::DocSlot>>) -> CResult<()> {
        let mut state = txn.inner.state.lock();
        if *state != TxnState::Active {
            return Err(Error::Closed("transaction already finalized".into()));
        }
        if txn.inner.finalized.swap(true, Ordering::SeqCst) {
            return Err(Error::Closed("transaction already finalized".into()));
        }
        *state = TxnState::Aborted;
        drop(state);

        let mut write_set = txn.take_write_set();
        write_set.reverse();
        for entry in write_set {
            if let Some(slot) = heads.get(&(entry.collection.clone(), entry.doc_id.clone())) {
                slot.restore_if_current(&entry.new_version, entry.old_head.clone());
            }
        }

        self.snapshots.abort_transaction(txn.inner.txn_id, &txn.inner.snapshot);
        Ok(())
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
