//! Snapshots and visibility rules (component C3).
//!
//! A snapshot pins a timestamp and the set of transactions that were still
//! active (uncommitted) at the moment it was taken. A version is visible to
//! a snapshot iff, in order:
//!
//! 1. it was written by the snapshot's own transaction (handled upstream by
//!    [`crate::transaction::Transaction::own_write_version`] consulting the
//!    write-set directly, since a txn's own later writes carry timestamps
//!    newer than `snapshot.timestamp` and would otherwise fail rule 2);
//! 2. its timestamp is `<= snapshot.timestamp`;
//! 3. under read-uncommitted, every version that passes rule 2 is visible,
//!    dirty writes included, and rules 4-5 never run;
//! 4. its writer was not active when the snapshot was taken, checked against
//!    the `active_at_start` set frozen at `begin_snapshot` (not a live
//!    lookup: a writer that commits after the snapshot started must stay
//!    invisible to it even though it's no longer active by the time of the
//!    read);
//! 5. its writer was not aborted;
//! 6. a tombstone is "visible" in the sense that it proves the document does
//!    not exist at that point; callers treat a visible tombstone as absence.
//!
//! `ReadCommitted`, `RepeatableRead`, and `Serializable` all share this same
//! mechanism end to end; the engine does not currently give the latter two
//! any stricter guarantee than read-committed provides.

use std::collections::{BTreeMap, HashSet};

use parking_lot::Mutex;

use crate::clock::{Clock, Timestamp, TxnId};
use crate::version::Version;

/// Isolation level a transaction was started under.
///
/// `RepeatableRead` and `Serializable` are accepted and carried through but
/// currently resolve to the same visibility mechanism as `ReadCommitted`;
/// stricter enforcement (range locks, write-skew detection) is not
/// implemented.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Isolation {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// A frozen view of "what was committed, and by whom, as of some instant".
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub timestamp: Timestamp,
    pub isolation: Isolation,
    active_at_start: HashSet<TxnId>,
}

impl Snapshot {
    /// Rules 2-6 above. Rule 1 (read-your-own-writes) is the caller's job.
    pub fn is_visible(&self, version: &Version, manager: &SnapshotManager) -> bool {
        if version.timestamp > self.timestamp {
            return false;
        }
        if self.isolation == Isolation::ReadUncommitted {
            return true;
        }
        if self.active_at_start.contains(&version.txn_id) {
            return false;
        }
        if manager.is_aborted(version.txn_id) {
            return false;
        }
        true
    }
}

struct SnapshotManagerState {
    active_snapshots: BTreeMap<Timestamp, usize>,
    active_txns: HashSet<TxnId>,
    aborted_txns: HashSet<TxnId>,
}

/// Tracks active snapshots (for GC's watermark) and the live active/aborted
/// transaction sets (for visibility and duplicate-id checks).
pub struct SnapshotManager {
    state: Mutex<SnapshotManagerState>,
}

impl SnapshotManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SnapshotManagerState {
                active_snapshots: BTreeMap::new(),
                active_txns: HashSet::new(),
                aborted_txns: HashSet::new(),
            }),
        }
    }

    /// Registers `txn_id` as active and returns a snapshot pinned at the
    /// clock's current timestamp (read-only transactions never advance the
    /// clock, they just observe it).
    pub fn begin_snapshot(&self, txn_id: TxnId, isolation: Isolation, clock: &Clock) -> Snapshot {
        let mut state = self.state.lock();
        let timestamp = clock.current_timestamp();
        *state.active_snapshots.entry(timestamp).or_insert(0) += 1;
        state.active_txns.insert(txn_id);
        Snapshot { timestamp, isolation, active_at_start: state.active_txns.clone() }
    }

    pub fn commit_transaction(&self, txn_id: TxnId, snapshot: &Snapshot) {
        let mut state = self.state.lock();
        state.active_txns.remove(&txn_id);
        release_snapshot_locked(&mut state, snapshot.timestamp);
    }

    pub fn abort_transaction(&self, txn_id: TxnId, snapshot: &Snapshot) {
        let mut state = self.state.lock();
        state.active_txns.remove(&txn_id);
        state.aborted_txns.insert(txn_id);
        release_snapshot_locked(&mut state, snapshot.timestamp);
    }

    /// Releases a read-only snapshot that never owned a write transaction.
    pub fn release_snapshot(&self, snapshot: &Snapshot) {
        let mut state = self.state.lock();
        release_snapshot_locked(&mut state, snapshot.timestamp);
    }

    pub fn is_active(&self, txn_id: TxnId) -> bool {
        self.state.lock().active_txns.contains(&txn_id)
    }

    pub fn is_aborted(&self, txn_id: TxnId) -> bool {
        self.state.lock().aborted_txns.contains(&txn_id)
    }

    /// The oldest timestamp any live snapshot still depends on, or `None` if
    /// there are no active snapshots — GC's low-water mark.
    pub fn oldest_active_snapshot_timestamp(&self) -> Option<Timestamp> {
        self.state.lock().active_snapshots.keys().next().copied()
    }
}

impl Default for SnapshotManager {
    fn default() -> Self {
        Self::new()
    }
}

fn release_snapshot_locked(state: &mut SnapshotManagerState, timestamp: Timestamp) {
    if let Some(count) = state.active_snapshots.get_mut(&timestamp) {
        *count -= 1;
        if *count == 0 {
            state.active_snapshots.remove(&timestamp);
        }
    }
}
