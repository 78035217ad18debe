//! Timestamp and transaction id allocation (component C2).
//!
//! A single 64-bit counter per [`Database`](crate::database::Database),
//! seeded from wall-clock nanoseconds at open and advanced purely by atomic
//! increment. A second, independent counter allocates transaction ids the
//! same way.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub type Timestamp = u64;
pub type TxnId = u64;

/// Monotonic timestamp/txn-id source shared by every collection in a
/// database. Cheap to clone (it's an `Arc` target in practice); cheap to
/// call concurrently (a single `fetch_add` per call, no locking).
pub struct Clock {
    timestamp: AtomicU64,
    txn_id: AtomicU64,
}

impl Clock {
    /// Seeds both counters from the current wall-clock time so that
    /// timestamps trend upward across process restarts too.
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1);
        Self { timestamp: AtomicU64::new(seed), txn_id: AtomicU64::new(0) }
    }

    /// Returns a fresh, strictly-greater-than-any-prior timestamp.
    pub fn new_timestamp(&self) -> Timestamp {
        self.timestamp.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the latest issued timestamp without advancing the counter.
    pub fn current_timestamp(&self) -> Timestamp {
        self.timestamp.load(Ordering::SeqCst)
    }

    /// Returns a fresh, strictly-greater-than-any-prior transaction id.
    pub fn new_txn_id(&self) -> TxnId {
        self.txn_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the latest issued transaction id without advancing it.
    pub fn current_txn_id(&self) -> TxnId {
        self.txn_id.load(Ordering::SeqCst)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn timestamps_are_strictly_increasing() {
        let clock = Clock::new();
        let a = clock.new_timestamp();
        let b = clock.new_timestamp();
        assert!(b > a);
        assert_eq!(clock.current_timestamp(), b);
    }

    #[test]
    fn concurrent_calls_never_collide() {
        let clock = Arc::new(Clock::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let clock = clock.clone();
            handles.push(thread::spawn(move || {
                (0..200).map(|_| clock.new_timestamp()).collect::<Vec<_>>()
            }));
        }

        let mut seen = HashSet::new();
        for h in handles {
            for ts in h.join().unwrap() {
                assert!(seen.insert(ts), "duplicate timestamp {ts}");
            }
        }
        assert_eq!(seen.len(), 16 * 200);
        assert!(seen.into_iter().max().unwrap() <= clock.current_timestamp());
    }
}
