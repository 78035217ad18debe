//! Per-document version chains (component C1).
//!
//! A document's history is a singly-linked, newest-first chain of immutable
//! [`Version`] nodes. Writers never mutate a node's payload once published;
//! they only ever attach a new head in front of the chain (see
//! `store::collection` for the compare-and-set loop that does the
//! attaching) or trim the tail (see [`crate::gc`]).

use std::sync::Arc;

use parking_lot::RwLock;

use crate::clock::{Clock, Timestamp, TxnId};
use crate::document::Document;

/// The payload carried by a version: either a live document body or a
/// tombstone recording that the document was deleted by `txn_id`.
#[derive(Clone, Debug)]
pub enum Payload {
    Live(Document),
    Tombstone,
}

/// One immutable node in a document's version chain.
///
/// `next` is the only mutable field, and it only ever moves forward
/// (towards older versions being trimmed away by GC) or is read; nothing
/// ever rewrites a version's `timestamp`, `txn_id`, or `payload` after
/// construction.
pub struct Version {
    pub timestamp: Timestamp,
    pub txn_id: TxnId,
    pub payload: Payload,
    next: RwLock<Option<Arc<Version>>>,
}

impl Version {
    /// Builds a new version stamped with a fresh timestamp from `clock`,
    /// linking it in front of `next`.
    pub fn create(payload: Payload, txn_id: TxnId, clock: &Clock, next: Option<Arc<Version>>) -> Arc<Version> {
        Arc::new(Version {
            timestamp: clock.new_timestamp(),
            txn_id,
            payload,
            next: RwLock::new(next),
        })
    }

    /// Reconstructs a version with an already-known timestamp/txn_id,
    /// bypassing the clock. Only used when replaying a collection's log at
    /// open, where the timestamps are the ones already committed to disk.
    pub(crate) fn from_parts(timestamp: Timestamp, txn_id: TxnId, payload: Payload, next: Option<Arc<Version>>) -> Arc<Version> {
        Arc::new(Version { timestamp, txn_id, payload, next: RwLock::new(next) })
    }

    pub fn next(&self) -> Option<Arc<Version>> {
        self.next.read().clone()
    }

    /// Detaches the tail beyond this node. Only ever called by GC, which
    /// holds the collection-wide guarantee that no live snapshot can still
    /// be walking past this node.
    pub(crate) fn set_next(&self, next: Option<Arc<Version>>) {
        *self.next.write() = next;
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self.payload, Payload::Tombstone)
    }

    pub fn as_document(&self) -> Option<&Document> {
        match &self.payload {
            Payload::Live(doc) => Some(doc),
            Payload::Tombstone => None,
        }
    }
}

impl std::fmt::Debug for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Version")
            .field("timestamp", &self.timestamp)
            .field("txn_id", &self.txn_id)
            .field("is_tombstone", &self.is_tombstone())
            .finish()
    }
}

/// Walks `head` looking for the newest version visible under `is_visible`.
/// Visibility rules live on `Snapshot`; this just walks the chain and
/// short-circuits on the first hit, since the chain is newest-first.
pub fn find_visible<F>(head: &Option<Arc<Version>>, is_visible: F) -> Option<Arc<Version>>
where
    F: Fn(&Version) -> bool,
{
    let mut cur = head.clone();
    while let Some(v) = cur {
        if is_visible(&v) {
            return Some(v);
        }
        cur = v.next();
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::document::Document;

    #[test]
    fn chain_links_newest_first() {
        let clock = Clock::new();
        let v1 = Version::create(Payload::Live(Document::new("a")), 1, &clock, None);
        let v2 = Version::create(Payload::Live(Document::new("a")), 2, &clock, Some(v1.clone()));
        assert!(v2.timestamp > v1.timestamp);
        assert_eq!(v2.next().unwrap().txn_id, v1.txn_id);
        assert!(v2.next().unwrap().next().is_none());
    }

    #[test]
    fn find_visible_returns_first_matching_newest_first() {
        let clock = Clock::new();
        let v1 = Version::create(Payload::Live(Document::new("a")), 1, &clock, None);
        let v2 = Version::create(Payload::Tombstone, 2, &clock, Some(v1.clone()));
        let head = Some(v2.clone());

        let found = find_visible(&head, |v| !v.is_tombstone());
        assert_eq!(found.unwrap().txn_id, v1.txn_id);

        let found_any = find_visible(&head, |_| true);
        assert_eq!(found_any.unwrap().txn_id, v2.txn_id);
    }

    #[test]
    fn set_next_trims_tail() {
        let clock = Clock::new();
        let v1 = Version::create(Payload::Live(Document::new("a")), 1, &clock, None);
        let v2 = Version::create(Payload::Live(Document::new("a")), 2, &clock, Some(v1));
        v2.set_next(None);
        assert!(v2.next().is_none());
    }
}
