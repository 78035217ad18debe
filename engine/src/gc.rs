//! Version-chain garbage collection (component C4).
//!
//! Trims the tail of a document's version chain once no live snapshot can
//! possibly still need it. The chain head is never removed, even if it's
//! older than every active snapshot — removing the head would make the
//! document briefly invisible to new readers, which visibility rules never
//! allow.

use std::sync::Arc;

use crate::clock::Timestamp;
use crate::version::Version;

/// Walks the chain starting at `head` and detaches every version beyond the
/// newest one whose timestamp is `<= watermark`, where `watermark` is the
/// oldest timestamp any still-active snapshot depends on (or `None`, meaning
/// no snapshot is active and everything but the head may be dropped).
///
/// Returns the number of versions actually detached. Never removes `head`
/// itself, matching the spec's instruction that the newest version is
/// always kept regardless of age.
pub fn collect(head: &Option<Arc<Version>>, watermark: Option<Timestamp>) -> usize {
    let Some(head) = head else { return 0 };

    let mut prev = head.clone();
    let mut cur = prev.next();
    let mut kept_one_boundary_version = false;
    let mut removed = 0usize;

    while let Some(v) = cur {
        let is_needed_boundary = match watermark {
            Some(wm) => v.timestamp <= wm && !kept_one_boundary_version,
            None => false,
        };

        if is_needed_boundary {
            // This is the newest version at-or-below the watermark: some
            // active snapshot may still resolve to exactly this node, so it
            // (and only it) survives; everything after it does not.
            kept_one_boundary_version = true;
            prev = v.clone();
            cur = v.next();
            continue;
        }

        if watermark.map_or(true, |wm| v.timestamp <= wm) {
            // Either no snapshot needs anything this old, or we already
            // kept the one boundary version upstream: drop the rest of the
            // tail in one shot and stop walking.
            prev.set_next(None);
            removed += count_chain(&v.next());
            removed += 1;
            break;
        }

        prev = v.clone();
        cur = v.next();
    }

    removed
}

fn count_chain(head: &Option<Arc<Version>>) -> usize {
    let mut n = 0;
    let mut cur = head.clone();
    while let Some(v) = cur {
        n += 1;
        cur = v.next();
    }
    n
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::Clock;
    use crate::document::Document;
    use crate::version::Payload;

    fn live(clock: &Clock, txn: u64, next: Option<Arc<Version>>) -> Arc<Version> {
        Version::create(Payload::Live(Document::new("a")), txn, clock, next)
    }

    #[test]
    fn keeps_head_even_when_watermark_is_none() {
        let clock = Clock::new();
        let v1 = live(&clock, 1, None);
        let v2 = live(&clock, 2, Some(v1));
        let head = Some(v2.clone());

        let removed = collect(&head, None);
        assert_eq!(removed, 1);
        assert!(v2.next().is_none());
    }

    #[test]
    fn keeps_one_version_at_or_below_watermark() {
        let clock = Clock::new();
        let v1 = live(&clock, 1, None);
        let v2 = live(&clock, 2, Some(v1.clone()));
        let v3 = live(&clock, 3, Some(v2.clone()));
        let head = Some(v3.clone());

        let removed = collect(&head, Some(v2.timestamp));
        assert_eq!(removed, 1);
        assert_eq!(v3.next().unwrap().txn_id, v2.txn_id);
        assert!(v3.next().unwrap().next().is_none());
    }

    #[test]
    fn no_op_when_nothing_is_old_enough() {
        let clock = Clock::new();
        let v1 = live(&clock, 1, None);
        let v2 = live(&clock, 2, Some(v1.clone()));
        let head = Some(v2.clone());

        let removed = collect(&head, Some(0));
        assert_eq!(removed, 0);
        assert!(v2.next().is_some());
    }
}
