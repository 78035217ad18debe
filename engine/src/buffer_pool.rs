//! A process-wide pool of reusable byte buffers (component C10).
//!
//! Encoding a version for the on-disk log needs a scratch `Vec<u8>`; rather
//! than allocate one per write, collections borrow one from here and return
//! it when done. There's nothing collection- or database-specific about the
//! buffers themselves, so one pool serves the whole process.

use once_cell::sync::Lazy;
use parking_lot::Mutex;

const MAX_POOLED_BUFFERS: usize = 256;

static POOL: Lazy<Mutex<Vec<Vec<u8>>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Borrows a cleared buffer from the pool, allocating a new one if the pool
/// is empty.
pub fn get() -> Vec<u8> {
    POOL.lock().pop().unwrap_or_default()
}

/// Returns a buffer to the pool for reuse. Buffers beyond the pool's cap are
/// just dropped rather than held onto indefinitely.
pub fn put(mut buf: Vec<u8>) {
    buf.clear();
    let mut pool = POOL.lock();
    if pool.len() < MAX_POOLED_BUFFERS {
        pool.push(buf);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serial_test::serial;

    // Serialized: both tests observe the same process-global pool.
    #[test]
    #[serial]
    fn buffers_are_cleared_on_return() {
        let mut buf = get();
        buf.extend_from_slice(b"hello");
        put(buf);

        let buf = get();
        assert!(buf.is_empty());
    }

    #[test]
    #[serial]
    fn buffers_beyond_the_cap_are_not_retained() {
        for _ in 0..MAX_POOLED_BUFFERS + 8 {
            put(Vec::new());
        }
        let mut drained = 0;
        while !POOL.lock().is_empty() {
            POOL.lock().pop();
            drained += 1;
        }
        assert_eq!(drained, MAX_POOLED_BUFFERS);
    }
}
