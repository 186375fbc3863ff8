//! Membership set over the last N inserted elements.  Thread-safe.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::ring_buffer::RingBuffer;

/// Holds the "last N" elements put into it; older elements fall out as
/// new ones arrive.  Duplicate insertions are reference-counted so an
/// element stays queryable as long as any of its insertions is within
/// the window.
pub struct LastNSet<T: Ord + Clone> {
    inner: Mutex<Inner<T>>,
}

struct Inner<T: Ord + Clone> {
    ring: RingBuffer<T>,
    counts: BTreeMap<T, u32>,
}

impl<T: Ord + Clone> LastNSet<T> {
    pub fn new(n: usize) -> LastNSet<T> {
        LastNSet {
            inner: Mutex::new(Inner {
                ring: RingBuffer::new(n),
                counts: BTreeMap::new(),
            }),
        }
    }

    /// Is the element within the last-N window?
    pub fn query(&self, elem: &T) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.counts.contains_key(elem)
    }

    pub fn insert(&self, elem: T) {
        let mut inner = self.inner.lock().unwrap();

        if inner.ring.has_rolled_over() {
            // A missing eviction entry is tolerated rather than assumed.
            if let Some(evicted) = inner.ring.next_to_evict().cloned() {
                if let Some(count) = inner.counts.get_mut(&evicted) {
                    *count -= 1;
                    if *count == 0 {
                        inner.counts.remove(&evicted);
                    }
                }
            }
        }

        inner.ring.push_back(elem.clone());
        *inner.counts.entry(elem).or_insert(0) += 1;
    }
}
