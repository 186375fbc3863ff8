//! Key/value map over the last N inserted keys.  Thread-safe.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::ring_buffer::RingBuffer;

struct Slot<V> {
    count: u32,
    value: V,
}

/// Maps the "last N" inserted keys to their most recent value.  A key
/// inserted more than once stays resident until all of its insertions
/// have left the window; lookups always see the latest value.
pub struct LastNMap<K: Ord + Clone, V: Clone> {
    inner: Mutex<Inner<K, V>>,
}

struct Inner<K: Ord + Clone, V: Clone> {
    ring: RingBuffer<K>,
    contents: BTreeMap<K, Slot<V>>,
}

impl<K: Ord + Clone, V: Clone> LastNMap<K, V> {
    pub fn new(n: usize) -> LastNMap<K, V> {
        LastNMap {
            inner: Mutex::new(Inner {
                ring: RingBuffer::new(n),
                contents: BTreeMap::new(),
            }),
        }
    }

    /// Latest value for `key`, if it is within the window.
    pub fn query(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock().unwrap();
        inner.contents.get(key).map(|slot| slot.value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock().unwrap();

        if inner.ring.has_rolled_over() {
            if let Some(evicted) = inner.ring.next_to_evict().cloned() {
                if let Some(slot) = inner.contents.get_mut(&evicted) {
                    slot.count -= 1;
                    if slot.count == 0 {
                        inner.contents.remove(&evicted);
                    }
                }
            }
        }

        inner.ring.push_back(key.clone());
        match inner.contents.get_mut(&key) {
            Some(slot) => {
                slot.count += 1;
                slot.value = value;
            }
            None => {
                inner.contents.insert(key, Slot { count: 1, value });
            }
        }
    }
}
