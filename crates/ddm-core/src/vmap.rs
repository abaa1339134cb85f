//! Concurrency-safe keyed map with ordered range iteration.
//!
//! Generalizes the `RwLock<HashMap<_, _>>` pattern already used by
//! [`crate::control::JobControl`] to the places the engine and manager need
//! ordered iteration over a key range — the `Item` part map (keyed by initial
//! byte offset) and, eventually, the `Manager` item registry (keyed by hash).

use std::collections::BTreeMap;
use std::ops::RangeBounds;
use std::sync::RwLock;

/// `RwLock<BTreeMap<K, V>>` with the handful of operations callers need,
/// so call sites don't reach into the lock directly.
#[derive(Debug, Default)]
pub struct VMap<K, V> {
    inner: RwLock<BTreeMap<K, V>>,
}

impl<K, V> VMap<K, V>
where
    K: Ord + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn from_map(map: BTreeMap<K, V>) -> Self {
        Self {
            inner: RwLock::new(map),
        }
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.inner.write().unwrap().insert(key, value)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.write().unwrap().remove(key)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.read().unwrap().get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.read().unwrap().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mutate the value at `key` in place under the write lock. No-op if absent.
    pub fn update<F: FnOnce(&mut V)>(&self, key: &K, f: F) -> bool {
        let mut guard = self.inner.write().unwrap();
        if let Some(v) = guard.get_mut(key) {
            f(v);
            true
        } else {
            false
        }
    }

    /// Snapshot of every entry, in key order.
    pub fn snapshot(&self) -> Vec<(K, V)> {
        self.inner
            .read()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Snapshot of entries whose keys fall within `range`, in key order.
    /// Used to find the part covering a given offset, or all parts past a cut point.
    pub fn range_snapshot<R: RangeBounds<K>>(&self, range: R) -> Vec<(K, V)> {
        self.inner
            .read()
            .unwrap()
            .range(range)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Replace the whole map at once (used when restoring a persisted manifest).
    pub fn replace_all(&self, map: BTreeMap<K, V>) {
        *self.inner.write().unwrap() = map;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let m: VMap<u64, &str> = VMap::new();
        assert!(m.insert(10, "a").is_none());
        assert_eq!(m.get(&10), Some("a"));
        assert_eq!(m.remove(&10), Some("a"));
        assert_eq!(m.get(&10), None);
    }

    #[test]
    fn range_snapshot_is_ordered() {
        let m: VMap<u64, &str> = VMap::new();
        m.insert(30, "c");
        m.insert(10, "a");
        m.insert(20, "b");
        let all: Vec<_> = m.range_snapshot(..).into_iter().map(|(k, _)| k).collect();
        assert_eq!(all, vec![10, 20, 30]);

        let tail: Vec<_> = m.range_snapshot(15..).into_iter().map(|(k, _)| k).collect();
        assert_eq!(tail, vec![20, 30]);
    }

    #[test]
    fn update_mutates_in_place() {
        let m: VMap<u64, u64> = VMap::new();
        m.insert(1, 100);
        assert!(m.update(&1, |v| *v += 1));
        assert_eq!(m.get(&1), Some(101));
        assert!(!m.update(&2, |v| *v += 1));
    }

    #[test]
    fn concurrent_inserts() {
        use std::sync::Arc;
        use std::thread;
        let m: Arc<VMap<u64, u64>> = Arc::new(VMap::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let m = Arc::clone(&m);
            handles.push(thread::spawn(move || {
                m.insert(i, i * 10);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(m.len(), 8);
    }
}
