//! Fixed-capacity set with LRU eviction when full.

use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;

/// A set of up to `capacity` distinct elements; inserting beyond capacity
/// evicts the least-recently-touched element.
pub struct BoundedSet<T: Hash + Eq> {
    inner: LruCache<T, ()>,
}

impl<T: Hash + Eq> BoundedSet<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            inner: LruCache::new(capacity),
        }
    }

    /// Insert `value`, returning `true` if it was newly added.
    pub fn add(&mut self, value: T) -> bool {
        let already_present = self.inner.contains(&value);
        self.inner.put(value, ());
        !already_present
    }

    pub fn has(&mut self, value: &T) -> bool {
        self.inner.get(value).is_some()
    }

    pub fn delete(&mut self, value: &T) -> bool {
        self.inner.pop(value).is_some()
    }

    pub fn size(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_reports_newly_inserted() {
        let mut set = BoundedSet::new(10);
        assert!(set.add("a"));
        assert!(!set.add("a"));
        assert_eq!(set.size(), 1);
    }

    #[test]
    fn evicts_lru_when_full() {
        let mut set = BoundedSet::new(2);
        set.add("a");
        set.add("b");
        set.has(&"a"); // touch a so b becomes the LRU victim
        set.add("c");
        assert!(set.has(&"a"));
        assert!(!set.has(&"b"));
        assert!(set.has(&"c"));
    }

    #[test]
    fn delete_removes_member() {
        let mut set = BoundedSet::new(10);
        set.add("a");
        assert!(set.delete(&"a"));
        assert!(!set.has(&"a"));
    }
}
