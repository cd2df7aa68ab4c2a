//! Capacity-bounded map with least-recently-used eviction.
//!
//! Entries live in a vector threaded by a doubly linked recency list, with an
//! `ahash` index from key to slot. `set`, `get` and `get_mut` move the touched
//! entry to the most-recently-used end; `peek` and `contains_key` do not.
//! `oldest` and `newest` read the list ends directly.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;

use ahash::AHashMap;

use crate::error::CapacityError;

struct Entry<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// A bounded map that evicts its least-recently-used entry when full.
pub struct LruMap<K, V> {
    index: AHashMap<K, usize>,
    entries: Vec<Entry<K, V>>,
    // least recently used
    head: Option<usize>,
    // most recently used
    tail: Option<usize>,
    capacity: usize,
}

impl<K, V> LruMap<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Creates an empty map holding at most `max_size` entries.
    pub fn new(max_size: usize) -> Result<Self, CapacityError> {
        if max_size == 0 {
            return Err(CapacityError::new(max_size));
        }
        Ok(Self {
            index: AHashMap::default(),
            entries: Vec::new(),
            head: None,
            tail: None,
            capacity: max_size,
        })
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts or updates `key`, making it the most recently used entry.
    ///
    /// Returns the least-recently-used entry if the insert evicted one. An
    /// update of an existing key never evicts and returns `None`; use
    /// [`LruMap::get_mut`] to swap a value and keep the old one.
    pub fn set(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.index.get(&key) {
            self.entries[idx].value = value;
            self.touch(idx);
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.pop_oldest()
        } else {
            None
        };

        let idx = self.entries.len();
        self.entries.push(Entry {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        });
        self.link_back(idx);
        self.index.insert(key, idx);
        evicted
    }

    /// Looks up `key` and promotes it to most recently used.
    pub fn get<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.index.get(key)?;
        self.touch(idx);
        Some(&self.entries[idx].value)
    }

    /// Mutable lookup; promotes `key` like [`LruMap::get`].
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = *self.index.get(key)?;
        self.touch(idx);
        Some(&mut self.entries[idx].value)
    }

    /// Looks up `key` without changing the eviction order.
    pub fn peek<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.get(key).map(|&idx| &self.entries[idx].value)
    }

    /// Returns `true` if `key` is present. Does not promote.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.index.contains_key(key)
    }

    /// Removes `key`, returning its value.
    pub fn remove<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let idx = self.index.remove(key)?;
        let (_, value) = self.remove_at(idx);
        Some(value)
    }

    /// Removes `key`, returning whether it was present.
    pub fn delete<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.remove(key).is_some()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.index.clear();
        self.entries.clear();
        self.head = None;
        self.tail = None;
    }

    /// The next eviction candidate.
    pub fn oldest(&self) -> Option<(&K, &V)> {
        self.head.map(|idx| self.pair(idx))
    }

    /// The most recently set or read entry.
    pub fn newest(&self) -> Option<(&K, &V)> {
        self.tail.map(|idx| self.pair(idx))
    }

    /// Removes and returns the least recently used entry.
    pub fn pop_oldest(&mut self) -> Option<(K, V)> {
        let idx = self.head?;
        let (key, value) = self.remove_at(idx);
        self.index.remove(&key);
        Some((key, value))
    }

    /// Iterates from least to most recently used without promoting.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            map: self,
            cursor: self.head,
            remaining: self.entries.len(),
        }
    }

    /// Keys from least to most recently used.
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    fn pair(&self, idx: usize) -> (&K, &V) {
        let entry = &self.entries[idx];
        (&entry.key, &entry.value)
    }

    fn touch(&mut self, idx: usize) {
        if self.tail != Some(idx) {
            self.unlink(idx);
            self.link_back(idx);
        }
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let entry = &self.entries[idx];
            (entry.prev, entry.next)
        };
        match prev {
            Some(p) => self.entries[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.entries[n].prev = prev,
            None => self.tail = prev,
        }
        let entry = &mut self.entries[idx];
        entry.prev = None;
        entry.next = None;
    }

    fn link_back(&mut self, idx: usize) {
        let old_tail = self.tail;
        {
            let entry = &mut self.entries[idx];
            entry.prev = old_tail;
            entry.next = None;
        }
        match old_tail {
            Some(t) => self.entries[t].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    // Unlinks and swap-removes the slot. The index entry for the removed key
    // is the caller's responsibility; the moved entry is re-pointed here.
    fn remove_at(&mut self, idx: usize) -> (K, V) {
        self.unlink(idx);
        let last = self.entries.len() - 1;
        let entry = self.entries.swap_remove(idx);
        if idx != last {
            self.relocated(idx);
        }
        (entry.key, entry.value)
    }

    fn relocated(&mut self, to: usize) {
        let (prev, next) = {
            let entry = &self.entries[to];
            (entry.prev, entry.next)
        };
        match prev {
            Some(p) => self.entries[p].next = Some(to),
            None => self.head = Some(to),
        }
        match next {
            Some(n) => self.entries[n].prev = Some(to),
            None => self.tail = Some(to),
        }
        if let Some(slot) = self.index.get_mut(&self.entries[to].key) {
            *slot = to;
        }
    }
}

impl<K, V> fmt::Debug for LruMap<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Iterator over an [`LruMap`], least recently used first.
pub struct Iter<'a, K, V> {
    map: &'a LruMap<K, V>,
    cursor: Option<usize>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.cursor?;
        let entry = &self.map.entries[idx];
        self.cursor = entry.next;
        self.remaining -= 1;
        Some((&entry.key, &entry.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(LruMap::<&str, u32>::new(0).is_err());
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut map = LruMap::new(2).unwrap();
        map.set("a", 1);
        map.set("b", 2);
        assert_eq!(map.set("c", 3), Some(("a", 1)));

        assert_eq!(map.get("a"), None);
        assert_eq!(map.get("b"), Some(&2));
        assert_eq!(map.get("c"), Some(&3));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn get_promotes_entry() {
        let mut map = LruMap::new(2).unwrap();
        map.set("a", 1);
        map.set("b", 2);
        map.get("a");
        map.set("c", 3);

        assert_eq!(map.get("b"), None);
        assert_eq!(map.get("a"), Some(&1));
        assert_eq!(map.get("c"), Some(&3));
    }

    #[test]
    fn peek_does_not_promote() {
        let mut map = LruMap::new(2).unwrap();
        map.set("a", 1);
        map.set("b", 2);
        assert_eq!(map.peek("a"), Some(&1));
        map.set("c", 3);

        assert!(!map.contains_key("a"));
        assert!(map.contains_key("b"));
    }

    #[test]
    fn set_existing_key_overwrites_and_promotes() {
        let mut map = LruMap::new(2).unwrap();
        map.set("a", 1);
        map.set("b", 2);
        assert_eq!(map.set("a", 10), None);
        assert_eq!(map.peek("a"), Some(&10));
        map.set("c", 3);

        assert_eq!(map.peek("a"), Some(&10));
        assert_eq!(map.peek("b"), None);
    }

    #[test]
    fn oldest_and_newest_track_recency() {
        let mut map = LruMap::new(3).unwrap();
        assert_eq!(map.oldest(), None);
        assert_eq!(map.newest(), None);

        map.set("a", 1);
        map.set("b", 2);
        map.set("c", 3);
        assert_eq!(map.oldest(), Some((&"a", &1)));
        assert_eq!(map.newest(), Some((&"c", &3)));

        map.get("a");
        assert_eq!(map.oldest(), Some((&"b", &2)));
        assert_eq!(map.newest(), Some((&"a", &1)));
    }

    #[test]
    fn delete_and_clear() {
        let mut map = LruMap::new(3).unwrap();
        map.set("a", 1);
        map.set("b", 2);
        map.set("c", 3);

        assert!(map.delete("a"));
        assert!(!map.delete("a"));
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec!["b", "c"]);

        // removing a middle entry must keep the list intact after the slot move
        map.set("d", 4);
        assert_eq!(map.remove("c"), Some(3));
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec!["b", "d"]);
        assert_eq!(map.get("d"), Some(&4));
        assert_eq!(map.oldest(), Some((&"b", &2)));

        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.oldest(), None);
        map.set("e", 5);
        assert_eq!(map.newest(), Some((&"e", &5)));
    }

    #[test]
    fn get_mut_updates_in_place() {
        let mut map = LruMap::new(2).unwrap();
        map.set(String::from("hits"), 0u32);
        map.set(String::from("misses"), 0u32);
        if let Some(v) = map.get_mut("hits") {
            *v += 1;
        }
        assert_eq!(map.peek("hits"), Some(&1));
        assert_eq!(map.newest().map(|(k, _)| k.as_str()), Some("hits"));
    }

    proptest! {
        #[test]
        fn never_exceeds_capacity_and_keeps_newest(
            cap in 1usize..16,
            ops in proptest::collection::vec((0u8..32, any::<u16>()), 1..200),
        ) {
            let mut map = LruMap::new(cap).unwrap();
            for (k, v) in &ops {
                map.set(*k, *v);
                prop_assert!(map.len() <= cap);
            }
            let (last_key, last_value) = ops[ops.len() - 1];
            prop_assert_eq!(map.newest(), Some((&last_key, &last_value)));
            prop_assert_eq!(map.iter().count(), map.len());
        }
    }
}
