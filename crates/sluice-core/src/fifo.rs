//! Insertion-ordered map with O(1) amortized oldest-first eviction.
//!
//! A hash map holds `(sequence, value)` per key; a deque holds
//! `(sequence, key)` in insertion order. Removing or re-inserting a key leaves
//! a stale deque entry behind, recognised by its outdated sequence number and
//! skipped lazily. The deque is compacted once stale entries dominate.

use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone)]
struct Slot<V> {
    seq: u64,
    value: V,
}

#[derive(Debug, Clone)]
pub struct InsertionIndex<V> {
    entries: HashMap<String, Slot<V>>,
    order: VecDeque<(u64, String)>,
    next_seq: u64,
}

impl<V> Default for InsertionIndex<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> InsertionIndex<V> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            next_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key).map(|slot| &slot.value)
    }

    /// Mutate in place without changing the key's position.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.entries.get_mut(key).map(|slot| &mut slot.value)
    }

    /// Insert at the back. An existing key is replaced and moved to the back.
    pub fn insert(&mut self, key: String, value: V) -> Option<V> {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.push_back((seq, key.clone()));
        let previous = self.entries.insert(key, Slot { seq, value });
        self.maybe_compact();
        previous.map(|slot| slot.value)
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let removed = self.entries.remove(key).map(|slot| slot.value);
        self.maybe_compact();
        removed
    }

    /// Remove and return the oldest live entry.
    pub fn pop_oldest(&mut self) -> Option<(String, V)> {
        while let Some((seq, key)) = self.order.pop_front() {
            let live = self.entries.get(&key).is_some_and(|slot| slot.seq == seq);
            if live && let Some(slot) = self.entries.remove(&key) {
                return Some((key, slot.value));
            }
        }
        None
    }

    /// Live entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.order.iter().filter_map(|(seq, key)| {
            self.entries
                .get(key)
                .filter(|slot| slot.seq == *seq)
                .map(|slot| (key.as_str(), &slot.value))
        })
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, value)| value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    fn maybe_compact(&mut self) {
        if self.order.len() <= 2 * self.entries.len() + 32 {
            return;
        }
        let entries = &self.entries;
        self.order
            .retain(|(seq, key)| entries.get(key).is_some_and(|slot| slot.seq == *seq));
    }
}
