use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::ops::Bound::{Excluded, Unbounded};

use crate::bitstream::Bitstream;

/// A dense, index-addressed bitstream store. O(1) lookup, O(max key)
/// space; only useful for very small integral domains such as bit-slice
/// positions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorStorage {
    /// Total values encoded across all bitstreams of this store.
    pub rows: u64,
    slots: Vec<Option<Bitstream>>,
    cardinality: u64,
}

impl VectorStorage {
    pub fn new() -> Self {
        VectorStorage::default()
    }

    pub fn find(&self, key: usize) -> Option<&Bitstream> {
        self.slots.get(key)?.as_ref()
    }

    pub fn find_mut(&mut self, key: usize) -> Option<&mut Bitstream> {
        self.slots.get_mut(key)?.as_mut()
    }

    /// Strict neighbors of `key`: the occupied slots below and above it.
    /// The domain is tiny, so a linear scan suffices.
    pub fn find_bounds(&self, key: usize) -> (Option<&Bitstream>, Option<&Bitstream>) {
        let lower = self.slots[..key.min(self.slots.len())]
            .iter()
            .rev()
            .find_map(|s| s.as_ref());
        let upper = self
            .slots
            .iter()
            .skip(key + 1)
            .find_map(|s| s.as_ref());
        (lower, upper)
    }

    pub fn each(&self, mut f: impl FnMut(usize, &Bitstream)) {
        for (i, slot) in self.slots.iter().enumerate() {
            if let Some(bs) = slot {
                f(i, bs);
            }
        }
    }

    pub fn each_mut(&mut self, mut f: impl FnMut(usize, &mut Bitstream)) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if let Some(bs) = slot {
                f(i, bs);
            }
        }
    }

    pub fn insert(&mut self, key: usize, seed: Bitstream) -> bool {
        if key >= self.slots.len() {
            self.slots.resize(key + 1, None);
        }
        if self.slots[key].is_some() {
            return false;
        }
        self.slots[key] = Some(seed);
        self.cardinality += 1;
        true
    }

    pub fn cardinality(&self) -> u64 {
        self.cardinality
    }
}

/// An ordered bitstream store with O(log n) lookup and neighbor bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderedStorage<T: Ord> {
    pub rows: u64,
    map: BTreeMap<T, Bitstream>,
}

impl<T: Ord> Default for OrderedStorage<T> {
    fn default() -> Self {
        OrderedStorage {
            rows: 0,
            map: BTreeMap::new(),
        }
    }
}

impl<T: Ord + Clone> OrderedStorage<T> {
    pub fn new() -> Self {
        OrderedStorage::default()
    }

    pub fn find(&self, key: &T) -> Option<&Bitstream> {
        self.map.get(key)
    }

    /// Strict neighbors: greatest key `< key` and least key `> key`.
    pub fn find_bounds(&self, key: &T) -> (Option<&Bitstream>, Option<&Bitstream>) {
        let lower = self.map.range(..key.clone()).next_back().map(|(_, bs)| bs);
        let upper = self
            .map
            .range((Excluded(key.clone()), Unbounded))
            .next()
            .map(|(_, bs)| bs);
        (lower, upper)
    }

    pub fn each(&self, mut f: impl FnMut(&T, &Bitstream)) {
        for (k, bs) in &self.map {
            f(k, bs);
        }
    }

    pub fn each_mut(&mut self, mut f: impl FnMut(&T, &mut Bitstream)) {
        for (k, bs) in self.map.iter_mut() {
            f(k, bs);
        }
    }

    pub fn insert(&mut self, key: T, seed: Bitstream) -> bool {
        if self.map.contains_key(&key) {
            return false;
        }
        self.map.insert(key, seed);
        true
    }

    pub fn cardinality(&self) -> u64 {
        self.map.len() as u64
    }
}

/// A hash-addressed bitstream store. O(1) lookup, O(n) bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnorderedStorage<T: Eq + Hash> {
    pub rows: u64,
    map: HashMap<T, Bitstream>,
}

impl<T: Eq + Hash> Default for UnorderedStorage<T> {
    fn default() -> Self {
        UnorderedStorage {
            rows: 0,
            map: HashMap::new(),
        }
    }
}

impl<T: Eq + Hash> UnorderedStorage<T> {
    pub fn new() -> Self {
        UnorderedStorage::default()
    }

    pub fn find(&self, key: &T) -> Option<&Bitstream> {
        self.map.get(key)
    }

    pub fn each(&self, mut f: impl FnMut(&T, &Bitstream)) {
        for (k, bs) in &self.map {
            f(k, bs);
        }
    }

    pub fn each_mut(&mut self, mut f: impl FnMut(&T, &mut Bitstream)) {
        for (k, bs) in self.map.iter_mut() {
            f(k, bs);
        }
    }

    pub fn insert(&mut self, key: T, seed: Bitstream) -> bool {
        use std::collections::hash_map::Entry;
        match self.map.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(seed);
                true
            }
        }
    }

    pub fn cardinality(&self) -> u64 {
        self.map.len() as u64
    }
}

impl<T: Eq + Hash + Ord> UnorderedStorage<T> {
    /// Strict neighbors via linear scan.
    pub fn find_bounds(&self, key: &T) -> (Option<&Bitstream>, Option<&Bitstream>) {
        let mut lower: Option<(&T, &Bitstream)> = None;
        let mut upper: Option<(&T, &Bitstream)> = None;
        for (k, bs) in &self.map {
            if k < key && lower.map_or(true, |(lk, _)| k > lk) {
                lower = Some((k, bs));
            }
            if k > key && upper.map_or(true, |(uk, _)| k < uk) {
                upper = Some((k, bs));
            }
        }
        (lower.map(|(_, bs)| bs), upper.map(|(_, bs)| bs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_bounds_are_strict() {
        let mut store: OrderedStorage<i64> = OrderedStorage::new();
        store.insert(10, Bitstream::with_bits(1, true));
        store.insert(20, Bitstream::with_bits(2, true));
        store.insert(30, Bitstream::with_bits(3, true));

        let (lower, upper) = store.find_bounds(&20);
        assert_eq!(lower.unwrap().len(), 1);
        assert_eq!(upper.unwrap().len(), 3);

        let (lower, upper) = store.find_bounds(&5);
        assert!(lower.is_none());
        assert_eq!(upper.unwrap().len(), 1);

        let (lower, upper) = store.find_bounds(&35);
        assert_eq!(lower.unwrap().len(), 3);
        assert!(upper.is_none());
    }

    #[test]
    fn unordered_bounds_by_scan() {
        let mut store: UnorderedStorage<u64> = UnorderedStorage::new();
        store.insert(1, Bitstream::with_bits(1, false));
        store.insert(9, Bitstream::with_bits(9, false));
        let (lower, upper) = store.find_bounds(&4);
        assert_eq!(lower.unwrap().len(), 1);
        assert_eq!(upper.unwrap().len(), 9);
    }

    #[test]
    fn vector_insert_and_bounds() {
        let mut store = VectorStorage::new();
        assert!(store.insert(2, Bitstream::new()));
        assert!(store.insert(5, Bitstream::new()));
        assert!(!store.insert(2, Bitstream::new()));
        assert_eq!(store.cardinality(), 2);

        let (lower, upper) = store.find_bounds(3);
        assert!(lower.is_some());
        assert!(upper.is_some());
        assert!(store.find(3).is_none());
    }

    #[test]
    fn storages_round_trip() {
        let mut ordered: OrderedStorage<i64> = OrderedStorage::new();
        ordered.rows = 4;
        ordered.insert(7, Bitstream::with_bits(4, true));
        let bytes = bincode::serialize(&ordered).unwrap();
        let back: OrderedStorage<i64> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(ordered, back);

        let mut unordered: UnorderedStorage<String> = UnorderedStorage::new();
        unordered.rows = 2;
        unordered.insert("conn".to_string(), Bitstream::with_bits(2, false));
        let bytes = bincode::serialize(&unordered).unwrap();
        let back: UnorderedStorage<String> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(unordered, back);

        let mut vector = VectorStorage::new();
        vector.rows = 1;
        vector.insert(0, Bitstream::with_bits(1, true));
        let bytes = bincode::serialize(&vector).unwrap();
        let back: VectorStorage = bincode::deserialize(&bytes).unwrap();
        assert_eq!(vector, back);
    }
}
