use serde::{Deserialize, Serialize};
use std::hash::Hash;

use crate::bitmap::storage::{OrderedStorage, UnorderedStorage, VectorStorage};
use crate::bitstream::Bitstream;
use crate::core::error::{Error, ErrorKind, Result};

/// Relational operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl RelOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            RelOp::Eq => "==",
            RelOp::Ne => "!=",
            RelOp::Lt => "<",
            RelOp::Le => "<=",
            RelOp::Gt => ">",
            RelOp::Ge => ">=",
        }
    }
}

fn unsupported(op: RelOp, coder: &str) -> Error {
    Error::new(
        ErrorKind::UnsupportedQuery,
        format!("{} coder does not support operator {}", coder, op.symbol()),
    )
}

/// An encoding scheme over a bitstream store.
///
/// `encode` binds one value at the next row; `decode` answers `op x` with
/// a bitstream over all rows, or `None` when no row can match; `append`
/// advances every stored bitstream by `n` gap bits.
pub trait Coder {
    type Value;

    fn encode(&mut self, x: Self::Value) -> bool;
    fn decode(&self, op: RelOp, x: &Self::Value) -> Result<Option<Bitstream>>;
    fn append(&mut self, n: u64, bit: bool) -> bool;
    fn rows(&self) -> u64;
}

/// Equality encoding: one bitstream per observed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqualityCoder<T: Eq + Hash> {
    store: UnorderedStorage<T>,
}

impl<T: Eq + Hash> Default for EqualityCoder<T> {
    fn default() -> Self {
        EqualityCoder {
            store: UnorderedStorage::new(),
        }
    }
}

impl<T: Eq + Hash + Clone> EqualityCoder<T> {
    pub fn new() -> Self {
        EqualityCoder::default()
    }

    pub fn cardinality(&self) -> u64 {
        self.store.cardinality()
    }
}

impl<T: Eq + Hash + Clone> Coder for EqualityCoder<T> {
    type Value = T;

    fn encode(&mut self, x: T) -> bool {
        let rows = self.store.rows;
        if rows == u64::MAX {
            return false;
        }
        if self.store.find(&x).is_none() {
            self.store.insert(x.clone(), Bitstream::with_bits(rows, false));
        }
        self.store.each_mut(|k, bs| {
            bs.push_back(x == *k);
        });
        self.store.rows += 1;
        true
    }

    fn decode(&self, op: RelOp, x: &T) -> Result<Option<Bitstream>> {
        match op {
            RelOp::Eq => Ok(self.store.find(x).cloned()),
            RelOp::Ne => match self.store.find(x) {
                Some(bs) => Ok(Some(!bs)),
                None => Ok(Some(Bitstream::with_bits(self.store.rows, true))),
            },
            _ => Err(unsupported(op, "equality")),
        }
    }

    fn append(&mut self, n: u64, bit: bool) -> bool {
        if self.store.rows.checked_add(n).is_none() {
            return false;
        }
        let mut ok = true;
        self.store.each_mut(|_, bs| {
            if !bs.append(n, bit) {
                ok = false;
            }
        });
        if ok {
            self.store.rows += n;
        }
        ok
    }

    fn rows(&self) -> u64 {
        self.store.rows
    }
}

/// A value a binary coder can slice into bits.
pub trait BitSliced: Copy {
    const BITS: u32;

    fn slice_bit(&self, i: u32) -> bool;
}

macro_rules! impl_bit_sliced {
    ($($t:ty),*) => {
        $(impl BitSliced for $t {
            const BITS: u32 = <$t>::BITS;

            fn slice_bit(&self, i: u32) -> bool {
                (*self >> i) & 1 == 1
            }
        })*
    };
}

impl_bit_sliced!(u8, u16, u32, u64);

/// Binary (bit-sliced) encoding: exactly `BITS` bitstreams, one per bit
/// position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryCoder<T: BitSliced> {
    store: VectorStorage,
    #[serde(skip)]
    _marker: std::marker::PhantomData<T>,
}

impl<T: BitSliced> Default for BinaryCoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: BitSliced> BinaryCoder<T> {
    pub fn new() -> Self {
        let mut store = VectorStorage::new();
        for i in 0..T::BITS {
            store.insert(i as usize, Bitstream::new());
        }
        BinaryCoder {
            store,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T: BitSliced> Coder for BinaryCoder<T> {
    type Value = T;

    fn encode(&mut self, x: T) -> bool {
        if self.store.rows == u64::MAX {
            return false;
        }
        self.store.each_mut(|i, bs| {
            bs.push_back(x.slice_bit(i as u32));
        });
        self.store.rows += 1;
        true
    }

    fn decode(&self, op: RelOp, x: &T) -> Result<Option<Bitstream>> {
        match op {
            RelOp::Eq => {
                let mut result = Bitstream::with_bits(self.store.rows, true);
                for i in 0..T::BITS {
                    let slice = self.store.find(i as usize).expect("slice bitstream");
                    if x.slice_bit(i) {
                        result = &result & slice;
                    } else {
                        result = &result & &!slice;
                    }
                }
                if result.find_first().is_none() {
                    Ok(None)
                } else {
                    Ok(Some(result))
                }
            }
            RelOp::Ne => match self.decode(RelOp::Eq, x)? {
                Some(mut bs) => {
                    bs.flip();
                    Ok(Some(bs))
                }
                None => Ok(Some(Bitstream::with_bits(self.store.rows, true))),
            },
            _ => Err(unsupported(op, "binary")),
        }
    }

    fn append(&mut self, n: u64, bit: bool) -> bool {
        if self.store.rows.checked_add(n).is_none() {
            return false;
        }
        let mut ok = true;
        self.store.each_mut(|_, bs| {
            if !bs.append(n, bit) {
                ok = false;
            }
        });
        if ok {
            self.store.rows += n;
        }
        ok
    }

    fn rows(&self) -> u64 {
        self.store.rows
    }
}

/// A range-coder key: totally ordered with a checked decrement.
pub trait RangeKey: Ord + Clone {
    fn pred(&self) -> Option<Self>;
}

macro_rules! impl_range_key {
    ($($t:ty),*) => {
        $(impl RangeKey for $t {
            fn pred(&self) -> Option<Self> {
                self.checked_sub(1)
            }
        })*
    };
}

impl_range_key!(i64, u64, u32, u16, u8);

/// Range (less-than-or-equal) encoding: the bitstream of value `v` marks
/// every row whose stored value is `<= v`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeCoder<T: Ord> {
    store: OrderedStorage<T>,
}

impl<T: Ord> Default for RangeCoder<T> {
    fn default() -> Self {
        RangeCoder {
            store: OrderedStorage::default(),
        }
    }
}

impl<T: RangeKey> RangeCoder<T> {
    pub fn new() -> Self {
        RangeCoder::default()
    }

    pub fn cardinality(&self) -> u64 {
        self.store.cardinality()
    }

    fn le(&self, x: &T) -> Option<Bitstream> {
        if let Some(bs) = self.store.find(x) {
            return Some(bs.clone());
        }
        self.store.find_bounds(x).0.cloned()
    }

    fn lt(&self, x: &T) -> Option<Bitstream> {
        // Nothing is strictly below the domain minimum.
        x.pred().and_then(|p| self.le(&p))
    }
}

impl<T: RangeKey> Coder for RangeCoder<T> {
    type Value = T;

    fn encode(&mut self, x: T) -> bool {
        let rows = self.store.rows;
        if rows == u64::MAX {
            return false;
        }
        if self.store.find(&x).is_none() {
            // Seed the fresh bitstream from the ordered neighbors: with a
            // lower neighbor present its bitstream already marks exactly
            // the rows <= x.
            let seed = {
                let (lower, upper) = self.store.find_bounds(&x);
                match (lower, upper) {
                    (Some(l), Some(_)) => l.clone(),
                    (Some(_), None) => Bitstream::with_bits(rows, true),
                    (None, Some(_)) => Bitstream::with_bits(rows, false),
                    (None, None) => Bitstream::with_bits(rows, true),
                }
            };
            self.store.insert(x.clone(), seed);
        }
        self.store.each_mut(|k, bs| {
            bs.push_back(x <= *k);
        });
        self.store.rows += 1;
        true
    }

    fn decode(&self, op: RelOp, x: &T) -> Result<Option<Bitstream>> {
        let rows = self.store.rows;
        let all = || Bitstream::with_bits(rows, true);
        match op {
            RelOp::Le => Ok(self.le(x)),
            RelOp::Lt => Ok(self.lt(x)),
            RelOp::Gt => Ok(Some(match self.le(x) {
                Some(mut bs) => {
                    bs.flip();
                    bs
                }
                None => all(),
            })),
            RelOp::Ge => Ok(Some(match self.lt(x) {
                Some(mut bs) => {
                    bs.flip();
                    bs
                }
                None => all(),
            })),
            RelOp::Eq => {
                // v == x is (v <= x) & ~(v <= pred(x)) where pred is the
                // ordered lower neighbor; without one, v <= x suffices.
                let le = match self.le(x) {
                    Some(bs) => bs,
                    None => return Ok(None),
                };
                match self.store.find_bounds(x).0 {
                    Some(lower) => Ok(Some(&le & &!lower)),
                    None => Ok(Some(le)),
                }
            }
            RelOp::Ne => match self.decode(RelOp::Eq, x)? {
                Some(mut bs) => {
                    bs.flip();
                    Ok(Some(bs))
                }
                None => Ok(Some(all())),
            },
        }
    }

    fn append(&mut self, n: u64, bit: bool) -> bool {
        if self.store.rows.checked_add(n).is_none() {
            return false;
        }
        let mut ok = true;
        self.store.each_mut(|_, bs| {
            if !bs.append(n, bit) {
                ok = false;
            }
        });
        if ok {
            self.store.rows += n;
        }
        ok
    }

    fn rows(&self) -> u64 {
        self.store.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bits(bs: &Bitstream) -> Vec<bool> {
        (0..bs.len()).map(|i| bs.bit(i)).collect()
    }

    #[test]
    fn equality_coder_basics() {
        let mut coder: EqualityCoder<String> = EqualityCoder::new();
        for s in ["a", "b", "a"] {
            assert!(coder.encode(s.to_string()));
        }
        assert_eq!(coder.rows(), 3);
        assert_eq!(coder.cardinality(), 2);

        let eq_a = coder.decode(RelOp::Eq, &"a".to_string()).unwrap().unwrap();
        assert_eq!(bits(&eq_a), vec![true, false, true]);

        // Unseen value: == is empty, != is all ones.
        assert!(coder.decode(RelOp::Eq, &"c".to_string()).unwrap().is_none());
        let ne_c = coder.decode(RelOp::Ne, &"c".to_string()).unwrap().unwrap();
        assert_eq!(bits(&ne_c), vec![true, true, true]);

        assert!(coder.decode(RelOp::Lt, &"a".to_string()).is_err());
    }

    #[test]
    fn binary_coder_slices() {
        let mut coder: BinaryCoder<u8> = BinaryCoder::new();
        for x in [5u8, 9, 5, 0] {
            assert!(coder.encode(x));
        }
        let eq5 = coder.decode(RelOp::Eq, &5).unwrap().unwrap();
        assert_eq!(bits(&eq5), vec![true, false, true, false]);

        let ne5 = coder.decode(RelOp::Ne, &5).unwrap().unwrap();
        assert_eq!(bits(&ne5), vec![false, true, false, true]);

        // A value that never occurred decodes to nothing.
        assert!(coder.decode(RelOp::Eq, &7).unwrap().is_none());
    }

    #[test]
    fn range_coder_scenario() {
        // S1: xs = [10, 20, 15, 10, 25].
        let mut coder: RangeCoder<i64> = RangeCoder::new();
        for x in [10i64, 20, 15, 10, 25] {
            assert!(coder.encode(x));
        }
        let le15 = coder.decode(RelOp::Le, &15).unwrap().unwrap();
        assert_eq!(bits(&le15), vec![true, false, true, true, false]);

        let eq10 = coder.decode(RelOp::Eq, &10).unwrap().unwrap();
        assert_eq!(bits(&eq10), vec![true, false, false, true, false]);

        let gt20 = coder.decode(RelOp::Gt, &20).unwrap().unwrap();
        assert_eq!(bits(&gt20), vec![false, false, false, false, true]);
    }

    #[test]
    fn range_coder_neighbor_queries() {
        let mut coder: RangeCoder<i64> = RangeCoder::new();
        for x in [10i64, 20, 30] {
            coder.encode(x);
        }
        // 25 is unseen: <= 25 falls back to the lower neighbor 20.
        let le25 = coder.decode(RelOp::Le, &25).unwrap().unwrap();
        assert_eq!(bits(&le25), vec![true, true, false]);

        // Below the minimum nothing matches <=.
        assert!(coder.decode(RelOp::Le, &5).unwrap().is_none());
        let gt5 = coder.decode(RelOp::Gt, &5).unwrap().unwrap();
        assert_eq!(bits(&gt5), vec![true, true, true]);

        let ge20 = coder.decode(RelOp::Ge, &20).unwrap().unwrap();
        assert_eq!(bits(&ge20), vec![false, true, true]);

        let lt20 = coder.decode(RelOp::Lt, &20).unwrap().unwrap();
        assert_eq!(bits(&lt20), vec![true, false, false]);
    }

    #[test]
    fn range_coder_at_unsigned_minimum() {
        let mut coder: RangeCoder<u64> = RangeCoder::new();
        for x in [0u64, 3, 0, 7] {
            coder.encode(x);
        }
        // Nothing is strictly below 0, and >= 0 keeps the zero-valued rows.
        assert!(coder.decode(RelOp::Lt, &0).unwrap().is_none());
        let ge0 = coder.decode(RelOp::Ge, &0).unwrap().unwrap();
        assert_eq!(bits(&ge0), vec![true, true, true, true]);
    }

    #[test]
    fn range_eq_ne_partition_rows() {
        let mut coder: RangeCoder<i64> = RangeCoder::new();
        for x in [10i64, 20, 15, 10, 25] {
            coder.encode(x);
        }
        for probe in [10i64, 15, 20, 25, 13] {
            let eq = coder
                .decode(RelOp::Eq, &probe)
                .unwrap()
                .unwrap_or_else(Bitstream::new);
            let ne = coder.decode(RelOp::Ne, &probe).unwrap().unwrap();
            if eq.is_empty() {
                assert_eq!(ne.count_ones(), coder.rows());
            } else {
                assert_eq!((&eq | &ne).count_ones(), coder.rows());
                assert_eq!((&eq & &ne).count_ones(), 0);
            }
        }
    }

    #[test]
    fn coders_round_trip() {
        let mut eq: EqualityCoder<String> = EqualityCoder::new();
        eq.encode("dns".to_string());
        eq.encode("http".to_string());
        let bytes = bincode::serialize(&eq).unwrap();
        let back: EqualityCoder<String> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(eq, back);

        let mut range: RangeCoder<i64> = RangeCoder::new();
        range.encode(42);
        range.encode(7);
        let bytes = bincode::serialize(&range).unwrap();
        let back: RangeCoder<i64> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(range, back);

        let mut binary: BinaryCoder<u8> = BinaryCoder::new();
        binary.encode(3);
        let bytes = bincode::serialize(&binary).unwrap();
        let back: BinaryCoder<u8> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(binary, back);
    }
}
