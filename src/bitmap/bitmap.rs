use serde::{Deserialize, Serialize};

use crate::bitmap::binner::{Binner, NullBinner};
use crate::bitmap::coder::{Coder, RelOp};
use crate::bitstream::Bitstream;
use crate::core::error::{Error, ErrorKind, Result};

/// A bitmap maps values to bitstreams through a coder, reducing values
/// with a binner first and masking every lookup with a validity
/// bitstream, so gap rows never match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bitmap<C, B = NullBinner> {
    coder: C,
    binner: B,
    valid: Bitstream,
}

impl<C, B> Bitmap<C, B>
where
    C: Coder,
    B: Binner<C::Value>,
{
    pub fn new() -> Self
    where
        C: Default,
        B: Default,
    {
        Bitmap {
            coder: C::default(),
            binner: B::default(),
            valid: Bitstream::new(),
        }
    }

    pub fn with_binner(binner: B) -> Self
    where
        C: Default,
    {
        Bitmap {
            coder: C::default(),
            binner,
            valid: Bitstream::new(),
        }
    }

    /// Adds a value at the next row. Fails iff the coder is full.
    pub fn push_back(&mut self, x: C::Value) -> bool {
        self.coder.encode(self.binner.bin(x)) && self.valid.push_back(true)
    }

    /// Appends `n` gap rows.
    pub fn append(&mut self, n: u64, bit: bool) -> bool {
        self.valid.append(n, bit) && self.coder.append(n, bit)
    }

    /// The bitstream of all valid rows whose value satisfies `op x`.
    pub fn lookup(&self, op: RelOp, x: C::Value) -> Result<Option<Bitstream>> {
        match self.coder.decode(op, &self.binner.bin(x))? {
            Some(bs) => Ok(Some(&bs & &self.valid)),
            None => Ok(None),
        }
    }

    pub fn valid(&self) -> &Bitstream {
        &self.valid
    }

    pub fn size(&self) -> u64 {
        self.coder.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

/// The boolean specialization bypasses the coder: one bitstream of
/// values plus the validity mask.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoolBitmap {
    bits: Bitstream,
    valid: Bitstream,
}

impl BoolBitmap {
    pub fn new() -> Self {
        BoolBitmap::default()
    }

    pub fn push_back(&mut self, x: bool) -> bool {
        self.bits.push_back(x) && self.valid.push_back(true)
    }

    pub fn append(&mut self, n: u64, bit: bool) -> bool {
        self.bits.append(n, bit) && self.valid.append(n, bit)
    }

    pub fn lookup(&self, op: RelOp, x: bool) -> Result<Option<Bitstream>> {
        let positive = match op {
            RelOp::Eq => x,
            RelOp::Ne => !x,
            _ => {
                return Err(Error::new(
                    ErrorKind::UnsupportedQuery,
                    format!("boolean bitmap does not support operator {}", op.symbol()),
                ))
            }
        };
        let bs = if positive {
            &self.bits & &self.valid
        } else {
            &!&self.bits & &self.valid
        };
        Ok(Some(bs))
    }

    pub fn size(&self) -> u64 {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::binner::PrecisionBinner;
    use crate::bitmap::coder::{EqualityCoder, RangeCoder};

    fn bits(bs: &Bitstream) -> Vec<bool> {
        (0..bs.len()).map(|i| bs.bit(i)).collect()
    }

    #[test]
    fn lookup_masks_gap_rows() {
        let mut bm: Bitmap<EqualityCoder<String>> = Bitmap::new();
        assert!(bm.append(1, false));
        assert!(bm.push_back("conn".to_string()));
        assert!(bm.append(2, false));
        assert!(bm.push_back("dns".to_string()));
        assert_eq!(bm.size(), 5);

        // != on a gap-y bitmap must not surface invalid rows.
        let ne = bm.lookup(RelOp::Ne, "conn".to_string()).unwrap().unwrap();
        assert_eq!(bits(&ne), vec![false, false, false, false, true]);
    }

    #[test]
    fn range_bitmap_scenario() {
        let mut bm: Bitmap<RangeCoder<i64>> = Bitmap::new();
        for x in [10i64, 20, 15, 10, 25] {
            assert!(bm.push_back(x));
        }
        let le15 = bm.lookup(RelOp::Le, 15).unwrap().unwrap();
        assert_eq!(bits(&le15), vec![true, false, true, true, false]);
        let eq10 = bm.lookup(RelOp::Eq, 10).unwrap().unwrap();
        assert_eq!(bits(&eq10), vec![true, false, false, true, false]);
        let gt20 = bm.lookup(RelOp::Gt, 20).unwrap().unwrap();
        assert_eq!(bits(&gt20), vec![false, false, false, false, true]);
    }

    #[test]
    fn precision_binned_bitmap() {
        let mut bm: Bitmap<RangeCoder<i64>, PrecisionBinner> =
            Bitmap::with_binner(PrecisionBinner::seconds());
        bm.push_back(1_100_000_000); // 1.1s
        bm.push_back(1_900_000_000); // 1.9s -> same second bin
        bm.push_back(3_000_000_000); // 3s
        let eq = bm.lookup(RelOp::Eq, 1_500_000_000).unwrap().unwrap();
        assert_eq!(bits(&eq), vec![true, true, false]);
    }

    #[test]
    fn bool_bitmap_direct() {
        let mut bm = BoolBitmap::new();
        bm.append(1, false);
        bm.push_back(true);
        bm.push_back(false);
        bm.push_back(true);

        let eq_true = bm.lookup(RelOp::Eq, true).unwrap().unwrap();
        assert_eq!(bits(&eq_true), vec![false, true, false, true]);
        let ne_true = bm.lookup(RelOp::Ne, true).unwrap().unwrap();
        assert_eq!(bits(&ne_true), vec![false, false, true, false]);
        assert!(bm.lookup(RelOp::Lt, true).is_err());
    }

    #[test]
    fn bitmap_round_trip() {
        let mut bm: Bitmap<RangeCoder<i64>> = Bitmap::new();
        bm.append(1, false);
        bm.push_back(42);
        bm.push_back(7);
        let bytes = bincode::serialize(&bm).unwrap();
        let back: Bitmap<RangeCoder<i64>> = bincode::deserialize(&bytes).unwrap();
        assert_eq!(bm, back);
    }
}
