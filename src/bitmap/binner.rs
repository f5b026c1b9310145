use serde::{Deserialize, Serialize};

/// A pre-encoding value reducer.
pub trait Binner<T> {
    fn bin(&self, x: T) -> T;
}

/// Identity binning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NullBinner;

impl<T> Binner<T> for NullBinner {
    fn bin(&self, x: T) -> T {
        x
    }
}

/// Reduces values to a given decimal precision.
///
/// For integral values the sign of the precision has no meaning: values
/// are divided by `10^|p|`. For floating-point values a negative precision
/// rounds the fractional component to `10^p` (so `p = -2` bins 42.03 and
/// 42.04 into 42.03), while a non-negative precision divides the whole
/// value. Two binners compare equal iff their integral and fractional
/// factors are equal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PrecisionBinner {
    integral: i64,
    fractional: f64,
}

impl PrecisionBinner {
    pub fn new(precision: i32) -> Self {
        let factor = 10i64.pow(precision.unsigned_abs());
        PrecisionBinner {
            integral: factor,
            fractional: if precision < 0 { factor as f64 } else { 0.0 },
        }
    }

    /// Bins nanosecond timestamps to whole seconds.
    pub fn seconds() -> Self {
        PrecisionBinner::new(9)
    }
}

impl PartialEq for PrecisionBinner {
    fn eq(&self, other: &Self) -> bool {
        self.integral == other.integral && self.fractional == other.fractional
    }
}

impl Binner<i64> for PrecisionBinner {
    fn bin(&self, x: i64) -> i64 {
        x / self.integral
    }
}

impl Binner<f64> for PrecisionBinner {
    fn bin(&self, x: f64) -> f64 {
        if self.fractional != 0.0 {
            let i = x.trunc();
            let f = x.fract();
            i + (f * self.fractional).round() / self.fractional
        } else if self.integral != 0 {
            (x / self.integral as f64).round()
        } else {
            x
        }
    }
}
