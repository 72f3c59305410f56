//! Precision-safe fee quantity.
//!
//! Fees are carried as `rust_decimal::Decimal` in gwei-equivalent units.
//! Raw integer quantities from the chain are scaled exactly, so a fee of
//! 12_345_678_901 wei becomes exactly 12.345678901 gwei.

use crate::error::{CoreError, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

/// Largest scaling exponent a decimal can carry.
pub const MAX_EXPONENT: u32 = 28;

/// Fee per gas unit, in gwei-equivalent units.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Gwei(pub Decimal);

impl Gwei {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Scale a raw integer quantity by `10^exponent`.
    ///
    /// Exact for every raw value that fits the 96-bit decimal mantissa
    /// (about 7.9 × 10^28), far beyond realistic fee magnitudes.
    pub fn from_raw(raw: u128, exponent: u32) -> Result<Self> {
        let mantissa = i128::try_from(raw).map_err(|_| CoreError::FeeOverflow { raw, exponent })?;
        Decimal::try_from_i128_with_scale(mantissa, exponent)
            .map(|d| Self(d.normalize()))
            .map_err(|_| CoreError::FeeOverflow { raw, exponent })
    }

    /// `None` when the sum leaves the decimal range.
    #[inline]
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Lossy conversion for display and float math.
    pub fn to_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }
}

impl fmt::Display for Gwei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Gwei {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Gwei {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Gwei {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Gwei {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_from_raw_wei() {
        let fee = Gwei::from_raw(12_345_678_901, 9).unwrap();
        assert_eq!(fee.inner(), dec!(12.345678901));
    }

    #[test]
    fn test_from_raw_large_value_is_exact() {
        // 10^12 raw units plus one: every digit must survive.
        let fee = Gwei::from_raw(1_000_000_000_001, 9).unwrap();
        assert_eq!(fee.inner(), dec!(1000.000000001));
    }

    #[test]
    fn test_from_raw_overflow() {
        assert!(Gwei::from_raw(u128::MAX, 9).is_err());
        assert!(Gwei::from_raw(1, MAX_EXPONENT).is_ok());
        assert!(Gwei::from_raw(1, MAX_EXPONENT + 1).is_err());
    }

    #[test]
    fn test_ordering_and_arithmetic() {
        let a = Gwei::new(dec!(30));
        let b = Gwei::new(dec!(1.5));
        assert!(a > b);
        assert_eq!((a + b).inner(), dec!(31.5));
        assert_eq!((a - b).inner(), dec!(28.5));
        assert!((a.to_f64() - 30.0).abs() < f64::EPSILON);
    }
}
