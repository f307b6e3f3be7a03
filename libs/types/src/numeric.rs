//! Fixed-point decimal types for prices and cash amounts
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point errors).
//! Prices carry 4 fractional digits, cash amounts 2; all rounding is
//! half-away-from-zero and applied consistently at construction.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

/// Price type with fixed-point decimal representation (4 dp)
///
/// Must always be positive. Serialized as string to prevent JSON number
/// precision loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Price(Decimal);

impl Price {
    /// Fractional digits carried by a price
    pub const SCALE: u32 = 4;

    /// Create a new Price from a Decimal, rounding to 4 dp
    ///
    /// # Panics
    /// Panics if the price is negative or zero
    pub fn new(value: Decimal) -> Self {
        Self::try_new(value).expect("Price must be positive")
    }

    /// Try to create a Price, returning None if not positive
    pub fn try_new(value: Decimal) -> Option<Self> {
        let rounded =
            value.round_dp_with_strategy(Self::SCALE, RoundingStrategy::MidpointAwayFromZero);
        if rounded > Decimal::ZERO {
            Some(Self(rounded))
        } else {
            None
        }
    }

    /// Create from integer (for testing/convenience)
    pub fn from_u64(value: u64) -> Self {
        Self::new(Decimal::from(value))
    }

    /// Create from string
    pub fn from_str(s: &str) -> Result<Self, rust_decimal::Error> {
        let decimal = Decimal::from_str(s)?;
        Ok(Self::new(decimal))
    }

    /// Get the inner decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Notional value of `qty` shares at this price (unrounded)
    pub fn times(&self, qty: u64) -> Decimal {
        self.0 * Decimal::from(qty)
    }

    /// Quantity-weighted mean of an existing average over `prior_qty` shares
    /// and a new lot of `qty` shares at this price
    pub fn blend(prior: Option<Price>, prior_qty: u64, price: Price, qty: u64) -> Option<Price> {
        let total = prior_qty + qty;
        if total == 0 {
            return prior;
        }
        let prior_basis = prior.map(|p| p.times(prior_qty)).unwrap_or(Decimal::ZERO);
        Price::try_new((prior_basis + price.times(qty)) / Decimal::from(total))
    }
}

// Custom serialization to preserve precision
impl Serialize for Price {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let decimal = Decimal::from_str(&s).map_err(serde::de::Error::custom)?;
        Self::try_new(decimal).ok_or_else(|| serde::de::Error::custom("Price must be positive"))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cash amount with fixed-point decimal representation (2 dp)
///
/// Must always be non-negative. Serialized as string to prevent JSON
/// number precision loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cash(Decimal);

impl Cash {
    /// Fractional digits carried by a cash amount
    pub const SCALE: u32 = 2;

    /// Zero cash
    pub const ZERO: Cash = Cash(Decimal::ZERO);

    /// Create a new Cash amount from a Decimal, rounding to 2 dp
    ///
    /// # Panics
    /// Panics if the amount is negative
    pub fn new(value: Decimal) -> Self {
        Self::try_new(value).expect("Cash must be non-negative")
    }

    /// Try to create a Cash amount, returning None if negative
    pub fn try_new(value: Decimal) -> Option<Self> {
        let rounded =
            value.round_dp_with_strategy(Self::SCALE, RoundingStrategy::MidpointAwayFromZero);
        if rounded >= Decimal::ZERO {
            Some(Self(rounded))
        } else {
            None
        }
    }

    /// Create from integer (for testing/convenience)
    pub fn from_u64(value: u64) -> Self {
        Self(Decimal::from(value))
    }

    /// Create from string
    pub fn from_str(s: &str) -> Result<Self, rust_decimal::Error> {
        let decimal = Decimal::from_str(s)?;
        Ok(Self::new(decimal))
    }

    /// Cash spent on `qty` shares at `price`, rounded to 2 dp
    pub fn notional(price: Price, qty: u64) -> Self {
        Self(
            price
                .times(qty)
                .round_dp_with_strategy(Self::SCALE, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Get the inner decimal value
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Check if the amount is zero
    pub fn is_zero(&self) -> bool {
        self.0 == Decimal::ZERO
    }

    /// Subtraction that fails instead of going negative
    pub fn checked_sub(&self, rhs: Cash) -> Option<Cash> {
        if self.0 >= rhs.0 {
            Some(Cash(self.0 - rhs.0))
        } else {
            None
        }
    }

    /// Subtraction clamped at zero
    pub fn saturating_sub(&self, rhs: Cash) -> Cash {
        self.checked_sub(rhs).unwrap_or(Cash::ZERO)
    }

    /// Largest whole share quantity this amount can buy at `price`
    pub fn max_quantity_at(&self, price: Price) -> u64 {
        (self.0 / price.as_decimal()).floor().to_u64().unwrap_or(0)
    }

    /// The smaller of two amounts
    pub fn min(self, other: Cash) -> Cash {
        if self.0 <= other.0 {
            self
        } else {
            other
        }
    }
}

impl Add for Cash {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

// Custom serialization to preserve precision
impl Serialize for Cash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Cash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let decimal = Decimal::from_str(&s).map_err(serde::de::Error::custom)?;
        Self::try_new(decimal).ok_or_else(|| serde::de::Error::custom("Cash must be non-negative"))
    }
}

impl fmt::Display for Cash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
