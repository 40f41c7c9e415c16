//! Karma amounts
//!
//! Karma is the fungible credit unit exchanged for work. It is an unsigned
//! integer so a negative balance is unrepresentable.

use serde::{Deserialize, Serialize};

/// An amount of Karma
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Karma(pub u64);

impl Karma {
    pub const ZERO: Karma = Karma(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn zero() -> Self {
        Self::ZERO
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    /// Signed representation, as stored in the relational schema (BIGINT)
    pub fn as_i64(&self) -> Option<i64> {
        i64::try_from(self.0).ok()
    }

    /// Parse a stored signed value; negative values are rejected
    pub fn from_i64(value: i64) -> Option<Self> {
        u64::try_from(value).ok().map(Self)
    }
}

impl std::fmt::Display for Karma {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} Karma", self.0)
    }
}

impl From<u64> for Karma {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
