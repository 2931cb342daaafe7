// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Validated monetary amounts.
//!
//! Every amount that reaches the engine passes through [`Amount`]. It is a
//! strictly positive count of minor currency units (e.g. paise), so zero,
//! negative, and fractional-minor-unit values are rejected before any
//! storage is touched.
//!
//! # Example
//!
//! ```
//! use wallet_ledger::Amount;
//!
//! let amount: Amount = "12.50".parse().unwrap();
//! assert_eq!(amount.minor_units(), 1250);
//! assert!("0.001".parse::<Amount>().is_err());
//! ```

use crate::LedgerError;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A positive amount in minor currency units.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(try_from = "u64", into = "u64")]
pub struct Amount(u64);

impl Amount {
    /// Minor units per major unit (100 paise to the rupee).
    pub const MINOR_PER_MAJOR: u64 = 100;

    /// Largest amount that still fits a signed balance delta.
    pub const MAX_MINOR_UNITS: u64 = i64::MAX as u64;

    /// Creates an amount from minor units.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidAmount`] when `minor_units` is zero or
    /// larger than [`Amount::MAX_MINOR_UNITS`].
    pub fn new(minor_units: u64) -> Result<Self, LedgerError> {
        if minor_units == 0 || minor_units > Self::MAX_MINOR_UNITS {
            return Err(LedgerError::InvalidAmount);
        }
        Ok(Self(minor_units))
    }

    pub fn minor_units(self) -> u64 {
        self.0
    }

    /// Signed balance delta that credits this amount.
    pub(crate) fn credit(self) -> i64 {
        self.0 as i64
    }

    /// Signed balance delta that debits this amount.
    pub(crate) fn debit(self) -> i64 {
        -(self.0 as i64)
    }

    /// Amount expressed in major units, e.g. `1250` -> `12.50`.
    pub fn to_major(self) -> Decimal {
        Decimal::from(self.0) / Decimal::from(Self::MINOR_PER_MAJOR)
    }

    /// Converts a major-unit decimal into minor units.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidAmount`] for non-positive values, values
    /// finer than one minor unit, and values that overflow `u64`.
    pub fn from_major(major: Decimal) -> Result<Self, LedgerError> {
        if major <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        let minor = major
            .checked_mul(Decimal::from(Self::MINOR_PER_MAJOR))
            .ok_or(LedgerError::InvalidAmount)?;
        if !minor.fract().is_zero() {
            return Err(LedgerError::InvalidAmount);
        }
        let minor = minor.to_u64().ok_or(LedgerError::InvalidAmount)?;
        Self::new(minor)
    }
}

impl TryFrom<u64> for Amount {
    type Error = LedgerError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<i64> for Amount {
    type Error = LedgerError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        let value = u64::try_from(value).map_err(|_| LedgerError::InvalidAmount)?;
        Self::new(value)
    }
}

impl From<Amount> for u64 {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// Parses major-unit text such as `"100"` or `"12.50"`.
impl FromStr for Amount {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let major = Decimal::from_str(s.trim()).map_err(|_| LedgerError::InvalidAmount)?;
        Self::from_major(major)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
