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

//! Ledger entries.
//!
//! An entry records one balance-affecting operation. It is drafted as a
//! [`NewEntry`], gets an ID and timestamp when appended to the log, and
//! becomes a [`LedgerEntry`] once its status is finalized:
//!
//! ```text
//!  NewEntry ──append──► (pending, invisible) ──mark_status──► Committed
//!                                 │                      └──► Rejected
//!                                 └──discard──► gone
//! ```

use crate::LedgerError;
use crate::amount::Amount;
use crate::base::{AccountId, EntryId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Text did not name a known kind or status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unrecognized value {0:?}")]
pub struct UnrecognizedValue(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Deposit,
    Withdrawal,
    Transfer,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::Transfer => "transfer",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = UnrecognizedValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(Self::Deposit),
            "withdrawal" => Ok(Self::Withdrawal),
            "transfer" => Ok(Self::Transfer),
            other => Err(UnrecognizedValue(other.to_string())),
        }
    }
}

/// Terminal status of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Committed,
    Rejected,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryStatus {
    type Err = UnrecognizedValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "committed" => Ok(Self::Committed),
            "rejected" => Ok(Self::Rejected),
            other => Err(UnrecognizedValue(other.to_string())),
        }
    }
}

/// An operation that has not been appended to the log yet.
///
/// The constructors enforce the per-kind shape: deposits have no source,
/// withdrawals have no destination, transfers have two distinct sides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub kind: EntryKind,
    pub from: Option<AccountId>,
    pub to: Option<AccountId>,
    pub amount: Amount,
    pub idempotency_key: String,
}

impl NewEntry {
    pub fn deposit(to: AccountId, amount: Amount, idempotency_key: impl Into<String>) -> Self {
        Self {
            kind: EntryKind::Deposit,
            from: None,
            to: Some(to),
            amount,
            idempotency_key: idempotency_key.into(),
        }
    }

    pub fn withdrawal(
        from: AccountId,
        amount: Amount,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            kind: EntryKind::Withdrawal,
            from: Some(from),
            to: None,
            amount,
            idempotency_key: idempotency_key.into(),
        }
    }

    /// # Errors
    ///
    /// [`LedgerError::SelfTransfer`] if `from == to`.
    pub fn transfer(
        from: AccountId,
        to: AccountId,
        amount: Amount,
        idempotency_key: impl Into<String>,
    ) -> Result<Self, LedgerError> {
        if from == to {
            return Err(LedgerError::SelfTransfer);
        }
        Ok(Self {
            kind: EntryKind::Transfer,
            from: Some(from),
            to: Some(to),
            amount,
            idempotency_key: idempotency_key.into(),
        })
    }

    /// Whether `entry` records the same operation as this draft.
    pub fn same_operation(&self, entry: &LedgerEntry) -> bool {
        self.kind == entry.kind
            && self.from == entry.from
            && self.to == entry.to
            && self.amount == entry.amount
    }
}

/// Immutable record of a finalized operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub kind: EntryKind,
    pub from: Option<AccountId>,
    pub to: Option<AccountId>,
    pub amount: Amount,
    pub status: EntryStatus,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn involves(&self, account: AccountId) -> bool {
        self.from == Some(account) || self.to == Some(account)
    }

    pub fn is_committed(&self) -> bool {
        self.status == EntryStatus::Committed
    }
}

/// Selection criteria for [`LedgerLog::query`](crate::LedgerLog::query).
///
/// Every field left as `None` matches everything. The date range is
/// half-open: `since <= created_at < until`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    pub account: Option<AccountId>,
    pub kind: Option<EntryKind>,
    pub status: Option<EntryStatus>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl EntryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account(mut self, account: AccountId) -> Self {
        self.account = Some(account);
        self
    }

    pub fn kind(mut self, kind: EntryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn status(mut self, status: EntryStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.account.is_none_or(|account| entry.involves(account))
            && self.kind.is_none_or(|kind| entry.kind == kind)
            && self.status.is_none_or(|status| entry.status == status)
            && self.since.is_none_or(|since| entry.created_at >= since)
            && self.until.is_none_or(|until| entry.created_at < until)
    }
}
