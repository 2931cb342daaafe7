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

//! Error types for ledger operations.

use crate::base::{AccountId, EntryId};
use thiserror::Error;

/// Ledger operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Account does not exist
    #[error("account {0} not found")]
    NotFound(AccountId),

    /// Amount is zero, negative, non-numeric, or finer than one minor unit
    #[error("invalid amount (must be a positive number of minor units)")]
    InvalidAmount,

    /// Debit would take the balance below zero
    #[error("insufficient funds")]
    InsufficientFunds,

    /// Stored version moved since it was read
    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    /// Version conflicts exhausted the retry budget
    #[error("too much contention on account, retry the operation")]
    Contention,

    /// Source and destination of a transfer are the same account
    #[error("cannot transfer to the same account")]
    SelfTransfer,

    /// Entry already carries a terminal status
    #[error("entry {0} is already finalized")]
    AlreadyFinalized(EntryId),

    /// Entry ID was never allocated by this log
    #[error("entry {0} not found")]
    EntryNotFound(EntryId),

    /// Idempotency key is empty
    #[error("missing idempotency key")]
    MissingIdempotencyKey,

    /// Another request holding the same idempotency key has not finished yet
    #[error("operation with this idempotency key is still in progress")]
    OperationInProgress,

    /// Idempotency key was already used for a different operation
    #[error("idempotency key was already used for a different operation")]
    IdempotencyKeyReused,

    /// Underlying storage did not confirm the write
    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<csv::Error> for LedgerError {
    fn from(err: csv::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}
