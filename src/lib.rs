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

//! # Wallet Ledger
//!
//! A wallet ledger engine: per-user balances, atomic transfers between
//! accounts, and deposits and withdrawals that are safe to retry.
//!
//! ## Core Components
//!
//! - [`Engine`]: Validates, deduplicates, and commits financial operations
//! - [`AccountStore`]: Versioned balances with all-or-nothing multi-account commits
//! - [`LedgerLog`]: Append-only history of committed and rejected operations
//! - [`IdempotencyGuard`]: Maps idempotency keys to their recorded outcome
//! - [`LedgerError`]: Every way an operation can be refused
//!
//! ## Example
//!
//! ```
//! use wallet_ledger::{AccountId, Engine, LedgerError};
//!
//! let engine = Engine::new();
//! engine.deposit(AccountId(1), 500, "k1").unwrap();
//! engine.open_account(AccountId(2)).unwrap();
//!
//! let receipt = engine.transfer(AccountId(1), AccountId(2), 200, "k2").unwrap();
//! assert_eq!(receipt.balance, 300);
//!
//! // Retrying with the same key changes nothing.
//! let retry = engine.transfer(AccountId(1), AccountId(2), 200, "k2").unwrap();
//! assert!(retry.replayed);
//! assert_eq!(engine.get_balance(AccountId(2)), Ok(200));
//!
//! assert_eq!(
//!     engine.transfer(AccountId(2), AccountId(1), 1_000, "k3"),
//!     Err(LedgerError::InsufficientFunds)
//! );
//! ```
//!
//! ## Thread Safety
//!
//! The engine is `Send + Sync` and meant to be shared behind an `Arc`.
//! Operations on unrelated accounts proceed in parallel; operations on the
//! same account are serialized by that account's lock.

pub mod account;
pub mod amount;
mod base;
pub mod config;
mod engine;
pub mod entry;
pub mod error;
pub mod idempotency;
pub mod journal;
pub mod ledger;
pub mod operation;
pub mod payout;

pub use account::{Account, AccountSnapshot, AccountStore, BalanceChange};
pub use amount::Amount;
pub use base::{AccountId, EntryId};
pub use config::LedgerConfig;
pub use engine::{Engine, Receipt};
pub use entry::{EntryFilter, EntryKind, EntryStatus, LedgerEntry, NewEntry};
pub use error::LedgerError;
pub use idempotency::{IdempotencyGuard, Reservation, ReservedKey, SweepReport};
pub use journal::{Journal, JournalRecord, read_journal};
pub use ledger::LedgerLog;
pub use operation::OpState;
pub use payout::{BankDetails, PayoutAlert, PayoutError, PayoutGateway, PayoutRequest};
