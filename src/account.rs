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

//! Account storage.
//!
//! Each account holds a `(balance, version)` pair behind its own mutex. The
//! version is an optimistic-concurrency token: writers read a snapshot,
//! then submit their delta together with the version they saw, and the
//! store rejects the write with [`LedgerError::VersionConflict`] if anyone
//! else got there first.
//!
//! # Example
//!
//! ```
//! use wallet_ledger::{AccountId, AccountStore};
//!
//! let store = AccountStore::new();
//! store.create_if_absent(AccountId(1));
//!
//! let version = store.apply_delta(AccountId(1), 500, 0).unwrap();
//! assert_eq!(version, 1);
//! assert_eq!(store.get_balance(AccountId(1)).unwrap(), 500);
//! ```

use crate::LedgerError;
use crate::base::AccountId;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde::ser::Serializer;
use std::sync::Arc;

#[derive(Debug)]
struct AccountData {
    balance: u64,
    version: u64,
}

impl AccountData {
    fn new() -> Self {
        Self {
            balance: 0,
            version: 0,
        }
    }

    /// Balance after applying `delta`, without writing it.
    fn staged_balance(&self, delta: i64) -> Result<u64, LedgerError> {
        let next = i128::from(self.balance) + i128::from(delta);
        if next < 0 {
            return Err(LedgerError::InsufficientFunds);
        }
        u64::try_from(next).map_err(|_| LedgerError::InvalidAmount)
    }

    fn write(&mut self, balance: u64, version: u64) {
        debug_assert!(
            version > self.version,
            "Invariant violated: version moved backwards: {} -> {}",
            self.version,
            version
        );
        self.balance = balance;
        self.version = version;
    }
}

/// Point-in-time view of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccountSnapshot {
    pub account: AccountId,
    pub balance: u64,
    pub version: u64,
}

/// Wallet account with its own lock.
#[derive(Debug)]
pub struct Account {
    id: AccountId,
    inner: Mutex<AccountData>,
}

impl Account {
    pub fn new(id: AccountId) -> Self {
        Self {
            id,
            inner: Mutex::new(AccountData::new()),
        }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn balance(&self) -> u64 {
        self.inner.lock().balance
    }

    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }

    /// Reads balance and version under one lock acquisition.
    pub fn snapshot(&self) -> AccountSnapshot {
        let data = self.inner.lock();
        AccountSnapshot {
            account: self.id,
            balance: data.balance,
            version: data.version,
        }
    }
}

impl Serialize for Account {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.snapshot().serialize(serializer)
    }
}

/// One leg of a multi-account commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChange {
    pub account: AccountId,
    pub delta: i64,
    pub expected_version: u64,
}

/// Keyed store of one balance record per account.
///
/// Accounts are never removed. Lookups clone the account handle out of the
/// map before locking it, so no map shard lock is ever held while waiting
/// on an account lock.
#[derive(Debug, Default)]
pub struct AccountStore {
    accounts: DashMap<AccountId, Arc<Account>>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
        }
    }

    /// Creates a zero-balance account at version 0 if none exists.
    ///
    /// Returns `true` when this call created the account.
    pub fn create_if_absent(&self, id: AccountId) -> bool {
        let mut created = false;
        self.accounts.entry(id).or_insert_with(|| {
            created = true;
            Arc::new(Account::new(id))
        });
        created
    }

    pub fn contains(&self, id: AccountId) -> bool {
        self.accounts.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    fn handle(&self, id: AccountId) -> Result<Arc<Account>, LedgerError> {
        self.accounts
            .get(&id)
            .map(|account| Arc::clone(account.value()))
            .ok_or(LedgerError::NotFound(id))
    }

    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if the account does not exist.
    pub fn get_balance(&self, id: AccountId) -> Result<u64, LedgerError> {
        Ok(self.handle(id)?.balance())
    }

    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if the account does not exist.
    pub fn snapshot(&self, id: AccountId) -> Result<AccountSnapshot, LedgerError> {
        Ok(self.handle(id)?.snapshot())
    }

    /// Snapshots of several accounts taken at one instant, ordered by
    /// account ID. Duplicate IDs are read once.
    ///
    /// Locks are taken in ascending ID order, the same order
    /// [`commit`](Self::commit) uses, so the result never shows one side of
    /// a multi-account commit without the other.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if any of the accounts does not exist.
    pub fn snapshot_many(&self, ids: &[AccountId]) -> Result<Vec<AccountSnapshot>, LedgerError> {
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let accounts = ids
            .iter()
            .map(|&id| self.handle(id))
            .collect::<Result<Vec<_>, _>>()?;
        let guards: Vec<_> = accounts.iter().map(|account| account.inner.lock()).collect();
        Ok(accounts
            .iter()
            .zip(&guards)
            .map(|(account, data)| AccountSnapshot {
                account: account.id,
                balance: data.balance,
                version: data.version,
            })
            .collect())
    }

    /// Snapshots of every account, ordered by account ID.
    pub fn snapshots(&self) -> Vec<AccountSnapshot> {
        let mut all: Vec<AccountSnapshot> = self
            .accounts
            .iter()
            .map(|account| account.value().snapshot())
            .collect();
        all.sort_by_key(|snapshot| snapshot.account);
        all
    }

    /// Applies `delta` to a single account if its version still equals
    /// `expected_version`. Returns the new version.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - Account does not exist.
    /// - [`LedgerError::VersionConflict`] - Stored version differs.
    /// - [`LedgerError::InsufficientFunds`] - `balance + delta < 0`.
    pub fn apply_delta(
        &self,
        id: AccountId,
        delta: i64,
        expected_version: u64,
    ) -> Result<u64, LedgerError> {
        let change = BalanceChange {
            account: id,
            delta,
            expected_version,
        };
        let (snapshots, ()) = self.commit(&[change], |_| Ok(()))?;
        Ok(snapshots[0].version)
    }

    /// Applies every change as one atomic unit.
    ///
    /// Accounts are locked in ascending [`AccountId`] order regardless of
    /// the order of `changes`. Once all versions and resulting balances are
    /// validated, `on_commit` runs with the staged snapshots while the locks
    /// are still held; only if it succeeds are the new balances written.
    /// Either every change becomes visible or none does.
    ///
    /// Returned snapshots follow the order of `changes`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::NotFound`] - Any account does not exist.
    /// - [`LedgerError::SelfTransfer`] - The same account appears twice.
    /// - [`LedgerError::VersionConflict`] - Any stored version differs.
    /// - [`LedgerError::InsufficientFunds`] - Any balance would go negative.
    /// - Whatever `on_commit` returns.
    pub fn commit<T, F>(
        &self,
        changes: &[BalanceChange],
        on_commit: F,
    ) -> Result<(Vec<AccountSnapshot>, T), LedgerError>
    where
        F: FnOnce(&[AccountSnapshot]) -> Result<T, LedgerError>,
    {
        let mut order: Vec<usize> = (0..changes.len()).collect();
        order.sort_by_key(|&i| changes[i].account);

        let accounts = order
            .iter()
            .map(|&i| self.handle(changes[i].account))
            .collect::<Result<Vec<_>, _>>()?;
        if accounts.windows(2).any(|pair| pair[0].id == pair[1].id) {
            return Err(LedgerError::SelfTransfer);
        }

        let mut guards: Vec<_> = accounts.iter().map(|account| account.inner.lock()).collect();

        let mut staged = Vec::with_capacity(changes.len());
        for (guard, &i) in guards.iter().zip(&order) {
            let change = &changes[i];
            if guard.version != change.expected_version {
                return Err(LedgerError::VersionConflict {
                    expected: change.expected_version,
                    actual: guard.version,
                });
            }
            staged.push(AccountSnapshot {
                account: change.account,
                balance: guard.staged_balance(change.delta)?,
                version: guard.version + 1,
            });
        }

        let mut position = vec![0; changes.len()];
        for (sorted, &original) in order.iter().enumerate() {
            position[original] = sorted;
        }
        let snapshots: Vec<AccountSnapshot> = position.iter().map(|&p| staged[p]).collect();

        let value = on_commit(&snapshots)?;

        for (guard, snapshot) in guards.iter_mut().zip(&staged) {
            guard.write(snapshot.balance, snapshot.version);
        }
        Ok((snapshots, value))
    }

    /// Overwrites an account's state when rebuilding from a journal.
    pub(crate) fn restore(&self, id: AccountId, balance: u64, version: u64) {
        let account = Arc::clone(
            self.accounts
                .entry(id)
                .or_insert_with(|| Arc::new(Account::new(id)))
                .value(),
        );
        let mut data = account.inner.lock();
        data.balance = balance;
        data.version = version;
    }
}
