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

//! Wallet engine.
//!
//! The [`Engine`] is the only component that moves money. It ties together
//! the [`AccountStore`], the [`LedgerLog`], and the [`IdempotencyGuard`]:
//!
//! 1. Validate the amount (and, for transfers, that the sides differ).
//! 2. Reserve the idempotency key, or return the recorded outcome of an
//!    earlier attempt with the same key.
//! 3. Check the accounts exist, creating the destination of a deposit.
//! 4. Read account versions and commit every balance change as one unit,
//!    finalizing the ledger entry inside the commit. Version conflicts are
//!    retried up to [`LedgerConfig::max_retries`] times.
//! 5. Resolve the key with the committed or rejected entry, or release it
//!    if nothing was recorded.
//!
//! # Thread Safety
//!
//! Operations on different accounts never share a lock. A transfer locks
//! its two accounts in ascending [`AccountId`] order, so two transfers in
//! opposite directions cannot deadlock.

use crate::LedgerError;
use crate::account::{AccountSnapshot, AccountStore, BalanceChange};
use crate::amount::Amount;
use crate::base::{AccountId, EntryId};
use crate::config::LedgerConfig;
use crate::entry::{EntryFilter, EntryStatus, LedgerEntry, NewEntry};
use crate::idempotency::{IdempotencyGuard, Reservation, SweepReport};
use crate::journal::{Journal, JournalRecord, read_journal};
use crate::ledger::LedgerLog;
use crate::operation::{OpState, Operation};
use crate::payout::{BankDetails, PayoutAlert, PayoutAlerts, PayoutGateway, PayoutRequest};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// Outcome of a successful financial operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    /// The committed ledger entry.
    pub entry: LedgerEntry,
    /// Balance of the credited account for a deposit, or of the debited
    /// account for a withdrawal or transfer. Post-commit for a fresh
    /// operation, current for a replay.
    pub balance: u64,
    /// `true` when this is the recorded result of an earlier request with
    /// the same idempotency key and nothing was executed.
    pub replayed: bool,
}

/// Why an attempt did not commit.
enum Failure {
    /// Recorded as a rejected entry; retries see the same rejection.
    Rejected(LedgerEntry),
    /// Nothing recorded; the key is released so the caller may retry.
    Abandoned(LedgerError),
}

/// Wallet ledger engine.
///
/// # Invariants
///
/// - No balance is ever negative.
/// - A transfer's debit and credit become visible together or not at all.
/// - Every successful call has a committed ledger entry behind it.
/// - An idempotency key executes its operation at most once.
pub struct Engine {
    config: LedgerConfig,
    accounts: AccountStore,
    ledger: LedgerLog,
    guard: IdempotencyGuard,
    payouts: Option<Arc<dyn PayoutGateway>>,
    alerts: PayoutAlerts,
}

impl Engine {
    /// Creates an engine with default configuration and no accounts.
    pub fn new() -> Self {
        Self::with_config(LedgerConfig::default())
    }

    pub fn with_config(config: LedgerConfig) -> Self {
        Engine {
            config,
            accounts: AccountStore::new(),
            ledger: LedgerLog::new(),
            guard: IdempotencyGuard::from_config(&config),
            payouts: None,
            alerts: PayoutAlerts::new(),
        }
    }

    /// Journals every finalized entry from now on.
    pub fn with_journal(self, journal: Journal) -> Self {
        self.ledger.attach_journal(journal);
        self
    }

    pub fn with_payout_gateway(mut self, gateway: Arc<dyn PayoutGateway>) -> Self {
        self.payouts = Some(gateway);
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    pub fn ledger(&self) -> &LedgerLog {
        &self.ledger
    }

    /// Creates a zero-balance account if the user has none yet.
    ///
    /// The opening is journaled before the account becomes visible, so it
    /// survives a restart even if no entry ever touches the account.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Storage`] if the journal did not confirm the opening.
    pub fn open_account(&self, account: AccountId) -> Result<AccountSnapshot, LedgerError> {
        if !self.accounts.contains(account) {
            self.ledger.journal_open(account, Utc::now())?;
            if self.accounts.create_if_absent(account) {
                debug!(account = %account, "account opened");
            }
        }
        self.accounts.snapshot(account)
    }

    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if the account does not exist.
    pub fn account(&self, account: AccountId) -> Result<AccountSnapshot, LedgerError> {
        self.accounts.snapshot(account)
    }

    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if the account does not exist.
    pub fn get_balance(&self, account: AccountId) -> Result<u64, LedgerError> {
        self.accounts.get_balance(account)
    }

    /// Transaction history of one account, newest first.
    ///
    /// Includes entries where the account is either side, rejected ones
    /// included. `filter.account` is overridden with `account`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if the account does not exist.
    pub fn list_transactions(
        &self,
        account: AccountId,
        filter: EntryFilter,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        if !self.accounts.contains(account) {
            return Err(LedgerError::NotFound(account));
        }
        Ok(self.ledger.query(&filter.account(account)))
    }

    /// Credits `amount` minor units to `account`, creating it if needed.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidAmount`] - `amount` is zero or out of range.
    /// - [`LedgerError::MissingIdempotencyKey`] - `key` is empty.
    /// - [`LedgerError::OperationInProgress`] - Same key is still running.
    /// - [`LedgerError::IdempotencyKeyReused`] - Key belongs to another operation.
    /// - [`LedgerError::Contention`] - Version conflicts exhausted retries.
    /// - [`LedgerError::Storage`] - Journal did not confirm the entry.
    #[instrument(level = "debug", skip(self))]
    pub fn deposit(
        &self,
        account: AccountId,
        amount: u64,
        key: &str,
    ) -> Result<Receipt, LedgerError> {
        let amount = Amount::new(amount)?;
        self.run(NewEntry::deposit(account, amount, key))
    }

    /// Debits `amount` minor units from `account` and hands the payout to
    /// the configured [`PayoutGateway`].
    ///
    /// The payout is attempted only after the debit commits, and only for
    /// a fresh (not replayed) withdrawal. A payout failure does not undo the
    /// debit; it is logged and queued in [`Engine::payout_alerts`].
    ///
    /// # Errors
    ///
    /// As [`Engine::deposit`], plus:
    /// - [`LedgerError::NotFound`] - Account does not exist.
    /// - [`LedgerError::InsufficientFunds`] - Balance is below `amount`. A
    ///   rejected entry is recorded and retries get the same error.
    #[instrument(level = "debug", skip(self, bank))]
    pub fn withdraw(
        &self,
        account: AccountId,
        amount: u64,
        bank: &BankDetails,
        key: &str,
    ) -> Result<Receipt, LedgerError> {
        let amount = Amount::new(amount)?;
        let receipt = self.run(NewEntry::withdrawal(account, amount, key))?;
        if !receipt.replayed {
            self.pay_out(&receipt.entry, account, bank);
        }
        Ok(receipt)
    }

    /// Moves `amount` minor units from `from` to `to` as one atomic unit.
    ///
    /// # Errors
    ///
    /// As [`Engine::withdraw`], plus:
    /// - [`LedgerError::SelfTransfer`] - `from == to`.
    /// - [`LedgerError::NotFound`] - Either account does not exist.
    #[instrument(level = "debug", skip(self))]
    pub fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: u64,
        key: &str,
    ) -> Result<Receipt, LedgerError> {
        let amount = Amount::new(amount)?;
        self.run(NewEntry::transfer(from, to, amount, key)?)
    }

    /// Releases abandoned reservations and forgets expired keys.
    pub fn sweep_idempotency(&self, now: DateTime<Utc>) -> SweepReport {
        let report = self.guard.sweep(now);
        if report != SweepReport::default() {
            debug!(
                abandoned = report.abandoned,
                expired = report.expired,
                "idempotency sweep"
            );
        }
        report
    }

    /// Takes every outstanding payout alert.
    pub fn payout_alerts(&self) -> Vec<PayoutAlert> {
        self.alerts.drain()
    }

    /// Rebuilds accounts, history, and recent idempotency keys from a
    /// journal.
    ///
    /// Returns the number of records read.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Storage`] if the engine already holds accounts or
    /// entries, if the journal is unreadable, or if replaying it would drive
    /// a balance negative. Nothing is applied in any of those cases.
    pub fn recover<R: Read>(&self, reader: R) -> Result<usize, LedgerError> {
        if !self.accounts.is_empty() || !self.ledger.is_empty() {
            return Err(LedgerError::Storage(
                "journal can only be recovered into an empty engine".into(),
            ));
        }
        let records = read_journal(reader)?;
        let count = records.len();

        let mut balances: HashMap<AccountId, (i128, u64)> = HashMap::new();
        let mut entries = Vec::new();
        for record in records {
            let entry = match record {
                JournalRecord::Opened { account, .. } => {
                    balances.entry(account).or_insert((0, 0));
                    continue;
                }
                JournalRecord::Entry(entry) => entry,
            };
            for account in [entry.from, entry.to].into_iter().flatten() {
                balances.entry(account).or_insert((0, 0));
            }
            if entry.is_committed() {
                for (account, delta) in legs(entry.from, entry.to, entry.amount) {
                    let (balance, version) = balances.entry(account).or_insert((0, 0));
                    *balance += i128::from(delta);
                    *version += 1;
                    if *balance < 0 {
                        return Err(LedgerError::Storage(format!(
                            "journal drives account {account} negative at entry {}",
                            entry.id
                        )));
                    }
                }
            }
            entries.push(entry);
        }

        let mut restored = Vec::with_capacity(balances.len());
        for (account, (balance, version)) in balances {
            let balance = u64::try_from(balance).map_err(|_| {
                LedgerError::Storage(format!("journal overflows account {account}"))
            })?;
            restored.push((account, balance, version));
        }
        for (account, balance, version) in restored {
            self.accounts.restore(account, balance, version);
        }

        let now = Utc::now();
        for entry in entries {
            self.guard.restore(entry.clone(), now);
            self.ledger.restore(entry);
        }
        debug!(records = count, accounts = self.accounts.len(), "journal recovered");
        Ok(count)
    }

    fn run(&self, draft: NewEntry) -> Result<Receipt, LedgerError> {
        let mut op = Operation::start(draft.kind, &draft.idempotency_key);

        let reserved = match self.guard.reserve(&draft.idempotency_key) {
            Ok(Reservation::Fresh(reserved)) => reserved,
            Ok(Reservation::Completed(prior)) => return self.replay(&draft, prior),
            Err(err) => {
                op.advance(OpState::Rejected);
                return Err(err);
            }
        };
        op.advance(OpState::Reserved);

        match self.apply(&draft, &mut op) {
            Ok((entry, balance)) => {
                reserved.resolve(&entry);
                op.advance(OpState::Committed);
                Ok(Receipt {
                    entry,
                    balance,
                    replayed: false,
                })
            }
            Err(Failure::Rejected(entry)) => {
                reserved.resolve(&entry);
                op.advance(OpState::Rejected);
                Err(LedgerError::InsufficientFunds)
            }
            Err(Failure::Abandoned(err)) => {
                reserved.release();
                op.advance(OpState::Rejected);
                Err(err)
            }
        }
    }

    /// Existence checks, then the optimistic commit loop.
    fn apply(
        &self,
        draft: &NewEntry,
        op: &mut Operation<'_>,
    ) -> Result<(LedgerEntry, u64), Failure> {
        debug_assert_eq!(op.state(), OpState::Reserved);
        if let Some(to) = draft.to.filter(|_| draft.from.is_none()) {
            self.open_account(to).map_err(Failure::Abandoned)?;
        }
        for account in [draft.from, draft.to].into_iter().flatten() {
            if !self.accounts.contains(account) {
                return Err(Failure::Abandoned(LedgerError::NotFound(account)));
            }
        }

        op.advance(OpState::Applying);
        let deltas = legs(draft.from, draft.to, draft.amount);
        let entry_id = self.ledger.append(draft.clone());

        let touched: Vec<AccountId> = deltas.iter().map(|&(account, _)| account).collect();
        for attempt in 1..=self.config.max_retries {
            let current = match self.accounts.snapshot_many(&touched) {
                Ok(current) => current,
                Err(err) => return Err(self.abandon(entry_id, err)),
            };
            let changes: Vec<BalanceChange> = deltas
                .iter()
                .map(|&(account, delta)| BalanceChange {
                    account,
                    delta,
                    expected_version: current
                        .iter()
                        .find(|snapshot| snapshot.account == account)
                        .map_or(0, |snapshot| snapshot.version),
                })
                .collect();

            let committed = self.accounts.commit(&changes, |_| {
                self.ledger.mark_status(entry_id, EntryStatus::Committed)
            });

            match committed {
                Ok((snapshots, entry)) => {
                    let balance = snapshots.first().map_or(0, |s| s.balance);
                    debug!(entry = %entry.id, kind = %entry.kind, attempt, "committed");
                    return Ok((entry, balance));
                }
                Err(LedgerError::VersionConflict { expected, actual }) => {
                    debug!(entry = %entry_id, attempt, expected, actual, "version conflict, retrying");
                }
                Err(LedgerError::InsufficientFunds) => {
                    return match self.ledger.mark_status(entry_id, EntryStatus::Rejected) {
                        Ok(entry) => {
                            debug!(entry = %entry.id, kind = %entry.kind, "rejected: insufficient funds");
                            Err(Failure::Rejected(entry))
                        }
                        Err(err) => Err(self.abandon(entry_id, err)),
                    };
                }
                Err(err) => return Err(self.abandon(entry_id, err)),
            }
        }

        warn!(
            entry = %entry_id,
            retries = self.config.max_retries,
            "version conflicts exhausted retry budget"
        );
        Err(self.abandon(entry_id, LedgerError::Contention))
    }

    fn abandon(&self, entry_id: EntryId, err: LedgerError) -> Failure {
        if let Err(discard_err) = self.ledger.discard(entry_id) {
            error!(entry = %entry_id, error = %discard_err, "could not discard abandoned entry");
        }
        Failure::Abandoned(err)
    }

    fn replay(&self, draft: &NewEntry, prior: LedgerEntry) -> Result<Receipt, LedgerError> {
        if !draft.same_operation(&prior) {
            warn!(
                key = %draft.idempotency_key,
                entry = %prior.id,
                "idempotency key reused for a different operation"
            );
            return Err(LedgerError::IdempotencyKeyReused);
        }
        debug!(key = %draft.idempotency_key, entry = %prior.id, "replaying recorded outcome");
        if prior.status == EntryStatus::Rejected {
            return Err(LedgerError::InsufficientFunds);
        }
        let primary = prior.from.or(prior.to);
        let balance = match primary {
            Some(account) => self.accounts.get_balance(account)?,
            None => 0,
        };
        Ok(Receipt {
            entry: prior,
            balance,
            replayed: true,
        })
    }

    fn pay_out(&self, entry: &LedgerEntry, account: AccountId, bank: &BankDetails) {
        let Some(gateway) = &self.payouts else {
            return;
        };
        let request = PayoutRequest {
            entry: entry.id,
            account,
            amount: entry.amount,
            bank: bank.clone(),
            reference: entry.idempotency_key.clone(),
        };
        match gateway.send(&request) {
            Ok(payout_id) => {
                debug!(entry = %entry.id, payout = %payout_id, "payout submitted");
            }
            Err(err) => {
                error!(
                    entry = %entry.id,
                    account = %account,
                    amount = %entry.amount,
                    error = %err,
                    "payout failed after committed withdrawal, manual reconciliation required"
                );
                self.alerts.raise(request, err);
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Signed balance changes of an entry: debit `from` first, then credit `to`.
fn legs(from: Option<AccountId>, to: Option<AccountId>, amount: Amount) -> Vec<(AccountId, i64)> {
    from.map(|account| (account, amount.debit()))
        .into_iter()
        .chain(to.map(|account| (account, amount.credit())))
        .collect()
}
