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

//! Integration tests for the wallet engine's public API.

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;
use wallet_ledger::{
    AccountId, BankDetails, Engine, EntryFilter, EntryKind, EntryStatus, Journal, LedgerError,
    JournalRecord, PayoutError, PayoutGateway, PayoutRequest, read_journal,
};

const X: AccountId = AccountId(1);
const Y: AccountId = AccountId(2);

fn bank() -> BankDetails {
    BankDetails {
        account_number: "000123456789".into(),
        ifsc: "SBIN0000001".into(),
        beneficiary_name: "X. Holder".into(),
    }
}

fn funded(balance: u64) -> Engine {
    let engine = Engine::new();
    engine.deposit(X, balance, "seed").unwrap();
    engine.open_account(Y).unwrap();
    engine
}

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Records every request; fails them all when `down` is set.
#[derive(Default)]
struct RecordingGateway {
    requests: Mutex<Vec<PayoutRequest>>,
    down: bool,
}

impl PayoutGateway for RecordingGateway {
    fn send(&self, request: &PayoutRequest) -> Result<String, PayoutError> {
        self.requests.lock().push(request.clone());
        if self.down {
            Err(PayoutError("gateway unreachable".into()))
        } else {
            Ok(format!("payout-{}", request.entry))
        }
    }
}

// === End-to-end Scenario ===

#[test]
fn deposit_overdraft_transfer_and_replay() {
    let engine = Engine::new();
    engine.open_account(Y).unwrap();

    let deposit = engine.deposit(X, 500, "k1").unwrap();
    assert_eq!(deposit.balance, 500);
    assert!(!deposit.replayed);

    assert_eq!(
        engine.withdraw(X, 600, &bank(), "k2"),
        Err(LedgerError::InsufficientFunds)
    );
    assert_eq!(engine.get_balance(X), Ok(500));

    let transfer = engine.transfer(X, Y, 200, "k3").unwrap();
    assert_eq!(transfer.balance, 300);
    assert_eq!(engine.get_balance(X), Ok(300));
    assert_eq!(engine.get_balance(Y), Ok(200));

    let replay = engine.transfer(X, Y, 200, "k3").unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.entry, transfer.entry);
    assert_eq!(engine.get_balance(X), Ok(300));
    assert_eq!(engine.get_balance(Y), Ok(200));

    // Two committed entries and one rejected one.
    assert_eq!(engine.ledger().len(), 3);
    let committed = engine.ledger().query(&EntryFilter::new().status(EntryStatus::Committed));
    assert_eq!(committed.len(), 2);
}

// === Caller Boundary ===

#[test]
fn invalid_amounts_are_rejected_before_anything_runs() {
    let engine = funded(100);

    assert_eq!(engine.deposit(X, 0, "a"), Err(LedgerError::InvalidAmount));
    assert_eq!(engine.deposit(X, u64::MAX, "b"), Err(LedgerError::InvalidAmount));
    assert_eq!(
        engine.withdraw(X, 0, &bank(), "c"),
        Err(LedgerError::InvalidAmount)
    );
    assert_eq!(engine.transfer(X, Y, 0, "d"), Err(LedgerError::InvalidAmount));

    assert_eq!(engine.ledger().len(), 1);
    // Keys were never reserved, so they remain usable.
    assert!(engine.deposit(X, 1, "a").is_ok());
}

#[test]
fn empty_key_is_rejected() {
    let engine = funded(100);
    assert_eq!(
        engine.deposit(X, 10, ""),
        Err(LedgerError::MissingIdempotencyKey)
    );
    assert_eq!(engine.get_balance(X), Ok(100));
}

#[test]
fn self_transfer_is_rejected() {
    let engine = funded(100);
    assert_eq!(engine.transfer(X, X, 10, "t"), Err(LedgerError::SelfTransfer));
    assert_eq!(engine.account(X).unwrap().version, 1);
}

#[test]
fn unknown_accounts_fail_without_side_effects() {
    let engine = funded(100);
    let stranger = AccountId(99);

    assert_eq!(
        engine.transfer(X, stranger, 10, "t1"),
        Err(LedgerError::NotFound(stranger))
    );
    assert_eq!(
        engine.transfer(stranger, X, 10, "t2"),
        Err(LedgerError::NotFound(stranger))
    );
    assert_eq!(
        engine.withdraw(stranger, 10, &bank(), "w1"),
        Err(LedgerError::NotFound(stranger))
    );
    assert_eq!(engine.get_balance(stranger), Err(LedgerError::NotFound(stranger)));
    assert_eq!(engine.get_balance(X), Ok(100));
    assert_eq!(engine.ledger().len(), 1);
    assert!(!engine.accounts().contains(stranger));
}

#[test]
fn deposit_creates_missing_account() {
    let engine = Engine::new();
    let receipt = engine.deposit(AccountId(7), 250, "d1").unwrap();

    assert_eq!(receipt.balance, 250);
    assert_eq!(receipt.entry.kind, EntryKind::Deposit);
    assert_eq!(receipt.entry.from, None);
    assert_eq!(receipt.entry.to, Some(AccountId(7)));
    assert_eq!(engine.account(AccountId(7)).unwrap().version, 1);
}

#[test]
fn open_account_is_idempotent() {
    let engine = funded(100);
    let snapshot = engine.open_account(X).unwrap();
    assert_eq!(snapshot.balance, 100);
    assert_eq!(snapshot.version, 1);

    let fresh = engine.open_account(AccountId(3)).unwrap();
    assert_eq!((fresh.balance, fresh.version), (0, 0));
}

// === Idempotency ===

#[test]
fn replayed_deposit_reports_current_balance() {
    let engine = funded(100);
    engine.deposit(X, 50, "d1").unwrap();
    engine.withdraw(X, 30, &bank(), "w1").unwrap();

    let replay = engine.deposit(X, 50, "d1").unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.balance, 120);
    assert_eq!(engine.ledger().len(), 3);
}

#[test]
fn key_reused_for_different_operation_is_refused() {
    let engine = funded(100);
    engine.deposit(X, 50, "k").unwrap();

    assert_eq!(engine.deposit(X, 51, "k"), Err(LedgerError::IdempotencyKeyReused));
    assert_eq!(engine.deposit(Y, 50, "k"), Err(LedgerError::IdempotencyKeyReused));
    assert_eq!(
        engine.withdraw(X, 50, &bank(), "k"),
        Err(LedgerError::IdempotencyKeyReused)
    );
    assert_eq!(engine.get_balance(X), Ok(150));
}

#[test]
fn rejected_outcome_is_replayed_even_after_funding() {
    let engine = funded(100);
    assert_eq!(engine.transfer(X, Y, 500, "t1"), Err(LedgerError::InsufficientFunds));

    engine.deposit(X, 1_000, "top-up").unwrap();
    assert_eq!(engine.transfer(X, Y, 500, "t1"), Err(LedgerError::InsufficientFunds));
    assert_eq!(engine.get_balance(Y), Ok(0));

    // A new key executes.
    assert!(engine.transfer(X, Y, 500, "t2").is_ok());
    assert_eq!(engine.get_balance(Y), Ok(500));
}

#[test]
fn expired_keys_execute_again_after_sweep() {
    let engine = funded(100);
    engine.deposit(X, 10, "d1").unwrap();

    let report = engine.sweep_idempotency(Utc::now() + Duration::hours(25));
    assert_eq!(report.expired, 2);
    assert_eq!(report.abandoned, 0);

    let again = engine.deposit(X, 10, "d1").unwrap();
    assert!(!again.replayed);
    assert_eq!(engine.get_balance(X), Ok(120));
}

#[test]
fn sweep_within_retention_keeps_keys() {
    let engine = funded(100);
    let report = engine.sweep_idempotency(Utc::now());
    assert_eq!(report, Default::default());
    assert!(engine.deposit(X, 100, "seed").unwrap().replayed);
}

// === Versions ===

#[test]
fn every_commit_bumps_touched_versions_once() {
    let engine = funded(1_000);
    engine.transfer(X, Y, 100, "t1").unwrap();
    engine.transfer(Y, X, 50, "t2").unwrap();
    let _ = engine.withdraw(Y, 1_000, &bank(), "w1");

    assert_eq!(engine.account(X).unwrap().version, 3);
    assert_eq!(engine.account(Y).unwrap().version, 2);
}

// === History ===

#[test]
fn history_is_newest_first_and_covers_both_sides() {
    let engine = Engine::new();
    engine.open_account(Y).unwrap();
    engine.deposit(X, 500, "k1").unwrap();
    let _ = engine.withdraw(X, 600, &bank(), "k2");
    engine.transfer(X, Y, 200, "k3").unwrap();

    let history = engine.list_transactions(X, EntryFilter::new()).unwrap();
    let keys: Vec<&str> = history.iter().map(|e| e.idempotency_key.as_str()).collect();
    assert_eq!(keys, ["k3", "k2", "k1"]);
    assert_eq!(history[1].status, EntryStatus::Rejected);

    let incoming = engine.list_transactions(Y, EntryFilter::new()).unwrap();
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].kind, EntryKind::Transfer);

    let deposits = engine
        .list_transactions(X, EntryFilter::new().kind(EntryKind::Deposit))
        .unwrap();
    assert_eq!(deposits.len(), 1);

    let committed = engine
        .list_transactions(X, EntryFilter::new().status(EntryStatus::Committed))
        .unwrap();
    assert_eq!(committed.len(), 2);

    let future = Utc::now() + Duration::hours(1);
    let none = engine
        .list_transactions(X, EntryFilter::new().between(future, future + Duration::hours(1)))
        .unwrap();
    assert!(none.is_empty());
}

#[test]
fn history_of_unknown_account_is_not_found() {
    let engine = Engine::new();
    assert_eq!(
        engine.list_transactions(X, EntryFilter::new()),
        Err(LedgerError::NotFound(X))
    );
}

// === Payouts ===

#[test]
fn committed_withdrawal_is_paid_out_once() {
    let gateway = Arc::new(RecordingGateway::default());
    let engine = Engine::new().with_payout_gateway(gateway.clone());
    engine.deposit(X, 1_000, "d1").unwrap();

    let receipt = engine.withdraw(X, 400, &bank(), "w1").unwrap();
    engine.withdraw(X, 400, &bank(), "w1").unwrap();
    let _ = engine.withdraw(X, 5_000, &bank(), "w2");

    let requests = gateway.requests.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].entry, receipt.entry.id);
    assert_eq!(requests[0].amount.minor_units(), 400);
    assert_eq!(requests[0].bank, bank());
    assert_eq!(requests[0].reference, "w1");
    assert!(engine.payout_alerts().is_empty());
}

#[test]
fn payout_failure_keeps_debit_and_raises_alert() {
    let gateway = Arc::new(RecordingGateway {
        down: true,
        ..Default::default()
    });
    let engine = Engine::new().with_payout_gateway(gateway);
    engine.deposit(X, 1_000, "d1").unwrap();

    let receipt = engine.withdraw(X, 400, &bank(), "w1").unwrap();
    assert_eq!(receipt.balance, 600);
    assert_eq!(engine.get_balance(X), Ok(600));

    let alerts = engine.payout_alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].request.entry, receipt.entry.id);
    assert_eq!(alerts[0].error, PayoutError("gateway unreachable".into()));
    assert!(engine.payout_alerts().is_empty());
}

// === Journal ===

#[test]
fn journal_receives_every_finalized_entry() {
    let buffer = SharedBuffer::default();
    let engine = Engine::new().with_journal(Journal::new(buffer.clone()));
    engine.open_account(Y).unwrap();
    engine.deposit(X, 500, "k1").unwrap();
    let _ = engine.withdraw(X, 600, &bank(), "k2");
    engine.transfer(X, Y, 200, "k3").unwrap();
    engine.transfer(X, Y, 200, "k3").unwrap();

    let bytes = buffer.0.lock().clone();
    let records = read_journal(bytes.as_slice()).unwrap();
    let opened: Vec<AccountId> = records
        .iter()
        .filter_map(|record| match record {
            JournalRecord::Opened { account, .. } => Some(*account),
            JournalRecord::Entry(_) => None,
        })
        .collect();
    assert_eq!(opened, [Y, X]);

    let entries: Vec<_> = records
        .into_iter()
        .filter_map(|record| match record {
            JournalRecord::Entry(entry) => Some(entry),
            JournalRecord::Opened { .. } => None,
        })
        .collect();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[1].status, EntryStatus::Rejected);
    assert_eq!(entries[2].from, Some(X));
    assert_eq!(entries[2].to, Some(Y));
}

#[test]
fn recovered_engine_matches_original() {
    let buffer = SharedBuffer::default();
    let original = Engine::new().with_journal(Journal::new(buffer.clone()));
    original.open_account(Y).unwrap();
    original.deposit(X, 900, "k1").unwrap();
    original.transfer(X, Y, 300, "k2").unwrap();
    original.transfer(Y, X, 100, "k3").unwrap();
    original.withdraw(X, 50, &bank(), "k4").unwrap();

    let bytes = buffer.0.lock().clone();
    let restored = Engine::new();
    assert_eq!(restored.recover(bytes.as_slice()), Ok(6));

    assert_eq!(restored.accounts().snapshots(), original.accounts().snapshots());
    assert_eq!(
        restored.list_transactions(X, EntryFilter::new()),
        original.list_transactions(X, EntryFilter::new())
    );
}

#[test]
fn opened_account_survives_recovery() {
    let buffer = SharedBuffer::default();
    let original = Engine::new().with_journal(Journal::new(buffer.clone()));
    original.open_account(Y).unwrap();
    original.deposit(X, 500, "k1").unwrap();
    assert_eq!(original.get_balance(Y), Ok(0));

    let bytes = buffer.0.lock().clone();
    let restored = Engine::new();
    restored.recover(bytes.as_slice()).unwrap();
    assert_eq!(restored.get_balance(Y), Ok(0));
    assert_eq!(restored.account(Y).unwrap().version, 0);
    assert_eq!(restored.accounts().snapshots(), original.accounts().snapshots());

    let receipt = restored.transfer(X, Y, 200, "k2").unwrap();
    assert_eq!(receipt.balance, 300);
    assert_eq!(restored.get_balance(Y), Ok(200));
}

#[test]
fn recover_into_used_engine_changes_nothing() {
    let buffer = SharedBuffer::default();
    let original = Engine::new().with_journal(Journal::new(buffer.clone()));
    original.deposit(X, 500, "k1").unwrap();
    let bytes = buffer.0.lock().clone();

    let engine = funded(100);
    assert!(matches!(
        engine.recover(bytes.as_slice()),
        Err(LedgerError::Storage(_))
    ));
    assert_eq!(engine.get_balance(X), Ok(100));
    assert_eq!(engine.ledger().len(), 1);
}
