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

//! Deduplication of retried client requests.
//!
//! Each client-supplied idempotency key moves through:
//!
//! ```text
//!  (unseen) ──reserve──► Pending ──resolve──► Resolved ──retention──► (unseen)
//!                          │
//!                          ├──release / drop──► (unseen)
//!                          └──pending_timeout──► (unseen), logged as an anomaly
//! ```
//!
//! A [`ReservedKey`] that goes out of scope without being resolved releases
//! its key, so an early return or panic between reserve and resolve never
//! leaves the key stuck.
//!
//! Resolving always records the outcome, even if the reservation was swept
//! or taken over meanwhile: a committed effect must answer every retry.

use crate::LedgerError;
use crate::config::LedgerConfig;
use crate::entry::LedgerEntry;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, warn};

#[derive(Debug, Clone)]
enum KeyState {
    Pending { token: u64, since: DateTime<Utc> },
    Resolved { entry: LedgerEntry, at: DateTime<Utc> },
}

/// Result of [`IdempotencyGuard::reserve`].
#[derive(Debug)]
pub enum Reservation<'a> {
    /// Key was unseen and is now held by the caller.
    Fresh(ReservedKey<'a>),
    /// Key already finished; this is its recorded outcome.
    Completed(LedgerEntry),
}

/// What a [`sweep`](IdempotencyGuard::sweep) removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Reservations that outlived `pending_timeout` without an outcome.
    pub abandoned: usize,
    /// Resolved keys older than the retention window.
    pub expired: usize,
}

/// Tracks idempotency keys and their outcomes.
#[derive(Debug)]
pub struct IdempotencyGuard {
    keys: DashMap<String, KeyState>,
    next_token: AtomicU64,
    retention: Duration,
    pending_timeout: Duration,
}

impl IdempotencyGuard {
    pub fn new(retention: Duration, pending_timeout: Duration) -> Self {
        Self {
            keys: DashMap::new(),
            next_token: AtomicU64::new(1),
            retention,
            pending_timeout,
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.idempotency_retention, config.pending_timeout)
    }

    /// Claims `key` for a new operation, or returns its recorded outcome.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::MissingIdempotencyKey`] - `key` is empty.
    /// - [`LedgerError::OperationInProgress`] - Another caller holds `key`.
    pub fn reserve(&self, key: &str) -> Result<Reservation<'_>, LedgerError> {
        self.reserve_at(key, Utc::now())
    }

    pub(crate) fn reserve_at(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Reservation<'_>, LedgerError> {
        if key.is_empty() {
            return Err(LedgerError::MissingIdempotencyKey);
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let pending = KeyState::Pending { token, since: now };

        match self.keys.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(pending);
            }
            Entry::Occupied(mut slot) => {
                match slot.get() {
                    KeyState::Resolved { entry, at } if now - *at < self.retention => {
                        return Ok(Reservation::Completed(entry.clone()));
                    }
                    KeyState::Pending { since, .. } if now - *since < self.pending_timeout => {
                        return Err(LedgerError::OperationInProgress);
                    }
                    KeyState::Resolved { .. } => {
                        debug!(key, "idempotency key expired, accepting as new");
                    }
                    KeyState::Pending { since, .. } => {
                        error!(
                            key,
                            reserved_at = %since,
                            "reservation abandoned without an outcome, releasing key"
                        );
                    }
                }
                slot.insert(pending);
            }
        }

        Ok(Reservation::Fresh(ReservedKey {
            guard: self,
            key: key.to_string(),
            token,
            settled: false,
        }))
    }

    fn resolve_token(&self, key: &str, token: u64, entry: &LedgerEntry, now: DateTime<Utc>) {
        let resolved = KeyState::Resolved {
            entry: entry.clone(),
            at: now,
        };
        match self.keys.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                let holder = match slot.get() {
                    KeyState::Pending { token: held, .. } => *held,
                    KeyState::Resolved {
                        entry: recorded, ..
                    } => {
                        error!(
                            key,
                            entry = %entry.id,
                            recorded = %recorded.id,
                            "key already resolved by another execution, keeping the first outcome"
                        );
                        return;
                    }
                };
                if holder != token {
                    error!(
                        key,
                        entry = %entry.id,
                        "key was taken over while its operation committed, recording this outcome"
                    );
                }
                slot.insert(resolved);
            }
            Entry::Vacant(slot) => {
                warn!(
                    key,
                    entry = %entry.id,
                    "reservation was released before its outcome was recorded, recording it anyway"
                );
                slot.insert(resolved);
            }
        }
    }

    fn release_token(&self, key: &str, token: u64) -> bool {
        self.keys
            .remove_if(key, |_, state| {
                matches!(state, KeyState::Pending { token: t, .. } if *t == token)
            })
            .is_some()
    }

    /// Drops resolved keys past retention and releases reservations past
    /// the pending timeout.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        self.keys.retain(|key, state| match state {
            KeyState::Resolved { at, .. } => {
                let keep = now - *at < self.retention;
                if !keep {
                    report.expired += 1;
                }
                keep
            }
            KeyState::Pending { since, .. } => {
                let keep = now - *since < self.pending_timeout;
                if !keep {
                    error!(
                        key = key.as_str(),
                        reserved_at = %since,
                        "reservation abandoned without an outcome, releasing key"
                    );
                    report.abandoned += 1;
                }
                keep
            }
        });
        report
    }

    /// Reinstates a resolved key read back from a journal, unless it has
    /// already aged out.
    pub(crate) fn restore(&self, entry: LedgerEntry, now: DateTime<Utc>) {
        let at = entry.created_at;
        if now - at >= self.retention {
            return;
        }
        self.keys
            .insert(entry.idempotency_key.clone(), KeyState::Resolved { entry, at });
    }

    /// Number of tracked keys, pending or resolved.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Default for IdempotencyGuard {
    fn default() -> Self {
        Self::from_config(&LedgerConfig::default())
    }
}

/// A held idempotency key.
///
/// Consume it with [`resolve`](Self::resolve) or [`release`](Self::release).
/// Dropping it unresolved releases the key.
#[derive(Debug)]
pub struct ReservedKey<'a> {
    guard: &'a IdempotencyGuard,
    key: String,
    token: u64,
    settled: bool,
}

impl ReservedKey<'_> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Records `entry` as the outcome every retry of this key will see.
    pub fn resolve(mut self, entry: &LedgerEntry) {
        self.settled = true;
        self.guard
            .resolve_token(&self.key, self.token, entry, Utc::now());
    }

    /// Gives the key back so a retry can run the operation again.
    pub fn release(mut self) {
        self.settled = true;
        if self.guard.release_token(&self.key, self.token) {
            debug!(key = %self.key, "idempotency key released");
        }
    }
}

impl Drop for ReservedKey<'_> {
    fn drop(&mut self) {
        if !self.settled && self.guard.release_token(&self.key, self.token) {
            warn!(key = %self.key, "reservation dropped without an outcome, key released");
        }
    }
}
