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

//! Thread-safe, append-only ledger log.
//!
//! Entries are appended as drafts, which are invisible to readers, and
//! become permanent the one time their status is written. After that the
//! log never changes them again.

use crate::LedgerError;
use crate::base::{AccountId, EntryId};
use crate::entry::{EntryFilter, EntryStatus, LedgerEntry, NewEntry};
use crate::journal::Journal;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error};

#[derive(Debug)]
enum Slot {
    Pending {
        draft: NewEntry,
        created_at: DateTime<Utc>,
    },
    Final(LedgerEntry),
}

/// Append-only record of every balance-affecting operation.
///
/// Backed by a [`DashMap`] keyed by [`EntryId`], so appends and status
/// writes on different entries do not contend. When a [`Journal`] is
/// attached, an entry is only finalized once its journal row is flushed.
#[derive(Debug)]
pub struct LedgerLog {
    next_id: AtomicU64,
    entries: DashMap<EntryId, Slot>,
    journal: Mutex<Option<Journal>>,
}

impl LedgerLog {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: DashMap::new(),
            journal: Mutex::new(None),
        }
    }

    pub fn with_journal(journal: Journal) -> Self {
        let log = Self::new();
        log.attach_journal(journal);
        log
    }

    /// Routes every subsequent status write through `journal`.
    pub fn attach_journal(&self, journal: Journal) {
        *self.journal.lock() = Some(journal);
    }

    /// Journals that `account` was opened, if a journal is attached.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Storage`] if the journal write fails.
    pub fn journal_open(&self, account: AccountId, at: DateTime<Utc>) -> Result<(), LedgerError> {
        match self.journal.lock().as_mut() {
            Some(journal) => journal.record_open(account, at).inspect_err(|err| {
                error!(account = %account, error = %err, "journal write failed");
            }),
            None => Ok(()),
        }
    }

    /// Allocates an ID and timestamp for `draft` and stores it as pending.
    pub fn append(&self, draft: NewEntry) -> EntryId {
        let id = EntryId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.entries.insert(
            id,
            Slot::Pending {
                draft,
                created_at: Utc::now(),
            },
        );
        id
    }

    /// Writes the terminal status of a pending entry. Usable once per entry.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::EntryNotFound`] - ID was never appended or was discarded.
    /// - [`LedgerError::AlreadyFinalized`] - Status was already written.
    /// - [`LedgerError::Storage`] - Journal write failed; the entry stays pending.
    pub fn mark_status(
        &self,
        id: EntryId,
        status: EntryStatus,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut slot = self
            .entries
            .get_mut(&id)
            .ok_or(LedgerError::EntryNotFound(id))?;

        let entry = match &*slot {
            Slot::Final(_) => return Err(LedgerError::AlreadyFinalized(id)),
            Slot::Pending { draft, created_at } => LedgerEntry {
                id,
                kind: draft.kind,
                from: draft.from,
                to: draft.to,
                amount: draft.amount,
                status,
                idempotency_key: draft.idempotency_key.clone(),
                created_at: *created_at,
            },
        };

        if let Some(journal) = self.journal.lock().as_mut() {
            if let Err(err) = journal.record(&entry) {
                error!(entry = %id, error = %err, "journal write failed");
                return Err(err);
            }
        }

        *slot = Slot::Final(entry.clone());
        debug!(entry = %id, kind = %entry.kind, status = %status, "entry finalized");
        Ok(entry)
    }

    /// Drops a pending entry whose operation was abandoned.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::EntryNotFound`] - Unknown ID.
    /// - [`LedgerError::AlreadyFinalized`] - Finalized entries are permanent.
    pub fn discard(&self, id: EntryId) -> Result<(), LedgerError> {
        match self.entries.entry(id) {
            Entry::Vacant(_) => Err(LedgerError::EntryNotFound(id)),
            Entry::Occupied(slot) => {
                if matches!(slot.get(), Slot::Final(_)) {
                    return Err(LedgerError::AlreadyFinalized(id));
                }
                slot.remove();
                Ok(())
            }
        }
    }

    /// Returns a finalized entry. Pending entries are not visible.
    pub fn get(&self, id: EntryId) -> Option<LedgerEntry> {
        match self.entries.get(&id)?.value() {
            Slot::Final(entry) => Some(entry.clone()),
            Slot::Pending { .. } => None,
        }
    }

    /// Finalized entries matching `filter`, most recent first.
    ///
    /// Entries sharing a timestamp are ordered by descending ID.
    pub fn query(&self, filter: &EntryFilter) -> Vec<LedgerEntry> {
        let mut found: Vec<LedgerEntry> = self
            .entries
            .iter()
            .filter_map(|slot| match slot.value() {
                Slot::Final(entry) if filter.matches(entry) => Some(entry.clone()),
                _ => None,
            })
            .collect();
        found.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        found
    }

    /// Number of finalized entries.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Final(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reinstates a finalized entry read back from a journal.
    ///
    /// The ID counter moves past `entry.id` so new appends never collide.
    pub(crate) fn restore(&self, entry: LedgerEntry) {
        self.next_id.fetch_max(entry.id.0 + 1, Ordering::SeqCst);
        self.entries.insert(entry.id, Slot::Final(entry));
    }
}

impl Default for LedgerLog {
    fn default() -> Self {
        Self::new()
    }
}
