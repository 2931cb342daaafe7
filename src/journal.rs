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

//! Append-only CSV journal.
//!
//! One headerless row per finalized entry, flushed before the write is
//! reported as done:
//!
//! ```csv
//! id,kind,from,to,amount,status,idempotency_key,created_at
//! 1,deposit,,7,50000,committed,k1,2025-03-01T10:00:00Z
//! ```
//!
//! Accounts opened before their first entry get a shorter row of their own:
//!
//! ```csv
//! open,8,2025-03-01T09:59:00Z
//! ```
//!
//! The header line above is documentation only and never written.

use crate::LedgerError;
use crate::base::AccountId;
use crate::entry::LedgerEntry;
use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use serde::Serialize;
use std::fmt;
use std::io::{Read, Write};

const OPENED: &str = "open";

/// One row read back from a journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    /// An account created with no entry yet.
    Opened {
        account: AccountId,
        at: DateTime<Utc>,
    },
    /// A finalized ledger entry.
    Entry(LedgerEntry),
}

/// Durable sink for finalized entries and account openings.
pub struct Journal {
    sink: Box<dyn Write + Send>,
}

impl Journal {
    pub fn new<W>(sink: W) -> Self
    where
        W: Write + Send + 'static,
    {
        Self {
            sink: Box::new(sink),
        }
    }

    /// Writes one entry and flushes it.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Storage`] if serialization or the underlying write
    /// fails. The entry must not be treated as durable in that case.
    pub fn record(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        self.append(entry)
    }

    /// Writes an account opening and flushes it.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Storage`] if the underlying write fails.
    pub fn record_open(
        &mut self,
        account: AccountId,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        self.append((OPENED, account, at))
    }

    /// Each row is encoded on its own so a failed write never leaves bytes
    /// behind to be emitted with the next one.
    fn append<T: Serialize>(&mut self, row: T) -> Result<(), LedgerError> {
        let mut encoder = WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        encoder.serialize(row)?;
        let bytes = encoder
            .into_inner()
            .map_err(|err| LedgerError::Storage(err.to_string()))?;
        self.sink.write_all(&bytes)?;
        self.sink.flush()?;
        Ok(())
    }
}

impl fmt::Debug for Journal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Journal").finish_non_exhaustive()
    }
}

/// Reads every record from a journal, in write order.
///
/// # Errors
///
/// [`LedgerError::Storage`] on the first unreadable row. A journal is not
/// skimmed past corruption.
pub fn read_journal<R: Read>(reader: R) -> Result<Vec<JournalRecord>, LedgerError> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);
    let mut records = Vec::new();
    for row in rdr.records() {
        let row = row?;
        let record = if row.get(0) == Some(OPENED) {
            let (_, account, at): (String, AccountId, DateTime<Utc>) = row.deserialize(None)?;
            JournalRecord::Opened { account, at }
        } else {
            JournalRecord::Entry(row.deserialize(None)?)
        };
        records.push(record);
    }
    Ok(records)
}
