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

//! Hand-off of committed withdrawals to an external payout provider.
//!
//! The ledger debit is authoritative. A payout is only attempted after the
//! withdrawal is committed, and a failed payout is never reversed
//! automatically: it is queued as a [`PayoutAlert`] for manual
//! reconciliation.

use crate::amount::Amount;
use crate::base::{AccountId, EntryId};
use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Destination bank account for a withdrawal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankDetails {
    pub account_number: String,
    pub ifsc: String,
    pub beneficiary_name: String,
}

/// Instruction sent to the payout provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutRequest {
    /// Committed withdrawal entry being paid out.
    pub entry: EntryId,
    pub account: AccountId,
    pub amount: Amount,
    pub bank: BankDetails,
    /// Stable reference the provider can deduplicate on.
    pub reference: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("payout failed: {0}")]
pub struct PayoutError(pub String);

/// External payout provider.
pub trait PayoutGateway: Send + Sync {
    /// Submits a payout and returns the provider's payout ID.
    fn send(&self, request: &PayoutRequest) -> Result<String, PayoutError>;
}

/// A committed withdrawal whose payout did not go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutAlert {
    pub request: PayoutRequest,
    pub error: PayoutError,
    pub raised_at: DateTime<Utc>,
}

/// Lock-free queue of outstanding payout alerts.
#[derive(Debug, Default)]
pub struct PayoutAlerts {
    queue: SegQueue<PayoutAlert>,
}

impl PayoutAlerts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self, request: PayoutRequest, error: PayoutError) {
        self.queue.push(PayoutAlert {
            request,
            error,
            raised_at: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Removes and returns every queued alert, oldest first.
    pub fn drain(&self) -> Vec<PayoutAlert> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }
}
