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

//! Lifecycle of a single financial operation.
//!
//! ```text
//!  Initiated ──► Reserved ──► Applying ──► Committed
//!      │            │            │
//!      └────────────┴────────────┴──────► Rejected
//! ```
//!
//! `Committed` and `Rejected` are terminal. An operation that fails for a
//! reason that is not recorded in the ledger (contention, storage failure,
//! a missing account) still ends `Rejected`; its idempotency key is
//! released instead of resolved.

use crate::entry::EntryKind;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpState {
    Initiated,
    Reserved,
    Applying,
    Committed,
    Rejected,
}

impl OpState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Rejected)
    }

    pub fn can_advance_to(self, next: OpState) -> bool {
        use OpState::*;
        matches!(
            (self, next),
            (Initiated, Reserved)
                | (Reserved, Applying)
                | (Applying, Committed)
                | (Initiated | Reserved | Applying, Rejected)
        )
    }
}

/// Tracks one in-flight operation through [`OpState`].
#[derive(Debug)]
pub(crate) struct Operation<'k> {
    kind: EntryKind,
    key: &'k str,
    state: OpState,
}

impl<'k> Operation<'k> {
    pub(crate) fn start(kind: EntryKind, key: &'k str) -> Self {
        trace!(kind = %kind, key, "operation initiated");
        Self {
            kind,
            key,
            state: OpState::Initiated,
        }
    }

    pub(crate) fn state(&self) -> OpState {
        self.state
    }

    pub(crate) fn advance(&mut self, next: OpState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "Invariant violated: operation moved {:?} -> {:?}",
            self.state,
            next
        );
        debug!(
            kind = %self.kind,
            key = self.key,
            from = ?self.state,
            to = ?next,
            "operation state changed"
        );
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [OpState; 5] = [
        OpState::Initiated,
        OpState::Reserved,
        OpState::Applying,
        OpState::Committed,
        OpState::Rejected,
    ];

    #[test]
    fn terminal_states_never_advance() {
        for terminal in [OpState::Committed, OpState::Rejected] {
            assert!(terminal.is_terminal());
            for next in ALL {
                assert!(!terminal.can_advance_to(next), "{terminal:?} -> {next:?}");
            }
        }
    }

    #[test]
    fn happy_path_is_linear() {
        assert!(OpState::Initiated.can_advance_to(OpState::Reserved));
        assert!(OpState::Reserved.can_advance_to(OpState::Applying));
        assert!(OpState::Applying.can_advance_to(OpState::Committed));
        assert!(!OpState::Initiated.can_advance_to(OpState::Applying));
        assert!(!OpState::Reserved.can_advance_to(OpState::Committed));
    }

    #[test]
    fn any_live_state_can_reject() {
        for state in [OpState::Initiated, OpState::Reserved, OpState::Applying] {
            assert!(!state.is_terminal());
            assert!(state.can_advance_to(OpState::Rejected));
        }
    }

    #[test]
    fn operation_tracks_state() {
        let mut op = Operation::start(EntryKind::Deposit, "k1");
        assert_eq!(op.state(), OpState::Initiated);
        op.advance(OpState::Reserved);
        op.advance(OpState::Applying);
        op.advance(OpState::Committed);
        assert_eq!(op.state(), OpState::Committed);
    }

    #[test]
    #[should_panic(expected = "Invariant violated")]
    #[cfg(debug_assertions)]
    fn leaving_a_terminal_state_panics_in_debug() {
        let mut op = Operation::start(EntryKind::Withdrawal, "k2");
        op.advance(OpState::Rejected);
        op.advance(OpState::Applying);
    }
}
