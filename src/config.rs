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

//! Engine configuration.

use chrono::Duration;
use tracing::warn;

/// Tunables for the engine and its idempotency guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Attempts at an optimistic write before giving up with `Contention`.
    pub max_retries: u32,

    /// How long a resolved idempotency key keeps answering retries.
    pub idempotency_retention: Duration,

    /// How long a reserved but unresolved key may stay reserved before it is
    /// treated as abandoned and released.
    pub pending_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            idempotency_retention: Duration::hours(24),
            pending_timeout: Duration::seconds(30),
        }
    }
}

impl LedgerConfig {
    pub const MAX_RETRIES_VAR: &'static str = "LEDGER_MAX_RETRIES";
    pub const RETENTION_VAR: &'static str = "LEDGER_IDEMPOTENCY_RETENTION_SECS";
    pub const PENDING_TIMEOUT_VAR: &'static str = "LEDGER_PENDING_TIMEOUT_SECS";

    /// Defaults overlaid with `LEDGER_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns for each variable.
    ///
    /// Values that do not parse, or are not positive, are ignored with a
    /// warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            max_retries: positive(&lookup, Self::MAX_RETRIES_VAR)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.max_retries),
            idempotency_retention: positive(&lookup, Self::RETENTION_VAR)
                .and_then(Duration::try_seconds)
                .unwrap_or(defaults.idempotency_retention),
            pending_timeout: positive(&lookup, Self::PENDING_TIMEOUT_VAR)
                .and_then(Duration::try_seconds)
                .unwrap_or(defaults.pending_timeout),
        }
    }
}

fn positive<F>(lookup: &F, name: &str) -> Option<i64>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(name)?;
    match raw.trim().parse::<i64>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            warn!(variable = name, value = %raw, "ignoring invalid configuration value");
            None
        }
    }
}
