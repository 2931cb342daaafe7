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

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use serde::Deserialize;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use wallet_ledger::{AccountId, Amount, BankDetails, Engine, Journal, LedgerConfig, LedgerError};

/// Wallet Ledger - Replay wallet operations from a CSV file
///
/// Reads operations from a CSV file, applies them to the ledger, and writes
/// the resulting balances to stdout.
#[derive(Parser, Debug)]
#[command(name = "wallet-ledger")]
#[command(about = "A wallet ledger that applies operation CSVs", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: op,account,counterparty,amount,key
    /// Example: cargo run -- operations.csv > balances.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Journal file; recovered on start if it exists, appended to afterwards
    #[arg(long, value_name = "FILE")]
    journal: Option<PathBuf>,

    /// Optimistic write attempts before an operation fails with contention
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    max_retries: Option<u32>,

    /// How long a finished idempotency key keeps answering retries
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(i64).range(1..))]
    retention_secs: Option<i64>,

    /// How long a reserved idempotency key may stay unresolved
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(i64).range(1..))]
    pending_timeout_secs: Option<i64>,
}

impl Args {
    /// Environment configuration with command-line flags on top.
    fn config(&self) -> LedgerConfig {
        let mut config = LedgerConfig::from_env();
        if let Some(max_retries) = self.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(retention) = self.retention_secs.and_then(chrono::Duration::try_seconds) {
            config.idempotency_retention = retention;
        }
        if let Some(timeout) = self.pending_timeout_secs.and_then(chrono::Duration::try_seconds) {
            config.pending_timeout = timeout;
        }
        config
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let engine = match open_engine(args.config(), args.journal.as_deref()) {
        Ok(engine) => engine,
        Err(e) => {
            error!(error = %e, "could not open ledger");
            process::exit(1);
        }
    };

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            error!(path = %args.input.display(), error = %e, "could not open input");
            process::exit(1);
        }
    };

    match process_operations(&engine, BufReader::new(file)) {
        Ok(applied) => info!(applied, "operations processed"),
        Err(e) => {
            error!(error = %e, "could not read operations");
            process::exit(1);
        }
    }

    for alert in engine.payout_alerts() {
        warn!(entry = %alert.request.entry, error = %alert.error, "payout outstanding");
    }

    if let Err(e) = write_accounts(&engine, std::io::stdout()) {
        error!(error = %e, "could not write balances");
        process::exit(1);
    }
}

/// Builds the engine, replaying and then appending to `journal` if given.
fn open_engine(config: LedgerConfig, journal: Option<&Path>) -> Result<Engine, LedgerError> {
    let engine = Engine::with_config(config);
    let Some(path) = journal else {
        return Ok(engine);
    };

    if path.exists() {
        let recovered = engine.recover(BufReader::new(File::open(path)?))?;
        info!(path = %path.display(), records = recovered, "journal recovered");
    }
    let sink = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(engine.with_journal(Journal::new(sink)))
}

/// Raw CSV record matching the input format.
///
/// Fields: `op, account, counterparty, amount, key`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    op: String,
    account: u64,
    #[serde(deserialize_with = "csv::invalid_option")]
    counterparty: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    amount: Option<String>,
    #[serde(default)]
    key: String,
}

/// One parsed input row.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Open(AccountId),
    Deposit {
        account: AccountId,
        amount: Amount,
        key: String,
    },
    Withdraw {
        account: AccountId,
        amount: Amount,
        key: String,
    },
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: Amount,
        key: String,
    },
}

impl CsvRecord {
    /// Returns `None` for unknown operations, missing fields, or amounts that
    /// are not a positive number of minor units.
    fn into_command(self) -> Option<Command> {
        let account = AccountId(self.account);
        let amount = || self.amount.as_deref()?.parse::<Amount>().ok();

        match self.op.to_lowercase().as_str() {
            "open" => Some(Command::Open(account)),
            "deposit" => Some(Command::Deposit {
                account,
                amount: amount()?,
                key: self.key,
            }),
            "withdraw" => Some(Command::Withdraw {
                account,
                amount: amount()?,
                key: self.key,
            }),
            "transfer" => Some(Command::Transfer {
                from: account,
                to: AccountId(self.counterparty?),
                amount: amount()?,
                key: self.key,
            }),
            _ => None,
        }
    }
}

/// Applies operations from a CSV reader, in order.
///
/// Malformed rows and refused operations are logged and skipped. Returns the
/// number of operations that committed (replays included).
///
/// # CSV Format
///
/// ```csv
/// op,account,counterparty,amount,key
/// open,2,,,
/// deposit,1,,5.00,k1
/// transfer,1,2,2.00,k2
/// withdraw,1,,1.50,k3
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails.
fn process_operations<R: Read>(engine: &Engine, reader: R) -> Result<usize, csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let bank = BankDetails::default();
    let mut applied = 0;
    for (line, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(line = line + 2, error = %e, "skipping malformed row");
                continue;
            }
        };
        let Some(command) = record.into_command() else {
            warn!(line = line + 2, "skipping invalid operation");
            continue;
        };

        let outcome = match &command {
            Command::Open(account) => engine.open_account(*account).map(drop),
            Command::Deposit {
                account,
                amount,
                key,
            } => engine
                .deposit(*account, amount.minor_units(), key)
                .map(drop),
            Command::Withdraw {
                account,
                amount,
                key,
            } => engine
                .withdraw(*account, amount.minor_units(), &bank, key)
                .map(drop),
            Command::Transfer {
                from,
                to,
                amount,
                key,
            } => engine
                .transfer(*from, *to, amount.minor_units(), key)
                .map(drop),
        };

        match outcome {
            Ok(()) => {
                debug!(line = line + 2, ?command, "applied");
                applied += 1;
            }
            Err(e) => info!(line = line + 2, ?command, error = %e, "operation refused"),
        }
    }

    Ok(applied)
}

/// Write account balances to a CSV writer, ordered by account ID.
///
/// # CSV Format
///
/// ```csv
/// account,balance,version
/// 1,150,3
/// 2,200,1
/// ```
///
/// # Errors
///
/// Returns a CSV error if writing fails.
fn write_accounts<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for snapshot in engine.accounts().snapshots() {
        wtr.serialize(snapshot)?;
    }
    wtr.flush()?;
    Ok(())
}
