//! Fund Ledger CLI
//!
//! Command-line interface for applying fund transactions from CSV files.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- accounts.csv transactions.csv > balances.csv
//! cargo run -- --low-balance-threshold 5000 accounts.csv transactions.csv > balances.csv
//! cargo run -- --batch-size 2000 --max-concurrent 8 accounts.csv transactions.csv > balances.csv
//! RUST_LOG=fund_ledger=debug cargo run -- accounts.csv transactions.csv > balances.csv
//! ```
//!
//! The program loads the fund-account roster, applies every transaction
//! through the ledger, reconciles, and writes the final roster to stdout.
//! Logs, including low-balance alerts and skipped rows, go to stderr.
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (missing arguments, file not found, file not readable, etc.)

use fund_ledger::cli;
use fund_ledger::pipeline::LedgerPipeline;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::parse_args();
    let pipeline = LedgerPipeline::new(args.to_ledger_config());

    // Output goes to stdout
    let mut output = std::io::stdout();
    if let Err(e) = pipeline.process(&args.accounts_file, &args.transactions_file, &mut output) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
