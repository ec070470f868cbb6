use crate::config::LedgerConfig;
use clap::Parser;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::time::Duration;

/// Apply fund transactions to an account roster
#[derive(Parser, Debug)]
#[command(name = "fund-ledger")]
#[command(about = "Apply collections and disbursements to fund-account balances", long_about = None)]
pub struct CliArgs {
    /// Account roster CSV file path
    #[arg(value_name = "ACCOUNTS", help = "Path to the fund-account roster CSV file")]
    pub accounts_file: PathBuf,

    /// Transactions CSV file path
    #[arg(value_name = "TRANSACTIONS", help = "Path to the transactions CSV file")]
    pub transactions_file: PathBuf,

    /// Balance below which a low-balance alert is raised
    #[arg(
        long = "low-balance-threshold",
        value_name = "AMOUNT",
        help = "Low-balance alert threshold (default: 1000.00)"
    )]
    pub low_balance_threshold: Option<Decimal>,

    /// Compare-and-set attempts per balance mutation
    #[arg(
        long = "max-cas-attempts",
        value_name = "COUNT",
        help = "Write attempts per balance mutation before giving up (default: 3)"
    )]
    pub max_cas_attempts: Option<usize>,

    /// Number of transactions per batch
    #[arg(
        long = "batch-size",
        value_name = "SIZE",
        help = "Number of transactions per batch (default: 1000)"
    )]
    pub batch_size: Option<usize>,

    /// Worker threads submitting transactions
    #[arg(
        long = "max-concurrent",
        value_name = "COUNT",
        help = "Maximum number of worker threads (default: CPU cores)"
    )]
    pub max_concurrent_submissions: Option<usize>,

    /// Seconds between background reconciliation sweeps
    #[arg(
        long = "reconcile-interval",
        value_name = "SECONDS",
        help = "Seconds between reconciliation sweeps (default: 60)"
    )]
    pub reconcile_interval_secs: Option<u64>,
}

impl CliArgs {
    /// Create a LedgerConfig from CLI arguments
    ///
    /// Values that were not given fall back to the defaults. Zero values are
    /// replaced by the defaults with a warning.
    pub fn to_ledger_config(&self) -> LedgerConfig {
        let default = LedgerConfig::default();
        LedgerConfig::new(
            self.low_balance_threshold
                .unwrap_or(default.low_balance_threshold),
            self.max_cas_attempts.unwrap_or(default.max_cas_attempts),
            self.reconcile_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(default.reconcile_interval),
            self.max_concurrent_submissions
                .unwrap_or(default.max_concurrent_submissions),
            self.batch_size.unwrap_or(default.batch_size),
        )
    }
}
