//! Command-line processing pipeline
//!
//! This module wires the ledger to CSV files: it loads a fund-account roster,
//! streams a transactions file through the `TransactionOrchestrator` in
//! batches, runs a full reconciliation sweep and writes the final roster.
//!
//! # Architecture
//!
//! ```text
//! LedgerPipeline
//!     ├── LedgerConfig (batch_size, max_concurrent_submissions, ...)
//!     ├── RosterReader (blocking roster CSV)
//!     ├── TransactionReader (batch CSV reading)
//!     ├── BatchProcessor (account partitioning + tokio tasks)
//!     └── TransactionOrchestrator
//!         ├── InMemoryAccountStore
//!         └── InMemoryTransactionStore
//! ```
//!
//! Batches are processed one after another, so an account's transactions
//! are applied in file order even when they span batches. Within a batch,
//! different accounts run in parallel on a multi-threaded runtime with
//! `max_concurrent_submissions` workers. A background reconciler sweeps every
//! `reconcile_interval` while the file is processed, and once more at the end.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::LedgerConfig;
use crate::core::{InMemoryAccountStore, InMemoryTransactionStore, TransactionOrchestrator};
use crate::io::async_reader::TransactionReader;
use crate::io::csv_format::write_accounts_csv;
use crate::io::sync_reader::RosterReader;
use crate::types::LedgerError;

pub mod batch;

pub use batch::{BatchProcessor, SubmissionResult};

/// Counts reported at the end of a run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSummary {
    pub accounts: usize,
    pub applied: usize,
    pub rejected: usize,
    pub deduplicated: usize,
    pub pending_reconciliation: usize,
    pub corrected: usize,
}

/// Roster-in, roster-out ledger run
#[derive(Debug, Clone)]
pub struct LedgerPipeline {
    config: LedgerConfig,
}

impl LedgerPipeline {
    pub fn new(config: LedgerConfig) -> Self {
        Self { config }
    }

    /// Process a transactions file against a roster and write the final roster
    ///
    /// # Arguments
    ///
    /// * `accounts_path` - Roster CSV with the opening balances
    /// * `transactions_path` - Transactions CSV
    /// * `output` - Where the final roster CSV is written
    ///
    /// # Returns
    ///
    /// * `Ok(PipelineSummary)` if the run completed (individual rows may have failed)
    /// * `Err(String)` if a fatal error occurred
    ///
    /// # Error Handling
    ///
    /// Missing files, an unreadable roster and output errors are fatal.
    /// Malformed rows and rejected transactions are logged and skipped.
    pub fn process(
        &self,
        accounts_path: &Path,
        transactions_path: &Path,
        output: &mut dyn Write,
    ) -> Result<PipelineSummary, String> {
        let roster = RosterReader::new(accounts_path)?;
        let accounts = Arc::new(InMemoryAccountStore::new());
        for row in roster {
            match row {
                Ok(account) => accounts.insert(account),
                Err(e) => warn!(error = %e, "skipping account row"),
            }
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.max_concurrent_submissions)
            .enable_all()
            .build()
            .map_err(|e| format!("Failed to create tokio runtime: {}", e))?;

        runtime.block_on(async {
            let transactions = Arc::new(InMemoryTransactionStore::new());
            let orchestrator = TransactionOrchestrator::new(
                accounts.clone(),
                transactions.clone(),
                &self.config,
            );
            let processor = BatchProcessor::new(orchestrator.clone());
            let periodic = orchestrator
                .reconciler()
                .spawn_periodic(self.config.reconcile_interval);

            let file = tokio::fs::File::open(transactions_path).await.map_err(|e| {
                format!(
                    "Failed to open file '{}': {}",
                    transactions_path.display(),
                    e
                )
            })?;
            let compat_file = tokio_util::compat::TokioAsyncReadCompatExt::compat(file);
            let mut reader = TransactionReader::new(compat_file);

            let mut summary = PipelineSummary::default();
            loop {
                let batch = reader.read_batch(self.config.batch_size).await;
                if batch.is_empty() {
                    break;
                }

                for submission in processor.process_batch(batch).await {
                    match submission.result {
                        Ok(_) => summary.applied += 1,
                        Err(LedgerError::ReconciliationRequired { .. }) => {
                            summary.pending_reconciliation += 1
                        }
                        Err(e) if e.is_deduplicated() => summary.deduplicated += 1,
                        Err(_) => summary.rejected += 1,
                    }
                }
            }

            periodic.abort();

            let report = orchestrator
                .reconciler()
                .sweep_all()
                .await
                .map_err(|e| format!("Reconciliation failed: {}", e))?;
            for (account_id, e) in &report.failed {
                warn!(account = %account_id, error = %e, "account left unreconciled");
            }
            summary.corrected = report.corrected.len();

            let final_accounts = accounts.all_accounts();
            summary.accounts = final_accounts.len();
            write_accounts_csv(&final_accounts, output)?;

            info!(
                accounts = summary.accounts,
                applied = summary.applied,
                rejected = summary.rejected,
                deduplicated = summary.deduplicated,
                pending_reconciliation = summary.pending_reconciliation,
                corrected = summary.corrected,
                "ledger run finished"
            );
            Ok(summary)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    const ROSTER: &str = "id,code,name,account_type,initial_balance,status\n\
                          GF-01,1-01,General Fund,asset,1000.00,active\n\
                          TF-02,2-01,Trust Fund,liability,0,active\n";

    const TX_HEADER: &str =
        "type,account,amount,recipient_or_payer,reference,mode_of_payment,created_by,idempotency_key\n";

    /// Helper function to create a temporary CSV file for testing
    fn create_temp_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("Failed to write to temp file");
        file.flush().expect("Failed to flush temp file");
        file
    }

    fn run(config: LedgerConfig, transactions: &str) -> (PipelineSummary, String) {
        let roster = create_temp_csv(ROSTER);
        let transactions = create_temp_csv(&format!("{}{}", TX_HEADER, transactions));
        let mut output = Vec::new();

        let summary = LedgerPipeline::new(config)
            .process(roster.path(), transactions.path(), &mut output)
            .unwrap();
        (summary, String::from_utf8(output).unwrap())
    }

    #[test]
    fn test_pipeline_applies_transactions() {
        let (summary, output) = run(
            LedgerConfig::default(),
            "collection,GF-01,500,Juan,OR-1,cash,cashier,\n\
             disbursement,GF-01,200,Supplier,CV-1,check,treasurer,\n\
             receipt,TF-02,75.25,Maria,,cash,cashier,\n",
        );

        assert_eq!(summary.applied, 3);
        assert_eq!(summary.rejected, 0);
        assert_eq!(summary.corrected, 0);
        assert_eq!(
            output,
            "id,code,name,account_type,initial_balance,current_balance,status\n\
             GF-01,1-01,General Fund,Asset,1000.00,1300.00,Active\n\
             TF-02,2-01,Trust Fund,Liability,0.00,75.25,Active\n"
        );
    }

    #[test]
    fn test_pipeline_skips_rejected_and_malformed_rows() {
        let (summary, output) = run(
            LedgerConfig::default(),
            "collection,GF-01,-5,Juan,,cash,cashier,\n\
             collection,NOPE,5,Juan,,cash,cashier,\n\
             collection,GF-01,abc,Juan,,cash,cashier,\n\
             collection,GF-01,5,,,cash,cashier,\n\
             collection,GF-01,10,Juan,,cash,cashier,\n",
        );

        assert_eq!(summary.applied, 1);
        assert_eq!(summary.rejected, 3);
        assert!(output.contains("GF-01,1-01,General Fund,Asset,1000.00,1010.00,Active"));
    }

    #[test]
    fn test_pipeline_replays_duplicate_idempotency_keys() {
        let (summary, output) = run(
            LedgerConfig::default(),
            "collection,GF-01,500,Juan,OR-1,cash,cashier,or-1\n\
             collection,GF-01,500,Juan,OR-1,cash,cashier,or-1\n",
        );

        assert_eq!(summary.applied, 2);
        assert_eq!(summary.rejected, 0);
        assert_eq!(summary.deduplicated, 0);
        assert!(output.contains("GF-01,1-01,General Fund,Asset,1000.00,1500.00,Active"));
    }

    #[test]
    fn test_pipeline_keeps_order_across_small_batches() {
        let config = LedgerConfig::new(rust_decimal::Decimal::ZERO, 3, Duration::from_secs(60), 2, 1);
        let (summary, output) = run(
            config,
            "collection,GF-01,100,Juan,,cash,cashier,\n\
             disbursement,GF-01,1100,Supplier,,check,treasurer,\n\
             collection,TF-02,1,Maria,,cash,cashier,\n",
        );

        assert_eq!(summary.applied, 3);
        assert!(output.contains("GF-01,1-01,General Fund,Asset,1000.00,0.00,Active"));
        assert!(output.contains("TF-02,2-01,Trust Fund,Liability,0.00,1.00,Active"));
    }

    #[test]
    fn test_pipeline_missing_transactions_file() {
        let roster = create_temp_csv(ROSTER);
        let mut output = Vec::new();

        let result = LedgerPipeline::new(LedgerConfig::default()).process(
            roster.path(),
            Path::new("nonexistent.csv"),
            &mut output,
        );

        assert!(result.unwrap_err().contains("Failed to open file"));
        assert!(output.is_empty());
    }

    #[test]
    fn test_pipeline_missing_roster() {
        let transactions = create_temp_csv(TX_HEADER);
        let mut output = Vec::new();

        let result = LedgerPipeline::new(LedgerConfig::default()).process(
            Path::new("nonexistent.csv"),
            transactions.path(),
            &mut output,
        );

        assert!(result.unwrap_err().contains("Failed to open file"));
    }
}
