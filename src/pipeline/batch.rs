//! Batch submission with account-based partitioning
//!
//! This module provides the `BatchProcessor`, which submits a batch of drafts
//! through the orchestrator with transactions for different accounts in
//! parallel and transactions for the same account in file order.
//!
//! # Design
//!
//! The orchestrator alone already keeps concurrent mutations of one account
//! from losing updates. Partitioning additionally keeps each account's
//! transactions in the order the file lists them, so receipts and events
//! read like the file.
//!
//! # Architecture
//!
//! ```text
//! BatchProcessor
//!     └── TransactionOrchestrator  (shared, cheap to clone)
//! ```

use std::collections::HashMap;

use tracing::{error, warn};

use crate::core::{SubmitReceipt, TransactionOrchestrator};
use crate::types::{AccountId, LedgerError, TransactionDraft};

/// Result of submitting a single draft
#[derive(Debug, Clone)]
pub struct SubmissionResult {
    /// The draft that was submitted
    pub draft: TransactionDraft,

    /// The orchestrator's answer
    pub result: Result<SubmitReceipt, LedgerError>,
}

/// Batch submitter with account-based partitioning
#[derive(Debug, Clone)]
pub struct BatchProcessor {
    orchestrator: TransactionOrchestrator,
}

impl BatchProcessor {
    pub fn new(orchestrator: TransactionOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Partition a batch of drafts by account
    ///
    /// # Guarantees
    ///
    /// - Each draft appears in exactly one sub-batch
    /// - Drafts for each account keep their original order
    pub fn partition_by_account(
        &self,
        batch: Vec<TransactionDraft>,
    ) -> HashMap<AccountId, Vec<TransactionDraft>> {
        let mut account_batches: HashMap<AccountId, Vec<TransactionDraft>> = HashMap::new();

        for draft in batch {
            account_batches
                .entry(draft.fund_account_id.clone())
                .or_default()
                .push(draft);
        }

        account_batches
    }

    /// Submit one account's drafts one after another
    ///
    /// Failures are logged and recorded; they never stop the remaining drafts.
    pub async fn submit_account_drafts(
        &self,
        drafts: Vec<TransactionDraft>,
    ) -> Vec<SubmissionResult> {
        let mut results = Vec::with_capacity(drafts.len());

        for draft in drafts {
            let result = self.orchestrator.submit(draft.clone()).await;
            if let Err(e) = &result {
                warn!(
                    account = %draft.fund_account_id,
                    tx_type = %draft.tx_type,
                    amount = %draft.amount,
                    error = %e,
                    "transaction not applied"
                );
            }
            results.push(SubmissionResult { draft, result });
        }

        results
    }

    /// Submit a batch, accounts in parallel
    ///
    /// # Returns
    ///
    /// One `SubmissionResult` per draft. Results for one account are in file
    /// order; results for different accounts are interleaved arbitrarily.
    pub async fn process_batch(&self, batch: Vec<TransactionDraft>) -> Vec<SubmissionResult> {
        let account_batches = self.partition_by_account(batch);

        let mut tasks = Vec::with_capacity(account_batches.len());
        for (_account_id, drafts) in account_batches {
            let processor = self.clone();
            tasks.push(tokio::spawn(async move {
                processor.submit_account_drafts(drafts).await
            }));
        }

        let mut results = Vec::new();
        for task in tasks {
            match task.await {
                Ok(account_results) => results.extend(account_results),
                Err(e) => error!(error = %e, "submission task panicked"),
            }
        }

        results
    }
}
