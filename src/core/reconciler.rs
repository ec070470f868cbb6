//! Balance reconciliation against the transaction log
//!
//! This module provides the `Reconciler`, which recomputes an account's
//! balance as `initial_balance + Σ signed_amount` over its logged
//! transactions and corrects the Account Store with a SET when they disagree.
//!
//! # Design
//!
//! Reconciling an account happens inside the account's lane, so no live
//! mutation can interleave with it. Within the lane:
//!
//! 1. Read the transaction log
//! 2. Wait briefly for appends that are still running, then take the set of
//!    persisted transactions that have not been applied yet. Those will be
//!    applied later through the lane, so they are left out of the sum. If an
//!    append is still running after the wait, defer
//! 3. Read the authoritative snapshot and compute the expected balance
//! 4. If the stored balance differs, SET it through the engine, then publish
//!    the change and check the threshold like any other commit
//!
//! Running it twice in a row is harmless: the second run finds the account
//! in sync.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::broadcaster::EventBroadcaster;
use crate::core::engine::LedgerEngine;
use crate::core::monitor::ThresholdMonitor;
use crate::core::orchestrator::notify;
use crate::core::tracker::ApplyTracker;
use crate::core::traits::TransactionStore;
use crate::types::{AccountId, BalanceOperation, LedgerError};

/// How long reconciliation waits for a running append before deferring
const APPEND_WAIT: Duration = Duration::from_secs(1);

/// Result of reconciling one account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Stored balance already matched the log
    InSync,

    /// Stored balance was replaced
    Corrected { old: Decimal, new: Decimal },

    /// An append was still running; try again later
    Deferred,
}

/// Summary of a reconciliation sweep
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub checked: usize,
    pub in_sync: usize,
    pub corrected: Vec<(AccountId, Decimal, Decimal)>,
    pub deferred: Vec<AccountId>,
    pub failed: Vec<(AccountId, LedgerError)>,
}

impl ReconcileReport {
    /// True when every account checked was already in sync
    pub fn is_clean(&self) -> bool {
        self.corrected.is_empty() && self.deferred.is_empty() && self.failed.is_empty()
    }

    fn record(&mut self, account_id: AccountId, result: Result<ReconcileOutcome, LedgerError>) {
        self.checked += 1;
        match result {
            Ok(ReconcileOutcome::InSync) => self.in_sync += 1,
            Ok(ReconcileOutcome::Corrected { old, new }) => {
                self.corrected.push((account_id, old, new))
            }
            Ok(ReconcileOutcome::Deferred) => self.deferred.push(account_id),
            Err(e) => self.failed.push((account_id, e)),
        }
    }
}

/// Log-driven balance corrector
#[derive(Clone)]
pub struct Reconciler {
    engine: Arc<LedgerEngine>,
    transactions: Arc<dyn TransactionStore>,
    broadcaster: Arc<EventBroadcaster>,
    monitor: Arc<ThresholdMonitor>,
    tracker: Arc<ApplyTracker>,
}

impl Reconciler {
    pub fn new(
        engine: Arc<LedgerEngine>,
        transactions: Arc<dyn TransactionStore>,
        broadcaster: Arc<EventBroadcaster>,
        monitor: Arc<ThresholdMonitor>,
        tracker: Arc<ApplyTracker>,
    ) -> Self {
        Self {
            engine,
            transactions,
            broadcaster,
            monitor,
            tracker,
        }
    }

    /// Bring one account's stored balance in line with its transaction log
    ///
    /// # Returns
    ///
    /// * `Ok(ReconcileOutcome)` describing what was found and done
    /// * `Err(LedgerError)` if a store failed or the account is unknown
    pub async fn reconcile_account(
        &self,
        account_id: &AccountId,
    ) -> Result<ReconcileOutcome, LedgerError> {
        self.engine
            .serializer()
            .enqueue(account_id, || self.reconcile_locked(account_id))
            .await
    }

    async fn reconcile_locked(&self, account_id: &AccountId) -> Result<ReconcileOutcome, LedgerError> {
        let log = self.transactions.list_by_account(account_id).await?;

        let Some(unapplied) = self
            .tracker
            .unapplied_after_appends(account_id, APPEND_WAIT)
            .await
        else {
            debug!(account = %account_id, "reconciliation deferred behind a running append");
            return Ok(ReconcileOutcome::Deferred);
        };

        let snapshot = self.engine.store().get(account_id).await?;
        let expected = log
            .iter()
            .filter(|tx| !unapplied.contains(&tx.id))
            .try_fold(snapshot.initial_balance, |balance, tx| {
                balance.checked_add(tx.signed_amount())
            })
            .ok_or_else(|| LedgerError::arithmetic_overflow("reconcile", account_id))?;

        if snapshot.current_balance == expected {
            self.engine.cache().write(account_id, expected);
            self.tracker.clear_pending(account_id);
            return Ok(ReconcileOutcome::InSync);
        }

        let change = self
            .engine
            .commit_locked(account_id, BalanceOperation::Set(expected), None)
            .await?;
        notify(&self.broadcaster, &self.monitor, &change);
        self.tracker.clear_pending(account_id);

        info!(
            account = %account_id,
            old_balance = %change.old_balance,
            new_balance = %change.new_balance,
            transactions = log.len(),
            unapplied = unapplied.len(),
            "balance corrected from transaction log"
        );
        Ok(ReconcileOutcome::Corrected {
            old: change.old_balance,
            new: change.new_balance,
        })
    }

    /// Reconcile every account flagged by a failed apply
    pub async fn sweep_pending(&self) -> ReconcileReport {
        self.sweep(self.tracker.pending_accounts()).await
    }

    /// Reconcile every account in the Account Store
    pub async fn sweep_all(&self) -> Result<ReconcileReport, LedgerError> {
        let accounts = self.engine.store().account_ids().await?;
        Ok(self.sweep(accounts).await)
    }

    async fn sweep(&self, accounts: Vec<AccountId>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for account_id in accounts {
            let result = self.reconcile_account(&account_id).await;
            if let Err(e) = &result {
                warn!(account = %account_id, error = %e, "reconciliation failed");
            }
            report.record(account_id, result);
        }
        report
    }

    /// Run `sweep_all` every `interval` until the returned task is aborted
    ///
    /// The first sweep runs one interval after the call.
    pub fn spawn_periodic(&self, interval: Duration) -> JoinHandle<()> {
        let reconciler = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match reconciler.sweep_all().await {
                    Ok(report) if report.is_clean() => {
                        debug!(checked = report.checked, "reconciliation sweep clean")
                    }
                    Ok(report) => info!(
                        checked = report.checked,
                        corrected = report.corrected.len(),
                        deferred = report.deferred.len(),
                        failed = report.failed.len(),
                        "reconciliation sweep finished"
                    ),
                    Err(e) => warn!(error = %e, "reconciliation sweep could not list accounts"),
                }
            }
        })
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("engine", &self.engine)
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}
