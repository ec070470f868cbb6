//! Transaction Orchestrator: the submit use case
//!
//! This module provides the `TransactionOrchestrator`, which takes a
//! `TransactionDraft` from the caller and drives it through the ledger.
//!
//! # Stages
//!
//! ```text
//! Validating ──► Persisting ──► Applying ──► Notifying ──► Done
//!                                   │
//!                                   └──► Reconciling (apply failed after persist)
//! ```
//!
//! 1. **Validating**: amount, required fields, account known and active.
//!    If the draft carries an idempotency key it is claimed here.
//! 2. **Persisting**: append to the Transaction Store. A failure here leaves
//!    nothing behind.
//! 3. **Applying**: the Ledger Engine mutates the balance. This runs in its
//!    own tokio task, so a caller that gives up does not cancel it.
//! 4. **Notifying**: inside the account's lane, right after the commit, the
//!    event is published and the Threshold Monitor is consulted.
//!
//! Once a transaction is persisted it is never reported as a plain failure.
//! If the apply fails, the account is flagged for the reconciler and the
//! caller gets `ReconciliationRequired`.
//!
//! # Idempotency Keys
//!
//! Settled keys are answered from memory for `idempotency_retention`. After
//! that they are forgotten, and a resubmission is matched against the
//! Transaction Store instead and reported as `DuplicateSubmission`. A key
//! whose apply failed stays pending until its account has been reconciled.
//!
//! # Thread Safety
//!
//! The orchestrator is cheap to clone; clones share every component.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::LedgerConfig;
use crate::core::broadcaster::EventBroadcaster;
use crate::core::engine::LedgerEngine;
use crate::core::monitor::{ThresholdMonitor, TracingAlertSink};
use crate::core::reconciler::Reconciler;
use crate::core::tracker::{ApplyTracker, InFlightGuard};
use crate::core::traits::{AccountStore, TransactionStore};
use crate::types::{
    AccountId, BalanceChange, BalanceOperation, LedgerError, SubmissionStage, Transaction,
    TransactionDraft, TransactionId,
};

/// Outcome of a successful submission
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitReceipt {
    pub transaction: Transaction,
    pub old_balance: Decimal,
    pub new_balance: Decimal,

    /// True when this is the stored receipt of an earlier submission with the
    /// same idempotency key; nothing was applied this time
    pub replayed: bool,
}

/// Settled keys are pruned once every this many claims
const PRUNE_EVERY: u64 = 1024;

#[derive(Debug, Clone)]
enum KeyState {
    InFlight,
    Completed {
        receipt: SubmitReceipt,
        settled_at: Instant,
    },
    Pending {
        transaction: TransactionId,
        account: AccountId,
    },
    /// Applied by reconciliation; no receipt to replay
    Recorded {
        transaction: TransactionId,
        settled_at: Instant,
    },
}

/// Top-level entry point for submitting transactions
#[derive(Clone)]
pub struct TransactionOrchestrator {
    engine: Arc<LedgerEngine>,
    transactions: Arc<dyn TransactionStore>,
    broadcaster: Arc<EventBroadcaster>,
    monitor: Arc<ThresholdMonitor>,
    tracker: Arc<ApplyTracker>,
    submissions: Arc<DashMap<String, KeyState>>,
    retention: Duration,
    claims: Arc<AtomicU64>,
}

impl TransactionOrchestrator {
    /// Create an orchestrator over the two stores
    ///
    /// Low-balance alerts are logged through `TracingAlertSink`; use
    /// `with_monitor` to send them elsewhere.
    ///
    /// # Arguments
    ///
    /// * `accounts` - Authoritative account balances
    /// * `transactions` - Append-only transaction log
    /// * `config` - Threshold, compare-and-set and key retention settings
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        transactions: Arc<dyn TransactionStore>,
        config: &LedgerConfig,
    ) -> Self {
        Self {
            engine: Arc::new(LedgerEngine::new(accounts, config.max_cas_attempts)),
            transactions,
            broadcaster: Arc::new(EventBroadcaster::new()),
            monitor: Arc::new(ThresholdMonitor::new(
                config.low_balance_threshold,
                TracingAlertSink,
            )),
            tracker: Arc::new(ApplyTracker::new()),
            submissions: Arc::new(DashMap::new()),
            retention: config.idempotency_retention,
            claims: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Replace the Threshold Monitor
    pub fn with_monitor(mut self, monitor: ThresholdMonitor) -> Self {
        self.monitor = Arc::new(monitor);
        self
    }

    pub fn engine(&self) -> &LedgerEngine {
        &self.engine
    }

    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }

    pub fn monitor(&self) -> &ThresholdMonitor {
        &self.monitor
    }

    pub fn tracker(&self) -> &ApplyTracker {
        &self.tracker
    }

    /// Reconciler sharing this orchestrator's components
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.transactions),
            Arc::clone(&self.broadcaster),
            Arc::clone(&self.monitor),
            Arc::clone(&self.tracker),
        )
    }

    /// Cached balance of an account
    pub async fn balance(&self, account_id: &AccountId) -> Result<Decimal, LedgerError> {
        self.engine.balance(account_id).await
    }

    /// Submit a transaction and wait for its balance to be applied
    ///
    /// # Returns
    ///
    /// * `Ok(SubmitReceipt)` with the balances before and after the transaction
    /// * `Err(e)` where `e.is_rejected()`: nothing was recorded
    /// * `Err(e)` where `e.is_deduplicated()`: the idempotency key belongs to
    ///   a submission that is recorded or being recorded; nothing new happened
    /// * `Err(LedgerError::ReconciliationRequired)`: the transaction was
    ///   recorded but its balance is not confirmed; do not resubmit
    pub async fn submit(&self, draft: TransactionDraft) -> Result<SubmitReceipt, LedgerError> {
        self.run(draft, None).await
    }

    /// Submit with an overall deadline
    ///
    /// Before the transaction is persisted, running out of time aborts with
    /// `Timeout` and no side effects. After that, the apply keeps running in
    /// the background and the caller gets `ReconciliationRequired`.
    pub async fn submit_with_timeout(
        &self,
        draft: TransactionDraft,
        timeout: Duration,
    ) -> Result<SubmitReceipt, LedgerError> {
        self.run(draft, Some(Instant::now() + timeout)).await
    }

    async fn run(
        &self,
        draft: TransactionDraft,
        deadline: Option<Instant>,
    ) -> Result<SubmitReceipt, LedgerError> {
        let account_id = draft.fund_account_id.clone();

        debug!(account = %account_id, stage = %SubmissionStage::Validating, "submission stage");
        within(deadline, SubmissionStage::Validating, self.validate(&draft)).await??;

        let claim = match draft.idempotency_key.as_deref() {
            Some(key) if !key.trim().is_empty() => {
                match within(deadline, SubmissionStage::Validating, self.claim(key)).await?? {
                    Claimed::Fresh(claim) => Some(claim),
                    Claimed::Replay(receipt) => {
                        debug!(account = %account_id, key, "replaying completed submission");
                        return Ok(receipt);
                    }
                }
            }
            _ => None,
        };

        debug!(account = %account_id, stage = %SubmissionStage::Persisting, "submission stage");
        // Tracked before the append so the reconciler never sees a logged
        // transaction whose apply it cannot account for
        let mut in_flight = self.tracker.begin(&account_id);
        let transaction = within(
            deadline,
            SubmissionStage::Persisting,
            self.transactions.append(draft),
        )
        .await??;
        let transaction_id = transaction.id;
        in_flight.persisted(transaction_id);

        let task = {
            let this = self.clone();
            tokio::spawn(async move { this.apply_persisted(transaction, in_flight, claim).await })
        };

        let joined = match deadline {
            Some(deadline) => match timeout_at(deadline, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(
                        account = %account_id,
                        transaction = transaction_id,
                        "deadline passed while applying"
                    );
                    return Err(LedgerError::reconciliation_required(
                        transaction_id,
                        &account_id,
                        "apply still in flight when the deadline passed",
                    ));
                }
            },
            None => task.await,
        };

        joined.unwrap_or_else(|e| {
            self.tracker.mark_pending(&account_id);
            Err(LedgerError::reconciliation_required(
                transaction_id,
                &account_id,
                format!("apply task failed: {}", e),
            ))
        })
    }

    /// Validating stage; has no side effects
    async fn validate(&self, draft: &TransactionDraft) -> Result<(), LedgerError> {
        if draft.amount <= Decimal::ZERO {
            return Err(LedgerError::invalid_amount(draft.amount));
        }

        let required = [
            ("recipient_or_payer", &draft.recipient_or_payer),
            ("mode_of_payment", &draft.mode_of_payment),
            ("created_by", &draft.created_by),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(LedgerError::missing_field(field));
            }
        }

        let snapshot = self.engine.store().get(&draft.fund_account_id).await?;
        if !snapshot.is_active() {
            return Err(LedgerError::account_inactive(&draft.fund_account_id));
        }
        Ok(())
    }

    /// Claim an idempotency key for this submission
    async fn claim(&self, key: &str) -> Result<Claimed, LedgerError> {
        if self.claims.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.forget_settled_keys();
        }

        match self.submissions.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let now = Instant::now();
                match entry.get().clone() {
                    KeyState::InFlight => return Err(LedgerError::submission_in_progress(key)),
                    KeyState::Completed {
                        receipt,
                        settled_at,
                    } if !self.expired(settled_at, now) => {
                        return Ok(Claimed::Replay(SubmitReceipt {
                            replayed: true,
                            ..receipt
                        }))
                    }
                    KeyState::Recorded {
                        transaction,
                        settled_at,
                    } if !self.expired(settled_at, now) => {
                        return Err(LedgerError::duplicate_submission(key, transaction))
                    }
                    KeyState::Pending {
                        transaction,
                        account,
                    } => {
                        if self.tracker.is_pending(&account) {
                            return Err(LedgerError::reconciliation_required(
                                transaction,
                                &account,
                                "an earlier submission with this key is pending reconciliation",
                            ));
                        }
                        // Its account has been reconciled since
                        entry.insert(KeyState::Recorded {
                            transaction,
                            settled_at: now,
                        });
                        return Err(LedgerError::duplicate_submission(key, transaction));
                    }
                    // Past retention; the store decides below
                    KeyState::Completed { .. } | KeyState::Recorded { .. } => {
                        entry.insert(KeyState::InFlight);
                    }
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(KeyState::InFlight);
            }
        }

        let claim = KeyClaim {
            submissions: Arc::clone(&self.submissions),
            key: key.to_string(),
            settled: false,
        };

        // Keys recorded before this process started are only in the store
        match self.transactions.find_by_idempotency_key(key).await? {
            Some(recorded) => Err(LedgerError::duplicate_submission(key, recorded.id)),
            None => Ok(Claimed::Fresh(claim)),
        }
    }

    /// Drop settled idempotency keys older than the retention period
    ///
    /// Runs on its own every few claims. Keys still in flight or pending
    /// reconciliation are kept.
    ///
    /// # Returns
    ///
    /// The number of keys forgotten
    pub fn forget_settled_keys(&self) -> usize {
        let now = Instant::now();
        let mut forgotten = 0;
        self.submissions.retain(|_, state| {
            let keep = match state {
                KeyState::Completed { settled_at, .. } | KeyState::Recorded { settled_at, .. } => {
                    !self.expired(*settled_at, now)
                }
                KeyState::InFlight | KeyState::Pending { .. } => true,
            };
            if !keep {
                forgotten += 1;
            }
            keep
        });
        if forgotten > 0 {
            debug!(forgotten, "forgot settled idempotency keys");
        }
        forgotten
    }

    fn expired(&self, settled_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(settled_at) >= self.retention
    }

    /// Applying and Notifying stages; runs in its own task
    async fn apply_persisted(
        &self,
        transaction: Transaction,
        in_flight: InFlightGuard,
        claim: Option<KeyClaim>,
    ) -> Result<SubmitReceipt, LedgerError> {
        let account_id = transaction.fund_account_id.clone();
        debug!(
            account = %account_id,
            transaction = transaction.id,
            stage = %SubmissionStage::Applying,
            "submission stage"
        );

        let applied = self
            .engine
            .apply_and_then(
                &account_id,
                BalanceOperation::from_signed(transaction.signed_amount()),
                Some(transaction.id),
                |change| {
                    debug!(
                        account = %change.account_id,
                        stage = %SubmissionStage::Notifying,
                        "submission stage"
                    );
                    notify(&self.broadcaster, &self.monitor, change);
                    drop(in_flight);
                },
            )
            .await;

        match applied {
            Ok(change) => {
                info!(
                    account = %account_id,
                    transaction = transaction.id,
                    tx_type = %transaction.tx_type,
                    amount = %transaction.amount,
                    old_balance = %change.old_balance,
                    new_balance = %change.new_balance,
                    "transaction applied"
                );
                let receipt = SubmitReceipt {
                    transaction,
                    old_balance: change.old_balance,
                    new_balance: change.new_balance,
                    replayed: false,
                };
                if let Some(claim) = claim {
                    claim.settle(KeyState::Completed {
                        receipt: receipt.clone(),
                        settled_at: Instant::now(),
                    });
                }
                debug!(account = %account_id, stage = %SubmissionStage::Done, "submission stage");
                Ok(receipt)
            }
            Err(e) => {
                warn!(
                    account = %account_id,
                    transaction = transaction.id,
                    stage = %SubmissionStage::Reconciling,
                    error = %e,
                    "apply failed after persist, account flagged for reconciliation"
                );
                self.tracker.mark_pending(&account_id);
                if let Some(claim) = claim {
                    claim.settle(KeyState::Pending {
                        transaction: transaction.id,
                        account: account_id.clone(),
                    });
                }
                Err(LedgerError::reconciliation_required(
                    transaction.id,
                    &account_id,
                    e.to_string(),
                ))
            }
        }
    }
}

impl std::fmt::Debug for TransactionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionOrchestrator")
            .field("engine", &self.engine)
            .field("monitor", &self.monitor)
            .field("tracker", &self.tracker)
            .field("submissions", &self.submissions.len())
            .finish_non_exhaustive()
    }
}

/// Publish a committed change and check it against the low-balance threshold
pub(crate) fn notify(
    broadcaster: &EventBroadcaster,
    monitor: &ThresholdMonitor,
    change: &BalanceChange,
) {
    broadcaster.publish(change.to_event());
    monitor.check_change(change);
}

enum Claimed {
    Fresh(KeyClaim),
    Replay(SubmitReceipt),
}

/// Ownership of an idempotency key for one submission
///
/// Dropping an unsettled claim releases the key, so rejected or abandoned
/// submissions can be retried with it.
struct KeyClaim {
    submissions: Arc<DashMap<String, KeyState>>,
    key: String,
    settled: bool,
}

impl KeyClaim {
    fn settle(mut self, state: KeyState) {
        self.submissions.insert(self.key.clone(), state);
        self.settled = true;
    }
}

impl Drop for KeyClaim {
    fn drop(&mut self) {
        if !self.settled {
            self.submissions
                .remove_if(&self.key, |_, state| matches!(state, KeyState::InFlight));
        }
    }
}

/// Run a stage future against an optional deadline
async fn within<F: Future>(
    deadline: Option<Instant>,
    stage: SubmissionStage,
    stage_future: F,
) -> Result<F::Output, LedgerError> {
    match deadline {
        Some(deadline) => timeout_at(deadline, stage_future)
            .await
            .map_err(|_| LedgerError::timeout(stage)),
        None => Ok(stage_future.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::{InMemoryAccountStore, InMemoryTransactionStore};
    use crate::core::traits::CasOutcome;
    use crate::types::{
        AccountSnapshot, AccountStatus, AccountType, AlertEvent, ErrorKind, FundAccount,
        TransactionType,
    };
    use async_trait::async_trait;
    use rstest::rstest;
    use tokio::sync::mpsc;

    fn dec(value: i64) -> Decimal {
        Decimal::new(value, 0)
    }

    fn account(id: &str, balance: i64) -> FundAccount {
        FundAccount::new(id, "100", "General Fund", AccountType::Asset, dec(balance))
    }

    fn collection(account: &str, amount: i64) -> TransactionDraft {
        TransactionDraft::new(
            TransactionType::Collection,
            account,
            dec(amount),
            "Juan Dela Cruz",
            "cash",
            "cashier",
        )
    }

    fn disbursement(account: &str, amount: i64) -> TransactionDraft {
        TransactionDraft::new(
            TransactionType::Disbursement,
            account,
            dec(amount),
            "Office Supplies Inc.",
            "check",
            "treasurer",
        )
    }

    struct Fixture {
        accounts: Arc<InMemoryAccountStore>,
        transactions: Arc<InMemoryTransactionStore>,
        orchestrator: TransactionOrchestrator,
    }

    fn fixture(balance: i64) -> Fixture {
        let accounts = Arc::new(InMemoryAccountStore::with_accounts([
            account("A", balance),
            account("closed", 0).with_status(AccountStatus::Inactive),
        ]));
        let transactions = Arc::new(InMemoryTransactionStore::new());
        let orchestrator = TransactionOrchestrator::new(
            accounts.clone(),
            transactions.clone(),
            &LedgerConfig::default(),
        );
        Fixture {
            accounts,
            transactions,
            orchestrator,
        }
    }

    fn balance_of(store: &InMemoryAccountStore, id: &str) -> Decimal {
        store
            .get_account(&AccountId::from(id))
            .unwrap()
            .current_balance
    }

    #[tokio::test]
    async fn test_collection_then_disbursement() {
        let f = fixture(1000);

        let receipt = f.orchestrator.submit(collection("A", 500)).await.unwrap();
        assert_eq!((receipt.old_balance, receipt.new_balance), (dec(1000), dec(1500)));
        assert!(!receipt.replayed);
        assert_eq!(receipt.transaction.id, 1);

        let receipt = f.orchestrator.submit(disbursement("A", 200)).await.unwrap();
        assert_eq!((receipt.old_balance, receipt.new_balance), (dec(1500), dec(1300)));

        assert_eq!(balance_of(&f.accounts, "A"), dec(1300));
        assert_eq!(f.transactions.len(), 2);
        assert_eq!(f.orchestrator.tracker().in_flight(&AccountId::from("A")), 0);
    }

    #[rstest]
    #[case::zero_amount(collection("A", 0), ErrorKind::Validation)]
    #[case::negative_amount(collection("A", -5), ErrorKind::Validation)]
    #[case::blank_payer(
        TransactionDraft { recipient_or_payer: "  ".into(), ..collection("A", 5) },
        ErrorKind::Validation
    )]
    #[case::blank_mode(
        TransactionDraft { mode_of_payment: String::new(), ..collection("A", 5) },
        ErrorKind::Validation
    )]
    #[case::blank_creator(
        TransactionDraft { created_by: String::new(), ..collection("A", 5) },
        ErrorKind::Validation
    )]
    #[case::inactive_account(collection("closed", 5), ErrorKind::Validation)]
    #[case::unknown_account(collection("missing", 5), ErrorKind::InvalidAccount)]
    #[tokio::test]
    async fn test_validation_rejects_without_side_effects(
        #[case] draft: TransactionDraft,
        #[case] kind: ErrorKind,
    ) {
        let f = fixture(1000);

        let err = f.orchestrator.submit(draft).await.unwrap_err();

        assert_eq!(err.kind(), kind);
        assert!(err.is_rejected());
        assert!(f.transactions.is_empty());
        assert_eq!(balance_of(&f.accounts, "A"), dec(1000));
    }

    #[tokio::test]
    async fn test_blank_payer_names_field() {
        let f = fixture(1000);
        let draft = TransactionDraft {
            recipient_or_payer: String::new(),
            ..collection("A", 5)
        };

        let err = f.orchestrator.submit(draft).await.unwrap_err();

        assert_eq!(err, LedgerError::missing_field("recipient_or_payer"));
    }

    #[tokio::test]
    async fn test_persist_failure_has_no_side_effects() {
        let f = fixture(1000);
        f.transactions.fail_next_appends(1);

        let err = f
            .orchestrator
            .submit(collection("A", 500).with_idempotency_key("k1"))
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::StoreUnavailable { .. }));
        assert!(f.transactions.is_empty());
        assert_eq!(balance_of(&f.accounts, "A"), dec(1000));
        assert_eq!(f.orchestrator.tracker().in_flight(&AccountId::from("A")), 0);

        // The key was released, so a retry goes through
        let receipt = f
            .orchestrator
            .submit(collection("A", 500).with_idempotency_key("k1"))
            .await
            .unwrap();
        assert_eq!(receipt.new_balance, dec(1500));
    }

    #[tokio::test]
    async fn test_apply_failure_after_persist_requires_reconciliation() {
        let f = fixture(1000);
        f.accounts.fail_next_writes(1);

        let err = f.orchestrator.submit(collection("A", 500)).await.unwrap_err();

        assert!(err.is_accepted_pending());
        assert!(matches!(
            err,
            LedgerError::ReconciliationRequired { transaction: 1, .. }
        ));
        assert_eq!(f.transactions.len(), 1);
        assert_eq!(balance_of(&f.accounts, "A"), dec(1000));
        assert!(f.orchestrator.tracker().is_pending(&AccountId::from("A")));
    }

    #[tokio::test]
    async fn test_completed_key_is_replayed_without_new_mutation() {
        let f = fixture(1000);
        let draft = collection("A", 500).with_idempotency_key("receipt-0001");

        let first = f.orchestrator.submit(draft.clone()).await.unwrap();
        let second = f.orchestrator.submit(draft).await.unwrap();

        assert!(second.replayed);
        assert_eq!(second.transaction.id, first.transaction.id);
        assert_eq!(second.new_balance, dec(1500));
        assert_eq!(f.transactions.len(), 1);
        assert_eq!(balance_of(&f.accounts, "A"), dec(1500));
    }

    #[tokio::test]
    async fn test_pending_key_surfaces_reconciliation_again() {
        let f = fixture(1000);
        let draft = collection("A", 500).with_idempotency_key("k");
        f.accounts.fail_next_writes(1);

        let first = f.orchestrator.submit(draft.clone()).await.unwrap_err();
        let second = f.orchestrator.submit(draft).await.unwrap_err();

        assert!(first.is_accepted_pending());
        assert!(matches!(
            second,
            LedgerError::ReconciliationRequired { transaction: 1, .. }
        ));
        assert_eq!(f.transactions.len(), 1);
    }

    #[tokio::test]
    async fn test_key_known_only_to_store_is_duplicate() {
        let f = fixture(1000);
        // Recorded by an earlier process
        f.transactions
            .append(collection("A", 500).with_idempotency_key("k"))
            .await
            .unwrap();

        let err = f
            .orchestrator
            .submit(collection("A", 500).with_idempotency_key("k"))
            .await
            .unwrap_err();

        assert_eq!(err, LedgerError::duplicate_submission("k", 1));
        assert_eq!(err.kind(), ErrorKind::Deduplicated);
        assert!(!err.is_rejected());
        assert_eq!(f.transactions.len(), 1);
        assert_eq!(balance_of(&f.accounts, "A"), dec(1000));
    }

    #[tokio::test]
    async fn test_pending_key_settles_once_account_is_reconciled() {
        let f = fixture(1000);
        let draft = collection("A", 500).with_idempotency_key("k");
        f.accounts.fail_next_writes(1);

        let first = f.orchestrator.submit(draft.clone()).await.unwrap_err();
        assert!(first.is_accepted_pending());

        let report = f.orchestrator.reconciler().sweep_pending().await;
        assert_eq!(report.corrected.len(), 1);

        let err = f.orchestrator.submit(draft.clone()).await.unwrap_err();
        assert_eq!(err, LedgerError::duplicate_submission("k", 1));
        assert!(!err.is_rejected());
        assert!(!err.is_accepted_pending());
        assert!(matches!(
            f.orchestrator.submissions.get("k").as_deref(),
            Some(KeyState::Recorded { transaction: 1, .. })
        ));

        // Settled for good: asking again gives the same answer
        let again = f.orchestrator.submit(draft).await.unwrap_err();
        assert_eq!(again, err);
        assert_eq!(f.transactions.len(), 1);
        assert_eq!(balance_of(&f.accounts, "A"), dec(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settled_keys_are_forgotten_after_retention() {
        let accounts = Arc::new(InMemoryAccountStore::with_accounts([account("A", 1000)]));
        let transactions = Arc::new(InMemoryTransactionStore::new());
        let config = LedgerConfig::default().with_idempotency_retention(Duration::from_secs(3600));
        let orchestrator = TransactionOrchestrator::new(accounts.clone(), transactions.clone(), &config);

        orchestrator
            .submit(collection("A", 500).with_idempotency_key("old"))
            .await
            .unwrap();
        orchestrator
            .submit(collection("A", 100).with_idempotency_key("stale"))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(1800)).await;
        orchestrator
            .submit(collection("A", 10).with_idempotency_key("recent"))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(1800)).await;

        // Expired but not yet pruned: the store still knows the key
        let err = orchestrator
            .submit(collection("A", 100).with_idempotency_key("stale"))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::duplicate_submission("stale", 2));

        assert_eq!(orchestrator.forget_settled_keys(), 1);
        assert!(!orchestrator.submissions.contains_key("old"));
        assert!(orchestrator.submissions.contains_key("recent"));

        let err = orchestrator
            .submit(collection("A", 500).with_idempotency_key("old"))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::duplicate_submission("old", 1));
        assert!(!err.is_rejected());

        let replay = orchestrator
            .submit(collection("A", 10).with_idempotency_key("recent"))
            .await
            .unwrap();
        assert!(replay.replayed);
        assert_eq!(transactions.len(), 3);
        assert_eq!(balance_of(&accounts, "A"), dec(1610));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocked_alert_sink_does_not_hold_up_submissions() {
        let (release, gate) = std::sync::mpsc::channel::<()>();
        let gate = std::sync::Mutex::new(gate);
        let (delivered_tx, mut delivered) = mpsc::unbounded_channel::<Decimal>();
        let orchestrator = TransactionOrchestrator::new(
            Arc::new(InMemoryAccountStore::with_accounts([account("A", 1300)])),
            Arc::new(InMemoryTransactionStore::new()),
            &LedgerConfig::default(),
        )
        .with_monitor(ThresholdMonitor::new(dec(1000), move |alert: &AlertEvent| {
            let _ = gate.lock().unwrap().recv();
            let _ = delivered_tx.send(alert.balance);
        }));

        tokio::time::timeout(Duration::from_secs(5), async {
            orchestrator.submit(disbursement("A", 400)).await.unwrap();
            orchestrator.submit(collection("A", 200)).await.unwrap();
            orchestrator.submit(disbursement("A", 300)).await.unwrap();
        })
        .await
        .expect("submissions waited on the alert sink");
        assert_eq!(orchestrator.balance(&AccountId::from("A")).await.unwrap(), dec(800));

        release.send(()).unwrap();
        release.send(()).unwrap();
        assert_eq!(delivered.recv().await, Some(dec(900)));
        assert_eq!(delivered.recv().await, Some(dec(800)));
    }

    #[tokio::test]
    async fn test_notifies_listeners_and_monitor() {
        let accounts = Arc::new(InMemoryAccountStore::with_accounts([account("A", 1300)]));
        let (alert_tx, mut alerts) = mpsc::unbounded_channel::<AlertEvent>();
        let orchestrator = TransactionOrchestrator::new(
            accounts,
            Arc::new(InMemoryTransactionStore::new()),
            &LedgerConfig::default(),
        )
        .with_monitor(ThresholdMonitor::new(
            dec(1000),
            crate::core::monitor::ChannelAlertSink::new(alert_tx),
        ));
        let (_handle, mut events) = orchestrator.broadcaster().subscribe_channel();

        orchestrator.submit(disbursement("A", 200)).await.unwrap();
        orchestrator.submit(disbursement("A", 200)).await.unwrap();

        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert_eq!((first.old_balance, first.new_balance), (dec(1300), dec(1100)));
        assert_eq!((second.old_balance, second.new_balance), (dec(1100), dec(900)));
        assert_eq!(second.causing_transaction_id, Some(2));

        let alert = alerts.recv().await.unwrap();
        assert_eq!(alert.balance, dec(900));
        assert!(alerts.try_recv().is_err());
    }

    /// Account store whose writes take ten seconds
    struct SlowAccountStore {
        inner: InMemoryAccountStore,
    }

    #[async_trait]
    impl AccountStore for SlowAccountStore {
        async fn get(&self, id: &AccountId) -> Result<AccountSnapshot, LedgerError> {
            self.inner.get(id).await
        }

        async fn compare_and_set(
            &self,
            id: &AccountId,
            expected: Decimal,
            new_balance: Decimal,
        ) -> Result<CasOutcome, LedgerError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            self.inner.compare_and_set(id, expected, new_balance).await
        }

        async fn account_ids(&self) -> Result<Vec<AccountId>, LedgerError> {
            self.inner.account_ids().await
        }
    }

    /// Transaction store whose appends take ten seconds
    struct SlowTransactionStore {
        inner: InMemoryTransactionStore,
    }

    #[async_trait]
    impl TransactionStore for SlowTransactionStore {
        async fn append(&self, draft: TransactionDraft) -> Result<Transaction, LedgerError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            self.inner.append(draft).await
        }

        async fn list_by_account(&self, id: &AccountId) -> Result<Vec<Transaction>, LedgerError> {
            self.inner.list_by_account(id).await
        }

        async fn find_by_idempotency_key(
            &self,
            key: &str,
        ) -> Result<Option<Transaction>, LedgerError> {
            self.inner.find_by_idempotency_key(key).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_before_persist_has_no_side_effects() {
        let transactions = Arc::new(SlowTransactionStore {
            inner: InMemoryTransactionStore::new(),
        });
        let orchestrator = TransactionOrchestrator::new(
            Arc::new(InMemoryAccountStore::with_accounts([account("A", 1000)])),
            transactions.clone(),
            &LedgerConfig::default(),
        );

        let err = orchestrator
            .submit_with_timeout(
                collection("A", 500).with_idempotency_key("k"),
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();

        assert_eq!(err, LedgerError::timeout(SubmissionStage::Persisting));
        assert!(transactions.inner.is_empty());
        assert_eq!(orchestrator.tracker().in_flight(&AccountId::from("A")), 0);
        assert!(orchestrator.submissions.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_after_persist_lets_apply_finish() {
        let accounts = Arc::new(SlowAccountStore {
            inner: InMemoryAccountStore::with_accounts([account("A", 1000)]),
        });
        let orchestrator = TransactionOrchestrator::new(
            accounts.clone(),
            Arc::new(InMemoryTransactionStore::new()),
            &LedgerConfig::default(),
        );
        let draft = collection("A", 500).with_idempotency_key("k");

        let err = orchestrator
            .submit_with_timeout(draft.clone(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(err.is_accepted_pending());

        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(balance_of(&accounts.inner, "A"), dec(1500));
        let replay = orchestrator.submit(draft).await.unwrap();
        assert!(replay.replayed);
        assert_eq!(replay.new_balance, dec(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_submission_with_same_key_is_deduplicated() {
        let orchestrator = TransactionOrchestrator::new(
            Arc::new(SlowAccountStore {
                inner: InMemoryAccountStore::with_accounts([account("A", 1000)]),
            }),
            Arc::new(InMemoryTransactionStore::new()),
            &LedgerConfig::default(),
        );
        let draft = collection("A", 500).with_idempotency_key("k");

        let first = {
            let orchestrator = orchestrator.clone();
            let draft = draft.clone();
            tokio::spawn(async move { orchestrator.submit(draft).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        let err = orchestrator.submit(draft).await.unwrap_err();
        assert_eq!(err, LedgerError::submission_in_progress("k"));
        assert_eq!(err.kind(), ErrorKind::Deduplicated);
        assert!(!err.is_rejected());
        assert!(!err.is_accepted_pending());

        let receipt = first.await.unwrap().unwrap();
        assert_eq!(receipt.new_balance, dec(1500));
    }
}
