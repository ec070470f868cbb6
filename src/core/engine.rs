//! Ledger Engine: serialized, optimistic balance mutation
//!
//! This module provides the `LedgerEngine`, the only component allowed to
//! change an account's `current_balance`.
//!
//! # Algorithm
//!
//! For every mutation:
//! 1. Enter the account's lane in the `UpdateSerializer`
//! 2. Read the current balance through the `BalanceCache`
//! 3. Compute the new balance with checked fixed-point arithmetic
//! 4. Compare-and-set it in the Account Store, expecting the balance read in step 2.
//!    On conflict the cache entry is dropped and steps 2–4 are retried, up to
//!    `max_cas_attempts` times in total
//! 5. Write the confirmed balance to the cache and report the change
//!
//! # Architecture
//!
//! ```text
//! LedgerEngine
//!     ├── UpdateSerializer        (one FIFO lane per account)
//!     ├── BalanceCache            (read-through, invalidated on conflict)
//!     └── Arc<dyn AccountStore>   (authoritative balances, compare-and-set)
//! ```
//!
//! The engine applies exactly what it is asked to, once per call. Making sure
//! a transaction is not submitted twice is the orchestrator's job.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::core::cache::BalanceCache;
use crate::core::serializer::UpdateSerializer;
use crate::core::traits::{AccountStore, CasOutcome};
use crate::types::{AccountId, BalanceChange, BalanceOperation, LedgerError, TransactionId};

/// Default number of compare-and-set attempts per mutation
pub const DEFAULT_MAX_CAS_ATTEMPTS: usize = 3;

/// Balance mutation engine
///
/// Shared between callers behind an `Arc`; every method takes `&self`.
pub struct LedgerEngine {
    store: Arc<dyn AccountStore>,
    cache: BalanceCache,
    serializer: UpdateSerializer,
    max_cas_attempts: usize,
}

impl LedgerEngine {
    /// Create an engine over an Account Store
    ///
    /// A `max_cas_attempts` of zero is treated as one attempt.
    pub fn new(store: Arc<dyn AccountStore>, max_cas_attempts: usize) -> Self {
        Self {
            cache: BalanceCache::new(Arc::clone(&store)),
            store,
            serializer: UpdateSerializer::new(),
            max_cas_attempts: max_cas_attempts.max(1),
        }
    }

    pub fn cache(&self) -> &BalanceCache {
        &self.cache
    }

    pub fn serializer(&self) -> &UpdateSerializer {
        &self.serializer
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    /// Cached balance for dashboards and other fast readers
    pub async fn balance(&self, account_id: &AccountId) -> Result<Decimal, LedgerError> {
        self.cache.read(account_id).await
    }

    /// Apply a signed amount on behalf of a transaction
    ///
    /// # Returns
    ///
    /// * `Ok(BalanceChange)` with the balance before and after the mutation
    /// * `Err(LedgerError::InvalidAccount)` if the account is unknown
    /// * `Err(LedgerError::StoreUnavailable)` if the Account Store failed
    /// * `Err(LedgerError::StaleBalance)` if every compare-and-set attempt conflicted
    /// * `Err(LedgerError::ArithmeticOverflow)` if the result is out of range
    pub async fn apply(
        &self,
        account_id: &AccountId,
        signed_amount: Decimal,
        transaction_id: TransactionId,
    ) -> Result<BalanceChange, LedgerError> {
        self.apply_operation(
            account_id,
            BalanceOperation::from_signed(signed_amount),
            Some(transaction_id),
        )
        .await
    }

    /// Overwrite a balance (administrative correction)
    ///
    /// Goes through the same lane and compare-and-set path as every other mutation.
    pub async fn set_balance(
        &self,
        account_id: &AccountId,
        target: Decimal,
    ) -> Result<BalanceChange, LedgerError> {
        self.apply_operation(account_id, BalanceOperation::Set(target), None)
            .await
    }

    /// Apply any balance operation
    pub async fn apply_operation(
        &self,
        account_id: &AccountId,
        operation: BalanceOperation,
        cause: Option<TransactionId>,
    ) -> Result<BalanceChange, LedgerError> {
        self.apply_and_then(account_id, operation, cause, |_| {})
            .await
    }

    /// Apply a balance operation and run `on_commit` before leaving the lane
    ///
    /// `on_commit` sees changes for an account in exactly the order they were
    /// committed. It must not block: the account's next mutation waits for it.
    pub async fn apply_and_then<F>(
        &self,
        account_id: &AccountId,
        operation: BalanceOperation,
        cause: Option<TransactionId>,
        on_commit: F,
    ) -> Result<BalanceChange, LedgerError>
    where
        F: FnOnce(&BalanceChange),
    {
        self.serializer
            .enqueue(account_id, move || async move {
                let change = self.commit_locked(account_id, operation, cause).await?;
                on_commit(&change);
                Ok(change)
            })
            .await
    }

    /// Steps 2–5 of the mutation algorithm
    ///
    /// The caller must already be running inside the account's lane.
    pub(crate) async fn commit_locked(
        &self,
        account_id: &AccountId,
        operation: BalanceOperation,
        cause: Option<TransactionId>,
    ) -> Result<BalanceChange, LedgerError> {
        for attempt in 1..=self.max_cas_attempts {
            let old_balance = self.cache.read(account_id).await?;
            let new_balance = operation
                .apply_to(old_balance)
                .ok_or_else(|| LedgerError::arithmetic_overflow(operation.name(), account_id))?;

            let outcome = match self
                .store
                .compare_and_set(account_id, old_balance, new_balance)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    // The write may or may not have landed
                    self.cache.invalidate(account_id);
                    return Err(e);
                }
            };

            match outcome {
                CasOutcome::Applied => {
                    self.cache.write(account_id, new_balance);
                    debug!(
                        account = %account_id,
                        operation = operation.name(),
                        %old_balance,
                        %new_balance,
                        cause = ?cause,
                        "balance committed"
                    );
                    return Ok(BalanceChange {
                        account_id: account_id.clone(),
                        old_balance,
                        new_balance,
                        cause,
                        committed_at: Utc::now(),
                    });
                }
                CasOutcome::Conflict { actual } => {
                    debug!(
                        account = %account_id,
                        attempt,
                        expected = %old_balance,
                        %actual,
                        "balance write conflicted, refreshing"
                    );
                    self.cache.invalidate(account_id);
                }
            }
        }

        warn!(
            account = %account_id,
            attempts = self.max_cas_attempts,
            "giving up on contended balance write"
        );
        Err(LedgerError::stale_balance(account_id, self.max_cas_attempts))
    }
}

impl std::fmt::Debug for LedgerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerEngine")
            .field("cache", &self.cache)
            .field("serializer", &self.serializer)
            .field("max_cas_attempts", &self.max_cas_attempts)
            .finish_non_exhaustive()
    }
}
