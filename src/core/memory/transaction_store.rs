//! Thread-safe in-memory transaction store
//!
//! This module provides the `InMemoryTransactionStore` struct, an append-only
//! `TransactionStore` kept in concurrent maps.
//!
//! # Design
//!
//! Transactions are keyed by a monotonically increasing id. Two secondary
//! indexes answer the questions the ledger asks of the log:
//! - per-account id lists for reconciliation
//! - idempotency keys for deduplicating retried submissions (first occurrence wins)

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use crate::core::traits::TransactionStore;
use crate::types::{AccountId, LedgerError, Transaction, TransactionDraft, TransactionId};

const STORE: &str = "transaction store";

/// In-memory `TransactionStore`
#[derive(Debug)]
pub struct InMemoryTransactionStore {
    /// Transaction records keyed by id
    transactions: DashMap<TransactionId, Transaction>,

    /// Transaction ids recorded against each account
    by_account: DashMap<AccountId, Vec<TransactionId>>,

    /// Transaction id recorded under each idempotency key
    by_key: DashMap<String, TransactionId>,

    next_id: AtomicU64,

    /// When set, every call fails with `StoreUnavailable`
    offline: AtomicBool,

    /// Number of upcoming appends that will fail
    failing_appends: AtomicUsize,
}

impl InMemoryTransactionStore {
    /// Create a new empty store; the first appended transaction gets id 1
    pub fn new() -> Self {
        Self {
            transactions: DashMap::new(),
            by_account: DashMap::new(),
            by_key: DashMap::new(),
            next_id: AtomicU64::new(1),
            offline: AtomicBool::new(false),
            failing_appends: AtomicUsize::new(0),
        }
    }

    /// Look up a transaction by id
    pub fn get(&self, tx_id: TransactionId) -> Option<Transaction> {
        self.transactions
            .get(&tx_id)
            .map(|entry| entry.value().clone())
    }

    /// Number of persisted transactions
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Take the store offline (or bring it back)
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make the next `count` appends fail with `StoreUnavailable`
    pub fn fail_next_appends(&self, count: usize) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), LedgerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::store_unavailable(STORE, "store is offline"));
        }
        Ok(())
    }
}

impl Default for InMemoryTransactionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn append(&self, draft: TransactionDraft) -> Result<Transaction, LedgerError> {
        self.ensure_online()?;
        let injected = self
            .failing_appends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(LedgerError::store_unavailable(STORE, "append rejected"));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let transaction = Transaction::from_draft(id, draft, Utc::now());

        self.transactions.insert(id, transaction.clone());
        self.by_account
            .entry(transaction.fund_account_id.clone())
            .or_default()
            .push(id);
        if let Some(key) = &transaction.idempotency_key {
            self.by_key.entry(key.clone()).or_insert(id);
        }

        Ok(transaction)
    }

    async fn list_by_account(
        &self,
        account_id: &AccountId,
    ) -> Result<Vec<Transaction>, LedgerError> {
        self.ensure_online()?;

        // Copy the id list out before touching the other map
        let mut ids = self
            .by_account
            .get(account_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        ids.sort_unstable();

        Ok(ids.into_iter().filter_map(|id| self.get(id)).collect())
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Transaction>, LedgerError> {
        self.ensure_online()?;
        let id = self.by_key.get(key).map(|entry| *entry.value());
        Ok(id.and_then(|id| self.get(id)))
    }
}
