//! Thread-safe in-memory account store
//!
//! This module provides the `InMemoryAccountStore` struct, an `AccountStore`
//! implementation that keeps fund accounts in a concurrent map.
//!
//! # Design
//!
//! The store uses `DashMap` to provide fine-grained locking per account, so a
//! compare-and-set on one account never contends with reads or writes on
//! another. The comparison and the write happen under the same entry lock,
//! which makes `compare_and_set` atomic.
//!
//! # Fault Injection
//!
//! The store can be taken offline or told to fail a number of upcoming writes.
//! Both surface as `LedgerError::StoreUnavailable`, which lets tests exercise
//! the partial-failure and reconciliation paths without a real database.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::core::traits::{AccountStore, CasOutcome};
use crate::types::{AccountId, AccountSnapshot, FundAccount, LedgerError};

const STORE: &str = "account store";

/// In-memory `AccountStore`
///
/// # Thread Safety
///
/// All methods are safe to call from multiple threads concurrently. The internal
/// `DashMap` ensures that operations on the same account are serialized while
/// operations on different accounts proceed in parallel.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    /// Account records keyed by account id
    accounts: DashMap<AccountId, FundAccount>,

    /// When set, every call fails with `StoreUnavailable`
    offline: AtomicBool,

    /// Number of upcoming `compare_and_set` calls that will fail
    failing_writes: AtomicUsize,
}

impl InMemoryAccountStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with accounts
    pub fn with_accounts(accounts: impl IntoIterator<Item = FundAccount>) -> Self {
        let store = Self::new();
        for account in accounts {
            store.insert(account);
        }
        store
    }

    /// Insert or replace an account record
    pub fn insert(&self, account: FundAccount) {
        self.accounts.insert(account.id.clone(), account);
    }

    /// Full record for an account, if present
    pub fn get_account(&self, account_id: &AccountId) -> Option<FundAccount> {
        self.accounts
            .get(account_id)
            .map(|entry| entry.value().clone())
    }

    /// Snapshot of every account record, in arbitrary order
    pub fn all_accounts(&self) -> Vec<FundAccount> {
        self.accounts
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Overwrite a balance without any concurrency check
    ///
    /// Simulates a writer outside the ledger (a manual database edit, another
    /// service). Returns `false` if the account does not exist.
    pub fn overwrite_balance(&self, account_id: &AccountId, balance: Decimal) -> bool {
        match self.accounts.get_mut(account_id) {
            Some(mut entry) => {
                entry.current_balance = balance;
                entry.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Take the store offline (or bring it back)
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make the next `count` compare-and-set calls fail with `StoreUnavailable`
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> Result<(), LedgerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(LedgerError::store_unavailable(STORE, "store is offline"));
        }
        Ok(())
    }

    fn take_injected_write_failure(&self) -> bool {
        self.failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn get(&self, account_id: &AccountId) -> Result<AccountSnapshot, LedgerError> {
        self.ensure_online()?;
        self.accounts
            .get(account_id)
            .map(|entry| entry.snapshot())
            .ok_or_else(|| LedgerError::invalid_account(account_id))
    }

    async fn compare_and_set(
        &self,
        account_id: &AccountId,
        expected: Decimal,
        new_balance: Decimal,
    ) -> Result<CasOutcome, LedgerError> {
        self.ensure_online()?;
        if self.take_injected_write_failure() {
            return Err(LedgerError::store_unavailable(STORE, "write rejected"));
        }

        let mut entry = self
            .accounts
            .get_mut(account_id)
            .ok_or_else(|| LedgerError::invalid_account(account_id))?;

        if entry.current_balance != expected {
            return Ok(CasOutcome::Conflict {
                actual: entry.current_balance,
            });
        }

        entry.current_balance = new_balance;
        entry.updated_at = Utc::now();
        Ok(CasOutcome::Applied)
    }

    async fn account_ids(&self) -> Result<Vec<AccountId>, LedgerError> {
        self.ensure_online()?;
        let mut ids: Vec<AccountId> = self.accounts.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}
