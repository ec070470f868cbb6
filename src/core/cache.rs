//! Read-through balance cache
//!
//! Holds a derived, possibly stale copy of each account's balance. The
//! Account Store stays authoritative: a miss fetches from it, a failed fetch
//! caches nothing, and any write conflict invalidates the entry.
//!
//! The cache does no locking of its own beyond what `DashMap` needs for memory
//! safety. Callers (the Ledger Engine) serialize access per account.

use std::sync::Arc;

use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::debug;

use crate::core::traits::AccountStore;
use crate::types::{AccountId, LedgerError};

/// In-memory read-through cache of `account_id → balance`
pub struct BalanceCache {
    store: Arc<dyn AccountStore>,
    entries: DashMap<AccountId, Decimal>,
}

impl BalanceCache {
    /// Create an empty cache in front of an Account Store
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self {
            store,
            entries: DashMap::new(),
        }
    }

    /// Balance for an account, fetching it from the store on a miss
    ///
    /// # Errors
    ///
    /// * `StoreUnavailable` if the store cannot be reached (nothing is cached)
    /// * `InvalidAccount` if the store does not know the account
    pub async fn read(&self, account_id: &AccountId) -> Result<Decimal, LedgerError> {
        if let Some(balance) = self.peek(account_id) {
            return Ok(balance);
        }

        debug!(account = %account_id, "balance cache miss");
        let snapshot = self.store.get(account_id).await?;
        self.entries
            .insert(account_id.clone(), snapshot.current_balance);
        Ok(snapshot.current_balance)
    }

    /// Cached balance without touching the store
    pub fn peek(&self, account_id: &AccountId) -> Option<Decimal> {
        self.entries.get(account_id).map(|entry| *entry.value())
    }

    /// Record a balance the store has just confirmed
    pub fn write(&self, account_id: &AccountId, balance: Decimal) {
        self.entries.insert(account_id.clone(), balance);
    }

    /// Drop the cached balance so the next read goes to the store
    pub fn invalidate(&self, account_id: &AccountId) {
        self.entries.remove(account_id);
    }

    /// Number of cached balances
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for BalanceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalanceCache")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}
