//! Store traits consumed by the ledger
//!
//! The ledger does not define its own persistence format. Durable storage of
//! accounts and transactions is reached through these two narrow interfaces;
//! `core::memory` provides in-process implementations.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{AccountId, AccountSnapshot, LedgerError, Transaction, TransactionDraft};

/// Result of an optimistic-concurrency write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The stored balance matched the expected value and was replaced
    Applied,

    /// Another writer got there first; `actual` is what the store holds now
    Conflict { actual: Decimal },
}

/// Authoritative record of fund accounts and their running balances
///
/// Implementations report unknown accounts as `LedgerError::InvalidAccount`
/// and infrastructure failures as `LedgerError::StoreUnavailable`.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Read the current, opening balance and status of an account
    async fn get(&self, account_id: &AccountId) -> Result<AccountSnapshot, LedgerError>;

    /// Replace the balance only if it still equals `expected`
    async fn compare_and_set(
        &self,
        account_id: &AccountId,
        expected: Decimal,
        new_balance: Decimal,
    ) -> Result<CasOutcome, LedgerError>;

    /// Every account the store knows about
    async fn account_ids(&self) -> Result<Vec<AccountId>, LedgerError>;
}

/// Durable, append-only record of transactions
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Persist a draft, assigning its transaction id
    async fn append(&self, draft: TransactionDraft) -> Result<Transaction, LedgerError>;

    /// All transactions recorded against an account, ordered by id
    async fn list_by_account(&self, account_id: &AccountId)
        -> Result<Vec<Transaction>, LedgerError>;

    /// The transaction recorded under a caller-supplied idempotency key, if any
    async fn find_by_idempotency_key(&self, key: &str)
        -> Result<Option<Transaction>, LedgerError>;
}
