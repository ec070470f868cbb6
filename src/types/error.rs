//! Error types for the fund ledger
//!
//! This module defines every error the ledger can report, plus the coarse
//! taxonomy callers use to decide what to do next.
//!
//! # Error Categories
//!
//! - **Validation**: the caller's input was rejected before any side effect
//! - **StoreUnavailable**: transient infrastructure failure
//! - **StaleBalance**: optimistic-write conflict that outlasted the retry bound
//! - **ReconciliationRequired**: the transaction is durable but its balance
//!   mutation is not confirmed ("accepted, balance pending")
//! - **InvalidAccount**: unknown account, fatal
//! - **Deduplicated**: a retry of a submission that is already recorded or
//!   being recorded; nothing new happened, and nothing should be resubmitted

use super::account::AccountId;
use super::transaction::{SubmissionStage, TransactionId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Coarse error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    StoreUnavailable,
    StaleBalance,
    ReconciliationRequired,
    InvalidAccount,
    Deduplicated,
}

/// Main error type for the ledger
///
/// Each variant carries enough context to log the failure without access to
/// the request that caused it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// Transaction amount is zero or negative
    #[error("Invalid amount {amount}: transaction amounts must be greater than zero")]
    InvalidAmount {
        /// The rejected amount
        amount: Decimal,
    },

    /// A required draft field is missing or blank
    #[error("Missing required field '{field}'")]
    MissingField {
        /// Name of the missing field
        field: &'static str,
    },

    /// Account exists but does not accept transactions
    #[error("Account {account} is inactive")]
    AccountInactive {
        /// The inactive account
        account: AccountId,
    },

    /// Account is unknown to the Account Store
    ///
    /// Fatal for the request, never retried.
    #[error("Unknown account {account}")]
    InvalidAccount {
        /// The account that was not found
        account: AccountId,
    },

    /// A store could not be reached
    ///
    /// Safe to retry a whole submission only if nothing was persisted yet.
    #[error("{store} unavailable: {message}")]
    StoreUnavailable {
        /// Which store failed ("account store", "transaction store")
        store: &'static str,
        /// Description of the failure
        message: String,
    },

    /// Optimistic write kept conflicting with another writer
    #[error("Stale balance for account {account}: write conflicted {attempts} times")]
    StaleBalance {
        /// The contended account
        account: AccountId,
        /// Number of compare-and-set attempts made
        attempts: usize,
    },

    /// Transaction was persisted but its balance mutation was not confirmed
    ///
    /// The caller must treat the submission as accepted and must not resubmit.
    /// A reconciliation sweep converges the balance.
    #[error("Transaction {transaction} on account {account} recorded, balance pending reconciliation: {reason}")]
    ReconciliationRequired {
        /// The persisted transaction
        transaction: TransactionId,
        /// The account whose balance is pending
        account: AccountId,
        /// Why the apply did not complete
        reason: String,
    },

    /// Balance arithmetic would overflow the decimal range
    #[error("Arithmetic overflow in {operation} for account {account}")]
    ArithmeticOverflow {
        /// Operation that would overflow
        operation: &'static str,
        /// The account being updated
        account: AccountId,
    },

    /// A submission with this idempotency key is still being processed
    #[error("Submission with idempotency key '{key}' is already in progress")]
    SubmissionInProgress {
        /// The caller-supplied idempotency key
        key: String,
    },

    /// The Transaction Store already holds a transaction for this idempotency key
    #[error("Idempotency key '{key}' already recorded as transaction {transaction}")]
    DuplicateSubmission {
        /// The caller-supplied idempotency key
        key: String,
        /// The transaction recorded under that key
        transaction: TransactionId,
    },

    /// Submission timed out before anything was persisted
    #[error("Submission timed out while {stage}")]
    Timeout {
        /// Stage that was running when time ran out
        stage: SubmissionStage,
    },
}

impl LedgerError {
    /// Coarse category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidAmount { .. }
            | LedgerError::MissingField { .. }
            | LedgerError::AccountInactive { .. }
            | LedgerError::ArithmeticOverflow { .. } => ErrorKind::Validation,
            LedgerError::SubmissionInProgress { .. } | LedgerError::DuplicateSubmission { .. } => {
                ErrorKind::Deduplicated
            }
            LedgerError::StoreUnavailable { .. } | LedgerError::Timeout { .. } => {
                ErrorKind::StoreUnavailable
            }
            LedgerError::StaleBalance { .. } => ErrorKind::StaleBalance,
            LedgerError::ReconciliationRequired { .. } => ErrorKind::ReconciliationRequired,
            LedgerError::InvalidAccount { .. } => ErrorKind::InvalidAccount,
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::StoreUnavailable | ErrorKind::StaleBalance
        )
    }

    /// Whether the submission was rejected with no durable side effect
    ///
    /// Only a rejected submission may be fixed and sent again.
    pub fn is_rejected(&self) -> bool {
        !self.is_accepted_pending() && !self.is_deduplicated()
    }

    /// Whether this was a retry of a submission that is recorded, or about to be
    pub fn is_deduplicated(&self) -> bool {
        self.kind() == ErrorKind::Deduplicated
    }

    /// Whether the transaction is durable and only its balance is pending
    pub fn is_accepted_pending(&self) -> bool {
        self.kind() == ErrorKind::ReconciliationRequired
    }
}

// Helper functions for creating common errors

impl LedgerError {
    /// Create an InvalidAmount error
    pub fn invalid_amount(amount: Decimal) -> Self {
        LedgerError::InvalidAmount { amount }
    }

    /// Create a MissingField error
    pub fn missing_field(field: &'static str) -> Self {
        LedgerError::MissingField { field }
    }

    /// Create an AccountInactive error
    pub fn account_inactive(account: &AccountId) -> Self {
        LedgerError::AccountInactive {
            account: account.clone(),
        }
    }

    /// Create an InvalidAccount error
    pub fn invalid_account(account: &AccountId) -> Self {
        LedgerError::InvalidAccount {
            account: account.clone(),
        }
    }

    /// Create a StoreUnavailable error
    pub fn store_unavailable(store: &'static str, message: impl Into<String>) -> Self {
        LedgerError::StoreUnavailable {
            store,
            message: message.into(),
        }
    }

    /// Create a StaleBalance error
    pub fn stale_balance(account: &AccountId, attempts: usize) -> Self {
        LedgerError::StaleBalance {
            account: account.clone(),
            attempts,
        }
    }

    /// Create a ReconciliationRequired error
    pub fn reconciliation_required(
        transaction: TransactionId,
        account: &AccountId,
        reason: impl Into<String>,
    ) -> Self {
        LedgerError::ReconciliationRequired {
            transaction,
            account: account.clone(),
            reason: reason.into(),
        }
    }

    /// Create an ArithmeticOverflow error
    pub fn arithmetic_overflow(operation: &'static str, account: &AccountId) -> Self {
        LedgerError::ArithmeticOverflow {
            operation,
            account: account.clone(),
        }
    }

    /// Create a SubmissionInProgress error
    pub fn submission_in_progress(key: &str) -> Self {
        LedgerError::SubmissionInProgress {
            key: key.to_string(),
        }
    }

    /// Create a DuplicateSubmission error
    pub fn duplicate_submission(key: &str, transaction: TransactionId) -> Self {
        LedgerError::DuplicateSubmission {
            key: key.to_string(),
            transaction,
        }
    }

    /// Create a Timeout error
    pub fn timeout(stage: SubmissionStage) -> Self {
        LedgerError::Timeout { stage }
    }
}
