//! Types module
//!
//! Contains core data structures used throughout the ledger.
//! This module organizes types into logical submodules:
//! - `account`: Fund account types and identifiers
//! - `transaction`: Transaction types, drafts and submission stages
//! - `balance`: Balance operations, committed changes and events
//! - `error`: Error types for the ledger

pub mod account;
pub mod balance;
pub mod error;
pub mod transaction;

pub use account::{AccountId, AccountSnapshot, AccountStatus, AccountType, FundAccount};
pub use balance::{AlertEvent, AlertKind, BalanceChange, BalanceChangeEvent, BalanceOperation};
pub use error::{ErrorKind, LedgerError};
pub use transaction::{
    SubmissionStage, Transaction, TransactionDraft, TransactionId, TransactionType,
};
