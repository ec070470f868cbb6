//! Fund Ledger Library
//! # Overview
//!
//! This library keeps the running balances of fund accounts consistent with
//! the stream of Collection and Disbursement transactions applied against
//! them. Balances are cached for fast reads, every change is broadcast to
//! listeners, and low balances raise alerts. Concurrent transactions on one
//! account never lose an update, and a transaction whose balance could not be
//! applied after it was recorded is repaired by reconciliation.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (FundAccount, Transaction, events, errors)
//! - [`config`] - Ledger tunables
//! - [`core`] - Ledger components:
//!   - [`core::orchestrator`] - Validate, persist, apply, notify
//!   - [`core::engine`] - Serialized, compare-and-set balance mutation
//!   - [`core::cache`] - Read-through balance cache
//!   - [`core::serializer`] - Per-account FIFO lanes
//!   - [`core::broadcaster`] - Balance-change event fan-out
//!   - [`core::monitor`] - Edge-triggered low-balance alerts
//!   - [`core::reconciler`] - Log-driven balance correction
//!   - [`core::memory`] - In-memory Account and Transaction Stores
//! - [`io`] - CSV roster and transaction handling
//! - [`pipeline`] - The command-line run: roster in, transactions through, roster out
//! - [`cli`] - CLI arguments parsing
//!
//! # Transaction Types
//!
//! - **Collection**: money received into a fund, added to its balance
//! - **Disbursement**: money paid out of a fund, subtracted from its balance
//!
//! Balances may go negative; overdraft policy is not the ledger's concern.
//!
//! # Example
//!
//! ```no_run
//! use fund_ledger::{
//!     AccountType, FundAccount, InMemoryAccountStore, InMemoryTransactionStore, LedgerConfig,
//!     TransactionDraft, TransactionOrchestrator, TransactionType,
//! };
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), fund_ledger::LedgerError> {
//! let accounts = Arc::new(InMemoryAccountStore::with_accounts([FundAccount::new(
//!     "GF-01",
//!     "1-01",
//!     "General Fund",
//!     AccountType::Asset,
//!     Decimal::new(1000, 0),
//! )]));
//! let orchestrator = TransactionOrchestrator::new(
//!     accounts,
//!     Arc::new(InMemoryTransactionStore::new()),
//!     &LedgerConfig::default(),
//! );
//!
//! let receipt = orchestrator
//!     .submit(TransactionDraft::new(
//!         TransactionType::Collection,
//!         "GF-01",
//!         Decimal::new(500, 0),
//!         "Juan Dela Cruz",
//!         "cash",
//!         "cashier",
//!     ))
//!     .await?;
//! assert_eq!(receipt.new_balance, Decimal::new(1500, 0));
//! # Ok(())
//! # }
//! ```

// Module declarations
pub mod cli;
pub mod config;
pub mod core;
pub mod io;
pub mod pipeline;
pub mod types;

pub use config::LedgerConfig;
pub use core::{
    AccountStore, AlertSink, BalanceListener, ChannelAlertSink, EventBroadcaster,
    InMemoryAccountStore, InMemoryTransactionStore, LedgerEngine, ReconcileOutcome,
    ReconcileReport, Reconciler, SubmitReceipt, SubscriptionHandle, ThresholdMonitor,
    TracingAlertSink, TransactionOrchestrator, TransactionStore,
};
pub use io::write_accounts_csv;
pub use pipeline::LedgerPipeline;
pub use types::{
    AccountId, AccountStatus, AccountType, AlertEvent, BalanceChange, BalanceChangeEvent,
    BalanceOperation, ErrorKind, FundAccount, LedgerError, Transaction, TransactionDraft,
    TransactionId, TransactionType,
};
