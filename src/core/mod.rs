//! Core ledger module
//!
//! This module contains the balance-keeping components, leaves first:
//! - `traits` - Account Store and Transaction Store interfaces
//! - `memory` - In-memory store implementations
//! - `cache` - Read-through balance cache
//! - `serializer` - Per-account FIFO execution lanes
//! - `engine` - Serialized, compare-and-set balance mutation
//! - `broadcaster` - Balance-change event fan-out
//! - `monitor` - Edge-triggered low-balance alerting
//! - `tracker` - In-flight and pending-reconciliation bookkeeping
//! - `orchestrator` - The submit use case
//! - `reconciler` - Log-driven balance correction

pub mod broadcaster;
pub mod cache;
pub mod engine;
pub mod memory;
pub mod monitor;
pub mod orchestrator;
pub mod reconciler;
pub mod serializer;
pub mod tracker;
pub mod traits;

pub use broadcaster::{BalanceListener, EventBroadcaster, SubscriptionHandle};
pub use cache::BalanceCache;
pub use engine::LedgerEngine;
pub use memory::{InMemoryAccountStore, InMemoryTransactionStore};
pub use monitor::{AlertSink, ChannelAlertSink, ThresholdMonitor, TracingAlertSink};
pub use orchestrator::{SubmitReceipt, TransactionOrchestrator};
pub use reconciler::{ReconcileOutcome, ReconcileReport, Reconciler};
pub use serializer::UpdateSerializer;
pub use tracker::ApplyTracker;
pub use traits::{AccountStore, CasOutcome, TransactionStore};
