//! Ledger configuration
//!
//! Tunables for the orchestrator, the reconciler and the command-line
//! pipeline. Zero values are not meaningful for any count or interval here,
//! so they fall back to the defaults with a warning.

use std::time::Duration;

use rust_decimal::Decimal;
use tracing::warn;

use crate::core::engine::DEFAULT_MAX_CAS_ATTEMPTS;

pub const DEFAULT_IDEMPOTENCY_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Configuration for the fund ledger
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerConfig {
    /// Balance below which an account raises a low-balance alert
    pub low_balance_threshold: Decimal,

    /// Compare-and-set attempts per balance mutation before giving up
    pub max_cas_attempts: usize,

    /// Interval between background reconciliation sweeps
    pub reconcile_interval: Duration,

    /// Worker threads for the command-line pipeline
    pub max_concurrent_submissions: usize,

    /// Transactions read from CSV per batch
    pub batch_size: usize,

    /// How long a settled idempotency key is answered from memory. Older keys
    /// are forgotten and looked up in the Transaction Store instead
    pub idempotency_retention: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            low_balance_threshold: Decimal::new(100_000, 2),
            max_cas_attempts: DEFAULT_MAX_CAS_ATTEMPTS,
            reconcile_interval: Duration::from_secs(60),
            max_concurrent_submissions: num_cpus::get(),
            batch_size: 1000,
            idempotency_retention: DEFAULT_IDEMPOTENCY_RETENTION,
        }
    }
}

impl LedgerConfig {
    /// Create a LedgerConfig with custom values
    pub fn new(
        low_balance_threshold: Decimal,
        max_cas_attempts: usize,
        reconcile_interval: Duration,
        max_concurrent_submissions: usize,
        batch_size: usize,
    ) -> Self {
        let default = Self::default();

        let max_cas_attempts = if max_cas_attempts == 0 {
            warn!(
                "Invalid max_cas_attempts ({}), using default ({})",
                max_cas_attempts, default.max_cas_attempts
            );
            default.max_cas_attempts
        } else {
            max_cas_attempts
        };

        let reconcile_interval = if reconcile_interval.is_zero() {
            warn!(
                "Invalid reconcile_interval ({:?}), using default ({:?})",
                reconcile_interval, default.reconcile_interval
            );
            default.reconcile_interval
        } else {
            reconcile_interval
        };

        let max_concurrent_submissions = if max_concurrent_submissions == 0 {
            warn!(
                "Invalid max_concurrent_submissions ({}), using default ({})",
                max_concurrent_submissions, default.max_concurrent_submissions
            );
            default.max_concurrent_submissions
        } else {
            max_concurrent_submissions
        };

        let batch_size = if batch_size == 0 {
            warn!(
                "Invalid batch_size ({}), using default ({})",
                batch_size, default.batch_size
            );
            default.batch_size
        } else {
            batch_size
        };

        Self {
            low_balance_threshold,
            max_cas_attempts,
            reconcile_interval,
            max_concurrent_submissions,
            batch_size,
            idempotency_retention: default.idempotency_retention,
        }
    }

    /// Set how long settled idempotency keys are kept in memory
    pub fn with_idempotency_retention(mut self, retention: Duration) -> Self {
        if retention.is_zero() {
            warn!(
                "Invalid idempotency_retention ({:?}), keeping {:?}",
                retention, self.idempotency_retention
            );
        } else {
            self.idempotency_retention = retention;
        }
        self
    }
}
