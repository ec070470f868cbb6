//! Balance mutation and notification types
//!
//! `BalanceOperation` is what the Ledger Engine is asked to do, `BalanceChange`
//! is what it reports back once the Account Store has accepted the write, and
//! the two event types are the ephemeral notifications derived from a change.

use super::account::AccountId;
use super::transaction::TransactionId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A balance mutation requested from the Ledger Engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceOperation {
    /// Increase the balance by the amount
    Add(Decimal),

    /// Decrease the balance by the amount
    Subtract(Decimal),

    /// Replace the balance outright (administrative correction, reconciliation)
    Set(Decimal),
}

impl BalanceOperation {
    /// Map a signed amount to ADD (non-negative) or SUBTRACT (negative)
    pub fn from_signed(amount: Decimal) -> Self {
        if amount.is_sign_negative() && !amount.is_zero() {
            BalanceOperation::Subtract(-amount)
        } else {
            BalanceOperation::Add(amount)
        }
    }

    /// Compute the balance that results from applying this operation
    ///
    /// Returns `None` on decimal overflow.
    pub fn apply_to(&self, current: Decimal) -> Option<Decimal> {
        match self {
            BalanceOperation::Add(amount) => current.checked_add(*amount),
            BalanceOperation::Subtract(amount) => current.checked_sub(*amount),
            BalanceOperation::Set(target) => Some(*target),
        }
    }

    /// Short operation name used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            BalanceOperation::Add(_) => "add",
            BalanceOperation::Subtract(_) => "subtract",
            BalanceOperation::Set(_) => "set",
        }
    }
}

/// A committed balance mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceChange {
    pub account_id: AccountId,
    pub old_balance: Decimal,
    pub new_balance: Decimal,

    /// Transaction that caused the change; `None` for SET corrections
    pub cause: Option<TransactionId>,

    pub committed_at: DateTime<Utc>,
}

impl BalanceChange {
    /// Event announcing this change to dashboard listeners
    pub fn to_event(&self) -> BalanceChangeEvent {
        BalanceChangeEvent {
            fund_account_id: self.account_id.clone(),
            old_balance: self.old_balance,
            new_balance: self.new_balance,
            causing_transaction_id: self.cause,
            timestamp: self.committed_at,
        }
    }
}

/// Balance-change notification delivered to subscribed listeners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChangeEvent {
    pub fund_account_id: AccountId,
    pub old_balance: Decimal,
    pub new_balance: Decimal,
    pub causing_transaction_id: Option<TransactionId>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    LowBalance,
}

/// Alert raised by the Threshold Monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub kind: AlertKind,
    pub fund_account_id: AccountId,
    pub balance: Decimal,

    /// Threshold in force for the account when the alert fired
    pub threshold: Decimal,

    pub timestamp: DateTime<Utc>,
}
