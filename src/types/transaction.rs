//! Transaction-related types for the fund ledger
//!
//! This module defines transaction types, the caller-supplied draft, and the
//! persisted transaction record the Transaction Store hands back.

use super::account::AccountId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction identifier
///
/// Assigned by the Transaction Store on append. Doubles as the idempotency
/// key for the balance mutation the transaction causes.
pub type TransactionId = u64;

/// Transaction types supported by the ledger
///
/// The type alone decides the sign of the amount at apply time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    /// Money received into the fund (positive)
    Collection,

    /// Money paid out of the fund (negative)
    Disbursement,
}

impl TransactionType {
    /// Parse a transaction type, ignoring case
    ///
    /// Accepts the dashboard's names for the two flows as well
    /// (`receipt` for collections, `payment` for disbursements).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "collection" | "receipt" => Some(TransactionType::Collection),
            "disbursement" | "payment" => Some(TransactionType::Disbursement),
            _ => None,
        }
    }

    /// Apply this type's sign to an unsigned amount
    pub fn signed(&self, amount: Decimal) -> Decimal {
        match self {
            TransactionType::Collection => amount,
            TransactionType::Disbursement => -amount,
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Collection => f.write_str("Collection"),
            TransactionType::Disbursement => f.write_str("Disbursement"),
        }
    }
}

/// Caller input to the Transaction Orchestrator
///
/// Everything a transaction carries except the fields the Transaction Store
/// assigns on append (`id`, `created_at`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionDraft {
    pub tx_type: TransactionType,

    /// Unsigned amount; must be strictly positive
    pub amount: Decimal,

    pub fund_account_id: AccountId,
    pub recipient_or_payer: String,

    /// Official receipt / voucher number, if any
    pub reference: Option<String>,

    pub mode_of_payment: String,
    pub created_by: String,

    /// Caller-supplied correlation key used to deduplicate retried submissions
    pub idempotency_key: Option<String>,
}

impl TransactionDraft {
    /// Create a draft with the required fields and no reference or idempotency key
    pub fn new(
        tx_type: TransactionType,
        fund_account_id: impl Into<AccountId>,
        amount: Decimal,
        recipient_or_payer: impl Into<String>,
        mode_of_payment: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        TransactionDraft {
            tx_type,
            amount,
            fund_account_id: fund_account_id.into(),
            recipient_or_payer: recipient_or_payer.into(),
            reference: None,
            mode_of_payment: mode_of_payment.into(),
            created_by: created_by.into(),
            idempotency_key: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Amount with the sign implied by the transaction type
    pub fn signed_amount(&self) -> Decimal {
        self.tx_type.signed(self.amount)
    }
}

/// Persisted transaction
///
/// Immutable once appended. Corrections are new offsetting transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub tx_type: TransactionType,
    pub amount: Decimal,
    pub fund_account_id: AccountId,
    pub recipient_or_payer: String,
    pub reference: Option<String>,
    pub mode_of_payment: String,
    pub created_by: String,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Build the stored record from a draft and the store-assigned id
    pub fn from_draft(id: TransactionId, draft: TransactionDraft, created_at: DateTime<Utc>) -> Self {
        Transaction {
            id,
            tx_type: draft.tx_type,
            amount: draft.amount,
            fund_account_id: draft.fund_account_id,
            recipient_or_payer: draft.recipient_or_payer,
            reference: draft.reference,
            mode_of_payment: draft.mode_of_payment,
            created_by: draft.created_by,
            idempotency_key: draft.idempotency_key,
            created_at,
        }
    }

    /// Amount with the sign implied by the transaction type
    pub fn signed_amount(&self) -> Decimal {
        self.tx_type.signed(self.amount)
    }
}

/// Where a submission is in the orchestrator's state machine
///
/// `Validating → Persisting → Applying → Notifying → Done`, with `Reconciling`
/// entered from `Applying` when the balance mutation fails after the
/// transaction has already been persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStage {
    Validating,
    Persisting,
    Applying,
    Reconciling,
    Notifying,
    Done,
}

impl fmt::Display for SubmissionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubmissionStage::Validating => "validating",
            SubmissionStage::Persisting => "persisting",
            SubmissionStage::Applying => "applying",
            SubmissionStage::Reconciling => "reconciling",
            SubmissionStage::Notifying => "notifying",
            SubmissionStage::Done => "done",
        };
        f.write_str(name)
    }
}
