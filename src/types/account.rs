//! Fund account types for the ledger
//!
//! This module defines the FundAccount structure, its identifier, and the
//! narrow snapshot the Account Store reports to the Ledger Engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fund account identifier
///
/// Opaque to the ledger. Accounts are keyed by this value in every store,
/// cache and serializer lane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Create an identifier from anything string-like
    pub fn new(id: impl Into<String>) -> Self {
        AccountId(id.into())
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        AccountId(id.to_string())
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        AccountId(id)
    }
}

/// Classification of a fund account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    Revenue,
    Expense,
    Asset,
    Liability,
    Equity,
}

impl AccountType {
    /// Parse an account type, ignoring case
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "revenue" => Some(AccountType::Revenue),
            "expense" => Some(AccountType::Expense),
            "asset" => Some(AccountType::Asset),
            "liability" => Some(AccountType::Liability),
            "equity" => Some(AccountType::Equity),
            _ => None,
        }
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccountType::Revenue => "Revenue",
            AccountType::Expense => "Expense",
            AccountType::Asset => "Asset",
            AccountType::Liability => "Liability",
            AccountType::Equity => "Equity",
        };
        f.write_str(name)
    }
}

/// Whether an account accepts new transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    Active,
    Inactive,
}

impl AccountStatus {
    /// Parse an account status, ignoring case
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "active" => Some(AccountStatus::Active),
            "inactive" => Some(AccountStatus::Inactive),
            _ => None,
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountStatus::Active => f.write_str("Active"),
            AccountStatus::Inactive => f.write_str("Inactive"),
        }
    }
}

/// Fund account state
///
/// The Account Store owns `current_balance`. Every other copy of it in the
/// process (cache entries, events) is derived and may be stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundAccount {
    /// Unique account identifier
    pub id: AccountId,

    /// Short chart-of-accounts code
    pub code: String,

    /// Human readable account name
    pub name: String,

    /// Account classification
    pub account_type: AccountType,

    /// Opening balance, fixed at creation
    pub initial_balance: Decimal,

    /// Running balance
    ///
    /// Holds `initial_balance + sum(signed amounts)` over every applied transaction.
    pub current_balance: Decimal,

    /// Whether the account accepts new transactions
    pub status: AccountStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FundAccount {
    /// Create a new active account whose running balance starts at the opening balance
    pub fn new(
        id: impl Into<AccountId>,
        code: impl Into<String>,
        name: impl Into<String>,
        account_type: AccountType,
        initial_balance: Decimal,
    ) -> Self {
        let now = Utc::now();
        FundAccount {
            id: id.into(),
            code: code.into(),
            name: name.into(),
            account_type,
            initial_balance,
            current_balance: initial_balance,
            status: AccountStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Same account with a different status
    pub fn with_status(mut self, status: AccountStatus) -> Self {
        self.status = status;
        self
    }

    /// The view of this account the Ledger Engine works from
    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            current_balance: self.current_balance,
            initial_balance: self.initial_balance,
            status: self.status,
        }
    }
}

/// What the Account Store reports for a single account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub current_balance: Decimal,
    pub initial_balance: Decimal,
    pub status: AccountStatus,
}

impl AccountSnapshot {
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}
