//! CSV format handling for the account roster, transactions and output
//!
//! This module centralizes all CSV format concerns, providing:
//! - Record structures for deserializing the roster and transaction files
//! - Conversion from CSV records to domain types
//! - Final roster serialization
//!
//! All functions are pure (no I/O) for easy testing.

use crate::types::{
    AccountId, AccountStatus, AccountType, FundAccount, TransactionDraft, TransactionType,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Write;
use std::str::FromStr;

/// Account roster row
///
/// Matches the roster columns: id, code, name, account_type, initial_balance, status.
/// A missing or empty status means the account is active.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AccountCsvRecord {
    pub id: String,
    pub code: String,
    pub name: String,
    pub account_type: String,
    pub initial_balance: String,
    pub status: Option<String>,
}

/// Transaction row
///
/// Matches the columns: type, account, amount, recipient_or_payer, reference,
/// mode_of_payment, created_by, idempotency_key. Only the first three are
/// structurally required; blank descriptive fields are rejected later by the
/// orchestrator's validation, with the field named.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct TransactionCsvRecord {
    #[serde(rename = "type")]
    pub tx_type: String,
    pub account: String,
    pub amount: String,
    pub recipient_or_payer: Option<String>,
    pub reference: Option<String>,
    pub mode_of_payment: Option<String>,
    pub created_by: Option<String>,
    pub idempotency_key: Option<String>,
}

fn parse_decimal(value: &str, what: &str, row: &str) -> Result<Decimal, String> {
    Decimal::from_str(value.trim())
        .map_err(|_| format!("Invalid {} '{}' for {}", what, value, row))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Convert a roster row to a FundAccount
///
/// # Returns
///
/// Result containing either:
/// - Ok(FundAccount) - Active or inactive account with its running balance at the opening balance
/// - Err(String) - Error message describing the conversion failure
pub fn convert_account_record(record: AccountCsvRecord) -> Result<FundAccount, String> {
    if record.id.trim().is_empty() {
        return Err("Account row has an empty id".to_string());
    }
    let row = format!("account {}", record.id);

    let account_type = AccountType::parse(&record.account_type).ok_or_else(|| {
        format!(
            "Invalid account type: '{}' for {}",
            record.account_type, row
        )
    })?;

    let initial_balance = parse_decimal(&record.initial_balance, "initial balance", &row)?;

    let status = match non_blank(record.status) {
        Some(status) => AccountStatus::parse(&status)
            .ok_or_else(|| format!("Invalid status: '{}' for {}", status, row))?,
        None => AccountStatus::Active,
    };

    Ok(FundAccount::new(
        AccountId::new(record.id),
        record.code,
        record.name,
        account_type,
        initial_balance,
    )
    .with_status(status))
}

/// Convert a transaction row to a TransactionDraft
///
/// Parses the type (collection/receipt, disbursement/payment, any case) and
/// the amount. The amount's sign and size are left to the orchestrator.
pub fn convert_transaction_record(record: TransactionCsvRecord) -> Result<TransactionDraft, String> {
    let row = format!("transaction on account {}", record.account);

    let tx_type = TransactionType::parse(&record.tx_type)
        .ok_or_else(|| format!("Invalid transaction type: '{}' for {}", record.tx_type, row))?;

    if record.amount.trim().is_empty() {
        return Err(format!("{} {} requires an amount", tx_type, row));
    }
    let amount = parse_decimal(&record.amount, "amount", &row)?;

    let mut draft = TransactionDraft::new(
        tx_type,
        AccountId::new(record.account),
        amount,
        record.recipient_or_payer.unwrap_or_default(),
        record.mode_of_payment.unwrap_or_default(),
        record.created_by.unwrap_or_default(),
    );
    draft.reference = non_blank(record.reference);
    draft.idempotency_key = non_blank(record.idempotency_key);

    Ok(draft)
}

/// Write the final account roster to CSV format
///
/// Writes accounts with columns: id, code, name, account_type,
/// initial_balance, current_balance, status. Accounts are sorted by id for
/// deterministic output and balances carry two decimal places.
///
/// # Arguments
///
/// * `accounts` - Slice of accounts to write
/// * `output` - Mutable reference to a writer for outputting CSV
///
/// # Returns
///
/// * `Ok(())` if writing succeeded
/// * `Err(String)` if a write error occurred
pub fn write_accounts_csv(accounts: &[FundAccount], output: &mut dyn Write) -> Result<(), String> {
    use csv::Writer;

    let mut writer = Writer::from_writer(output);

    writer
        .write_record([
            "id",
            "code",
            "name",
            "account_type",
            "initial_balance",
            "current_balance",
            "status",
        ])
        .map_err(|e| format!("Failed to write CSV header: {}", e))?;

    let mut sorted_accounts: Vec<&FundAccount> = accounts.iter().collect();
    sorted_accounts.sort_by(|a, b| a.id.cmp(&b.id));

    for account in sorted_accounts {
        writer
            .write_record(&[
                account.id.to_string(),
                account.code.clone(),
                account.name.clone(),
                account.account_type.to_string(),
                format!("{:.2}", account.initial_balance),
                format!("{:.2}", account.current_balance),
                account.status.to_string(),
            ])
            .map_err(|e| format!("Failed to write account record: {}", e))?;
    }

    writer
        .flush()
        .map_err(|e| format!("Failed to flush output: {}", e))?;

    Ok(())
}
