//! End-to-end integration tests
//!
//! These tests validate the complete ledger pipeline using predefined CSV
//! test fixtures. Each test:
//! 1. Reads accounts.csv and transactions.csv from a fixture directory
//! 2. Processes all transactions through the ledger
//! 3. Generates the final roster CSV
//! 4. Compares actual output with expected.csv
//!
//! Test fixtures are located in tests/fixtures/ and cover:
//! - Happy path scenarios
//! - Rejected transactions (bad amounts, unknown and inactive accounts, blank fields)
//! - Malformed roster and transaction rows
//! - Duplicate idempotency keys
//! - Balances going below zero
//! - Decimal precision
//! - Interleaved transactions across several accounts
//!
//! Each fixture is run with several batch sizes, so an account's
//! transactions are split across batches in some runs and not in others.

#[cfg(test)]
mod tests {
    use fund_ledger::{LedgerConfig, LedgerPipeline};
    use rstest::rstest;
    use rust_decimal::Decimal;
    use std::fs;
    use std::io::Write;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    /// Run a test fixture and compare the written roster with expected.csv
    ///
    /// # Arguments
    ///
    /// * `fixture_name` - Name of the fixture directory (e.g., "happy_path")
    /// * `batch_size` - Transactions per batch
    ///
    /// # Panics
    ///
    /// Panics if:
    /// - Fixture files cannot be read
    /// - Output doesn't match expected
    fn run_test_fixture(fixture_name: &str, batch_size: usize) {
        let fixture_dir = format!("tests/fixtures/{}", fixture_name);
        let accounts_path = format!("{}/accounts.csv", fixture_dir);
        let transactions_path = format!("{}/transactions.csv", fixture_dir);
        let expected_path = format!("{}/expected.csv", fixture_dir);

        for path in [&accounts_path, &transactions_path, &expected_path] {
            assert!(Path::new(path).exists(), "Fixture file not found: {}", path);
        }

        let config = LedgerConfig::new(
            Decimal::new(1000, 0),
            3,
            Duration::from_secs(60),
            4,
            batch_size,
        );
        let pipeline = LedgerPipeline::new(config);

        let mut temp_output = NamedTempFile::new().expect("Failed to create temp file");
        pipeline
            .process(
                Path::new(&accounts_path),
                Path::new(&transactions_path),
                &mut temp_output,
            )
            .unwrap_or_else(|e| panic!("Failed to process transactions: {}", e));
        temp_output.flush().expect("Failed to flush temp file");

        let actual_output = fs::read_to_string(temp_output.path())
            .unwrap_or_else(|e| panic!("Failed to read temp output file: {}", e));
        let expected_output = fs::read_to_string(&expected_path)
            .unwrap_or_else(|e| panic!("Failed to read expected file {}: {}", expected_path, e));

        assert_eq!(
            actual_output, expected_output,
            "\n\nOutput mismatch for fixture: {} (batch size: {})\n\nActual output:\n{}\n\nExpected output:\n{}\n",
            fixture_name, batch_size, actual_output, expected_output
        );
    }

    /// End-to-end test for all fixtures with small and large batches
    #[rstest]
    #[case("happy_path")]
    #[case("rejected_transactions")]
    #[case("malformed_data")]
    #[case("duplicate_keys")]
    #[case("negative_balance")]
    #[case("precision_testing")]
    #[case("multiple_accounts")]
    fn test_fixtures(#[case] fixture: &str, #[values(1, 3, 1000)] batch_size: usize) {
        run_test_fixture(fixture, batch_size);
    }

    #[test]
    fn test_summary_counts() {
        let pipeline = LedgerPipeline::new(LedgerConfig::default());
        let mut output = Vec::new();

        let summary = pipeline
            .process(
                Path::new("tests/fixtures/rejected_transactions/accounts.csv"),
                Path::new("tests/fixtures/rejected_transactions/transactions.csv"),
                &mut output,
            )
            .unwrap();

        assert_eq!(summary.accounts, 2);
        assert_eq!(summary.applied, 1);
        assert_eq!(summary.rejected, 7);
        assert_eq!(summary.pending_reconciliation, 0);
        assert_eq!(summary.corrected, 0);
    }
}
