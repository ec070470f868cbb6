//! Synchronous account roster reader with iterator interface
//!
//! Provides a streaming iterator over fund accounts from a roster CSV file.
//! Delegates CSV format concerns to the csv_format module.
//!
//! # Design
//!
//! The roster is read once at start-up, before any transaction is submitted,
//! so a blocking `csv::Reader` is all it needs. Each row is deserialized into
//! an `AccountCsvRecord` and converted with `convert_account_record`.
//!
//! # Error Handling
//!
//! - Fatal errors (file not found) are returned from `new()`
//! - Individual row errors are yielded as Err variants in the iterator
//! - Line numbers are included in error messages for debugging
//!
//! ```no_run
//! use fund_ledger::io::sync_reader::RosterReader;
//! use std::path::Path;
//!
//! let reader = RosterReader::new(Path::new("accounts.csv")).unwrap();
//! let accounts: Vec<_> = reader.filter_map(Result::ok).collect();
//! println!("Loaded {} accounts", accounts.len());
//! ```

use crate::io::csv_format::{convert_account_record, AccountCsvRecord};
use crate::types::FundAccount;
use csv::{ReaderBuilder, Trim};
use std::fs::File;
use std::path::Path;

/// Synchronous roster reader
#[derive(Debug)]
pub struct RosterReader {
    reader: csv::Reader<File>,
    line_num: usize,
}

impl RosterReader {
    /// Open a roster CSV file
    ///
    /// The CSV reader is configured to:
    /// - Trim whitespace from all fields
    /// - Allow flexible field counts (for the optional status column)
    ///
    /// # Returns
    ///
    /// * `Ok(RosterReader)` if file opened successfully
    /// * `Err(String)` if file could not be opened
    pub fn new(path: &Path) -> Result<Self, String> {
        let file = File::open(path)
            .map_err(|e| format!("Failed to open file '{}': {}", path.display(), e))?;

        let reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(file);

        Ok(Self {
            reader,
            line_num: 0,
        })
    }
}

impl Iterator for RosterReader {
    type Item = Result<FundAccount, String>;

    /// Next account in the roster
    ///
    /// # Returns
    ///
    /// * `Some(Ok(FundAccount))` - Successfully parsed account
    /// * `Some(Err(String))` - Parse or conversion error with line number
    /// * `None` - End of file reached
    fn next(&mut self) -> Option<Self::Item> {
        let mut deserializer = self.reader.deserialize::<AccountCsvRecord>();
        let row = deserializer.next()?;
        self.line_num += 1;

        // Line 1 is the header
        let line = self.line_num + 1;
        Some(match row {
            Ok(record) => convert_account_record(record).map_err(|e| format!("Line {}: {}", line, e)),
            Err(e) => Err(format!("Line {}: CSV parse error: {}", line, e)),
        })
    }
}
