//! Asynchronous transaction CSV reader with batch interface
//!
//! Provides a streaming interface over transaction rows from a CSV file.
//! Supports batch reading so the pipeline can submit one batch while the
//! file stays open.
//!
//! # Design
//!
//! The TransactionReader uses:
//! - csv-async for streaming CSV parsing
//! - tokio for async runtime and concurrency primitives
//! - Batch reading for efficient processing
//!
//! # Architecture
//!
//! ```text
//! CSV Reader → TransactionReader → Batches of TransactionDrafts
//!                  ↓
//!           csv_format module
//!           (TransactionCsvRecord, convert_transaction_record)
//! ```

use crate::io::csv_format::{convert_transaction_record, TransactionCsvRecord};
use crate::types::TransactionDraft;
use csv_async::AsyncReaderBuilder;
use futures::io::AsyncRead;
use futures::stream::StreamExt;
use tracing::warn;

/// Asynchronous transaction reader
///
/// Maintains streaming behavior with constant memory usage.
pub struct TransactionReader<R: AsyncRead + Unpin> {
    csv_reader: csv_async::AsyncDeserializer<R>,
    line_num: usize,
}

impl<R: AsyncRead + Unpin + Send + 'static> TransactionReader<R> {
    /// Create a new TransactionReader from an async reader
    ///
    /// # Arguments
    ///
    /// * `reader` - Async reader providing CSV data
    pub fn new(reader: R) -> Self {
        let csv_reader = AsyncReaderBuilder::new()
            .flexible(true)
            .trim(csv_async::Trim::All)
            .create_deserializer(reader);
        Self {
            csv_reader,
            line_num: 0,
        }
    }

    /// Read a batch of transaction drafts
    ///
    /// Reads up to `batch_size` rows from the CSV file, converting them to
    /// drafts. Malformed rows are logged and skipped.
    ///
    /// # Returns
    ///
    /// A vector of successfully converted drafts, in file order.
    /// Returns an empty vector when the end of the file is reached.
    pub async fn read_batch(&mut self, batch_size: usize) -> Vec<TransactionDraft> {
        let mut batch = Vec::with_capacity(batch_size);
        let mut records = self.csv_reader.deserialize::<TransactionCsvRecord>();

        while batch.len() < batch_size {
            let row = match records.next().await {
                Some(row) => row,
                None => break,
            };
            self.line_num += 1;
            let line = self.line_num + 1;

            match row {
                Ok(csv_record) => match convert_transaction_record(csv_record) {
                    Ok(draft) => batch.push(draft),
                    Err(e) => warn!(line, error = %e, "skipping transaction row"),
                },
                Err(e) => warn!(line, error = %e, "skipping unparseable transaction row"),
            }
        }

        batch
    }
}
