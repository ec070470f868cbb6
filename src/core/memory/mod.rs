//! In-memory store implementations
//!
//! Thread-safe, DashMap-backed implementations of the store traits. They back
//! the command-line pipeline and the test suite, and support fault injection
//! for exercising partial failures.

pub mod account_store;
pub mod transaction_store;

pub use account_store::InMemoryAccountStore;
pub use transaction_store::InMemoryTransactionStore;
