//! Durable priority queue backed by SQLite.
//!
//! One [`PriorityQueue`] owns one database file. Every mutating call commits
//! before it returns, so after an unclean exit the file holds exactly the
//! operations that completed.

mod error;
pub use error::{StorageError, StorageResult};

mod queue;
pub use queue::{Entry, PriorityQueue};
