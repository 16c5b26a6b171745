//! Storage traits and error types
//!
//! This module defines the trait interface for table backends and the
//! associated error types.

use crate::storage::schema::ColumnSpec;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid merger path '{path}': {reason}")]
    InvalidMergerPath { path: String, reason: String },

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store task failed: {0}")]
    Task(String),
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

/// One table row keyed by column name
pub type Row = Map<String, Value>;

/// Trait for table backends
///
/// A store holds the tables of one page. Calls are serialized by the engine,
/// so implementations need not be `Sync`.
pub trait Store: Send {
    /// Creates `table` with `columns` if it does not exist yet
    fn create_table(&mut self, table: &str, columns: &[ColumnSpec]) -> StoreResult<()>;

    fn insert(&mut self, table: &str, row: &Row) -> StoreResult<()>;

    /// Inserts `rows` in transactions of at most `chunk` rows
    ///
    /// # Returns
    ///
    /// The number of rows written
    fn batch_insert(&mut self, table: &str, rows: &[Row], chunk: usize) -> StoreResult<usize>;

    /// Keeps only the most recently inserted row per distinct `column` value
    ///
    /// # Returns
    ///
    /// The number of rows deleted
    fn remove_duplicates(&mut self, table: &str, column: &str) -> StoreResult<usize>;

    /// Runs a raw statement, returning the number of changed rows
    fn execute_raw(&mut self, sql: &str) -> StoreResult<usize>;

    fn count(&self, table: &str) -> StoreResult<u64>;

    /// Every row in insertion order
    fn select_all(&self, table: &str) -> StoreResult<Vec<Row>>;
}
