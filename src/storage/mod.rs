//! Storage module for persisting extracted records
//!
//! This module handles all database operations for the crawler, including:
//! - Table schema inference from parser trees and merger paths
//! - Projection of nested records into flat rows
//! - SQLite table creation, batched inserts and deduplication
//! - Buffered writes driven by the store plugin

mod engine;
mod project;
mod schema;
mod sqlite;
mod traits;

pub use engine::{StoreEngine, StoreOpener, StorePlugin};
pub use project::project;
pub use schema::{
    create_table_sql, foreign_key_column, infer_schema, quote_ident, resolve_merger_path,
    ColumnSpec, TableSchema, ID_COLUMN,
};
pub use sqlite::SqliteStore;
pub use traits::{Row, Store, StoreError, StoreResult};
