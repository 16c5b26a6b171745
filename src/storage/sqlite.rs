//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Store trait.

use crate::storage::schema::{create_table_sql, quote_ident, ColumnSpec};
use crate::storage::traits::{Row, Store, StoreError, StoreResult};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{Number, Value};
use std::path::Path;

/// SQLite store backend, one database file per page
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file; parent directories are created
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StoreError)` - Failed to open database
    pub fn new(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    fn columns(&self, table: &str) -> StoreResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        if columns.is_empty() {
            return Err(StoreError::UnknownTable(table.to_string()));
        }
        Ok(columns)
    }
}

/// Converts a JSON value to an SQLite value; nested values become JSON text
fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map_or(SqlValue::Null, SqlValue::Real),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i.into()),
        ValueRef::Real(f) => Number::from_f64(f).map_or(Value::Null, Value::Number),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}

fn insert_sql(table: &str, columns: &[&String]) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        names.join(", "),
        placeholders.join(", ")
    )
}

fn insert_row(conn: &Connection, table: &str, row: &Row) -> StoreResult<()> {
    if row.is_empty() {
        conn.execute(
            &format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table)),
            [],
        )?;
        return Ok(());
    }
    let columns: Vec<&String> = row.keys().collect();
    let mut stmt = conn.prepare_cached(&insert_sql(table, &columns))?;
    stmt.execute(params_from_iter(row.values().map(to_sql)))?;
    Ok(())
}

impl Store for SqliteStore {
    fn create_table(&mut self, table: &str, columns: &[ColumnSpec]) -> StoreResult<()> {
        self.conn.execute(&create_table_sql(table, columns), [])?;
        tracing::debug!("table {} ready ({} columns)", table, columns.len());
        Ok(())
    }

    fn insert(&mut self, table: &str, row: &Row) -> StoreResult<()> {
        insert_row(&self.conn, table, row)
    }

    fn batch_insert(&mut self, table: &str, rows: &[Row], chunk: usize) -> StoreResult<usize> {
        let mut written = 0;
        for batch in rows.chunks(chunk.max(1)) {
            let tx = self.conn.transaction()?;
            for row in batch {
                insert_row(&tx, table, row)?;
            }
            tx.commit()?;
            written += batch.len();
        }
        Ok(written)
    }

    fn remove_duplicates(&mut self, table: &str, column: &str) -> StoreResult<usize> {
        let table = quote_ident(table);
        let column = quote_ident(column);
        let deleted = self.conn.execute(
            &format!(
                "DELETE FROM {table} WHERE rowid NOT IN \
                 (SELECT MAX(rowid) FROM {table} GROUP BY {column})"
            ),
            [],
        )?;
        Ok(deleted)
    }

    fn execute_raw(&mut self, sql: &str) -> StoreResult<usize> {
        Ok(self.conn.execute(sql, [])?)
    }

    fn count(&self, table: &str) -> StoreResult<u64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }

    fn select_all(&self, table: &str) -> StoreResult<Vec<Row>> {
        let columns = self.columns(table)?;
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {} ORDER BY rowid", quote_ident(table)))?;
        let rows = stmt
            .query_map([], |sql_row| {
                let mut row = Row::new();
                for (i, name) in columns.iter().enumerate() {
                    row.insert(name.clone(), from_sql(sql_row.get_ref(i)?));
                }
                Ok(row)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
