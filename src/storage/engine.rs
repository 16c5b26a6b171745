//! Buffered table writes and the store plugin
//!
//! Rows are buffered per table and written when:
//! - a table's buffer reaches the flush threshold
//! - the periodic timer fires
//! - a run ends
//!
//! Writes are blocking SQLite calls; they run on the blocking thread pool
//! behind a write pool (one writer by default). Rows of a failed write stay
//! buffered for the next flush.

use crate::config::{Config, StoreConfig};
use crate::crawler::{ConcurrencyPool, MatchOption};
use crate::plugin::{EndEvent, PipeEvent, Plugin, SpiderEvent};
use crate::storage::project::project;
use crate::storage::schema::{infer_schema, TableSchema};
use crate::storage::sqlite::SqliteStore;
use crate::storage::traits::{Row, Store, StoreError, StoreResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

type SharedStore = Arc<std::sync::Mutex<Box<dyn Store>>>;

/// Opens the store of a page by name
pub type StoreOpener = Arc<dyn Fn(&str) -> StoreResult<Box<dyn Store>> + Send + Sync>;

struct TableState {
    schema: TableSchema,
    store: SharedStore,
    buffer: Vec<Row>,
}

#[derive(Default)]
struct EngineState {
    /// Open stores by page
    stores: HashMap<String, SharedStore>,
    /// Tables by `page/match`
    tables: HashMap<String, TableState>,
}

/// Persists projected rows into per-page stores
pub struct StoreEngine {
    options: StoreConfig,
    opener: StoreOpener,
    writers: ConcurrencyPool,
    state: Mutex<EngineState>,
}

impl StoreEngine {
    pub fn new(options: StoreConfig, opener: StoreOpener) -> Self {
        Self {
            writers: ConcurrencyPool::new(options.pool_max as usize),
            options,
            opener,
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Engine writing `<dir>/<page>.db` SQLite files
    pub fn sqlite(dir: impl Into<PathBuf>, options: StoreConfig) -> Self {
        let dir = dir.into();
        let opener: StoreOpener = Arc::new(move |page: &str| {
            let store = SqliteStore::new(&dir.join(format!("{}.db", page)))?;
            Ok(Box::new(store) as Box<dyn Store>)
        });
        Self::new(options, opener)
    }

    pub fn options(&self) -> &StoreConfig {
        &self.options
    }

    /// Creates the table of `option` unless it exists or its merger is disabled
    pub async fn ensure_table(&self, option: &MatchOption) -> StoreResult<()> {
        if !option.merger.is_enabled() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        self.ensure_table_locked(&mut state, option).await
    }

    async fn ensure_table_locked(
        &self,
        state: &mut EngineState,
        option: &MatchOption,
    ) -> StoreResult<()> {
        let key = option.label();
        if state.tables.contains_key(&key) {
            return Ok(());
        }

        let schema = infer_schema(option)?;
        let store = match state.stores.get(&option.page) {
            Some(store) => Arc::clone(store),
            None => {
                let opener = Arc::clone(&self.opener);
                let page = option.page.clone();
                let store = blocking(move || opener(&page)).await?;
                let store: SharedStore = Arc::new(std::sync::Mutex::new(store));
                state.stores.insert(option.page.clone(), Arc::clone(&store));
                store
            }
        };

        let table = schema.table.clone();
        let columns = schema.columns.clone();
        let writer = Arc::clone(&store);
        blocking(move || lock(&writer)?.create_table(&table, &columns)).await?;

        tracing::info!("store table {} created for {}", schema.table, key);
        state.tables.insert(
            key,
            TableState {
                schema,
                store,
                buffer: Vec::new(),
            },
        );
        Ok(())
    }

    /// Buffers the rows projected from `record`; flushes the table once its
    /// buffer reaches the threshold
    pub async fn append(&self, option: &MatchOption, url: &str, record: &Value) -> StoreResult<usize> {
        if !option.merger.is_enabled() {
            return Ok(0);
        }
        let mut state = self.state.lock().await;
        self.ensure_table_locked(&mut state, option).await?;

        let key = option.label();
        let Some(table) = state.tables.get_mut(&key) else {
            return Err(StoreError::UnknownTable(key));
        };
        let rows = project(&table.schema, &option.merger, url, record);
        let added = rows.len();
        table.buffer.extend(rows);

        if table.buffer.len() >= self.options.flush_threshold {
            self.flush_table(table).await?;
        }
        Ok(added)
    }

    /// Writes every buffered row
    ///
    /// # Returns
    ///
    /// False if any table failed to write; its rows stay buffered for the
    /// next attempt
    pub async fn flush(&self) -> bool {
        let mut state = self.state.lock().await;
        let mut ok = true;
        for table in state.tables.values_mut() {
            if let Err(e) = self.flush_table(table).await {
                tracing::warn!(
                    "flush of {} failed, {} rows kept: {}",
                    table.schema.table,
                    table.buffer.len(),
                    e
                );
                ok = false;
            }
        }
        ok
    }

    async fn flush_table(&self, table: &mut TableState) -> StoreResult<usize> {
        if table.buffer.is_empty() {
            return Ok(0);
        }
        let _slot = self
            .writers
            .acquire()
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?;

        let rows = std::mem::take(&mut table.buffer);
        let store = Arc::clone(&table.store);
        let name = table.schema.table.clone();
        let chunk = self.options.batch_insert_max;
        let (mut rows, written, error) = blocking(move || {
            let (written, error) = write_rows(&store, &name, &rows, chunk);
            Ok((rows, written, error))
        })
        .await?;

        if let Some(e) = error {
            // Keep unwritten rows ahead of anything buffered since
            let mut pending = rows.split_off(written);
            pending.append(&mut table.buffer);
            table.buffer = pending;
            return Err(e);
        }
        tracing::debug!("flushed {} rows into {}", written, table.schema.table);
        Ok(written)
    }

    /// Keeps one row per distinct value of each unique column
    ///
    /// # Returns
    ///
    /// The number of rows deleted
    pub async fn remove_duplicates(&self) -> StoreResult<usize> {
        let state = self.state.lock().await;
        let mut deleted = 0;
        for table in state.tables.values() {
            for column in &table.schema.uniques {
                let store = Arc::clone(&table.store);
                let name = table.schema.table.clone();
                let column = column.clone();
                deleted +=
                    blocking(move || lock(&store)?.remove_duplicates(&name, &column)).await?;
            }
        }
        if deleted > 0 {
            tracing::info!("removed {} duplicate rows", deleted);
        }
        Ok(deleted)
    }

    /// Buffered rows of the `page/match` table
    pub async fn buffered(&self, label: &str) -> usize {
        let state = self.state.lock().await;
        state.tables.get(label).map_or(0, |t| t.buffer.len())
    }

    /// Flushes, deduplicates and closes every store
    ///
    /// # Returns
    ///
    /// Whether the final flush wrote every buffered row
    pub async fn close(&self) -> StoreResult<bool> {
        let flushed = self.flush().await;
        self.remove_duplicates().await?;
        let mut state = self.state.lock().await;
        let dropped: usize = state.tables.values().map(|t| t.buffer.len()).sum();
        if dropped > 0 {
            tracing::warn!("store closed with {} unwritten rows", dropped);
        }
        state.tables.clear();
        state.stores.clear();
        tracing::debug!("store closed");
        Ok(flushed)
    }
}

fn lock(store: &SharedStore) -> StoreResult<std::sync::MutexGuard<'_, Box<dyn Store>>> {
    store
        .lock()
        .map_err(|_| StoreError::Task("store lock poisoned".to_string()))
}

/// Writes rows chunk by chunk, stopping at the first failure
fn write_rows(
    store: &SharedStore,
    table: &str,
    rows: &[Row],
    chunk: usize,
) -> (usize, Option<StoreError>) {
    let mut store = match lock(store) {
        Ok(store) => store,
        Err(e) => return (0, Some(e)),
    };
    let mut written = 0;
    for batch in rows.chunks(chunk.max(1)) {
        match store.batch_insert(table, batch, batch.len()) {
            Ok(n) => written += n,
            Err(e) => return (written, Some(e)),
        }
    }
    (written, None)
}

async fn blocking<T, F>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

/// Plugin persisting every piped page through a [`StoreEngine`]
pub struct StorePlugin {
    engine: Arc<StoreEngine>,
    timer: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl StorePlugin {
    pub fn new(engine: Arc<StoreEngine>) -> Self {
        Self {
            engine,
            timer: std::sync::Mutex::new(None),
        }
    }

    /// SQLite stores under `<data-dir>/store`
    pub fn from_config(config: &Config) -> Self {
        Self::new(Arc::new(StoreEngine::sqlite(
            config.crawler.data_dir.join("store"),
            config.store.clone(),
        )))
    }

    pub fn engine(&self) -> &Arc<StoreEngine> {
        &self.engine
    }

    fn stop_timer(&self) {
        if let Ok(mut timer) = self.timer.lock() {
            if let Some(handle) = timer.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for StorePlugin {
    fn drop(&mut self) {
        self.stop_timer();
    }
}

#[async_trait]
impl Plugin for StorePlugin {
    fn name(&self) -> &str {
        "store"
    }

    async fn on_init(&self, _config: &Config) -> anyhow::Result<()> {
        let engine = Arc::clone(&self.engine);
        let period = engine.options().flush_interval().max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                engine.flush().await;
            }
        });

        self.stop_timer();
        if let Ok(mut timer) = self.timer.lock() {
            *timer = Some(handle);
        }
        Ok(())
    }

    async fn on_start_spider(&self, event: &SpiderEvent) -> anyhow::Result<()> {
        self.engine.ensure_table(&event.match_option).await?;
        Ok(())
    }

    async fn on_pipe_spider(&self, event: &PipeEvent) -> anyhow::Result<()> {
        self.engine
            .append(event.match_option(), &event.url, &event.page.record)
            .await?;
        Ok(())
    }

    async fn on_end_spider(&self, event: &EndEvent) -> anyhow::Result<()> {
        if !self.engine.flush().await {
            anyhow::bail!("flush at the end of run {} failed", event.run_id);
        }
        if event.all {
            self.engine.remove_duplicates().await?;
        }
        Ok(())
    }

    async fn on_destroy(&self) -> anyhow::Result<()> {
        self.stop_timer();
        if !self.engine.close().await? {
            anyhow::bail!("final flush failed");
        }
        Ok(())
    }
}
