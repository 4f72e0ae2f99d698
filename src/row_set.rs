//! Random-access, read-only row set over a table command.
//!
//! Rows are addressed by 1-based position. Only the batch covering the
//! current row is materialized; batches are located through the first key of
//! each batch, probed lazily and cached in a [`BatchIndex`].

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use tracing::{debug, warn};

use crate::batch_index::BatchIndex;
use crate::cancel::CancelToken;
use crate::catalog::ColumnCatalog;
use crate::command::{TableCommand, TableLocation};
use crate::config::RowSetConfig;
use crate::connection::{Connection, ConnectionProvider, DbError, ResultCursor};
use crate::error::{Result, RowSetError};
use crate::holder::{HolderStatus, ResultSetHolder};
use crate::query::{BatchQuery, BatchQueryBuilder, Projection};
use crate::value::Value;

pub type ListenerId = u64;

type CursorListener = Arc<dyn Fn(u64, u64) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDirection {
    Forward,
    Reverse,
    Unknown,
}

struct CursorState {
    builder: Option<BatchQueryBuilder>,
    parameters: BTreeMap<usize, Value>,
    row: u64,
    cached_row_count: Option<u64>,
    catalog: Option<ColumnCatalog>,
    column_offset: usize,
    batch_index: BatchIndex,
    fetch_size: usize,
    max_probes: usize,
    current_batch: Option<usize>,
    was_null: bool,
    fetch_direction: FetchDirection,
    close_delay: Duration,
}

/// Exclusive, reentrant hold on a row set's state.
pub struct RowSetLock<'a> {
    _guard: ReentrantMutexGuard<'a, RefCell<CursorState>>,
}

pub struct RowSet {
    provider: Arc<dyn ConnectionProvider>,
    holder: ResultSetHolder,
    state: ReentrantMutex<RefCell<CursorState>>,
    listeners: Mutex<Vec<(ListenerId, CursorListener)>>,
    next_listener: AtomicU64,
}

fn with_connection<T>(
    provider: &dyn ConnectionProvider,
    mut f: impl FnMut(&mut dyn Connection) -> Result<T>,
) -> Result<T> {
    let mut conn = provider.acquire_connection()?;
    let result = match f(conn.as_mut()) {
        Err(RowSetError::Database(DbError::Closed)) => {
            warn!("connection closed under query, retrying on a fresh one");
            provider.release_connection(conn);
            conn = provider.acquire_connection()?;
            f(conn.as_mut())
        }
        other => other,
    };
    provider.release_connection(conn);
    result
}

/// Runs a one-off statement that `cancel` may interrupt.
fn run_cancellable(
    conn: &mut dyn Connection,
    cancel: &CancelToken,
    sql: &str,
    params: &[Value],
) -> Result<ResultCursor> {
    let _listener = conn
        .interrupter()
        .map(|interrupter| cancel.on_cancel(move || interrupter.interrupt()));
    if cancel.is_cancelled() {
        return Err(RowSetError::Cancelled);
    }
    let stmt = conn.prepare(sql)?;
    let result = conn.query(stmt, params);
    conn.close_statement(stmt);
    let cursor = result?;
    if cancel.is_cancelled() {
        return Err(RowSetError::Cancelled);
    }
    Ok(cursor)
}

fn key_value(cursor: &ResultCursor, column: usize) -> Result<Option<i64>> {
    match cursor.get(column) {
        None => Ok(None),
        Some(value) => value.as_i64().map(Some).ok_or_else(|| {
            RowSetError::InvariantViolation(format!("key value {} is not an integer", value))
        }),
    }
}

impl CursorState {
    fn new(config: &RowSetConfig) -> Self {
        Self {
            builder: None,
            parameters: BTreeMap::new(),
            row: 0,
            cached_row_count: None,
            catalog: None,
            column_offset: 0,
            batch_index: BatchIndex::new(),
            fetch_size: config.fetch_size,
            max_probes: config.max_intermediate_probes,
            current_batch: None,
            was_null: true,
            fetch_direction: FetchDirection::Unknown,
            close_delay: config.close_delay(),
        }
    }

    fn builder(&self) -> Result<&BatchQueryBuilder> {
        self.builder.as_ref().ok_or_else(|| {
            RowSetError::Setup("no command, call set_command or initialize first".to_string())
        })
    }

    fn builder_mut(&mut self) -> Result<&mut BatchQueryBuilder> {
        self.builder.as_mut().ok_or_else(|| {
            RowSetError::Setup("no command, call set_command or initialize first".to_string())
        })
    }

    fn key(&self) -> Option<String> {
        self.builder
            .as_ref()
            .and_then(|b| b.key())
            .map(str::to_string)
    }

    fn params(&self) -> Vec<Value> {
        self.parameters.values().cloned().collect()
    }

    fn bind(&mut self, builder: BatchQueryBuilder) {
        self.builder = Some(builder);
        self.catalog = None;
        self.column_offset = 0;
        self.cached_row_count = None;
        self.batch_index.clear();
        self.current_batch = None;
    }

    fn target_batch(&self) -> usize {
        (self.row.saturating_sub(1) / self.fetch_size as u64) as usize
    }

    fn batch_row(&self) -> usize {
        (self.row.saturating_sub(1) % self.fetch_size as u64) as usize + 1
    }

    fn count_on(&mut self, conn: &mut dyn Connection, cancel: &CancelToken) -> Result<u64> {
        if let Some(count) = self.cached_row_count {
            return Ok(count);
        }
        let sql = self.builder()?.count_sql();
        let mut cursor = run_cancellable(conn, cancel, &sql, &self.params())?;
        let count = if cursor.next() {
            cursor.get(1).and_then(Value::as_i64).unwrap_or(0)
        } else {
            0
        };
        let count = u64::try_from(count).unwrap_or(0);
        debug!(count, "row count cached");
        self.cached_row_count = Some(count);
        Ok(count)
    }

    fn row_count(&mut self, provider: &dyn ConnectionProvider, cancel: &CancelToken) -> Result<u64> {
        match self.cached_row_count {
            Some(count) => Ok(count),
            None => with_connection(provider, |conn| self.count_on(conn, cancel)),
        }
    }

    fn batch_count_on(&mut self, conn: &mut dyn Connection) -> Result<usize> {
        let count = self.count_on(conn, &CancelToken::new())?;
        Ok(count.div_ceil(self.fetch_size as u64) as usize)
    }

    fn catalog_on(&mut self, conn: &mut dyn Connection, cancel: &CancelToken) -> Result<&ColumnCatalog> {
        if self.catalog.is_none() {
            let sql = self.builder()?.metadata_sql();
            let cursor = run_cancellable(conn, cancel, &sql, &self.params())?;
            let catalog = ColumnCatalog::with_types(
                cursor.column_names().to_vec(),
                cursor.column_types().to_vec(),
            );
            self.column_offset = catalog.key_offset(self.builder()?.key());
            debug!(
                columns = catalog.len(),
                offset = self.column_offset,
                "column catalog cached"
            );
            self.catalog = Some(catalog);
        }
        self.catalog
            .as_ref()
            .ok_or_else(|| RowSetError::Setup("column catalog unavailable".to_string()))
    }

    fn catalog(&mut self, provider: &dyn ConnectionProvider) -> Result<&ColumnCatalog> {
        if self.catalog.is_none() {
            let cancel = CancelToken::new();
            with_connection(provider, |conn| self.catalog_on(conn, &cancel).map(|_| ()))?;
        }
        self.catalog
            .as_ref()
            .ok_or_else(|| RowSetError::Setup("column catalog unavailable".to_string()))
    }

    /// Column of batch rows holding the key.
    fn key_column(&self) -> Result<usize> {
        match (self.key(), &self.catalog) {
            (Some(_), _) if self.column_offset == 1 => Ok(1),
            (Some(key), Some(catalog)) => catalog.find(&key),
            _ => Err(RowSetError::Setup("row set has no key column".to_string())),
        }
    }

    fn check_column(&mut self, provider: &dyn ConnectionProvider, index: usize) -> Result<()> {
        let count = self.catalog(provider)?.len();
        if index < 1 || index > count {
            return Err(RowSetError::ColumnOutOfBounds { index, count });
        }
        Ok(())
    }

    fn check_current_row(
        &mut self,
        provider: &dyn ConnectionProvider,
        holder: &ResultSetHolder,
    ) -> Result<()> {
        let row_count = self.row_count(provider, &CancelToken::new())?;
        if self.row < 1 || self.row > row_count {
            return Err(RowSetError::InvalidRow {
                row: self.row,
                row_count,
            });
        }
        self.sync_row_batch(holder);
        Ok(())
    }

    fn sync_row_batch(&mut self, holder: &ResultSetHolder) {
        if self.current_batch != Some(self.target_batch()) {
            holder.refresh();
        }
    }

    /// Returns `(valid, old, new)` positions.
    fn move_to(
        &mut self,
        provider: &dyn ConnectionProvider,
        holder: &ResultSetHolder,
        requested: i64,
    ) -> Result<(bool, u64, u64)> {
        let row_count = self.row_count(provider, &CancelToken::new())?;
        let new = if requested <= 0 {
            0
        } else {
            (requested as u64).min(row_count.saturating_add(1))
        };
        let old = self.row;
        self.row = new;
        let valid = new >= 1 && new <= row_count;
        if valid {
            self.sync_row_batch(holder);
        } else {
            self.current_batch = None;
        }
        Ok((valid, old, new))
    }

    /// Loads the batch covering the current row on `conn`.
    fn load_batch(&mut self, conn: &mut dyn Connection) -> Result<ResultCursor> {
        let target = self.target_batch();
        let fetch_size = self.fetch_size;
        let params = self.params();
        self.catalog_on(conn, &CancelToken::new())?;

        if self.key().is_none() {
            let query = BatchQuery::positional(target * fetch_size, fetch_size);
            let cursor = self.builder_mut()?.execute(conn, &query, &params, None)?;
            debug!(batch = target, rows = cursor.len(), "positional batch loaded");
            self.current_batch = Some(target);
            return Ok(cursor);
        }

        if target >= self.batch_index.len()
            || (target != 0 && !self.batch_index.is_known(target))
        {
            // Narrow the gap to the target like a binary search, within a probe budget.
            let mut top = self.batch_count_on(conn)?;
            let mut low = 0;
            let mut probes = 0;
            while low + (top - low) / 2 != target && probes < self.max_probes {
                let middle = low + (top - low) / 2;
                if target < middle {
                    top = middle;
                } else {
                    if !self.batch_index.is_known(middle) {
                        self.fetch_batch_key(conn, middle)?;
                    }
                    probes += 1;
                    low = middle;
                }
            }
            self.fetch_batch_key(conn, target)?;
        }

        let anchor = self.batch_index.get(target);
        let projection = if self.column_offset == 1 {
            Projection::KeyAndFields
        } else {
            Projection::Fields
        };
        let query = BatchQuery::rows(projection, anchor.is_some(), fetch_size);
        let mut cursor = self.builder_mut()?.execute(conn, &query, &params, anchor)?;

        let key_column = self.key_column()?;
        if anchor.is_none() && cursor.absolute(1) {
            if let Some(first) = key_value(&cursor, key_column)? {
                self.batch_index.set(target, first);
            }
        }
        if cursor.absolute(fetch_size + 1) {
            if let Some(next) = key_value(&cursor, key_column)? {
                self.batch_index.set(target + 1, next);
            }
        }
        cursor.before_first();
        debug!(batch = target, ?anchor, rows = cursor.len(), "batch loaded");
        self.current_batch = Some(target);
        Ok(cursor)
    }

    /// Makes sure the first key of `batch` is known, probing for it if needed.
    fn fetch_batch_key(&mut self, conn: &mut dyn Connection, batch: usize) -> Result<i64> {
        if let Some(key) = self.batch_index.get(batch) {
            return Ok(key);
        }
        let (lower, anchor) = self.batch_index.nearest_known_below(batch);
        let offset = (batch - lower) * self.fetch_size;
        let query = BatchQuery::boundary_probe(anchor.is_some(), offset);
        let params = self.params();
        debug!(batch, from = lower, offset, "probing batch boundary");
        let mut cursor = self.builder_mut()?.execute(conn, &query, &params, anchor)?;
        let key = if cursor.next() {
            key_value(&cursor, 1)?
        } else {
            None
        };
        match key {
            Some(key) => {
                self.batch_index.set(batch, key);
                Ok(key)
            }
            None => Err(RowSetError::InvariantViolation(format!(
                "no row {} rows after batch {} while probing batch {}",
                offset, lower, batch
            ))),
        }
    }

    /// Every key of `batch`, ascending.
    fn batch_keys(&mut self, conn: &mut dyn Connection, batch: usize) -> Result<Vec<i64>> {
        let anchor = self.fetch_batch_key(conn, batch)?;
        let query = BatchQuery::batch_keys(true, self.fetch_size);
        let params = self.params();
        let mut cursor = self.builder_mut()?.execute(conn, &query, &params, Some(anchor))?;
        let mut keys = Vec::with_capacity(cursor.len());
        while cursor.next() {
            if let Some(key) = key_value(&cursor, 1)? {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn positions_for_keys(
        &mut self,
        conn: &mut dyn Connection,
        keys: &BTreeSet<i64>,
    ) -> Result<BTreeSet<u64>> {
        let batch_count = self.batch_count_on(conn)?;
        let fetch_size = self.fetch_size;
        let mut positions = BTreeSet::new();
        let mut current: Option<usize> = None;
        let mut batch_keys: Vec<i64> = Vec::new();
        for &key in keys {
            let advance = match (current, batch_keys.last()) {
                (Some(_), Some(last)) => key > *last,
                _ => true,
            };
            if advance {
                let mut batch = current.map_or(0, |c| c + 1);
                if batch >= batch_count {
                    break;
                }
                // Walk batch boundaries while the next batch still starts at or before the key.
                while batch + 1 < batch_count && self.fetch_batch_key(conn, batch + 1)? <= key {
                    batch += 1;
                }
                current = Some(batch);
                batch_keys = self.batch_keys(conn, batch)?;
            }
            if let (Some(batch), Ok(index)) = (current, batch_keys.binary_search(&key)) {
                positions.insert((batch * fetch_size + index + 1) as u64);
            }
        }
        Ok(positions)
    }
}

impl RowSet {
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self::build(provider, RowSetConfig::default())
    }

    pub fn with_config(provider: Arc<dyn ConnectionProvider>, config: RowSetConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(provider, config))
    }

    fn build(provider: Arc<dyn ConnectionProvider>, config: RowSetConfig) -> Self {
        Self {
            holder: ResultSetHolder::new(Arc::clone(&provider), config.idle_timeout()),
            provider,
            state: ReentrantMutex::new(RefCell::new(CursorState::new(&config))),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut CursorState) -> Result<T>) -> Result<T> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut *state)
    }

    /// Holds the row set's lock until the returned guard is dropped. Calls
    /// made meanwhile from the same thread go through.
    pub fn read_lock(&self) -> RowSetLock<'_> {
        RowSetLock {
            _guard: self.state.lock(),
        }
    }

    /// Binds the row set to `command`, resolving the seek key from the table.
    pub fn set_command(&self, command: &str) -> Result<()> {
        let command = TableCommand::parse(command)?;
        let key = with_connection(&*self.provider, |conn| {
            Ok(conn.primary_key(&command.location)?)
        })?;
        debug!(table = %command.location, ?key, "command set");
        self.with_state(|state| {
            state.bind(BatchQueryBuilder::new(command, key));
            Ok(())
        })
    }

    /// Seeks on `key` instead of the resolved key; `None` reads by position.
    pub fn set_primary_key_name(&self, key: Option<&str>) -> Result<()> {
        let key = key.filter(|k| !k.is_empty()).map(str::to_string);
        self.with_state(|state| {
            let command = state.builder()?.command().clone();
            state.bind(BatchQueryBuilder::new(command, key));
            Ok(())
        })
    }

    pub fn command(&self) -> Option<String> {
        self.with_state(|state| Ok(state.builder.as_ref().map(|b| b.command().to_string())))
            .ok()
            .flatten()
    }

    /// Binds the row set to a whole table and executes it.
    ///
    /// With `key` unset the seek key is resolved from the table; a table
    /// with neither a key nor a row identifier is read by position.
    pub fn initialize(&self, table: &str, key: Option<&str>, cancel: &CancelToken) -> Result<()> {
        let location = TableLocation::parse(table)?;
        let key = match key.filter(|k| !k.is_empty()) {
            Some(key) => Some(key.to_string()),
            None => with_connection(&*self.provider, |conn| Ok(conn.primary_key(&location)?))?,
        };
        self.with_state(|state| {
            state.bind(BatchQueryBuilder::new(TableCommand::for_table(location), key));
            Ok(())
        })?;
        self.execute(cancel)
    }

    /// Runs the bound command: caches the row count and, the first time, the
    /// column catalog and the first batch. Re-executing drops every cached
    /// batch boundary and keeps the position within the new row count.
    pub fn execute(&self, cancel: &CancelToken) -> Result<()> {
        let guard = self.state.lock();
        let moved = {
            let mut state = guard.borrow_mut();
            state.builder()?;
            state.cached_row_count = None;
            let row_count = state.row_count(&*self.provider, cancel)?;
            if self.holder.status() == HolderStatus::NeverStarted {
                state.catalog = None;
                let st = &mut *state;
                with_connection(&*self.provider, |conn| st.catalog_on(conn, cancel).map(|_| ()))?;
                let _listener = cancel.on_cancel(self.holder.canceller());
                if cancel.is_cancelled() {
                    return Err(RowSetError::Cancelled);
                }
                self.holder.lease(|conn| st.load_batch(conn))?;
                None
            } else {
                state.batch_index.clear();
                let requested = state.row.min(row_count) as i64;
                let (_, old, new) = state.move_to(&*self.provider, &self.holder, requested)?;
                state.current_batch = None;
                self.holder.refresh();
                Some((old, new))
            }
        };
        if let Some((old, new)) = moved.filter(|(old, new)| old != new) {
            self.notify(old, new);
        }
        Ok(())
    }

    pub fn set_parameter(&self, index: usize, value: impl Into<Value>) -> Result<()> {
        if index == 0 {
            return Err(RowSetError::Setup("parameter indexes start at 1".to_string()));
        }
        let value = value.into();
        self.with_state(|state| {
            state.parameters.insert(index, value);
            Ok(())
        })
    }

    pub fn clear_parameters(&self) {
        let _ = self.with_state(|state| {
            state.parameters.clear();
            Ok(())
        });
    }

    fn move_cursor(&self, requested: impl FnOnce(&mut CursorState, &dyn ConnectionProvider) -> Result<i64>) -> Result<bool> {
        let guard = self.state.lock();
        let (valid, old, new) = {
            let mut state = guard.borrow_mut();
            let target = requested(&mut *state, &*self.provider)?;
            state.move_to(&*self.provider, &self.holder, target)?
        };
        if old != new {
            self.notify(old, new);
        }
        Ok(valid)
    }

    /// Moves to `position`, clamped to `[0, row_count + 1]`. Returns whether
    /// the new position addresses a row.
    pub fn move_to(&self, position: i64) -> Result<bool> {
        self.move_cursor(|_, _| Ok(position))
    }

    pub fn absolute(&self, position: i64) -> Result<bool> {
        self.move_to(position)
    }

    pub fn relative(&self, rows: i64) -> Result<bool> {
        self.move_cursor(|state, _| Ok((state.row as i64).saturating_add(rows)))
    }

    pub fn next(&self) -> Result<bool> {
        self.relative(1)
    }

    pub fn previous(&self) -> Result<bool> {
        self.relative(-1)
    }

    pub fn first(&self) -> Result<bool> {
        self.move_to(1)
    }

    pub fn last(&self) -> Result<bool> {
        self.move_cursor(|state, provider| {
            Ok(state.row_count(provider, &CancelToken::new())? as i64)
        })
    }

    pub fn before_first(&self) -> Result<()> {
        self.move_to(0).map(|_| ())
    }

    pub fn after_last(&self) -> Result<()> {
        self.move_cursor(|state, provider| {
            Ok(state.row_count(provider, &CancelToken::new())? as i64 + 1)
        })
        .map(|_| ())
    }

    /// Current position: 0 before the first row, `row_count + 1` after the last.
    pub fn row(&self) -> u64 {
        self.with_state(|state| Ok(state.row)).unwrap_or(0)
    }

    pub fn is_before_first(&self) -> bool {
        self.row() == 0
    }

    pub fn is_after_last(&self) -> Result<bool> {
        let row = self.row();
        Ok(row > self.row_count()?)
    }

    pub fn is_first(&self) -> bool {
        self.row() == 1
    }

    pub fn is_last(&self) -> Result<bool> {
        let row = self.row();
        Ok(row > 0 && row == self.row_count()?)
    }

    /// `(batch, row within batch)` of the current row, both from the batch
    /// geometry alone.
    pub fn batch_position(&self) -> Option<(usize, usize)> {
        self.with_state(|state| {
            Ok((state.row > 0).then(|| (state.target_batch(), state.batch_row())))
        })
        .ok()
        .flatten()
    }

    pub fn row_count(&self) -> Result<u64> {
        self.row_count_cancellable(&CancelToken::new())
    }

    /// Row count, computed once with `COUNT(*)` until invalidated.
    pub fn row_count_cancellable(&self, cancel: &CancelToken) -> Result<u64> {
        self.with_state(|state| state.row_count(&*self.provider, cancel))
    }

    /// Value of the 1-based `column` in the current row.
    pub fn get_cell(&self, column: usize) -> Result<Value> {
        self.with_state(|state| {
            state.check_column(&*self.provider, column)?;
            state.check_current_row(&*self.provider, &self.holder)?;
            let batch_row = state.batch_row();
            let offset = state.column_offset;
            let value = {
                let st = &mut *state;
                let mut lease = self.holder.lease(|conn| st.load_batch(conn))?;
                if !lease.absolute(batch_row) {
                    return Err(RowSetError::InvariantViolation(format!(
                        "batch holds {} rows, row {} requested",
                        lease.len(),
                        batch_row
                    )));
                }
                lease
                    .get(column + offset)
                    .cloned()
                    .ok_or(RowSetError::ColumnOutOfBounds {
                        index: column,
                        count: lease.column_count().saturating_sub(offset),
                    })?
            };
            state.was_null = value.is_null();
            Ok(value)
        })
    }

    pub fn get_cell_by_name(&self, label: &str) -> Result<Value> {
        let column = self.find_column(label)?;
        self.get_cell(column)
    }

    pub fn get_i64(&self, column: usize) -> Result<Option<i64>> {
        Ok(self.get_cell(column)?.as_i64())
    }

    pub fn get_f64(&self, column: usize) -> Result<Option<f64>> {
        Ok(self.get_cell(column)?.as_f64())
    }

    pub fn get_string(&self, column: usize) -> Result<Option<String>> {
        let value = self.get_cell(column)?;
        Ok((!value.is_null()).then(|| value.to_string()))
    }

    pub fn get_bytes(&self, column: usize) -> Result<Option<Vec<u8>>> {
        Ok(self.get_cell(column)?.as_bytes().map(<[u8]>::to_vec))
    }

    /// Whether the last value read was NULL.
    pub fn was_null(&self) -> bool {
        self.with_state(|state| Ok(state.was_null)).unwrap_or(true)
    }

    /// Key of the current row; its position when the row set has no key.
    pub fn primary_key_of_current_row(&self) -> Result<i64> {
        self.with_state(|state| {
            state.check_current_row(&*self.provider, &self.holder)?;
            if state.key().is_none() {
                return Ok(state.row as i64);
            }
            let batch_row = state.batch_row();
            let st = &mut *state;
            let mut lease = self.holder.lease(|conn| st.load_batch(conn))?;
            if !lease.absolute(batch_row) {
                return Err(RowSetError::InvariantViolation(format!(
                    "batch holds {} rows, row {} requested",
                    lease.len(),
                    batch_row
                )));
            }
            let key_column = state.key_column()?;
            key_value(&lease, key_column)?.ok_or_else(|| {
                RowSetError::InvariantViolation(format!("row {} has no key", batch_row))
            })
        })
    }

    /// Positions of the rows holding `keys`. Keys that are not found are
    /// left out. Without a key column, keys are taken as positions.
    pub fn row_positions_for_keys(&self, keys: &BTreeSet<i64>) -> Result<BTreeSet<u64>> {
        self.with_state(|state| {
            state.builder()?;
            if state.key().is_none() {
                return Ok(keys.iter().filter(|k| **k >= 1).map(|k| *k as u64).collect());
            }
            state.row_count(&*self.provider, &CancelToken::new())?;
            with_connection(&*self.provider, |conn| state.positions_for_keys(conn, keys))
        })
    }

    pub fn set_fetch_size(&self, fetch_size: usize) -> Result<()> {
        if fetch_size == 0 {
            return Err(RowSetError::InvalidConfig(
                "fetch_size must be at least 1".to_string(),
            ));
        }
        self.with_state(|state| {
            state.fetch_size = fetch_size;
            state.batch_index.clear();
            state.current_batch = None;
            Ok(())
        })
    }

    pub fn fetch_size(&self) -> usize {
        self.with_state(|state| Ok(state.fetch_size)).unwrap_or_default()
    }

    pub fn set_fetch_direction(&self, direction: FetchDirection) {
        let _ = self.with_state(|state| {
            state.fetch_direction = direction;
            Ok(())
        });
    }

    pub fn fetch_direction(&self) -> FetchDirection {
        self.with_state(|state| Ok(state.fetch_direction))
            .unwrap_or(FetchDirection::Unknown)
    }

    /// Forces the current batch to be read again on next access.
    pub fn refresh_row(&self) {
        let _ = self.with_state(|state| {
            state.current_batch = None;
            state.cached_row_count = None;
            self.holder.refresh();
            Ok(())
        });
    }

    /// Forgets the batch boundaries covering `positions`.
    pub fn refresh_rows(&self, positions: &BTreeSet<u64>) {
        let _ = self.with_state(|state| {
            let fetch_size = state.fetch_size as u64;
            let batches: BTreeSet<usize> = positions
                .iter()
                .filter(|p| **p > 0)
                .map(|p| ((p - 1) / fetch_size) as usize)
                .collect();
            for batch in batches {
                state.batch_index.invalidate(batch);
                if state.current_batch == Some(batch) {
                    state.current_batch = None;
                    self.holder.refresh();
                }
            }
            state.cached_row_count = None;
            debug!(rows = positions.len(), "rows refreshed");
            Ok(())
        });
    }

    pub fn column_count(&self) -> Result<usize> {
        self.with_state(|state| Ok(state.catalog(&*self.provider)?.len()))
    }

    pub fn column_name(&self, column: usize) -> Result<String> {
        self.with_state(|state| Ok(state.catalog(&*self.provider)?.name(column)?.to_string()))
    }

    /// Declared SQL type of the 1-based `column`; `None` for expressions
    /// and untyped columns.
    pub fn column_type_name(&self, column: usize) -> Result<Option<String>> {
        self.with_state(|state| {
            Ok(state
                .catalog(&*self.provider)?
                .type_name(column)?
                .map(str::to_string))
        })
    }

    pub fn column_names(&self) -> Result<Vec<String>> {
        self.with_state(|state| Ok(state.catalog(&*self.provider)?.names().to_vec()))
    }

    /// 1-based index of the column named `label`, compared case-insensitively.
    pub fn find_column(&self, label: &str) -> Result<usize> {
        self.with_state(|state| state.catalog(&*self.provider)?.find(label))
    }

    pub fn primary_key_name(&self) -> Option<String> {
        self.with_state(|state| Ok(state.key())).ok().flatten()
    }

    pub fn table(&self) -> Option<String> {
        self.with_state(|state| {
            Ok(state
                .builder
                .as_ref()
                .map(|b| b.command().location.to_string()))
        })
        .ok()
        .flatten()
    }

    pub fn set_close_delay(&self, delay: Duration) {
        let _ = self.with_state(|state| {
            state.close_delay = delay;
            Ok(())
        });
    }

    /// Releases the live cursor after the configured close delay. The row
    /// set stays usable and reopens the cursor on next access.
    pub fn close(&self) {
        let delay = self
            .with_state(|state| Ok(state.close_delay))
            .unwrap_or_default();
        self.close_after(delay);
    }

    /// Releases the live cursor once `delay` has passed without any read.
    pub fn close_after(&self, delay: Duration) {
        debug!(?delay, "closing live cursor");
        self.holder.delayed_close(delay);
    }

    pub fn holder_status(&self) -> HolderStatus {
        self.holder.status()
    }

    /// Interrupts the query the live cursor is running, if any.
    pub fn cancel_running_query(&self) {
        self.holder.cancel();
    }

    /// Calls `listener(old, new)` whenever the position changes.
    pub fn add_cursor_listener(&self, listener: impl Fn(u64, u64) + Send + Sync + 'static) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn remove_cursor_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(l, _)| *l != id);
        listeners.len() != before
    }

    fn notify(&self, old: u64, new: u64) {
        let listeners: Vec<CursorListener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(old, new);
        }
    }
}

/// Write operations of a row cursor. A [`RowSet`] is read only and rejects
/// every one of them.
pub trait RowMutation {
    fn update_value(&self, column: usize, value: Value) -> Result<()>;
    fn update_null(&self, column: usize) -> Result<()>;
    fn insert_row(&self) -> Result<()>;
    fn update_row(&self) -> Result<()>;
    fn delete_row(&self) -> Result<()>;
    fn cancel_row_updates(&self) -> Result<()>;
    fn move_to_insert_row(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;
    fn set_auto_commit(&self, auto_commit: bool) -> Result<()>;
}

impl RowMutation for RowSet {
    fn update_value(&self, _column: usize, _value: Value) -> Result<()> {
        Err(RowSetError::Unsupported("update_value"))
    }

    fn update_null(&self, _column: usize) -> Result<()> {
        Err(RowSetError::Unsupported("update_null"))
    }

    fn insert_row(&self) -> Result<()> {
        Err(RowSetError::Unsupported("insert_row"))
    }

    fn update_row(&self) -> Result<()> {
        Err(RowSetError::Unsupported("update_row"))
    }

    fn delete_row(&self) -> Result<()> {
        Err(RowSetError::Unsupported("delete_row"))
    }

    fn cancel_row_updates(&self) -> Result<()> {
        Err(RowSetError::Unsupported("cancel_row_updates"))
    }

    fn move_to_insert_row(&self) -> Result<()> {
        Err(RowSetError::Unsupported("move_to_insert_row"))
    }

    fn commit(&self) -> Result<()> {
        Err(RowSetError::Unsupported("commit"))
    }

    fn rollback(&self) -> Result<()> {
        Err(RowSetError::Unsupported("rollback"))
    }

    fn set_auto_commit(&self, _auto_commit: bool) -> Result<()> {
        Err(RowSetError::Unsupported("set_auto_commit"))
    }
}
