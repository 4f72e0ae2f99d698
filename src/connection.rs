//! Collaborator interfaces consumed by the row set.
//!
//! A [`ConnectionProvider`] hands out [`Connection`]s; a connection prepares
//! statements and executes them into a [`ResultCursor`]. Batches are small, so
//! a cursor is fully materialized and scrollable in memory.

use std::sync::Arc;

use thiserror::Error;

use crate::command::TableLocation;
use crate::value::Value;

/// Errors raised by the driver layer.
#[derive(Error, Debug)]
pub enum DbError {
    /// The connection was closed underneath the caller.
    #[error("connection is closed")]
    Closed,

    /// The statement handle is not (or no longer) prepared on this connection.
    #[error("unknown prepared statement {0:?}")]
    UnknownStatement(StatementId),

    /// The running query was aborted through an [`Interrupt`].
    #[error("query interrupted")]
    Interrupted,

    #[error("{0}")]
    Driver(String),
}

/// Handle of a statement prepared on one specific connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementId(pub u64);

/// Aborts whatever query is currently running on a connection.
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

/// A live database session.
pub trait Connection: Send {
    /// Identity of the session; two handles with the same id share statements.
    fn id(&self) -> u64;

    fn is_closed(&self) -> bool;

    fn prepare(&mut self, sql: &str) -> Result<StatementId, DbError>;

    /// Executes a prepared statement with 1-based positional `params`.
    fn query(&mut self, stmt: StatementId, params: &[Value]) -> Result<ResultCursor, DbError>;

    fn close_statement(&mut self, stmt: StatementId);

    /// Name of the column to use as a seek key for `table`: a unique integer
    /// primary key, or a backend row identifier. `None` when neither exists.
    fn primary_key(&mut self, table: &TableLocation) -> Result<Option<String>, DbError>;

    fn interrupter(&self) -> Option<Arc<dyn Interrupt>>;
}

/// Source of connections, typically a pool.
pub trait ConnectionProvider: Send + Sync {
    fn acquire_connection(&self) -> Result<Box<dyn Connection>, DbError>;

    fn release_connection(&self, conn: Box<dyn Connection>) {
        drop(conn);
    }
}

/// Scrollable, read-only result of one query.
///
/// Positions are 1-based: 0 is before the first row and `len() + 1` after the
/// last one.
#[derive(Debug, Clone, Default)]
pub struct ResultCursor {
    columns: Vec<String>,
    column_types: Vec<Option<String>>,
    rows: Vec<Vec<Value>>,
    position: usize,
}

impl ResultCursor {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            column_types: vec![None; columns.len()],
            columns,
            rows,
            position: 0,
        }
    }

    /// Attaches the declared SQL type of each column.
    pub fn with_column_types(mut self, types: Vec<Option<String>>) -> Self {
        self.column_types = types;
        self.column_types.resize(self.columns.len(), None);
        self
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Declared SQL types, aligned with [`column_names`](Self::column_names).
    pub fn column_types(&self) -> &[Option<String>] {
        &self.column_types
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn before_first(&mut self) {
        self.position = 0;
    }

    /// Moves to `row`; returns whether it addresses an existing row.
    pub fn absolute(&mut self, row: usize) -> bool {
        self.position = row.min(self.rows.len() + 1);
        self.position >= 1 && self.position <= self.rows.len()
    }

    pub fn next(&mut self) -> bool {
        self.absolute(self.position + 1)
    }

    /// Reads the 1-based `column` of the current row.
    pub fn get(&self, column: usize) -> Option<&Value> {
        let row = self.rows.get(self.position.checked_sub(1)?)?;
        row.get(column.checked_sub(1)?)
    }

    /// Reads a column of the current row by name, ignoring ASCII case.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let index = self
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))?;
        self.get(index + 1)
    }
}
