//! Batch query descriptors, their SQL rendering, and prepared statement reuse.

use std::collections::HashMap;

use tracing::{trace, warn};

use crate::command::TableCommand;
use crate::connection::{Connection, DbError, ResultCursor, StatementId};
use crate::error::Result;
use crate::value::Value;

/// Columns selected by a batch query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Projection {
    /// Only the seek key, used to discover batch boundaries.
    Key,
    /// The command's own fields; the key is among them.
    Fields,
    /// The key first, then the command's fields.
    KeyAndFields,
}

/// Shape of a batch query. Two equal shapes render the same SQL text for a
/// given command and key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchQuery {
    pub projection: Projection,
    /// Adds `key >= ?` bound to the batch's first key.
    pub anchored: bool,
    pub limit: usize,
    pub offset: usize,
}

impl BatchQuery {
    /// Full rows of one batch plus the first row of the next one.
    pub fn rows(projection: Projection, anchored: bool, fetch_size: usize) -> Self {
        Self {
            projection,
            anchored,
            limit: fetch_size + 1,
            offset: 0,
        }
    }

    /// The single key found `offset` rows after the anchor.
    pub fn boundary_probe(anchored: bool, offset: usize) -> Self {
        Self {
            projection: Projection::Key,
            anchored,
            limit: 1,
            offset,
        }
    }

    /// Every key of one batch.
    pub fn batch_keys(anchored: bool, fetch_size: usize) -> Self {
        Self {
            projection: Projection::Key,
            anchored,
            limit: fetch_size,
            offset: 0,
        }
    }

    /// A batch addressed by position only, for tables without a seek key.
    pub fn positional(offset: usize, fetch_size: usize) -> Self {
        Self {
            projection: Projection::Fields,
            anchored: false,
            limit: fetch_size,
            offset,
        }
    }
}

#[derive(Debug)]
struct PreparedBatch {
    shape: BatchQuery,
    stmt: StatementId,
}

/// Renders batch queries for one table command and keeps, per connection,
/// the last statement prepared on it for as long as its shape stays the same.
#[derive(Debug)]
pub struct BatchQueryBuilder {
    command: TableCommand,
    key: Option<String>,
    prepared: HashMap<u64, PreparedBatch>,
}

impl BatchQueryBuilder {
    pub fn new(command: TableCommand, key: Option<String>) -> Self {
        Self {
            command,
            key,
            prepared: HashMap::new(),
        }
    }

    pub fn command(&self) -> &TableCommand {
        &self.command
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn render(&self, query: &BatchQuery) -> String {
        let mut sql = String::from("SELECT ");
        match (query.projection, &self.key) {
            (Projection::Key, Some(key)) => sql.push_str(key),
            (Projection::KeyAndFields, Some(key)) => {
                sql.push_str(key);
                sql.push_str(", ");
                sql.push_str(&self.command.fields);
            }
            _ => sql.push_str(&self.command.fields),
        }
        let anchor = match (&self.key, query.anchored) {
            (Some(key), true) => Some(format!("{} >= ?", key)),
            _ => None,
        };
        sql.push_str(&self.command.from_clause(anchor.as_deref()));
        if let Some(key) = &self.key {
            sql.push_str(" ORDER BY ");
            sql.push_str(key);
        }
        sql.push_str(&format!(" LIMIT {}", query.limit));
        if query.offset > 0 {
            sql.push_str(&format!(" OFFSET {}", query.offset));
        }
        sql
    }

    /// `SELECT COUNT(*)` honoring the command's filter.
    pub fn count_sql(&self) -> String {
        format!("SELECT COUNT(*) CPT{}", self.command.from_clause(None))
    }

    /// The command itself limited to zero rows, for metadata discovery.
    pub fn metadata_sql(&self) -> String {
        format!(
            "SELECT {}{} LIMIT 0",
            self.command.fields,
            self.command.from_clause(None)
        )
    }

    /// Returns a statement for `query` on `conn`, reusing the one cached for
    /// that connection when the shape is unchanged. A replaced statement is
    /// closed on the connection that prepared it.
    pub fn statement(&mut self, conn: &mut dyn Connection, query: &BatchQuery) -> Result<StatementId> {
        if conn.is_closed() {
            self.prepared.remove(&conn.id());
        }
        if let Some(prepared) = self.prepared.get(&conn.id()) {
            if prepared.shape == *query {
                trace!(?query, conn = conn.id(), "reusing prepared batch statement");
                return Ok(prepared.stmt);
            }
        }
        if let Some(old) = self.prepared.remove(&conn.id()) {
            conn.close_statement(old.stmt);
        }
        let stmt = conn.prepare(&self.render(query))?;
        self.prepared.insert(
            conn.id(),
            PreparedBatch {
                shape: *query,
                stmt,
            },
        );
        Ok(stmt)
    }

    /// Executes `query`, binding the command parameters then the anchor key.
    pub fn execute(
        &mut self,
        conn: &mut dyn Connection,
        query: &BatchQuery,
        params: &[Value],
        anchor: Option<i64>,
    ) -> Result<ResultCursor> {
        let mut bound = params.to_vec();
        if query.anchored {
            bound.push(anchor.map_or(Value::Null, Value::Integer));
        }
        let stmt = self.statement(conn, query)?;
        match conn.query(stmt, &bound) {
            Err(DbError::UnknownStatement(_)) => {
                warn!(?query, "prepared batch statement vanished, preparing again");
                self.prepared.remove(&conn.id());
                let stmt = self.statement(conn, query)?;
                Ok(conn.query(stmt, &bound)?)
            }
            other => Ok(other?),
        }
    }
}
