//! SQLite connection provider built on rusqlite.
//!
//! In-memory databases use a named shared-cache URI so every pooled
//! connection sees the same data; an anchor connection keeps it alive. Every
//! executed query is recorded so callers can observe the row set's database
//! traffic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{ErrorCode, InterruptHandle, OpenFlags};
use tracing::debug;

use crate::command::TableLocation;
use crate::connection::{
    Connection, ConnectionProvider, DbError, Interrupt, ResultCursor, StatementId,
};
use crate::value::Value;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_MEMORY_DB: AtomicU64 = AtomicU64::new(1);

/// One query as it reached SQLite.
#[derive(Debug, Clone, PartialEq)]
pub struct LoggedQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Default)]
struct Traffic {
    queries: Mutex<Vec<LoggedQuery>>,
    prepares: AtomicUsize,
    live_statements: AtomicUsize,
    opened: AtomicUsize,
    // Connections from an older generation report themselves closed.
    generation: AtomicU64,
}

pub struct SqliteProvider {
    target: String,
    flags: OpenFlags,
    idle: Mutex<Vec<Box<dyn Connection>>>,
    anchor: Mutex<Option<rusqlite::Connection>>,
    traffic: Arc<Traffic>,
}

impl SqliteProvider {
    pub fn open(path: &str) -> Result<Self, DbError> {
        let provider = Self {
            target: path.to_string(),
            flags: OpenFlags::default(),
            idle: Mutex::new(Vec::new()),
            anchor: Mutex::new(None),
            traffic: Arc::new(Traffic::default()),
        };
        // Fail early on an unreadable path.
        let probe = provider.open_raw()?;
        *provider.anchor.lock() = Some(probe);
        Ok(provider)
    }

    /// A private in-memory database shared by all connections of this provider.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let n = NEXT_MEMORY_DB.fetch_add(1, Ordering::Relaxed);
        let provider = Self {
            target: format!("file:rowset_mem_{}?mode=memory&cache=shared", n),
            flags: OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            idle: Mutex::new(Vec::new()),
            anchor: Mutex::new(None),
            traffic: Arc::new(Traffic::default()),
        };
        let anchor = provider.open_raw()?;
        *provider.anchor.lock() = Some(anchor);
        Ok(provider)
    }

    fn open_raw(&self) -> Result<rusqlite::Connection, DbError> {
        rusqlite::Connection::open_with_flags(&self.target, self.flags).map_err(map_err)
    }

    /// Runs setup statements outside of the query log.
    pub fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        let anchor = self.anchor.lock();
        match anchor.as_ref() {
            Some(conn) => conn.execute_batch(sql).map_err(map_err),
            None => self.open_raw()?.execute_batch(sql).map_err(map_err),
        }
    }

    pub fn query_log(&self) -> Vec<LoggedQuery> {
        self.traffic.queries.lock().clone()
    }

    pub fn clear_query_log(&self) {
        self.traffic.queries.lock().clear();
    }

    /// Number of statements prepared through [`Connection::prepare`].
    pub fn prepare_count(&self) -> usize {
        self.traffic.prepares.load(Ordering::SeqCst)
    }

    /// Statements currently registered across every open connection.
    pub fn open_statements(&self) -> usize {
        self.traffic.live_statements.load(Ordering::SeqCst)
    }

    /// Number of connections opened so far.
    pub fn opened_connections(&self) -> usize {
        self.traffic.opened.load(Ordering::SeqCst)
    }

    pub fn idle_connections(&self) -> usize {
        self.idle.lock().len()
    }

    /// Marks every connection handed out so far as closed, as a server
    /// restart would.
    pub fn invalidate_connections(&self) {
        self.traffic.generation.fetch_add(1, Ordering::SeqCst);
        self.idle.lock().clear();
    }
}

impl ConnectionProvider for SqliteProvider {
    fn acquire_connection(&self) -> Result<Box<dyn Connection>, DbError> {
        let generation = self.traffic.generation.load(Ordering::SeqCst);
        let mut idle = self.idle.lock();
        while let Some(conn) = idle.pop() {
            if !conn.is_closed() {
                return Ok(conn);
            }
        }
        drop(idle);
        let raw = self.open_raw()?;
        self.traffic.opened.fetch_add(1, Ordering::SeqCst);
        let conn = SqliteConnection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            conn: raw,
            statements: HashMap::new(),
            next_statement: 1,
            generation,
            traffic: Arc::clone(&self.traffic),
        };
        debug!(id = conn.id, "sqlite connection opened");
        Ok(Box::new(conn))
    }

    fn release_connection(&self, conn: Box<dyn Connection>) {
        if conn.is_closed() {
            return;
        }
        debug!(id = conn.id(), "sqlite connection returned to pool");
        self.idle.lock().push(conn);
    }
}

pub struct SqliteConnection {
    id: u64,
    conn: rusqlite::Connection,
    statements: HashMap<StatementId, String>,
    next_statement: u64,
    generation: u64,
    traffic: Arc<Traffic>,
}

struct SqliteInterrupt(InterruptHandle);

impl Interrupt for SqliteInterrupt {
    fn interrupt(&self) {
        self.0.interrupt();
    }
}

fn map_err(err: rusqlite::Error) -> DbError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::OperationInterrupted => {
            DbError::Interrupted
        }
        _ => DbError::Driver(err.to_string()),
    }
}

fn to_sql(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Integer(v) => rusqlite::types::Value::Integer(*v),
        Value::Real(v) => rusqlite::types::Value::Real(*v),
        Value::Text(s) => rusqlite::types::Value::Text(s.clone()),
        Value::Blob(b) => rusqlite::types::Value::Blob(b.clone()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(s) => Value::Text(String::from_utf8_lossy(s).to_string()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

impl SqliteConnection {
    fn check_open(&self) -> Result<(), DbError> {
        if self.is_closed() {
            Err(DbError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        self.traffic
            .live_statements
            .fetch_sub(self.statements.len(), Ordering::SeqCst);
    }
}

impl Connection for SqliteConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_closed(&self) -> bool {
        self.generation != self.traffic.generation.load(Ordering::SeqCst)
    }

    fn prepare(&mut self, sql: &str) -> Result<StatementId, DbError> {
        self.check_open()?;
        self.conn.prepare_cached(sql).map_err(map_err)?;
        self.traffic.prepares.fetch_add(1, Ordering::SeqCst);
        self.traffic.live_statements.fetch_add(1, Ordering::SeqCst);
        let id = StatementId(self.next_statement);
        self.next_statement += 1;
        self.statements.insert(id, sql.to_string());
        Ok(id)
    }

    fn query(&mut self, stmt: StatementId, params: &[Value]) -> Result<ResultCursor, DbError> {
        self.check_open()?;
        let sql = self
            .statements
            .get(&stmt)
            .cloned()
            .ok_or(DbError::UnknownStatement(stmt))?;
        self.traffic.queries.lock().push(LoggedQuery {
            sql: sql.clone(),
            params: params.to_vec(),
        });

        let mut statement = self.conn.prepare_cached(&sql).map_err(map_err)?;
        let (columns, types): (Vec<String>, Vec<Option<String>>) = statement
            .columns()
            .iter()
            .map(|c| (c.name().to_string(), c.decl_type().map(str::to_string)))
            .unzip();
        let column_count = columns.len();
        let mut rows = statement
            .query(rusqlite::params_from_iter(params.iter().map(to_sql)))
            .map_err(map_err)?;
        let mut all_rows = Vec::new();
        while let Some(row) = rows.next().map_err(map_err)? {
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                values.push(from_sql(row.get_ref(i).map_err(map_err)?));
            }
            all_rows.push(values);
        }
        Ok(ResultCursor::new(columns, all_rows).with_column_types(types))
    }

    fn close_statement(&mut self, stmt: StatementId) {
        if self.statements.remove(&stmt).is_some() {
            self.traffic.live_statements.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn primary_key(&mut self, table: &TableLocation) -> Result<Option<String>, DbError> {
        self.check_open()?;
        let schema = table.schema.as_deref().unwrap_or("main");
        let mut info = self
            .conn
            .prepare("SELECT name, type FROM pragma_table_info(?1, ?2) WHERE pk > 0")
            .map_err(map_err)?;
        let pk_columns: Vec<(String, String)> = info
            .query_map([table.table.as_str(), schema], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(map_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_err)?;
        if let [(name, data_type)] = pk_columns.as_slice() {
            if data_type.to_ascii_uppercase().contains("INT") {
                return Ok(Some(name.clone()));
            }
        }

        let master = format!(
            "SELECT type, sql FROM \"{}\".sqlite_master WHERE name = ?1",
            schema.replace('"', "\"\"")
        );
        let mut lookup = self.conn.prepare(&master).map_err(map_err)?;
        let mut rows = lookup.query([table.table.as_str()]).map_err(map_err)?;
        let Some(row) = rows.next().map_err(map_err)? else {
            return Err(DbError::Driver(format!("no such table: {}", table)));
        };
        let kind: String = row.get(0).map_err(map_err)?;
        let sql: Option<String> = row.get(1).map_err(map_err)?;
        let without_rowid = sql
            .map(|s| s.to_ascii_uppercase().contains("WITHOUT ROWID"))
            .unwrap_or(false);
        if kind == "table" && !without_rowid {
            Ok(Some("_rowid_".to_string()))
        } else {
            Ok(None)
        }
    }

    fn interrupter(&self) -> Option<Arc<dyn Interrupt>> {
        Some(Arc::new(SqliteInterrupt(self.conn.get_interrupt_handle())))
    }
}
