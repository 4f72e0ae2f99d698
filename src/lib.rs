//! Read-only, randomly addressable row cursor over a SQL table.
//!
//! A [`RowSet`] exposes the rows of a table command by position while only
//! ever materializing one batch of `fetch_size` rows. Batches are located by
//! seeking on the table's integer key; the first key of every batch visited is
//! remembered so later jumps need no scan.
//!
//! ```no_run
//! use std::sync::Arc;
//! use rowset::{CancelToken, RowSet, SqliteProvider};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = Arc::new(SqliteProvider::open("towns.db")?);
//! let rows = RowSet::new(provider);
//! rows.initialize("towns", None, &CancelToken::new())?;
//! rows.absolute(1200)?;
//! println!("{}", rows.get_cell_by_name("name")?);
//! # Ok(())
//! # }
//! ```

pub mod batch_index;
pub mod cancel;
pub mod catalog;
pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod holder;
pub mod query;
pub mod row_set;
pub mod sqlite;
pub mod value;

pub use batch_index::BatchIndex;
pub use cancel::{CancelGuard, CancelToken};
pub use catalog::ColumnCatalog;
pub use command::{TableCommand, TableLocation};
pub use config::RowSetConfig;
pub use connection::{Connection, ConnectionProvider, DbError, ResultCursor, StatementId};
pub use error::{Result, RowSetError};
pub use holder::{HolderStatus, Lease, ResultSetHolder};
pub use query::{BatchQuery, BatchQueryBuilder, Projection};
pub use row_set::{FetchDirection, ListenerId, RowMutation, RowSet, RowSetLock};
pub use sqlite::{LoggedQuery, SqliteConnection, SqliteProvider};
pub use value::Value;
