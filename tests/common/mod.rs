#![allow(dead_code)]

use std::sync::Arc;

use rowset::{CancelToken, LoggedQuery, RowSet, RowSetConfig, SqliteProvider};

/// `towns(id INTEGER PRIMARY KEY, name, pop)` holding ids `1..=rows`, with
/// `name = 'town_<id>'` and `pop = id * 10`.
pub fn towns(rows: i64) -> Arc<SqliteProvider> {
    let provider = SqliteProvider::open_in_memory().expect("open in-memory db");
    provider
        .execute_batch(&format!(
            "CREATE TABLE towns(id INTEGER PRIMARY KEY, name TEXT NOT NULL, pop INTEGER);
             WITH RECURSIVE seq(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM seq WHERE n < {rows})
             INSERT INTO towns SELECT n, 'town_' || n, n * 10 FROM seq WHERE n <= {rows};",
            rows = rows
        ))
        .expect("create towns");
    Arc::new(provider)
}

pub fn config(fetch_size: usize) -> RowSetConfig {
    RowSetConfig {
        fetch_size,
        idle_timeout_ms: 0,
        ..RowSetConfig::default()
    }
}

pub fn open_table(provider: &Arc<SqliteProvider>, table: &str, fetch_size: usize) -> RowSet {
    let rows = RowSet::with_config(provider.clone(), config(fetch_size)).expect("valid config");
    rows.initialize(table, None, &CancelToken::new())
        .expect("initialize row set");
    rows
}

pub fn open_towns(provider: &Arc<SqliteProvider>, fetch_size: usize) -> RowSet {
    open_table(provider, "towns", fetch_size)
}

/// Single-key boundary probes issued against `towns`.
pub fn probes(log: &[LoggedQuery]) -> Vec<&LoggedQuery> {
    log.iter()
        .filter(|q| {
            q.sql.starts_with("SELECT id FROM towns")
                && q.sql
                    .split(" LIMIT ")
                    .nth(1)
                    .and_then(|rest| rest.split(' ').next())
                    == Some("1")
        })
        .collect()
}

pub fn count_queries(log: &[LoggedQuery]) -> usize {
    log.iter()
        .filter(|q| q.sql.starts_with("SELECT COUNT(*)"))
        .count()
}
