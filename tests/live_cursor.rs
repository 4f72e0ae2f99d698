mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{config, open_towns, towns};
use rowset::{CancelToken, HolderStatus, RowSet, RowSetConfig, RowSetError, Value};

fn wait_for_status(rows: &RowSet, status: HolderStatus) -> bool {
    for _ in 0..100 {
        if rows.holder_status() == status {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
fn holder_opens_on_first_execution() {
    let provider = towns(10);
    let rows = RowSet::with_config(provider.clone(), config(30)).expect("valid config");
    assert_eq!(rows.holder_status(), HolderStatus::NeverStarted);

    rows.initialize("towns", None, &CancelToken::new())
        .expect("initialize");
    assert_eq!(rows.holder_status(), HolderStatus::Open);
}

#[test]
fn batch_statement_is_prepared_once_per_shape() {
    let provider = towns(120);
    let rows = open_towns(&provider, 30);
    rows.absolute(31).expect("move");
    rows.get_cell(1).expect("read row 31");
    let prepared = provider.prepare_count();

    for position in [61, 91, 45] {
        rows.absolute(position).expect("move");
        assert_eq!(rows.get_cell(1).expect("read"), Value::Integer(position));
    }
    assert_eq!(provider.prepare_count(), prepared);
}

#[test]
fn key_lookups_between_reads_keep_statements_bounded() {
    let provider = towns(120);
    let rows = open_towns(&provider, 30);
    let keys: BTreeSet<i64> = [5].into_iter().collect();
    let round = |position: i64| {
        rows.absolute(position).expect("move");
        assert_eq!(rows.get_cell(1).expect("read"), Value::Integer(position));
        let found = rows.row_positions_for_keys(&keys).expect("positions");
        assert_eq!(found, [5u64].into_iter().collect::<BTreeSet<_>>());
    };

    round(5);
    round(65);
    let open = provider.open_statements();
    for i in 0..50 {
        round(if i % 2 == 0 { 95 } else { 5 });
    }
    assert_eq!(provider.open_statements(), open);
}

#[test]
fn reads_within_a_batch_do_not_query() {
    let provider = towns(50);
    let rows = open_towns(&provider, 30);
    rows.first().expect("first");
    rows.get_cell(1).expect("read row 1");
    provider.clear_query_log();

    for position in [2, 17, 30, 4] {
        rows.absolute(position).expect("move");
        assert_eq!(rows.get_cell(1).expect("read"), Value::Integer(position));
    }
    assert!(provider.query_log().is_empty());
}

#[test]
fn closed_connections_are_replaced() {
    let provider = towns(100);
    let rows = open_towns(&provider, 30);
    rows.absolute(5).expect("move");
    rows.get_cell(1).expect("read row 5");
    let opened = provider.opened_connections();

    provider.invalidate_connections();
    rows.absolute(70).expect("move");
    assert_eq!(rows.get_cell(1).expect("read after reconnect"), Value::Integer(70));
    rows.refresh_row();
    assert_eq!(rows.row_count().expect("count after reconnect"), 100);
    assert!(provider.opened_connections() > opened);
}

#[test]
fn delayed_close_releases_the_cursor() {
    let provider = towns(40);
    let rows = RowSet::with_config(
        provider.clone(),
        RowSetConfig {
            close_delay_ms: 50,
            ..config(30)
        },
    )
    .expect("valid config");
    rows.initialize("towns", None, &CancelToken::new())
        .expect("initialize");
    rows.absolute(3).expect("move");
    rows.get_cell(1).expect("read row 3");

    rows.close();
    assert!(wait_for_status(&rows, HolderStatus::Closed));
    assert!(provider.idle_connections() >= 1);

    assert_eq!(rows.get_cell(2).expect("read after close"), Value::from("town_3"));
    assert_eq!(rows.holder_status(), HolderStatus::Open);
}

#[test]
fn idle_cursor_times_out() {
    let provider = towns(40);
    let rows = RowSet::with_config(
        provider.clone(),
        RowSetConfig {
            idle_timeout_ms: 40,
            ..config(30)
        },
    )
    .expect("valid config");
    rows.initialize("towns", None, &CancelToken::new())
        .expect("initialize");
    rows.absolute(35).expect("move");
    rows.get_cell(1).expect("read row 35");

    assert!(wait_for_status(&rows, HolderStatus::Closed));
    assert_eq!(rows.get_cell(1).expect("reopen"), Value::Integer(35));
}

#[test]
fn immediate_close_keeps_row_set_usable() {
    let provider = towns(40);
    let rows = open_towns(&provider, 30);
    rows.absolute(12).expect("move");
    rows.close();
    assert_eq!(rows.holder_status(), HolderStatus::Closed);
    assert_eq!(rows.get_i64(3).expect("pop"), Some(120));
}

#[test]
fn cancelled_token_aborts_initialization() {
    let provider = towns(40);
    let rows = RowSet::with_config(provider.clone(), config(30)).expect("valid config");
    let cancel = CancelToken::new();
    cancel.cancel();

    assert!(matches!(
        rows.initialize("towns", None, &cancel),
        Err(RowSetError::Cancelled)
    ));
    assert_eq!(rows.holder_status(), HolderStatus::NeverStarted);

    rows.execute(&CancelToken::new()).expect("execute");
    assert_eq!(rows.row_count().expect("count"), 40);
}

#[test]
fn cancelled_count_leaves_cache_unset() {
    let provider = towns(40);
    let rows = open_towns(&provider, 30);
    rows.refresh_row();
    let cancel = CancelToken::new();
    cancel.cancel();

    assert!(matches!(
        rows.row_count_cancellable(&cancel),
        Err(RowSetError::Cancelled)
    ));
    provider.clear_query_log();
    assert_eq!(rows.row_count().expect("count"), 40);
    assert_eq!(common::count_queries(&provider.query_log()), 1);
}

#[test]
fn running_count_is_interrupted() {
    let provider = towns(0);
    provider
        .execute_batch(
            "CREATE VIEW endless AS
             WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 2000000000)
             SELECT x FROM c;",
        )
        .expect("create view");
    let rows = Arc::new(RowSet::with_config(provider.clone(), config(30)).expect("valid config"));
    let cancel = CancelToken::new();

    let canceller = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            cancel.cancel();
        })
    };
    let result = rows.initialize("endless", None, &cancel);
    canceller.join().expect("canceller thread");

    assert!(matches!(result, Err(RowSetError::Cancelled)), "{:?}", result);
    assert_eq!(rows.holder_status(), HolderStatus::NeverStarted);
}

#[test]
fn read_before_delay_keeps_cursor_open() {
    let provider = towns(40);
    let rows = open_towns(&provider, 30);
    rows.absolute(8).expect("move");

    rows.close_after(Duration::from_secs(30));
    assert_eq!(rows.get_cell(1).expect("read"), Value::Integer(8));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(rows.holder_status(), HolderStatus::Open);

    rows.close_after(Duration::from_millis(30));
    assert!(wait_for_status(&rows, HolderStatus::Closed));
}
