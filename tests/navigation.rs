mod common;

use std::sync::{Arc, Mutex};

use common::{count_queries, open_table, open_towns, towns};
use rowset::{RowMutation, RowSet, RowSetError, Value};

#[test]
fn jump_reads_batch_anchored_at_its_first_key() {
    let provider = towns(100);
    let rows = open_towns(&provider, 30);
    provider.clear_query_log();

    assert!(rows.absolute(45).expect("move to row 45"));
    assert_eq!(rows.get_cell(1).expect("read id"), Value::Integer(45));

    let log = provider.query_log();
    let batch = log
        .iter()
        .find(|q| q.sql.starts_with("SELECT * FROM towns WHERE id >= ?"))
        .expect("anchored batch query");
    assert_eq!(batch.sql, "SELECT * FROM towns WHERE id >= ? ORDER BY id LIMIT 31");
    assert_eq!(batch.params, vec![Value::Integer(31)]);
}

#[test]
fn last_after_fetch_size_change() {
    let provider = towns(95);
    let rows = open_towns(&provider, 30);
    rows.set_fetch_size(10).expect("set fetch size");

    assert!(rows.last().expect("move to last"));
    assert_eq!(rows.row(), 95);
    assert_eq!(rows.batch_position(), Some((9, 5)));
    assert_eq!(rows.get_cell(1).expect("read id"), Value::Integer(95));
    assert!(rows.is_last().expect("is last"));
}

#[test]
fn far_jump_probes_intermediate_boundaries() {
    let provider = towns(100);
    let rows = open_towns(&provider, 10);
    provider.clear_query_log();

    rows.absolute(95).expect("move to row 95");
    assert_eq!(rows.get_cell(2).expect("read name"), Value::from("town_95"));

    let log = provider.query_log();
    let probes = common::probes(&log);
    assert!(!probes.is_empty());
    assert!(probes.len() <= 6, "{} probes", probes.len());
    let batch = log
        .iter()
        .rev()
        .find(|q| q.sql.starts_with("SELECT * FROM towns"))
        .expect("batch query");
    assert_eq!(batch.params, vec![Value::Integer(91)]);
}

#[test]
fn moves_clamp_to_boundary_positions() {
    let provider = towns(20);
    let rows = open_towns(&provider, 30);

    assert!(rows.is_before_first());
    assert!(!rows.move_to(-7).expect("move below"));
    assert_eq!(rows.row(), 0);
    assert!(!rows.move_to(500).expect("move above"));
    assert_eq!(rows.row(), 21);
    assert!(rows.is_after_last().expect("after last"));

    assert!(rows.previous().expect("previous"));
    assert_eq!(rows.row(), 20);
    assert!(rows.first().expect("first"));
    assert!(rows.is_first());
    assert!(rows.relative(4).expect("relative"));
    assert_eq!(rows.row(), 5);
    rows.after_last().expect("after last");
    assert_eq!(rows.row(), 21);
    rows.before_first().expect("before first");
    assert_eq!(rows.row(), 0);
}

#[test]
fn relative_moves_saturate_at_extremes() {
    let provider = towns(100);
    let rows = open_towns(&provider, 30);

    rows.absolute(5).expect("move");
    assert!(!rows.relative(i64::MAX).expect("jump forward"));
    assert_eq!(rows.row(), 101);
    assert!(!rows.relative(i64::MIN).expect("jump backward"));
    assert_eq!(rows.row(), 0);
    assert!(rows.relative(i64::MAX).is_ok());
    assert!(rows.relative(-1).expect("back one"));
    assert_eq!(rows.row(), 100);
}

#[test]
fn sequential_scan_reads_every_row() {
    let provider = towns(47);
    let rows = open_towns(&provider, 10);

    let mut seen = Vec::new();
    while rows.next().expect("next") {
        seen.push(rows.get_i64(1).expect("read id").expect("id not null"));
    }
    assert_eq!(seen, (1..=47).collect::<Vec<_>>());
    assert!(rows.is_after_last().expect("after last"));
}

#[test]
fn reading_outside_rows_is_rejected() {
    let provider = towns(10);
    let rows = open_towns(&provider, 30);

    assert!(matches!(
        rows.get_cell(1),
        Err(RowSetError::InvalidRow { row: 0, row_count: 10 })
    ));
    rows.after_last().expect("after last");
    assert!(matches!(rows.get_cell(1), Err(RowSetError::InvalidRow { .. })));
}

#[test]
fn row_count_is_counted_once() {
    let provider = towns(64);
    let rows = open_towns(&provider, 30);
    rows.refresh_row();
    provider.clear_query_log();

    assert_eq!(rows.row_count().expect("count"), 64);
    assert_eq!(rows.row_count().expect("count"), 64);
    assert_eq!(count_queries(&provider.query_log()), 1);
}

#[test]
fn every_write_is_unsupported() {
    let provider = towns(5);
    let rows = open_towns(&provider, 30);

    for position in [0, 3, 6] {
        rows.move_to(position).expect("move");
        assert!(matches!(
            rows.update_value(1, Value::Integer(9)),
            Err(RowSetError::Unsupported("update_value"))
        ));
        assert!(matches!(rows.update_null(2), Err(RowSetError::Unsupported(_))));
        assert!(matches!(rows.insert_row(), Err(RowSetError::Unsupported(_))));
        assert!(matches!(rows.update_row(), Err(RowSetError::Unsupported(_))));
        assert!(matches!(rows.delete_row(), Err(RowSetError::Unsupported(_))));
        assert!(matches!(rows.cancel_row_updates(), Err(RowSetError::Unsupported(_))));
        assert!(matches!(rows.move_to_insert_row(), Err(RowSetError::Unsupported(_))));
        assert!(matches!(rows.commit(), Err(RowSetError::Unsupported(_))));
        assert!(matches!(rows.rollback(), Err(RowSetError::Unsupported(_))));
        assert!(matches!(rows.set_auto_commit(false), Err(RowSetError::Unsupported(_))));
    }
}

#[test]
fn listeners_see_position_changes_only() {
    let provider = towns(10);
    let rows = open_towns(&provider, 30);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let id = rows.add_cursor_listener(move |old, new| {
        sink.lock().expect("events").push((old, new));
    });

    rows.absolute(5).expect("move");
    rows.absolute(5).expect("same position");
    rows.next().expect("next");
    assert!(rows.remove_cursor_listener(id));
    rows.first().expect("first");

    assert_eq!(*events.lock().expect("events"), vec![(0, 5), (5, 6)]);
    assert!(!rows.remove_cursor_listener(id));
}

#[test]
fn listener_may_read_the_new_row() {
    let provider = towns(40);
    let rows = Arc::new(open_towns(&provider, 10));
    let names = Arc::new(Mutex::new(Vec::new()));
    let weak = Arc::downgrade(&rows);
    let sink = Arc::clone(&names);
    rows.add_cursor_listener(move |_, _| {
        if let Some(rows) = weak.upgrade() {
            if let Ok(name) = rows.get_string(2) {
                sink.lock().expect("names").push(name);
            }
        }
    });

    rows.absolute(33).expect("move");
    rows.previous().expect("previous");
    assert_eq!(
        *names.lock().expect("names"),
        vec![Some("town_33".to_string()), Some("town_32".to_string())]
    );
}

#[test]
fn read_lock_is_reentrant() {
    let provider = towns(10);
    let rows: RowSet = open_towns(&provider, 30);

    let _lock = rows.read_lock();
    assert!(rows.absolute(2).expect("move under lock"));
    assert_eq!(rows.get_cell(1).expect("read under lock"), Value::Integer(2));
}

#[test]
fn view_without_key_reads_by_position() {
    let provider = towns(100);
    provider
        .execute_batch("CREATE VIEW big_towns AS SELECT name, pop FROM towns WHERE pop > 500;")
        .expect("create view");
    let rows = open_table(&provider, "big_towns", 10);

    assert_eq!(rows.primary_key_name(), None);
    assert_eq!(rows.row_count().expect("count"), 50);
    provider.clear_query_log();

    rows.absolute(12).expect("move");
    assert_eq!(rows.get_cell(1).expect("read name"), Value::from("town_62"));
    assert_eq!(rows.primary_key_of_current_row().expect("position"), 12);
    let log = provider.query_log();
    assert!(log
        .iter()
        .any(|q| q.sql == "SELECT * FROM big_towns LIMIT 10 OFFSET 10"));
    assert!(log.iter().all(|q| !q.sql.contains("ORDER BY")));
}
