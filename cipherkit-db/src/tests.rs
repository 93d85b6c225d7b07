//! Tests against the bundled `SQLite` engine.

use std::sync::Arc;

use super::*;
use crate::args;

/// Each row is `(id INTEGER, label TEXT)` with an 8-byte label payload
/// (`row-000` plus NUL), so it costs 16 + 16 + 24 bytes.
const ROW_BYTES: usize = ROW_SLOT_SIZE + FIELD_SLOT_SIZE + (FIELD_SLOT_SIZE + 8);
const TEN_ROWS: usize = 10 * ROW_BYTES;

fn seeded(rows: i64) -> Arc<Database> {
    let db = Database::open_in_memory().expect("open in-memory db");
    db.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, label TEXT);")
        .expect("create table");
    for id in 0..rows {
        db.execute(
            "INSERT INTO t (id, label) VALUES (?1, ?2)",
            &args![id, format!("row-{id:03}")],
        )
        .expect("insert");
    }
    db
}

fn all_rows(db: &Arc<Database>) -> Query {
    Query::new(db, "SELECT id, label FROM t ORDER BY id", None, QueryArgs::default())
        .expect("query")
}

#[test]
fn test_execute_reports_changes() {
    let db = seeded(3);
    let changed = db
        .execute("UPDATE t SET label = ?1 WHERE id < ?2", &args!["x", 2])
        .expect("update");
    assert_eq!(changed, 2);
    assert_eq!(db.execute("DELETE FROM t", &[]).expect("delete"), 3);
}

#[test]
fn test_window_full_keeps_counting_rows() {
    let db = seeded(100);
    let query = all_rows(&db);
    let window = ResultWindow::new(TEN_ROWS);

    let outcome = query.fill_window(&window, usize::MAX, 0).expect("fill");
    assert_eq!(outcome, FillOutcome::Filled { rows: 100 });
    assert_eq!(window.row_count().expect("open"), 10);
    assert_eq!(window.column_count().expect("open"), 2);
    assert_eq!(
        window.row(9).expect("open"),
        Some(vec![FieldValue::Integer(9), FieldValue::Text("row-009".to_string())])
    );
    assert_eq!(window.row(10).expect("open"), None);
}

#[test]
fn test_max_rows_limits_a_fill_from_the_start() {
    let db = seeded(100);
    let query = all_rows(&db);
    let window = ResultWindow::new(TEN_ROWS);

    let outcome = query.fill_window(&window, 5, 0).expect("fill");
    assert_eq!(outcome.row_count(), 5);
    assert_eq!(window.row_count().expect("open"), 5);
}

#[test]
fn test_mid_scroll_window_ignores_max_rows() {
    let db = seeded(100);
    let query = all_rows(&db);
    let window = ResultWindow::new(TEN_ROWS);
    window.set_start_position(20).expect("open");
    window.set_required_position(25).expect("open");

    let outcome = query.fill_window(&window, 5, 0).expect("fill");
    assert_eq!(outcome.row_count(), 100);
    assert_eq!(window.row_count().expect("open"), 10, "filled until full");
    assert_eq!(window.value(20, 0).expect("open"), Some(FieldValue::Integer(20)));
    assert!(window.contains(29).expect("open"));
    assert!(!window.contains(19).expect("open"));
}

#[test]
fn test_window_slides_to_required_position() {
    let db = seeded(100);
    let query = all_rows(&db);
    let window = ResultWindow::new(TEN_ROWS);
    window.set_required_position(35).expect("open");

    let outcome = query.fill_window(&window, usize::MAX, 0).expect("fill");
    assert_eq!(outcome.row_count(), 100);
    assert_eq!(window.start_position().expect("open"), 30);
    assert!(window.contains(35).expect("open"));
    assert_eq!(
        window.value(35, 1).expect("open"),
        Some(FieldValue::Text("row-035".to_string()))
    );
}

#[test]
fn test_known_last_position_stops_counting() {
    let db = seeded(100);
    let query = all_rows(&db);
    let window = ResultWindow::new(TEN_ROWS);

    let outcome = query.fill_window(&window, usize::MAX, 50).expect("fill");
    assert_eq!(outcome.row_count(), 50);
    assert_eq!(window.row_count().expect("open"), 10);
}

#[test]
fn test_start_past_the_end_returns_rows_seen() {
    let db = seeded(10);
    let query = all_rows(&db);
    let window = ResultWindow::new(TEN_ROWS);
    window.set_start_position(200).expect("open");

    let outcome = query.fill_window(&window, usize::MAX, 0).expect("fill");
    assert_eq!(outcome.row_count(), 10);
    assert_eq!(window.row_count().expect("open"), 0);
}

#[test]
fn test_offset_parameter_lets_the_engine_skip_rows() {
    let db = seeded(100);
    let query = Query::new(
        &db,
        "SELECT id, label FROM t WHERE id >= ?1 ORDER BY id LIMIT -1 OFFSET ?2",
        Some(2),
        QueryArgs::Typed(args![10]),
    )
    .expect("query");
    assert_eq!(query.bound_arguments_as_text(), vec![Some("10".to_string())]);

    let window = ResultWindow::new(TEN_ROWS);
    window.set_start_position(40).expect("open");
    window.set_required_position(40).expect("open");
    let outcome = query.fill_window(&window, usize::MAX, 0).expect("fill");

    // 90 rows match; the window holds logical rows 40..50, i.e. ids 50..60.
    assert_eq!(outcome.row_count(), 90);
    assert_eq!(window.value(40, 0).expect("open"), Some(FieldValue::Integer(50)));
    assert_eq!(window.value(49, 0).expect("open"), Some(FieldValue::Integer(59)));
}

#[test]
fn test_requery_picks_up_new_rows_typed_and_text() {
    let db = seeded(5);
    let typed = Query::new(
        &db,
        "SELECT id FROM t WHERE id >= ?1",
        None,
        QueryArgs::Typed(args![2]),
    )
    .expect("typed query");
    let text = Query::new(
        &db,
        "SELECT id FROM t WHERE id >= ?1",
        None,
        QueryArgs::Text(vec![Some("2".to_string())]),
    )
    .expect("text query");
    let window = ResultWindow::new(4096);

    assert_eq!(typed.fill_window(&window, 100, 0).expect("fill").row_count(), 3);
    assert_eq!(text.fill_window(&window, 100, 0).expect("fill").row_count(), 3);

    db.execute("INSERT INTO t (id, label) VALUES (?1, ?2)", &args![9, "new"])
        .expect("insert");
    typed.requery().expect("typed requery");
    text.requery().expect("text requery");

    assert_eq!(typed.fill_window(&window, 100, 0).expect("fill").row_count(), 4);
    assert_eq!(text.fill_window(&window, 100, 0).expect("fill").row_count(), 4);
    assert_eq!(typed.bound_arguments_typed(), Some(vec![BindValue::Long(2)]));
    assert_eq!(text.bound_arguments_as_text(), vec![Some("2".to_string())]);
}

#[test]
fn test_requery_replays_latest_binds() {
    let db = seeded(10);
    let query = Query::new(
        &db,
        "SELECT id FROM t WHERE id < ?1",
        None,
        QueryArgs::Typed(args![3]),
    )
    .expect("query");
    query.bind_long(1, 7).expect("rebind");
    query.statement().clear_bindings().expect("clear");
    query.requery().expect("requery");

    let window = ResultWindow::new(4096);
    assert_eq!(query.fill_window(&window, 100, 0).expect("fill").row_count(), 7);
}

#[test]
fn test_requery_of_closed_text_query_is_not_wrapped() {
    let db = seeded(1);
    let query = Query::new(
        &db,
        "SELECT id FROM t WHERE id = ?1",
        None,
        QueryArgs::Text(vec![Some("0".to_string())]),
    )
    .expect("query");
    query.close();
    let err = query.requery().expect_err("closed statement");
    assert_eq!(err.kind(), ErrorKind::IllegalState);
}

#[test]
fn test_row_larger_than_window_is_too_big() {
    let db = seeded(0);
    db.execute("INSERT INTO t (id, label) VALUES (?1, ?2)", &args![1, "x".repeat(200)])
        .expect("insert");
    let query = all_rows(&db);
    let window = ResultWindow::new(64);

    let err = query.fill_window(&window, 10, 0).expect_err("row does not fit");
    assert_eq!(err.code().map(DbErrorCode::primary), Some(18));
    assert_eq!(query.reference_count(), 1);
    assert_eq!(window.reference_count(), 1);
    assert_eq!(db.corruption_count(), 0);
}

#[test]
fn test_empty_result() {
    let db = seeded(0);
    let query = all_rows(&db);
    let window = ResultWindow::new(TEN_ROWS);
    let outcome = query.fill_window(&window, 10, 0).expect("fill");
    assert_eq!(outcome, FillOutcome::Filled { rows: 0 });
    assert_eq!(window.column_count().expect("open"), 2);
}

#[test]
fn test_closed_database_rejects_work() {
    let db = seeded(1);
    let query = all_rows(&db);
    db.close();
    assert!(!db.is_open());
    let err = db.execute_batch("SELECT 1;").expect_err("closed");
    assert_eq!(err.kind(), ErrorKind::IllegalState);
    // Statements compiled before the close keep working until closed.
    let window = ResultWindow::new(TEN_ROWS);
    assert_eq!(query.fill_window(&window, 10, 0).expect("fill").row_count(), 1);
}

#[test]
fn test_on_disk_database_and_delete_on_corruption() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("store.sqlite");
    let config = DatabaseConfig::default().with_corruption_handler(Arc::new(DeleteOnCorruption));
    let db = Database::open(&path, config).expect("open on disk");
    db.execute_batch("CREATE TABLE t (id INTEGER);").expect("create");
    assert_eq!(db.path(), Some(path.as_path()));
    assert!(path.exists());

    db.on_corruption();
    assert_eq!(db.corruption_count(), 1);
    assert!(!path.exists(), "handler removed the database file");
    assert!(!db.is_open(), "closed before the files were removed");
    let err = db
        .execute("INSERT INTO t (id) VALUES (?1)", &args![1])
        .expect_err("closed");
    assert_eq!(err.kind(), ErrorKind::IllegalState);
}

#[test]
fn test_logging_handler_keeps_database_open() {
    let db = seeded(1);
    db.on_corruption();
    assert_eq!(db.corruption_count(), 1);
    assert!(db.is_open());
    assert_eq!(db.execute("DELETE FROM t", &[]).expect("delete"), 1);
}

#[test]
fn test_read_only_database_rejects_writes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("ro.sqlite");
    {
        let db = Database::open(&path, DatabaseConfig::default()).expect("create");
        db.execute_batch("CREATE TABLE t (id INTEGER);").expect("create table");
    }
    let db = Database::open(&path, DatabaseConfig::default().with_read_only(true))
        .expect("open read-only");
    let err = db.execute_batch("INSERT INTO t VALUES (1);").expect_err("read-only");
    assert_eq!(err.kind(), ErrorKind::Other);
}
