//! End-to-end write-back tests against an in-memory DuckDB

#![cfg(feature = "duckdb-backend")]

use batch_writeback::{
    Batch, BatchWriter, ConflictSpec, DuckDbSession, InstrumentedSession, SqlSession,
    TargetTable, Value, WriteConfig, WriteError,
};
use serde_json::json;

fn session_with(ddl: &str) -> DuckDbSession {
    let session = DuckDbSession::in_memory().unwrap();
    session.execute_batch(ddl).unwrap();
    session
}

fn users() -> TargetTable {
    TargetTable::new("main", "users")
}

fn users_batch(rows: &[(i64, &str)]) -> Batch {
    Batch::new(
        vec!["id".into(), "name".into()],
        rows.iter()
            .map(|(id, name)| vec![Value::Int(*id), Value::from(*name)])
            .collect(),
    )
    .unwrap()
}

fn table_rows<S: SqlSession>(session: &mut S, sql: &str) -> Vec<serde_json::Value> {
    session.query(sql, &[]).unwrap().rows
}

#[test]
fn test_append_inserts_every_row() {
    let session = session_with("CREATE TABLE users (id BIGINT, name TEXT)");
    let mut writer = BatchWriter::new(session).unwrap();
    let config = WriteConfig::new(users(), ConflictSpec::append());

    let batch = users_batch(&[(1, "a"), (1, "a"), (2, "b")]);
    let delta = writer.write(&batch, &config).unwrap();
    assert_eq!(delta.inserted_rows, 3);
    assert_eq!(delta.updated_rows, 0);

    let rows = table_rows(writer.session_mut(), "SELECT COUNT(*) AS n FROM users");
    assert_eq!(rows[0]["n"], 3);
    assert_eq!(writer.metrics_snapshot().processed_rows, 3);
}

#[test]
fn test_upsert_updates_and_inserts() {
    let session = session_with("CREATE TABLE users (id BIGINT PRIMARY KEY, name TEXT)");
    let mut writer = BatchWriter::new(session).unwrap();
    let config = WriteConfig::new(users(), ConflictSpec::update(["id"]));

    let first = writer.write(&users_batch(&[(1, "a")]), &config).unwrap();
    assert_eq!(first.inserted_rows, 1);

    let second = writer
        .write(&users_batch(&[(1, "c"), (3, "d")]), &config)
        .unwrap();
    assert_eq!(second.updated_rows, 1);
    assert_eq!(second.inserted_rows, 1);

    let rows = table_rows(writer.session_mut(), "SELECT id, name FROM users ORDER BY id");
    assert_eq!(
        rows,
        vec![json!({"id": 1, "name": "c"}), json!({"id": 3, "name": "d"})]
    );

    let metrics = writer.metrics_snapshot();
    assert_eq!(metrics.processed_rows, 3);
    assert_eq!(metrics.inserted_rows, 2);
    assert_eq!(metrics.updated_rows, 1);
}

#[test]
fn test_ignore_is_idempotent() {
    let session = session_with("CREATE TABLE users (id BIGINT PRIMARY KEY, name TEXT)");
    let mut writer = BatchWriter::new(session).unwrap();
    let config = WriteConfig::new(users(), ConflictSpec::ignore(["id"]));
    let batch = users_batch(&[(1, "a"), (2, "b")]);

    let first = writer.write(&batch, &config).unwrap();
    assert_eq!(first.inserted_rows, 2);
    let before = table_rows(writer.session_mut(), "SELECT id, name FROM users ORDER BY id");

    let again = writer.write(&batch, &config).unwrap();
    assert_eq!(again.inserted_rows, 0);
    assert_eq!(again.updated_rows, 0);
    let after = table_rows(writer.session_mut(), "SELECT id, name FROM users ORDER BY id");
    assert_eq!(before, after);
    assert_eq!(after.len(), 2);

    let metrics = writer.metrics_snapshot();
    assert_eq!(metrics.processed_rows, 4);
    assert_eq!(metrics.inserted_rows, 2);
}

#[test]
fn test_staged_merge_matches_native_upsert() {
    let mut native =
        BatchWriter::new(session_with("CREATE TABLE users (id BIGINT PRIMARY KEY, name TEXT)"))
            .unwrap();
    let mut staged = BatchWriter::with_staging(
        session_with(
            "CREATE TABLE users (id BIGINT, name TEXT); \
             CREATE TABLE users_stage (id BIGINT, name TEXT)",
        ),
        TargetTable::new("main", "users_stage"),
    );
    let config = WriteConfig::new(users(), ConflictSpec::update(["id"]));

    let batches = [
        users_batch(&[(1, "a"), (2, "b")]),
        users_batch(&[(2, "x"), (3, "c")]),
    ];
    native.write_all(&batches, &config).unwrap();
    staged.write_all(&batches, &config).unwrap();

    let select = "SELECT id, name FROM users ORDER BY id";
    assert_eq!(
        table_rows(native.session_mut(), select),
        table_rows(staged.session_mut(), select)
    );

    let metrics = staged.metrics_snapshot();
    assert_eq!(metrics.staged_rows, 4);
    assert_eq!(metrics.inserted_rows, 3);
    assert_eq!(metrics.updated_rows, 1);
    assert_eq!(native.metrics_snapshot().staged_rows, 0);
}

#[test]
fn test_schema_drift_adds_column_once() {
    let session = session_with("CREATE TABLE events (id BIGINT, name TEXT)");
    let mut writer = BatchWriter::new(session).unwrap();
    let config = WriteConfig::new(TargetTable::new("main", "events"), ConflictSpec::append());

    let batch = Batch::new(
        vec!["id".into(), "name".into(), "score".into()],
        vec![vec![Value::Int(1), Value::from("a"), Value::Float(0.5)]],
    )
    .unwrap();

    assert_eq!(writer.write(&batch, &config).unwrap().columns_added, 1);
    assert_eq!(writer.write(&batch, &config).unwrap().columns_added, 0);

    let rows = table_rows(
        writer.session_mut(),
        "SELECT score FROM events WHERE score IS NOT NULL",
    );
    assert_eq!(rows.len(), 2);
}

#[test]
fn test_failed_batch_is_rolled_back() {
    let session = session_with("CREATE TABLE users (id BIGINT PRIMARY KEY, name TEXT NOT NULL)");
    let mut writer = BatchWriter::new(session).unwrap();
    let config = WriteConfig::new(users(), ConflictSpec::update(["id"]));

    let batch = Batch::new(
        vec!["id".into(), "name".into()],
        vec![
            vec![Value::Int(1), Value::from("a")],
            vec![Value::Int(2), Value::Null],
            vec![Value::Int(3), Value::from("c")],
        ],
    )
    .unwrap();

    let result = writer.write(&batch, &config);
    assert!(matches!(result, Err(WriteError::SqlExecution { .. })));

    let rows = table_rows(writer.session_mut(), "SELECT COUNT(*) AS n FROM users");
    assert_eq!(rows[0]["n"], 0);
    assert_eq!(writer.metrics_snapshot().processed_rows, 0);
    assert_eq!(writer.metrics_snapshot().inserted_rows, 0);

    // The session is usable again after the rollback
    writer.write(&users_batch(&[(1, "a")]), &config).unwrap();
    assert_eq!(writer.metrics_snapshot().processed_rows, 1);
}

#[test]
fn test_missing_target_key_fails_before_ddl() {
    let session = session_with("CREATE TABLE users (name TEXT)");
    let mut writer = BatchWriter::new(session).unwrap();
    let config = WriteConfig::new(users(), ConflictSpec::update(["id"]));

    let result = writer.write(&users_batch(&[(1, "a")]), &config);
    assert!(matches!(
        result,
        Err(WriteError::ConflictKeyMissing { location: "target table", .. })
    ));

    let rows = table_rows(
        writer.session_mut(),
        "SELECT column_name FROM information_schema.columns WHERE table_name = 'users'",
    );
    assert_eq!(rows.len(), 1);
}

#[test]
fn test_instrumented_session_records_statements() {
    let session = InstrumentedSession::new(session_with(
        "CREATE TABLE users (id BIGINT PRIMARY KEY, name TEXT)",
    ));
    let mut writer = BatchWriter::new(session).unwrap();
    let config = WriteConfig::new(users(), ConflictSpec::update(["id"]));

    writer
        .write(&users_batch(&[(1, "a"), (2, "b")]), &config)
        .unwrap();

    let stats = writer.session().stats();
    let log = stats.query_log();
    assert_eq!(stats.count(), log.len() as u64);
    assert!(log.iter().all(|entry| entry.is_complete()));
    assert!(log.iter().any(|entry| entry.statement == "BEGIN"));
    assert_eq!(log.last().map(|entry| entry.statement.as_str()), Some("COMMIT"));
    assert!(stats.total_time() >= 0.0);
}
