mod common;

use common::{
    memory_params, memory_registry, shared_state, testing_row, testing_spec, BatchReply,
    MemoryDriver,
};
use connectors::conf::{SinkConfig, SinkMode};
use connectors::error::ConnectorError;
use connectors::sink::DataSink;
use connectors::sql::client::SqlTable;
use connectors::sql::dialect::Dialect;
use connectors::sql::driver::{BatchOutcome, DbDriver};
use connectors::sql::writer::{BatchWriter, SqlSink, WriteOp};
use model::core::value::{FieldValue, Value};
use model::records::row::RowData;

fn batch_err(result: Result<(), ConnectorError>) -> String {
    match result {
        Err(ConnectorError::Batch(message)) => message,
        other => panic!("expected a batch error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_rows_arrive_in_one_batch_on_close() {
    let state = shared_state();
    let table = SqlTable::with_registry(
        memory_registry(&state),
        memory_params(),
        testing_spec(),
        Dialect::Generic,
    );

    let mut sink = table.open_sink(SinkConfig::default()).await.unwrap();
    for i in 1..=13 {
        let lwr = format!("row{i}");
        let upr = lwr.to_uppercase();
        sink.write(&testing_row(i, &lwr, &upr)).await.unwrap();
    }
    // Below the batch threshold nothing hits the database.
    assert!(state.lock().unwrap().batches.is_empty());
    sink.close().await.unwrap();

    let state = state.lock().unwrap();
    assert_eq!(state.batches.len(), 1);
    let (sql, rows) = &state.batches[0];
    assert_eq!(sql, "INSERT INTO testingtable (num,lwr,upr) VALUES (?,?,?)");
    assert_eq!(rows.len(), 13);
    assert_eq!(
        rows[0],
        vec![
            Value::Int(1),
            Value::String("row1".to_string()),
            Value::String("ROW1".to_string())
        ]
    );
    assert!(state.tables.contains(&"testingtable".to_string()));
    assert_eq!(
        state.statements[0],
        "CREATE TABLE testingtable ( num int, lwr varchar(256), upr varchar(256), PRIMARY KEY( num, lwr ) )"
    );
    // Preparation commit + its close, the batch commit, the sink close.
    assert_eq!(state.commits, 4);
    assert_eq!(state.rollbacks, 0);
    assert_eq!(state.closes, 2);
}

#[tokio::test]
async fn test_batch_threshold_flushes_during_writes() {
    let state = shared_state();
    let table = SqlTable::with_registry(
        memory_registry(&state),
        memory_params(),
        testing_spec(),
        Dialect::Generic,
    );
    let config = SinkConfig {
        batch_size: 5,
        ..SinkConfig::default()
    };

    let mut sink = table.open_sink(config).await.unwrap();
    for i in 1..=12 {
        sink.write(&testing_row(i, "a", "A")).await.unwrap();
    }
    assert_eq!(state.lock().unwrap().batches.len(), 2);
    sink.close().await.unwrap();

    let state = state.lock().unwrap();
    let sizes: Vec<usize> = state.batches.iter().map(|(_, rows)| rows.len()).collect();
    assert_eq!(sizes, vec![5, 5, 2]);
}

#[tokio::test]
async fn test_rows_route_to_update_and_fall_back_on_null_keys() {
    let state = shared_state();
    let table = SqlTable::with_registry(
        memory_registry(&state),
        memory_params(),
        testing_spec(),
        Dialect::Generic,
    );
    let config = SinkConfig {
        mode: SinkMode::Update,
        update_by: vec!["num".to_string(), "lwr".to_string()],
        ..SinkConfig::default()
    };

    let mut sink = table.open_sink(config).await.unwrap();
    sink.write(&testing_row(1, "a", "A")).await.unwrap();
    let null_key_row = RowData::new(
        "testingtable",
        vec![
            FieldValue::new("num", Value::Int(2)),
            FieldValue::null("lwr"),
            FieldValue::new("upr", Value::String("B".to_string())),
        ],
    );
    sink.write(&null_key_row).await.unwrap();
    sink.close().await.unwrap();

    let state = state.lock().unwrap();
    assert_eq!(state.batches.len(), 2);
    // Inserts flush before updates.
    let (insert_sql, insert_rows) = &state.batches[0];
    assert_eq!(insert_sql, "INSERT INTO testingtable (num,lwr,upr) VALUES (?,?,?)");
    assert_eq!(
        insert_rows[0],
        vec![Value::Int(2), Value::Null, Value::String("B".to_string())]
    );
    let (update_sql, update_rows) = &state.batches[1];
    assert_eq!(
        update_sql,
        "UPDATE testingtable SET upr = ? WHERE num = ? and lwr = ?"
    );
    assert_eq!(
        update_rows[0],
        vec![
            Value::String("A".to_string()),
            Value::Int(1),
            Value::String("a".to_string())
        ]
    );
}

#[tokio::test]
async fn test_update_keys_in_a_different_case_still_line_up() {
    let state = shared_state();
    let table = SqlTable::with_registry(
        memory_registry(&state),
        memory_params(),
        testing_spec(),
        Dialect::Generic,
    );
    let config = SinkConfig {
        mode: SinkMode::Update,
        update_by: vec!["NUM".to_string(), "LWR".to_string()],
        ..SinkConfig::default()
    };

    let mut sink = table.open_sink(config).await.unwrap();
    sink.write(&testing_row(1, "a", "A")).await.unwrap();
    sink.close().await.unwrap();

    let state = state.lock().unwrap();
    assert_eq!(state.batches.len(), 1);
    let (sql, rows) = &state.batches[0];
    // One placeholder per bound parameter: keys leave the SET list no
    // matter how their case compares to the schema columns.
    assert_eq!(sql, "UPDATE testingtable SET upr = ? WHERE NUM = ? and LWR = ?");
    assert_eq!(
        rows[0],
        vec![
            Value::String("A".to_string()),
            Value::Int(1),
            Value::String("a".to_string())
        ]
    );
}

#[tokio::test]
async fn test_driver_error_reports_context_and_rolls_back() {
    let state = shared_state();
    let table = SqlTable::with_registry(
        memory_registry(&state),
        memory_params(),
        testing_spec(),
        Dialect::Generic,
    );
    let config = SinkConfig {
        batch_size: 10,
        ..SinkConfig::default()
    };

    let mut sink = table.open_sink(config).await.unwrap();
    for i in 1..=3 {
        sink.write(&testing_row(i, "a", "A")).await.unwrap();
    }
    state
        .lock()
        .unwrap()
        .batch_replies
        .push_back(BatchReply::Fail("boom".to_string()));

    let message = batch_err(sink.close().await);
    assert_eq!(
        message,
        "unable to execute update batch [msglength: 4][totstmts: 3][crntstmts: 3][batch: 10] boom"
    );

    let state = state.lock().unwrap();
    assert_eq!(state.rollbacks, 1);
    // Prep commit + prep close + post-rollback commit + quiet close commit.
    assert_eq!(state.commits, 4);
    // The connection is released despite the failure.
    assert_eq!(state.closes, 2);
}

#[tokio::test]
async fn test_failed_marker_fails_the_batch() {
    let state = shared_state();
    let table = SqlTable::with_registry(
        memory_registry(&state),
        memory_params(),
        testing_spec(),
        Dialect::Generic,
    );
    let config = SinkConfig {
        batch_size: 10,
        ..SinkConfig::default()
    };

    let mut sink = table.open_sink(config).await.unwrap();
    for i in 1..=3 {
        sink.write(&testing_row(i, "a", "A")).await.unwrap();
    }
    state
        .lock()
        .unwrap()
        .batch_replies
        .push_back(BatchReply::Outcomes(vec![
            BatchOutcome::Affected(1),
            BatchOutcome::Failed,
            BatchOutcome::Affected(1),
        ]));

    let message = batch_err(sink.close().await);
    assert_eq!(
        message,
        "update failed [msglength: 41][totstmts: 3][crntstmts: 3][batch: 10] driver flagged failed statements in batch"
    );
    assert_eq!(state.lock().unwrap().rollbacks, 1);
}

#[tokio::test]
async fn test_outcome_count_mismatch_fails_the_batch() {
    let state = shared_state();
    let table = SqlTable::with_registry(
        memory_registry(&state),
        memory_params(),
        testing_spec(),
        Dialect::Generic,
    );
    let config = SinkConfig {
        batch_size: 10,
        ..SinkConfig::default()
    };

    let mut sink = table.open_sink(config).await.unwrap();
    for i in 1..=3 {
        sink.write(&testing_row(i, "a", "A")).await.unwrap();
    }
    state
        .lock()
        .unwrap()
        .batch_replies
        .push_back(BatchReply::Outcomes(vec![
            BatchOutcome::Affected(1),
            BatchOutcome::Affected(0),
        ]));

    let message = batch_err(sink.close().await);
    assert_eq!(
        message,
        "update did not update same number of statements executed in batch, batch: 3 updated: 2 [msglength: 0][totstmts: 3][crntstmts: 3][batch: 10] "
    );
    assert_eq!(state.lock().unwrap().rollbacks, 1);
}

#[tokio::test]
async fn test_success_no_info_outcomes_still_commit() {
    let state = shared_state();
    let table = SqlTable::with_registry(
        memory_registry(&state),
        memory_params(),
        testing_spec(),
        Dialect::Generic,
    );

    let mut sink = table.open_sink(SinkConfig::default()).await.unwrap();
    for i in 1..=3 {
        sink.write(&testing_row(i, "a", "A")).await.unwrap();
    }
    state
        .lock()
        .unwrap()
        .batch_replies
        .push_back(BatchReply::Outcomes(vec![BatchOutcome::SuccessNoInfo; 3]));
    sink.close().await.unwrap();

    let state = state.lock().unwrap();
    assert_eq!(state.commits, 4);
    assert_eq!(state.rollbacks, 0);
}

#[tokio::test]
async fn test_commit_failure_is_a_batch_failure() {
    let state = shared_state();
    let table = SqlTable::with_registry(
        memory_registry(&state),
        memory_params(),
        testing_spec(),
        Dialect::Generic,
    );
    let config = SinkConfig {
        batch_size: 10,
        ..SinkConfig::default()
    };

    let mut sink = table.open_sink(config).await.unwrap();
    sink.write(&testing_row(1, "a", "A")).await.unwrap();
    state.lock().unwrap().fail_commit_once = true;

    let message = batch_err(sink.close().await);
    assert_eq!(
        message,
        "unable to execute update batch [msglength: 15][totstmts: 1][crntstmts: 1][batch: 10] commit rejected"
    );
    assert_eq!(state.lock().unwrap().rollbacks, 1);
}

#[tokio::test]
async fn test_closing_an_empty_sink_executes_nothing() {
    let state = shared_state();
    let table = SqlTable::with_registry(
        memory_registry(&state),
        memory_params(),
        testing_spec(),
        Dialect::Generic,
    );

    let mut sink = table.open_sink(SinkConfig::default()).await.unwrap();
    sink.close().await.unwrap();

    let state = state.lock().unwrap();
    assert!(state.batches.is_empty());
    // Only the preparation commits and the final connection release.
    assert_eq!(state.commits, 3);
    assert_eq!(state.rollbacks, 0);
}

#[tokio::test]
async fn test_replace_mode_drops_and_recreates() {
    let state = shared_state();
    state
        .lock()
        .unwrap()
        .tables
        .push("testingtable".to_string());
    let table = SqlTable::with_registry(
        memory_registry(&state),
        memory_params(),
        testing_spec(),
        Dialect::Generic,
    );
    let config = SinkConfig {
        mode: SinkMode::Replace,
        ..SinkConfig::default()
    };

    let mut sink = table.open_sink(config).await.unwrap();
    {
        let state = state.lock().unwrap();
        assert_eq!(
            state.statements,
            vec![
                "DROP TABLE testingtable".to_string(),
                "CREATE TABLE testingtable ( num int, lwr varchar(256), upr varchar(256), PRIMARY KEY( num, lwr ) )"
                    .to_string(),
            ]
        );
    }
    sink.close().await.unwrap();
}

#[tokio::test]
async fn test_keep_mode_leaves_existing_table_alone() {
    let state = shared_state();
    state
        .lock()
        .unwrap()
        .tables
        .push("testingtable".to_string());
    let table = SqlTable::with_registry(
        memory_registry(&state),
        memory_params(),
        testing_spec(),
        Dialect::Generic,
    );

    let mut sink = table.open_sink(SinkConfig::default()).await.unwrap();
    assert!(state.lock().unwrap().statements.is_empty());
    sink.close().await.unwrap();
}

#[tokio::test]
async fn test_sink_open_creates_missing_table_itself() {
    let state = shared_state();
    let driver = MemoryDriver::new(state.clone());
    let conn = driver.connect(&memory_params()).await.unwrap();

    let mut sink = SqlSink::new(conn, testing_spec(), Dialect::Generic, SinkConfig::default());
    sink.open().await.unwrap();
    sink.close().await.unwrap();

    let state = state.lock().unwrap();
    assert!(state.tables.contains(&"testingtable".to_string()));
    assert!(state.statements[0].starts_with("CREATE TABLE testingtable"));
}

#[tokio::test]
async fn test_update_rows_need_an_update_statement() {
    let state = shared_state();
    let driver = MemoryDriver::new(state.clone());
    let conn = driver.connect(&memory_params()).await.unwrap();

    let mut writer = BatchWriter::new(
        conn,
        "INSERT INTO testingtable (num) VALUES (?)".to_string(),
        None,
        5,
    );
    let error = writer
        .write(WriteOp::Update(vec![Value::Int(1)]))
        .await
        .unwrap_err();
    match error {
        ConnectorError::Batch(message) => {
            assert_eq!(message, "no update statement configured for update row")
        }
        other => panic!("unexpected error: {other:?}"),
    }
    writer.close().await.unwrap();
}
