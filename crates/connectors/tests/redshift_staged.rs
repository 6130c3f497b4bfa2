mod common;

use common::{memory_params, memory_registry, shared_state, testing_row, testing_spec};
use connectors::conf::SinkConfig;
use connectors::error::ConnectorError;
use connectors::sink::DataSink;
use connectors::sql::client::SqlTable;
use connectors::sql::dialect::Dialect;
use connectors::sql::redshift::{AwsCredentials, RedshiftConfig, RedshiftSink};
use model::core::value::{FieldValue, Value};
use model::records::row::RowData;
use std::fs;

fn staged_config(dir: &tempfile::TempDir) -> RedshiftConfig {
    RedshiftConfig {
        staging_dir: dir.path().to_path_buf(),
        credentials: Some(AwsCredentials::new("ACCESS", "SECRET")),
        use_direct_insert: false,
        ..RedshiftConfig::default()
    }
}

#[tokio::test]
async fn test_staged_sink_copies_from_the_staging_file() {
    let dir = tempfile::tempdir().unwrap();
    let state = shared_state();
    let mut sink = RedshiftSink::staged(
        memory_registry(&state),
        memory_params(),
        testing_spec(),
        staged_config(&dir),
    );
    let staging = sink.staging_path().to_path_buf();

    sink.open().await.unwrap();
    assert!(staging.exists());
    sink.write(&testing_row(1, "abc", "ABC")).await.unwrap();
    sink.close().await.unwrap();

    let state = state.lock().unwrap();
    assert!(state.tables.contains(&"testingtable".to_string()));
    assert_eq!(
        state.statements[0],
        "CREATE TABLE testingtable ( num int, lwr varchar(256), upr varchar(256) )"
    );
    assert_eq!(
        state.statements[1],
        format!(
            "COPY testingtable from '{}'  CREDENTIALS 'aws_access_key_id=ACCESS;aws_secret_access_key=SECRET'  DELIMITER ',' REMOVEQUOTES ;",
            staging.display()
        )
    );
    assert!(!staging.exists());
}

#[tokio::test]
async fn test_staged_rows_are_encoded_and_kept_when_asked() {
    let dir = tempfile::tempdir().unwrap();
    let state = shared_state();
    let mut config = staged_config(&dir);
    config.keep_staging = true;
    let mut sink = RedshiftSink::staged(
        memory_registry(&state),
        memory_params(),
        testing_spec(),
        config,
    );
    let staging = sink.staging_path().to_path_buf();

    sink.open().await.unwrap();
    sink.write(&testing_row(1, "abc", "ABC")).await.unwrap();
    let with_null = RowData::new(
        "testingtable",
        vec![
            FieldValue::new("num", Value::Int(13)),
            FieldValue::new("lwr", Value::String("say \"hi\"".to_string())),
            FieldValue::null("upr"),
        ],
    );
    sink.write(&with_null).await.unwrap();
    sink.close().await.unwrap();

    assert!(staging.exists());
    let content = fs::read_to_string(&staging).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines, vec![r#"1,"abc","ABC""#, r#"13,"say \"hi\"","#]);
}

#[tokio::test]
async fn test_staged_open_fails_when_the_table_never_appears() {
    let dir = tempfile::tempdir().unwrap();
    let state = shared_state();
    state.lock().unwrap().create_is_noop = true;
    let mut sink = RedshiftSink::staged(
        memory_registry(&state),
        memory_params(),
        testing_spec(),
        staged_config(&dir),
    );

    let error = sink.open().await.unwrap_err();
    match error {
        ConnectorError::Schema { table, source } => {
            assert_eq!(table, "testingtable");
            assert!(source.to_string().contains("table missing after create"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!sink.staging_path().exists());
}

#[tokio::test]
async fn test_staged_sink_rejects_invalid_codepoints_on_write() {
    let dir = tempfile::tempdir().unwrap();
    let state = shared_state();
    let mut sink = RedshiftSink::staged(
        memory_registry(&state),
        memory_params(),
        testing_spec(),
        staged_config(&dir),
    );

    sink.open().await.unwrap();
    let error = sink
        .write(&testing_row(1, "bad\u{FDD0}", "X"))
        .await
        .unwrap_err();
    match error {
        ConnectorError::InvalidCodepoint(text) => assert_eq!(text, "bad\u{FDD0}"),
        other => panic!("unexpected error: {other:?}"),
    }
    sink.close().await.unwrap();
}

#[tokio::test]
async fn test_facade_routes_redshift_to_the_staged_sink() {
    let dir = tempfile::tempdir().unwrap();
    let state = shared_state();
    let table = SqlTable::with_registry(
        memory_registry(&state),
        memory_params(),
        testing_spec(),
        Dialect::Redshift,
    );
    let config = SinkConfig {
        redshift: RedshiftConfig {
            staging_dir: dir.path().to_path_buf(),
            use_direct_insert: false,
            ..RedshiftConfig::default()
        },
        ..SinkConfig::default()
    };

    let mut sink = table.open_sink(config).await.unwrap();
    sink.write(&testing_row(1, "a", "A")).await.unwrap();
    sink.close().await.unwrap();

    let state = state.lock().unwrap();
    assert_eq!(state.statements.len(), 2);
    assert_eq!(
        state.statements[0],
        "CREATE TABLE testingtable ( num int, lwr varchar(256), upr varchar(256) )"
    );
    assert!(state.statements[1].starts_with("COPY testingtable from '"));
    assert!(state.statements[1].ends_with("'  DELIMITER ',' REMOVEQUOTES ;"));
    assert!(state.batches.is_empty());
}

#[tokio::test]
async fn test_facade_direct_insert_uses_the_batched_sink() {
    let state = shared_state();
    let table = SqlTable::with_registry(
        memory_registry(&state),
        memory_params(),
        testing_spec(),
        Dialect::Redshift,
    );

    let mut sink = table.open_sink(SinkConfig::default()).await.unwrap();
    sink.write(&testing_row(1, "a", "A")).await.unwrap();
    sink.close().await.unwrap();

    let state = state.lock().unwrap();
    assert_eq!(state.batches.len(), 1);
    assert_eq!(
        state.batches[0].0,
        "INSERT INTO testingtable (num,lwr,upr) VALUES (?,?,?)"
    );
    assert!(state
        .statements
        .iter()
        .all(|s| !s.starts_with("COPY ")));
}
