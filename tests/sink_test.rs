//! Integration tests for feature group writes
//!
//! - Routing between the offline table and the online topic
//! - Failure handling when one of the two legs fails
//! - Validation gating, time-travel commits and streaming ingestion

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use feature_materializer::config::MaterializerConfig;
use feature_materializer::connector::EngineConf;
use feature_materializer::dataset::{DataType, Dataset, Field, Value};
use feature_materializer::engine::{
    DataFormat, ExecutionEngine, LocalEngine, Options, ReadSpec, WriteSpec,
};
use feature_materializer::featurestore::{
    Expectation, Feature, FeatureGroupDescriptor, Rule, RuleLevel, TimeTravelFormat,
    ValidationType,
};
use feature_materializer::schema::{decode_key, decode_value, EncodedRecord};
use feature_materializer::sink::{
    BrokerWriter, DatasetStream, FeatureGroupWriter, InMemoryBroker, OfflineWriter,
    OnlineWriter, RoutePlan, Storage, StreamWriteOptions, TimeTravelEngine,
    VersionedTableStore, WriteOperation, WriteRequest,
};
use feature_materializer::FeatureStoreError;

// ── Helpers ──────────────────────────────────────────────────────────

/// Engine whose writes always fail
struct FailingEngine;

#[async_trait]
impl ExecutionEngine for FailingEngine {
    async fn write(&self, _: &Dataset, _: &WriteSpec, _: &EngineConf) -> feature_materializer::Result<()> {
        Err(FeatureStoreError::Storage("disk full".into()))
    }

    async fn read(&self, _: &ReadSpec, _: &EngineConf) -> feature_materializer::Result<Dataset> {
        Err(FeatureStoreError::Storage("unavailable".into()))
    }

    async fn stage_file(&self, uri: &str) -> feature_materializer::Result<PathBuf> {
        Err(FeatureStoreError::Storage(format!("cannot stage {}", uri)))
    }
}

/// Broker that rejects every send
struct FailingBroker;

#[async_trait]
impl BrokerWriter for FailingBroker {
    async fn send(&self, topic: &str, _: Vec<EncodedRecord>, _: &Options) -> feature_materializer::Result<()> {
        Err(FeatureStoreError::Sink(format!("topic {} is unavailable", topic)))
    }
}

fn transactions(online: bool) -> Arc<FeatureGroupDescriptor> {
    Arc::new(
        FeatureGroupDescriptor::builder("transactions", 1)
            .with_feature(Feature::new("id", "bigint").primary())
            .with_feature(Feature::new("amount", "double"))
            .with_feature(Feature::new("country", "string"))
            .online_enabled(online)
            .build()
            .unwrap(),
    )
}

fn rows(ids: &[i64]) -> Dataset {
    Dataset::new(
        vec![
            Field::new("id", DataType::Long),
            Field::new("amount", DataType::Double),
            Field::new("country", DataType::String),
        ],
        ids.iter()
            .map(|id| {
                vec![
                    Value::Long(*id),
                    Value::Double(*id as f64 * 1.5),
                    Value::String("SE".into()),
                ]
            })
            .collect(),
    )
    .unwrap()
}

fn writer_with(
    engine: Arc<dyn ExecutionEngine>,
    broker: Arc<dyn BrokerWriter>,
    store: Arc<dyn TimeTravelEngine>,
    checkpoints: &TempDir,
) -> FeatureGroupWriter {
    FeatureGroupWriter::new(
        OfflineWriter::new(engine, store),
        OnlineWriter::new(broker).with_checkpoint_root(checkpoints.path()),
    )
}

async fn offline_rows(dir: &TempDir, table: &str) -> usize {
    let spec = ReadSpec {
        format: DataFormat::Hive,
        options: Options::new(),
        location: table.to_string(),
    };
    LocalEngine::new(dir.path())
        .read(&spec, &EngineConf::new())
        .await
        .unwrap()
        .num_rows()
}

// ── Routing ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_offline_only_group_never_touches_broker() {
    let dir = TempDir::new().unwrap();
    let broker = Arc::new(InMemoryBroker::new());
    let writer = writer_with(
        Arc::new(LocalEngine::new(dir.path())),
        broker.clone(),
        Arc::new(VersionedTableStore::new()),
        &dir,
    );

    let outcome = writer
        .insert(WriteRequest::new(transactions(false), rows(&[1, 2, 3])))
        .await
        .unwrap();
    assert_eq!(outcome.plan, RoutePlan::OfflineOnly);
    assert!(outcome.offline_written);
    assert!(outcome.online_records.is_none());
    assert_eq!(broker.send_count(), 0);
    assert_eq!(offline_rows(&dir, "transactions_1").await, 3);
}

#[tokio::test]
async fn test_online_group_writes_both_legs() {
    let dir = TempDir::new().unwrap();
    let broker = Arc::new(InMemoryBroker::new());
    let writer = writer_with(
        Arc::new(LocalEngine::new(dir.path())),
        broker.clone(),
        Arc::new(VersionedTableStore::new()),
        &dir,
    );
    let fg = transactions(true);

    let outcome = writer
        .insert(WriteRequest::new(fg.clone(), rows(&[10, 20])))
        .await
        .unwrap();
    assert_eq!(outcome.plan, RoutePlan::OfflineThenOnline);
    assert_eq!(outcome.online_records, Some(2));
    assert_eq!(offline_rows(&dir, "transactions_1").await, 2);

    let records = broker.records("transactions_1_onlinefs");
    assert_eq!(records.len(), 2);
    assert_eq!(decode_key(&records[0].key).unwrap(), "10");
    let fields = decode_value(&records[1].value, &fg).unwrap();
    assert_eq!(fields[0], ("id".to_string(), Value::Long(20)));
    assert_eq!(fields[1], ("amount".to_string(), Value::Double(30.0)));
}

#[tokio::test]
async fn test_explicit_online_storage_skips_offline() {
    let dir = TempDir::new().unwrap();
    let broker = Arc::new(InMemoryBroker::new());
    let writer = writer_with(
        Arc::new(LocalEngine::new(dir.path())),
        broker.clone(),
        Arc::new(VersionedTableStore::new()),
        &dir,
    );

    let request = WriteRequest::new(transactions(true), rows(&[1])).with_storage(Storage::Online);
    let outcome = writer.save_dataframe(&request).await.unwrap();
    assert_eq!(outcome.plan, RoutePlan::OnlineOnly);
    assert!(!outcome.offline_written);
    assert_eq!(broker.topic_len("transactions_1_onlinefs"), 1);
    assert!(!dir.path().join("transactions_1").exists());

    let request = WriteRequest::new(transactions(false), rows(&[1])).with_storage(Storage::Online);
    let err = writer.save_dataframe(&request).await.unwrap_err();
    assert!(matches!(err, FeatureStoreError::Config(_)));
}

// ── Leg failures ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_offline_failure_skips_online() {
    let dir = TempDir::new().unwrap();
    let broker = Arc::new(InMemoryBroker::new());
    let writer = writer_with(
        Arc::new(FailingEngine),
        broker.clone(),
        Arc::new(VersionedTableStore::new()),
        &dir,
    );

    let err = writer
        .insert(WriteRequest::new(transactions(true), rows(&[1, 2])))
        .await
        .unwrap_err();
    assert!(matches!(err, FeatureStoreError::WriteFailure { .. }));
    assert!(matches!(
        err.write_failure_cause(),
        Some(FeatureStoreError::Storage(msg)) if msg == "disk full"
    ));
    assert!(std::error::Error::source(&err).is_some());
    assert_eq!(broker.send_count(), 0);
}

#[tokio::test]
async fn test_online_failure_keeps_offline_commit() {
    let dir = TempDir::new().unwrap();
    let writer = writer_with(
        Arc::new(LocalEngine::new(dir.path())),
        Arc::new(FailingBroker),
        Arc::new(VersionedTableStore::new()),
        &dir,
    );

    let err = writer
        .insert(WriteRequest::new(transactions(true), rows(&[1, 2, 3, 4])))
        .await
        .unwrap_err();
    assert!(matches!(
        err.write_failure_cause(),
        Some(FeatureStoreError::Sink(_))
    ));
    assert_eq!(offline_rows(&dir, "transactions_1").await, 4);
}

#[tokio::test]
async fn test_null_primary_key_fails_online_leg() {
    let dir = TempDir::new().unwrap();
    let broker = Arc::new(InMemoryBroker::new());
    let writer = writer_with(
        Arc::new(LocalEngine::new(dir.path())),
        broker.clone(),
        Arc::new(VersionedTableStore::new()),
        &dir,
    );
    let dataset = Dataset::new(
        rows(&[]).schema().to_vec(),
        vec![vec![Value::Null, Value::Double(1.0), Value::String("NO".into())]],
    )
    .unwrap();
    let request = WriteRequest::new(transactions(true), dataset).with_storage(Storage::Online);
    let err = writer.save_dataframe(&request).await.unwrap_err();
    assert!(matches!(err.write_failure_cause(), Some(FeatureStoreError::Codec(_))));
    assert_eq!(broker.send_count(), 0);
}

// ── Validation ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_strict_validation_blocks_insert() {
    let dir = TempDir::new().unwrap();
    let broker = Arc::new(InMemoryBroker::new());
    let writer = writer_with(
        Arc::new(LocalEngine::new(dir.path())),
        broker.clone(),
        Arc::new(VersionedTableStore::new()),
        &dir,
    );
    let fg = Arc::new(
        FeatureGroupDescriptor::builder("payments", 1)
            .with_feature(Feature::new("id", "bigint").primary())
            .with_feature(Feature::new("amount", "double"))
            .with_feature(Feature::new("country", "string"))
            .online_enabled(true)
            .with_validation(ValidationType::Strict)
            .with_expectation(
                Expectation::new("positive_amount")
                    .with_feature("amount")
                    .with_rule(Rule::new("HAS_MIN", RuleLevel::Error).with_min(5.0)),
            )
            .build()
            .unwrap(),
    );

    let err = writer
        .insert(WriteRequest::new(fg.clone(), rows(&[1, 2])))
        .await
        .unwrap_err();
    assert!(matches!(err, FeatureStoreError::Validation(_)));
    assert_eq!(broker.send_count(), 0);
    assert!(!dir.path().join("payments_1").exists());

    let outcome = writer
        .insert(WriteRequest::new(fg, rows(&[10, 20])))
        .await
        .unwrap();
    let report = outcome.validation.unwrap();
    assert!(report.failures().next().is_none());
    assert_eq!(broker.topic_len("payments_1_onlinefs"), 2);
}

// ── Time travel ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_time_travel_upserts_by_primary_key() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(VersionedTableStore::new());
    let writer = writer_with(
        Arc::new(LocalEngine::new(dir.path())),
        Arc::new(InMemoryBroker::new()),
        store.clone(),
        &dir,
    );
    let fg = Arc::new(
        FeatureGroupDescriptor::builder("accounts", 3)
            .with_feature(Feature::new("id", "bigint").primary())
            .with_feature(Feature::new("amount", "double"))
            .with_feature(Feature::new("country", "string"))
            .with_time_travel_format(TimeTravelFormat::Hudi)
            .build()
            .unwrap(),
    );

    writer
        .save(fg.clone(), rows(&[1, 2]).into(), Options::new(), Options::new())
        .await
        .unwrap();
    writer
        .insert(
            WriteRequest::new(fg.clone(), rows(&[2, 3])).with_operation(WriteOperation::Upsert),
        )
        .await
        .unwrap();

    let commits = store.commit_details(&fg, None).await.unwrap();
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].rows_inserted, 1);
    assert_eq!(commits[0].rows_updated, 1);
    assert_eq!(store.read(&fg, None).await.unwrap().num_rows(), 3);
    assert!(!dir.path().join("accounts_3").exists());
}

#[tokio::test]
async fn test_append_features_writes_null_columns_offline() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(VersionedTableStore::new());
    let broker = Arc::new(InMemoryBroker::new());
    let writer = writer_with(
        Arc::new(LocalEngine::new(dir.path())),
        broker.clone(),
        store.clone(),
        &dir,
    );
    let fg = Arc::new(
        FeatureGroupDescriptor::builder("profiles", 1)
            .with_feature(Feature::new("id", "bigint").primary())
            .with_feature(Feature::new("amount", "double"))
            .with_feature(Feature::new("country", "string"))
            .online_enabled(true)
            .with_time_travel_format(TimeTravelFormat::Hudi)
            .build()
            .unwrap(),
    );

    let outcome = writer
        .append_features(fg.clone(), &rows(&[]), &[Feature::new("segment", "string")])
        .await
        .unwrap();
    assert_eq!(outcome.plan, RoutePlan::OfflineOnly);
    assert_eq!(broker.send_count(), 0);
    let table = store.read(&fg, None).await.unwrap();
    assert_eq!(table.num_rows(), 0);
    assert!(table.field("segment").is_some());
}

// ── Streaming ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_insert_stream_publishes_every_batch() {
    let dir = TempDir::new().unwrap();
    let broker = Arc::new(InMemoryBroker::new());
    let writer = writer_with(
        Arc::new(LocalEngine::new(dir.path())),
        broker.clone(),
        Arc::new(VersionedTableStore::new()),
        &dir,
    );

    let stream = DatasetStream::from_batches(vec![rows(&[1, 2]), rows(&[3]), rows(&[4, 5])]);
    let options = StreamWriteOptions {
        await_termination: true,
        timeout: Some(Duration::from_secs(10)),
        ..StreamWriteOptions::default()
    };
    let query = writer
        .insert_stream(transactions(true), stream, options)
        .await
        .unwrap();
    assert_eq!(query.name(), "insert_stream_transactions_1_onlinefs");
    assert!(query.checkpoint_dir().starts_with(dir.path()));
    assert!(query.await_termination(None).await.unwrap());
    assert!(!query.is_active());

    let progress = query.progress();
    assert_eq!(progress.batch_id, 3);
    assert_eq!(progress.records_written, 5);
    assert_eq!(broker.topic_len("transactions_1_onlinefs"), 5);
    assert!(!dir.path().join("transactions_1").exists());
}

#[tokio::test]
async fn test_insert_stream_requires_online_storage() {
    let dir = TempDir::new().unwrap();
    let writer = writer_with(
        Arc::new(LocalEngine::new(dir.path())),
        Arc::new(InMemoryBroker::new()),
        Arc::new(VersionedTableStore::new()),
        &dir,
    );
    let err = writer
        .insert_stream(
            transactions(false),
            DatasetStream::from_batches(vec![rows(&[1])]),
            StreamWriteOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FeatureStoreError::Config(_)));
}

#[tokio::test]
async fn test_channel_stream_stops_on_request() {
    let dir = TempDir::new().unwrap();
    let broker = Arc::new(InMemoryBroker::new());
    let writer = writer_with(
        Arc::new(LocalEngine::new(dir.path())),
        broker.clone(),
        Arc::new(VersionedTableStore::new()),
        &dir,
    );
    let (tx, stream) = DatasetStream::channel(4);
    let query = writer
        .insert_stream(transactions(true), stream, StreamWriteOptions::default())
        .await
        .unwrap();

    tx.send(rows(&[7])).await.unwrap();
    assert!(!query.await_termination(Some(Duration::from_millis(200))).await.unwrap());
    query.stop().await.unwrap();
    assert!(!query.is_active());
    drop(tx);
    assert_eq!(broker.topic_len("transactions_1_onlinefs"), 1);
}

// ── Configuration ────────────────────────────────────────────────────

#[tokio::test]
async fn test_writer_from_config() {
    let dir = TempDir::new().unwrap();
    let mut config = MaterializerConfig::default();
    config.engine.warehouse_dir = dir.path().join("warehouse");
    config.streaming.checkpoint_root = Some(dir.path().join("checkpoints").to_string_lossy().to_string());
    config.validate().unwrap();

    let broker = Arc::new(InMemoryBroker::new());
    let writer = config.feature_group_writer(broker.clone(), Arc::new(VersionedTableStore::new()));
    writer
        .insert(WriteRequest::new(transactions(true), rows(&[1, 2])))
        .await
        .unwrap();
    assert!(dir.path().join("warehouse/transactions_1").is_dir());
    assert_eq!(broker.topic_len("transactions_1_onlinefs"), 2);

    let query = writer
        .insert_stream(
            transactions(true),
            DatasetStream::from_batches(vec![rows(&[3])]),
            config.streaming.stream_write_options(),
        )
        .await
        .unwrap();
    query.await_termination(None).await.unwrap();
    assert!(query.checkpoint_dir().starts_with(dir.path().join("checkpoints")));
}
