//! Online sink
//!
//! Rows are converted to the online wire format (see [`crate::schema::avro`])
//! and handed to a [`BrokerWriter`], either once per call or continuously by
//! a background [`StreamingQuery`] consuming a [`DatasetStream`].

use crate::dataset::Dataset;
use crate::engine::Options;
use crate::error::{FeatureStoreError, Result};
use crate::featurestore::FeatureGroupDescriptor;
use crate::schema::{encode_complex_fields, to_wire_format, EncodedRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

const OFFSETS_FILE: &str = "offsets.json";

/// Destination of encoded online records
#[async_trait]
pub trait BrokerWriter: Send + Sync {
    /// Publish one batch of records to `topic`
    async fn send(&self, topic: &str, records: Vec<EncodedRecord>, options: &Options) -> Result<()>;
}

/// How a streaming query emits results
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Append,
    Complete,
    Update,
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutputMode::Append => "append",
            OutputMode::Complete => "complete",
            OutputMode::Update => "update",
        };
        f.write_str(s)
    }
}

/// Unbounded source of micro-batches
#[derive(Debug)]
pub struct DatasetStream {
    pending: VecDeque<Dataset>,
    rx: mpsc::Receiver<Dataset>,
}

impl DatasetStream {
    /// A stream fed through the returned sender; it ends when the sender is dropped
    pub fn channel(buffer: usize) -> (mpsc::Sender<Dataset>, DatasetStream) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            tx,
            DatasetStream {
                pending: VecDeque::new(),
                rx,
            },
        )
    }

    /// A finite stream of the given batches
    pub fn from_batches(batches: impl IntoIterator<Item = Dataset>) -> DatasetStream {
        let (_, mut stream) = Self::channel(1);
        stream.pending.extend(batches);
        stream
    }

    async fn recv(&mut self) -> Option<Dataset> {
        match self.pending.pop_front() {
            Some(batch) => Some(batch),
            None => self.rx.recv().await,
        }
    }
}

/// Options of a streaming write
#[derive(Debug, Clone, Default)]
pub struct StreamWriteOptions {
    /// Query name; defaults to `insert_stream_{topic}`
    pub query_name: Option<String>,
    pub output_mode: OutputMode,
    /// Block the caller until the query ends or the timeout elapses
    pub await_termination: bool,
    pub timeout: Option<Duration>,
    /// Checkpoint directory; defaults to `{checkpoint_root}/{query}-checkpoint`
    pub checkpoint_dir: Option<PathBuf>,
    pub write_options: Options,
}

/// Progress of a streaming query, persisted as its checkpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamProgress {
    /// Id of the next batch
    pub batch_id: u64,
    pub records_written: u64,
    pub last_batch_at: Option<DateTime<Utc>>,
}

/// Handle to a running streaming write
pub struct StreamingQuery {
    name: String,
    id: Uuid,
    output_mode: OutputMode,
    checkpoint_dir: PathBuf,
    stop: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<Result<()>>>>,
    progress: Arc<RwLock<StreamProgress>>,
    active: Arc<AtomicBool>,
}

impl StreamingQuery {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn output_mode(&self) -> OutputMode {
        self.output_mode
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> StreamProgress {
        self.progress.read().clone()
    }

    /// Wait for the query to end
    ///
    /// Returns `Ok(false)` if the timeout elapsed first, `Ok(true)` once the
    /// query has ended, and the query's error if it failed.
    pub async fn await_termination(&self, timeout: Option<Duration>) -> Result<bool> {
        let mut guard = self.handle.lock().await;
        let Some(handle) = guard.as_mut() else {
            return Ok(true);
        };
        let joined = match timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => return Ok(false),
            },
            None => handle.await,
        };
        *guard = None;
        joined.map_err(|e| {
            FeatureStoreError::Sink(format!("streaming query {} aborted: {}", self.name, e))
        })??;
        Ok(true)
    }

    /// Signal the query to stop after the current batch and wait for it
    pub async fn stop(&self) -> Result<()> {
        self.stop.send_replace(true);
        self.await_termination(None).await.map(|_| ())
    }
}

impl fmt::Debug for StreamingQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingQuery")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// Writes feature group rows to the online store
#[derive(Clone)]
pub struct OnlineWriter {
    broker: Arc<dyn BrokerWriter>,
    kafka_options: Options,
    checkpoint_root: PathBuf,
}

impl OnlineWriter {
    pub fn new(broker: Arc<dyn BrokerWriter>) -> Self {
        Self {
            broker,
            kafka_options: Options::new(),
            checkpoint_root: std::env::temp_dir().join("feature-materializer"),
        }
    }

    /// Broker configuration, keys already carrying the `kafka.` prefix
    pub fn with_kafka_options(mut self, options: Options) -> Self {
        self.kafka_options = options;
        self
    }

    pub fn with_checkpoint_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.checkpoint_root = root.into();
        self
    }

    /// Broker options for a call; caller options win over broker configuration
    pub fn write_options(&self, caller: &Options) -> Options {
        let mut options = self.kafka_options.clone();
        options.extend(caller.iter().map(|(k, v)| (k.clone(), v.clone())));
        options
    }

    /// Encode rows into online records
    pub fn encode(feature_group: &FeatureGroupDescriptor, dataset: &Dataset) -> Result<Vec<EncodedRecord>> {
        let complex = feature_group.complex_features();
        let encoded = encode_complex_fields(dataset, &complex, feature_group)?;
        to_wire_format(&encoded, feature_group)
    }

    /// Encode and publish a dataset once, returning the number of records sent
    pub async fn write(
        &self,
        feature_group: &FeatureGroupDescriptor,
        dataset: &Dataset,
        options: &Options,
    ) -> Result<usize> {
        let records = Self::encode(feature_group, dataset)?;
        let count = records.len();
        let topic = feature_group.topic_name();
        self.broker
            .send(&topic, records, &self.write_options(options))
            .await?;
        info!(
            feature_group = %feature_group.table_name(),
            topic = %topic,
            records = count,
            "Wrote to online storage"
        );
        Ok(count)
    }

    /// Start a background query publishing every batch of `stream`
    ///
    /// Progress is checkpointed after each batch; a query started on an
    /// existing checkpoint continues its batch numbering.
    pub async fn start_stream(
        &self,
        feature_group: Arc<FeatureGroupDescriptor>,
        stream: DatasetStream,
        options: StreamWriteOptions,
    ) -> Result<StreamingQuery> {
        let topic = feature_group.topic_name();
        let name = options
            .query_name
            .clone()
            .unwrap_or_else(|| format!("insert_stream_{}", topic));
        let checkpoint_dir = options
            .checkpoint_dir
            .clone()
            .unwrap_or_else(|| self.checkpoint_root.join(format!("{}-checkpoint", name)));
        tokio::fs::create_dir_all(&checkpoint_dir).await?;
        let checkpoint_file = checkpoint_dir.join(OFFSETS_FILE);
        let resumed = load_checkpoint(&checkpoint_file).await?;

        let progress = Arc::new(RwLock::new(resumed));
        let active = Arc::new(AtomicBool::new(true));
        let (stop_tx, stop_rx) = watch::channel(false);
        let query = RunningQuery {
            name: name.clone(),
            topic,
            feature_group,
            broker: self.broker.clone(),
            options: self.write_options(&options.write_options),
            checkpoint_file,
            progress: progress.clone(),
        };
        let flag = active.clone();
        let handle = tokio::spawn(async move {
            let result = query.run(stream, stop_rx).await;
            flag.store(false, Ordering::SeqCst);
            result
        });
        info!(
            query = %name,
            output_mode = %options.output_mode,
            checkpoint = %checkpoint_dir.display(),
            "Started streaming query"
        );

        Ok(StreamingQuery {
            name,
            id: Uuid::new_v4(),
            output_mode: options.output_mode,
            checkpoint_dir,
            stop: stop_tx,
            handle: Mutex::new(Some(handle)),
            progress,
            active,
        })
    }
}

impl fmt::Debug for OnlineWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnlineWriter")
            .field("checkpoint_root", &self.checkpoint_root)
            .finish_non_exhaustive()
    }
}

async fn load_checkpoint(path: &Path) -> Result<StreamProgress> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(StreamProgress::default());
    }
    let raw = tokio::fs::read(path).await?;
    serde_json::from_slice(&raw).map_err(|e| {
        FeatureStoreError::storage_msg(format!(
            "corrupt checkpoint {}: {}",
            path.display(),
            e
        ))
    })
}

struct RunningQuery {
    name: String,
    topic: String,
    feature_group: Arc<FeatureGroupDescriptor>,
    broker: Arc<dyn BrokerWriter>,
    options: Options,
    checkpoint_file: PathBuf,
    progress: Arc<RwLock<StreamProgress>>,
}

impl RunningQuery {
    async fn run(self, mut stream: DatasetStream, mut stop: watch::Receiver<bool>) -> Result<()> {
        loop {
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        debug!(query = %self.name, "Streaming query stopped");
                        return Ok(());
                    }
                }
                batch = stream.recv() => {
                    let Some(batch) = batch else {
                        debug!(query = %self.name, "Stream exhausted");
                        return Ok(());
                    };
                    if let Err(e) = self.process(&batch).await {
                        error!(query = %self.name, error = %e, "Streaming batch failed");
                        return Err(e);
                    }
                }
            }
        }
    }

    async fn process(&self, batch: &Dataset) -> Result<()> {
        let records = OnlineWriter::encode(&self.feature_group, batch)?;
        let count = records.len() as u64;
        self.broker.send(&self.topic, records, &self.options).await?;

        let snapshot = {
            let mut progress = self.progress.write();
            progress.batch_id += 1;
            progress.records_written += count;
            progress.last_batch_at = Some(Utc::now());
            progress.clone()
        };
        tokio::fs::write(&self.checkpoint_file, serde_json::to_vec(&snapshot)?).await?;
        debug!(query = %self.name, batch_id = snapshot.batch_id, records = count, "Committed batch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DataType, Field, Value};
    use crate::featurestore::Feature;
    use crate::schema::decode_key;
    use crate::sink::InMemoryBroker;
    use tempfile::TempDir;

    fn fg() -> Arc<FeatureGroupDescriptor> {
        Arc::new(
            FeatureGroupDescriptor::builder("clicks", 1)
                .with_feature(Feature::new("user", "string").primary())
                .with_feature(Feature::new("count", "bigint"))
                .with_feature(Feature::new("tags", "array<string>"))
                .online_enabled(true)
                .build()
                .unwrap(),
        )
    }

    fn batch(users: &[&str]) -> Dataset {
        Dataset::new(
            vec![
                Field::new("user", DataType::String),
                Field::new("count", DataType::Long),
                Field::new("tags", DataType::Array(Box::new(DataType::String))),
            ],
            users
                .iter()
                .map(|u| {
                    vec![
                        Value::String(u.to_string()),
                        Value::Long(1),
                        Value::Array(vec![Value::String("a".into())]),
                    ]
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_caller_options_win() {
        let mut kafka = Options::new();
        kafka.insert("kafka.bootstrap.servers".into(), "broker:9092".into());
        kafka.insert("kafka.acks".into(), "1".into());
        let writer = OnlineWriter::new(Arc::new(InMemoryBroker::new())).with_kafka_options(kafka);
        let mut caller = Options::new();
        caller.insert("kafka.acks".into(), "all".into());
        let merged = writer.write_options(&caller);
        assert_eq!(merged.get("kafka.acks").map(String::as_str), Some("all"));
        assert_eq!(
            merged.get("kafka.bootstrap.servers").map(String::as_str),
            Some("broker:9092")
        );
    }

    #[tokio::test]
    async fn test_batch_write_encodes_complex_features() {
        let broker = Arc::new(InMemoryBroker::new());
        let writer = OnlineWriter::new(broker.clone());
        let fg = fg();
        let sent = writer.write(&fg, &batch(&["u1", "u2"]), &Options::new()).await.unwrap();
        assert_eq!(sent, 2);
        let records = broker.records("clicks_1_onlinefs");
        assert_eq!(decode_key(&records[1].key).unwrap(), "u2");
        let value = crate::schema::decode_value(&records[0].value, &fg).unwrap();
        assert_eq!(value[2].1, Value::Array(vec![Value::String("a".into())]));
    }

    #[tokio::test]
    async fn test_stream_checkpoints_and_resumes() {
        let dir = TempDir::new().unwrap();
        let broker = Arc::new(InMemoryBroker::new());
        let writer = OnlineWriter::new(broker.clone()).with_checkpoint_root(dir.path());

        let query = writer
            .start_stream(
                fg(),
                DatasetStream::from_batches(vec![batch(&["a"]), batch(&["b", "c"])]),
                StreamWriteOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(query.name(), "insert_stream_clicks_1_onlinefs");
        assert!(query.await_termination(Some(Duration::from_secs(5))).await.unwrap());
        assert!(!query.is_active());
        assert_eq!(query.progress().batch_id, 2);
        assert_eq!(query.progress().records_written, 3);
        assert!(dir
            .path()
            .join("insert_stream_clicks_1_onlinefs-checkpoint/offsets.json")
            .exists());

        let resumed = writer
            .start_stream(
                fg(),
                DatasetStream::from_batches(vec![batch(&["d"])]),
                StreamWriteOptions::default(),
            )
            .await
            .unwrap();
        resumed.await_termination(None).await.unwrap();
        assert_eq!(resumed.progress().batch_id, 3);
        assert_eq!(broker.topic_len("clicks_1_onlinefs"), 4);
    }

    #[tokio::test]
    async fn test_stop_and_timeout() {
        let dir = TempDir::new().unwrap();
        let writer = OnlineWriter::new(Arc::new(InMemoryBroker::new())).with_checkpoint_root(dir.path());
        let (tx, stream) = DatasetStream::channel(4);
        let query = writer
            .start_stream(
                fg(),
                stream,
                StreamWriteOptions {
                    query_name: Some("clicks_stream".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        tx.send(batch(&["x"])).await.unwrap();
        assert!(!query
            .await_termination(Some(Duration::from_millis(50)))
            .await
            .unwrap());
        assert!(query.is_active());
        query.stop().await.unwrap();
        assert!(!query.is_active());
        assert!(dir.path().join("clicks_stream-checkpoint").is_dir());
    }

    #[tokio::test]
    async fn test_failed_batch_surfaces_error() {
        let dir = TempDir::new().unwrap();
        let writer = OnlineWriter::new(Arc::new(InMemoryBroker::new())).with_checkpoint_root(dir.path());
        let bad = batch(&["x"]).select(&["count", "tags"]).unwrap();
        let query = writer
            .start_stream(fg(), DatasetStream::from_batches(vec![bad]), StreamWriteOptions::default())
            .await
            .unwrap();
        let err = query.await_termination(None).await.unwrap_err();
        assert!(matches!(err, FeatureStoreError::Codec(_)));
    }
}
