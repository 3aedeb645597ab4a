//! Feature group writes
//!
//! A write of a feature group lands in up to two sinks:
//!
//! ```text
//!                      ┌──────────────┐
//!   WriteRequest ────► │    route     │ ── RoutePlan
//!                      └──────┬───────┘
//!              ┌──────────────┴──────────────┐
//!              ▼ (1)                         ▼ (2, only after 1 succeeded)
//!      ┌───────────────┐             ┌───────────────┐
//!      │ OfflineWriter │             │ OnlineWriter  │
//!      │ Hive table or │             │ Avro records  │
//!      │ time travel   │             │ to the broker │
//!      └───────────────┘             └───────────────┘
//! ```
//!
//! The sinks are not transactionally coupled. A failing leg surfaces as
//! [`FeatureStoreError::WriteFailure`] with the leg's error as its source. If
//! the offline leg fails the online leg is not attempted; if the online leg
//! fails the offline commit stays, and the caller may retry with
//! `storage = Some(Storage::Online)`.

pub mod broker;
pub mod offline;
pub mod online;
pub mod router;
pub mod time_travel;

pub use broker::InMemoryBroker;
pub use offline::OfflineWriter;
pub use online::{
    BrokerWriter, DatasetStream, OnlineWriter, OutputMode, StreamProgress, StreamWriteOptions,
    StreamingQuery,
};
pub use router::{route, RoutePlan};
pub use time_travel::{CommitDetails, CommitKind, TimeTravelEngine, VersionedTableStore};

use crate::dataset::{get_empty_appended_dataframe, DataFrameInput, Dataset, Field};
use crate::engine::Options;
use crate::error::{FeatureStoreError, Result};
use crate::featurestore::statistics::{Statistics, StatisticsEngine};
use crate::featurestore::validation::{
    LocalValidator, ValidationEngine, ValidationReport, ValidationType,
};
use crate::featurestore::{Feature, FeatureGroupDescriptor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Storage layer of a feature group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Storage {
    Offline,
    Online,
}

impl fmt::Display for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Storage::Offline => f.write_str("offline"),
            Storage::Online => f.write_str("online"),
        }
    }
}

impl FromStr for Storage {
    type Err = FeatureStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "offline" => Ok(Storage::Offline),
            "online" => Ok(Storage::Online),
            other => Err(FeatureStoreError::Config(format!(
                "unknown storage `{}`, expected `offline` or `online`",
                other
            ))),
        }
    }
}

/// How rows are merged into the offline store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOperation {
    #[default]
    Append,
    Upsert,
    Overwrite,
    BulkInsert,
}

impl fmt::Display for WriteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WriteOperation::Append => "append",
            WriteOperation::Upsert => "upsert",
            WriteOperation::Overwrite => "overwrite",
            WriteOperation::BulkInsert => "bulk_insert",
        };
        f.write_str(s)
    }
}

impl FromStr for WriteOperation {
    type Err = FeatureStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "append" | "insert" => Ok(WriteOperation::Append),
            "upsert" => Ok(WriteOperation::Upsert),
            "overwrite" => Ok(WriteOperation::Overwrite),
            "bulk_insert" => Ok(WriteOperation::BulkInsert),
            other => Err(FeatureStoreError::Config(format!(
                "unknown write operation: {}",
                other
            ))),
        }
    }
}

/// One write of a feature group
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub dataset: Dataset,
    pub feature_group: Arc<FeatureGroupDescriptor>,
    pub operation: WriteOperation,
    /// Explicit destination; `None` lets the router decide
    pub storage: Option<Storage>,
    pub offline_options: Options,
    pub online_options: Options,
    /// Forwarded to the time-travel engine with the offline commit
    pub validation_id: Option<String>,
}

impl WriteRequest {
    pub fn new(feature_group: Arc<FeatureGroupDescriptor>, dataset: Dataset) -> Self {
        Self {
            dataset,
            feature_group,
            operation: WriteOperation::default(),
            storage: None,
            offline_options: Options::new(),
            online_options: Options::new(),
            validation_id: None,
        }
    }

    pub fn with_operation(mut self, operation: WriteOperation) -> Self {
        self.operation = operation;
        self
    }

    pub fn with_storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_offline_options(mut self, options: Options) -> Self {
        self.offline_options = options;
        self
    }

    pub fn with_online_options(mut self, options: Options) -> Self {
        self.online_options = options;
        self
    }
}

/// What a write did
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub plan: RoutePlan,
    pub offline_written: bool,
    /// Records published online, if the online leg ran
    pub online_records: Option<usize>,
    pub validation: Option<ValidationReport>,
    pub statistics: Option<Statistics>,
}

impl WriteOutcome {
    fn new(plan: RoutePlan) -> Self {
        Self {
            plan,
            offline_written: false,
            online_records: None,
            validation: None,
            statistics: None,
        }
    }
}

/// Orchestrates validation, routing and the sink legs of feature group writes
#[derive(Clone)]
pub struct FeatureGroupWriter {
    offline: OfflineWriter,
    online: OnlineWriter,
    validator: Arc<dyn ValidationEngine>,
    statistics: StatisticsEngine,
}

impl FeatureGroupWriter {
    pub fn new(offline: OfflineWriter, online: OnlineWriter) -> Self {
        Self {
            offline,
            online,
            validator: Arc::new(LocalValidator::new()),
            statistics: StatisticsEngine::default(),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn ValidationEngine>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_statistics_engine(mut self, statistics: StatisticsEngine) -> Self {
        self.statistics = statistics;
        self
    }

    /// Validate, then write
    ///
    /// Validation runs only when the group's validation type is not `None`.
    /// A report the validation type rejects aborts the write before any sink
    /// is touched.
    pub async fn insert(&self, mut request: WriteRequest) -> Result<WriteOutcome> {
        let fg = request.feature_group.clone();
        let mut report = None;
        if fg.validation_type != ValidationType::None {
            let validation = self
                .validator
                .validate(&fg, &request.dataset, &fg.expectations)
                .await?;
            if fg.validation_type.rejects(validation.status) {
                let failed: Vec<&str> = validation.failures().map(|r| r.rule.as_str()).collect();
                return Err(FeatureStoreError::Validation(format!(
                    "feature group {} failed validation with status {}: {}",
                    fg.table_name(),
                    validation.status,
                    failed.join(", ")
                )));
            }
            request.validation_id = Some(validation.validation_id.clone());
            report = Some(validation);
        }

        let mut outcome = self.save_dataframe(&request).await?;
        outcome.validation = report;
        if outcome.offline_written {
            outcome.statistics = self
                .statistics
                .compute_statistics(&request.dataset, &fg.statistics_config)
                .await?;
        }
        Ok(outcome)
    }

    /// First write of a feature group from any accepted input
    ///
    /// Time-travel groups are bulk inserted, others appended.
    pub async fn save(
        &self,
        feature_group: Arc<FeatureGroupDescriptor>,
        input: DataFrameInput,
        offline_options: Options,
        online_options: Options,
    ) -> Result<WriteOutcome> {
        let dataset = input.normalize()?;
        let operation = if feature_group.is_time_travel() {
            WriteOperation::BulkInsert
        } else {
            WriteOperation::Append
        };
        let request = WriteRequest::new(feature_group.clone(), dataset)
            .with_operation(operation)
            .with_offline_options(offline_options)
            .with_online_options(online_options);
        let mut outcome = self.save_dataframe(&request).await?;
        if outcome.offline_written {
            outcome.statistics = self
                .statistics
                .compute_statistics(&request.dataset, &feature_group.statistics_config)
                .await?;
        }
        Ok(outcome)
    }

    /// Route a write and run its legs in order
    pub async fn save_dataframe(&self, request: &WriteRequest) -> Result<WriteOutcome> {
        let fg = &request.feature_group;
        let plan = route(fg, request.storage, false)?;
        info!(
            feature_group = %fg.table_name(),
            plan = %plan,
            operation = %request.operation,
            rows = request.dataset.num_rows(),
            "Writing feature group"
        );

        let mut outcome = WriteOutcome::new(plan);
        for leg in plan.legs() {
            match leg {
                Storage::Offline => {
                    if let Err(e) = self
                        .offline
                        .write(
                            fg,
                            &request.dataset,
                            request.operation,
                            &request.offline_options,
                            request.validation_id.as_deref(),
                        )
                        .await
                    {
                        error!(
                            feature_group = %fg.table_name(),
                            error = %e,
                            skipped_online = plan.writes_online(),
                            "Offline write failed"
                        );
                        return Err(FeatureStoreError::write_failure(e));
                    }
                    outcome.offline_written = true;
                }
                Storage::Online => {
                    match self
                        .online
                        .write(fg, &request.dataset, &request.online_options)
                        .await
                    {
                        Ok(records) => outcome.online_records = Some(records),
                        Err(e) => {
                            if outcome.offline_written {
                                warn!(
                                    feature_group = %fg.table_name(),
                                    error = %e,
                                    "Online write failed after offline commit, offline data is kept"
                                );
                            } else {
                                error!(feature_group = %fg.table_name(), error = %e, "Online write failed");
                            }
                            return Err(FeatureStoreError::write_failure(e));
                        }
                    }
                }
            }
        }
        Ok(outcome)
    }

    /// Add empty columns for new features to the offline table
    pub async fn append_features(
        &self,
        feature_group: Arc<FeatureGroupDescriptor>,
        dataset: &Dataset,
        new_features: &[Feature],
    ) -> Result<WriteOutcome> {
        let fields = new_features
            .iter()
            .map(|f| Ok(Field::new(f.name.clone(), f.data_type()?)))
            .collect::<Result<Vec<_>>>()?;
        let empty = get_empty_appended_dataframe(dataset, &fields)?;
        let request = WriteRequest::new(feature_group, empty)
            .with_operation(WriteOperation::Upsert)
            .with_storage(Storage::Offline);
        self.save_dataframe(&request).await
    }

    /// Start a streaming write to the online store
    ///
    /// Streams are not validated. With `await_termination` set the call
    /// blocks until the query ends or the timeout elapses.
    pub async fn insert_stream(
        &self,
        feature_group: Arc<FeatureGroupDescriptor>,
        stream: DatasetStream,
        options: StreamWriteOptions,
    ) -> Result<StreamingQuery> {
        if !feature_group.online_enabled {
            return Err(FeatureStoreError::Config(format!(
                "Online storage is not enabled for feature group {}. Streams can only be written to the online storage.",
                feature_group.table_name()
            )));
        }
        if feature_group.validation_type != ValidationType::None {
            warn!(
                feature_group = %feature_group.table_name(),
                validation_type = ?feature_group.validation_type,
                "Stream ingestion is not validated, skipping validation"
            );
        }
        let plan = route(&feature_group, Some(Storage::Online), true)?;
        info!(feature_group = %feature_group.table_name(), plan = %plan, "Starting stream ingestion");

        let await_termination = options.await_termination;
        let timeout = options.timeout;
        let query = self.online.start_stream(feature_group, stream, options).await?;
        if await_termination {
            query.await_termination(timeout).await?;
        }
        Ok(query)
    }
}

impl fmt::Debug for FeatureGroupWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureGroupWriter")
            .field("online", &self.online)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_storage_and_operation() {
        assert_eq!("ONLINE".parse::<Storage>().unwrap(), Storage::Online);
        assert!("both".parse::<Storage>().is_err());
        assert_eq!(
            "bulk_insert".parse::<WriteOperation>().unwrap(),
            WriteOperation::BulkInsert
        );
        assert_eq!("insert".parse::<WriteOperation>().unwrap(), WriteOperation::Append);
        assert_eq!(WriteOperation::Upsert.to_string(), "upsert");
    }
}
