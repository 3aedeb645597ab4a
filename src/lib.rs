#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! # Feature Materializer
//!
//! The write-side core of a feature store: it takes a tabular dataset and
//! lands it in the right storage layers in the right encodings.
//!
//! ## Features
//!
//! - **Dual-sink writes**: feature group rows go to an offline table, a
//!   time-travel table or the online broker, as the group's routing demands
//! - **Avro wire format**: complex columns are serialized and every row is
//!   keyed by its primary key for the online store
//! - **Training datasets**: random splits, statistics from the train split and
//!   builtin transformation functions bound to those statistics
//! - **Storage connectors**: S3, ADLS and GCS credentials become call-scoped
//!   engine settings, never process-wide state
//! - **Streaming**: micro-batch writes to the broker with checkpointed progress
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use feature_materializer::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> feature_materializer::Result<()> {
//! let config = MaterializerConfig::load_default()?;
//! let writer = config.feature_group_writer(
//!     Arc::new(InMemoryBroker::new()),
//!     Arc::new(VersionedTableStore::new()),
//! );
//!
//! let fg = Arc::new(
//!     FeatureGroupDescriptor::builder("transactions", 1)
//!         .with_feature(Feature::new("id", "bigint").primary())
//!         .with_feature(Feature::new("amount", "double"))
//!         .online_enabled(true)
//!         .build()?,
//! );
//! let dataset = Dataset::new(
//!     vec![Field::new("id", DataType::Long), Field::new("amount", DataType::Double)],
//!     vec![vec![Value::Long(1), Value::Double(9.5)]],
//! )?;
//! let outcome = writer.insert(WriteRequest::new(fg, dataset)).await?;
//! println!("{}", outcome.plan);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`dataset`]: in-memory tabular data and input normalization
//! - [`featurestore`]: metadata, validation, statistics, transformations and
//!   training dataset materialization
//! - [`sink`]: feature group write routing and the offline and online sinks
//! - [`schema`]: Avro encoding and positional schema matching
//! - [`engine`]: the execution engine boundary and a local filesystem engine
//! - [`connector`]: storage connector configuration
//! - [`config`] and [`tracing`]: ambient configuration and logging

#![cfg_attr(not(test), deny(clippy::unwrap_used))]

pub mod config;
pub mod connector;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod featurestore;
pub mod schema;
pub mod sink;
pub mod tracing;

pub use config::MaterializerConfig;
pub use error::{FeatureStoreError, Result, SchemaError};

/// Commonly used types
pub mod prelude {
    pub use crate::config::MaterializerConfig;
    pub use crate::connector::{ConnectorAdapter, EngineConf, StorageConnector};
    pub use crate::dataset::{DataFrameInput, DataType, Dataset, Field, Value};
    pub use crate::engine::{DataFormat, ExecutionEngine, LocalEngine, Options, SaveMode};
    pub use crate::error::{FeatureStoreError, Result};
    pub use crate::featurestore::{
        Feature, FeatureGroupDescriptor, TrainingDatasetDescriptor, TrainingDatasetFeature,
        TrainingDatasetWriter, TransformationFunctionRef,
    };
    pub use crate::sink::{
        FeatureGroupWriter, InMemoryBroker, Storage, VersionedTableStore, WriteOperation,
        WriteRequest,
    };
}
