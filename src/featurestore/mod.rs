//! Feature store metadata and training dataset materialization
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                  TRAINING DATASET MATERIALIZATION                │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  DataFrameInput ──► normalize ──► schema match ──► random split  │
//! │                                                        │         │
//! │                                      train split ──────┤         │
//! │                                            ▼           │         │
//! │                                 ┌────────────────────┐ │         │
//! │                                 │ StatisticsEngine   │ │         │
//! │                                 │ (computed once)    │ │         │
//! │                                 └─────────┬──────────┘ │         │
//! │                                           ▼            ▼         │
//! │  per split:  populate builtins ──► apply projections ──► write   │
//! │                                   (single pass, re-sorted)       │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Feature group metadata ([`FeatureGroupDescriptor`]) lives here too; the
//! write path for feature groups is in [`crate::sink`].

pub mod feature;
pub mod feature_group;
pub mod pipeline;
pub mod statistics;
pub mod training_dataset;
pub mod transformations;
pub mod validation;

pub use feature::{Feature, TrainingDatasetFeature};
pub use feature_group::{
    infer_avro_schema, FeatureGroupBuilder, FeatureGroupDescriptor, TimeTravelFormat,
};
pub use pipeline::{MaterializationResult, SplitOutput, TrainingDatasetWriter};
pub use statistics::{
    ColumnStatistics, LocalProfiler, ProfilingEngine, Statistics, StatisticsConfig,
    StatisticsContent, StatisticsEngine,
};
pub use training_dataset::{TrainingDatasetBuilder, TrainingDatasetDescriptor};
pub use transformations::{
    BuiltinTransformation, CustomFn, TransformationEngine, TransformationFunctionRef,
    TransformationKind,
};
pub use validation::{
    Expectation, LocalValidator, Rule, RuleLevel, RuleResult, ValidationEngine,
    ValidationReport, ValidationStatus, ValidationType,
};
