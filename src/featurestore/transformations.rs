//! Feature Transformations
//!
//! Transformation functions attached to training dataset features. Builtin
//! functions (scalers and the label encoder) are parameterized from
//! statistics of the training data; custom functions are plain closures.
//!
//! Order of operations per materialization call:
//! 1. [`TransformationEngine::builtin_features`] finds the features that need statistics
//! 2. statistics are computed once, on the training split
//! 3. [`TransformationEngine::populate_builtin_attached_fns`] builds the function registry
//! 4. [`TransformationEngine::apply`] projects every column in one pass and restores the
//!    declared feature order

use super::statistics::{ColumnStatistics, Statistics};
use super::TrainingDatasetDescriptor;
use crate::dataset::{DataType, Dataset, FunctionRegistry, Projection, ScalarFunction, Value};
use crate::error::{FeatureStoreError, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// User-supplied scalar transformation
pub type CustomFn = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// Transformation functions that need statistics to be parameterized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinTransformation {
    /// `(v - min) / (max - min)`
    MinMaxScaler,
    /// `(v - mean) / std_dev`
    StandardScaler,
    /// `(v - p50) / (p75 - p25)`
    RobustScaler,
    /// Index of the value among the sorted distinct values
    LabelEncoder,
}

impl BuiltinTransformation {
    /// Resolve a builtin by its registered name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "min_max_scaler" => Some(Self::MinMaxScaler),
            "standard_scaler" => Some(Self::StandardScaler),
            "robust_scaler" => Some(Self::RobustScaler),
            "label_encoder" => Some(Self::LabelEncoder),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::MinMaxScaler => "min_max_scaler",
            Self::StandardScaler => "standard_scaler",
            Self::RobustScaler => "robust_scaler",
            Self::LabelEncoder => "label_encoder",
        }
    }

    pub fn output_type(&self) -> DataType {
        match self {
            Self::LabelEncoder => DataType::Int,
            _ => DataType::Double,
        }
    }

    /// Bind the builtin to the statistics of one column
    fn parameterize(&self, feature: &str, stats: &ColumnStatistics) -> Result<BuiltinParams> {
        let missing = |what: &str| {
            FeatureStoreError::Config(format!(
                "Statistics for feature `{}` have no {}, cannot parameterize {}",
                feature,
                what,
                self.name()
            ))
        };
        Ok(match self {
            Self::MinMaxScaler => BuiltinParams::MinMax {
                min: stats.min.ok_or_else(|| missing("min"))?,
                max: stats.max.ok_or_else(|| missing("max"))?,
            },
            Self::StandardScaler => BuiltinParams::Standard {
                mean: stats.mean.ok_or_else(|| missing("mean"))?,
                std_dev: stats.std_dev.ok_or_else(|| missing("std_dev"))?,
            },
            Self::RobustScaler => {
                let p = &stats.percentiles;
                if p.len() < 75 {
                    return Err(missing("percentiles"));
                }
                BuiltinParams::Robust {
                    p25: p[24],
                    p50: p[49],
                    p75: p[74],
                }
            }
            Self::LabelEncoder => {
                let mut values = stats.unique_values.clone();
                values.sort();
                values.dedup();
                BuiltinParams::Labels(
                    values
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| (v, i as i32))
                        .collect(),
                )
            }
        })
    }
}

impl fmt::Display for BuiltinTransformation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// What a transformation function reference resolves to
#[derive(Clone)]
pub enum TransformationKind {
    Builtin(BuiltinTransformation),
    Custom(CustomFn),
}

impl fmt::Debug for TransformationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformationKind::Builtin(b) => f.debug_tuple("Builtin").field(b).finish(),
            TransformationKind::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Identity of a transformation function attached to a feature
#[derive(Debug, Clone)]
pub struct TransformationFunctionRef {
    pub name: String,
    pub version: u32,
    pub output_type: DataType,
    pub kind: TransformationKind,
}

impl TransformationFunctionRef {
    /// Reference a builtin function by name
    pub fn builtin(name: &str, version: u32) -> Result<Self> {
        let builtin = BuiltinTransformation::from_name(name).ok_or_else(|| {
            FeatureStoreError::Config(format!("Unknown builtin transformation function: {}", name))
        })?;
        Ok(Self {
            name: name.to_string(),
            version,
            output_type: builtin.output_type(),
            kind: TransformationKind::Builtin(builtin),
        })
    }

    /// Wrap a user function
    pub fn custom<F>(name: impl Into<String>, version: u32, output_type: DataType, f: F) -> Self
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            version,
            output_type,
            kind: TransformationKind::Custom(Arc::new(f)),
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self.kind, TransformationKind::Builtin(_))
    }

    /// `{name}_{version}`
    pub fn registration_name(&self) -> String {
        format!("{}_{}", self.name, self.version)
    }

    /// Registry name of this function bound to one feature
    ///
    /// Builtins carry per-feature parameters, so two features sharing the same
    /// builtin get separate registrations.
    pub fn attached_name(&self, feature: &str) -> String {
        format!("{}_{}", self.registration_name(), feature)
    }
}

#[derive(Debug, Clone)]
enum BuiltinParams {
    MinMax { min: f64, max: f64 },
    Standard { mean: f64, std_dev: f64 },
    Robust { p25: f64, p50: f64, p75: f64 },
    Labels(HashMap<String, i32>),
}

/// A builtin bound to its parameters
#[derive(Debug, Clone)]
struct BoundBuiltin {
    feature: String,
    params: BuiltinParams,
}

fn scale(v: f64, offset: f64, divisor: f64) -> f64 {
    if divisor == 0.0 {
        0.0
    } else {
        (v - offset) / divisor
    }
}

impl BoundBuiltin {
    fn numeric(&self, value: &Value) -> Result<f64> {
        value.as_f64().ok_or_else(|| {
            FeatureStoreError::InvalidData(format!(
                "feature `{}` holds non-numeric value {}",
                self.feature, value
            ))
        })
    }
}

impl ScalarFunction for BoundBuiltin {
    fn invoke(&self, value: &Value) -> Result<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        let out = match &self.params {
            // Values never seen in the training data have no index
            BuiltinParams::Labels(index) => {
                return Ok(value
                    .cast_to_string()
                    .and_then(|s| index.get(&s).copied())
                    .map(Value::Int)
                    .unwrap_or(Value::Null))
            }
            BuiltinParams::MinMax { min, max } => scale(self.numeric(value)?, *min, max - min),
            BuiltinParams::Standard { mean, std_dev } => {
                scale(self.numeric(value)?, *mean, *std_dev)
            }
            BuiltinParams::Robust { p25, p50, p75 } => {
                scale(self.numeric(value)?, *p50, p75 - p25)
            }
        };
        Ok(Value::Double(out))
    }

    fn output_type(&self) -> DataType {
        match self.params {
            BuiltinParams::Labels(_) => DataType::Int,
            _ => DataType::Double,
        }
    }
}

struct CustomScalar {
    function: CustomFn,
    output_type: DataType,
}

impl ScalarFunction for CustomScalar {
    fn invoke(&self, value: &Value) -> Result<Value> {
        (self.function)(value)
    }

    fn output_type(&self) -> DataType {
        self.output_type.clone()
    }
}

/// Transformation engine for applying training dataset transformation functions
#[derive(Debug, Default, Clone)]
pub struct TransformationEngine;

impl TransformationEngine {
    /// Create a new transformation engine
    pub fn new() -> Self {
        Self
    }

    /// Features whose attached function is a builtin, in name order
    pub fn builtin_features(
        &self,
        functions: &BTreeMap<String, TransformationFunctionRef>,
    ) -> Vec<String> {
        functions
            .iter()
            .filter(|(_, f)| f.is_builtin())
            .map(|(feature, _)| feature.clone())
            .collect()
    }

    /// Bind every attached function and register it for projection
    ///
    /// `statistics` may only be `None` when no builtin function is attached.
    pub fn populate_builtin_attached_fns(
        &self,
        functions: &BTreeMap<String, TransformationFunctionRef>,
        statistics: Option<&Statistics>,
    ) -> Result<FunctionRegistry> {
        let mut registry = FunctionRegistry::new();
        for (feature, function) in functions {
            let scalar: Arc<dyn ScalarFunction> = match &function.kind {
                TransformationKind::Builtin(builtin) => {
                    let column = statistics.and_then(|s| s.column(feature)).ok_or_else(|| {
                        FeatureStoreError::Config(format!(
                            "No statistics available for feature `{}` required by {}",
                            feature,
                            function.registration_name()
                        ))
                    })?;
                    Arc::new(BoundBuiltin {
                        feature: feature.clone(),
                        params: builtin.parameterize(feature, column)?,
                    })
                }
                TransformationKind::Custom(f) => Arc::new(CustomScalar {
                    function: Arc::clone(f),
                    output_type: function.output_type.clone(),
                }),
            };
            registry.register(function.attached_name(feature), scalar);
        }
        Ok(registry)
    }

    /// Apply all attached functions and restore declared feature order
    pub fn apply(
        &self,
        td: &TrainingDatasetDescriptor,
        dataset: &Dataset,
        registry: &FunctionRegistry,
    ) -> Result<Dataset> {
        let mut projections = Vec::with_capacity(dataset.num_columns());
        for (feature, function) in &td.transformation_functions {
            if dataset.column_index(feature).is_none() {
                return Err(FeatureStoreError::Config(format!(
                    "Transformation function {} is attached to `{}`, which is not in the dataset",
                    function.registration_name(),
                    feature
                )));
            }
            projections.push(Projection::call(function.attached_name(feature), feature.clone()));
        }
        projections.extend(
            dataset
                .columns()
                .into_iter()
                .filter(|c| !td.transformation_functions.contains_key(*c))
                .map(Projection::passthrough),
        );
        debug!(
            training_dataset = %td.name,
            projections = %projections
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
            "Applying transformation functions"
        );

        let transformed = dataset.select_expr(&projections, registry)?;

        if transformed.num_rows() != dataset.num_rows() {
            return Err(FeatureStoreError::Config(format!(
                "Transformation changed the row count from {} to {}",
                dataset.num_rows(),
                transformed.num_rows()
            )));
        }
        let declared: BTreeSet<&str> = td.features.iter().map(|f| f.name.as_str()).collect();
        let produced: BTreeSet<&str> = transformed.columns().into_iter().collect();
        if declared != produced {
            return Err(FeatureStoreError::Config(format!(
                "Transformation output arity mismatch: declared {} features {:?}, produced {} columns {:?}",
                declared.len(),
                declared,
                produced.len(),
                produced
            )));
        }

        let sorted = td.sorted_features();
        let ordered: Vec<&str> = sorted.iter().map(|f| f.name.as_str()).collect();
        transformed.select(&ordered)
    }
}
