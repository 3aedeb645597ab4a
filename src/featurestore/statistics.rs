//! Descriptive statistics
//!
//! Statistics feed the builtin transformation functions of a training dataset
//! and are optionally computed after a feature group insert. Profiling itself
//! sits behind [`ProfilingEngine`]; [`LocalProfiler`] computes everything in
//! process from a [`Dataset`].

use super::TrainingDatasetDescriptor;
use crate::dataset::{Dataset, Value};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Number of approximate percentiles kept per column
pub const PERCENTILE_COUNT: usize = 100;

/// Statistics settings of a feature group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticsConfig {
    /// Compute descriptive statistics after inserts
    pub enabled: bool,
    /// Include histograms
    pub histograms: bool,
    /// Include pairwise correlations
    pub correlations: bool,
    /// Count distinct values exactly
    pub exact_uniqueness: bool,
    /// Restrict to these columns; empty means all
    pub columns: Vec<String>,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            histograms: false,
            correlations: false,
            exact_uniqueness: false,
            columns: Vec::new(),
        }
    }
}

/// One histogram bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: u64,
}

/// Pearson correlation with another column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub column: String,
    pub correlation: f64,
}

/// Profile of a single column
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnStatistics {
    pub column: String,
    pub count: u64,
    pub num_nulls: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
    /// `percentiles[i]` is the `(i + 1) / 100` quantile; empty for non-numeric columns
    pub percentiles: Vec<f64>,
    pub distinct_count: u64,
    /// Sorted distinct values, string cast; only with exact uniqueness
    pub unique_values: Vec<String>,
    pub histogram: Vec<HistogramBin>,
    pub correlations: Vec<Correlation>,
}

/// Profile of a dataset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsContent {
    pub columns: Vec<ColumnStatistics>,
}

/// Statistics computed at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// Milliseconds since epoch
    pub commit_time: i64,
    pub content: StatisticsContent,
}

impl Statistics {
    pub fn new(content: StatisticsContent) -> Self {
        Self {
            commit_time: chrono::Utc::now().timestamp_millis(),
            content,
        }
    }

    /// Statistics of one column
    pub fn column(&self, name: &str) -> Option<&ColumnStatistics> {
        self.content.columns.iter().find(|c| c.column == name)
    }
}

/// Computes dataset profiles
#[async_trait]
pub trait ProfilingEngine: Send + Sync {
    async fn profile(
        &self,
        dataset: &Dataset,
        columns: &[String],
        correlations: bool,
        histograms: bool,
        exact_uniqueness: bool,
    ) -> Result<StatisticsContent>;
}

/// In-process profiler
#[derive(Debug, Clone)]
pub struct LocalProfiler {
    histogram_bins: usize,
}

impl Default for LocalProfiler {
    fn default() -> Self {
        Self { histogram_bins: 20 }
    }
}

impl LocalProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_histogram_bins(mut self, bins: usize) -> Self {
        self.histogram_bins = bins.max(1);
        self
    }

    fn profile_column(
        &self,
        name: &str,
        values: &[&Value],
        histograms: bool,
        exact_uniqueness: bool,
    ) -> ColumnStatistics {
        let num_nulls = values.iter().filter(|v| v.is_null()).count() as u64;
        let mut numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
        numbers.sort_by(f64::total_cmp);

        let distinct: BTreeSet<String> = values.iter().filter_map(|v| v.cast_to_string()).collect();

        let mut stats = ColumnStatistics {
            column: name.to_string(),
            count: values.len() as u64,
            num_nulls,
            distinct_count: distinct.len() as u64,
            ..Default::default()
        };
        if exact_uniqueness {
            stats.unique_values = distinct.into_iter().collect();
        }

        if numbers.is_empty() {
            return stats;
        }
        let n = numbers.len() as f64;
        let mean = numbers.iter().sum::<f64>() / n;
        let std_dev = if numbers.len() < 2 {
            0.0
        } else {
            (numbers.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        };
        stats.min = numbers.first().copied();
        stats.max = numbers.last().copied();
        stats.mean = Some(mean);
        stats.std_dev = Some(std_dev);
        stats.percentiles = (1..=PERCENTILE_COUNT)
            .map(|i| nearest_rank(&numbers, i, PERCENTILE_COUNT))
            .collect();
        if histograms {
            stats.histogram = self.histogram(&numbers);
        }
        stats
    }

    fn histogram(&self, sorted: &[f64]) -> Vec<HistogramBin> {
        let (min, max) = match (sorted.first(), sorted.last()) {
            (Some(min), Some(max)) => (*min, *max),
            _ => return Vec::new(),
        };
        let width = (max - min) / self.histogram_bins as f64;
        let mut bins: Vec<HistogramBin> = (0..self.histogram_bins)
            .map(|i| HistogramBin {
                lower: min + width * i as f64,
                upper: min + width * (i + 1) as f64,
                count: 0,
            })
            .collect();
        for v in sorted {
            let idx = if width > 0.0 {
                (((v - min) / width) as usize).min(self.histogram_bins - 1)
            } else {
                0
            };
            bins[idx].count += 1;
        }
        bins
    }
}

/// Nearest-rank quantile `numerator / denominator` of a sorted, non-empty slice
fn nearest_rank(sorted: &[f64], numerator: usize, denominator: usize) -> f64 {
    let rank = (numerator * sorted.len()).div_ceil(denominator);
    sorted[rank.clamp(1, sorted.len()) - 1]
}

fn pearson(a: &[Option<f64>], b: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let cov: f64 = pairs.iter().map(|(x, y)| (x - mx) * (y - my)).sum();
    let vx: f64 = pairs.iter().map(|(x, _)| (x - mx).powi(2)).sum();
    let vy: f64 = pairs.iter().map(|(_, y)| (y - my).powi(2)).sum();
    if vx == 0.0 || vy == 0.0 {
        return None;
    }
    Some(cov / (vx.sqrt() * vy.sqrt()))
}

#[async_trait]
impl ProfilingEngine for LocalProfiler {
    async fn profile(
        &self,
        dataset: &Dataset,
        columns: &[String],
        correlations: bool,
        histograms: bool,
        exact_uniqueness: bool,
    ) -> Result<StatisticsContent> {
        let names: Vec<String> = if columns.is_empty() {
            dataset.columns().iter().map(|c| c.to_string()).collect()
        } else {
            columns.to_vec()
        };

        let mut profiles = Vec::with_capacity(names.len());
        let mut numeric: Vec<(String, Vec<Option<f64>>)> = Vec::new();
        for name in &names {
            let values = dataset.column_values(name)?;
            profiles.push(self.profile_column(name, &values, histograms, exact_uniqueness));
            if correlations {
                numeric.push((name.clone(), values.iter().map(|v| v.as_f64()).collect()));
            }
        }

        if correlations {
            for (i, profile) in profiles.iter_mut().enumerate() {
                for (j, (other, values)) in numeric.iter().enumerate() {
                    if i == j {
                        continue;
                    }
                    if let Some(c) = pearson(&numeric[i].1, values) {
                        profile.correlations.push(Correlation {
                            column: other.clone(),
                            correlation: c,
                        });
                    }
                }
            }
        }

        Ok(StatisticsContent { columns: profiles })
    }
}

/// Drives the profiling engine for the write core
#[derive(Clone)]
pub struct StatisticsEngine {
    profiler: Arc<dyn ProfilingEngine>,
}

impl Default for StatisticsEngine {
    fn default() -> Self {
        Self::new(Arc::new(LocalProfiler::new()))
    }
}

impl StatisticsEngine {
    pub fn new(profiler: Arc<dyn ProfilingEngine>) -> Self {
        Self { profiler }
    }

    /// Statistics that parameterize builtin transformation functions
    ///
    /// Correlations and histograms are skipped; uniqueness is exact because
    /// label encoders need the full set of distinct values.
    pub async fn compute_transformation_fn_statistics(
        &self,
        td: &TrainingDatasetDescriptor,
        columns: &[String],
        dataset: &Dataset,
    ) -> Result<Statistics> {
        info!(
            training_dataset = %td.name,
            version = td.version,
            columns = ?columns,
            rows = dataset.num_rows(),
            "Computing transformation function statistics"
        );
        let content = self
            .profiler
            .profile(dataset, columns, false, false, true)
            .await?;
        Ok(Statistics::new(content))
    }

    /// Descriptive statistics according to a feature group's settings
    pub async fn compute_statistics(
        &self,
        dataset: &Dataset,
        config: &StatisticsConfig,
    ) -> Result<Option<Statistics>> {
        if !config.enabled {
            debug!("Statistics disabled, skipping");
            return Ok(None);
        }
        let content = self
            .profiler
            .profile(
                dataset,
                &config.columns,
                config.correlations,
                config.histograms,
                config.exact_uniqueness,
            )
            .await?;
        Ok(Some(Statistics::new(content)))
    }
}
