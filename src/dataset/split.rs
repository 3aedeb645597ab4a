//! Deterministic weighted random split

use super::Dataset;
use crate::error::{FeatureStoreError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Split `dataset` into `weights.len()` datasets
///
/// Weights are normalized into cumulative bounds. Every row draws one uniform
/// sample from an RNG seeded with `seed` and lands in the bucket whose bounds
/// contain the sample, so the same input, weights and seed always produce the
/// same splits.
pub fn random_split(dataset: &Dataset, weights: &[f64], seed: u64) -> Result<Vec<Dataset>> {
    if weights.is_empty() {
        return Err(FeatureStoreError::Config(
            "random split requires at least one weight".to_string(),
        ));
    }
    if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
        return Err(FeatureStoreError::Config(format!(
            "split weights must be non-negative, got {}",
            w
        )));
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return Err(FeatureStoreError::Config(
            "split weights must not all be zero".to_string(),
        ));
    }

    let mut bounds = Vec::with_capacity(weights.len());
    let mut acc = 0.0;
    for w in weights {
        acc += w / total;
        bounds.push(acc);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut buckets: Vec<Vec<Vec<super::Value>>> = vec![Vec::new(); weights.len()];
    let last = weights.len() - 1;
    for row in dataset.rows() {
        let sample: f64 = rng.gen();
        // Zero-weight buckets have an empty [lower, upper) range and are never chosen
        let idx = bounds.iter().position(|b| sample < *b).unwrap_or(last);
        buckets[idx].push(row.clone());
    }

    buckets
        .into_iter()
        .map(|rows| {
            Dataset::new(dataset.schema().to_vec(), rows)
                .map(|d| d.repartition(dataset.num_partitions()))
        })
        .collect()
}
