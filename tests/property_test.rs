//! Property-based tests for encoding, schema matching and splitting
//!
//! Uses proptest to check invariants that must hold for any declaration
//! order, column order or seed.

use proptest::prelude::*;

use feature_materializer::dataset::{DataType, Dataset, Field, Value};
use feature_materializer::featurestore::{Feature, FeatureGroupDescriptor, TrainingDatasetFeature};
use feature_materializer::schema::{decode_key, match_training_dataset_schema, to_wire_format};
use feature_materializer::{FeatureStoreError, SchemaError};

const KEY_NAMES: [&str; 3] = ["account", "branch", "customer"];

/// Strategy producing a shuffled copy of `0..n`
fn permutation(n: usize) -> impl Strategy<Value = Vec<usize>> {
    Just((0..n).collect::<Vec<_>>()).prop_shuffle()
}

fn key_group(order: &[usize]) -> FeatureGroupDescriptor {
    order
        .iter()
        .fold(FeatureGroupDescriptor::builder("keys", 1), |b, &i| {
            b.with_feature(Feature::new(KEY_NAMES[i], "bigint").primary())
        })
        .with_feature(Feature::new("score", "double"))
        .online_enabled(true)
        .build()
        .unwrap()
}

fn key_row(order: &[usize], values: &[i64; 3]) -> Dataset {
    let mut schema: Vec<Field> = order
        .iter()
        .map(|&i| Field::new(KEY_NAMES[i], DataType::Long))
        .collect();
    schema.push(Field::new("score", DataType::Double));
    let mut row: Vec<Value> = order.iter().map(|&i| Value::Long(values[i])).collect();
    row.push(Value::Double(0.5));
    Dataset::new(schema, vec![row]).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: the online key does not depend on how primary keys are declared or laid out
    #[test]
    fn key_is_invariant_under_declaration_order(
        declared in permutation(3),
        columns in permutation(3),
        values in any::<[i64; 3]>(),
    ) {
        let fg = key_group(&declared);
        let records = to_wire_format(&key_row(&columns, &values), &fg).unwrap();
        prop_assert_eq!(records.len(), 1);

        let expected: String = values.iter().map(|v| v.to_string()).collect();
        prop_assert_eq!(decode_key(&records[0].key).unwrap(), expected.clone());

        let canonical = to_wire_format(&key_row(&[0, 1, 2], &values), &key_group(&[0, 1, 2])).unwrap();
        prop_assert_eq!(&records[0].key, &canonical[0].key);
    }

    /// Property: any reordering of the stored columns is rejected at its first displaced position
    #[test]
    fn reordered_columns_never_match(order in permutation(5), uppercase in any::<bool>()) {
        let names: Vec<String> = (0..5).map(|i| format!("f{}", i)).collect();
        let stored: Vec<TrainingDatasetFeature> = names
            .iter()
            .enumerate()
            .map(|(i, n)| TrainingDatasetFeature::new(n.clone(), "bigint", i))
            .rev()
            .collect();
        let dataset: Vec<Field> = order
            .iter()
            .map(|&i| {
                let name = if uppercase { names[i].to_uppercase() } else { names[i].clone() };
                Field::new(name, DataType::Long)
            })
            .collect();

        let result = match_training_dataset_schema(&dataset, &stored);
        match order.iter().enumerate().find(|(pos, i)| *pos != **i) {
            None => prop_assert!(result.is_ok()),
            Some((position, _)) => match result {
                Err(FeatureStoreError::SchemaMismatch(SchemaError::NameMismatch { position: p, .. })) => {
                    prop_assert_eq!(p, position)
                }
                other => prop_assert!(false, "expected a name mismatch, got {:?}", other),
            },
        }
    }

    /// Property: a split is a partition of the input fully determined by its seed
    #[test]
    fn split_is_deterministic_and_complete(
        n in 0usize..300,
        weights in prop::collection::vec(0.05f64..1.0, 1..4),
        seed in any::<u64>(),
    ) {
        let dataset = Dataset::new(
            vec![Field::new("id", DataType::Long)],
            (0..n as i64).map(|i| vec![Value::Long(i)]).collect(),
        )
        .unwrap();

        let first = dataset.random_split(&weights, seed).unwrap();
        let second = dataset.random_split(&weights, seed).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.len(), weights.len());

        let mut ids: Vec<i64> = first
            .iter()
            .flat_map(|split| split.rows().iter())
            .filter_map(|row| match row[0] {
                Value::Long(v) => Some(v),
                _ => None,
            })
            .collect();
        ids.sort_unstable();
        prop_assert_eq!(ids, (0..n as i64).collect::<Vec<_>>());
    }
}
