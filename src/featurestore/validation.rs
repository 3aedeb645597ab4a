//! Data validation
//!
//! Expectations are evaluated by a [`ValidationEngine`] before a feature group
//! insert. The write core only cares about the overall status of the report
//! and the validation id, which is forwarded to the time-travel write engine so
//! the commit can be linked to the validation run.

use super::FeatureGroupDescriptor;
use crate::dataset::{Dataset, Value};
use crate::error::{FeatureStoreError, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// How a failing validation affects the insert
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationType {
    /// Validation is not run
    #[default]
    None,
    /// Validation runs but never blocks the insert
    All,
    /// Failures block the insert, warnings do not
    Warning,
    /// Any non-success result blocks the insert
    Strict,
}

impl ValidationType {
    /// Whether a report with `status` must stop the insert
    pub fn rejects(&self, status: ValidationStatus) -> bool {
        match self {
            ValidationType::None | ValidationType::All => false,
            ValidationType::Warning => status == ValidationStatus::Failure,
            ValidationType::Strict => status != ValidationStatus::Success,
        }
    }
}

/// Severity of a failing rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleLevel {
    Warning,
    #[default]
    Error,
}

/// Outcome of a rule or a whole report, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationStatus {
    Success,
    Warning,
    Failure,
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationStatus::Success => write!(f, "SUCCESS"),
            ValidationStatus::Warning => write!(f, "WARNING"),
            ValidationStatus::Failure => write!(f, "FAILURE"),
        }
    }
}

/// A single rule of an expectation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Rule name, e.g. `HAS_MIN` or `IS_CONTAINED_IN`
    pub name: String,
    pub level: RuleLevel,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub pattern: Option<String>,
    pub accepted_type: Option<String>,
    /// Overrides the features of the enclosing expectation
    pub feature: Option<String>,
    pub legal_values: Vec<String>,
}

impl Rule {
    pub fn new(name: impl Into<String>, level: RuleLevel) -> Self {
        Self {
            name: name.into(),
            level,
            ..Default::default()
        }
    }

    pub fn with_min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn with_max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_accepted_type(mut self, accepted_type: impl Into<String>) -> Self {
        self.accepted_type = Some(accepted_type.into());
        self
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    pub fn with_legal_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.legal_values = values.into_iter().map(Into::into).collect();
        self
    }

    fn in_bounds(&self, v: f64) -> bool {
        self.min.map_or(true, |min| v >= min) && self.max.map_or(true, |max| v <= max)
    }
}

/// Named group of rules over a set of features
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Expectation {
    pub name: String,
    pub description: Option<String>,
    pub features: Vec<String>,
    pub rules: Vec<Rule>,
}

impl Expectation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_feature(mut self, feature: impl Into<String>) -> Self {
        self.features.push(feature.into());
        self
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// Result of one rule on one feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    pub expectation: String,
    pub rule: String,
    pub feature: String,
    pub status: ValidationStatus,
    pub message: Option<String>,
}

/// Result of a validation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Identifier forwarded to the offline write
    pub validation_id: String,
    pub status: ValidationStatus,
    pub results: Vec<RuleResult>,
}

impl ValidationReport {
    /// Results that did not succeed
    pub fn failures(&self) -> impl Iterator<Item = &RuleResult> {
        self.results
            .iter()
            .filter(|r| r.status != ValidationStatus::Success)
    }
}

/// Evaluates expectations against a dataset
#[async_trait]
pub trait ValidationEngine: Send + Sync {
    async fn validate(
        &self,
        feature_group: &FeatureGroupDescriptor,
        dataset: &Dataset,
        expectations: &[Expectation],
    ) -> Result<ValidationReport>;
}

/// In-process rule evaluator
#[derive(Debug, Default, Clone)]
pub struct LocalValidator;

impl LocalValidator {
    pub fn new() -> Self {
        Self
    }

    fn evaluate(&self, rule: &Rule, dataset: &Dataset, feature: &str) -> Result<Option<String>> {
        let values = dataset.column_values(feature)?;
        let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
        let failure = match rule.name.to_uppercase().as_str() {
            "HAS_MIN" => numbers
                .iter()
                .cloned()
                .reduce(f64::min)
                .filter(|m| !rule.in_bounds(*m))
                .map(|m| format!("minimum {} out of bounds", m)),
            "HAS_MAX" => numbers
                .iter()
                .cloned()
                .reduce(f64::max)
                .filter(|m| !rule.in_bounds(*m))
                .map(|m| format!("maximum {} out of bounds", m)),
            "HAS_MEAN" => {
                if numbers.is_empty() {
                    None
                } else {
                    let mean = numbers.iter().sum::<f64>() / numbers.len() as f64;
                    (!rule.in_bounds(mean)).then(|| format!("mean {} out of bounds", mean))
                }
            }
            "HAS_COMPLETENESS" => {
                if values.is_empty() {
                    None
                } else {
                    let complete = values.iter().filter(|v| !v.is_null()).count() as f64
                        / values.len() as f64;
                    (!rule.in_bounds(complete))
                        .then(|| format!("completeness {} out of bounds", complete))
                }
            }
            "HAS_PATTERN" => {
                let pattern = rule.pattern.as_deref().ok_or_else(|| {
                    FeatureStoreError::Validation(format!("rule {} requires a pattern", rule.name))
                })?;
                let re = Regex::new(pattern).map_err(|e| {
                    FeatureStoreError::Validation(format!("invalid pattern {}: {}", pattern, e))
                })?;
                values
                    .iter()
                    .filter_map(|v| v.cast_to_string())
                    .find(|s| !re.is_match(s))
                    .map(|s| format!("value `{}` does not match {}", s, pattern))
            }
            "HAS_DATATYPE" => {
                let accepted = rule.accepted_type.as_deref().ok_or_else(|| {
                    FeatureStoreError::Validation(format!(
                        "rule {} requires an accepted type",
                        rule.name
                    ))
                })?;
                let actual = dataset
                    .field(feature)
                    .map(|f| f.data_type.simple_string())
                    .unwrap_or_default();
                (!actual.eq_ignore_ascii_case(accepted))
                    .then(|| format!("type {} is not {}", actual, accepted))
            }
            "IS_CONTAINED_IN" => values
                .iter()
                .filter(|v| !v.is_null())
                .filter_map(|v: &&Value| v.cast_to_string())
                .find(|s| !rule.legal_values.contains(s))
                .map(|s| format!("value `{}` is not a legal value", s)),
            other => {
                return Err(FeatureStoreError::Validation(format!(
                    "unsupported rule: {}",
                    other
                )))
            }
        };
        Ok(failure)
    }
}

#[async_trait]
impl ValidationEngine for LocalValidator {
    async fn validate(
        &self,
        feature_group: &FeatureGroupDescriptor,
        dataset: &Dataset,
        expectations: &[Expectation],
    ) -> Result<ValidationReport> {
        let mut results = Vec::new();
        for expectation in expectations {
            for rule in &expectation.rules {
                let features: Vec<&str> = match &rule.feature {
                    Some(f) => vec![f.as_str()],
                    None => expectation.features.iter().map(String::as_str).collect(),
                };
                for feature in features {
                    let message = self.evaluate(rule, dataset, feature)?;
                    let status = match (&message, rule.level) {
                        (None, _) => ValidationStatus::Success,
                        (Some(_), RuleLevel::Warning) => ValidationStatus::Warning,
                        (Some(_), RuleLevel::Error) => ValidationStatus::Failure,
                    };
                    results.push(RuleResult {
                        expectation: expectation.name.clone(),
                        rule: rule.name.clone(),
                        feature: feature.to_string(),
                        status,
                        message,
                    });
                }
            }
        }
        let status = results
            .iter()
            .map(|r| r.status)
            .max()
            .unwrap_or(ValidationStatus::Success);
        debug!(
            feature_group = %feature_group.name,
            rules = results.len(),
            %status,
            "Validated dataset"
        );
        Ok(ValidationReport {
            validation_id: uuid::Uuid::new_v4().to_string(),
            status,
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DataType, Field};
    use crate::featurestore::Feature;

    fn dataset() -> Dataset {
        Dataset::new(
            vec![
                Field::new("age", DataType::Long),
                Field::new("country", DataType::String),
            ],
            vec![
                vec![Value::Long(21), Value::String("SE".into())],
                vec![Value::Long(64), Value::String("DE".into())],
                vec![Value::Null, Value::String("XX".into())],
            ],
        )
        .unwrap()
    }

    fn group() -> FeatureGroupDescriptor {
        FeatureGroupDescriptor::builder("users", 1)
            .with_feature(Feature::new("age", "bigint"))
            .with_feature(Feature::new("country", "string").primary())
            .build()
            .unwrap()
    }

    #[test]
    fn test_validation_gate() {
        use ValidationStatus::*;
        assert!(!ValidationType::None.rejects(Failure));
        assert!(!ValidationType::All.rejects(Failure));
        assert!(ValidationType::Warning.rejects(Failure));
        assert!(!ValidationType::Warning.rejects(Warning));
        assert!(ValidationType::Strict.rejects(Warning));
        assert!(!ValidationType::Strict.rejects(Success));
    }

    #[tokio::test]
    async fn test_local_validator_statuses() {
        let expectations = vec![
            Expectation::new("age bounds")
                .with_feature("age")
                .with_rule(Rule::new("HAS_MIN", RuleLevel::Error).with_min(18.0))
                .with_rule(Rule::new("HAS_MAX", RuleLevel::Warning).with_max(60.0)),
            Expectation::new("countries").with_rule(
                Rule::new("IS_CONTAINED_IN", RuleLevel::Error)
                    .with_feature("country")
                    .with_legal_values(["SE", "DE", "XX"]),
            ),
        ];
        let report = LocalValidator::new()
            .validate(&group(), &dataset(), &expectations)
            .await
            .unwrap();
        assert_eq!(report.results.len(), 3);
        assert_eq!(report.status, ValidationStatus::Warning);
        assert_eq!(report.failures().count(), 1);
        assert!(!report.validation_id.is_empty());
    }

    #[tokio::test]
    async fn test_pattern_and_completeness() {
        let expectations = vec![Expectation::new("quality")
            .with_rule(
                Rule::new("HAS_PATTERN", RuleLevel::Error)
                    .with_feature("country")
                    .with_pattern("^[A-Z]{2}$"),
            )
            .with_rule(
                Rule::new("HAS_COMPLETENESS", RuleLevel::Error)
                    .with_feature("age")
                    .with_min(0.9),
            )];
        let report = LocalValidator::new()
            .validate(&group(), &dataset(), &expectations)
            .await
            .unwrap();
        assert_eq!(report.status, ValidationStatus::Failure);
        assert_eq!(report.results[0].status, ValidationStatus::Success);
        assert_eq!(report.results[1].status, ValidationStatus::Failure);
    }

    #[tokio::test]
    async fn test_unknown_rule_is_an_error() {
        let expectations = vec![Expectation::new("x")
            .with_feature("age")
            .with_rule(Rule::new("HAS_VIBES", RuleLevel::Error))];
        let err = LocalValidator::new()
            .validate(&group(), &dataset(), &expectations)
            .await
            .unwrap_err();
        assert!(matches!(err, FeatureStoreError::Validation(_)));
    }
}
