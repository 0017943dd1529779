//! Metric configuration
//!
//! This module controls configuration parsing from the end user. A metric is
//! described in YAML and validated once, up front; the engine assumes a valid
//! configuration thereafter.

use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::dimension::Dimensions;

/// Nanoseconds in one second.
pub const NS_PER_SEC: i64 = 1_000_000_000;

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// Bucket size must be strictly positive
    #[error("bucket_size_nanos must be positive, got {0}")]
    BucketSize(i64),
    /// Minimum bucket size must not be negative
    #[error("min_bucket_size_nanos must not be negative, got {0}")]
    MinBucketSize(i64),
    /// A metric must aggregate at least one field
    #[error("value_fields must not be empty")]
    NoValueFields,
    /// The hard dimension limit must admit at least one slice
    #[error("dimension_hard_limit must be positive")]
    HardLimit,
    /// The soft dimension limit lies above the hard limit
    #[error("dimension_soft_limit {soft} exceeds dimension_hard_limit {hard}")]
    SoftLimit {
        /// Configured soft limit
        soft: usize,
        /// Configured hard limit
        hard: usize,
    },
}

/// Which aggregate strategy a metric uses.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// Sums, minimums, maximums or averages of numeric fields
    #[default]
    Numeric,
    /// Quantile sketches of integral fields
    Quantile,
}

/// How a numeric field folds its samples together.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Running sum
    #[default]
    Sum,
    /// Smallest sample
    Min,
    /// Largest sample
    Max,
    /// Mean of all samples
    Avg,
}

/// A field of the event to aggregate.
#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(deny_unknown_fields)]
pub struct ValueField {
    /// Position of the field in the event
    pub field: usize,
    /// Aggregation applied to the field. Ignored by quantile metrics.
    #[serde(default)]
    pub aggregation: Aggregation,
}

fn default_bucket_size() -> i64 {
    3_600 * NS_PER_SEC
}

fn default_dimension_soft_limit() -> usize {
    500
}

fn default_dimension_hard_limit() -> usize {
    800
}

fn default_split_bucket_for_app_upgrade() -> bool {
    true
}

/// Main configuration struct for a metric
#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Identifier of the metric, used to label sink notes and reports
    pub metric_id: i64,
    /// The atom whose events feed this metric
    pub atom_id: u32,
    /// The aggregate strategy of this metric
    #[serde(default)]
    pub kind: Kind,
    /// The fields folded into each bucket, index-aligned with the intervals
    /// of every slice
    pub value_fields: Vec<ValueField>,
    /// Positions of the fields forming the dimensions in what
    #[serde(default)]
    pub dimensions_in_what: Vec<usize>,
    /// Positions of the fields carrying the state values the metric is
    /// sliced by
    #[serde(default)]
    pub slice_by_state: Vec<usize>,
    /// Raw state value to state group value
    #[serde(default)]
    pub state_groups: FxHashMap<i64, i64>,
    /// Nominal width of a bucket
    #[serde(default = "default_bucket_size")]
    pub bucket_size_nanos: i64,
    /// Buckets shorter than this are skipped rather than reported
    #[serde(default)]
    pub min_bucket_size_nanos: i64,
    /// Slice count above which the dimension size is reported
    #[serde(default = "default_dimension_soft_limit")]
    pub dimension_soft_limit: usize,
    /// Slice count past which new slices are refused
    #[serde(default = "default_dimension_hard_limit")]
    pub dimension_hard_limit: usize,
    /// Whether data must be pulled before a bucket can close
    #[serde(default)]
    pub pulled: bool,
    /// Whether the metric is gated on a condition. Gated metrics begin with
    /// the condition unknown, ungated metrics with the condition true.
    #[serde(default)]
    pub has_condition: bool,
    /// Whether the metric is gated on activation. Gated metrics begin
    /// inactive.
    #[serde(default)]
    pub has_activation: bool,
    /// Whether an app upgrade splits the current bucket
    #[serde(default = "default_split_bucket_for_app_upgrade")]
    pub split_bucket_for_app_upgrade: bool,
}

impl Config {
    /// Minimal valid configuration aggregating `value_fields` of `atom_id`.
    #[must_use]
    pub fn new(metric_id: i64, atom_id: u32, value_fields: Vec<ValueField>) -> Self {
        Self {
            metric_id,
            atom_id,
            kind: Kind::default(),
            value_fields,
            dimensions_in_what: Vec::new(),
            slice_by_state: Vec::new(),
            state_groups: FxHashMap::default(),
            bucket_size_nanos: default_bucket_size(),
            min_bucket_size_nanos: 0,
            dimension_soft_limit: default_dimension_soft_limit(),
            dimension_hard_limit: default_dimension_hard_limit(),
            pulled: false,
            has_condition: false,
            has_activation: false,
            split_bucket_for_app_upgrade: default_split_bucket_for_app_upgrade(),
        }
    }

    /// Parse and validate a configuration from YAML.
    ///
    /// # Errors
    ///
    /// Function will error if the YAML is malformed or the configuration is
    /// invalid.
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Function will error if the file cannot be read or if
    /// [`Config::from_yaml`] fails.
    pub fn from_path(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
            path: path.to_path_buf(),
            source: Box::new(source),
        })?;
        Self::from_yaml(&contents)
    }

    /// Check the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// See documentation in [`Error`].
    pub fn validate(&self) -> Result<(), Error> {
        if self.bucket_size_nanos <= 0 {
            return Err(Error::BucketSize(self.bucket_size_nanos));
        }
        if self.min_bucket_size_nanos < 0 {
            return Err(Error::MinBucketSize(self.min_bucket_size_nanos));
        }
        if self.value_fields.is_empty() {
            return Err(Error::NoValueFields);
        }
        if self.dimension_hard_limit == 0 {
            return Err(Error::HardLimit);
        }
        if self.dimension_soft_limit > self.dimension_hard_limit {
            return Err(Error::SoftLimit {
                soft: self.dimension_soft_limit,
                hard: self.dimension_hard_limit,
            });
        }
        Ok(())
    }

    /// The dimension extractor described by this configuration.
    #[must_use]
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(
            self.dimensions_in_what.clone(),
            self.slice_by_state.clone(),
            self.state_groups.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_yaml_takes_defaults() {
        let contents = r"
metric_id: 7
atom_id: 10
value_fields:
  - field: 2
";
        let config = Config::from_yaml(contents).expect("valid config");
        assert_eq!(config.metric_id, 7);
        assert_eq!(config.kind, Kind::Numeric);
        assert_eq!(
            config.value_fields,
            vec![ValueField {
                field: 2,
                aggregation: Aggregation::Sum
            }]
        );
        assert_eq!(config.bucket_size_nanos, 3_600 * NS_PER_SEC);
        assert_eq!(config.dimension_soft_limit, 500);
        assert_eq!(config.dimension_hard_limit, 800);
        assert!(config.split_bucket_for_app_upgrade);
        assert!(!config.pulled);
        assert_eq!(config, Config::new(7, 10, config.value_fields.clone()));
    }

    #[test]
    fn full_yaml() {
        let contents = r"
metric_id: 1
atom_id: 2
kind: quantile
value_fields:
  - field: 3
  - field: 4
    aggregation: max
dimensions_in_what: [0]
slice_by_state: [1]
state_groups:
  3: 1
  4: 1
bucket_size_nanos: 60000000000
min_bucket_size_nanos: 10000000000
dimension_soft_limit: 2
dimension_hard_limit: 3
pulled: true
has_condition: true
has_activation: true
split_bucket_for_app_upgrade: false
";
        let config = Config::from_yaml(contents).expect("valid config");
        assert_eq!(config.kind, Kind::Quantile);
        assert_eq!(config.value_fields[1].aggregation, Aggregation::Max);
        assert_eq!(config.state_groups.get(&4), Some(&1));
        assert!(config.dimensions().is_state_sliced());
        assert!(!config.split_bucket_for_app_upgrade);
    }

    #[test]
    fn unknown_fields_rejected() {
        let contents = r"
metric_id: 1
atom_id: 2
value_fields: [{field: 0}]
bucket_size: 5
";
        assert!(matches!(
            Config::from_yaml(contents),
            Err(Error::SerdeYaml(_))
        ));
    }

    #[test]
    fn validation() {
        let field = ValueField {
            field: 0,
            aggregation: Aggregation::Sum,
        };
        let mut config = Config::new(1, 1, vec![field]);
        assert!(config.validate().is_ok());

        config.bucket_size_nanos = 0;
        assert!(matches!(config.validate(), Err(Error::BucketSize(0))));
        config.bucket_size_nanos = NS_PER_SEC;

        config.min_bucket_size_nanos = -1;
        assert!(matches!(config.validate(), Err(Error::MinBucketSize(-1))));
        config.min_bucket_size_nanos = 0;

        config.dimension_soft_limit = 900;
        assert!(matches!(
            config.validate(),
            Err(Error::SoftLimit {
                soft: 900,
                hard: 800
            })
        ));
        config.dimension_soft_limit = 1;

        config.dimension_hard_limit = 0;
        assert!(matches!(config.validate(), Err(Error::HardLimit)));
        config.dimension_hard_limit = 1;

        config.value_fields.clear();
        assert!(matches!(config.validate(), Err(Error::NoValueFields)));
    }
}
