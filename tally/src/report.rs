//! Dump reports
//!
//! The engine does not serialize anything itself. On every dump it hands the
//! caller a [`DumpReport`]: the closed buckets of every slice, sorted by key,
//! and the skipped buckets with their drop reasons. The structures derive
//! [`Serialize`] so callers may encode them however they see fit.

use serde::Serialize;

use crate::{
    aggregate::{Aggregate, quantile::QuantileSummary},
    bucket::{PastBucket, SkippedBucket},
    dimension::{HashableDimensionKey, MetricDimensionKey},
};

/// How much time a dump may spend completing the current bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpLatency {
    /// Never pull; a bucket that would need a pull is invalidated.
    Fast,
    /// Pull if the current bucket requires it.
    NoTimeConstraints,
}

/// The reportable value of one aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportValue {
    /// Integral value
    Long(i64),
    /// Floating point value
    Double(f64),
    /// Quantile sketch summary
    Sketch(QuantileSummary),
}

/// One value field's aggregate in a reported bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregatedValue {
    /// Index of the value field
    pub index: usize,
    /// The aggregate
    pub value: ReportValue,
}

/// A closed bucket as reported.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketInfo {
    /// Bucket number, present only for full, aligned buckets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_num: Option<i64>,
    /// Start of a partial bucket, nanoseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_bucket_elapsed_nanos: Option<i64>,
    /// End of a partial bucket, nanoseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_bucket_elapsed_nanos: Option<i64>,
    /// Aggregates of the fields that had data
    pub values: Vec<AggregatedValue>,
    /// True-time of the condition in this bucket
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_true_nanos: Option<i64>,
    /// Lateness correction of the bucket close
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_correction_nanos: Option<i64>,
}

/// All reported buckets of one slice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionData {
    /// Dimensions in what of the slice
    pub dimensions_in_what: HashableDimensionKey,
    /// State values of the slice
    pub state_values: HashableDimensionKey,
    /// Closed buckets, oldest first
    pub buckets: Vec<BucketInfo>,
}

/// Everything a metric reports on a dump.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DumpReport {
    /// Identifier of the metric
    pub metric_id: i64,
    /// Whether the metric was active at dump time
    pub is_active: bool,
    /// Estimated memory held by past buckets before the dump
    pub estimated_bytes: usize,
    /// Per-slice data, sorted by key
    pub data: Vec<DimensionData>,
    /// Buckets dropped since the last erasing dump
    pub skipped: Vec<SkippedBucket>,
}

/// How a bucket's time range and condition fields are rendered.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BucketLayout {
    pub(crate) time_base_ns: i64,
    pub(crate) bucket_size_ns: i64,
    pub(crate) report_condition: bool,
}

impl BucketLayout {
    pub(crate) fn bucket_info<A: Aggregate>(&self, bucket: &PastBucket<A>) -> BucketInfo {
        let offset = bucket.bucket_start_ns - self.time_base_ns;
        let full = bucket.bucket_end_ns - bucket.bucket_start_ns == self.bucket_size_ns
            && offset >= 0
            && offset % self.bucket_size_ns == 0;
        let (bucket_num, start, end) = if full {
            (Some(offset / self.bucket_size_ns), None, None)
        } else {
            (
                None,
                Some(bucket.bucket_start_ns),
                Some(bucket.bucket_end_ns),
            )
        };
        BucketInfo {
            bucket_num,
            start_bucket_elapsed_nanos: start,
            end_bucket_elapsed_nanos: end,
            values: bucket
                .agg_index
                .iter()
                .zip(&bucket.aggregates)
                .map(|(&index, aggregate)| AggregatedValue {
                    index,
                    value: aggregate.serialize(),
                })
                .collect(),
            condition_true_nanos: self.report_condition.then_some(bucket.condition_true_ns),
            condition_correction_nanos: (bucket.condition_correction_ns != 0)
                .then_some(bucket.condition_correction_ns),
        }
    }

    pub(crate) fn dimension_data<'a, A, I>(&self, slices: I) -> Vec<DimensionData>
    where
        A: Aggregate + 'a,
        I: IntoIterator<Item = (&'a MetricDimensionKey, &'a Vec<PastBucket<A>>)>,
    {
        let mut slices: Vec<_> = slices.into_iter().collect();
        slices.sort_by(|a, b| a.0.cmp(b.0));
        slices
            .into_iter()
            .filter(|(_, buckets)| !buckets.is_empty())
            .map(|(key, buckets)| DimensionData {
                dimensions_in_what: key.dimensions_in_what().clone(),
                state_values: key.state_values().clone(),
                buckets: buckets.iter().map(|b| self.bucket_info(b)).collect(),
            })
            .collect()
    }
}
