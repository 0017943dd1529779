//! Pluggable aggregate strategies
//!
//! The engine is generic over the aggregate it folds event values into. An
//! [`Aggregate`] decides which field values it accepts, how it accumulates
//! them, and how it reports and sizes itself. [`aggregate_fields`] and
//! [`build_partial_bucket`] are the two points at which the engine hands
//! control to the strategy.

use std::fmt;

use tracing::{debug, trace};

use crate::{
    bucket::{Interval, PastBucket},
    config::ValueField,
    dimension::{FieldValue, MetricDimensionKey},
    event::LogEvent,
    report::ReportValue,
    sink::MetricsSink,
};

pub mod numeric;
pub mod quantile;

pub use numeric::Numeric;
pub use quantile::Quantile;

/// An opaque, mutable accumulator over the samples of one value field.
pub trait Aggregate: fmt::Debug + Sized {
    /// The scalar type this aggregate absorbs.
    type Scalar: Copy + fmt::Debug;

    /// Extract a scalar from an event field, `None` if the field has the
    /// wrong type.
    fn extract(value: &FieldValue) -> Option<Self::Scalar>;

    /// Create an empty aggregate for `field`.
    fn create(field: &ValueField) -> Self;

    /// Fold `scalar` in.
    fn add(&mut self, scalar: Self::Scalar);

    /// Finalize the aggregate when its bucket is built.
    #[must_use]
    fn finish(self, _sample_size: u64) -> Self {
        self
    }

    /// The reportable form of this aggregate.
    fn serialize(&self) -> ReportValue;

    /// Approximate memory footprint in bytes.
    fn size(&self) -> usize;
}

/// Fold the configured value fields of `event` into `intervals`.
///
/// Returns whether any interval received data. Processing stops at the first
/// field that is absent or of the wrong type; that field is noted as a bad
/// value type and intervals already updated keep their sample.
pub fn aggregate_fields<A, S>(
    metric_id: i64,
    value_fields: &[ValueField],
    key: &MetricDimensionKey,
    event: &LogEvent,
    intervals: &mut [Interval<A>],
    sink: &S,
) -> bool
where
    A: Aggregate,
    S: MetricsSink,
{
    let mut seen_new_data = false;
    for (field, interval) in value_fields.iter().zip(intervals.iter_mut()) {
        let Some(scalar) = event.field(field.field).and_then(A::extract) else {
            debug!(
                metric_id,
                field = field.field,
                timestamp_ns = event.timestamp_ns,
                "failed to extract value from event"
            );
            sink.note_bad_value_type(metric_id);
            return seen_new_data;
        };
        interval.record(|| A::create(field), |aggregate| aggregate.add(scalar));
        seen_new_data = true;
    }
    trace!(
        metric_id,
        key = %key,
        timestamp_ns = event.timestamp_ns,
        seen_new_data,
        "folded event into slice"
    );
    seen_new_data
}

/// Move every non-empty interval's aggregate into a new [`PastBucket`].
///
/// Intervals are left empty. Condition fields of the bucket are zero; the
/// caller fills them in.
pub fn build_partial_bucket<A: Aggregate>(
    bucket_start_ns: i64,
    bucket_end_ns: i64,
    intervals: &mut [Interval<A>],
) -> PastBucket<A> {
    let mut bucket = PastBucket {
        bucket_start_ns,
        bucket_end_ns,
        agg_index: Vec::new(),
        aggregates: Vec::new(),
        condition_true_ns: 0,
        condition_correction_ns: 0,
    };
    for interval in intervals.iter_mut().filter(|i| i.has_value()) {
        if let Some((aggregate, sample_size)) = interval.take() {
            bucket.agg_index.push(interval.agg_index);
            bucket.aggregates.push(aggregate.finish(sample_size));
        }
    }
    bucket
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bucket::CurrentBucket,
        config::Aggregation,
        report::ReportValue,
        test::sink::CountingSink,
    };

    fn fields() -> Vec<ValueField> {
        vec![
            ValueField {
                field: 1,
                aggregation: Aggregation::Sum,
            },
            ValueField {
                field: 2,
                aggregation: Aggregation::Max,
            },
        ]
    }

    #[test]
    fn bad_field_stops_processing() {
        let sink = CountingSink::new();
        let mut bucket: CurrentBucket<Numeric> = CurrentBucket::new(2);
        let event = LogEvent::new(
            1,
            5,
            vec![
                FieldValue::Int(0),
                FieldValue::Int(4),
                FieldValue::Str("nope".into()),
            ],
        );
        let seen = aggregate_fields(
            9,
            &fields(),
            &MetricDimensionKey::default(),
            &event,
            &mut bucket.intervals,
            &sink,
        );
        assert!(seen);
        assert_eq!(sink.counts().bad_value_type, 1);
        assert!(bucket.intervals[0].has_value());
        assert!(!bucket.intervals[1].has_value());

        let event = LogEvent::new(1, 6, vec![FieldValue::Int(0)]);
        let seen = aggregate_fields(
            9,
            &fields(),
            &MetricDimensionKey::default(),
            &event,
            &mut bucket.intervals,
            &sink,
        );
        assert!(!seen);
        assert_eq!(sink.counts().bad_value_type, 2);
    }

    #[test]
    fn build_moves_only_non_empty_intervals() {
        let sink = CountingSink::new();
        let mut bucket: CurrentBucket<Numeric> = CurrentBucket::new(2);
        let event = LogEvent::new(1, 5, vec![FieldValue::Int(0), FieldValue::Int(4)]);
        aggregate_fields(
            9,
            &fields(),
            &MetricDimensionKey::default(),
            &event,
            &mut bucket.intervals,
            &sink,
        );

        let past = build_partial_bucket(0, 10, &mut bucket.intervals);
        assert_eq!(past.agg_index, vec![0]);
        assert_eq!(past.aggregates.len(), 1);
        assert_eq!(past.aggregates[0].serialize(), ReportValue::Long(4));
        assert!(bucket.intervals.iter().all(|i| i.aggregate().is_none()));
        assert!(bucket.intervals.iter().all(|i| !i.has_value()));
    }
}
