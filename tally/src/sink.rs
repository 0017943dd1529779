//! Guardrail and health notes
//!
//! The engine never raises errors to its caller. Everything that goes wrong
//! -- a bad value, a late event, a dimension explosion -- is resolved locally
//! and noted in a [`MetricsSink`]. The sink is injected at construction; the
//! engine holds no global counters.
//!
//! [`Recorder`] forwards every note to the [`metrics`] facade, labelled with
//! the metric id, so whatever exporter the embedding program installs picks
//! them up.

use metrics::{counter, gauge, histogram};

/// Receiver of the engine's guardrail and health notes.
pub trait MetricsSink {
    /// A value field was absent or of the wrong type.
    fn note_bad_value_type(&self, metric_id: i64);
    /// The slice count crossed the soft limit; `size` is the count that
    /// would result from the new slice.
    fn note_dimension_size(&self, metric_id: i64, size: usize);
    /// A new slice was refused at the hard limit.
    fn note_hard_dimension_limit_reached(&self, metric_id: i64);
    /// A transition arrived for a bucket already closed.
    fn note_late_event_skipped(&self, metric_id: i64);
    /// A condition change landed in the next bucket.
    fn note_condition_change_in_next_bucket(&self, metric_id: i64);
    /// A bucket was invalidated. Noted once per bucket.
    fn note_invalidated_bucket(&self, metric_id: i64);
    /// A bucket closed with the condition unknown.
    fn note_bucket_unknown_condition(&self, metric_id: i64);
    /// A bucket closed more than one bucket width late.
    fn note_skipped_forward_buckets(&self, metric_id: i64);
    /// A new bucket began.
    fn note_bucket_count(&self, metric_id: i64);
    /// Past buckets were dropped without being reported.
    fn note_bucket_dropped(&self, metric_id: i64);
    /// A pull failed.
    fn note_pull_failed(&self, metric_id: i64);
    /// A scheduled pull arrived `delay_ns` after its bucket boundary.
    fn note_bucket_boundary_delay(&self, metric_id: i64, delay_ns: i64);
}

/// A sink that discards every note.
#[derive(Debug, Clone, Copy, Default)]
pub struct Noop;

impl MetricsSink for Noop {
    fn note_bad_value_type(&self, _metric_id: i64) {}
    fn note_dimension_size(&self, _metric_id: i64, _size: usize) {}
    fn note_hard_dimension_limit_reached(&self, _metric_id: i64) {}
    fn note_late_event_skipped(&self, _metric_id: i64) {}
    fn note_condition_change_in_next_bucket(&self, _metric_id: i64) {}
    fn note_invalidated_bucket(&self, _metric_id: i64) {}
    fn note_bucket_unknown_condition(&self, _metric_id: i64) {}
    fn note_skipped_forward_buckets(&self, _metric_id: i64) {}
    fn note_bucket_count(&self, _metric_id: i64) {}
    fn note_bucket_dropped(&self, _metric_id: i64) {}
    fn note_pull_failed(&self, _metric_id: i64) {}
    fn note_bucket_boundary_delay(&self, _metric_id: i64, _delay_ns: i64) {}
}

/// A sink emitting through the [`metrics`] facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct Recorder;

impl MetricsSink for Recorder {
    fn note_bad_value_type(&self, metric_id: i64) {
        counter!("tally_bad_value_type", "metric_id" => metric_id.to_string()).increment(1);
    }

    #[allow(clippy::cast_precision_loss)]
    fn note_dimension_size(&self, metric_id: i64, size: usize) {
        gauge!("tally_dimension_size", "metric_id" => metric_id.to_string()).set(size as f64);
    }

    fn note_hard_dimension_limit_reached(&self, metric_id: i64) {
        counter!("tally_hard_dimension_limit_reached", "metric_id" => metric_id.to_string())
            .increment(1);
    }

    fn note_late_event_skipped(&self, metric_id: i64) {
        counter!("tally_late_event_skipped", "metric_id" => metric_id.to_string()).increment(1);
    }

    fn note_condition_change_in_next_bucket(&self, metric_id: i64) {
        counter!("tally_condition_change_in_next_bucket", "metric_id" => metric_id.to_string())
            .increment(1);
    }

    fn note_invalidated_bucket(&self, metric_id: i64) {
        counter!("tally_invalidated_bucket", "metric_id" => metric_id.to_string()).increment(1);
    }

    fn note_bucket_unknown_condition(&self, metric_id: i64) {
        counter!("tally_bucket_unknown_condition", "metric_id" => metric_id.to_string())
            .increment(1);
    }

    fn note_skipped_forward_buckets(&self, metric_id: i64) {
        counter!("tally_skipped_forward_buckets", "metric_id" => metric_id.to_string())
            .increment(1);
    }

    fn note_bucket_count(&self, metric_id: i64) {
        counter!("tally_bucket_count", "metric_id" => metric_id.to_string()).increment(1);
    }

    fn note_bucket_dropped(&self, metric_id: i64) {
        counter!("tally_bucket_dropped", "metric_id" => metric_id.to_string()).increment(1);
    }

    fn note_pull_failed(&self, metric_id: i64) {
        counter!("tally_pull_failed", "metric_id" => metric_id.to_string()).increment(1);
    }

    #[allow(clippy::cast_precision_loss)]
    fn note_bucket_boundary_delay(&self, metric_id: i64, delay_ns: i64) {
        histogram!("tally_bucket_boundary_delay_ns", "metric_id" => metric_id.to_string())
            .record(delay_ns as f64);
    }
}
