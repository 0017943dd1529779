//! Bucket data model
//!
//! A [`CurrentBucket`] holds the in-progress aggregation of one slice: one
//! [`Interval`] per configured value field plus a condition timer. When the
//! bucket closes each non-empty interval gives up its aggregate to a
//! [`PastBucket`]. Buckets that cannot be reported become a
//! [`SkippedBucket`] carrying the reasons they were dropped.

use serde::Serialize;
use tally_timer::ConditionTimer;

use crate::dimension::HashableDimensionKey;

/// At most this many drop events are recorded per skipped bucket.
pub const MAX_DROP_EVENTS_PER_BUCKET: usize = 10;

/// Aggregation slot for one value field within one slice.
///
/// The aggregate is created lazily on the first sample and moved out, leaving
/// the slot empty, when the bucket is built.
#[derive(Debug)]
pub struct Interval<A> {
    /// Index of the value field this interval aggregates
    pub agg_index: usize,
    aggregate: Option<A>,
    sample_size: u64,
}

impl<A> Interval<A> {
    /// An empty interval for the value field at `agg_index`.
    #[must_use]
    pub fn new(agg_index: usize) -> Self {
        Self {
            agg_index,
            aggregate: None,
            sample_size: 0,
        }
    }

    /// Whether this interval has absorbed any sample.
    #[must_use]
    pub fn has_value(&self) -> bool {
        self.sample_size > 0
    }

    /// Number of samples absorbed since the last reset.
    #[must_use]
    pub fn sample_size(&self) -> u64 {
        self.sample_size
    }

    /// The aggregate, if one has been created.
    #[must_use]
    pub fn aggregate(&self) -> Option<&A> {
        self.aggregate.as_ref()
    }

    /// Fold a sample in, creating the aggregate with `create` if this is the
    /// first.
    pub fn record<F, G>(&mut self, create: F, add: G)
    where
        F: FnOnce() -> A,
        G: FnOnce(&mut A),
    {
        add(self.aggregate.get_or_insert_with(create));
        self.sample_size += 1;
    }

    /// Move the aggregate out together with its sample size, leaving the
    /// interval empty.
    pub fn take(&mut self) -> Option<(A, u64)> {
        let sample_size = std::mem::take(&mut self.sample_size);
        self.aggregate.take().map(|a| (a, sample_size))
    }

    /// Discard any aggregate and reset the sample size.
    pub fn reset(&mut self) {
        self.aggregate = None;
        self.sample_size = 0;
    }
}

/// In-progress state for one slice.
#[derive(Debug)]
pub struct CurrentBucket<A> {
    /// Index-aligned with the configured value fields
    pub intervals: Vec<Interval<A>>,
    /// True-time of this slice; used only when slicing by state
    pub condition_timer: ConditionTimer,
}

impl<A> CurrentBucket<A> {
    /// A bucket with `fields` empty intervals and a stopped timer.
    #[must_use]
    pub fn new(fields: usize) -> Self {
        Self {
            intervals: (0..fields).map(Interval::new).collect(),
            condition_timer: ConditionTimer::default(),
        }
    }
}

/// A closed, reportable aggregation result for one slice.
#[derive(Debug)]
pub struct PastBucket<A> {
    /// Start of the bucket, nanoseconds
    pub bucket_start_ns: i64,
    /// End of the bucket, nanoseconds
    pub bucket_end_ns: i64,
    /// Value field indices with data, parallel to `aggregates`
    pub agg_index: Vec<usize>,
    /// Finished aggregates, parallel to `agg_index`
    pub aggregates: Vec<A>,
    /// True-time within the bucket
    pub condition_true_ns: i64,
    /// Lateness correction of the bucket close
    pub condition_correction_ns: i64,
}

/// Why a bucket was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BucketDropReason {
    /// The condition was unknown for part of the bucket
    ConditionUnknown,
    /// An event or transition arrived for a bucket already closed
    EventInWrongBucket,
    /// The bucket was shorter than the configured minimum
    BucketTooSmall,
    /// No slice recorded any data
    NoData,
    /// The bucket closed more than one bucket width late
    MultipleBucketsSkipped,
    /// A fast dump could not pull before splitting the bucket
    DumpReportRequested,
    /// A pull for the bucket failed
    PullFailed,
}

/// A single reason a bucket was dropped and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DropEvent {
    /// The reason the bucket was dropped
    pub reason: BucketDropReason,
    /// When the drop happened, nanoseconds
    pub drop_time_ns: i64,
}

/// A bucket that produced no [`PastBucket`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SkippedBucket {
    /// Start of the bucket, nanoseconds
    pub bucket_start_ns: i64,
    /// End of the bucket, nanoseconds
    pub bucket_end_ns: i64,
    /// Reasons, in order of occurrence, capped at
    /// [`MAX_DROP_EVENTS_PER_BUCKET`]
    pub drop_events: Vec<DropEvent>,
}

impl SkippedBucket {
    /// Record a drop unless the cap is reached. Returns whether the drop was
    /// recorded.
    pub fn push_drop_event(&mut self, reason: BucketDropReason, drop_time_ns: i64) -> bool {
        if self.drop_events.len() >= MAX_DROP_EVENTS_PER_BUCKET {
            return false;
        }
        self.drop_events.push(DropEvent {
            reason,
            drop_time_ns,
        });
        true
    }
}

/// Bookkeeping for one dimensions-in-what key.
#[derive(Debug, Clone)]
pub struct DimensionsInWhatInfo {
    /// State most recently observed for this dimension
    pub current_state: HashableDimensionKey,
    /// Whether `current_state` has been observed or is the unknown default
    pub has_current_state: bool,
    /// Whether any data arrived since the last bucket boundary
    pub seen_new_data: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_leaves_interval_empty() {
        let mut interval: Interval<i64> = Interval::new(3);
        assert!(!interval.has_value());
        assert!(interval.take().is_none());

        interval.record(|| 0, |a| *a += 5);
        interval.record(|| 0, |a| *a += 7);
        assert!(interval.has_value());
        assert_eq!(interval.sample_size(), 2);

        assert_eq!(interval.take(), Some((12, 2)));
        assert!(!interval.has_value());
        assert!(interval.aggregate().is_none());
        assert_eq!(interval.agg_index, 3);
    }

    #[test]
    fn drop_events_are_capped() {
        let mut skipped = SkippedBucket::default();
        for i in 0..MAX_DROP_EVENTS_PER_BUCKET {
            assert!(skipped.push_drop_event(BucketDropReason::NoData, i as i64));
        }
        assert!(!skipped.push_drop_event(BucketDropReason::PullFailed, 99));
        assert_eq!(skipped.drop_events.len(), MAX_DROP_EVENTS_PER_BUCKET);
    }
}
