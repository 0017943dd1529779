//! The bucket engine
//!
//! [`BucketEngine`] drives the bucket lifecycle of one metric. Events are
//! sliced by [`MetricDimensionKey`] and folded into per-slice intervals; a
//! bucket closes when an operation observes a timestamp at or past the
//! nominal bucket end, or when a split is forced. Closing converts every
//! non-empty slice into a [`PastBucket`] or, when the bucket cannot be
//! trusted, records a [`SkippedBucket`] with the reasons it was dropped.
//!
//! Condition-true time is tracked by a global [`ConditionTimer`] and, for
//! metrics sliced by state, by one timer per slice.
//!
//! The engine is a synchronous state machine. It never returns an error once
//! built: bad input degrades into a skipped bucket or a note in the
//! [`MetricsSink`]. Callers deliver timestamps in non-decreasing order and
//! serialize access; see [`crate::producer::Producer`].

use rustc_hash::FxHashMap;
use tally_timer::ConditionTimer;
use tracing::{debug, trace, warn};

use crate::{
    aggregate::{Aggregate, aggregate_fields, build_partial_bucket},
    bucket::{BucketDropReason, CurrentBucket, DimensionsInWhatInfo, PastBucket, SkippedBucket},
    config::{self, Config},
    dimension::{Dimensions, FieldValue, HashableDimensionKey, MetricDimensionKey},
    event::LogEvent,
    pull::{NoPull, PullResult, PullSource},
    report::{BucketLayout, DumpLatency, DumpReport},
    sink::{MetricsSink, Noop},
};

/// Errors produced when building a [`BucketEngine`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The configuration is invalid
    #[error(transparent)]
    Config(#[from] config::Error),
    /// The engine would start before its time base
    #[error("start {start_ns} precedes time base {time_base_ns}")]
    StartBeforeTimeBase {
        /// Time base of the engine
        time_base_ns: i64,
        /// Requested start
        start_ns: i64,
    },
}

/// The global condition of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionState {
    /// Not yet known, or made unknown by a late transition
    Unknown,
    /// The condition holds
    True,
    /// The condition does not hold
    False,
}

impl From<bool> for ConditionState {
    fn from(condition: bool) -> Self {
        if condition {
            ConditionState::True
        } else {
            ConditionState::False
        }
    }
}

/// Bucket lifecycle driver for one metric, generic over the aggregate
/// strategy `A`, the pull source `P` and the sink `S`.
#[derive(Debug)]
pub struct BucketEngine<A, P = NoPull, S = Noop> {
    config: Config,
    dimensions: Dimensions,
    pull: P,
    sink: S,

    time_base_ns: i64,
    current_bucket_start_ns: i64,
    current_bucket_num: i64,

    condition: ConditionState,
    is_active: bool,
    condition_timer: ConditionTimer,

    current_sliced_bucket: FxHashMap<MetricDimensionKey, CurrentBucket<A>>,
    dim_infos: FxHashMap<HashableDimensionKey, DimensionsInWhatInfo>,
    past_buckets: FxHashMap<MetricDimensionKey, Vec<PastBucket<A>>>,

    skipped_buckets: Vec<SkippedBucket>,
    current_skipped_bucket: SkippedBucket,
    current_bucket_is_skipped: bool,
    has_hit_guardrail: bool,
}

impl<A, P, S> BucketEngine<A, P, S>
where
    A: Aggregate,
    P: PullSource,
    S: MetricsSink,
{
    /// Create a new engine whose buckets are aligned on `time_base_ns` and
    /// whose first, possibly partial, bucket begins at `start_ns`.
    ///
    /// Metrics configured with a condition begin with the condition unknown,
    /// metrics configured with activation begin inactive. A pulled metric
    /// that starts active with its condition true pulls immediately.
    ///
    /// # Errors
    ///
    /// Function will error if the configuration is invalid or if `start_ns`
    /// precedes `time_base_ns`.
    pub fn new(
        config: Config,
        time_base_ns: i64,
        start_ns: i64,
        pull: P,
        sink: S,
    ) -> Result<Self, Error> {
        config.validate()?;
        if start_ns < time_base_ns {
            return Err(Error::StartBeforeTimeBase {
                time_base_ns,
                start_ns,
            });
        }

        let condition = if config.has_condition {
            ConditionState::Unknown
        } else {
            ConditionState::True
        };
        let is_active = !config.has_activation;
        let current_bucket_num = (start_ns - time_base_ns) / config.bucket_size_nanos;

        let mut engine = Self {
            dimensions: config.dimensions(),
            config,
            pull,
            sink,
            time_base_ns,
            current_bucket_start_ns: start_ns,
            current_bucket_num,
            condition,
            is_active,
            condition_timer: ConditionTimer::new(
                is_active && condition == ConditionState::True,
                start_ns,
            ),
            current_sliced_bucket: FxHashMap::default(),
            dim_infos: FxHashMap::default(),
            past_buckets: FxHashMap::default(),
            skipped_buckets: Vec::new(),
            current_skipped_bucket: SkippedBucket::default(),
            current_bucket_is_skipped: false,
            has_hit_guardrail: false,
        };

        if engine.should_pull() {
            engine.pull_and_match(start_ns);
        }
        debug!(
            metric_id = engine.config.metric_id,
            start_ns,
            bucket_num = engine.current_bucket_num,
            "bucket engine started"
        );
        Ok(engine)
    }

    /// The configuration this engine was built from.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The sink this engine notes into.
    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Start of the current bucket.
    #[must_use]
    pub fn current_bucket_start_ns(&self) -> i64 {
        self.current_bucket_start_ns
    }

    /// Number of the current bucket counted from the time base.
    #[must_use]
    pub fn current_bucket_num(&self) -> i64 {
        self.current_bucket_num
    }

    /// Nominal end of the current bucket.
    #[must_use]
    pub fn current_bucket_end_ns(&self) -> i64 {
        self.time_base_ns + (self.current_bucket_num + 1) * self.config.bucket_size_nanos
    }

    /// The global condition.
    #[must_use]
    pub fn condition(&self) -> ConditionState {
        self.condition
    }

    /// Whether the metric is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Number of slices in the current bucket.
    #[must_use]
    pub fn slice_count(&self) -> usize {
        self.current_sliced_bucket.len()
    }

    /// Whether the current bucket holds a slice for `key`.
    #[must_use]
    pub fn has_slice(&self, key: &MetricDimensionKey) -> bool {
        self.current_sliced_bucket.contains_key(key)
    }

    /// Closed buckets of `key` not yet erased by a dump.
    #[must_use]
    pub fn past_buckets(&self, key: &MetricDimensionKey) -> &[PastBucket<A>] {
        self.past_buckets.get(key).map_or(&[], Vec::as_slice)
    }

    /// Skipped buckets not yet erased by a dump.
    #[must_use]
    pub fn skipped_buckets(&self) -> &[SkippedBucket] {
        &self.skipped_buckets
    }

    /// Estimated memory held by past buckets, in bytes.
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.past_buckets
            .values()
            .flatten()
            .map(|bucket| {
                std::mem::size_of::<PastBucket<A>>()
                    + bucket.aggregates.iter().map(Aggregate::size).sum::<usize>()
            })
            .sum()
    }

    fn is_event_late(&self, event_time_ns: i64) -> bool {
        event_time_ns < self.current_bucket_start_ns
    }

    fn is_state_sliced(&self) -> bool {
        self.dimensions.is_state_sliced()
    }

    fn should_pull(&self) -> bool {
        self.config.pulled && self.is_active && self.condition == ConditionState::True
    }

    /// Route a raw event to the metric. Events of other atoms are ignored.
    pub fn on_log_event(&mut self, event: &LogEvent) {
        if event.atom_id != self.config.atom_id {
            return;
        }
        let key = self.dimensions.key_for(event);
        self.on_matched_log_event(&key, event);
    }

    /// Fold a matched event into the slice for `key`.
    ///
    /// Events older than the current bucket are noted and dropped without
    /// any state change. A push metric first closes the current bucket if the event
    /// lies past its end, whether or not the metric is active.
    pub fn on_matched_log_event(&mut self, key: &MetricDimensionKey, event: &LogEvent) {
        let event_time_ns = event.timestamp_ns;
        if self.is_event_late(event_time_ns) {
            debug!(
                metric_id = self.config.metric_id,
                event_time_ns,
                bucket_start_ns = self.current_bucket_start_ns,
                "skipping late event"
            );
            self.sink.note_late_event_skipped(self.config.metric_id);
            return;
        }
        if !self.config.pulled {
            self.flush_if_needed(event_time_ns);
        }
        if !self.is_active || self.condition != ConditionState::True {
            return;
        }

        let what = key.dimensions_in_what();
        let (old_state, has_current_state) = match self.dim_infos.get(what) {
            Some(info) => (info.current_state.clone(), info.has_current_state),
            None => self.retained_state(what).map_or_else(
                || (self.dimensions.unknown_state_key(), false),
                |state| (state, true),
            ),
        };
        // Pulled data accrued up to the pull and belongs to the state the
        // dimension was in until now.
        let fold_key = if self.config.pulled {
            MetricDimensionKey::new(what.clone(), old_state.clone())
        } else {
            key.clone()
        };
        if self.hit_guardrail(key, &fold_key) {
            return;
        }

        let fields = self.config.value_fields.len();
        let info = self
            .dim_infos
            .entry(what.clone())
            .or_insert_with(|| DimensionsInWhatInfo {
                current_state: old_state.clone(),
                has_current_state,
                seen_new_data: false,
            });
        let state_change = !info.has_current_state || &info.current_state != key.state_values();

        let current = self
            .current_sliced_bucket
            .entry(fold_key)
            .or_insert_with(|| CurrentBucket::new(fields));
        info.seen_new_data |= aggregate_fields(
            self.config.metric_id,
            &self.config.value_fields,
            key,
            event,
            &mut current.intervals,
            &self.sink,
        );

        if self.dimensions.is_state_sliced() && state_change {
            let old_key = MetricDimensionKey::new(what.clone(), old_state);
            if let Some(old) = self.current_sliced_bucket.get_mut(&old_key) {
                old.condition_timer
                    .on_condition_changed(false, event_time_ns);
            }
            self.current_sliced_bucket
                .entry(key.clone())
                .or_insert_with(|| CurrentBucket::new(fields))
                .condition_timer
                .on_condition_changed(true, event_time_ns);
            info.current_state = key.state_values().clone();
            info.has_current_state = true;
        }
    }

    /// State of the slice carried over for `what` after its bookkeeping was
    /// pruned. At most one such slice exists per dimension.
    fn retained_state(&self, what: &HashableDimensionKey) -> Option<HashableDimensionKey> {
        if !self.is_state_sliced() {
            return None;
        }
        self.current_sliced_bucket
            .keys()
            .find(|key| key.dimensions_in_what() == what)
            .map(|key| key.state_values().clone())
    }

    /// Whether admitting the slices `key` and `fold_key` would breach the
    /// dimension guardrail. Slices already present are always admitted.
    fn hit_guardrail(&mut self, key: &MetricDimensionKey, fold_key: &MetricDimensionKey) -> bool {
        let mut new_slices = usize::from(!self.current_sliced_bucket.contains_key(key));
        if fold_key != key && !self.current_sliced_bucket.contains_key(fold_key) {
            new_slices += 1;
        }
        if new_slices == 0 {
            return false;
        }

        let size = self.current_sliced_bucket.len() + new_slices;
        if size <= self.config.dimension_soft_limit {
            return false;
        }
        self.sink.note_dimension_size(self.config.metric_id, size);
        if size <= self.config.dimension_hard_limit {
            return false;
        }
        if !self.has_hit_guardrail {
            warn!(
                metric_id = self.config.metric_id,
                hard_limit = self.config.dimension_hard_limit,
                "dimension hard limit reached, dropping data"
            );
            self.has_hit_guardrail = true;
        }
        self.sink.note_hard_dimension_limit_reached(self.config.metric_id);
        true
    }

    /// Record a condition edge at `event_time_ns`.
    pub fn on_condition_changed(&mut self, condition: bool, event_time_ns: i64) {
        let is_event_late = self.is_event_late(event_time_ns);
        let new_condition = if is_event_late {
            ConditionState::Unknown
        } else {
            ConditionState::from(condition)
        };
        let old_condition = self.condition;

        if !self.is_active {
            self.condition = new_condition;
            return;
        }

        if is_event_late {
            debug!(
                metric_id = self.config.metric_id,
                event_time_ns,
                bucket_start_ns = self.current_bucket_start_ns,
                "late condition change"
            );
            self.sink.note_late_event_skipped(self.config.metric_id);
            self.sink
                .note_condition_change_in_next_bucket(self.config.metric_id);
            self.invalidate_current_bucket(event_time_ns, BucketDropReason::EventInWrongBucket);
            self.condition = new_condition;
            return;
        }

        // The bucket so far covers time for which the condition is unknown.
        if old_condition == ConditionState::Unknown {
            self.invalidate_current_bucket(event_time_ns, BucketDropReason::ConditionUnknown);
        }

        if self.config.pulled
            && (new_condition == ConditionState::True || old_condition == ConditionState::True)
        {
            self.pull_and_match(event_time_ns);
        }

        self.condition = new_condition;
        self.flush_if_needed(event_time_ns);
        let is_true = self.condition == ConditionState::True;
        self.condition_timer
            .on_condition_changed(is_true, event_time_ns);
        self.update_sliced_condition_timers(is_true, event_time_ns);
    }

    /// Record that the metric became active or inactive at `event_time_ns`.
    pub fn on_active_state_changed(&mut self, event_time_ns: i64, is_active: bool) {
        if self.is_active == is_active {
            return;
        }
        self.is_active = is_active;

        if self.is_event_late(event_time_ns) {
            debug!(
                metric_id = self.config.metric_id,
                event_time_ns,
                bucket_start_ns = self.current_bucket_start_ns,
                "late active state change"
            );
            self.sink.note_late_event_skipped(self.config.metric_id);
            self.invalidate_current_bucket(event_time_ns, BucketDropReason::EventInWrongBucket);
            return;
        }
        if self.condition != ConditionState::True {
            return;
        }
        if self.config.pulled {
            self.pull_and_match(event_time_ns);
        }
        self.flush_if_needed(event_time_ns);
        self.condition_timer
            .on_condition_changed(is_active, event_time_ns);
        self.update_sliced_condition_timers(is_active, event_time_ns);
    }

    /// Record a change of a sliced state from `old_state` to `new_state`.
    ///
    /// Values in the same state group are not a change. Pulled metrics pull
    /// so that the value accrued so far is attributed to the old state.
    pub fn on_state_changed(
        &mut self,
        event_time_ns: i64,
        old_state: &FieldValue,
        new_state: &FieldValue,
    ) {
        let old_state = self.dimensions.map_state_value(old_state);
        let new_state = self.dimensions.map_state_value(new_state);
        if old_state == new_state
            || self.condition != ConditionState::True
            || !self.is_active
        {
            return;
        }

        if self.is_event_late(event_time_ns) {
            debug!(
                metric_id = self.config.metric_id,
                event_time_ns,
                bucket_start_ns = self.current_bucket_start_ns,
                "late state change"
            );
            self.invalidate_current_bucket(event_time_ns, BucketDropReason::EventInWrongBucket);
            return;
        }
        if self.config.pulled {
            self.pull_and_match(event_time_ns);
        }
        self.flush_if_needed(event_time_ns);
    }

    /// Deliver the result of a scheduled pull taken at
    /// `original_pull_time_ns`.
    ///
    /// Data pulled at or past the current bucket end is attributed to one
    /// nanosecond before the most recent bucket boundary.
    pub fn on_data_pulled(
        &mut self,
        events: &[LogEvent],
        result: PullResult,
        original_pull_time_ns: i64,
    ) {
        if !self.is_active {
            return;
        }
        if self.condition == ConditionState::True {
            match result {
                PullResult::Fail => {
                    self.invalidate_current_bucket(
                        original_pull_time_ns,
                        BucketDropReason::PullFailed,
                    );
                }
                PullResult::Success if original_pull_time_ns < self.current_bucket_end_ns() => {
                    self.accumulate_events(events, original_pull_time_ns);
                }
                PullResult::Success => {
                    let bucket_end_ns = self.previous_bucket_end_ns(original_pull_time_ns) - 1;
                    self.sink.note_bucket_boundary_delay(
                        self.config.metric_id,
                        original_pull_time_ns - bucket_end_ns,
                    );
                    self.accumulate_events(events, bucket_end_ns);
                }
            }
        }
        self.flush_if_needed(original_pull_time_ns);
    }

    /// Split the current bucket at `event_time_ns` because the app was
    /// upgraded. Ignored unless the metric splits buckets on upgrade.
    pub fn notify_app_upgrade(&mut self, event_time_ns: i64) {
        if !self.config.split_bucket_for_app_upgrade {
            return;
        }
        self.split_bucket(event_time_ns);
    }

    /// Split the current bucket at `event_time_ns` once the host finished
    /// initializing.
    pub fn on_init_completed(&mut self, event_time_ns: i64) {
        self.split_bucket(event_time_ns);
    }

    fn split_bucket(&mut self, event_time_ns: i64) {
        if self.is_event_late(event_time_ns) {
            warn!(
                metric_id = self.config.metric_id,
                event_time_ns,
                bucket_start_ns = self.current_bucket_start_ns,
                "skipping bucket split for late event"
            );
            return;
        }
        if self.should_pull() {
            self.pull_and_match(event_time_ns);
        }
        self.flush_current_bucket(event_time_ns, event_time_ns);
    }

    /// Produce the report of everything closed so far.
    ///
    /// With `include_current_partial_bucket` the current bucket is closed at
    /// `dump_time_ns` first; a pulled metric then either pulls or, under
    /// [`DumpLatency::Fast`], drops the bucket. With `erase_data` the
    /// reported buckets are forgotten.
    pub fn on_dump_report(
        &mut self,
        dump_time_ns: i64,
        include_current_partial_bucket: bool,
        erase_data: bool,
        latency: DumpLatency,
    ) -> DumpReport {
        if include_current_partial_bucket {
            if self.should_pull() {
                match latency {
                    DumpLatency::Fast => self.invalidate_current_bucket(
                        dump_time_ns,
                        BucketDropReason::DumpReportRequested,
                    ),
                    DumpLatency::NoTimeConstraints => self.pull_and_match(dump_time_ns),
                }
            }
            if self.is_event_late(dump_time_ns) {
                debug!(
                    metric_id = self.config.metric_id,
                    dump_time_ns,
                    bucket_start_ns = self.current_bucket_start_ns,
                    "dump precedes current bucket, not splitting"
                );
            } else {
                self.flush_current_bucket(dump_time_ns, dump_time_ns);
            }
        } else {
            self.flush_if_needed(dump_time_ns);
        }

        let layout = BucketLayout {
            time_base_ns: self.time_base_ns,
            bucket_size_ns: self.config.bucket_size_nanos,
            report_condition: self.config.has_condition || self.is_state_sliced(),
        };
        let report = DumpReport {
            metric_id: self.config.metric_id,
            is_active: self.is_active,
            estimated_bytes: self.byte_size(),
            data: layout.dimension_data(&self.past_buckets),
            skipped: self.skipped_buckets.clone(),
        };
        if erase_data {
            self.past_buckets.clear();
            self.skipped_buckets.clear();
        }
        debug!(
            metric_id = self.config.metric_id,
            dump_time_ns,
            slices = report.data.len(),
            skipped = report.skipped.len(),
            "dumped report"
        );
        report
    }

    /// Forget all closed buckets without reporting them.
    pub fn drop_data(&mut self, drop_time_ns: i64) {
        self.sink.note_bucket_dropped(self.config.metric_id);
        self.flush_if_needed(drop_time_ns);
        self.past_buckets.clear();
        self.skipped_buckets.clear();
    }

    /// Close the current bucket if `event_time_ns` lies at or past its end.
    pub fn flush_if_needed(&mut self, event_time_ns: i64) {
        let current_bucket_end_ns = self.current_bucket_end_ns();
        if event_time_ns < current_bucket_end_ns {
            trace!(
                metric_id = self.config.metric_id,
                event_time_ns,
                current_bucket_end_ns,
                "bucket still open"
            );
            return;
        }
        let num_forward = self.calc_buckets_forward_count(event_time_ns);
        let next_bucket_start_ns =
            current_bucket_end_ns + (num_forward - 1) * self.config.bucket_size_nanos;
        self.flush_current_bucket(event_time_ns, next_bucket_start_ns);
    }

    fn calc_buckets_forward_count(&self, event_time_ns: i64) -> i64 {
        let current_bucket_end_ns = self.current_bucket_end_ns();
        if event_time_ns < current_bucket_end_ns {
            return 0;
        }
        1 + (event_time_ns - current_bucket_end_ns) / self.config.bucket_size_nanos
    }

    fn previous_bucket_end_ns(&self, event_time_ns: i64) -> i64 {
        self.time_base_ns
            + ((event_time_ns - self.time_base_ns) / self.config.bucket_size_nanos)
                * self.config.bucket_size_nanos
    }

    fn flush_current_bucket(&mut self, event_time_ns: i64, next_bucket_start_ns: i64) {
        let num_forward = self.calc_buckets_forward_count(event_time_ns);

        if self.condition == ConditionState::Unknown {
            self.sink.note_bucket_unknown_condition(self.config.metric_id);
            self.invalidate_current_bucket(event_time_ns, BucketDropReason::ConditionUnknown);
        }

        self.close_current_bucket(event_time_ns, next_bucket_start_ns);
        self.init_next_sliced_bucket(next_bucket_start_ns);

        // Skipped buckets leave time in the timers that belongs to none.
        self.condition_timer
            .new_bucket_start(event_time_ns, next_bucket_start_ns);
        if self.is_state_sliced() {
            for current in self.current_sliced_bucket.values_mut() {
                current
                    .condition_timer
                    .new_bucket_start(event_time_ns, next_bucket_start_ns);
            }
        }
        self.current_bucket_num += num_forward;
    }

    fn close_current_bucket(&mut self, event_time_ns: i64, next_bucket_start_ns: i64) {
        let metric_id = self.config.metric_id;
        let full_bucket_end_ns = self.current_bucket_end_ns();
        let num_forward = self.calc_buckets_forward_count(event_time_ns);

        let bucket_end_ns = if num_forward > 1 {
            debug!(
                metric_id,
                event_time_ns, num_forward, "closing bucket after skipping forward"
            );
            self.sink.note_skipped_forward_buckets(metric_id);
            self.invalidate_current_bucket(
                event_time_ns,
                BucketDropReason::MultipleBucketsSkipped,
            );
            next_bucket_start_ns
        } else {
            event_time_ns.min(full_bucket_end_ns)
        };

        let global = self
            .condition_timer
            .new_bucket_start(event_time_ns, bucket_end_ns);

        if bucket_end_ns - self.current_bucket_start_ns < self.config.min_bucket_size_nanos {
            debug!(
                metric_id,
                bucket_start_ns = self.current_bucket_start_ns,
                bucket_end_ns,
                "bucket too small"
            );
            self.skip_current_bucket(event_time_ns, BucketDropReason::BucketTooSmall);
        }

        if !self.current_bucket_is_skipped {
            let state_sliced = self.is_state_sliced();
            let mut has_data = false;
            for (key, current) in &mut self.current_sliced_bucket {
                let mut bucket = build_partial_bucket(
                    self.current_bucket_start_ns,
                    bucket_end_ns,
                    &mut current.intervals,
                );
                if bucket.agg_index.is_empty() {
                    continue;
                }
                has_data = true;
                let info = if state_sliced {
                    current
                        .condition_timer
                        .new_bucket_start(event_time_ns, bucket_end_ns)
                } else {
                    global
                };
                bucket.condition_true_ns = info.duration_ns;
                bucket.condition_correction_ns = info.correction_ns;
                self.past_buckets.entry(key.clone()).or_default().push(bucket);
            }
            if !has_data {
                self.skip_current_bucket(event_time_ns, BucketDropReason::NoData);
            }
        }

        if self.current_bucket_is_skipped {
            let mut skipped = std::mem::take(&mut self.current_skipped_bucket);
            skipped.bucket_start_ns = self.current_bucket_start_ns;
            skipped.bucket_end_ns = bucket_end_ns;
            debug!(
                metric_id,
                bucket_start_ns = skipped.bucket_start_ns,
                bucket_end_ns,
                reasons = ?skipped.drop_events,
                "bucket skipped"
            );
            self.skipped_buckets.push(skipped);
        } else {
            debug!(
                metric_id,
                bucket_start_ns = self.current_bucket_start_ns,
                bucket_end_ns,
                "bucket closed"
            );
        }

        if self.is_active && bucket_end_ns < next_bucket_start_ns {
            let mut gap = SkippedBucket {
                bucket_start_ns: bucket_end_ns,
                bucket_end_ns: next_bucket_start_ns,
                drop_events: Vec::new(),
            };
            gap.push_drop_event(BucketDropReason::NoData, event_time_ns);
            self.skipped_buckets.push(gap);
        }
    }

    fn init_next_sliced_bucket(&mut self, next_bucket_start_ns: i64) {
        self.sink.note_bucket_count(self.config.metric_id);

        if self.is_state_sliced() {
            let dim_infos = &self.dim_infos;
            self.current_sliced_bucket.retain(|key, current| {
                for interval in &mut current.intervals {
                    interval.reset();
                }
                dim_infos
                    .get(key.dimensions_in_what())
                    .is_some_and(|info| &info.current_state == key.state_values())
            });
        } else {
            self.current_sliced_bucket.clear();
        }

        self.dim_infos.retain(|_, info| {
            let keep = info.seen_new_data;
            info.seen_new_data = false;
            keep
        });

        self.current_bucket_is_skipped = false;
        self.current_skipped_bucket = SkippedBucket::default();
        self.current_bucket_start_ns = next_bucket_start_ns;
    }

    fn update_sliced_condition_timers(&mut self, condition: bool, event_time_ns: i64) {
        if !self.is_state_sliced() {
            return;
        }
        // A slice without bookkeeping is the one carried over in the current
        // state of its dimension.
        let dim_infos = &self.dim_infos;
        for (key, current) in &mut self.current_sliced_bucket {
            let is_current = dim_infos
                .get(key.dimensions_in_what())
                .is_none_or(|info| &info.current_state == key.state_values());
            if is_current {
                current
                    .condition_timer
                    .on_condition_changed(condition, event_time_ns);
            }
        }
    }

    fn invalidate_current_bucket(&mut self, drop_time_ns: i64, reason: BucketDropReason) {
        if !self.current_bucket_is_skipped {
            self.sink.note_invalidated_bucket(self.config.metric_id);
        }
        self.skip_current_bucket(drop_time_ns, reason);
    }

    fn skip_current_bucket(&mut self, drop_time_ns: i64, reason: BucketDropReason) {
        // Inactive metrics do not report skipped buckets.
        if !self.is_active {
            return;
        }
        self.current_skipped_bucket
            .push_drop_event(reason, drop_time_ns);
        self.current_bucket_is_skipped = true;
    }

    fn pull_and_match(&mut self, timestamp_ns: i64) {
        match self.pull.pull(self.config.atom_id, timestamp_ns) {
            Ok(events) => self.accumulate_events(&events, timestamp_ns),
            Err(err) => {
                warn!(
                    metric_id = self.config.metric_id,
                    timestamp_ns,
                    error = %err,
                    "pull failed"
                );
                self.sink.note_pull_failed(self.config.metric_id);
                self.invalidate_current_bucket(timestamp_ns, BucketDropReason::PullFailed);
            }
        }
    }

    fn accumulate_events(&mut self, events: &[LogEvent], event_time_ns: i64) {
        if self.is_event_late(event_time_ns) {
            debug!(
                metric_id = self.config.metric_id,
                event_time_ns,
                bucket_start_ns = self.current_bucket_start_ns,
                "skipping late pull"
            );
            self.sink.note_late_event_skipped(self.config.metric_id);
            self.invalidate_current_bucket(event_time_ns, BucketDropReason::EventInWrongBucket);
            return;
        }
        let atom_id = self.config.atom_id;
        for event in events.iter().filter(|e| e.atom_id == atom_id) {
            let mut event = event.clone();
            event.timestamp_ns = event_time_ns;
            let key = self.dimensions.key_for(&event);
            self.on_matched_log_event(&key, &event);
        }
    }
}
