//! Condition-true stopwatch for time-bucketed metrics
//!
//! A [`ConditionTimer`] measures how long an external boolean condition was
//! true inside each bucket of a bucketed metric. Callers feed it every
//! condition edge through [`ConditionTimer::on_condition_changed`] and, at
//! every bucket boundary, call [`ConditionTimer::new_bucket_start`] to drain
//! the accumulated true-time for the bucket that just ended.
//!
//! The interesting part is the delayed close. Bucket boundaries are nominal:
//! the code that closes bucket `N` may run some time after bucket `N+1`
//! actually began, and a condition edge may have already been observed in
//! that window. The timer attributes such time to the bucket it belongs to
//! and reports, alongside each duration, a correction equal to how late the
//! close ran. A correction reported for one bucket is undone in the next, so
//! corrections telescope: their running sum always equals the delay currently
//! carried by the timer.
//!
//! The timer is not reentrant. Callers serialize access and deliver
//! timestamps in non-decreasing order.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::multiple_crate_versions)]

use tracing::trace;

/// The true-time drained from a [`ConditionTimer`] for one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConditionDurationInfo {
    /// Nanoseconds the condition was true within the bucket.
    pub duration_ns: i64,
    /// Nanoseconds by which the bucket close ran late, net of the correction
    /// reported for the previous bucket.
    pub correction_ns: i64,
}

/// Stopwatch accumulating condition-true time within the current bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionTimer {
    /// True-time accumulated since the last bucket boundary.
    timer_ns: i64,
    /// Delay of the most recent bucket close, carried so that the next close
    /// can undo the correction it reported.
    current_bucket_start_delay_ns: i64,
    /// Timestamp of the last condition edge or bucket boundary crossed while
    /// the condition was true.
    last_condition_change_ns: i64,
    condition: bool,
}

impl Default for ConditionTimer {
    fn default() -> Self {
        Self::new(false, 0)
    }
}

impl ConditionTimer {
    /// Create a new timer. When `initial_condition` holds the timer begins
    /// accruing from `bucket_start_ns`.
    #[must_use]
    pub fn new(initial_condition: bool, bucket_start_ns: i64) -> Self {
        Self {
            timer_ns: 0,
            current_bucket_start_delay_ns: 0,
            last_condition_change_ns: if initial_condition {
                bucket_start_ns
            } else {
                0
            },
            condition: initial_condition,
        }
    }

    /// The condition as last observed by this timer.
    #[must_use]
    pub fn condition(&self) -> bool {
        self.condition
    }

    /// The delay of the most recent bucket close that the next call to
    /// [`ConditionTimer::new_bucket_start`] will undo.
    #[must_use]
    pub fn current_bucket_start_delay_ns(&self) -> i64 {
        self.current_bucket_start_delay_ns
    }

    /// Record a condition edge at `timestamp_ns`. Repeated values are
    /// ignored. A true to false edge accrues the time since the condition
    /// last became true.
    pub fn on_condition_changed(&mut self, new_condition: bool, timestamp_ns: i64) {
        if new_condition == self.condition {
            return;
        }

        if self.condition {
            self.timer_ns += timestamp_ns - self.last_condition_change_ns;
        }

        self.last_condition_change_ns = timestamp_ns;
        self.condition = new_condition;
    }

    /// Close the bucket ending at `next_bucket_start_ns`, the close itself
    /// running at `event_time_ns`, and return the true-time that belongs to
    /// the closed bucket. The timer is left holding only time that belongs to
    /// the next bucket.
    pub fn new_bucket_start(
        &mut self,
        event_time_ns: i64,
        next_bucket_start_ns: i64,
    ) -> ConditionDurationInfo {
        let mut correction_ns = -self.current_bucket_start_delay_ns;
        self.current_bucket_start_delay_ns = 0;
        let current_bucket_end_delay_ns = (event_time_ns - next_bucket_start_ns).max(0);

        if self.condition {
            // Edges observed after the boundary move true-time wholly into
            // the next bucket, so only a condition that was already true at
            // the boundary accrues here.
            if next_bucket_start_ns >= self.last_condition_change_ns {
                self.timer_ns += next_bucket_start_ns - self.last_condition_change_ns;
                self.last_condition_change_ns = next_bucket_start_ns;
                correction_ns += current_bucket_end_delay_ns;
                self.current_bucket_start_delay_ns = current_bucket_end_delay_ns;
            }
        } else if self.last_condition_change_ns > next_bucket_start_ns {
            // The condition went false after the boundary. The portion past
            // the boundary belongs to the next bucket.
            self.timer_ns -= self.last_condition_change_ns - next_bucket_start_ns;
            correction_ns += current_bucket_end_delay_ns;
            self.current_bucket_start_delay_ns = current_bucket_end_delay_ns;
        }

        let duration_ns = self.timer_ns;
        self.timer_ns = 0;

        if !self.condition && self.last_condition_change_ns > next_bucket_start_ns {
            self.timer_ns = self.last_condition_change_ns - next_bucket_start_ns;
        }

        trace!(
            event_time_ns,
            next_bucket_start_ns,
            duration_ns,
            correction_ns,
            "condition timer bucket rolled"
        );

        ConditionDurationInfo {
            duration_ns,
            correction_ns,
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::{collection, prelude::*};

    use super::{ConditionDurationInfo, ConditionTimer};

    fn info(duration_ns: i64, correction_ns: i64) -> ConditionDurationInfo {
        ConditionDurationInfo {
            duration_ns,
            correction_ns,
        }
    }

    #[test]
    fn initially_false_accrues_nothing() {
        let mut timer = ConditionTimer::new(false, 10);
        assert_eq!(timer.new_bucket_start(200, 200), info(0, 0));
        assert!(!timer.condition());
    }

    #[test]
    fn true_through_boundary_then_false() {
        let mut timer = ConditionTimer::new(true, 10);
        assert_eq!(timer.new_bucket_start(200, 200), info(190, 0));

        timer.on_condition_changed(false, 205);
        assert_eq!(timer.new_bucket_start(300, 300), info(5, 0));
    }

    #[test]
    fn delayed_close_after_condition_went_false() {
        let mut timer = ConditionTimer::new(true, 10);
        assert_eq!(timer.new_bucket_start(200, 200), info(190, 0));

        timer.on_condition_changed(false, 207);
        assert_eq!(timer.new_bucket_start(207, 205), info(5, 2));
        assert_eq!(timer.current_bucket_start_delay_ns(), 2);

        // The two nanoseconds past 205 belong to the following bucket and the
        // correction is undone.
        assert_eq!(timer.new_bucket_start(300, 300), info(2, -2));
        assert_eq!(timer.current_bucket_start_delay_ns(), 0);
    }

    #[test]
    fn delayed_close_while_condition_stays_true() {
        let mut timer = ConditionTimer::new(true, 0);
        assert_eq!(timer.new_bucket_start(103, 100), info(100, 3));
        assert_eq!(timer.current_bucket_start_delay_ns(), 3);
        assert_eq!(timer.new_bucket_start(200, 200), info(100, -3));
    }

    #[test]
    fn condition_true_only_after_boundary_belongs_to_next_bucket() {
        let mut timer = ConditionTimer::new(false, 0);
        timer.on_condition_changed(true, 40);
        timer.on_condition_changed(false, 60);
        timer.on_condition_changed(true, 104);
        assert_eq!(timer.new_bucket_start(106, 100), info(20, 0));
        assert_eq!(timer.new_bucket_start(200, 200), info(96, 0));
    }

    #[test]
    fn repeated_condition_is_ignored() {
        let mut timer = ConditionTimer::new(true, 0);
        timer.on_condition_changed(true, 50);
        timer.on_condition_changed(false, 70);
        timer.on_condition_changed(false, 90);
        assert_eq!(timer.new_bucket_start(100, 100), info(70, 0));
    }

    #[test]
    fn redundant_close_at_same_boundary_is_idempotent() {
        let mut timer = ConditionTimer::new(true, 0);
        timer.on_condition_changed(false, 103);
        let first = timer.new_bucket_start(105, 100);
        assert_eq!(first, info(100, 5));
        let second = timer.new_bucket_start(105, 100);
        assert_eq!(second, info(0, 0));
        assert_eq!(timer.new_bucket_start(200, 200), info(3, -5));
    }

    /// True-time of a condition starting at `initial` and flipping at every
    /// entry of `toggles`, restricted to `[from, to)`.
    fn true_time_between(initial: bool, toggles: &[i64], from: i64, to: i64) -> i64 {
        let mut total = 0;
        let mut state = initial;
        let mut segment_start = i64::MIN;
        for &toggle in toggles.iter().chain(std::iter::once(&i64::MAX)) {
            if state {
                let lo = segment_start.max(from);
                let hi = toggle.min(to);
                total += (hi - lo).max(0);
            }
            segment_start = toggle;
            state = !state;
        }
        total
    }

    #[derive(Debug, Clone)]
    struct Timeline {
        start: i64,
        width: i64,
        initial: bool,
        /// Per-bucket toggle offsets, sorted and unique, in `1..width`.
        toggles: Vec<Vec<i64>>,
        /// Per-boundary close delay requests.
        delays: Vec<i64>,
    }

    fn timeline() -> impl Strategy<Value = Timeline> {
        (0i64..1_000, 10i64..1_000, any::<bool>(), 1usize..20).prop_flat_map(
            |(start, width, initial, buckets)| {
                let toggles = collection::vec(
                    collection::btree_set(1..width, 0..6)
                        .prop_map(|set| set.into_iter().collect::<Vec<_>>()),
                    buckets,
                );
                let delays = collection::vec(0..width, buckets);
                (toggles, delays).prop_map(move |(toggles, delays)| Timeline {
                    start,
                    width,
                    initial,
                    toggles,
                    delays,
                })
            },
        )
    }

    // Drives the timer through a timeline where every close may run late but
    // observes at most one condition edge past its boundary. Each bucket must
    // receive exactly the true-time inside it and the corrections must
    // telescope.
    fn per_bucket_true_time_is_exact_inner(
        t: &Timeline,
    ) -> Result<(), proptest::test_runner::TestCaseError> {
        let buckets = t.toggles.len();
        let boundary = |k: usize| t.start + t.width * i64::try_from(k).expect("small");
        let absolute: Vec<i64> = t
            .toggles
            .iter()
            .enumerate()
            .flat_map(|(k, offs)| offs.iter().map(move |off| boundary(k) + off))
            .collect();

        let mut timer = ConditionTimer::new(t.initial, t.start);
        let mut condition = t.initial;
        let mut pending = absolute.iter().copied().peekable();
        let mut correction_sum = 0;

        for k in 0..buckets {
            let end = boundary(k + 1);
            let next_offsets = t.toggles.get(k + 1).map_or(&[][..], Vec::as_slice);
            let mut delay = t.delays[k];
            if let Some(second) = next_offsets.get(1) {
                delay = delay.min(second - 1);
            }
            let close_at = end + delay;

            while let Some(&toggle) = pending.peek() {
                if toggle > close_at {
                    break;
                }
                condition = !condition;
                timer.on_condition_changed(condition, toggle);
                pending.next();
            }

            let got = timer.new_bucket_start(close_at, end);
            let want = true_time_between(t.initial, &absolute, boundary(k), end);
            prop_assert!(got.duration_ns >= 0, "negative duration {got:?}");
            prop_assert_eq!(got.duration_ns, want, "bucket {} of {:?}", k, t);
            correction_sum += got.correction_ns;
            prop_assert_eq!(correction_sum, timer.current_bucket_start_delay_ns());
        }
        Ok(())
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 4_096,
            .. ProptestConfig::default()
        })]
        #[test]
        fn per_bucket_true_time_is_exact(t in timeline()) {
            per_bucket_true_time_is_exact_inner(&t)?;
        }

        #[test]
        fn punctual_closes_sum_to_total_true_time(t in timeline()) {
            let buckets = t.toggles.len();
            let boundary = |k: usize| t.start + t.width * i64::try_from(k).expect("small");
            let absolute: Vec<i64> = t
                .toggles
                .iter()
                .enumerate()
                .flat_map(|(k, offs)| offs.iter().map(move |off| boundary(k) + off))
                .collect();

            let mut timer = ConditionTimer::new(t.initial, t.start);
            let mut condition = t.initial;
            let mut pending = absolute.iter().copied().peekable();
            let mut total = 0;
            for k in 0..buckets {
                let end = boundary(k + 1);
                while let Some(&toggle) = pending.peek() {
                    if toggle >= end {
                        break;
                    }
                    condition = !condition;
                    timer.on_condition_changed(condition, toggle);
                    pending.next();
                }
                let got = timer.new_bucket_start(end, end);
                prop_assert_eq!(got.correction_ns, 0);
                total += got.duration_ns;
            }
            prop_assert_eq!(
                total,
                true_time_between(t.initial, &absolute, t.start, boundary(buckets))
            );
        }
    }
}

#[cfg(kani)]
mod verification {
    use crate::ConditionTimer;

    // With at most one condition edge between a boundary and its delayed
    // close, the drained duration is never negative and never exceeds the
    // width of the bucket.
    #[kani::proof]
    fn single_late_edge_duration_is_bounded() {
        let width: i64 = kani::any();
        kani::assume(width > 0 && width < 1_000_000);
        let initial: bool = kani::any();
        let mut timer = ConditionTimer::new(initial, 0);
        let mut condition = initial;

        let early_edge: bool = kani::any();
        if early_edge {
            let at: i64 = kani::any();
            kani::assume(at > 0 && at < width);
            condition = !condition;
            timer.on_condition_changed(condition, at);
        }

        let delay: i64 = kani::any();
        kani::assume(delay >= 0 && delay < width);
        let late_edge: bool = kani::any();
        if late_edge {
            let at: i64 = kani::any();
            kani::assume(at > width && at <= width + delay);
            condition = !condition;
            timer.on_condition_changed(condition, at);
        }

        let got = timer.new_bucket_start(width + delay, width);
        assert!(got.duration_ns >= 0);
        assert!(got.duration_ns <= width);
    }
}
