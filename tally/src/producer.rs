//! Thread-safe metric producer
//!
//! [`Producer`] serializes every operation of a [`BucketEngine`] through a
//! single mutex so that the event dispatch, pull callback and dump threads of
//! an embedding program may share one instance. No operation yields while
//! holding the lock.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{
    aggregate::Aggregate,
    config::Config,
    dimension::{FieldValue, MetricDimensionKey},
    engine::{BucketEngine, Error},
    event::LogEvent,
    pull::{NoPull, PullResult, PullSource},
    report::{DumpLatency, DumpReport},
    sink::{MetricsSink, Noop},
};

/// A [`BucketEngine`] behind a mutex.
#[derive(Debug)]
pub struct Producer<A, P = NoPull, S = Noop> {
    engine: Mutex<BucketEngine<A, P, S>>,
}

impl<A, P, S> From<BucketEngine<A, P, S>> for Producer<A, P, S> {
    fn from(engine: BucketEngine<A, P, S>) -> Self {
        Self {
            engine: Mutex::new(engine),
        }
    }
}

impl<A, P, S> Producer<A, P, S>
where
    A: Aggregate,
    P: PullSource,
    S: MetricsSink,
{
    /// Create a new producer. See [`BucketEngine::new`].
    ///
    /// # Errors
    ///
    /// Function will error if the engine cannot be built.
    pub fn new(
        config: Config,
        time_base_ns: i64,
        start_ns: i64,
        pull: P,
        sink: S,
    ) -> Result<Self, Error> {
        BucketEngine::new(config, time_base_ns, start_ns, pull, sink).map(Self::from)
    }

    // The engine never panics mid-mutation, a poisoned lock still guards a
    // consistent engine.
    fn lock(&self) -> MutexGuard<'_, BucketEngine<A, P, S>> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the engine while holding the lock.
    pub fn with_engine<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&BucketEngine<A, P, S>) -> R,
    {
        f(&*self.lock())
    }

    /// See [`BucketEngine::on_log_event`].
    pub fn on_log_event(&self, event: &LogEvent) {
        self.lock().on_log_event(event);
    }

    /// See [`BucketEngine::on_matched_log_event`].
    pub fn on_matched_log_event(&self, key: &MetricDimensionKey, event: &LogEvent) {
        self.lock().on_matched_log_event(key, event);
    }

    /// See [`BucketEngine::on_condition_changed`].
    pub fn on_condition_changed(&self, condition: bool, event_time_ns: i64) {
        self.lock().on_condition_changed(condition, event_time_ns);
    }

    /// See [`BucketEngine::on_active_state_changed`].
    pub fn on_active_state_changed(&self, event_time_ns: i64, is_active: bool) {
        self.lock().on_active_state_changed(event_time_ns, is_active);
    }

    /// See [`BucketEngine::on_state_changed`].
    pub fn on_state_changed(&self, event_time_ns: i64, old_state: &FieldValue, new_state: &FieldValue) {
        self.lock()
            .on_state_changed(event_time_ns, old_state, new_state);
    }

    /// See [`BucketEngine::on_data_pulled`].
    pub fn on_data_pulled(&self, events: &[LogEvent], result: PullResult, original_pull_time_ns: i64) {
        self.lock()
            .on_data_pulled(events, result, original_pull_time_ns);
    }

    /// See [`BucketEngine::notify_app_upgrade`].
    pub fn notify_app_upgrade(&self, event_time_ns: i64) {
        self.lock().notify_app_upgrade(event_time_ns);
    }

    /// See [`BucketEngine::on_init_completed`].
    pub fn on_init_completed(&self, event_time_ns: i64) {
        self.lock().on_init_completed(event_time_ns);
    }

    /// See [`BucketEngine::on_dump_report`].
    pub fn on_dump_report(
        &self,
        dump_time_ns: i64,
        include_current_partial_bucket: bool,
        erase_data: bool,
        latency: DumpLatency,
    ) -> DumpReport {
        self.lock().on_dump_report(
            dump_time_ns,
            include_current_partial_bucket,
            erase_data,
            latency,
        )
    }

    /// See [`BucketEngine::drop_data`].
    pub fn drop_data(&self, drop_time_ns: i64) {
        self.lock().drop_data(drop_time_ns);
    }

    /// See [`BucketEngine::flush_if_needed`].
    pub fn flush_if_needed(&self, event_time_ns: i64) {
        self.lock().flush_if_needed(event_time_ns);
    }

    /// See [`BucketEngine::byte_size`].
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.lock().byte_size()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;
    use crate::{
        aggregate::Numeric,
        config::{Aggregation, NS_PER_SEC, ValueField},
        report::ReportValue,
    };

    #[test]
    fn concurrent_events_are_all_counted() {
        let mut config = Config::new(
            1,
            10,
            vec![ValueField {
                field: 0,
                aggregation: Aggregation::Sum,
            }],
        );
        config.bucket_size_nanos = 60 * NS_PER_SEC;
        let producer: Arc<Producer<Numeric>> =
            Arc::new(Producer::new(config, 0, 0, NoPull, Noop).expect("valid producer"));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let producer = Arc::clone(&producer);
                thread::spawn(move || {
                    for _ in 0..100 {
                        producer.on_log_event(&LogEvent::new(10, NS_PER_SEC, vec![FieldValue::Int(1)]));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread panicked");
        }

        let report = producer.on_dump_report(60 * NS_PER_SEC, false, true, DumpLatency::Fast);
        assert_eq!(report.data[0].buckets[0].values[0].value, ReportValue::Long(400));
        assert_eq!(producer.with_engine(BucketEngine::current_bucket_num), 1);
    }
}
