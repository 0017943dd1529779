//! Condition-aware, dimension-sliced time bucketing for metric producers.
//!
//! This library ingests a stream of timestamped events and aggregates their
//! values into fixed-width time buckets, one aggregate per value field and
//! per slice. A slice is identified by the values of the event's "what"
//! dimensions together with the current values of the states the metric is
//! sliced by. Alongside the aggregates every bucket carries how long the
//! metric's condition was true within it.
//!
//! The [`engine::BucketEngine`] is the core state machine. It is generic over
//! its [`aggregate::Aggregate`] strategy, its [`pull::PullSource`] and its
//! [`sink::MetricsSink`]. [`producer::Producer`] wraps it for shared use.

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

pub mod aggregate;
pub mod bucket;
pub mod config;
pub mod dimension;
pub mod engine;
pub mod event;
pub mod producer;
pub mod pull;
pub mod report;
pub mod sink;

pub use config::Config;
pub use engine::BucketEngine;
pub use producer::Producer;
