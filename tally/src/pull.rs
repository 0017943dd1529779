//! Pull sources
//!
//! Pulled metrics cannot close a bucket on their own: the engine must fetch a
//! fresh snapshot first. It does so through a [`PullSource`] handed to it at
//! construction. Push metrics use [`NoPull`].

use crate::event::LogEvent;

/// Errors produced by a [`PullSource`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The source could not produce data for the requested time
    #[error("pull for atom {atom_id} failed: {reason}")]
    Failed {
        /// Atom that was requested
        atom_id: u32,
        /// Human readable cause
        reason: String,
    },
}

/// Outcome of a scheduled pull delivered through
/// [`BucketEngine::on_data_pulled`](crate::engine::BucketEngine::on_data_pulled).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullResult {
    /// The pull produced data
    Success,
    /// The pull failed
    Fail,
}

/// A synchronous, on-demand source of events.
pub trait PullSource {
    /// Pull all current events of `atom_id` at `timestamp_ns`.
    ///
    /// # Errors
    ///
    /// Implementations return an error when no snapshot can be produced.
    fn pull(&mut self, atom_id: u32, timestamp_ns: i64) -> Result<Vec<LogEvent>, Error>;
}

/// The source of a push metric; it never produces data.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPull;

impl PullSource for NoPull {
    fn pull(&mut self, _atom_id: u32, _timestamp_ns: i64) -> Result<Vec<LogEvent>, Error> {
        Ok(Vec::new())
    }
}
