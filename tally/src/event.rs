//! Log events as delivered by an event source or a pull.

use serde::{Deserialize, Serialize};

use crate::dimension::FieldValue;

/// A timestamped event carrying positional, typed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogEvent {
    /// The atom this event is an instance of.
    pub atom_id: u32,
    /// Elapsed-time timestamp of the event, in nanoseconds.
    pub timestamp_ns: i64,
    /// Field values, addressed by position.
    #[serde(default)]
    pub fields: Vec<FieldValue>,
}

impl LogEvent {
    /// Create a new event.
    #[must_use]
    pub fn new(atom_id: u32, timestamp_ns: i64, fields: Vec<FieldValue>) -> Self {
        Self {
            atom_id,
            timestamp_ns,
            fields,
        }
    }

    /// The field at `position`, if present.
    #[must_use]
    pub fn field(&self, position: usize) -> Option<&FieldValue> {
        self.fields.get(position)
    }
}
