//! Dimension keys
//!
//! Every matched event is sliced by two keys: the values of its "what"
//! dimensions and the current values of the states the metric is sliced by.
//! Together they form a [`MetricDimensionKey`]. Two events carrying the same
//! values always land in the same slice.

use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::event::LogEvent;

/// State value used for a dimension whose state has not yet been observed.
pub const UNKNOWN_STATE: i64 = -1;

/// A single typed value carried by an event field.
///
/// Floats compare bitwise so that the type admits total equality and
/// hashing. `NaN` payloads are distinct from one another only when their bit
/// patterns differ.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// A signed integer
    Int(i64),
    /// A floating point number
    Float(f64),
    /// A boolean
    Bool(bool),
    /// A string
    Str(String),
}

impl FieldValue {
    fn discriminant(&self) -> u8 {
        match self {
            FieldValue::Int(_) => 0,
            FieldValue::Float(_) => 1,
            FieldValue::Bool(_) => 2,
            FieldValue::Str(_) => 3,
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Int(a), FieldValue::Int(b)) => a == b,
            (FieldValue::Float(a), FieldValue::Float(b)) => a.to_bits() == b.to_bits(),
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a == b,
            (FieldValue::Str(a), FieldValue::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl Hash for FieldValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.discriminant().hash(state);
        match self {
            FieldValue::Int(v) => v.hash(state),
            FieldValue::Float(v) => v.to_bits().hash(state),
            FieldValue::Bool(v) => v.hash(state),
            FieldValue::Str(v) => v.hash(state),
        }
    }
}

impl PartialOrd for FieldValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FieldValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (FieldValue::Int(a), FieldValue::Int(b)) => a.cmp(b),
            (FieldValue::Float(a), FieldValue::Float(b)) => a.total_cmp(b),
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a.cmp(b),
            (FieldValue::Str(a), FieldValue::Str(b)) => a.cmp(b),
            _ => self.discriminant().cmp(&other.discriminant()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::Str(v) => write!(f, "{v:?}"),
        }
    }
}

/// An ordered set of field values usable as a map key.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct HashableDimensionKey(Vec<FieldValue>);

impl HashableDimensionKey {
    /// Create a key from `values`.
    #[must_use]
    pub fn new(values: Vec<FieldValue>) -> Self {
        Self(values)
    }

    /// The values composing this key, in order.
    #[must_use]
    pub fn values(&self) -> &[FieldValue] {
        &self.0
    }

    /// Whether this key holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<FieldValue>> for HashableDimensionKey {
    fn from(values: Vec<FieldValue>) -> Self {
        Self(values)
    }
}

impl fmt::Display for HashableDimensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{v}")?;
        }
        f.write_str("]")
    }
}

/// The slicing key of a metric: dimensions in what plus state values.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct MetricDimensionKey {
    dimensions_in_what: HashableDimensionKey,
    state_values: HashableDimensionKey,
}

impl MetricDimensionKey {
    /// Create a key from its two halves.
    #[must_use]
    pub fn new(dimensions_in_what: HashableDimensionKey, state_values: HashableDimensionKey) -> Self {
        Self {
            dimensions_in_what,
            state_values,
        }
    }

    /// The dimensions-in-what half of this key.
    #[must_use]
    pub fn dimensions_in_what(&self) -> &HashableDimensionKey {
        &self.dimensions_in_what
    }

    /// The state-values half of this key.
    #[must_use]
    pub fn state_values(&self) -> &HashableDimensionKey {
        &self.state_values
    }
}

impl fmt::Display for MetricDimensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.dimensions_in_what, self.state_values)
    }
}

/// Extracts [`MetricDimensionKey`] values from events.
#[derive(Debug, Clone, Default)]
pub struct Dimensions {
    what: Vec<usize>,
    state: Vec<usize>,
    state_groups: FxHashMap<i64, i64>,
}

impl Dimensions {
    /// Build an extractor reading the "what" dimensions from the field
    /// positions `what` and state values from the field positions `state`.
    /// Integral state values found in `state_groups` are replaced by their
    /// group value.
    #[must_use]
    pub fn new(what: Vec<usize>, state: Vec<usize>, state_groups: FxHashMap<i64, i64>) -> Self {
        Self {
            what,
            state,
            state_groups,
        }
    }

    /// Whether the metric is sliced by any state.
    #[must_use]
    pub fn is_state_sliced(&self) -> bool {
        !self.state.is_empty()
    }

    /// The key of a dimension whose state is not yet known.
    #[must_use]
    pub fn unknown_state_key(&self) -> HashableDimensionKey {
        HashableDimensionKey(vec![FieldValue::Int(UNKNOWN_STATE); self.state.len()])
    }

    /// Map a raw state value onto its state group, if any.
    #[must_use]
    pub fn map_state_value(&self, value: &FieldValue) -> FieldValue {
        match value {
            FieldValue::Int(v) => {
                FieldValue::Int(self.state_groups.get(v).copied().unwrap_or(*v))
            }
            other => other.clone(),
        }
    }

    /// Compute the slicing key of `event`. Field positions absent from the
    /// event are left out of the key; absent state fields read as unknown.
    #[must_use]
    pub fn key_for(&self, event: &LogEvent) -> MetricDimensionKey {
        let what = self
            .what
            .iter()
            .filter_map(|&pos| event.field(pos).cloned())
            .collect();
        let state = self
            .state
            .iter()
            .map(|&pos| {
                event
                    .field(pos)
                    .map_or(FieldValue::Int(UNKNOWN_STATE), |v| self.map_state_value(v))
            })
            .collect();
        MetricDimensionKey::new(HashableDimensionKey(what), HashableDimensionKey(state))
    }
}

#[cfg(test)]
mod tests {
    use rustc_hash::{FxHashMap, FxHashSet};

    use super::*;

    fn event(fields: Vec<FieldValue>) -> LogEvent {
        LogEvent::new(1, 0, fields)
    }

    #[test]
    fn identical_values_map_to_identical_keys() {
        let dims = Dimensions::new(vec![0], vec![1], FxHashMap::default());
        let a = dims.key_for(&event(vec![
            FieldValue::Str("uid".into()),
            FieldValue::Int(2),
            FieldValue::Float(1.5),
        ]));
        let b = dims.key_for(&event(vec![
            FieldValue::Str("uid".into()),
            FieldValue::Int(2),
            FieldValue::Float(99.0),
        ]));
        assert_eq!(a, b);

        let mut set = FxHashSet::default();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn state_groups_collapse_values() {
        let mut groups = FxHashMap::default();
        groups.insert(3, 1);
        groups.insert(4, 1);
        let dims = Dimensions::new(vec![], vec![0], groups);
        let three = dims.key_for(&event(vec![FieldValue::Int(3)]));
        let four = dims.key_for(&event(vec![FieldValue::Int(4)]));
        let two = dims.key_for(&event(vec![FieldValue::Int(2)]));
        assert_eq!(three, four);
        assert_ne!(three, two);
        assert_eq!(three.state_values().values(), &[FieldValue::Int(1)]);
    }

    #[test]
    fn missing_fields() {
        let dims = Dimensions::new(vec![0, 5], vec![7], FxHashMap::default());
        let key = dims.key_for(&event(vec![FieldValue::Bool(true)]));
        assert_eq!(key.dimensions_in_what().values(), &[FieldValue::Bool(true)]);
        assert_eq!(key.state_values(), &dims.unknown_state_key());
    }

    #[test]
    fn float_values_hash_bitwise() {
        assert_eq!(FieldValue::Float(0.5), FieldValue::Float(0.5));
        assert_ne!(FieldValue::Float(0.0), FieldValue::Float(-0.0));
        assert_ne!(FieldValue::Int(1), FieldValue::Float(1.0));
    }

    #[test]
    fn keys_sort_deterministically() {
        let mut keys = vec![
            MetricDimensionKey::new(vec![FieldValue::Int(2)].into(), HashableDimensionKey::default()),
            MetricDimensionKey::new(vec![FieldValue::Int(1)].into(), HashableDimensionKey::default()),
            MetricDimensionKey::new(
                vec![FieldValue::Str("a".into())].into(),
                HashableDimensionKey::default(),
            ),
        ];
        keys.sort();
        assert_eq!(keys[0].dimensions_in_what().values(), &[FieldValue::Int(1)]);
        assert_eq!(keys[2].to_string(), "[\"a\"]|[]");
    }
}
