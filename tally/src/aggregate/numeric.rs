//! Numeric aggregates
//!
//! Integral samples stay integral for as long as every sample is integral.
//! The first floating point sample promotes the aggregate to a double.

use std::cmp::Ordering;

use serde::Serialize;

use super::Aggregate;
use crate::{
    config::{Aggregation, ValueField},
    dimension::FieldValue,
    report::ReportValue,
};

/// A numeric scalar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Integral value
    Long(i64),
    /// Floating point value
    Double(f64),
}

impl Value {
    #[allow(clippy::cast_precision_loss)]
    fn as_f64(self) -> f64 {
        match self {
            Value::Long(v) => v as f64,
            Value::Double(v) => v,
        }
    }

    fn sum(self, other: Value) -> Value {
        match (self, other) {
            (Value::Long(a), Value::Long(b)) => Value::Long(a.saturating_add(b)),
            (a, b) => Value::Double(a.as_f64() + b.as_f64()),
        }
    }

    fn compare(self, other: Value) -> Ordering {
        match (self, other) {
            (Value::Long(a), Value::Long(b)) => a.cmp(&b),
            (a, b) => a.as_f64().total_cmp(&b.as_f64()),
        }
    }
}

/// Sum, minimum, maximum or mean of a numeric field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Numeric {
    aggregation: Aggregation,
    value: Option<Value>,
}

impl Numeric {
    /// The current value, `None` before the first sample.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        self.value
    }
}

impl Aggregate for Numeric {
    type Scalar = Value;

    fn extract(value: &FieldValue) -> Option<Value> {
        match value {
            FieldValue::Int(v) => Some(Value::Long(*v)),
            FieldValue::Float(v) => Some(Value::Double(*v)),
            FieldValue::Bool(_) | FieldValue::Str(_) => None,
        }
    }

    fn create(field: &ValueField) -> Self {
        Self {
            aggregation: field.aggregation,
            value: None,
        }
    }

    fn add(&mut self, scalar: Value) {
        let Some(current) = self.value else {
            self.value = Some(scalar);
            return;
        };
        let next = match self.aggregation {
            Aggregation::Sum | Aggregation::Avg => current.sum(scalar),
            Aggregation::Min => {
                if scalar.compare(current) == Ordering::Less {
                    scalar
                } else {
                    current
                }
            }
            Aggregation::Max => {
                if scalar.compare(current) == Ordering::Greater {
                    scalar
                } else {
                    current
                }
            }
        };
        self.value = Some(next);
    }

    #[allow(clippy::cast_precision_loss)]
    fn finish(self, sample_size: u64) -> Self {
        match (self.aggregation, self.value) {
            (Aggregation::Avg, Some(sum)) if sample_size > 0 => Self {
                aggregation: self.aggregation,
                value: Some(Value::Double(sum.as_f64() / sample_size as f64)),
            },
            _ => self,
        }
    }

    fn serialize(&self) -> ReportValue {
        match self.value {
            Some(Value::Long(v)) => ReportValue::Long(v),
            Some(Value::Double(v)) => ReportValue::Double(v),
            None => ReportValue::Long(0),
        }
    }

    fn size(&self) -> usize {
        std::mem::size_of::<Self>()
    }
}
