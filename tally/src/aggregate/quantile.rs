//! Quantile aggregates
//!
//! Distributional metrics fold integral samples into a [`DDSketch`]. The
//! sketch is treated as opaque: it is created on the first sample, fed every
//! later one, and summarized at report time.

use std::fmt;

use serde::Serialize;
use sketches_ddsketch::{Config, DDSketch};

use super::Aggregate;
use crate::{config::ValueField, dimension::FieldValue, report::ReportValue};

// Bin ceiling of the default sketch configuration. A sketch never holds more
// bins than samples nor more than this.
const MAX_BINS: usize = 2048;

/// Summary of a quantile sketch as reported.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuantileSummary {
    /// Number of samples
    pub count: u64,
    /// Smallest sample
    pub min: Option<f64>,
    /// Largest sample
    pub max: Option<f64>,
    /// Sum of all samples
    pub sum: Option<f64>,
    /// Median estimate
    pub p50: Option<f64>,
    /// 90th percentile estimate
    pub p90: Option<f64>,
    /// 99th percentile estimate
    pub p99: Option<f64>,
}

/// Quantile sketch of an integral field.
pub struct Quantile {
    sketch: DDSketch,
}

impl fmt::Debug for Quantile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Quantile")
            .field("count", &self.sketch.count())
            .finish_non_exhaustive()
    }
}

impl Quantile {
    /// Estimate the `q` quantile, `q` in `[0, 1]`.
    #[must_use]
    pub fn quantile(&self, q: f64) -> Option<f64> {
        self.sketch.quantile(q).ok().flatten()
    }

    /// Number of samples folded in.
    #[must_use]
    pub fn count(&self) -> usize {
        self.sketch.count()
    }
}

impl Aggregate for Quantile {
    type Scalar = i64;

    fn extract(value: &FieldValue) -> Option<i64> {
        match value {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Float(_) | FieldValue::Bool(_) | FieldValue::Str(_) => None,
        }
    }

    fn create(_field: &ValueField) -> Self {
        Self {
            sketch: DDSketch::new(Config::defaults()),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn add(&mut self, scalar: i64) {
        self.sketch.add(scalar as f64);
    }

    fn serialize(&self) -> ReportValue {
        ReportValue::Sketch(QuantileSummary {
            count: self.sketch.count() as u64,
            min: self.sketch.min(),
            max: self.sketch.max(),
            sum: self.sketch.sum(),
            p50: self.quantile(0.5),
            p90: self.quantile(0.9),
            p99: self.quantile(0.99),
        })
    }

    fn size(&self) -> usize {
        std::mem::size_of::<Self>() + self.sketch.count().min(MAX_BINS) * std::mem::size_of::<u64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Aggregation;

    fn field() -> ValueField {
        ValueField {
            field: 0,
            aggregation: Aggregation::Sum,
        }
    }

    #[test]
    fn accepts_only_integers() {
        assert_eq!(Quantile::extract(&FieldValue::Int(4)), Some(4));
        assert!(Quantile::extract(&FieldValue::Float(4.0)).is_none());
        assert!(Quantile::extract(&FieldValue::Str("4".into())).is_none());
    }

    #[test]
    fn summarizes_samples() {
        let mut q = Quantile::create(&field());
        for v in 1..=100 {
            q.add(v);
        }
        let ReportValue::Sketch(summary) = q.serialize() else {
            panic!("expected sketch");
        };
        assert_eq!(summary.count, 100);
        assert_eq!(summary.min, Some(1.0));
        assert_eq!(summary.max, Some(100.0));
        assert_eq!(summary.sum, Some(5050.0));
        let p50 = summary.p50.expect("median");
        assert!((p50 - 50.0).abs() <= 2.0, "p50 {p50}");
    }

    #[test]
    fn size_grows_with_samples() {
        let mut q = Quantile::create(&field());
        let empty = q.size();
        q.add(1);
        q.add(2);
        assert_eq!(q.size(), empty + 2 * std::mem::size_of::<u64>());
    }
}
