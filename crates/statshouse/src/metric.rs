// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::MAX_DIMENSIONS;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tracing::debug;
use ustr::Ustr;

#[derive(
    Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    #[display("counter")]
    #[serde(alias = "count")]
    Counter,
    #[display("value")]
    Value,
    #[display("unique")]
    Unique,
}

impl MetricKind {
    /// Bit announcing this kind in a record's field mask.
    #[must_use]
    pub const fn field_mask(self) -> u32 {
        match self {
            MetricKind::Counter => 1 << 0,
            MetricKind::Value => 1 << 1,
            MetricKind::Unique => 1 << 2,
        }
    }

    #[must_use]
    pub fn from_field_mask(mask: u32) -> Option<Self> {
        match mask {
            1 => Some(MetricKind::Counter),
            2 => Some(MetricKind::Value),
            4 => Some(MetricKind::Unique),
            _ => None,
        }
    }
}

/// One parsed measurement.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Sample {
    Counter(f64),
    Value(f64),
    Unique(i64),
}

impl Sample {
    #[must_use]
    pub const fn zero(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => Sample::Counter(0.0),
            MetricKind::Value => Sample::Value(0.0),
            MetricKind::Unique => Sample::Unique(0),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> MetricKind {
        match self {
            Sample::Counter(_) => MetricKind::Counter,
            Sample::Value(_) => MetricKind::Value,
            Sample::Unique(_) => MetricKind::Unique,
        }
    }
}

/// Samples carried by an event. Counters hold a running sum, the other kinds
/// keep every observation in arrival order.
#[derive(Clone, Debug, PartialEq)]
pub enum Samples {
    Counter(f64),
    Value(Vec<f64>),
    Unique(Vec<i64>),
}

impl Samples {
    #[must_use]
    pub const fn kind(&self) -> MetricKind {
        match self {
            Samples::Counter(_) => MetricKind::Counter,
            Samples::Value(_) => MetricKind::Value,
            Samples::Unique(_) => MetricKind::Unique,
        }
    }

    /// Number of samples. A counter always counts as one.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Samples::Counter(_) => 1,
            Samples::Value(values) => values.len(),
            Samples::Unique(values) => values.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Folds `sample` in: counters add, the other kinds append. Returns false
    /// when the kinds disagree.
    pub fn push(&mut self, sample: Sample) -> bool {
        match (self, sample) {
            (Samples::Counter(sum), Sample::Counter(v)) => *sum += v,
            (Samples::Value(values), Sample::Value(v)) => values.push(v),
            (Samples::Unique(values), Sample::Unique(v)) => values.push(v),
            _ => return false,
        }
        true
    }
}

impl From<Sample> for Samples {
    fn from(sample: Sample) -> Self {
        match sample {
            Sample::Counter(v) => Samples::Counter(v),
            Sample::Value(v) => Samples::Value(vec![v]),
            Sample::Unique(v) => Samples::Unique(vec![v]),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Dimension {
    pub key: Ustr,
    pub value: String,
}

/// A fully resolved metric ready to be aggregated or encoded.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricEvent {
    pub name: Ustr,
    pub samples: Samples,
    pub dimensions: Vec<Dimension>,
}

impl MetricEvent {
    #[must_use]
    pub fn new(name: impl Into<Ustr>, sample: Sample) -> Self {
        MetricEvent {
            name: name.into(),
            samples: sample.into(),
            dimensions: Vec::new(),
        }
    }

    #[must_use]
    pub fn counter(name: &str, value: f64) -> Self {
        Self::new(name, Sample::Counter(value))
    }

    #[must_use]
    pub fn value(name: &str, value: f64) -> Self {
        Self::new(name, Sample::Value(value))
    }

    #[must_use]
    pub fn unique(name: &str, value: i64) -> Self {
        Self::new(name, Sample::Unique(value))
    }

    /// An event of `kind` holding a single zero sample.
    #[must_use]
    pub fn zero_sample(name: Ustr, kind: MetricKind) -> Self {
        MetricEvent {
            name,
            samples: Sample::zero(kind).into(),
            dimensions: Vec::new(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> MetricKind {
        self.samples.kind()
    }

    #[must_use]
    pub fn with_dimension(mut self, key: &str, value: &str) -> Self {
        self.push_dimension(Ustr::from(key), value);
        self
    }

    /// Appends a dimension, ignoring it once all slots are taken.
    pub fn push_dimension(&mut self, key: Ustr, value: impl Into<String>) -> bool {
        if self.dimensions.len() >= MAX_DIMENSIONS {
            debug!("metric {} already has {} dimensions", self.name, MAX_DIMENSIONS);
            return false;
        }
        self.dimensions.push(Dimension {
            key,
            value: value.into(),
        });
        true
    }

    pub fn push_sample(&mut self, sample: Sample) -> bool {
        self.samples.push(sample)
    }

    #[must_use]
    pub fn dimension(&self, key: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|d| d.key.as_str() == key)
            .map(|d| d.value.as_str())
    }

    /// The event's only sample, if it carries exactly one.
    #[must_use]
    pub fn single_sample(&self) -> Option<Sample> {
        match &self.samples {
            Samples::Counter(v) => Some(Sample::Counter(*v)),
            Samples::Value(values) if values.len() == 1 => Some(Sample::Value(values[0])),
            Samples::Unique(values) if values.len() == 1 => Some(Sample::Unique(values[0])),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display_and_mask() {
        assert_eq!(MetricKind::Counter.to_string(), "counter");
        assert_eq!(MetricKind::Unique.to_string(), "unique");
        assert_eq!(MetricKind::Counter.field_mask(), 1);
        assert_eq!(MetricKind::Value.field_mask(), 2);
        assert_eq!(MetricKind::Unique.field_mask(), 4);
        assert_eq!(MetricKind::from_field_mask(2), Some(MetricKind::Value));
        assert_eq!(MetricKind::from_field_mask(3), None);
    }

    #[test]
    fn test_kind_deserialize_accepts_count() {
        let kind: MetricKind = serde_json::from_str("\"count\"").unwrap();
        assert_eq!(kind, MetricKind::Counter);
        let kind: MetricKind = serde_json::from_str("\"value\"").unwrap();
        assert_eq!(kind, MetricKind::Value);
    }

    #[test]
    fn test_samples_push() {
        let mut samples = Samples::from(Sample::Counter(2.0));
        assert!(samples.push(Sample::Counter(3.0)));
        assert_eq!(samples, Samples::Counter(5.0));
        assert!(!samples.push(Sample::Value(1.0)));

        let mut samples = Samples::from(Sample::Unique(7));
        assert!(samples.push(Sample::Unique(9)));
        assert_eq!(samples, Samples::Unique(vec![7, 9]));
        assert_eq!(samples.len(), 2);
    }

    #[test]
    fn test_dimensions_are_capped() {
        let mut event = MetricEvent::counter("requests", 1.0);
        for i in 0..MAX_DIMENSIONS {
            assert!(event.push_dimension(Ustr::from(i.to_string().as_str()), "v"));
        }
        assert!(!event.push_dimension(Ustr::from("extra"), "v"));
        assert_eq!(event.dimensions.len(), MAX_DIMENSIONS);
    }

    #[test]
    fn test_single_sample() {
        let mut event = MetricEvent::value("latency", 0.5).with_dimension("0", "200");
        assert_eq!(event.single_sample(), Some(Sample::Value(0.5)));
        assert_eq!(event.dimension("0"), Some("200"));
        event.push_sample(Sample::Value(0.7));
        assert_eq!(event.single_sample(), None);
        assert_eq!(event.kind(), MetricKind::Value);
    }
}
