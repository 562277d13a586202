//! Check results and change detection
//!
//! A [`StatsSnapshot`] is one result record. Every check keeps the two most
//! recent ones in [`Stats`]; installing a new snapshot shifts current into
//! previous and reports a [`Transition`] when availability or state changed
//! between two *known* values.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether the target could be reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    #[default]
    Unknown,
    Available,
    Unavailable,
}

/// Whether the target behaved as expected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    #[default]
    Unknown,
    Good,
    Bad,
}

impl Availability {
    pub fn is_known(self) -> bool {
        self != Availability::Unknown
    }
}

impl State {
    pub fn is_known(self) -> bool {
        self != State::Unknown
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Availability::Unknown => write!(f, "unknown"),
            Availability::Available => write!(f, "available"),
            Availability::Unavailable => write!(f, "unavailable"),
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Unknown => write!(f, "unknown"),
            State::Good => write!(f, "good"),
            State::Bad => write!(f, "bad"),
        }
    }
}

/// Typed metric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum MetricValue {
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    Double(f64),
    Text(String),
}

/// Type tag of a [`MetricValue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    I32,
    U32,
    I64,
    U64,
    Double,
    Text,
}

impl MetricValue {
    pub fn metric_type(&self) -> MetricType {
        match self {
            MetricValue::I32(_) => MetricType::I32,
            MetricValue::U32(_) => MetricType::U32,
            MetricValue::I64(_) => MetricType::I64,
            MetricValue::U64(_) => MetricType::U64,
            MetricValue::Double(_) => MetricType::Double,
            MetricValue::Text(_) => MetricType::Text,
        }
    }

    /// Numeric view of the value, `None` for text
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::I32(v) => Some(f64::from(*v)),
            MetricValue::U32(v) => Some(f64::from(*v)),
            MetricValue::I64(v) => Some(*v as f64),
            MetricValue::U64(v) => Some(*v as f64),
            MetricValue::Double(v) => Some(*v),
            MetricValue::Text(_) => None,
        }
    }
}

impl From<i32> for MetricValue {
    fn from(value: i32) -> Self {
        MetricValue::I32(value)
    }
}

impl From<u32> for MetricValue {
    fn from(value: u32) -> Self {
        MetricValue::U32(value)
    }
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::I64(value)
    }
}

impl From<u64> for MetricValue {
    fn from(value: u64) -> Self {
        MetricValue::U64(value)
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Double(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::Text(value.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        MetricValue::Text(value)
    }
}

/// One result record for a check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// When the firing that produced this record started
    pub whence: Option<DateTime<Utc>>,

    /// How long the firing took
    pub duration: Option<Duration>,

    pub available: Availability,

    pub state: State,

    /// Human-readable status line
    pub status: Option<String>,

    /// Metrics keyed by name (ordered for stable output)
    pub metrics: BTreeMap<String, MetricValue>,
}

impl StatsSnapshot {
    /// Record a metric, replacing any earlier value under the same name
    pub fn set_metric(&mut self, name: impl Into<String>, value: impl Into<MetricValue>) {
        self.metrics.insert(name.into(), value.into());
    }

    pub fn metric(&self, name: &str) -> Option<&MetricValue> {
        self.metrics.get(name)
    }

    /// Status with line breaks flattened to spaces
    fn normalized_status(status: Option<String>) -> Option<String> {
        status.map(|status| status.replace(['\r', '\n'], " "))
    }
}

/// A reportable change between two known results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub previous: (Availability, State),
    pub current: (Availability, State),
}

/// Whether `previous -> current` is a reportable transition
///
/// Either dimension counts, but only when both of its values are known.
pub fn is_reportable_change(previous: &StatsSnapshot, current: &StatsSnapshot) -> bool {
    let availability_changed = previous.available.is_known()
        && current.available.is_known()
        && previous.available != current.available;
    let state_changed =
        previous.state.is_known() && current.state.is_known() && previous.state != current.state;

    availability_changed || state_changed
}

/// The previous/current result pair of a check
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    previous: StatsSnapshot,
    current: StatsSnapshot,
}

impl Stats {
    pub fn previous(&self) -> &StatsSnapshot {
        &self.previous
    }

    pub fn current(&self) -> &StatsSnapshot {
        &self.current
    }

    /// Shift current into previous and make `next` current
    pub fn install(&mut self, mut next: StatsSnapshot) -> Option<Transition> {
        next.status = StatsSnapshot::normalized_status(next.status.take());
        self.previous = std::mem::replace(&mut self.current, next);

        is_reportable_change(&self.previous, &self.current).then_some(Transition {
            previous: (self.previous.available, self.previous.state),
            current: (self.current.available, self.current.state),
        })
    }
}
