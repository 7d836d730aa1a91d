use std::collections::BTreeMap;
use std::fmt;
use std::io;

use thiserror::Error;

/// Errors surfaced by [`Sink`](crate::Sink) operations.
///
/// Only input validation and construction can fail; transport problems on
/// the hot path are logged and swallowed, since the wire protocols involved
/// make no delivery promises to begin with.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("cannot handle empty metric name")]
    EmptyMetricName,

    #[error("sink is closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The three event shapes a sink can be handed.
///
/// The kind decides how a value aggregates: counters accumulate, gauges
/// replace, and stats feed a windowed sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Counter,
    Gauge,
    Stat,
}

impl MetricKind {
    /// The statsd wire token for this kind.
    pub fn wire_type(&self) -> &'static str {
        match self {
            MetricKind::Counter => "ct",
            MetricKind::Gauge => "g",
            MetricKind::Stat => "h",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_type())
    }
}

/// A set of key/value tags attached to a metric.
///
/// Tags are stored in a sorted map so that serialization is canonical: the
/// same set of pairs always produces the same string, which is what makes
/// the serialized form usable as an aggregation key.  Keep cardinality in
/// mind -- every distinct tag set becomes its own series downstream.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tags(BTreeMap<String, String>);

impl Tags {
    pub fn new() -> Tags {
        Tags::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Iterates over the pairs in canonical (key-sorted) order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns a new set combining both sides, with `overrides` winning on
    /// key collision.
    pub fn merged(&self, overrides: &Tags) -> Tags {
        let mut merged = self.clone();
        for (k, v) in overrides.iter() {
            merged.insert(k, v);
        }
        merged
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Tags {
    fn from(pairs: [(K, V); N]) -> Tags {
        pairs.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Tags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Tags {
        Tags(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Joins a scope prefix and a metric name with a dot, tolerating either side
/// being empty.
pub fn format_name(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        return name.to_string();
    }
    if name.is_empty() {
        return prefix.to_string();
    }
    format!("{prefix}.{name}")
}

/// Serializes tags to the canonical `k1:v1,k2:v2,` form used as an
/// aggregation key.
pub fn format_tags(tags: &Tags) -> String {
    let mut formatted = String::new();
    for (k, v) in tags.iter() {
        formatted.push_str(k);
        formatted.push(':');
        formatted.push_str(v);
        formatted.push(',');
    }
    formatted
}
