//! Shared test support.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{MetricKind, SinkError, Tags};
use crate::sink::Sink;

/// One event as seen by a [`RecordingSink`].
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RecordedEvent {
    pub name: String,
    pub tags: Tags,
    pub value: f64,
    pub kind: MetricKind,
}

/// A sink that records everything handed to it, for assertions.
///
/// An ignore prefix can be set to filter out self-stats when a test only
/// cares about the series under test.
#[derive(Default)]
pub(crate) struct RecordingSink {
    ignore_prefix: Option<String>,
    events: Mutex<Vec<RecordedEvent>>,
    flushes: Mutex<usize>,
}

impl RecordingSink {
    pub fn new() -> Arc<RecordingSink> {
        Arc::new(RecordingSink::default())
    }

    pub fn ignoring_prefix(prefix: &str) -> Arc<RecordingSink> {
        Arc::new(RecordingSink {
            ignore_prefix: Some(prefix.to_string()),
            ..RecordingSink::default()
        })
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    pub fn flushes(&self) -> usize {
        *self.flushes.lock()
    }
}

impl Sink for RecordingSink {
    fn handle(&self, name: &str, tags: &Tags, value: f64, kind: MetricKind)
        -> Result<(), SinkError> {
        if name.is_empty() {
            return Err(SinkError::EmptyMetricName);
        }
        if let Some(prefix) = &self.ignore_prefix {
            if name.starts_with(prefix.as_str()) {
                return Ok(());
            }
        }

        self.events.lock().push(RecordedEvent {
            name: name.to_string(),
            tags: tags.clone(),
            value,
            kind,
        });
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        *self.flushes.lock() += 1;
        Ok(())
    }

    fn close(&self) {}
}
