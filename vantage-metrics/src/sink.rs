use crate::common::{MetricKind, SinkError, Tags};

/// Destination for metric events.
///
/// A sink accepts individual counter/gauge/stat observations and decides
/// what becomes of them: batching them onto the wire
/// ([`StatsdSink`](crate::StatsdSink)), aggregating them locally
/// ([`LocalSink`](crate::LocalSink)), or discarding them ([`NullSink`]).
pub trait Sink: Send + Sync {
    /// Accepts one observation.
    ///
    /// Fails only on malformed input (an empty metric name); transport
    /// trouble is handled internally and never surfaced here.
    fn handle(&self, name: &str, tags: &Tags, value: f64, kind: MetricKind)
        -> Result<(), SinkError>;

    /// Forces emission of any buffered state.
    fn flush(&self) -> Result<(), SinkError>;

    /// Flushes and releases the sink's resources.
    ///
    /// Expected to be called once at shutdown; no further `handle` calls
    /// should follow it.
    fn close(&self);
}

/// A sink that discards everything.
///
/// The safe default wherever telemetry is not configured.
pub struct NullSink;

impl Sink for NullSink {
    fn handle(
        &self,
        _name: &str,
        _tags: &Tags,
        _value: f64,
        _kind: MetricKind,
    ) -> Result<(), SinkError> {
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }

    fn close(&self) {}
}
