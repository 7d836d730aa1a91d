use std::sync::Arc;

use quanta::Clock;

use crate::common::SinkError;
use crate::local::{CumulativeHistogramBounds, LocalSink};
use crate::receiver::Receiver;
use crate::sink::Sink;
use crate::statsd::new_statsd_sink;

// Quiet series survive a couple of flushes before aging out.
const DEFAULT_FLUSH_THRESHOLD: u64 = 2;

const DEFAULT_SELF_STAT_PREFIX: &str = "stats.local_sink";

/// Wires the standard pipeline: receiver -> local rollup -> statsd.
///
/// The builder returns both the [`Receiver`] to hand to application code and
/// the root [`Sink`], which the caller owns: schedule periodic
/// [`Sink::flush`] calls on it, and [`Sink::close`] it at shutdown.
///
/// ```no_run
/// use vantage_metrics::Builder;
///
/// let (receiver, sink) = Builder::new()
///     .statsd_address("127.0.0.1:8125")
///     .build()
///     .expect("failed to build metrics pipeline");
///
/// receiver.scope_prefix("api").incr("requests");
/// sink.flush().expect("flush failed");
/// ```
pub struct Builder {
    statsd_address: String,
    flush_threshold: u64,
    cumulative_bounds: CumulativeHistogramBounds,
    self_stat_prefix: String,
    clock: Clock,
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            statsd_address: String::new(),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            cumulative_bounds: Vec::new(),
            self_stat_prefix: DEFAULT_SELF_STAT_PREFIX.to_string(),
            clock: Clock::new(),
        }
    }

    /// The `host:port` of the statsd daemon.  Leaving it empty disables
    /// transport entirely.
    pub fn statsd_address(mut self, addr: impl Into<String>) -> Builder {
        self.statsd_address = addr.into();
        self
    }

    /// How many flushes an untouched series survives before eviction.
    pub fn flush_threshold(mut self, flushes: u64) -> Builder {
        self.flush_threshold = flushes;
        self
    }

    /// Cumulative-frequency rules applied by the local rollup.
    pub fn cumulative_bounds(mut self, bounds: CumulativeHistogramBounds) -> Builder {
        self.cumulative_bounds = bounds;
        self
    }

    /// Name prefix for the rollup's own health gauges.
    pub fn self_stat_prefix(mut self, prefix: impl Into<String>) -> Builder {
        self.self_stat_prefix = prefix.into();
        self
    }

    /// Clock driving sample windows and stopwatches.
    pub fn clock(mut self, clock: Clock) -> Builder {
        self.clock = clock;
        self
    }

    pub fn build(self) -> Result<(Receiver, Arc<dyn Sink>), SinkError> {
        let transport = new_statsd_sink(&self.statsd_address)?;
        let rollup: Arc<dyn Sink> = Arc::new(LocalSink::new(
            transport,
            self.flush_threshold,
            self.cumulative_bounds,
            self.self_stat_prefix,
            self.clock.clone(),
        ));

        let receiver = Receiver::with_clock(Arc::clone(&rollup), self.clock);
        Ok((receiver, rollup))
    }
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_transport_still_builds_a_working_pipeline() {
        let (receiver, sink) = Builder::new().build().unwrap();

        receiver.incr("requests");
        receiver.scope_prefix("api").add_stat("latency_us", 125.0);
        sink.flush().unwrap();
        sink.close();
    }

    #[test]
    fn pipeline_rolls_up_before_transport() {
        let listener = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        listener
            .set_read_timeout(Some(std::time::Duration::from_secs(5)))
            .unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (receiver, sink) = Builder::new().statsd_address(&addr).build().unwrap();
        receiver.incr("requests");
        receiver.incr("requests");
        sink.flush().unwrap();

        let mut buf = [0u8; 4096];
        let n = listener.recv(&mut buf).unwrap();
        let payload = std::str::from_utf8(&buf[..n]).unwrap();

        // The rollup emits the accumulated counter as a gauge, plus its own
        // health gauges.
        assert!(payload.contains("requests:2|g\n"));
        assert!(payload.contains("stats.local_sink.handled:2|g\n"));
    }
}
