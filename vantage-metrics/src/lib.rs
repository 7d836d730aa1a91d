//! An in-process metrics pipeline: record counters, gauges, and stats at
//! high frequency, reduce them locally, and ship compact summaries to a
//! statsd-compatible backend over UDP.
//!
//! # Architecture
//!
//! Application code talks to a [`Receiver`], which attaches its scope
//! (a dotted name prefix plus a tag set) to every event and forwards it to a
//! shared [`Sink`].  Sinks compose:
//!
//! - [`LocalSink`] aggregates events in memory -- counters accumulate,
//!   gauges keep their latest value, stats feed a windowed sample -- and on
//!   each flush pushes summarized gauges downstream, evicting series that
//!   have gone quiet.
//! - [`StatsdSink`] encodes events into the statsd wire format and batches
//!   them onto a UDP socket from a single writer thread.
//! - [`WavefrontSink`] buffers Wavefront-format lines and ships them over
//!   TCP on flush.
//! - [`NullSink`] discards everything, for contexts without telemetry.
//!
//! [`Builder`] wires the standard stack in one call:
//!
//! ```no_run
//! use vantage_metrics::{Builder, Tags};
//!
//! let (metrics, sink) = Builder::new()
//!     .statsd_address("127.0.0.1:8125")
//!     .build()
//!     .expect("failed to build metrics pipeline");
//!
//! let api = metrics.scope_prefix("api");
//! api.incr("requests");
//! api.scope_tags(Tags::from([("route", "/users")])).add_stat("latency_us", 1250.0);
//!
//! // The caller owns the flush cadence and shutdown.
//! sink.flush().expect("flush failed");
//! sink.close();
//! ```
//!
//! Metrics emission never fails application code: validation errors are the
//! only thing `handle` reports, transport failures are logged and counted,
//! and under sustained overload observations are dropped rather than
//! blocking callers indefinitely.

mod builder;
mod common;
mod local;
mod pool;
mod receiver;
mod sink;
mod statsd;
#[cfg(test)]
mod test_util;
mod wavefront;

pub use self::builder::Builder;
pub use self::common::{format_name, format_tags, MetricKind, SinkError, Tags};
pub use self::local::{CumulativeHistogramBounds, LocalSink};
pub use self::pool::BufferPool;
pub use self::receiver::{Receiver, Stopwatch};
pub use self::sink::{NullSink, Sink};
pub use self::statsd::{new_statsd_sink, StatsdSink};
pub use self::wavefront::WavefrontSink;
