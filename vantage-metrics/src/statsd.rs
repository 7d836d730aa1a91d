use std::net::{Ipv4Addr, UdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use parking_lot::Mutex;
use tracing::warn;

use crate::common::{MetricKind, SinkError, Tags};
use crate::pool::BufferPool;
use crate::sink::{NullSink, Sink};

const BATCH_SIZE_BYTES: usize = 4096;
const CHANNEL_CAPACITY: usize = 128;
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

enum Event {
    Metric(Vec<u8>),
    Flush,
}

/// A sink that encodes events into the statsd wire format and sends them
/// over UDP in newline-joined batches.
///
/// Each accepted event is encoded into a pooled buffer and pushed onto a
/// bounded channel; a single worker thread owns the socket and drains the
/// channel, so writes are single-writer and in per-producer order without
/// any per-event locking.  Flush requests travel through the same channel,
/// which is what keeps them ordered behind events already enqueued.
///
/// The worker sends a batch as soon as it exceeds 4096 bytes, on a five
/// second tick, and on every explicit flush.  Socket errors are logged and
/// swallowed -- UDP made no promises.  When the channel is full,
/// [`Sink::handle`] blocks until the worker catches up; this is deliberate
/// backpressure rather than an error.
///
/// [`Sink::close`] disconnects the channel and joins the worker, which
/// drains every event accepted before the disconnect, flushes, and exits --
/// nothing handed to this sink is silently lost at shutdown.
pub struct StatsdSink {
    events: Mutex<Option<Sender<Event>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    pool: Arc<BufferPool>,
}

/// Creates a statsd sink for the given `host:port` address.
///
/// An empty address is the documented way to run with telemetry disabled
/// and yields a [`NullSink`].
pub fn new_statsd_sink(addr: &str) -> Result<Arc<dyn Sink>, SinkError> {
    if addr.is_empty() {
        return Ok(Arc::new(NullSink));
    }

    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect(addr)?;
    Ok(Arc::new(StatsdSink::from_socket(socket)?))
}

impl StatsdSink {
    /// Builds a sink on top of an already-connected socket.
    pub fn from_socket(socket: UdpSocket) -> Result<StatsdSink, SinkError> {
        let (tx, rx) = bounded(CHANNEL_CAPACITY);
        let pool = Arc::new(BufferPool::new());

        let worker_pool = Arc::clone(&pool);
        let worker = thread::Builder::new()
            .name("statsd-flusher".to_string())
            .spawn(move || flusher(socket, rx, worker_pool, FLUSH_INTERVAL))?;

        Ok(StatsdSink {
            events: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            pool,
        })
    }

    fn sender(&self) -> Option<Sender<Event>> {
        self.events.lock().clone()
    }
}

impl Sink for StatsdSink {
    fn handle(&self, name: &str, tags: &Tags, value: f64, kind: MetricKind)
        -> Result<(), SinkError> {
        if name.is_empty() {
            return Err(SinkError::EmptyMetricName);
        }

        let Some(tx) = self.sender() else {
            return Err(SinkError::Closed);
        };

        let mut buf = self.pool.get();
        encode_metric(&mut buf, name, tags, value, kind);

        if let Err(failed) = tx.send(Event::Metric(buf)) {
            if let Event::Metric(buf) = failed.0 {
                self.pool.put(buf);
            }
            return Err(SinkError::Closed);
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        let Some(tx) = self.sender() else {
            return Err(SinkError::Closed);
        };
        tx.send(Event::Flush).map_err(|_| SinkError::Closed)
    }

    fn close(&self) {
        // Dropping the only long-lived sender disconnects the channel; the
        // worker drains what was already accepted, flushes, and exits.
        drop(self.events.lock().take());

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("statsd flusher thread panicked");
            }
        }
    }
}

impl Drop for StatsdSink {
    fn drop(&mut self) {
        self.close();
    }
}

/// Encodes one event as `name:value|type[|#k1:v1,k2:v2]`.
fn encode_metric(buf: &mut Vec<u8>, name: &str, tags: &Tags, value: f64, kind: MetricKind) {
    buf.extend_from_slice(name.as_bytes());
    buf.push(b':');
    write_value(buf, value);
    buf.push(b'|');
    buf.extend_from_slice(kind.wire_type().as_bytes());

    if !tags.is_empty() {
        buf.extend_from_slice(b"|#");
        for (i, (k, v)) in tags.iter().enumerate() {
            if i > 0 {
                buf.push(b',');
            }
            buf.extend_from_slice(k.as_bytes());
            buf.push(b':');
            buf.extend_from_slice(v.as_bytes());
        }
    }
}

// Integral values print without a fractional part, so the common case of a
// counter increment stays as compact as `1`.
fn write_value(buf: &mut Vec<u8>, value: f64) {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        let mut formatter = itoa::Buffer::new();
        buf.extend_from_slice(formatter.format(value as i64).as_bytes());
    } else {
        let mut formatter = ryu::Buffer::new();
        buf.extend_from_slice(formatter.format(value).as_bytes());
    }
}

fn flusher(
    socket: UdpSocket,
    events: Receiver<Event>,
    pool: Arc<BufferPool>,
    interval: Duration,
) {
    let ticker = tick(interval);
    let mut batch: Vec<u8> = Vec::with_capacity(BATCH_SIZE_BYTES * 2);

    loop {
        select! {
            recv(events) -> event => match event {
                Ok(Event::Metric(buf)) => {
                    batch.extend_from_slice(&buf);
                    batch.push(b'\n');
                    pool.put(buf);
                    if batch.len() >= BATCH_SIZE_BYTES {
                        send_batch(&socket, &mut batch);
                    }
                }
                Ok(Event::Flush) => send_batch(&socket, &mut batch),
                Err(_) => {
                    // Channel disconnected: everything buffered has already
                    // been delivered to us in order, so one final flush
                    // completes the drain.
                    send_batch(&socket, &mut batch);
                    return;
                }
            },
            recv(ticker) -> _ => send_batch(&socket, &mut batch),
        }
    }
}

fn send_batch(socket: &UdpSocket, batch: &mut Vec<u8>) {
    if batch.is_empty() {
        return;
    }
    if let Err(e) = socket.send(batch) {
        warn!(error = %e, "error while writing to statsd");
    }
    batch.clear();
}
