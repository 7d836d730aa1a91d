use std::io::Write;
use std::net::TcpStream;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rand::Rng;
use tracing::warn;

use crate::common::{MetricKind, SinkError, Tags};
use crate::pool::BufferPool;
use crate::sink::Sink;

/// A sink speaking the Wavefront line protocol over TCP.
///
/// Events accumulate in an in-memory buffer; [`Sink::flush`] swaps the
/// buffer out and ships it over a fresh connection to one randomly chosen
/// proxy, so repeated flushes spread load across the configured endpoints.
/// Unlike UDP statsd, TCP can actually report failure, so flush errors are
/// both logged and returned.
pub struct WavefrontSink {
    origin: String,
    host_ports: Vec<String>,
    state: Mutex<State>,
    pool: BufferPool,
}

struct State {
    buffer: Vec<u8>,
    closed: bool,
}

impl WavefrontSink {
    /// `origin` is reported as the `host=` tag on every line; `host_ports`
    /// are the candidate proxy endpoints.
    pub fn new(origin: impl Into<String>, host_ports: Vec<String>) -> WavefrontSink {
        WavefrontSink {
            origin: origin.into(),
            host_ports,
            state: Mutex::new(State { buffer: Vec::new(), closed: false }),
            pool: BufferPool::new(),
        }
    }
}

impl Sink for WavefrontSink {
    fn handle(&self, name: &str, tags: &Tags, value: f64, _kind: MetricKind)
        -> Result<(), SinkError> {
        if name.is_empty() {
            return Err(SinkError::EmptyMetricName);
        }

        let epoch_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        // <name> <value> <epochSeconds> host=<origin> [k=v ...]
        let mut line = self.pool.get();
        let _ = write!(line, "{name} {value:.6} {epoch_secs} host={}", self.origin);
        for (k, v) in tags.iter() {
            let _ = write!(line, " {k}={v}");
        }
        line.push(b'\n');

        let mut state = self.state.lock();
        if state.closed {
            self.pool.put(line);
            return Err(SinkError::Closed);
        }
        state.buffer.extend_from_slice(&line);
        drop(state);

        self.pool.put(line);
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        let pending = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.buffer)
        };

        if pending.is_empty() {
            return Ok(());
        }

        let idx = rand::rng().random_range(0..self.host_ports.len());
        let host = &self.host_ports[idx];

        let send = TcpStream::connect(host).and_then(|mut conn| conn.write_all(&pending));
        if let Err(e) = &send {
            warn!(host = %host, error = %e, "error while writing to wavefront");
        }
        send.map_err(SinkError::from)
    }

    fn close(&self) {
        self.state.lock().closed = true;
        if let Err(e) = self.flush() {
            warn!(error = %e, "final wavefront flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Read;
    use std::net::TcpListener;
    use std::thread;

    fn accept_one(listener: TcpListener) -> thread::JoinHandle<String> {
        thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut data = String::new();
            conn.read_to_string(&mut data).unwrap();
            data
        })
    }

    #[test]
    fn lines_carry_origin_and_tags() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let reader = accept_one(listener);

        let sink = WavefrontSink::new("web1", vec![addr]);
        let tags = Tags::from([("env", "prod")]);
        sink.handle("reqs", &tags, 1.5, MetricKind::Stat).unwrap();
        sink.flush().unwrap();

        let line = reader.join().unwrap();
        let fields: Vec<&str> = line.trim_end().split(' ').collect();
        assert_eq!(fields[0], "reqs");
        assert_eq!(fields[1], "1.500000");
        assert!(fields[2].parse::<u64>().is_ok());
        assert_eq!(fields[3], "host=web1");
        assert_eq!(fields[4], "env=prod");
    }

    #[test]
    fn flush_with_nothing_buffered_makes_no_connection() {
        // No listener exists at this address; an empty flush must not try
        // to connect at all.
        let sink = WavefrontSink::new("web1", vec!["127.0.0.1:9".to_string()]);
        sink.flush().unwrap();
    }

    #[test]
    fn handle_after_close_errors() {
        let sink = WavefrontSink::new("web1", vec!["127.0.0.1:9".to_string()]);
        sink.close();

        let err = sink
            .handle("late", &Tags::new(), 1.0, MetricKind::Counter)
            .unwrap_err();
        assert!(matches!(err, SinkError::Closed));
    }

    #[test]
    fn unreachable_proxy_surfaces_the_error() {
        let sink = WavefrontSink::new("web1", vec!["127.0.0.1:9".to_string()]);
        sink.handle("m", &Tags::new(), 1.0, MetricKind::Counter).unwrap();
        assert!(sink.flush().is_err());
    }
}
