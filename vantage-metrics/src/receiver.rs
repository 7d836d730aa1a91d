use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use quanta::{Clock, Instant};
use tracing::warn;

use crate::common::{format_name, MetricKind, Tags};
use crate::sink::{NullSink, Sink};

/// The application-facing recording API.
///
/// A receiver is a cheap, cloneable view onto a shared sink, carrying a name
/// prefix and a tag set that get attached to everything it records.  Child
/// views are derived with the `scope*` methods: prefixes dot-join and child
/// tags override parent tags on collision.
///
/// Recording never fails application code -- sink errors are logged and
/// dropped here.
///
/// Name-only scopes are memoized per parent, since prefixes are
/// low-cardinality and endlessly re-derived; tag-carrying scopes are
/// typically built from per-call data, so they are never cached and each
/// call yields a fresh receiver.
#[derive(Clone)]
pub struct Receiver {
    inner: Arc<Inner>,
}

struct Inner {
    prefix: String,
    tags: Tags,
    scopes: RwLock<HashMap<String, Receiver>>,
    sink: Arc<dyn Sink>,
    clock: Clock,
}

impl Receiver {
    pub fn new(sink: Arc<dyn Sink>) -> Receiver {
        Self::with_clock(sink, Clock::new())
    }

    /// Like [`Receiver::new`], but reading stopwatch time from the given
    /// clock.
    pub fn with_clock(sink: Arc<dyn Sink>, clock: Clock) -> Receiver {
        Receiver {
            inner: Arc::new(Inner {
                prefix: String::new(),
                tags: Tags::new(),
                scopes: RwLock::new(HashMap::new()),
                sink,
                clock,
            }),
        }
    }

    /// A receiver that records into the void -- the safe default for
    /// anything not yet wired to real telemetry.
    pub fn null() -> Receiver {
        Receiver::new(Arc::new(NullSink))
    }

    fn record(&self, name: &str, value: f64, kind: MetricKind) {
        let full = format_name(&self.inner.prefix, name);
        if let Err(e) = self.inner.sink.handle(&full, &self.inner.tags, value, kind) {
            warn!(metric = %full, kind = %kind, error = %e, "error while handling metric");
        }
    }

    /// Increments the named counter by one.
    pub fn incr(&self, name: &str) {
        self.incr_by(name, 1.0);
    }

    /// Increments the named counter by `amount`.
    pub fn incr_by(&self, name: &str, amount: f64) {
        self.record(name, amount, MetricKind::Counter);
    }

    /// Records an observation of the named stat.
    pub fn add_stat(&self, name: &str, value: f64) {
        self.record(name, value, MetricKind::Stat);
    }

    /// Sets the named gauge.
    pub fn set_gauge(&self, name: &str, value: f64) {
        self.record(name, value, MetricKind::Gauge);
    }

    /// Derives a child receiver extending the name prefix.
    pub fn scope_prefix(&self, prefix: &str) -> Receiver {
        self.scope(prefix, None)
    }

    /// Derives a child receiver carrying additional tags.
    pub fn scope_tags(&self, tags: Tags) -> Receiver {
        self.scope("", Some(&tags))
    }

    /// Derives a child receiver extending both the prefix and the tag set.
    ///
    /// Scoping with an empty prefix and no tags is a no-op that returns a
    /// handle to this same receiver.
    pub fn scope(&self, prefix: &str, tags: Option<&Tags>) -> Receiver {
        match tags {
            None if prefix.is_empty() => self.clone(),
            None => {
                if let Some(existing) = self.inner.scopes.read().get(prefix) {
                    return existing.clone();
                }

                let child = self.derive(prefix, None);
                let mut scopes = self.inner.scopes.write();
                scopes.entry(prefix.to_string()).or_insert(child).clone()
            }
            Some(tags) => self.derive(prefix, Some(tags)),
        }
    }

    fn derive(&self, prefix: &str, tags: Option<&Tags>) -> Receiver {
        let tags = match tags {
            Some(extra) => self.inner.tags.merged(extra),
            None => self.inner.tags.clone(),
        };

        Receiver {
            inner: Arc::new(Inner {
                prefix: format_name(&self.inner.prefix, prefix),
                tags,
                scopes: RwLock::new(HashMap::new()),
                sink: Arc::clone(&self.inner.sink),
                clock: self.inner.clock.clone(),
            }),
        }
    }

    /// Starts a stopwatch that reports its elapsed time as
    /// `<name>_us` when stopped.
    pub fn start_stopwatch(&self, name: &str) -> Stopwatch {
        Stopwatch {
            name: name.to_string(),
            started: self.inner.clock.now(),
            receiver: self.clone(),
        }
    }

    #[cfg(test)]
    fn shares_inner_with(&self, other: &Receiver) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Measures the duration of one operation.
pub struct Stopwatch {
    name: String,
    started: Instant,
    receiver: Receiver,
}

impl Stopwatch {
    /// Stops the watch and records the elapsed microseconds.
    pub fn stop(self) {
        let elapsed = self.receiver.inner.clock.now().duration_since(self.started);
        self.receiver
            .add_stat(&format!("{}_us", self.name), elapsed.as_micros() as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::statsd::new_statsd_sink;
    use crate::test_util::{RecordedEvent, RecordingSink};

    fn recording_receiver() -> (Receiver, Arc<RecordingSink>) {
        let sink = RecordingSink::new();
        (Receiver::new(sink.clone()), sink)
    }

    fn event(name: &str, tags: &Tags, value: f64, kind: MetricKind) -> RecordedEvent {
        RecordedEvent {
            name: name.to_string(),
            tags: tags.clone(),
            value,
            kind,
        }
    }

    #[test]
    fn recording_methods_map_to_kinds() {
        let (receiver, sink) = recording_receiver();
        let none = Tags::new();

        receiver.incr("c");
        receiver.incr_by("c", 122.0);
        receiver.add_stat("s", 1.234);
        receiver.set_gauge("g", 4.321);

        assert_eq!(
            sink.events(),
            vec![
                event("c", &none, 1.0, MetricKind::Counter),
                event("c", &none, 122.0, MetricKind::Counter),
                event("s", &none, 1.234, MetricKind::Stat),
                event("g", &none, 4.321, MetricKind::Gauge),
            ]
        );
    }

    #[test]
    fn prefixes_nest_with_dots() {
        let (receiver, sink) = recording_receiver();

        let api = receiver.scope_prefix("api");
        api.incr("requests");

        let v2 = api.scope_prefix("v2");
        v2.incr("requests");

        let names: Vec<String> = sink.events().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["api.requests", "api.v2.requests"]);
    }

    #[test]
    fn child_tags_override_parent_tags() {
        let (receiver, sink) = recording_receiver();

        let parent = receiver.scope_tags(Tags::from([("env", "prod"), ("zone", "a")]));
        let child = parent.scope_tags(Tags::from([("zone", "b")]));
        child.incr("t");

        let events = sink.events();
        assert_eq!(events[0].tags, Tags::from([("env", "prod"), ("zone", "b")]));
    }

    #[test]
    fn name_only_scopes_are_memoized() {
        let (receiver, _sink) = recording_receiver();

        let a = receiver.scope_prefix("x");
        let b = receiver.scope_prefix("x");
        assert!(a.shares_inner_with(&b));

        let c = receiver.scope_prefix("y");
        assert!(!a.shares_inner_with(&c));
    }

    #[test]
    fn tag_scopes_are_never_memoized() {
        let (receiver, _sink) = recording_receiver();

        let a = receiver.scope_tags(Tags::from([("a", "1")]));
        let b = receiver.scope_tags(Tags::from([("a", "1")]));
        assert!(!a.shares_inner_with(&b));
    }

    #[test]
    fn noop_scope_returns_self() {
        let (receiver, _sink) = recording_receiver();
        let same = receiver.scope("", None);
        assert!(receiver.shares_inner_with(&same));
    }

    #[test]
    fn sink_errors_do_not_propagate() {
        let (receiver, sink) = recording_receiver();
        // An empty name is rejected by the sink; the receiver logs and
        // carries on.
        receiver.incr("");
        assert_eq!(sink.events(), Vec::new());
    }

    #[test]
    fn stopwatch_reports_elapsed_microseconds() {
        let sink = RecordingSink::new();
        let (clock, mock) = Clock::mock();
        let receiver = Receiver::with_clock(sink.clone(), clock);

        let watch = receiver.start_stopwatch("query");
        mock.increment(Duration::from_micros(1500));
        watch.stop();

        assert_eq!(
            sink.events(),
            vec![event("query_us", &Tags::new(), 1500.0, MetricKind::Stat)]
        );
    }

    #[test]
    fn null_receiver_swallows_everything() {
        let receiver = Receiver::null();
        receiver.incr("a");
        receiver.scope_prefix("b").set_gauge("c", 1.0);
        receiver.start_stopwatch("d").stop();
    }

    #[test]
    fn emits_through_a_real_statsd_sink() {
        let listener = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        listener
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let sink = new_statsd_sink(&addr).unwrap();
        let receiver = Receiver::new(sink.clone());

        receiver.scope_prefix("svc").incr("test_counter");
        sink.flush().unwrap();

        let mut buf = [0u8; 1024];
        let n = listener.recv(&mut buf).unwrap();
        assert_eq!(
            std::str::from_utf8(&buf[..n]).unwrap(),
            "svc.test_counter:1|ct\n"
        );
    }
}
