use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use parking_lot::Mutex;
use quanta::Clock;
use tracing::debug;

use vantage_stats::{Sample, TimeWindowSample};

use crate::common::{format_tags, MetricKind, SinkError, Tags};
use crate::sink::Sink;

// Sample shape for locally aggregated histograms: exact values over the
// last five minutes, growing from 4096 up to 8192 slots.
const STAT_WINDOW_START_SIZE: usize = 4096;
const STAT_WINDOW_MAX_SIZE: usize = 8192;
const STAT_TIME_WINDOW: Duration = Duration::from_secs(300);

const SUMMARY_PERCENTILES: [f64; 3] = [0.5, 0.9, 0.99];

/// Suffix-matched rules for deriving cumulative-frequency counters.
///
/// For a stat whose name ends in a rule's suffix, each observation also
/// increments `name.less_than.<bound>` for every boundary above the observed
/// value, plus `name.less_than.inf` unconditionally -- a cumulative
/// histogram usable for threshold alerting without server-side histogram
/// support.  The first matching rule wins.
pub type CumulativeHistogramBounds = Vec<(String, Vec<i64>)>;

#[derive(Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    kind: MetricKind,
    key: String,
}

struct CounterEntry {
    name: String,
    tags: Tags,
    value: i64,
}

struct GaugeEntry {
    name: String,
    tags: Tags,
    value: f64,
}

struct StatEntry {
    name: String,
    tags: Tags,
    sample: TimeWindowSample,
}

struct Registries {
    counters: HashMap<String, CounterEntry>,
    gauges: HashMap<String, GaugeEntry>,
    stats: HashMap<String, StatEntry>,
    touched: HashMap<SeriesKey, u64>,
    current_gen: u64,
    handled: u64,
}

struct StatFlush {
    name: String,
    tags: Tags,
    snapshot: Box<dyn Sample>,
}

/// A sink that aggregates events locally and periodically pushes summarized
/// gauges into a downstream sink.
///
/// Counters accumulate, gauges keep their latest value, and stats feed a
/// time-windowed sample per series.  Each [`Sink::flush`] -- which callers
/// must schedule themselves -- emits every live series downstream: counters
/// as their cumulative total, gauges as-is, and histograms as
/// `.count`/`.max`/`.min`/`.median`/`.avg`/`.90percentile`/`.99percentile`/
/// `._dropped` summary gauges.
///
/// Series are evicted generationally: every flush bumps a generation
/// counter, every accepted event stamps its series with the current
/// generation, and a series whose stamp falls more than `flush_threshold`
/// generations behind is removed and stops being reported.  A series that is
/// still being touched keeps flushing even when its value has not moved,
/// which is what distinguishes an idle metric from a flat one.
///
/// Registration and flushing take separate locks, so new observations keep
/// flowing while a flush renders and emits downstream.
pub struct LocalSink {
    dst: Arc<dyn Sink>,
    flush_threshold: u64,
    cumulative_bounds: CumulativeHistogramBounds,
    self_stat_prefix: String,
    clock: Clock,
    registries: Mutex<Registries>,
    flush_lock: Mutex<()>,
}

impl LocalSink {
    pub fn new(
        dst: Arc<dyn Sink>,
        flush_threshold: u64,
        cumulative_bounds: CumulativeHistogramBounds,
        self_stat_prefix: impl Into<String>,
        clock: Clock,
    ) -> LocalSink {
        LocalSink {
            dst,
            flush_threshold,
            cumulative_bounds,
            self_stat_prefix: self_stat_prefix.into(),
            clock,
            registries: Mutex::new(Registries {
                counters: HashMap::new(),
                gauges: HashMap::new(),
                stats: HashMap::new(),
                touched: HashMap::new(),
                current_gen: 0,
                handled: 0,
            }),
            flush_lock: Mutex::new(()),
        }
    }

    fn handle_locked(
        &self,
        reg: &mut Registries,
        name: &str,
        tags: &Tags,
        value: f64,
        kind: MetricKind,
    ) {
        let key = format!("{}|{}", name, format_tags(tags));
        let gen = reg.current_gen;
        reg.touched.insert(SeriesKey { kind, key: key.clone() }, gen);

        match kind {
            MetricKind::Counter => {
                let entry = reg.counters.entry(key).or_insert_with(|| CounterEntry {
                    name: name.to_string(),
                    tags: tags.clone(),
                    value: 0,
                });
                entry.value += value as i64;
            }
            MetricKind::Gauge => {
                let entry = reg.gauges.entry(key).or_insert_with(|| GaugeEntry {
                    name: name.to_string(),
                    tags: tags.clone(),
                    value: 0.0,
                });
                entry.value = value;
            }
            MetricKind::Stat => {
                let entry = reg.stats.entry(key).or_insert_with(|| StatEntry {
                    name: name.to_string(),
                    tags: tags.clone(),
                    sample: TimeWindowSample::with_clock(
                        STAT_WINDOW_START_SIZE,
                        STAT_WINDOW_MAX_SIZE,
                        STAT_TIME_WINDOW,
                        self.clock.clone(),
                    ),
                });
                entry.sample.update(value as i64);

                let rule = self
                    .cumulative_bounds
                    .iter()
                    .find(|(suffix, _)| name.ends_with(suffix.as_str()));
                if let Some((_, bounds)) = rule {
                    for &bound in bounds.iter().rev() {
                        if value >= bound as f64 {
                            break;
                        }
                        let below = format!("{name}.less_than.{bound}");
                        self.handle_locked(reg, &below, tags, 1.0, MetricKind::Counter);
                    }
                    let inf = format!("{name}.less_than.inf");
                    self.handle_locked(reg, &inf, tags, 1.0, MetricKind::Counter);
                }
            }
        }
    }

    fn emit_gauge(&self, name: &str, tags: &Tags, value: f64) {
        if let Err(e) = self.dst.handle(name, tags, value, MetricKind::Gauge) {
            debug!(metric = name, error = %e, "downstream sink rejected rollup gauge");
        }
    }
}

impl Sink for LocalSink {
    fn handle(&self, name: &str, tags: &Tags, value: f64, kind: MetricKind)
        -> Result<(), SinkError> {
        if name.is_empty() {
            return Err(SinkError::EmptyMetricName);
        }

        let mut reg = self.registries.lock();
        reg.handled += 1;
        self.handle_locked(&mut reg, name, tags, value, kind);
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        // Phase one, under the register lock: evict stale series, snapshot
        // everything that will be emitted, and open the next generation.
        let (counters_out, gauges_out, stats_out, active, handled) = {
            let mut reg = self.registries.lock();
            let gen = reg.current_gen;
            let handled = reg.handled;
            let threshold = self.flush_threshold;

            let Registries { counters, gauges, stats, touched, .. } = &mut *reg;

            let stale: Vec<SeriesKey> = touched
                .iter()
                .filter(|(_, &touched_gen)| gen - touched_gen > threshold)
                .map(|(series, _)| series.clone())
                .collect();
            for series in &stale {
                touched.remove(series);
                match series.kind {
                    MetricKind::Counter => {
                        counters.remove(&series.key);
                    }
                    MetricKind::Gauge => {
                        gauges.remove(&series.key);
                    }
                    MetricKind::Stat => {
                        stats.remove(&series.key);
                    }
                }
            }

            let counters_out: Vec<(String, Tags, f64)> = counters
                .values()
                .map(|c| (c.name.clone(), c.tags.clone(), c.value as f64))
                .collect();
            let gauges_out: Vec<(String, Tags, f64)> = gauges
                .values()
                .map(|g| (g.name.clone(), g.tags.clone(), g.value))
                .collect();
            let stats_out: Vec<StatFlush> = stats
                .values()
                .map(|s| StatFlush {
                    name: s.name.clone(),
                    tags: s.tags.clone(),
                    snapshot: s.sample.snapshot(),
                })
                .collect();
            let active = (counters.len(), gauges.len(), stats.len());

            reg.current_gen += 1;
            (counters_out, gauges_out, stats_out, active, handled)
        };

        // Phase two, under the flush lock only: render and emit downstream
        // while new events keep registering.
        let _guard = self.flush_lock.lock();
        let mut flushed: u64 = 0;

        for (name, tags, value) in &counters_out {
            self.emit_gauge(name, tags, *value);
            flushed += 1;
        }
        for (name, tags, value) in &gauges_out {
            self.emit_gauge(name, tags, *value);
            flushed += 1;
        }
        for stat in &stats_out {
            let snap = &stat.snapshot;
            let p = snap.percentiles(&SUMMARY_PERCENTILES);

            let summaries = [
                ("count", snap.count() as f64),
                ("max", snap.max() as f64),
                ("min", snap.min() as f64),
                ("median", p[0]),
                ("avg", snap.mean()),
                ("90percentile", p[1]),
                ("99percentile", p[2]),
                ("_dropped", snap.dropped() as f64),
            ];
            for (suffix, value) in summaries {
                self.emit_gauge(&format!("{}.{}", stat.name, suffix), &stat.tags, value);
                flushed += 1;
            }
        }

        let no_tags = Tags::new();
        let self_stats = [
            ("handled", handled as f64),
            ("flushed", flushed as f64),
            ("counters.active", active.0 as f64),
            ("gauges.active", active.1 as f64),
            ("histograms.active", active.2 as f64),
        ];
        for (suffix, value) in self_stats {
            self.emit_gauge(&format!("{}.{}", self.self_stat_prefix, suffix), &no_tags, value);
        }

        self.dst.flush()
    }

    fn close(&self) {
        if let Err(e) = self.flush() {
            debug!(error = %e, "flush during close failed");
        }

        let mut reg = self.registries.lock();
        reg.counters.clear();
        reg.gauges.clear();
        reg.stats.clear();
        reg.touched.clear();
    }
}
