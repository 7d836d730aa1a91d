use std::time::Duration;

use parking_lot::Mutex;
use quanta::{Clock, Instant};

use crate::math::{
    sample_max, sample_mean, sample_min, sample_percentile, sample_percentiles, sample_std_dev,
    sample_sum, sample_variance,
};
use crate::{Sample, SampleSnapshot};

const SCALE_FACTOR: f64 = 1.5;

#[derive(Clone, Copy)]
struct TimedValue {
    at: Instant,
    value: i64,
}

/// An exact sample over a sliding wall-clock window, backed by an adaptive
/// circular buffer.
///
/// The buffer starts at `start_window_size` slots and grows by 1.5x whenever
/// it fills, up to `max_window_size`.  Once at maximum capacity, each insert
/// force-evicts the single oldest slot; if that slot was still inside the
/// time window the eviction counts toward [`Sample::dropped`].  When the
/// active count falls well below capacity the buffer shrinks back down, so a
/// metric that goes quiet does not pin its high-water memory.
///
/// Expiry is lazy: values older than the window are discarded when the
/// sample is read or written, never on a timer.
pub struct TimeWindowSample {
    start_window_size: usize,
    max_window_size: usize,
    time_window: Duration,
    clock: Clock,
    inner: Mutex<Inner>,
}

struct Inner {
    count: i64,
    dropped: i64,
    values: Vec<TimedValue>,
    num_values: usize,
    earliest: usize,
    latest: usize,
}

impl Inner {
    /// Replaces the backing buffer, compacting the active slots to the front
    /// in oldest-to-newest order.
    fn resize(&mut self, size: usize, fill: TimedValue) {
        assert!(size >= self.num_values, "resize below the number of active values");

        let mut resized = vec![fill; size];
        for (i, slot) in resized.iter_mut().take(self.num_values).enumerate() {
            *slot = self.values[(self.earliest + i) % self.values.len()];
        }

        self.values = resized;
        self.earliest = 0;
        self.latest = self.num_values.saturating_sub(1);
    }

    /// Evicts `forced` slots unconditionally, plus any leading slots at or
    /// before `cutoff`.  Forced evictions of slots still inside the window
    /// count as dropped.
    fn drop_oldest(&mut self, mut forced: usize, cutoff: Option<Instant>) {
        for _ in 0..self.num_values {
            let slot = self.values[self.earliest];
            let expired = cutoff.is_some_and(|c| slot.at <= c);
            if forced == 0 && !expired {
                break;
            }

            forced = forced.saturating_sub(1);
            self.num_values -= 1;
            if !expired {
                self.dropped += 1;
            }
            self.earliest = (self.earliest + 1) % self.values.len();
        }
    }

    fn push(&mut self, value: i64, at: Instant) {
        debug_assert!(self.num_values < self.values.len());

        if self.num_values == 0 {
            self.earliest = 0;
            self.latest = 0;
        } else {
            self.latest = (self.latest + 1) % self.values.len();
        }

        self.num_values += 1;
        self.values[self.latest] = TimedValue { at, value };
    }

    fn active_values(&self) -> Vec<i64> {
        let mut out = Vec::with_capacity(self.num_values);
        for i in 0..self.num_values {
            out.push(self.values[(self.earliest + i) % self.values.len()].value);
        }
        out
    }
}

impl TimeWindowSample {
    pub fn new(
        start_window_size: usize,
        max_window_size: usize,
        time_window: Duration,
    ) -> TimeWindowSample {
        Self::with_clock(start_window_size, max_window_size, time_window, Clock::new())
    }

    /// Like [`TimeWindowSample::new`], but reading time from the given clock.
    pub fn with_clock(
        start_window_size: usize,
        max_window_size: usize,
        time_window: Duration,
        clock: Clock,
    ) -> TimeWindowSample {
        debug_assert!(start_window_size >= 1);
        debug_assert!(max_window_size >= start_window_size);

        let fill = TimedValue { at: clock.now(), value: 0 };
        TimeWindowSample {
            start_window_size,
            max_window_size,
            time_window,
            clock,
            inner: Mutex::new(Inner {
                count: 0,
                dropped: 0,
                values: vec![fill; start_window_size],
                num_values: 0,
                earliest: 0,
                latest: 0,
            }),
        }
    }

    #[cfg(test)]
    fn capacity(&self) -> usize {
        self.inner.lock().values.len()
    }

    fn windowed_values(&self) -> Vec<i64> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.drop_oldest(0, now.checked_sub(self.time_window));
        inner.active_values()
    }
}

impl Sample for TimeWindowSample {
    fn update(&self, value: i64) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.count += 1;

        let fill = TimedValue { at: now, value: 0 };

        // Make room: grow while allowed, otherwise evict expired slots and,
        // failing that, the single oldest one.
        if inner.num_values == inner.values.len() {
            if inner.num_values < self.max_window_size {
                let grown = ((inner.values.len() as f64 * SCALE_FACTOR) as usize)
                    .clamp(inner.values.len() + 1, self.max_window_size);
                inner.resize(grown, fill);
            } else {
                inner.drop_oldest(1, now.checked_sub(self.time_window));
            }
        }

        inner.push(value, now);

        // Shrink once the active count is small relative to capacity.
        if (((3 * inner.num_values) as f64 * SCALE_FACTOR) as usize) < inner.values.len() {
            let shrunk = ((inner.values.len() as f64 / SCALE_FACTOR) as usize)
                .max(self.start_window_size);
            inner.resize(shrunk, fill);
        }
    }

    fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.count = 0;
        inner.dropped = 0;
        inner.num_values = 0;
        inner.earliest = 0;
        inner.latest = 0;
    }

    fn count(&self) -> i64 {
        self.inner.lock().count
    }

    fn dropped(&self) -> i64 {
        self.inner.lock().dropped
    }

    fn size(&self) -> usize {
        self.inner.lock().num_values
    }

    fn values(&self) -> Vec<i64> {
        self.windowed_values()
    }

    fn min(&self) -> i64 {
        sample_min(&self.windowed_values())
    }

    fn max(&self) -> i64 {
        sample_max(&self.windowed_values())
    }

    fn mean(&self) -> f64 {
        sample_mean(&self.windowed_values())
    }

    fn sum(&self) -> i64 {
        sample_sum(&self.windowed_values())
    }

    fn percentile(&self, p: f64) -> f64 {
        sample_percentile(&self.windowed_values(), p)
    }

    fn percentiles(&self, ps: &[f64]) -> Vec<f64> {
        sample_percentiles(&self.windowed_values(), ps)
    }

    fn std_dev(&self) -> f64 {
        sample_std_dev(&self.windowed_values())
    }

    fn variance(&self) -> f64 {
        sample_variance(&self.windowed_values())
    }

    fn snapshot(&self) -> Box<dyn Sample> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.drop_oldest(0, now.checked_sub(self.time_window));
        Box::new(SampleSnapshot::new(inner.count, inner.dropped, inner.active_values()))
    }
}
