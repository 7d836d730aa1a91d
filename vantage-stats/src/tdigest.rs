use std::mem;
use std::time::Duration;

use parking_lot::RwLock;
use quanta::{Clock, Instant};

use crate::digest::Digest;
use crate::Sample;

const BUCKET_WIDTH: Duration = Duration::from_secs(60);

// Slack added to the window cutoff so a bucket opened just inside the window
// is not dropped while its newest values are still current.
const DROP_SLACK: Duration = Duration::from_secs(1);

#[derive(Clone)]
struct Bucket {
    earliest: Instant,
    count: i64,
    sum: i64,
    digest: Digest,
}

impl Bucket {
    fn new(now: Instant) -> Bucket {
        Bucket { earliest: now, count: 0, sum: 0, digest: Digest::with_defaults() }
    }

    fn merge(&mut self, other: &Bucket) {
        if other.earliest < self.earliest {
            self.earliest = other.earliest;
        }
        self.count += other.count;
        self.sum += other.sum;
        self.digest.merge(&other.digest);
    }
}

/// An approximate sample over a sliding time window, built from per-minute
/// quantile sketch buckets.
///
/// Updates land in the currently open bucket; once that bucket is a minute
/// old the next update closes it and opens a fresh one, discarding closed
/// buckets that have aged out of the window.  Folding a bucket into a query
/// costs roughly the same regardless of how many observations it absorbed,
/// so both memory and query time stay bounded no matter how hot the metric
/// is -- the trade-off against [`TimeWindowSample`](crate::TimeWindowSample)
/// is that percentiles are estimates rather than exact.
///
/// `count` and `sum` describe the retained window.  Raw values are never
/// kept, so [`Sample::values`], [`Sample::size`], [`Sample::std_dev`], and
/// [`Sample::variance`] are unsupported and panic, and [`Sample::dropped`]
/// is always zero (whole buckets expire; individual observations are never
/// shed).
pub struct TDigestSample {
    time_window: Duration,
    clock: Clock,
    inner: RwLock<Inner>,
}

struct Inner {
    cur: Bucket,
    buckets: Vec<Bucket>,
}

impl TDigestSample {
    pub fn new(time_window: Duration) -> TDigestSample {
        Self::with_clock(time_window, Clock::new())
    }

    /// Like [`TDigestSample::new`], but reading time from the given clock.
    pub fn with_clock(time_window: Duration, clock: Clock) -> TDigestSample {
        let now = clock.now();
        TDigestSample {
            time_window,
            clock,
            inner: RwLock::new(Inner { cur: Bucket::new(now), buckets: Vec::new() }),
        }
    }

    fn drop_expired(&self, buckets: &mut Vec<Bucket>, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.time_window + DROP_SLACK) else {
            return;
        };
        let keep_from = buckets
            .iter()
            .position(|b| b.earliest > cutoff)
            .unwrap_or(buckets.len());
        buckets.drain(..keep_from);
    }

    fn merged(&self, inner: &Inner) -> Bucket {
        if inner.buckets.is_empty() {
            return inner.cur.clone();
        }

        let mut folded = inner.buckets[0].clone();
        for bucket in &inner.buckets[1..] {
            folded.merge(bucket);
        }
        folded.merge(&inner.cur);
        folded
    }

    #[cfg(test)]
    fn closed_buckets(&self) -> usize {
        self.inner.read().buckets.len()
    }
}

impl Sample for TDigestSample {
    fn update(&self, value: i64) {
        let now = self.clock.now();
        let mut inner = self.inner.write();

        if now.duration_since(inner.cur.earliest) >= BUCKET_WIDTH {
            let closed = mem::replace(&mut inner.cur, Bucket::new(now));
            inner.buckets.push(closed);
            self.drop_expired(&mut inner.buckets, now);
        }

        inner.cur.count += 1;
        inner.cur.sum += value;
        inner.cur.digest.add(value as f64);
    }

    fn clear(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        inner.cur = Bucket::new(now);
        inner.buckets.clear();
    }

    fn count(&self) -> i64 {
        let inner = self.inner.read();
        self.merged(&inner).count
    }

    fn dropped(&self) -> i64 {
        0
    }

    fn size(&self) -> usize {
        unimplemented!("the digest sample does not retain raw values")
    }

    fn values(&self) -> Vec<i64> {
        unimplemented!("the digest sample does not retain raw values")
    }

    fn min(&self) -> i64 {
        let inner = self.inner.read();
        let merged = self.merged(&inner);
        if merged.count == 0 {
            return 0;
        }
        merged.digest.min().map(|v| v as i64).unwrap_or(0)
    }

    fn max(&self) -> i64 {
        let inner = self.inner.read();
        let merged = self.merged(&inner);
        if merged.count == 0 {
            return 0;
        }
        merged.digest.max().map(|v| v as i64).unwrap_or(0)
    }

    fn mean(&self) -> f64 {
        let inner = self.inner.read();
        let merged = self.merged(&inner);
        if merged.count == 0 {
            return 0.0;
        }
        merged.sum as f64 / merged.count as f64
    }

    fn sum(&self) -> i64 {
        let inner = self.inner.read();
        self.merged(&inner).sum
    }

    fn percentile(&self, p: f64) -> f64 {
        let inner = self.inner.read();
        let merged = self.merged(&inner);
        merged.digest.quantile(p).unwrap_or(0.0)
    }

    fn percentiles(&self, ps: &[f64]) -> Vec<f64> {
        let inner = self.inner.read();
        let merged = self.merged(&inner);
        ps.iter().map(|&p| merged.digest.quantile(p).unwrap_or(0.0)).collect()
    }

    fn std_dev(&self) -> f64 {
        unimplemented!("the digest sample does not retain raw values")
    }

    fn variance(&self) -> f64 {
        unimplemented!("the digest sample does not retain raw values")
    }

    fn snapshot(&self) -> Box<dyn Sample> {
        let now = self.clock.now();
        let mut inner = self.inner.write();
        self.drop_expired(&mut inner.buckets, now);
        let merged = self.merged(&inner);

        Box::new(TDigestSample {
            time_window: self.time_window,
            clock: self.clock.clone(),
            inner: RwLock::new(Inner { cur: merged, buckets: Vec::new() }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use approx::relative_eq;

    use crate::math::{sample_max, sample_mean, sample_min, sample_percentile, sample_sum};

    const PRIME: i64 = 15_485_867;

    fn mocked(window: Duration) -> (TDigestSample, Arc<quanta::Mock>) {
        let (clock, mock) = Clock::mock();
        (TDigestSample::with_clock(window, clock), mock)
    }

    fn assert_within(bound: f64, expected: f64, received: f64) {
        let close = if expected == 0.0 {
            received.abs() < 1e-6
        } else {
            relative_eq!(expected, received, max_relative = bound)
        };
        assert!(close, "expected {expected} within {bound}, received {received}");
    }

    fn assert_matches_exact_sample(snap: &dyn Sample, samples: &[i64]) {
        assert_eq!(snap.count(), samples.len() as i64);
        assert_eq!(snap.sum(), sample_sum(samples));
        assert_eq!(snap.min(), sample_min(samples));
        assert_eq!(snap.max(), sample_max(samples));
        assert_within(0.0001, sample_mean(samples), snap.mean());

        for p in [0.5, 0.9, 0.99] {
            assert_within(0.05, sample_percentile(samples, p), snap.percentile(p));
        }
    }

    #[test]
    fn summarizes_a_deterministic_permutation() {
        for n in [0i64, 100, 100_000] {
            let (sample, _mock) = mocked(Duration::from_secs(300));

            let mut samples = Vec::new();
            let mut i = 0i64;
            for _ in 0..n {
                sample.update(i + 1);
                samples.push(i + 1);
                i = (i + PRIME) % n;
            }

            let snap = sample.snapshot();
            assert_matches_exact_sample(snap.as_ref(), &samples);
        }
    }

    #[test]
    fn buckets_roll_once_a_minute() {
        let (sample, mock) = mocked(Duration::from_secs(300));
        let ranges = [0i64, 200, 500, 1000];

        for i in 1..ranges.len() {
            for j in ranges[i - 1]..ranges[i] {
                sample.update(j + 1);
            }
            assert_eq!(sample.closed_buckets(), i - 1);
            mock.increment(BUCKET_WIDTH);
        }

        let samples: Vec<i64> = (1..=1000).collect();
        let snap = sample.snapshot();
        assert_matches_exact_sample(snap.as_ref(), &samples);
    }

    #[test]
    fn buckets_outside_the_window_age_out() {
        let (sample, mock) = mocked(Duration::from_secs(300));
        let ranges = [0i64, 20, 300, 500, 700, 800, 900, 1000];
        let expected_closed = [0usize, 1, 2, 3, 4, 5, 5];

        for i in 1..ranges.len() {
            for j in ranges[i - 1]..ranges[i] {
                sample.update(j + 1);
            }
            assert_eq!(sample.closed_buckets(), expected_closed[i - 1]);
            mock.increment(BUCKET_WIDTH);
        }

        // By snapshot time the first two minutes have aged out of the
        // five-minute window.
        let samples: Vec<i64> = (301..=1000).collect();
        let snap = sample.snapshot();
        assert_matches_exact_sample(snap.as_ref(), &samples);
    }

    #[test]
    fn updates_spaced_past_the_window_are_not_combined() {
        let (sample, mock) = mocked(Duration::from_secs(300));
        sample.update(500);

        mock.increment(Duration::from_secs(302));
        sample.update(7);

        assert_eq!(sample.count(), 1);
        assert_eq!(sample.sum(), 7);
        assert_eq!(sample.max(), 7);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_updates() {
        let (sample, _mock) = mocked(Duration::from_secs(300));
        for i in 1..=100 {
            sample.update(i);
        }

        let snap = sample.snapshot();
        for i in 1..=1000 {
            sample.update(i);
        }

        assert_eq!(snap.count(), 100);
        assert_eq!(snap.sum(), 5050);
        assert_eq!(sample.count(), 1100);
    }

    #[test]
    fn dropped_is_always_zero() {
        let (sample, mock) = mocked(Duration::from_secs(60));
        for i in 0..1000 {
            sample.update(i);
            mock.increment(Duration::from_secs(1));
        }
        assert_eq!(sample.dropped(), 0);
    }

    #[test]
    fn clear_resets_to_empty() {
        let (sample, _mock) = mocked(Duration::from_secs(300));
        for i in 1..=100 {
            sample.update(i);
        }
        sample.clear();
        assert_eq!(sample.count(), 0);
        assert_eq!(sample.sum(), 0);
        assert_eq!(sample.percentile(0.5), 0.0);
    }
}
