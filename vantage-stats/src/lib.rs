//! Sample data structures for summarizing high-frequency observations under
//! bounded memory.
//!
//! A [`Sample`] accumulates raw observations and answers the usual summary
//! questions about them: count, sum, extrema, mean, and percentiles.  Two
//! implementations cover the two ends of the accuracy/cost trade-off:
//!
//! - [`TimeWindowSample`] keeps the raw values themselves in an adaptive ring
//!   buffer bounded by both a wall-clock window and a maximum capacity.
//!   Queries are exact over whatever survived the window, but memory grows
//!   with the observation rate up to the configured ceiling.
//! - [`TDigestSample`] folds observations into per-minute quantile sketches
//!   and merges them at query time.  Memory and per-update cost stay flat no
//!   matter how hot the metric is, at the price of approximate percentiles.
//!
//! Both are safe for concurrent updates and queries, and both support
//! [`Sample::snapshot`], which freezes the current state into an independent
//! copy that later updates cannot disturb.  All time is read through a
//! [`quanta::Clock`], so tests can drive the window with a mocked clock
//! instead of sleeping.

mod digest;
pub mod math;
mod tdigest;
mod window;

pub use self::digest::Digest;
pub use self::tdigest::TDigestSample;
pub use self::window::TimeWindowSample;

use self::math::{
    sample_max, sample_mean, sample_min, sample_percentile, sample_percentiles, sample_std_dev,
    sample_sum, sample_variance,
};

/// A statistical sample of integer observations.
///
/// All methods take `&self`; implementations guard their state internally so
/// that updates and queries may race freely.  `count` reflects every update
/// accepted since the last [`clear`](Sample::clear), while the value-derived
/// queries (`min`, `mean`, `percentile`, ...) describe only the observations
/// still inside the implementation's window.
pub trait Sample: Send + Sync {
    /// Records an observation, advancing any internal time window.
    fn update(&self, value: i64);

    /// Resets the sample to its empty state.
    fn clear(&self);

    /// Number of updates accepted since the last `clear`.
    fn count(&self) -> i64;

    /// Number of observations evicted by capacity pressure while still
    /// inside the time window.
    fn dropped(&self) -> i64;

    /// Number of observations currently retained.
    fn size(&self) -> usize;

    /// The retained observations, oldest first.
    fn values(&self) -> Vec<i64>;

    fn min(&self) -> i64;
    fn max(&self) -> i64;
    fn mean(&self) -> f64;
    fn sum(&self) -> i64;

    /// Estimated value at quantile `p`, where `p` is in `[0, 1]`.
    fn percentile(&self, p: f64) -> f64;

    /// Estimated values at each of the given quantiles.
    fn percentiles(&self, ps: &[f64]) -> Vec<f64>;

    fn std_dev(&self) -> f64;
    fn variance(&self) -> f64;

    /// Returns an immutable, independently queryable copy of the current
    /// state.  Updates applied to the original afterwards do not show up in
    /// the snapshot.
    fn snapshot(&self) -> Box<dyn Sample>;
}

/// A frozen copy of a sample's state, produced by [`Sample::snapshot`].
#[derive(Clone)]
pub struct SampleSnapshot {
    count: i64,
    dropped: i64,
    values: Vec<i64>,
}

impl SampleSnapshot {
    pub fn new(count: i64, dropped: i64, values: Vec<i64>) -> SampleSnapshot {
        SampleSnapshot { count, dropped, values }
    }
}

impl Sample for SampleSnapshot {
    fn update(&self, _value: i64) {
        panic!("update called on a sample snapshot");
    }

    fn clear(&self) {
        panic!("clear called on a sample snapshot");
    }

    fn count(&self) -> i64 {
        self.count
    }

    fn dropped(&self) -> i64 {
        self.dropped
    }

    fn size(&self) -> usize {
        self.values.len()
    }

    fn values(&self) -> Vec<i64> {
        self.values.clone()
    }

    fn min(&self) -> i64 {
        sample_min(&self.values)
    }

    fn max(&self) -> i64 {
        sample_max(&self.values)
    }

    fn mean(&self) -> f64 {
        sample_mean(&self.values)
    }

    fn sum(&self) -> i64 {
        sample_sum(&self.values)
    }

    fn percentile(&self, p: f64) -> f64 {
        sample_percentile(&self.values, p)
    }

    fn percentiles(&self, ps: &[f64]) -> Vec<f64> {
        sample_percentiles(&self.values, ps)
    }

    fn std_dev(&self) -> f64 {
        sample_std_dev(&self.values)
    }

    fn variance(&self) -> f64 {
        sample_variance(&self.values)
    }

    fn snapshot(&self) -> Box<dyn Sample> {
        Box::new(self.clone())
    }
}
