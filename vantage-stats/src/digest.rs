use sketches_ddsketch::{Config, DDSketch};

// Accuracy defaults: a 0.01% relative-error guarantee with enough bins to
// span nanoseconds through hours, which keeps a fully-populated sketch under
// a few hundred kilobytes.
const DEFAULT_ALPHA: f64 = 0.0001;
const DEFAULT_MAX_BINS: u32 = 32_768;
const DEFAULT_MIN_VALUE: f64 = 1.0e-9;

/// A mergeable quantile sketch with relative-error guarantees.
///
/// DDSketch only bins positive magnitudes, so `Digest` keeps two sketches --
/// one for each sign -- plus a count of the zero band between `-min_value`
/// and `min_value`.  Minimum and maximum are tracked exactly on the side.
///
/// Every `Digest` is built from the same sketch configuration, which is what
/// makes [`Digest::merge`] between any two instances well-defined.
#[derive(Clone)]
pub struct Digest {
    negative: DDSketch,
    positive: DDSketch,
    min_value: f64,
    zeroes: usize,
    min: Option<f64>,
    max: Option<f64>,
}

impl Digest {
    /// Creates a `Digest` with relative error `alpha`, at most `max_bins`
    /// bins per sign, and `min_value` as the smallest magnitude recognized
    /// as nonzero.
    pub fn new(alpha: f64, max_bins: u32, min_value: f64) -> Digest {
        let config = Config::new(alpha, max_bins, min_value.abs());

        Digest {
            negative: DDSketch::new(config.clone()),
            positive: DDSketch::new(config),
            min_value: min_value.abs(),
            zeroes: 0,
            min: None,
            max: None,
        }
    }

    pub fn with_defaults() -> Digest {
        Digest::new(DEFAULT_ALPHA, DEFAULT_MAX_BINS, DEFAULT_MIN_VALUE)
    }

    /// Adds an observation to the sketch.
    pub fn add(&mut self, value: f64) {
        match self.min {
            None => self.min = Some(value),
            Some(ref mut min) => {
                if value < *min {
                    *min = value;
                }
            }
        }

        match self.max {
            None => self.max = Some(value),
            Some(ref mut max) => {
                if value > *max {
                    *max = value;
                }
            }
        }

        let magnitude = value.abs();
        if magnitude <= self.min_value {
            self.zeroes += 1;
        } else if value > 0.0 {
            self.positive.add(magnitude);
        } else {
            self.negative.add(magnitude);
        }
    }

    /// Number of observations added so far.
    pub fn count(&self) -> usize {
        self.negative.count() + self.zeroes + self.positive.count()
    }

    /// Smallest observation seen so far, tracked exactly.
    pub fn min(&self) -> Option<f64> {
        self.min
    }

    /// Largest observation seen so far, tracked exactly.
    pub fn max(&self) -> Option<f64> {
        self.max
    }

    /// Estimated value at quantile `q`.
    ///
    /// Returns `None` when the sketch is empty or `q` is outside `[0, 1]`.
    pub fn quantile(&self, q: f64) -> Option<f64> {
        if !(0.0..=1.0).contains(&q) {
            return None;
        }

        let ncount = self.negative.count();
        let zcount = self.zeroes;
        let pcount = self.positive.count();
        let total = ncount + zcount + pcount;
        if total == 0 {
            return None;
        }

        // Single-signed data takes the direct path, which preserves the
        // sketch's full accuracy.
        if ncount == 0 && zcount == 0 {
            return self.positive.quantile(q).expect("quantile was validated above");
        }
        if pcount == 0 && zcount == 0 {
            return self
                .negative
                .quantile(1.0 - q)
                .expect("quantile was validated above")
                .map(|v| -v);
        }

        // Mixed signs: locate the rank, then map it into the owning side.
        let rank = (q * (total - 1) as f64).round() as usize;
        if rank < ncount {
            let nq = if ncount > 1 { 1.0 - rank as f64 / (ncount - 1) as f64 } else { 1.0 };
            self.negative
                .quantile(nq)
                .expect("quantile was validated above")
                .map(|v| -v)
        } else if rank < ncount + zcount {
            Some(0.0)
        } else {
            let pq = if pcount > 1 {
                (rank - ncount - zcount) as f64 / (pcount - 1) as f64
            } else {
                1.0
            };
            self.positive.quantile(pq).expect("quantile was validated above")
        }
    }

    /// Folds another digest into this one.
    pub fn merge(&mut self, other: &Digest) {
        self.negative
            .merge(&other.negative)
            .expect("digests share one sketch configuration");
        self.positive
            .merge(&other.positive)
            .expect("digests share one sketch configuration");
        self.zeroes += other.zeroes;

        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}
