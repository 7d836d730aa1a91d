//! Statistics helpers shared by the sample implementations.
//!
//! Every function tolerates an empty slice and returns zero for it, so
//! callers can report on a window that has already expired without
//! special-casing.

pub fn sample_max(values: &[i64]) -> i64 {
    values.iter().copied().max().unwrap_or(0)
}

pub fn sample_min(values: &[i64]) -> i64 {
    values.iter().copied().min().unwrap_or(0)
}

pub fn sample_sum(values: &[i64]) -> i64 {
    values.iter().sum()
}

pub fn sample_mean(values: &[i64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    sample_sum(values) as f64 / values.len() as f64
}

/// Population variance around the sample mean.
pub fn sample_variance(values: &[i64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = sample_mean(values);
    let squared: f64 = values
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum();
    squared / values.len() as f64
}

pub fn sample_std_dev(values: &[i64]) -> f64 {
    sample_variance(values).sqrt()
}

/// Value at quantile `p` of the sorted sample, linearly interpolated between
/// the two nearest ranks.
pub fn sample_percentile(values: &[i64], p: f64) -> f64 {
    sample_percentiles(values, &[p])[0]
}

pub fn sample_percentiles(values: &[i64], ps: &[f64]) -> Vec<f64> {
    let mut scores = vec![0.0; ps.len()];
    if values.is_empty() {
        return scores;
    }

    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let size = sorted.len();

    for (score, &p) in scores.iter_mut().zip(ps) {
        let pos = p * (size + 1) as f64;
        *score = if pos < 1.0 {
            sorted[0] as f64
        } else if pos >= size as f64 {
            sorted[size - 1] as f64
        } else {
            let lower = sorted[pos as usize - 1] as f64;
            let upper = sorted[pos as usize] as f64;
            lower + (pos - pos.floor()) * (upper - lower)
        };
    }

    scores
}
