//! Numeric aggregation kernels
//!
//! Every kernel consumes values that have already been filtered for NaN and
//! infinity by the memoization layer. Value aggregations over an empty range
//! return NaN; the row builder rewrites NaN results to 0.0 before they reach
//! the feature matrix.

/// Counts the entries.
pub fn count(values: &[f64]) -> f64 {
    values.len() as f64
}

pub fn sum(values: &[f64]) -> f64 {
    values.iter().sum()
}

pub fn avg(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    sum(values) / values.len() as f64
}

pub fn minimum(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NAN, f64::min)
}

pub fn maximum(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NAN, f64::max)
}

/// Number of distinct values.
pub fn count_distinct(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted.dedup();
    sorted.len() as f64
}

pub fn count_distinct_over_count(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    count_distinct(values) / values.len() as f64
}

/// Number of distinct categorical ids; null ids are filtered upstream.
pub fn count_distinct_categorical(ids: impl Iterator<Item = i64>) -> f64 {
    let mut sorted: Vec<i64> = ids.collect();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.len() as f64
}

pub fn median(values: &[f64]) -> f64 {
    quantile(0.5, values)
}

/// Linear-interpolation quantile.
pub fn quantile(q: f64, values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let weight = pos - lower as f64;
    sorted[lower] * (1.0 - weight) + sorted[upper] * weight
}

/// The most frequent value; ties resolve to the smallest.
pub fn mode(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut best = sorted[0];
    let mut best_count = 0usize;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j < sorted.len() && sorted[j] == sorted[i] {
            j += 1;
        }
        if j - i > best_count {
            best_count = j - i;
            best = sorted[i];
        }
        i = j;
    }
    best
}

/// Number of entries equal to the maximum.
pub fn num_max(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let max = maximum(values);
    values.iter().filter(|&&v| v == max).count() as f64
}

/// Number of entries equal to the minimum.
pub fn num_min(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let min = minimum(values);
    values.iter().filter(|&&v| v == min).count() as f64
}

/// Population variance.
pub fn var(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let n = values.len() as f64;
    let mean = avg(values);
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n
}

pub fn stddev(values: &[f64]) -> f64 {
    var(values).sqrt()
}

/// Standard deviation over mean.
pub fn variation_coefficient(values: &[f64]) -> f64 {
    let mean = avg(values);
    if mean.is_nan() || mean == 0.0 {
        return f64::NAN;
    }
    stddev(values) / mean
}

/// Third standardized moment.
pub fn skew(values: &[f64]) -> f64 {
    let sd = stddev(values);
    if sd.is_nan() || sd == 0.0 {
        return f64::NAN;
    }
    let n = values.len() as f64;
    let mean = avg(values);
    let m3 = values.iter().map(|v| (v - mean).powi(3)).sum::<f64>() / n;
    m3 / sd.powi(3)
}

/// Fourth standardized moment.
pub fn kurtosis(values: &[f64]) -> f64 {
    let sd = stddev(values);
    if sd.is_nan() || sd == 0.0 {
        return f64::NAN;
    }
    let n = values.len() as f64;
    let mean = avg(values);
    let m4 = values.iter().map(|v| (v - mean).powi(4)).sum::<f64>() / n;
    m4 / sd.powi(4)
}

/// `(max ts - min ts) / (count - 1)` over the peripheral time stamps.
pub fn avg_time_between(time_stamps: &[f64]) -> f64 {
    if time_stamps.len() <= 1 {
        return 0.0;
    }
    (maximum(time_stamps) - minimum(time_stamps)) / (time_stamps.len() as f64 - 1.0)
}

// ----------------------------------------------------------------------
// Pair kernels. Pairs are `(time, value)`. FIRST, LAST and TREND receive
// the raw peripheral time stamp as the time component; the EWMA and
// TIME SINCE families receive the time elapsed since the peripheral event
// (population time stamp minus peripheral time stamp).

/// Value at the smallest time.
pub fn first(pairs: &[(f64, f64)]) -> f64 {
    pairs
        .iter()
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|p| p.1)
        .unwrap_or(f64::NAN)
}

/// Value at the largest time.
pub fn last(pairs: &[(f64, f64)]) -> f64 {
    pairs
        .iter()
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|p| p.1)
        .unwrap_or(f64::NAN)
}

/// Least-squares slope of value over time.
pub fn trend(pairs: &[(f64, f64)]) -> f64 {
    if pairs.is_empty() {
        return f64::NAN;
    }
    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let xx = pairs.iter().map(|p| (p.0 - mean_x) * (p.0 - mean_x)).sum::<f64>();
    if xx == 0.0 {
        return 0.0;
    }
    let xy = pairs
        .iter()
        .map(|p| (p.0 - mean_x) * (p.1 - mean_y))
        .sum::<f64>();
    xy / xx
}

/// Exponentially weighted mean; weights decay with the elapsed time.
pub fn ewma(half_life: f64, pairs: &[(f64, f64)]) -> f64 {
    let log05 = 0.5f64.ln();
    let sum_weights: f64 = pairs.iter().map(|p| (log05 * p.0 / half_life).exp()).sum();
    if sum_weights == 0.0 {
        return f64::NAN;
    }
    let sum_both: f64 = pairs
        .iter()
        .map(|p| (log05 * p.0 / half_life).exp() * p.1)
        .sum();
    sum_both / sum_weights
}

/// Weighted linear extrapolation of the value to elapsed time zero; weights
/// decay with the elapsed time.
pub fn ewma_trend(half_life: f64, pairs: &[(f64, f64)]) -> f64 {
    let log05 = 0.5f64.ln();
    let weight = |p: &(f64, f64)| (log05 * p.0 / half_life).exp();

    let sum_weights: f64 = pairs.iter().map(weight).sum();
    if sum_weights == 0.0 {
        return f64::NAN;
    }

    let mean_x = pairs.iter().map(|p| p.0 * weight(p)).sum::<f64>() / sum_weights;
    let mean_y = pairs.iter().map(|p| p.1 * weight(p)).sum::<f64>() / sum_weights;

    let xx: f64 = pairs
        .iter()
        .map(|p| (p.0 - mean_x) * (p.0 - mean_x) * weight(p))
        .sum();
    if xx == 0.0 {
        return mean_y;
    }
    let xy: f64 = pairs
        .iter()
        .map(|p| (p.0 - mean_x) * (p.1 - mean_y) * weight(p))
        .sum();
    let beta = xy / xx;
    mean_y - mean_x * beta
}

/// Largest elapsed time, i.e. the age of the oldest matching event.
pub fn time_since_first_event(pairs: &[(f64, f64)]) -> f64 {
    pairs
        .iter()
        .map(|p| p.0)
        .fold(f64::NAN, f64::max)
}

/// Smallest elapsed time, i.e. the age of the newest matching event.
pub fn time_since_last_event(pairs: &[(f64, f64)]) -> f64 {
    pairs
        .iter()
        .map(|p| p.0)
        .fold(f64::NAN, f64::min)
}

fn times_at_extremum(pairs: &[(f64, f64)], take_max: bool) -> Vec<f64> {
    if pairs.is_empty() {
        return Vec::new();
    }
    let extremum = pairs
        .iter()
        .map(|p| p.1)
        .fold(if take_max { f64::NEG_INFINITY } else { f64::INFINITY }, |acc, v| {
            if take_max {
                acc.max(v)
            } else {
                acc.min(v)
            }
        });
    pairs
        .iter()
        .filter(|p| p.1 == extremum)
        .map(|p| p.0)
        .collect()
}

pub fn time_since_first_maximum(pairs: &[(f64, f64)]) -> f64 {
    times_at_extremum(pairs, true)
        .into_iter()
        .fold(f64::NAN, f64::max)
}

pub fn time_since_last_maximum(pairs: &[(f64, f64)]) -> f64 {
    times_at_extremum(pairs, true)
        .into_iter()
        .fold(f64::NAN, f64::min)
}

pub fn time_since_first_minimum(pairs: &[(f64, f64)]) -> f64 {
    times_at_extremum(pairs, false)
        .into_iter()
        .fold(f64::NAN, f64::max)
}

pub fn time_since_last_minimum(pairs: &[(f64, f64)]) -> f64 {
    times_at_extremum(pairs, false)
        .into_iter()
        .fold(f64::NAN, f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_kernels() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(count(&values), 4.0);
        assert_eq!(sum(&values), 10.0);
        assert_eq!(avg(&values), 2.5);
        assert_eq!(minimum(&values), 1.0);
        assert_eq!(maximum(&values), 4.0);
        assert_eq!(median(&values), 2.5);
    }

    #[test]
    fn test_empty_value_aggregations_are_nan() {
        assert!(avg(&[]).is_nan());
        assert!(minimum(&[]).is_nan());
        assert!(median(&[]).is_nan());
        assert!(mode(&[]).is_nan());
        assert_eq!(count(&[]), 0.0);
    }

    #[test]
    fn test_count_distinct() {
        assert_eq!(count_distinct(&[1.0, 1.0, 2.0]), 2.0);
        assert_eq!(count_distinct_categorical([3, 3, 5].into_iter()), 2.0);
    }

    #[test]
    fn test_mode_ties_take_smallest() {
        assert_eq!(mode(&[2.0, 1.0, 2.0, 1.0]), 1.0);
        assert_eq!(mode(&[3.0, 3.0, 1.0]), 3.0);
    }

    #[test]
    fn test_var_and_stddev() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((var(&values) - 4.0).abs() < 1e-12);
        assert!((stddev(&values) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_avg_time_between() {
        assert_eq!(avg_time_between(&[100.0]), 0.0);
        assert_eq!(avg_time_between(&[100.0, 200.0, 400.0]), 150.0);
    }

    #[test]
    fn test_first_last() {
        let pairs = [(80.0, 2.0), (90.0, 1.0)];
        assert_eq!(first(&pairs), 2.0);
        assert_eq!(last(&pairs), 1.0);
    }

    #[test]
    fn test_trend_is_slope() {
        let pairs = [(1.0, 2.0), (2.0, 4.0), (3.0, 6.0)];
        assert!((trend(&pairs) - 2.0).abs() < 1e-12);
        // Constant time axis has no defined slope.
        assert_eq!(trend(&[(1.0, 3.0), (1.0, 5.0)]), 0.0);
    }

    #[test]
    fn test_ewma_recent_values_dominate() {
        // Value 10 is "now", value 0 is one half-life ago.
        let pairs = [(0.0, 10.0), (1.0, 0.0)];
        let result = ewma(1.0, &pairs);
        assert!((result - 10.0 / 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_time_since_events() {
        let pairs = [(5.0, 1.0), (20.0, 9.0), (10.0, 9.0)];
        assert_eq!(time_since_first_event(&pairs), 20.0);
        assert_eq!(time_since_last_event(&pairs), 5.0);
        assert_eq!(time_since_first_maximum(&pairs), 20.0);
        assert_eq!(time_since_last_maximum(&pairs), 10.0);
        assert_eq!(time_since_first_minimum(&pairs), 5.0);
    }

    #[test]
    fn test_quantiles() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile(0.0, &values), 1.0);
        assert_eq!(quantile(1.0, &values), 5.0);
        assert_eq!(quantile(0.25, &values), 2.0);
    }
}
