use chrono::{DateTime, Duration, Utc};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Gap between two consecutive purchases.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Interval {
    pub started_at: DateTime<Utc>,
    pub length_days: f64,
}

pub fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / MILLIS_PER_DAY
}

pub fn add_days(at: DateTime<Utc>, days: f64) -> DateTime<Utc> {
    at + Duration::milliseconds((days * MILLIS_PER_DAY).round() as i64)
}

/// Intervals between successive timestamps. Input must already be sorted ascending.
pub fn intervals(timestamps: &[DateTime<Utc>]) -> Vec<Interval> {
    timestamps
        .windows(2)
        .map(|pair| Interval { started_at: pair[0], length_days: days_between(pair[0], pair[1]) })
        .collect()
}

pub fn lengths(intervals: &[Interval]) -> Vec<f64> {
    intervals.iter().map(|interval| interval.length_days).collect()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn population_std_dev(values: &[f64]) -> Option<f64> {
    let mean = mean(values)?;
    let variance =
        values.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

pub fn coefficient_of_variation(values: &[f64]) -> Option<f64> {
    let mean = mean(values)?;
    if mean <= 0.0 {
        return None;
    }
    Some(population_std_dev(values)? / mean)
}

/// `1 - stddev / mean`, clamped to `[0, 1]`. Zero when there is nothing to measure.
pub fn consistency(values: &[f64]) -> f64 {
    coefficient_of_variation(values).map(|cv| (1.0 - cv).clamp(0.0, 1.0)).unwrap_or(0.0)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let middle = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[middle - 1] + sorted[middle]) / 2.0)
    } else {
        Some(sorted[middle])
    }
}

/// Splits off intervals longer than `multiplier * median`. Returns `(retained, excluded)`.
pub fn split_outliers(intervals: &[Interval], multiplier: f64) -> (Vec<Interval>, Vec<Interval>) {
    let Some(median) = median(&lengths(intervals)) else {
        return (Vec::new(), Vec::new());
    };
    let limit = median * multiplier;
    intervals.iter().copied().partition(|interval| interval.length_days <= limit)
}
