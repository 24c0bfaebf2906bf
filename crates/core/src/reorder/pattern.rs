use super::intervals::{coefficient_of_variation, mean};
use crate::settings::MultiPatternSettings;

/// Two tight, well separated interval groups, shorter group first.
#[derive(Clone, Debug, PartialEq)]
pub struct IntervalSplit {
    pub short: Vec<f64>,
    pub long: Vec<f64>,
}

/// Looks for two purchase rhythms in one product's intervals, e.g. two households sharing an
/// account. The split point is the largest ratio between neighbouring sorted intervals.
pub fn detect_multi_pattern(lengths: &[f64], settings: &MultiPatternSettings) -> Option<IntervalSplit> {
    let min_cluster = settings.min_cluster_size.max(1);
    // Same-day reorders carry no rhythm.
    let mut sorted: Vec<f64> = lengths.iter().copied().filter(|length| *length > 0.0).collect();
    if sorted.len() < min_cluster * 2 {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let (split_at, _) = sorted
        .windows(2)
        .enumerate()
        .map(|(index, pair)| (index + 1, pair[1] / pair[0]))
        .max_by(|left, right| left.1.total_cmp(&right.1))?;

    let (short, long) = sorted.split_at(split_at);
    if short.len() < min_cluster || long.len() < min_cluster {
        return None;
    }

    let size_ratio = short.len().min(long.len()) as f64 / short.len().max(long.len()) as f64;
    if size_ratio < settings.min_size_ratio {
        return None;
    }

    let separation = mean(long)? / mean(short)?;
    if separation < settings.min_separation_ratio {
        return None;
    }

    let tight = |cluster: &[f64]| {
        coefficient_of_variation(cluster).is_some_and(|cv| cv <= settings.max_cluster_cv)
    };
    if !tight(short) || !tight(long) {
        return None;
    }

    Some(IntervalSplit { short: short.to_vec(), long: long.to_vec() })
}
