//! Purchase cycle estimation, urgency, and bundling.

mod bundle;
mod holiday;
pub mod intervals;
mod pattern;

use chrono::{DateTime, Datelike, Utc};

use crate::domain::insight::{
    CycleAdjustment, CyclePattern, ExcludedInterval, IntervalCluster, ReorderBundle, ReorderCycle,
    Urgency,
};
use crate::domain::purchase::PurchaseRecord;
use crate::history::OrderHistory;
use crate::settings::ReorderSettings;

pub use bundle::suggest_bundles;
pub use holiday::apply_holiday_rules;
pub use pattern::{detect_multi_pattern, IntervalSplit};

use intervals::{add_days, consistency, days_between, lengths, mean, split_outliers};

#[derive(Clone, Debug, Default)]
pub struct ReorderIntelligence {
    settings: ReorderSettings,
}

impl ReorderIntelligence {
    pub fn new(settings: ReorderSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ReorderSettings {
        &self.settings
    }

    /// Cycle for one product from that product's purchases. Fewer than two purchases gives an
    /// `unknown` cycle, never an error.
    pub fn estimate_cycle(
        &self,
        sku: &str,
        purchases: &[&PurchaseRecord],
        now: DateTime<Utc>,
    ) -> ReorderCycle {
        let mut timestamps: Vec<DateTime<Utc>> =
            purchases.iter().map(|record| record.order_timestamp).collect();
        timestamps.sort();
        let sample_count = timestamps.len();
        let last_ordered = timestamps.last().copied();

        let Some(last) = last_ordered.filter(|_| sample_count >= 2) else {
            return ReorderCycle::unknown(sku, sample_count, last_ordered);
        };

        let all_intervals = intervals::intervals(&timestamps);
        let category = purchases.iter().rev().find_map(|record| record.category.as_deref());

        let (mean_interval_days, cycle_consistency, pattern, excluded) =
            match detect_multi_pattern(&lengths(&all_intervals), &self.settings.multi_pattern) {
                Some(split) => {
                    let primary = self.cluster(&split.short, last);
                    let alternate = self.cluster(&split.long, last);
                    (
                        primary.mean_interval_days,
                        primary.consistency,
                        CyclePattern::MultiPattern { primary, alternate },
                        Vec::new(),
                    )
                }
                None => {
                    let (retained, excluded) =
                        split_outliers(&all_intervals, self.settings.outlier_multiplier);
                    let retained = lengths(&retained);
                    (
                        mean(&retained).unwrap_or(0.0),
                        consistency(&retained),
                        CyclePattern::Single,
                        excluded,
                    )
                }
            };

        let excluded_intervals: Vec<ExcludedInterval> = excluded
            .iter()
            .map(|interval| ExcludedInterval {
                started_at: interval.started_at,
                length_days: interval.length_days,
            })
            .collect();

        if mean_interval_days <= 0.0 {
            let mut cycle = ReorderCycle::unknown(sku, sample_count, last_ordered);
            cycle.pattern = pattern;
            cycle.excluded_intervals = excluded_intervals;
            return cycle;
        }

        let mut next_due = add_days(last, mean_interval_days);
        let mut adjustments = Vec::new();
        if let Some((shifted, adjustment)) =
            apply_holiday_rules(next_due, category, &self.settings.holidays)
        {
            next_due = shifted;
            adjustments.push(adjustment);
        }
        for gap in &excluded_intervals {
            if gap.started_at.month() == next_due.month() {
                adjustments.push(CycleAdjustment::SeasonalPause {
                    gap_started_at: gap.started_at,
                    gap_days: gap.length_days,
                });
            }
        }

        ReorderCycle {
            sku: sku.to_owned(),
            mean_interval_days,
            consistency: cycle_consistency,
            sample_count,
            last_ordered,
            next_due: Some(next_due),
            urgency: self.urgency(next_due, now),
            pattern,
            excluded_intervals,
            adjustments,
        }
    }

    /// One cycle per product in the history, ordered by sku.
    pub fn estimate_all(&self, history: &OrderHistory, now: DateTime<Utc>) -> Vec<ReorderCycle> {
        history
            .by_sku()
            .into_iter()
            .map(|(sku, purchases)| self.estimate_cycle(sku, &purchases, now))
            .collect()
    }

    pub fn urgency(&self, next_due: DateTime<Utc>, now: DateTime<Utc>) -> Urgency {
        if now > next_due {
            return Urgency::Overdue;
        }
        let days_left = days_between(now, next_due);
        if days_left <= self.settings.due_soon_days {
            Urgency::DueSoon
        } else if days_left <= self.settings.upcoming_days {
            Urgency::Upcoming
        } else {
            Urgency::Unknown
        }
    }

    /// Re-derives urgency against `now` for cycles computed earlier, keeping the actionable ones
    /// sorted by due date.
    pub fn due_reorders(&self, cycles: &[ReorderCycle], now: DateTime<Utc>) -> Vec<ReorderCycle> {
        let mut due: Vec<ReorderCycle> = cycles
            .iter()
            .filter_map(|cycle| {
                let next_due = cycle.next_due?;
                let mut cycle = cycle.clone();
                cycle.urgency = self.urgency(next_due, now);
                cycle.urgency.is_actionable().then_some(cycle)
            })
            .collect();
        due.sort_by(|left, right| {
            left.next_due.cmp(&right.next_due).then_with(|| left.sku.cmp(&right.sku))
        });
        due
    }

    pub fn bundles(&self, cycles: &[ReorderCycle], now: DateTime<Utc>) -> Vec<ReorderBundle> {
        suggest_bundles(&self.due_reorders(cycles, now), self.settings.bundle_window_days)
    }

    fn cluster(&self, lengths: &[f64], last: DateTime<Utc>) -> IntervalCluster {
        let mean_interval_days = mean(lengths).unwrap_or(0.0);
        IntervalCluster {
            mean_interval_days,
            interval_count: lengths.len(),
            consistency: consistency(lengths),
            next_due: add_days(last, mean_interval_days),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::ReorderIntelligence;
    use crate::domain::insight::{CycleAdjustment, CyclePattern, ReorderCycle, Urgency};
    use crate::domain::purchase::PurchaseRecord;
    use crate::settings::{HolidayRule, ReorderSettings};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 4, 9, 0, 0).single().expect("timestamp")
    }

    fn purchases_at(days: &[f64]) -> Vec<PurchaseRecord> {
        days.iter()
            .enumerate()
            .map(|(index, day)| {
                PurchaseRecord::new(
                    "u1",
                    "sku-coffee",
                    1,
                    start() + Duration::minutes((day * 1440.0) as i64),
                    format!("order-{index}"),
                )
            })
            .collect()
    }

    fn estimate(
        engine: &ReorderIntelligence,
        records: &[PurchaseRecord],
        now: DateTime<Utc>,
    ) -> ReorderCycle {
        let refs: Vec<&PurchaseRecord> = records.iter().collect();
        engine.estimate_cycle("sku-coffee", &refs, now)
    }

    #[test]
    fn steady_weekly_purchases_predict_next_due() {
        let engine = ReorderIntelligence::default();
        let records = purchases_at(&[0.0, 7.0, 14.0, 22.0, 29.0]);
        let last = records[4].order_timestamp;

        let cycle = estimate(&engine, &records, last);

        assert!((cycle.mean_interval_days - 7.25).abs() < 1e-9);
        assert!(cycle.consistency > 0.9);
        assert_eq!(cycle.next_due, Some(last + Duration::hours(174)));
        assert_eq!(cycle.pattern, CyclePattern::Single);
        assert_eq!(cycle.sample_count, 5);
    }

    #[test]
    fn single_purchase_is_unknown_not_an_error() {
        let engine = ReorderIntelligence::default();
        let records = purchases_at(&[0.0]);

        let cycle = estimate(&engine, &records, start());

        assert_eq!(cycle.sample_count, 1);
        assert_eq!(cycle.consistency, 0.0);
        assert_eq!(cycle.urgency, Urgency::Unknown);
        assert_eq!(cycle.pattern, CyclePattern::Insufficient);
        assert_eq!(cycle.next_due, None);
        assert_eq!(cycle.last_ordered, Some(start()));
    }

    #[test]
    fn two_households_are_reported_as_multi_pattern() {
        let engine = ReorderIntelligence::default();
        // Intervals 7, 30, 8, 31, 7, 29 interleave two rhythms.
        let records = purchases_at(&[0.0, 7.0, 37.0, 45.0, 76.0, 83.0, 112.0]);
        let last = records[6].order_timestamp;

        let cycle = estimate(&engine, &records, last);

        match &cycle.pattern {
            CyclePattern::MultiPattern { primary, alternate } => {
                assert!((primary.mean_interval_days - 22.0 / 3.0).abs() < 1e-9);
                assert!((alternate.mean_interval_days - 30.0).abs() < 1e-9);
                assert_eq!(primary.interval_count, 3);
            }
            other => panic!("expected multi pattern, got {other:?}"),
        }
        assert!((cycle.mean_interval_days - 22.0 / 3.0).abs() < 1e-9);
        assert!(cycle.excluded_intervals.is_empty());
    }

    #[test]
    fn vacation_gap_is_excluded_and_noted_when_due_in_same_month() {
        let engine = ReorderIntelligence::default();
        // Weekly through January, then a 40 day gap starting Feb 1, then weekly again.
        let records = purchases_at(&[0.0, 7.0, 14.0, 21.0, 28.0, 68.0, 75.0, 82.0]);
        let last = records[7].order_timestamp;

        let cycle = estimate(&engine, &records, last);

        assert_eq!(cycle.excluded_intervals.len(), 1);
        assert!((cycle.excluded_intervals[0].length_days - 40.0).abs() < 1e-9);
        assert!((cycle.mean_interval_days - 7.0).abs() < 1e-9);
        assert_eq!(cycle.consistency, 1.0);
        // Last order is Mar 27, so next due is Apr 3; the gap started Feb 1.
        assert!(cycle.adjustments.is_empty());
    }

    #[test]
    fn seasonal_pause_is_recorded_for_matching_month() {
        let engine = ReorderIntelligence::default();
        // Last January's purchases stopped on Jan 19 2025 for most of the year.
        let records = purchases_at(&[-364.0, -357.0, -350.0, -21.0, -14.0, -7.0, 0.0]);
        let last = records[6].order_timestamp;

        let cycle = estimate(&engine, &records, last);

        assert_eq!(cycle.excluded_intervals.len(), 1);
        assert_eq!(
            cycle.excluded_intervals[0].started_at,
            Utc.with_ymd_and_hms(2025, 1, 19, 9, 0, 0).single().expect("timestamp")
        );
        assert_eq!(cycle.next_due, Some(last + Duration::days(7)));
        assert_eq!(
            cycle.adjustments,
            vec![CycleAdjustment::SeasonalPause {
                gap_started_at: cycle.excluded_intervals[0].started_at,
                gap_days: 329.0,
            }]
        );
    }

    #[test]
    fn holiday_rule_shifts_matching_category() {
        let settings = ReorderSettings {
            holidays: vec![HolidayRule {
                name: "new_year".to_string(),
                month: 1,
                day: 1,
                window_days: 3,
                shift_days: -2,
                categories: vec!["coffee".to_string()],
            }],
            ..ReorderSettings::default()
        };
        let engine = ReorderIntelligence::new(settings);
        let anchor = Utc.with_ymd_and_hms(2025, 12, 11, 9, 0, 0).single().expect("timestamp");
        let records: Vec<PurchaseRecord> = (0..3)
            .map(|week| {
                PurchaseRecord::new(
                    "u1",
                    "sku-coffee",
                    1,
                    anchor + Duration::days(week * 7),
                    format!("order-{week}"),
                )
                .with_category("coffee")
            })
            .collect();

        let cycle = estimate(&engine, &records, anchor);

        // Last order Dec 25, unshifted prediction Jan 1.
        assert_eq!(
            cycle.next_due,
            Some(Utc.with_ymd_and_hms(2025, 12, 30, 9, 0, 0).single().expect("timestamp"))
        );
        assert!(matches!(
            cycle.adjustments.first(),
            Some(CycleAdjustment::HolidayShift { holiday, shift_days: -2 }) if holiday == "new_year"
        ));
    }

    #[test]
    fn urgency_horizons() {
        let engine = ReorderIntelligence::default();
        let now = start();

        assert_eq!(engine.urgency(now - Duration::hours(1), now), Urgency::Overdue);
        assert_eq!(engine.urgency(now + Duration::days(2), now), Urgency::DueSoon);
        assert_eq!(engine.urgency(now + Duration::days(5), now), Urgency::Upcoming);
        assert_eq!(engine.urgency(now + Duration::days(20), now), Urgency::Unknown);
    }

    #[test]
    fn due_reorders_recompute_urgency_and_sort_by_due_date() {
        let engine = ReorderIntelligence::default();
        let records = purchases_at(&[0.0, 14.0, 28.0]);
        let refs: Vec<&PurchaseRecord> = records.iter().collect();
        let last = records[2].order_timestamp;
        let cycle = engine.estimate_cycle("sku-coffee", &refs, last);
        assert_eq!(cycle.urgency, Urgency::Unknown);

        let due = engine.due_reorders(&[cycle], last + Duration::days(12));

        assert_eq!(due.len(), 1);
        assert_eq!(due[0].urgency, Urgency::DueSoon);
    }
}
