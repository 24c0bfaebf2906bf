use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};

use crate::domain::insight::CycleAdjustment;
use crate::settings::HolidayRule;

fn category_matches(rule: &HolidayRule, category: Option<&str>) -> bool {
    if rule.categories.is_empty() {
        return true;
    }
    category.is_some_and(|category| {
        rule.categories.iter().any(|candidate| candidate.eq_ignore_ascii_case(category))
    })
}

fn near_holiday(rule: &HolidayRule, date: NaiveDate) -> bool {
    // A late-December prediction can be near a New Year rule dated in the following year.
    [date.year() - 1, date.year(), date.year() + 1]
        .into_iter()
        .filter_map(|year| NaiveDate::from_ymd_opt(year, rule.month, rule.day))
        .any(|holiday| (date - holiday).num_days().abs() <= rule.window_days)
}

/// First rule (in configured order) whose window contains `next_due` and whose categories match.
pub fn apply_holiday_rules(
    next_due: DateTime<Utc>,
    category: Option<&str>,
    rules: &[HolidayRule],
) -> Option<(DateTime<Utc>, CycleAdjustment)> {
    let date = next_due.date_naive();
    let rule = rules
        .iter()
        .find(|rule| category_matches(rule, category) && near_holiday(rule, date))?;

    Some((
        next_due + Duration::days(rule.shift_days),
        CycleAdjustment::HolidayShift { holiday: rule.name.clone(), shift_days: rule.shift_days },
    ))
}
