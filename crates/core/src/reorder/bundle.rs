use crate::domain::insight::{ReorderBundle, ReorderCycle};

use super::intervals::days_between;

/// Groups actionable cycles due within `window_days` of each group's soonest item.
/// Products with nothing due nearby stay out of bundles; they still show up as due reorders.
pub fn suggest_bundles(cycles: &[ReorderCycle], window_days: f64) -> Vec<ReorderBundle> {
    let mut due: Vec<&ReorderCycle> = cycles
        .iter()
        .filter(|cycle| cycle.urgency.is_actionable() && cycle.next_due.is_some())
        .collect();
    due.sort_by(|left, right| left.next_due.cmp(&right.next_due).then_with(|| left.sku.cmp(&right.sku)));

    let mut bundles = Vec::new();
    let mut current: Vec<ReorderCycle> = Vec::new();
    for cycle in due {
        let Some(next_due) = cycle.next_due else { continue };
        let anchor = current.first().and_then(|first| first.next_due);
        match anchor {
            Some(start) if days_between(start, next_due) <= window_days => current.push(cycle.clone()),
            _ => {
                flush(&mut current, &mut bundles);
                current.push(cycle.clone());
            }
        }
    }
    flush(&mut current, &mut bundles);
    bundles
}

fn flush(current: &mut Vec<ReorderCycle>, bundles: &mut Vec<ReorderBundle>) {
    let items = std::mem::take(current);
    if items.len() < 2 {
        return;
    }
    let (Some(window_start), Some(window_end)) =
        (items.first().and_then(|item| item.next_due), items.last().and_then(|item| item.next_due))
    else {
        return;
    };
    bundles.push(ReorderBundle { window_start, window_end, items });
}
