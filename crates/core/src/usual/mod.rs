//! "Your usual" detection from purchase history.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};

use crate::domain::insight::UsualBasketItem;
use crate::domain::purchase::PurchaseRecord;
use crate::history::OrderHistory;
use crate::reorder::intervals::{consistency, intervals, lengths, mean, split_outliers};
use crate::settings::UsualSettings;

#[derive(Clone, Debug)]
pub struct UsualOrderAnalyzer {
    settings: UsualSettings,
    outlier_multiplier: f64,
}

impl Default for UsualOrderAnalyzer {
    fn default() -> Self {
        Self { settings: UsualSettings::default(), outlier_multiplier: 2.0 }
    }
}

impl UsualOrderAnalyzer {
    /// `outlier_multiplier` is shared with cycle estimation so both agree on which gaps count.
    pub fn new(settings: UsualSettings, outlier_multiplier: f64) -> Self {
        Self { settings, outlier_multiplier }
    }

    pub fn analyze(&self, history: &OrderHistory, now: DateTime<Utc>) -> Vec<UsualBasketItem> {
        self.analyze_records(history.records(), now)
    }

    pub fn analyze_records(&self, records: &[PurchaseRecord], now: DateTime<Utc>) -> Vec<UsualBasketItem> {
        let window_start = now - Duration::days(self.settings.window_days);
        let mut by_sku: BTreeMap<&str, Vec<&PurchaseRecord>> = BTreeMap::new();
        for record in records
            .iter()
            .filter(|record| record.order_timestamp >= window_start && record.order_timestamp <= now)
        {
            by_sku.entry(record.sku.as_str()).or_default().push(record);
        }

        let mut items: Vec<UsualBasketItem> = by_sku
            .into_iter()
            .filter_map(|(sku, mut purchases)| {
                purchases.sort_by_key(|record| record.order_timestamp);
                self.item_for(sku, &purchases)
            })
            .collect();

        items.sort_by(|left, right| {
            right
                .confidence
                .total_cmp(&left.confidence)
                .then_with(|| right.purchase_count.cmp(&left.purchase_count))
                .then_with(|| left.sku.cmp(&right.sku))
        });
        items
    }

    /// Last instant at which the analysis window still holds exactly the purchases it holds at
    /// `now`: the earliest moment an included purchase ages out, or just before a future-dated
    /// one comes in.
    pub fn window_stable_through(
        &self,
        records: &[PurchaseRecord],
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        let window = Duration::days(self.settings.window_days);
        let window_start = now - window;
        records
            .iter()
            .filter_map(|record| {
                if record.order_timestamp > now {
                    Some(record.order_timestamp - Duration::nanoseconds(1))
                } else if record.order_timestamp >= window_start {
                    Some(record.order_timestamp + window)
                } else {
                    None
                }
            })
            .min()
    }

    fn item_for(&self, sku: &str, purchases: &[&PurchaseRecord]) -> Option<UsualBasketItem> {
        let purchase_count = u32::try_from(purchases.len()).unwrap_or(u32::MAX);
        if purchase_count < self.settings.min_purchase_count {
            return None;
        }
        let last_purchased = purchases.last()?.order_timestamp;

        let timestamps: Vec<DateTime<Utc>> =
            purchases.iter().map(|record| record.order_timestamp).collect();
        let (retained, _) = split_outliers(&intervals(&timestamps), self.outlier_multiplier);
        let retained = lengths(&retained);

        let saturation = f64::from(self.settings.saturation_count.max(1));
        let frequency = (f64::from(purchase_count) / saturation).min(1.0);
        let confidence = (self.settings.count_weight * frequency
            + self.settings.regularity_weight * consistency(&retained))
        .clamp(0.0, 1.0);

        Some(UsualBasketItem {
            sku: sku.to_owned(),
            confidence,
            typical_quantity: typical_quantity(purchases),
            purchase_count,
            last_purchased,
            avg_interval_days: mean(&retained),
        })
    }
}

/// Most frequent quantity; a tie goes to the quantity bought most recently.
fn typical_quantity(purchases: &[&PurchaseRecord]) -> u32 {
    let mut counts: HashMap<u32, (usize, usize)> = HashMap::new();
    for (position, record) in purchases.iter().enumerate() {
        let entry = counts.entry(record.quantity).or_insert((0, position));
        entry.0 += 1;
        entry.1 = position;
    }
    counts
        .into_iter()
        .max_by(|(_, left), (_, right)| left.0.cmp(&right.0).then_with(|| left.1.cmp(&right.1)))
        .map(|(quantity, _)| quantity)
        .unwrap_or(1)
}
