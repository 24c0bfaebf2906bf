use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A product the user buys routinely. Derived from purchase history only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UsualBasketItem {
    pub sku: String,
    pub confidence: f64,
    pub typical_quantity: u32,
    pub purchase_count: u32,
    pub last_purchased: DateTime<Utc>,
    pub avg_interval_days: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Overdue,
    DueSoon,
    Upcoming,
    Unknown,
}

impl Urgency {
    pub fn is_actionable(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overdue => "overdue",
            Self::DueSoon => "due_soon",
            Self::Upcoming => "upcoming",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IntervalCluster {
    pub mean_interval_days: f64,
    pub interval_count: usize,
    pub consistency: f64,
    pub next_due: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CyclePattern {
    Insufficient,
    Single,
    /// Two separate purchase rhythms for the same product.
    MultiPattern { primary: IntervalCluster, alternate: IntervalCluster },
}

impl CyclePattern {
    pub fn is_multi(&self) -> bool {
        matches!(self, Self::MultiPattern { .. })
    }
}

/// An interval dropped as an outlier before averaging.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExcludedInterval {
    pub started_at: DateTime<Utc>,
    pub length_days: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CycleAdjustment {
    HolidayShift { holiday: String, shift_days: i64 },
    SeasonalPause { gap_started_at: DateTime<Utc>, gap_days: f64 },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReorderCycle {
    pub sku: String,
    pub mean_interval_days: f64,
    pub consistency: f64,
    pub sample_count: usize,
    pub last_ordered: Option<DateTime<Utc>>,
    pub next_due: Option<DateTime<Utc>>,
    pub urgency: Urgency,
    pub pattern: CyclePattern,
    #[serde(default)]
    pub excluded_intervals: Vec<ExcludedInterval>,
    #[serde(default)]
    pub adjustments: Vec<CycleAdjustment>,
}

impl ReorderCycle {
    pub fn unknown(sku: impl Into<String>, sample_count: usize, last_ordered: Option<DateTime<Utc>>) -> Self {
        Self {
            sku: sku.into(),
            mean_interval_days: 0.0,
            consistency: 0.0,
            sample_count,
            last_ordered,
            next_due: None,
            urgency: Urgency::Unknown,
            pattern: CyclePattern::Insufficient,
            excluded_intervals: Vec::new(),
            adjustments: Vec::new(),
        }
    }
}

/// Reorders due around the same time, suggested together.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReorderBundle {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub items: Vec<ReorderCycle>,
}

/// Immutable result of one batch recompute for a user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InsightSnapshot {
    pub usual: Vec<UsualBasketItem>,
    pub cycles: Vec<ReorderCycle>,
    pub computed_at: DateTime<Utc>,
    pub history_version: u64,
    /// Last instant the usual basket stays exact; after it a purchase leaves or enters the
    /// analysis window. `None` when no purchase can cross the window boundary.
    #[serde(default)]
    pub fresh_through: Option<DateTime<Utc>>,
}

impl InsightSnapshot {
    pub fn empty(computed_at: DateTime<Utc>) -> Self {
        Self {
            usual: Vec::new(),
            cycles: Vec::new(),
            computed_at,
            history_version: 0,
            fresh_through: None,
        }
    }

    /// Whether reading at `now` would give the same result as recomputing at `now`.
    pub fn is_fresh_at(&self, history_version: u64, now: DateTime<Utc>) -> bool {
        self.history_version == history_version
            && now >= self.computed_at
            && self.fresh_through.map_or(true, |through| now <= through)
    }
}
