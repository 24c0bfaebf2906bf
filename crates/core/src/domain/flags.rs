use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::UserId;

/// Per-user feature switches. A user without a stored record gets [`PreferenceFlags::defaults_for`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceFlags {
    pub user_id: UserId,
    pub smart_ranking_enabled: bool,
    pub usual_orders_enabled: bool,
    pub reorder_reminders_enabled: bool,
    pub dietary_filters_enabled: bool,
    #[serde(default = "enabled")]
    pub analytics_enabled: bool,
    /// Attributes the user has explicitly asked to never see, e.g. `allergen:peanut`.
    #[serde(default)]
    pub dietary_exclusions: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

fn enabled() -> bool {
    true
}

impl PreferenceFlags {
    pub fn defaults_for(user_id: UserId) -> Self {
        Self {
            user_id,
            smart_ranking_enabled: true,
            usual_orders_enabled: true,
            reorder_reminders_enabled: true,
            dietary_filters_enabled: true,
            analytics_enabled: true,
            dietary_exclusions: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn all_disabled(user_id: UserId) -> Self {
        Self {
            smart_ranking_enabled: false,
            usual_orders_enabled: false,
            reorder_reminders_enabled: false,
            dietary_filters_enabled: false,
            analytics_enabled: false,
            ..Self::defaults_for(user_id)
        }
    }

    pub fn is_enabled(&self, flag: FeatureFlag) -> bool {
        match flag {
            FeatureFlag::SmartRanking => self.smart_ranking_enabled,
            FeatureFlag::UsualOrders => self.usual_orders_enabled,
            FeatureFlag::ReorderReminders => self.reorder_reminders_enabled,
            FeatureFlag::DietaryFilters => self.dietary_filters_enabled,
            FeatureFlag::Analytics => self.analytics_enabled,
        }
    }

    pub fn apply(&mut self, patch: FlagsPatch) {
        if let Some(value) = patch.smart_ranking_enabled {
            self.smart_ranking_enabled = value;
        }
        if let Some(value) = patch.usual_orders_enabled {
            self.usual_orders_enabled = value;
        }
        if let Some(value) = patch.reorder_reminders_enabled {
            self.reorder_reminders_enabled = value;
        }
        if let Some(value) = patch.dietary_filters_enabled {
            self.dietary_filters_enabled = value;
        }
        if let Some(value) = patch.analytics_enabled {
            self.analytics_enabled = value;
        }
        if let Some(exclusions) = patch.dietary_exclusions {
            self.dietary_exclusions = exclusions;
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureFlag {
    SmartRanking,
    UsualOrders,
    ReorderReminders,
    DietaryFilters,
    Analytics,
}

/// Partial update; `None` leaves the current value untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagsPatch {
    pub smart_ranking_enabled: Option<bool>,
    pub usual_orders_enabled: Option<bool>,
    pub reorder_reminders_enabled: Option<bool>,
    pub dietary_filters_enabled: Option<bool>,
    pub analytics_enabled: Option<bool>,
    pub dietary_exclusions: Option<Vec<String>>,
}

impl FlagsPatch {
    pub fn opt_out(flag: FeatureFlag) -> Self {
        let mut patch = Self::default();
        match flag {
            FeatureFlag::SmartRanking => patch.smart_ranking_enabled = Some(false),
            FeatureFlag::UsualOrders => patch.usual_orders_enabled = Some(false),
            FeatureFlag::ReorderReminders => patch.reorder_reminders_enabled = Some(false),
            FeatureFlag::DietaryFilters => patch.dietary_filters_enabled = Some(false),
            FeatureFlag::Analytics => patch.analytics_enabled = Some(false),
        }
        patch
    }
}

#[cfg(test)]
mod tests {
    use super::{FeatureFlag, FlagsPatch, PreferenceFlags};
    use crate::domain::UserId;

    #[test]
    fn defaults_enable_every_feature() {
        let flags = PreferenceFlags::defaults_for(UserId::new("u1"));
        for flag in [
            FeatureFlag::SmartRanking,
            FeatureFlag::UsualOrders,
            FeatureFlag::ReorderReminders,
            FeatureFlag::DietaryFilters,
            FeatureFlag::Analytics,
        ] {
            assert!(flags.is_enabled(flag), "{flag:?} should default to enabled");
        }
    }

    #[test]
    fn opt_out_patch_only_touches_one_flag() {
        let mut flags = PreferenceFlags::defaults_for(UserId::new("u1"));
        flags.apply(FlagsPatch::opt_out(FeatureFlag::UsualOrders));

        assert!(!flags.usual_orders_enabled);
        assert!(flags.smart_ranking_enabled);
        assert!(flags.reorder_reminders_enabled);
    }
}
