//! Tunable engine parameters.
//!
//! Loaded from the `[engine]` table of the config file. A [`SettingsHandle`] hands out
//! immutable snapshots so a request sees one consistent set of values while an operator
//! reload swaps in the next one.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::domain::event::EventType;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub signals: SignalSettings,
    pub ranking: RankingSettings,
    pub usual: UsualSettings,
    pub reorder: ReorderSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    pub purchase_first: f64,
    pub purchase_repeat: f64,
    pub add_to_bag: f64,
    pub remove_from_bag: f64,
    pub click: f64,
    pub view: f64,
    pub scroll_past: f64,
    pub save_for_later: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            purchase_first: 0.8,
            purchase_repeat: 1.0,
            add_to_bag: 0.5,
            remove_from_bag: -0.4,
            click: 0.2,
            view: 0.05,
            scroll_past: -0.05,
            save_for_later: 0.3,
        }
    }
}

impl SignalWeights {
    pub fn weight_for(&self, event_type: EventType, repeat_purchase: bool) -> f64 {
        match event_type {
            EventType::Purchase if repeat_purchase => self.purchase_repeat,
            EventType::Purchase => self.purchase_first,
            EventType::AddToBag => self.add_to_bag,
            EventType::RemoveFromBag => self.remove_from_bag,
            EventType::Click => self.click,
            EventType::View => self.view,
            EventType::ScrollPast => self.scroll_past,
            EventType::SaveForLater => self.save_for_later,
        }
    }

    fn all(&self) -> [(&'static str, f64); 8] {
        [
            ("purchase_first", self.purchase_first),
            ("purchase_repeat", self.purchase_repeat),
            ("add_to_bag", self.add_to_bag),
            ("remove_from_bag", self.remove_from_bag),
            ("click", self.click),
            ("view", self.view),
            ("scroll_past", self.scroll_past),
            ("save_for_later", self.save_for_later),
        ]
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalSettings {
    pub weights: SignalWeights,
    pub half_life_days: f64,
    pub category_share: f64,
    pub brand_share: f64,
    pub attribute_share: f64,
    /// Event ids remembered per user. A replay older than this many newer events is applied again.
    pub dedup_window: usize,
    pub prune_epsilon: f64,
}

impl Default for SignalSettings {
    fn default() -> Self {
        Self {
            weights: SignalWeights::default(),
            half_life_days: 30.0,
            category_share: 1.0,
            brand_share: 1.0,
            attribute_share: 0.6,
            dedup_window: 512,
            prune_epsilon: 0.001,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentWeights {
    pub new_user: f64,
    pub price_sensitive: f64,
    pub budget: f64,
    pub standard: f64,
    pub repeat_shopper: f64,
}

impl Default for SegmentWeights {
    fn default() -> Self {
        Self { new_user: 0.0, price_sensitive: 0.15, budget: 0.2, standard: 0.35, repeat_shopper: 0.5 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingSettings {
    pub segment_weights: SegmentWeights,
    pub brand_weight: f64,
    pub category_weight: f64,
    pub attribute_weight: f64,
    pub usual_weight: f64,
    pub overdue_boost: f64,
    pub due_soon_boost: f64,
    pub allergen_prefixes: Vec<String>,
    pub avoidance_threshold: f64,
    pub maturity_signals: u32,
    pub repeat_shopper_min_usual: usize,
}

impl Default for RankingSettings {
    fn default() -> Self {
        Self {
            segment_weights: SegmentWeights::default(),
            brand_weight: 0.35,
            category_weight: 0.30,
            attribute_weight: 0.20,
            usual_weight: 0.25,
            overdue_boost: 0.20,
            due_soon_boost: 0.15,
            allergen_prefixes: vec!["allergen:".to_string(), "contains:".to_string()],
            avoidance_threshold: -0.3,
            maturity_signals: 10,
            repeat_shopper_min_usual: 3,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsualSettings {
    pub window_days: i64,
    pub min_purchase_count: u32,
    pub saturation_count: u32,
    pub count_weight: f64,
    pub regularity_weight: f64,
}

impl Default for UsualSettings {
    fn default() -> Self {
        Self {
            window_days: 180,
            min_purchase_count: 3,
            saturation_count: 6,
            count_weight: 0.5,
            regularity_weight: 0.5,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiPatternSettings {
    pub min_cluster_size: usize,
    pub min_size_ratio: f64,
    pub min_separation_ratio: f64,
    pub max_cluster_cv: f64,
}

impl Default for MultiPatternSettings {
    fn default() -> Self {
        Self { min_cluster_size: 2, min_size_ratio: 0.5, min_separation_ratio: 2.0, max_cluster_cv: 0.25 }
    }
}

/// Shifts a predicted due date that lands near a holiday.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HolidayRule {
    pub name: String,
    pub month: u32,
    pub day: u32,
    pub window_days: i64,
    /// Negative values move the prediction earlier.
    pub shift_days: i64,
    /// Categories the rule applies to; empty applies to every category.
    #[serde(default)]
    pub categories: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReorderSettings {
    pub outlier_multiplier: f64,
    pub due_soon_days: f64,
    pub upcoming_days: f64,
    pub bundle_window_days: f64,
    pub multi_pattern: MultiPatternSettings,
    pub holidays: Vec<HolidayRule>,
}

impl Default for ReorderSettings {
    fn default() -> Self {
        Self {
            outlier_multiplier: 2.0,
            due_soon_days: 2.0,
            upcoming_days: 7.0,
            bundle_window_days: 3.0,
            multi_pattern: MultiPatternSettings::default(),
            holidays: Vec::new(),
        }
    }
}

impl EngineSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let signals = &self.signals;
        for (name, weight) in signals.weights.all() {
            if !weight.is_finite() || !(-1.0..=1.0).contains(&weight) {
                return Err(invalid(format!(
                    "engine.signals.weights.{name} must be within -1.0..=1.0"
                )));
            }
        }
        if !(signals.half_life_days.is_finite() && signals.half_life_days > 0.0) {
            return Err(invalid("engine.signals.half_life_days must be greater than zero"));
        }
        for (name, share) in [
            ("category_share", signals.category_share),
            ("brand_share", signals.brand_share),
            ("attribute_share", signals.attribute_share),
        ] {
            unit_range(&format!("engine.signals.{name}"), share)?;
        }
        if signals.dedup_window == 0 {
            return Err(invalid("engine.signals.dedup_window must be greater than zero"));
        }
        let epsilon = signals.prune_epsilon;
        if !(epsilon.is_finite() && (0.0..=MAX_PRUNE_EPSILON).contains(&epsilon)) {
            return Err(invalid(format!(
                "engine.signals.prune_epsilon must be within 0.0..={MAX_PRUNE_EPSILON}"
            )));
        }

        let ranking = &self.ranking;
        let segments = &ranking.segment_weights;
        for (name, weight) in [
            ("new_user", segments.new_user),
            ("price_sensitive", segments.price_sensitive),
            ("budget", segments.budget),
            ("standard", segments.standard),
            ("repeat_shopper", segments.repeat_shopper),
        ] {
            unit_range(&format!("engine.ranking.segment_weights.{name}"), weight)?;
        }
        for (name, weight) in [
            ("brand_weight", ranking.brand_weight),
            ("category_weight", ranking.category_weight),
            ("attribute_weight", ranking.attribute_weight),
            ("usual_weight", ranking.usual_weight),
            ("overdue_boost", ranking.overdue_boost),
            ("due_soon_boost", ranking.due_soon_boost),
        ] {
            unit_range(&format!("engine.ranking.{name}"), weight)?;
        }
        if !(-1.0..=0.0).contains(&ranking.avoidance_threshold) {
            return Err(invalid("engine.ranking.avoidance_threshold must be within -1.0..=0.0"));
        }
        if ranking.maturity_signals == 0 {
            return Err(invalid("engine.ranking.maturity_signals must be greater than zero"));
        }

        let usual = &self.usual;
        if usual.window_days <= 0 {
            return Err(invalid("engine.usual.window_days must be greater than zero"));
        }
        if usual.min_purchase_count < 2 {
            return Err(invalid("engine.usual.min_purchase_count must be at least 2"));
        }
        if usual.saturation_count == 0 {
            return Err(invalid("engine.usual.saturation_count must be greater than zero"));
        }
        unit_range("engine.usual.count_weight", usual.count_weight)?;
        unit_range("engine.usual.regularity_weight", usual.regularity_weight)?;

        let reorder = &self.reorder;
        if !(reorder.outlier_multiplier.is_finite() && reorder.outlier_multiplier > 1.0) {
            return Err(invalid("engine.reorder.outlier_multiplier must be greater than 1.0"));
        }
        if !(reorder.due_soon_days >= 0.0 && reorder.upcoming_days >= reorder.due_soon_days) {
            return Err(invalid(
                "engine.reorder.upcoming_days must be >= due_soon_days and both non-negative",
            ));
        }
        if reorder.bundle_window_days < 0.0 {
            return Err(invalid("engine.reorder.bundle_window_days must not be negative"));
        }
        let multi = &reorder.multi_pattern;
        if multi.min_cluster_size < 2 {
            return Err(invalid("engine.reorder.multi_pattern.min_cluster_size must be at least 2"));
        }
        unit_range("engine.reorder.multi_pattern.min_size_ratio", multi.min_size_ratio)?;
        if multi.min_separation_ratio <= 1.0 {
            return Err(invalid(
                "engine.reorder.multi_pattern.min_separation_ratio must be greater than 1.0",
            ));
        }
        for rule in &reorder.holidays {
            if !(1..=12).contains(&rule.month) || !(1..=31).contains(&rule.day) {
                return Err(invalid(format!(
                    "engine.reorder.holidays `{}` has an invalid month/day",
                    rule.name
                )));
            }
            if !(0..=MAX_HOLIDAY_OFFSET_DAYS).contains(&rule.window_days) {
                return Err(invalid(format!(
                    "engine.reorder.holidays `{}` window_days must be within 0..={MAX_HOLIDAY_OFFSET_DAYS}",
                    rule.name
                )));
            }
            if !(-MAX_HOLIDAY_OFFSET_DAYS..=MAX_HOLIDAY_OFFSET_DAYS).contains(&rule.shift_days) {
                return Err(invalid(format!(
                    "engine.reorder.holidays `{}` shift_days must be within ±{MAX_HOLIDAY_OFFSET_DAYS}",
                    rule.name
                )));
            }
        }

        Ok(())
    }
}

const MAX_PRUNE_EPSILON: f64 = 0.1;
const MAX_HOLIDAY_OFFSET_DAYS: i64 = 365;

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation(message.into())
}

fn unit_range(name: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be within 0.0..=1.0")))
    }
}

/// Shared, hot-swappable settings.
#[derive(Debug, Default)]
pub struct SettingsHandle {
    current: RwLock<Arc<EngineSettings>>,
}

impl SettingsHandle {
    pub fn new(settings: EngineSettings) -> Self {
        Self { current: RwLock::new(Arc::new(settings)) }
    }

    pub fn current(&self) -> Arc<EngineSettings> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Validates and installs `settings`; the previous snapshot stays valid for holders.
    pub fn replace(&self, settings: EngineSettings) -> Result<(), ConfigError> {
        settings.validate()?;
        let next = Arc::new(settings);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{EngineSettings, HolidayRule, SettingsHandle};
    use crate::config::ConfigError;
    use crate::domain::event::EventType;

    #[test]
    fn defaults_validate() {
        assert!(EngineSettings::default().validate().is_ok());
    }

    #[test]
    fn purchase_weight_depends_on_repeat() {
        let weights = EngineSettings::default().signals.weights;
        assert_eq!(weights.weight_for(EventType::Purchase, false), 0.8);
        assert_eq!(weights.weight_for(EventType::Purchase, true), 1.0);
        assert_eq!(weights.weight_for(EventType::ScrollPast, false), -0.05);
    }

    #[test]
    fn non_positive_half_life_is_rejected() {
        let mut settings = EngineSettings::default();
        settings.signals.half_life_days = 0.0;

        let error = settings.validate().expect_err("zero half-life must fail");
        assert!(matches!(error, ConfigError::Validation(ref message) if message.contains("half_life_days")));
    }

    #[test]
    fn holiday_shift_must_stay_within_a_year() {
        let mut settings = EngineSettings::default();
        settings.reorder.holidays.push(HolidayRule {
            name: "thanksgiving".to_string(),
            month: 11,
            day: 27,
            window_days: 5,
            shift_days: i64::MIN,
            categories: Vec::new(),
        });

        let error = settings.validate().expect_err("unbounded shift must fail");
        assert!(matches!(error, ConfigError::Validation(ref message) if message.contains("shift_days")));

        settings.reorder.holidays[0].shift_days = -3;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn prune_epsilon_must_be_small_and_finite() {
        for epsilon in [f64::NAN, f64::INFINITY, -0.01, 0.5] {
            let mut settings = EngineSettings::default();
            settings.signals.prune_epsilon = epsilon;

            let error = settings.validate().expect_err("bad epsilon must fail");
            assert!(
                matches!(error, ConfigError::Validation(ref message) if message.contains("prune_epsilon")),
                "epsilon {epsilon}"
            );
        }
    }

    #[test]
    fn replace_keeps_old_snapshot_alive_for_readers() {
        let handle = SettingsHandle::new(EngineSettings::default());
        let before = handle.current();

        let mut next = EngineSettings::default();
        next.ranking.segment_weights.standard = 0.6;
        handle.replace(next).expect("valid settings");

        assert_eq!(before.ranking.segment_weights.standard, 0.35);
        assert_eq!(handle.current().ranking.segment_weights.standard, 0.6);
    }

    #[test]
    fn replace_rejects_invalid_settings_and_keeps_current() {
        let handle = SettingsHandle::new(EngineSettings::default());
        let mut bad = EngineSettings::default();
        bad.reorder.outlier_multiplier = 0.5;

        assert!(handle.replace(bad).is_err());
        assert_eq!(handle.current().reorder.outlier_multiplier, 2.0);
    }
}
