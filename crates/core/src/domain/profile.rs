use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::UserId;

pub const SCORE_MIN: f64 = -1.0;
pub const SCORE_MAX: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffinityDimension {
    Category,
    Brand,
    Attribute,
}

/// Per-user affinity scores. Every score stays within `[-1.0, 1.0]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserPreferenceProfile {
    pub user_id: UserId,
    pub category_scores: BTreeMap<String, f64>,
    pub brand_scores: BTreeMap<String, f64>,
    pub attribute_scores: BTreeMap<String, f64>,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub signal_count: u32,
}

impl UserPreferenceProfile {
    pub fn empty(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            category_scores: BTreeMap::new(),
            brand_scores: BTreeMap::new(),
            attribute_scores: BTreeMap::new(),
            last_updated: now,
            signal_count: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.category_scores.is_empty()
            && self.brand_scores.is_empty()
            && self.attribute_scores.is_empty()
    }

    pub fn scores(&self, dimension: AffinityDimension) -> &BTreeMap<String, f64> {
        match dimension {
            AffinityDimension::Category => &self.category_scores,
            AffinityDimension::Brand => &self.brand_scores,
            AffinityDimension::Attribute => &self.attribute_scores,
        }
    }

    pub fn scores_mut(&mut self, dimension: AffinityDimension) -> &mut BTreeMap<String, f64> {
        match dimension {
            AffinityDimension::Category => &mut self.category_scores,
            AffinityDimension::Brand => &mut self.brand_scores,
            AffinityDimension::Attribute => &mut self.attribute_scores,
        }
    }

    pub fn affinity(&self, dimension: AffinityDimension, key: &str) -> Option<f64> {
        self.scores(dimension).get(key).copied()
    }

    /// Multiplies every score by `factor` and drops scores that fell below `prune_epsilon`.
    pub fn decay_by(&mut self, factor: f64, prune_epsilon: f64) {
        let factor = factor.clamp(0.0, 1.0);
        for dimension in
            [AffinityDimension::Category, AffinityDimension::Brand, AffinityDimension::Attribute]
        {
            let scores = self.scores_mut(dimension);
            for value in scores.values_mut() {
                *value *= factor;
            }
            scores.retain(|_, value| value.abs() >= prune_epsilon);
        }
    }

    pub fn add(&mut self, dimension: AffinityDimension, key: &str, delta: f64) {
        let entry = self.scores_mut(dimension).entry(key.to_owned()).or_insert(0.0);
        *entry = clamp_score(*entry + delta);
    }

    pub fn all_scores(&self) -> impl Iterator<Item = f64> + '_ {
        self.category_scores
            .values()
            .chain(self.brand_scores.values())
            .chain(self.attribute_scores.values())
            .copied()
    }
}

pub fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(SCORE_MIN, SCORE_MAX)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{clamp_score, AffinityDimension, UserPreferenceProfile};
    use crate::domain::UserId;

    #[test]
    fn add_clamps_into_bounds() {
        let mut profile = UserPreferenceProfile::empty(UserId::new("u1"), Utc::now());
        profile.add(AffinityDimension::Brand, "acme", 0.8);
        profile.add(AffinityDimension::Brand, "acme", 0.8);
        profile.add(AffinityDimension::Category, "snacks", -3.0);

        assert_eq!(profile.affinity(AffinityDimension::Brand, "acme"), Some(1.0));
        assert_eq!(profile.affinity(AffinityDimension::Category, "snacks"), Some(-1.0));
    }

    #[test]
    fn decay_prunes_negligible_scores() {
        let mut profile = UserPreferenceProfile::empty(UserId::new("u1"), Utc::now());
        profile.add(AffinityDimension::Attribute, "organic", 0.5);
        profile.add(AffinityDimension::Attribute, "vegan", 0.001);

        profile.decay_by(0.5, 0.001);

        assert_eq!(profile.affinity(AffinityDimension::Attribute, "organic"), Some(0.25));
        assert_eq!(profile.affinity(AffinityDimension::Attribute, "vegan"), None);
    }

    #[test]
    fn nan_clamps_to_neutral() {
        assert_eq!(clamp_score(f64::NAN), 0.0);
    }
}
