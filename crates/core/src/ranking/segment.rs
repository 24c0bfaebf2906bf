use serde::{Deserialize, Serialize};

use crate::domain::profile::UserPreferenceProfile;
use crate::settings::SegmentWeights;

/// Shopper segment; decides how much personalization is blended into relevance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserSegment {
    New,
    PriceSensitive,
    Budget,
    Standard,
    RepeatShopper,
}

impl UserSegment {
    pub fn personalization_weight(&self, weights: &SegmentWeights) -> f64 {
        match self {
            Self::New => weights.new_user,
            Self::PriceSensitive => weights.price_sensitive,
            Self::Budget => weights.budget,
            Self::Standard => weights.standard,
            Self::RepeatShopper => weights.repeat_shopper,
        }
    }

    /// An explicit segment from the caller wins; otherwise it is inferred from what we know.
    pub fn resolve(
        explicit: Option<Self>,
        profile: Option<&UserPreferenceProfile>,
        usual_items: usize,
        repeat_shopper_min_usual: usize,
    ) -> Self {
        if let Some(segment) = explicit {
            return segment;
        }
        if usual_items >= repeat_shopper_min_usual.max(1) {
            return Self::RepeatShopper;
        }
        match profile {
            Some(profile) if !profile.is_empty() => Self::Standard,
            _ => Self::New,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::PriceSensitive => "price_sensitive",
            Self::Budget => "budget",
            Self::Standard => "standard",
            Self::RepeatShopper => "repeat_shopper",
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::UserSegment;
    use crate::domain::profile::{AffinityDimension, UserPreferenceProfile};
    use crate::domain::UserId;
    use crate::settings::SegmentWeights;

    #[test]
    fn default_weights_by_segment() {
        let weights = SegmentWeights::default();
        assert_eq!(UserSegment::New.personalization_weight(&weights), 0.0);
        assert_eq!(UserSegment::PriceSensitive.personalization_weight(&weights), 0.15);
        assert_eq!(UserSegment::Budget.personalization_weight(&weights), 0.2);
        assert_eq!(UserSegment::Standard.personalization_weight(&weights), 0.35);
        assert_eq!(UserSegment::RepeatShopper.personalization_weight(&weights), 0.5);
    }

    #[test]
    fn resolution_prefers_explicit_then_history_then_profile() {
        let mut profile = UserPreferenceProfile::empty(UserId::new("u1"), Utc::now());
        profile.add(AffinityDimension::Brand, "acme", 0.4);

        assert_eq!(
            UserSegment::resolve(Some(UserSegment::Budget), Some(&profile), 5, 3),
            UserSegment::Budget
        );
        assert_eq!(UserSegment::resolve(None, Some(&profile), 3, 3), UserSegment::RepeatShopper);
        assert_eq!(UserSegment::resolve(None, Some(&profile), 1, 3), UserSegment::Standard);
        assert_eq!(UserSegment::resolve(None, None, 0, 3), UserSegment::New);
    }
}
