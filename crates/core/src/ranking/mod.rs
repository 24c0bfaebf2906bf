//! Blends relevance scores with a user's learned affinities.

mod segment;

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::domain::candidate::{
    AppliedFeature, ProductCandidate, RankedCandidate, RankingFactors, RankingOutcome,
};
use crate::domain::flags::PreferenceFlags;
use crate::domain::insight::{InsightSnapshot, Urgency};
use crate::domain::profile::{clamp_score, AffinityDimension, UserPreferenceProfile};
use crate::domain::status::AssessmentStatus;
use crate::errors::DomainError;
use crate::settings::RankingSettings;

pub use segment::UserSegment;

/// Per-sku history signals the ranker can boost on.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RankingSignals {
    pub usual_confidence: HashMap<String, f64>,
    pub reorder_urgency: HashMap<String, Urgency>,
}

impl RankingSignals {
    pub fn from_snapshot(snapshot: &InsightSnapshot) -> Self {
        Self {
            usual_confidence: snapshot
                .usual
                .iter()
                .map(|item| (item.sku.clone(), item.confidence))
                .collect(),
            reorder_urgency: snapshot
                .cycles
                .iter()
                .map(|cycle| (cycle.sku.clone(), cycle.urgency))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.usual_confidence.is_empty() && self.reorder_urgency.is_empty()
    }

    pub fn usual_count(&self) -> usize {
        self.usual_confidence.len()
    }
}

#[derive(Clone, Debug, Default)]
pub struct PersonalizedRanker {
    settings: RankingSettings,
}

struct Scored {
    index: usize,
    ranked: RankedCandidate,
}

impl PersonalizedRanker {
    pub fn new(settings: RankingSettings) -> Self {
        Self { settings }
    }

    pub fn rerank(
        &self,
        candidates: &[ProductCandidate],
        profile: Option<&UserPreferenceProfile>,
        segment: UserSegment,
        signals: &RankingSignals,
        flags: &PreferenceFlags,
    ) -> Result<RankingOutcome, DomainError> {
        for candidate in candidates {
            candidate.validate()?;
        }

        let mut applied: BTreeSet<AppliedFeature> = BTreeSet::new();
        let (surviving, excluded_skus) = self.dietary_filter(candidates, profile, flags);
        if !excluded_skus.is_empty() {
            applied.insert(AppliedFeature::DietaryFilters);
        }

        let weight = segment.personalization_weight(&self.settings.segment_weights);
        let has_data = profile.is_some_and(|profile| !profile.is_empty()) || !signals.is_empty();
        if !flags.smart_ranking_enabled || !has_data || weight <= 0.0 {
            let status =
                if flags.smart_ranking_enabled && !has_data { AssessmentStatus::InsufficientData } else { AssessmentStatus::Ok };
            return Ok(RankingOutcome {
                candidates: raw_order(&surviving),
                confidence: 0.0,
                applied_features: applied.into_iter().collect(),
                status,
                excluded_skus,
            });
        }

        let mut scored: Vec<Scored> = surviving
            .iter()
            .map(|(index, candidate)| {
                let factors = self.factors(candidate, profile, signals, flags, weight);
                if factors.brand_affinity.is_some()
                    || factors.category_affinity.is_some()
                    || factors.attribute_affinity.is_some()
                {
                    applied.insert(AppliedFeature::SmartRanking);
                }
                if factors.usual_boost > 0.0 {
                    applied.insert(AppliedFeature::UsualOrders);
                }
                if factors.reorder_boost > 0.0 {
                    applied.insert(AppliedFeature::ReorderReminders);
                }
                let personalization = self.personalization_score(&factors);
                let final_score =
                    candidate.raw_relevance_score * (1.0 - weight) + personalization * weight;
                Scored {
                    index: *index,
                    ranked: RankedCandidate {
                        sku: candidate.sku.clone(),
                        raw_relevance_score: candidate.raw_relevance_score,
                        final_score,
                        personalization_score: Some(personalization),
                        ranking_factors: Some(factors),
                    },
                }
            })
            .collect();

        let with_signal = scored
            .iter()
            .filter(|entry| entry.ranked.ranking_factors.as_ref().is_some_and(RankingFactors::has_signal))
            .count();
        let coverage = if scored.is_empty() { 0.0 } else { with_signal as f64 / scored.len() as f64 };
        let maturity = match profile {
            Some(profile) if self.settings.maturity_signals > 0 => {
                (f64::from(profile.signal_count) / f64::from(self.settings.maturity_signals)).min(1.0)
            }
            Some(_) => 1.0,
            None => 0.0,
        };

        scored.sort_by(|left, right| {
            right
                .ranked
                .final_score
                .total_cmp(&left.ranked.final_score)
                .then_with(|| right.ranked.raw_relevance_score.total_cmp(&left.ranked.raw_relevance_score))
                .then_with(|| left.index.cmp(&right.index))
        });

        Ok(RankingOutcome {
            candidates: scored.into_iter().map(|entry| entry.ranked).collect(),
            confidence: (coverage * maturity).clamp(0.0, 1.0),
            applied_features: applied.into_iter().collect(),
            status: AssessmentStatus::Ok,
            excluded_skus,
        })
    }

    fn factors(
        &self,
        candidate: &ProductCandidate,
        profile: Option<&UserPreferenceProfile>,
        signals: &RankingSignals,
        flags: &PreferenceFlags,
        weight: f64,
    ) -> RankingFactors {
        let lookup = |dimension, key: Option<&str>| {
            profile.zip(key).and_then(|(profile, key)| profile.affinity(dimension, key))
        };

        let attribute_scores: Vec<f64> = candidate
            .attributes
            .iter()
            .filter_map(|attribute| lookup(AffinityDimension::Attribute, Some(attribute.as_str())))
            .collect();
        let attribute_affinity = if attribute_scores.is_empty() {
            None
        } else {
            Some(attribute_scores.iter().sum::<f64>() / attribute_scores.len() as f64)
        };

        let usual_boost = if flags.usual_orders_enabled {
            signals
                .usual_confidence
                .get(&candidate.sku)
                .map(|confidence| self.settings.usual_weight * confidence)
                .unwrap_or(0.0)
        } else {
            0.0
        };

        let reorder_boost = if flags.reorder_reminders_enabled {
            match signals.reorder_urgency.get(&candidate.sku) {
                Some(Urgency::Overdue) => self.settings.overdue_boost,
                Some(Urgency::DueSoon) => self.settings.due_soon_boost,
                _ => 0.0,
            }
        } else {
            0.0
        };

        RankingFactors {
            brand_affinity: lookup(AffinityDimension::Brand, candidate.brand.as_deref()),
            category_affinity: lookup(AffinityDimension::Category, candidate.category.as_deref()),
            attribute_affinity,
            usual_boost,
            reorder_boost,
            personalization_weight: weight,
        }
    }

    fn personalization_score(&self, factors: &RankingFactors) -> f64 {
        let total = factors.brand_affinity.unwrap_or(0.0) * self.settings.brand_weight
            + factors.category_affinity.unwrap_or(0.0) * self.settings.category_weight
            + factors.attribute_affinity.unwrap_or(0.0) * self.settings.attribute_weight
            + factors.usual_boost
            + factors.reorder_boost;
        clamp_score(total)
    }

    /// Removes candidates carrying an explicitly excluded attribute, or an allergen-style
    /// attribute the user has reacted against. Returns survivors with their input positions.
    fn dietary_filter<'a>(
        &self,
        candidates: &'a [ProductCandidate],
        profile: Option<&UserPreferenceProfile>,
        flags: &PreferenceFlags,
    ) -> (Vec<(usize, &'a ProductCandidate)>, Vec<String>) {
        let indexed = candidates.iter().enumerate();
        if !flags.dietary_filters_enabled {
            return (indexed.collect(), Vec::new());
        }

        let mut avoided: HashSet<&str> =
            flags.dietary_exclusions.iter().map(String::as_str).collect();
        if let Some(profile) = profile {
            avoided.extend(
                profile
                    .attribute_scores
                    .iter()
                    .filter(|(key, score)| {
                        **score <= self.settings.avoidance_threshold
                            && self.settings.allergen_prefixes.iter().any(|prefix| key.starts_with(prefix.as_str()))
                    })
                    .map(|(key, _)| key.as_str()),
            );
        }

        let mut excluded = Vec::new();
        let mut surviving = Vec::with_capacity(candidates.len());
        for (index, candidate) in indexed {
            if candidate.attributes.iter().any(|attribute| avoided.contains(attribute.as_str())) {
                excluded.push(candidate.sku.clone());
            } else {
                surviving.push((index, candidate));
            }
        }
        (surviving, excluded)
    }
}

/// Relevance-only order: raw score descending, input order on ties.
fn raw_order(candidates: &[(usize, &ProductCandidate)]) -> Vec<RankedCandidate> {
    let mut ordered: Vec<(usize, &ProductCandidate)> = candidates.to_vec();
    ordered.sort_by(|(left_index, left), (right_index, right)| {
        right
            .raw_relevance_score
            .total_cmp(&left.raw_relevance_score)
            .then_with(|| left_index.cmp(right_index))
    });
    ordered
        .into_iter()
        .map(|(_, candidate)| RankedCandidate {
            sku: candidate.sku.clone(),
            raw_relevance_score: candidate.raw_relevance_score,
            final_score: candidate.raw_relevance_score,
            personalization_score: None,
            ranking_factors: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{PersonalizedRanker, RankingSignals, UserSegment};
    use crate::domain::candidate::{AppliedFeature, ProductCandidate};
    use crate::domain::flags::PreferenceFlags;
    use crate::domain::insight::Urgency;
    use crate::domain::profile::{AffinityDimension, UserPreferenceProfile};
    use crate::domain::status::AssessmentStatus;
    use crate::domain::UserId;
    use crate::errors::DomainError;

    fn user() -> UserId {
        UserId::new("u1")
    }

    fn candidates() -> Vec<ProductCandidate> {
        vec![
            ProductCandidate::new("sku-store-brand-pb", 0.9)
                .with_brand("value")
                .with_category("spreads")
                .with_attributes(["allergen:peanut"]),
            ProductCandidate::new("sku-almond-butter", 0.7).with_brand("justins").with_category("spreads"),
            ProductCandidate::new("sku-jam", 0.7).with_brand("bonne-maman").with_category("spreads"),
            ProductCandidate::new("sku-honey", 0.4).with_brand("justins").with_category("sweeteners"),
        ]
    }

    fn profile_with(entries: &[(AffinityDimension, &str, f64)]) -> UserPreferenceProfile {
        let mut profile = UserPreferenceProfile::empty(user(), Utc::now());
        for (dimension, key, delta) in entries {
            profile.add(*dimension, key, *delta);
        }
        profile.signal_count = 10;
        profile
    }

    #[test]
    fn new_user_gets_relevance_order_without_personalization() {
        let ranker = PersonalizedRanker::default();
        let outcome = ranker
            .rerank(
                &candidates(),
                None,
                UserSegment::New,
                &RankingSignals::default(),
                &PreferenceFlags::defaults_for(user()),
            )
            .expect("rerank");

        assert_eq!(
            outcome.skus(),
            vec!["sku-store-brand-pb", "sku-almond-butter", "sku-jam", "sku-honey"]
        );
        assert_eq!(outcome.confidence, 0.0);
        assert!(outcome.applied_features.is_empty());
        assert!(outcome.candidates.iter().all(|candidate| candidate.personalization_score.is_none()
            && candidate.ranking_factors.is_none()
            && candidate.final_score == candidate.raw_relevance_score));
    }

    #[test]
    fn brand_affinity_lifts_a_candidate() {
        let ranker = PersonalizedRanker::default();
        let profile = profile_with(&[(AffinityDimension::Brand, "justins", 1.0)]);

        let outcome = ranker
            .rerank(
                &candidates(),
                Some(&profile),
                UserSegment::RepeatShopper,
                &RankingSignals::default(),
                &PreferenceFlags::defaults_for(user()),
            )
            .expect("rerank");

        assert_eq!(outcome.skus()[0], "sku-almond-butter");
        assert_eq!(outcome.applied_features, vec![AppliedFeature::SmartRanking]);
        assert_eq!(outcome.status, AssessmentStatus::Ok);
        let top = &outcome.candidates[0];
        let factors = top.ranking_factors.as_ref().expect("factors");
        assert_eq!(factors.brand_affinity, Some(1.0));
        assert_eq!(factors.personalization_weight, 0.5);
        assert!((top.final_score - (0.7 * 0.5 + 0.35 * 0.5)).abs() < 1e-9);
    }

    #[test]
    fn detected_allergen_avoidance_removes_candidate() {
        let ranker = PersonalizedRanker::default();
        let profile = profile_with(&[(AffinityDimension::Attribute, "allergen:peanut", -0.6)]);

        let outcome = ranker
            .rerank(
                &candidates(),
                Some(&profile),
                UserSegment::Standard,
                &RankingSignals::default(),
                &PreferenceFlags::defaults_for(user()),
            )
            .expect("rerank");

        assert!(!outcome.skus().contains(&"sku-store-brand-pb"));
        assert_eq!(outcome.excluded_skus, vec!["sku-store-brand-pb".to_string()]);
        assert!(outcome.applied_features.contains(&AppliedFeature::DietaryFilters));
    }

    #[test]
    fn explicit_exclusion_applies_even_for_new_users() {
        let ranker = PersonalizedRanker::default();
        let mut flags = PreferenceFlags::defaults_for(user());
        flags.dietary_exclusions = vec!["allergen:peanut".to_string()];

        let outcome = ranker
            .rerank(&candidates(), None, UserSegment::New, &RankingSignals::default(), &flags)
            .expect("rerank");

        assert_eq!(outcome.skus(), vec!["sku-almond-butter", "sku-jam", "sku-honey"]);
        assert_eq!(outcome.applied_features, vec![AppliedFeature::DietaryFilters]);
    }

    #[test]
    fn dietary_filter_is_skipped_when_disabled() {
        let ranker = PersonalizedRanker::default();
        let profile = profile_with(&[(AffinityDimension::Attribute, "allergen:peanut", -0.9)]);
        let mut flags = PreferenceFlags::defaults_for(user());
        flags.dietary_filters_enabled = false;

        let outcome = ranker
            .rerank(&candidates(), Some(&profile), UserSegment::Standard, &RankingSignals::default(), &flags)
            .expect("rerank");

        assert!(outcome.skus().contains(&"sku-store-brand-pb"));
        assert!(outcome.excluded_skus.is_empty());
    }

    #[test]
    fn smart_ranking_opt_out_falls_back_to_relevance() {
        let ranker = PersonalizedRanker::default();
        let profile = profile_with(&[(AffinityDimension::Brand, "justins", 1.0)]);
        let mut flags = PreferenceFlags::defaults_for(user());
        flags.smart_ranking_enabled = false;

        let outcome = ranker
            .rerank(&candidates(), Some(&profile), UserSegment::RepeatShopper, &RankingSignals::default(), &flags)
            .expect("rerank");

        assert_eq!(outcome.skus()[0], "sku-store-brand-pb");
        assert_eq!(outcome.confidence, 0.0);
        assert!(outcome.applied_features.is_empty());
    }

    #[test]
    fn usual_and_overdue_signals_boost_and_respect_flags() {
        let ranker = PersonalizedRanker::default();
        let mut signals = RankingSignals::default();
        signals.usual_confidence.insert("sku-honey".to_string(), 1.0);
        signals.reorder_urgency.insert("sku-honey".to_string(), Urgency::Overdue);

        let outcome = ranker
            .rerank(
                &candidates(),
                None,
                UserSegment::RepeatShopper,
                &signals,
                &PreferenceFlags::defaults_for(user()),
            )
            .expect("rerank");
        let honey = outcome.candidates.iter().find(|candidate| candidate.sku == "sku-honey").expect("honey");
        assert!((honey.personalization_score.expect("score") - 0.45).abs() < 1e-9);
        assert_eq!(
            outcome.applied_features,
            vec![AppliedFeature::UsualOrders, AppliedFeature::ReorderReminders]
        );

        let mut flags = PreferenceFlags::defaults_for(user());
        flags.reorder_reminders_enabled = false;
        let outcome = ranker
            .rerank(&candidates(), None, UserSegment::RepeatShopper, &signals, &flags)
            .expect("rerank");
        assert_eq!(outcome.applied_features, vec![AppliedFeature::UsualOrders]);
    }

    #[test]
    fn ties_keep_input_order() {
        let ranker = PersonalizedRanker::default();
        let profile = profile_with(&[(AffinityDimension::Category, "spreads", 0.5)]);
        let tied = vec![
            ProductCandidate::new("sku-first", 0.5).with_category("spreads"),
            ProductCandidate::new("sku-second", 0.5).with_category("spreads"),
        ];

        let outcome = ranker
            .rerank(&tied, Some(&profile), UserSegment::Standard, &RankingSignals::default(), &PreferenceFlags::defaults_for(user()))
            .expect("rerank");

        assert_eq!(outcome.skus(), vec!["sku-first", "sku-second"]);
    }

    #[test]
    fn confidence_scales_with_coverage_and_maturity() {
        let ranker = PersonalizedRanker::default();
        let mut profile = profile_with(&[(AffinityDimension::Brand, "justins", 0.5)]);
        profile.signal_count = 5;

        let outcome = ranker
            .rerank(&candidates(), Some(&profile), UserSegment::Standard, &RankingSignals::default(), &PreferenceFlags::defaults_for(user()))
            .expect("rerank");

        // Two of four candidates carry the brand, profile half mature.
        assert!((outcome.confidence - 0.25).abs() < 1e-9);
    }

    #[test]
    fn non_finite_relevance_is_rejected() {
        let ranker = PersonalizedRanker::default();
        let result = ranker.rerank(
            &[ProductCandidate::new("sku-bad", f64::NAN)],
            None,
            UserSegment::New,
            &RankingSignals::default(),
            &PreferenceFlags::defaults_for(user()),
        );

        assert!(matches!(
            result,
            Err(DomainError::InvalidInput { field: "candidate.raw_relevance_score", .. })
        ));
    }
}
