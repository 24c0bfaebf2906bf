use serde::{Deserialize, Serialize};

use crate::domain::status::AssessmentStatus;
use crate::errors::DomainError;

/// Candidate supplied by the relevance service. The ranker never mutates it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductCandidate {
    pub sku: String,
    pub raw_relevance_score: f64,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub attributes: Vec<String>,
}

impl ProductCandidate {
    pub fn new(sku: impl Into<String>, raw_relevance_score: f64) -> Self {
        Self {
            sku: sku.into(),
            raw_relevance_score,
            category: None,
            brand: None,
            attributes: Vec::new(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_brand(mut self, brand: impl Into<String>) -> Self {
        self.brand = Some(brand.into());
        self
    }

    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes.extend(attributes.into_iter().map(Into::into));
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.sku.trim().is_empty() {
            return Err(DomainError::invalid("candidate.sku", "must not be blank"));
        }
        if !self.raw_relevance_score.is_finite() {
            return Err(DomainError::invalid(
                "candidate.raw_relevance_score",
                format!("must be finite for sku `{}`", self.sku),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RankingFactors {
    pub brand_affinity: Option<f64>,
    pub category_affinity: Option<f64>,
    pub attribute_affinity: Option<f64>,
    pub usual_boost: f64,
    pub reorder_boost: f64,
    pub personalization_weight: f64,
}

impl RankingFactors {
    pub fn has_signal(&self) -> bool {
        self.brand_affinity.is_some()
            || self.category_affinity.is_some()
            || self.attribute_affinity.is_some()
            || self.usual_boost > 0.0
            || self.reorder_boost > 0.0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub sku: String,
    pub raw_relevance_score: f64,
    pub final_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub personalization_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ranking_factors: Option<RankingFactors>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppliedFeature {
    SmartRanking,
    UsualOrders,
    ReorderReminders,
    DietaryFilters,
}

impl AppliedFeature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SmartRanking => "smart_ranking",
            Self::UsualOrders => "usual_orders",
            Self::ReorderReminders => "reorder_reminders",
            Self::DietaryFilters => "dietary_filters",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankingOutcome {
    pub candidates: Vec<RankedCandidate>,
    pub confidence: f64,
    pub applied_features: Vec<AppliedFeature>,
    pub status: AssessmentStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_skus: Vec<String>,
}

impl RankingOutcome {
    pub fn skus(&self) -> Vec<&str> {
        self.candidates.iter().map(|candidate| candidate.sku.as_str()).collect()
    }
}
