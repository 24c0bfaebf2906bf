use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::domain::event::{EventType, InteractionEvent};
use crate::domain::profile::{AffinityDimension, UserPreferenceProfile};
use crate::domain::UserId;
use crate::settings::SignalSettings;

/// Result of offering one event to the store.
#[derive(Clone, Debug)]
pub struct SignalApplication {
    pub profile: Arc<UserPreferenceProfile>,
    /// `false` when the event id had already been applied.
    pub applied: bool,
    pub weight: f64,
}

/// `profile` stays `None` for users whose events are only deduplicated, never learned from.
struct ProfileEntry {
    profile: Option<Arc<UserPreferenceProfile>>,
    seen_order: VecDeque<String>,
    seen: HashSet<String>,
    purchased_skus: HashSet<String>,
}

impl ProfileEntry {
    fn new() -> Self {
        Self {
            profile: None,
            seen_order: VecDeque::new(),
            seen: HashSet::new(),
            purchased_skus: HashSet::new(),
        }
    }

    fn profile_or_empty(&self, user_id: &UserId, now: DateTime<Utc>) -> Arc<UserPreferenceProfile> {
        self.profile
            .clone()
            .unwrap_or_else(|| Arc::new(UserPreferenceProfile::empty(user_id.clone(), now)))
    }

    fn remember(&mut self, event_id: &str, window: usize) {
        self.seen.insert(event_id.to_owned());
        self.seen_order.push_back(event_id.to_owned());
        while self.seen_order.len() > window.max(1) {
            if let Some(evicted) = self.seen_order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
    }
}

/// `0.5^(elapsed / half_life)`; elapsed time never counts negative.
pub fn decay_factor(from: DateTime<Utc>, to: DateTime<Utc>, half_life_days: f64) -> f64 {
    let elapsed_days = ((to - from).num_milliseconds() as f64 / 86_400_000.0).max(0.0);
    if half_life_days <= 0.0 {
        return 1.0;
    }
    0.5_f64.powf(elapsed_days / half_life_days)
}

/// Sharded per-user profiles. Writers for one user serialize on that user's shard entry;
/// readers get an `Arc` to a complete snapshot and never block on other users.
#[derive(Default)]
pub struct PreferenceStore {
    entries: DashMap<UserId, ProfileEntry>,
}

impl PreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, event: &InteractionEvent, settings: &SignalSettings) -> SignalApplication {
        let mut entry = self.entries.entry(event.user_id.clone()).or_insert_with(ProfileEntry::new);

        if entry.seen.contains(&event.event_id.0) {
            return SignalApplication {
                profile: entry.profile_or_empty(&event.user_id, event.timestamp),
                applied: false,
                weight: 0.0,
            };
        }

        let repeat_purchase = event.event_type == EventType::Purchase
            && entry.purchased_skus.contains(&event.product.sku);
        let weight = settings.weights.weight_for(event.event_type, repeat_purchase);

        let base = entry.profile_or_empty(&event.user_id, event.timestamp);
        let mut next = UserPreferenceProfile::clone(&base);
        let factor = decay_factor(next.last_updated, event.timestamp, settings.half_life_days);
        next.decay_by(factor, settings.prune_epsilon);

        if let Some(category) = event.product.category.as_deref() {
            next.add(AffinityDimension::Category, category, weight * settings.category_share);
        }
        if let Some(brand) = event.product.brand.as_deref() {
            next.add(AffinityDimension::Brand, brand, weight * settings.brand_share);
        }
        for attribute in &event.product.attributes {
            next.add(AffinityDimension::Attribute, attribute, weight * settings.attribute_share);
        }
        // A fresh contribution can itself be below epsilon, e.g. a tagged view on a small share.
        next.decay_by(1.0, settings.prune_epsilon);

        if event.timestamp > next.last_updated {
            next.last_updated = event.timestamp;
        }
        next.signal_count = next.signal_count.saturating_add(1);

        if event.event_type == EventType::Purchase {
            entry.purchased_skus.insert(event.product.sku.clone());
        }
        entry.remember(&event.event_id.0, settings.dedup_window);
        let profile = Arc::new(next);
        entry.profile = Some(Arc::clone(&profile));

        SignalApplication { profile, applied: true, weight }
    }

    /// Records the event id for deduplication without learning from it. Returns `false` when the
    /// id was already seen. Check and insert happen under the same entry lock.
    pub fn remember_only(&self, event: &InteractionEvent, window: usize) -> bool {
        let mut entry = self.entries.entry(event.user_id.clone()).or_insert_with(ProfileEntry::new);
        if entry.seen.contains(&event.event_id.0) {
            return false;
        }
        entry.remember(&event.event_id.0, window);
        true
    }

    pub fn snapshot(&self, user_id: &UserId) -> Option<Arc<UserPreferenceProfile>> {
        self.entries.get(user_id).and_then(|entry| entry.profile.clone())
    }

    pub fn affinity(&self, user_id: &UserId, dimension: AffinityDimension, key: &str) -> Option<f64> {
        self.entries
            .get(user_id)
            .and_then(|entry| entry.profile.as_ref().and_then(|profile| profile.affinity(dimension, key)))
    }

    /// The profile as it would look at `now` after decay, without writing anything back.
    pub fn decayed_snapshot(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
        settings: &SignalSettings,
    ) -> Option<UserPreferenceProfile> {
        let snapshot = self.snapshot(user_id)?;
        let mut decayed = UserPreferenceProfile::clone(&snapshot);
        decayed.decay_by(
            decay_factor(decayed.last_updated, now, settings.half_life_days),
            settings.prune_epsilon,
        );
        Some(decayed)
    }

    pub fn has_seen(&self, user_id: &UserId, event_id: &str) -> bool {
        self.entries.get(user_id).is_some_and(|entry| entry.seen.contains(event_id))
    }

    /// Drops the profile, the dedup memory, and purchase memory for the user.
    pub fn remove(&self, user_id: &UserId) -> bool {
        self.entries.remove(user_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
