//! Turns interaction events into preference updates and analytics records.

use std::sync::Arc;

use tracing::debug;

use crate::analytics::{AnalyticsDispatcher, AnalyticsEvent, EnqueueOutcome};
use crate::domain::event::InteractionEvent;
use crate::domain::profile::UserPreferenceProfile;
use crate::errors::DomainError;
use crate::flags::PreferenceService;
use crate::preferences::PreferenceStore;
use crate::settings::SettingsHandle;

#[derive(Clone, Debug)]
pub struct SignalReceipt {
    pub profile: Arc<UserPreferenceProfile>,
    /// `false` for duplicates and for users who turned smart ranking off.
    pub applied: bool,
    pub forwarded: bool,
}

pub struct SignalIngestor {
    store: Arc<PreferenceStore>,
    flags: Arc<PreferenceService>,
    analytics: Option<AnalyticsDispatcher>,
    settings: Arc<SettingsHandle>,
}

impl SignalIngestor {
    pub fn new(
        store: Arc<PreferenceStore>,
        flags: Arc<PreferenceService>,
        analytics: Option<AnalyticsDispatcher>,
        settings: Arc<SettingsHandle>,
    ) -> Self {
        Self { store, flags, analytics, settings }
    }

    /// Validates, learns from, and forwards one event. Invalid events leave every store untouched,
    /// and so do events that race a deletion of their user.
    pub async fn apply_signal(&self, event: &InteractionEvent) -> Result<SignalReceipt, DomainError> {
        event.validate()?;

        let settings = self.settings.current();
        let generations = self.flags.generations();
        let observed = generations.current(&event.user_id);
        let flags = self.flags.get_flags(&event.user_id).await.value;

        let committed = generations.commit_if_current(&event.user_id, observed, || {
            if flags.smart_ranking_enabled {
                let application = self.store.apply(event, &settings.signals);
                (application.profile, application.applied, !application.applied, application.weight)
            } else {
                let fresh = self.store.remember_only(event, settings.signals.dedup_window);
                let weight =
                    if fresh { settings.signals.weights.weight_for(event.event_type, false) } else { 0.0 };
                (self.empty_profile(event), false, !fresh, weight)
            }
        });
        let Some((profile, applied, duplicate, weight)) = committed else {
            debug!(
                event_name = "engine.signal.discarded",
                user_id = %event.user_id,
                event_id = %event.event_id.0,
                "user was deleted while the signal was in flight"
            );
            return Ok(SignalReceipt { profile: self.empty_profile(event), applied: false, forwarded: false });
        };

        let forwarded = match (&self.analytics, flags.analytics_enabled && !duplicate) {
            (Some(dispatcher), true) => {
                let outcome = dispatcher.enqueue(AnalyticsEvent::from_interaction(event, weight));
                !matches!(outcome, EnqueueOutcome::Closed)
            }
            _ => false,
        };

        debug!(
            event_name = "engine.signal.applied",
            user_id = %event.user_id,
            event_id = %event.event_id.0,
            event_type = event.event_type.as_str(),
            applied,
            forwarded,
            weight,
            "interaction signal processed"
        );

        Ok(SignalReceipt { profile, applied, forwarded })
    }

    fn empty_profile(&self, event: &InteractionEvent) -> Arc<UserPreferenceProfile> {
        self.store.snapshot(&event.user_id).unwrap_or_else(|| {
            Arc::new(UserPreferenceProfile::empty(event.user_id.clone(), event.timestamp))
        })
    }
}
