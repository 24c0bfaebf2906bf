//! Facade wiring the personalization components behind one entry point.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::analytics::AnalyticsDispatcher;
use crate::config::ConfigError;
use crate::domain::candidate::{ProductCandidate, RankingOutcome};
use crate::domain::event::InteractionEvent;
use crate::domain::flags::{FlagsPatch, PreferenceFlags};
use crate::domain::insight::{InsightSnapshot, ReorderBundle, ReorderCycle, UsualBasketItem};
use crate::domain::purchase::PurchaseRecord;
use crate::domain::status::{Assessed, AssessmentStatus};
use crate::domain::UserId;
use crate::errors::{ApplicationError, DomainError};
use crate::flags::{PreferenceFlagsRepository, PreferenceService, PurgeError, UserDataPurger};
use crate::history::{OrderHistoryStore, PurchaseHistorySource};
use crate::insights::{InsightCache, InsightComputer};
use crate::preferences::PreferenceStore;
use crate::ranking::{PersonalizedRanker, RankingSignals, UserSegment};
use crate::reorder::ReorderIntelligence;
use crate::settings::{EngineSettings, SettingsHandle};
use crate::signals::{SignalIngestor, SignalReceipt};

pub struct EngineDependencies {
    pub flags_repository: Arc<dyn PreferenceFlagsRepository>,
    pub history_source: Option<Arc<dyn PurchaseHistorySource>>,
    pub analytics: Option<AnalyticsDispatcher>,
    /// Additional stores that hold per-user data outside the engine.
    pub purgers: Vec<Arc<dyn UserDataPurger>>,
}

pub struct PersonalizationEngine {
    settings: Arc<SettingsHandle>,
    preferences: Arc<PreferenceStore>,
    history: Arc<OrderHistoryStore>,
    insights: Arc<InsightCache>,
    computer: InsightComputer,
    flags: Arc<PreferenceService>,
    ingestor: SignalIngestor,
    history_source: Option<Arc<dyn PurchaseHistorySource>>,
    purgers: Vec<Arc<dyn UserDataPurger>>,
    read_deadline: Duration,
}

const DEFAULT_READ_DEADLINE: Duration = Duration::from_millis(50);

impl PersonalizationEngine {
    pub fn new(settings: EngineSettings, dependencies: EngineDependencies) -> Result<Self, ConfigError> {
        settings.validate()?;
        let settings = Arc::new(SettingsHandle::new(settings));
        let preferences = Arc::new(PreferenceStore::new());
        let history = Arc::new(OrderHistoryStore::new());
        let insights = Arc::new(InsightCache::new());
        let flags = Arc::new(PreferenceService::new(dependencies.flags_repository));
        let ingestor = SignalIngestor::new(
            Arc::clone(&preferences),
            Arc::clone(&flags),
            dependencies.analytics.clone(),
            Arc::clone(&settings),
        );
        let computer = InsightComputer::new(
            Arc::clone(&history),
            Arc::clone(&insights),
            Arc::clone(&settings),
            flags.generations(),
        );

        let mut purgers: Vec<Arc<dyn UserDataPurger>> = vec![
            Arc::clone(&preferences) as Arc<dyn UserDataPurger>,
            Arc::clone(&history) as Arc<dyn UserDataPurger>,
            Arc::clone(&insights) as Arc<dyn UserDataPurger>,
        ];
        if let Some(dispatcher) = dependencies.analytics {
            purgers.push(Arc::new(dispatcher));
        }
        purgers.extend(dependencies.purgers);

        Ok(Self {
            settings,
            preferences,
            history,
            insights,
            computer,
            flags,
            ingestor,
            history_source: dependencies.history_source,
            purgers,
            read_deadline: DEFAULT_READ_DEADLINE,
        })
    }

    /// How long the usual basket and reorder reads wait for a recompute before serving the
    /// previous snapshot.
    pub fn with_read_deadline(mut self, deadline: Duration) -> Self {
        self.read_deadline = deadline;
        self
    }

    pub fn settings(&self) -> Arc<EngineSettings> {
        self.settings.current()
    }

    /// Swaps tunables for subsequent requests. Cached insights are dropped so they rebuild
    /// under the new settings.
    pub fn reload_settings(&self, settings: EngineSettings) -> Result<(), ConfigError> {
        self.settings.replace(settings)?;
        self.insights.clear();
        info!(event_name = "engine.settings.reloaded", "engine settings reloaded");
        Ok(())
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.preferences
    }

    pub fn history(&self) -> &OrderHistoryStore {
        &self.history
    }

    pub fn insights(&self) -> &InsightCache {
        &self.insights
    }

    pub async fn apply_signal(&self, event: &InteractionEvent) -> Result<SignalReceipt, DomainError> {
        self.ingestor.apply_signal(event).await
    }

    pub async fn rerank(
        &self,
        user_id: &UserId,
        candidates: &[ProductCandidate],
        segment: Option<UserSegment>,
        now: DateTime<Utc>,
    ) -> Result<RankingOutcome, DomainError> {
        let settings = self.settings.current();
        let flags = self.flags.get_flags(user_id).await;
        let profile = self.preferences.decayed_snapshot(user_id, now, &settings.signals);
        let insights = match self.current_snapshot(user_id, now) {
            Some(snapshot) => Assessed::ok(snapshot),
            None => {
                // Ranking never waits on a recompute; it lands for the next request.
                drop(self.computer.spawn_recompute(user_id, now));
                self.stale_or_empty(user_id, now)
            }
        };
        let insights_stale = insights.is_degraded();
        let snapshot = insights.value;

        let reorder = ReorderIntelligence::new(settings.reorder.clone());
        let signals = RankingSignals {
            usual_confidence: snapshot
                .usual
                .iter()
                .map(|item| (item.sku.clone(), item.confidence))
                .collect(),
            reorder_urgency: reorder
                .due_reorders(&snapshot.cycles, now)
                .into_iter()
                .map(|cycle| (cycle.sku, cycle.urgency))
                .collect(),
        };

        let segment = UserSegment::resolve(
            segment,
            profile.as_ref(),
            signals.usual_count(),
            settings.ranking.repeat_shopper_min_usual,
        );
        let mut outcome = PersonalizedRanker::new(settings.ranking.clone()).rerank(
            candidates,
            profile.as_ref(),
            segment,
            &signals,
            &flags.value,
        )?;
        if flags.is_degraded() || insights_stale {
            outcome.status = AssessmentStatus::Degraded;
        }
        Ok(outcome)
    }

    /// Waits at most the engine's read deadline. See [`Self::usual_basket_within`].
    pub async fn usual_basket(&self, user_id: &UserId, now: DateTime<Utc>) -> Assessed<Vec<UsualBasketItem>> {
        self.usual_basket_within(user_id, now, self.read_deadline).await
    }

    pub async fn due_reorders(&self, user_id: &UserId, now: DateTime<Utc>) -> Assessed<Vec<ReorderCycle>> {
        self.due_reorders_within(user_id, now, self.read_deadline).await
    }

    pub async fn reorder_bundles(&self, user_id: &UserId, now: DateTime<Utc>) -> Assessed<Vec<ReorderBundle>> {
        self.reorder_bundles_within(user_id, now, self.read_deadline).await
    }

    /// Waits at most `deadline` for a recompute when the cached snapshot is no longer valid at
    /// `now`. A late recompute keeps running and lands in the cache; the caller gets the previous
    /// snapshot or an empty basket, marked degraded.
    pub async fn usual_basket_within(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
        deadline: Duration,
    ) -> Assessed<Vec<UsualBasketItem>> {
        let flags = self.flags.get_flags(user_id).await;
        if !flags.value.usual_orders_enabled {
            return Assessed::ok(Vec::new());
        }
        let assessed = self.snapshot_within(user_id, now, deadline).await;
        let stale = assessed.is_degraded();
        let snapshot = assessed.value;
        let status = if stale { AssessmentStatus::Degraded } else { usual_status(&snapshot) };
        with_flags_status(status, flags.is_degraded(), snapshot.usual.clone())
    }

    pub async fn due_reorders_within(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
        deadline: Duration,
    ) -> Assessed<Vec<ReorderCycle>> {
        let flags = self.flags.get_flags(user_id).await;
        if !flags.value.reorder_reminders_enabled {
            return Assessed::ok(Vec::new());
        }
        let assessed = self.snapshot_within(user_id, now, deadline).await;
        let stale = assessed.is_degraded();
        let snapshot = assessed.value;
        let due = ReorderIntelligence::new(self.settings.current().reorder.clone())
            .due_reorders(&snapshot.cycles, now);
        let status = if stale { AssessmentStatus::Degraded } else { cycles_status(&snapshot) };
        with_flags_status(status, flags.is_degraded(), due)
    }

    pub async fn reorder_bundles_within(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
        deadline: Duration,
    ) -> Assessed<Vec<ReorderBundle>> {
        let flags = self.flags.get_flags(user_id).await;
        if !flags.value.reorder_reminders_enabled {
            return Assessed::ok(Vec::new());
        }
        let assessed = self.snapshot_within(user_id, now, deadline).await;
        let stale = assessed.is_degraded();
        let snapshot = assessed.value;
        let bundles = ReorderIntelligence::new(self.settings.current().reorder.clone())
            .bundles(&snapshot.cycles, now);
        let status = if stale { AssessmentStatus::Degraded } else { cycles_status(&snapshot) };
        with_flags_status(status, flags.is_degraded(), bundles)
    }

    /// A snapshot valid at `now` without computing anything. Users with no history get an empty one.
    fn current_snapshot(&self, user_id: &UserId, now: DateTime<Utc>) -> Option<Arc<InsightSnapshot>> {
        self.computer.fresh_at(user_id, now).or_else(|| {
            (!self.computer.has_history(user_id)).then(|| Arc::new(InsightSnapshot::empty(now)))
        })
    }

    async fn snapshot_within(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
        deadline: Duration,
    ) -> Assessed<Arc<InsightSnapshot>> {
        if let Some(snapshot) = self.current_snapshot(user_id, now) {
            return Assessed::ok(snapshot);
        }

        match tokio::time::timeout(deadline, self.computer.await_fresh(user_id, now)).await {
            Ok(Ok(snapshot)) => Assessed::ok(snapshot),
            Ok(Err(join_error)) => {
                warn!(
                    event_name = "engine.insights.recompute_failed",
                    user_id = %user_id,
                    error = %join_error,
                    "insight recompute task failed"
                );
                self.stale_or_empty(user_id, now)
            }
            Err(_) => {
                warn!(
                    event_name = "engine.insights.deadline_exceeded",
                    user_id = %user_id,
                    deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                    "insight recompute missed deadline, serving fallback"
                );
                self.stale_or_empty(user_id, now)
            }
        }
    }

    fn stale_or_empty(&self, user_id: &UserId, now: DateTime<Utc>) -> Assessed<Arc<InsightSnapshot>> {
        Assessed::degraded(
            self.computer.stale(user_id).unwrap_or_else(|| Arc::new(InsightSnapshot::empty(now))),
        )
    }

    /// Ingests order lines pushed by the order system. Returns how many users' histories changed.
    pub fn record_purchases(&self, records: Vec<PurchaseRecord>) -> Result<usize, DomainError> {
        for record in &records {
            record.validate()?;
        }
        Ok(self.history.record(records))
    }

    /// Pulls the user's history from the external source in the background. A fetch that
    /// straddles [`Self::delete_user`] is discarded.
    pub fn refresh_history(&self, user_id: &UserId) -> Option<JoinHandle<()>> {
        let source = self.history_source.clone()?;
        let history = Arc::clone(&self.history);
        let generations = self.flags.generations();
        let observed = generations.current(user_id);
        let user = user_id.clone();
        Some(tokio::spawn(async move {
            match source.fetch_purchases(&user).await {
                Ok(records) => {
                    let (valid, invalid): (Vec<_>, Vec<_>) = records
                        .into_iter()
                        .partition(|record| record.validate().is_ok() && record.user_id == user);
                    if !invalid.is_empty() {
                        warn!(
                            event_name = "engine.history.invalid_records",
                            user_id = %user,
                            skipped = invalid.len(),
                            "skipped malformed purchase records"
                        );
                    }
                    if generations.commit_if_current(&user, observed, || history.record(valid)).is_none() {
                        debug!(
                            event_name = "engine.history.discarded",
                            user_id = %user,
                            "user was deleted during history refresh"
                        );
                    }
                }
                Err(error) => warn!(
                    event_name = "engine.history.refresh_failed",
                    user_id = %user,
                    error = %error,
                    "order history refresh failed"
                ),
            }
        }))
    }

    pub fn recompute_user(&self, user_id: &UserId, now: DateTime<Utc>) -> Arc<InsightSnapshot> {
        self.computer.recompute(user_id, now)
    }

    /// Recomputes every user with known history whose snapshot is missing or no longer valid at
    /// `now`.
    pub fn recompute_all(&self, now: DateTime<Utc>) -> usize {
        let mut recomputed = 0;
        for user_id in self.computer.users() {
            if self.computer.fresh_at(&user_id, now).is_none() {
                self.computer.recompute(&user_id, now);
                recomputed += 1;
            }
        }
        info!(event_name = "engine.insights.batch_completed", recomputed, "batch recompute finished");
        recomputed
    }

    pub async fn get_flags(&self, user_id: &UserId) -> Assessed<Arc<PreferenceFlags>> {
        self.flags.get_flags(user_id).await
    }

    pub async fn set_flags(
        &self,
        user_id: &UserId,
        flags: PreferenceFlags,
    ) -> Result<Arc<PreferenceFlags>, ApplicationError> {
        self.flags.set_flags(user_id, flags).await
    }

    pub async fn update_flags(
        &self,
        user_id: &UserId,
        patch: FlagsPatch,
    ) -> Result<Arc<PreferenceFlags>, ApplicationError> {
        self.flags.update_flags(user_id, patch).await
    }

    /// Forgets everything the engine and its registered stores hold about the user.
    pub async fn delete_user(&self, user_id: &UserId) -> Result<(), ApplicationError> {
        self.flags.delete_user(user_id, &self.purgers).await
    }
}

fn usual_status(snapshot: &InsightSnapshot) -> AssessmentStatus {
    if snapshot.usual.is_empty() {
        AssessmentStatus::InsufficientData
    } else {
        AssessmentStatus::Ok
    }
}

fn cycles_status(snapshot: &InsightSnapshot) -> AssessmentStatus {
    if snapshot.cycles.iter().any(|cycle| cycle.next_due.is_some()) {
        AssessmentStatus::Ok
    } else {
        AssessmentStatus::InsufficientData
    }
}

fn with_flags_status<T>(status: AssessmentStatus, flags_degraded: bool, value: T) -> Assessed<T> {
    let status = if flags_degraded { AssessmentStatus::Degraded } else { status };
    Assessed { value, status }
}

#[async_trait]
impl UserDataPurger for PreferenceStore {
    fn store_name(&self) -> &'static str {
        "preference_profiles"
    }

    async fn purge_user(&self, user_id: &UserId) -> Result<(), PurgeError> {
        self.remove(user_id);
        Ok(())
    }
}

#[async_trait]
impl UserDataPurger for OrderHistoryStore {
    fn store_name(&self) -> &'static str {
        "order_history"
    }

    async fn purge_user(&self, user_id: &UserId) -> Result<(), PurgeError> {
        self.remove(user_id);
        Ok(())
    }
}

#[async_trait]
impl UserDataPurger for InsightCache {
    fn store_name(&self) -> &'static str {
        "insight_snapshots"
    }

    async fn purge_user(&self, user_id: &UserId) -> Result<(), PurgeError> {
        self.remove(user_id);
        Ok(())
    }
}

#[async_trait]
impl UserDataPurger for AnalyticsDispatcher {
    fn store_name(&self) -> &'static str {
        "analytics_queue"
    }

    async fn purge_user(&self, user_id: &UserId) -> Result<(), PurgeError> {
        self.discard_user_events(user_id.as_str());
        Ok(())
    }
}
