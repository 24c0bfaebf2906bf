//! Batch-computed usual baskets and reorder cycles, cached per user.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info};

use crate::domain::insight::InsightSnapshot;
use crate::domain::UserId;
use crate::generations::UserGenerations;
use crate::history::OrderHistoryStore;
use crate::reorder::ReorderIntelligence;
use crate::settings::SettingsHandle;
use crate::usual::UsualOrderAnalyzer;

/// Latest snapshot per user. A recompute swaps in a whole new snapshot.
#[derive(Default)]
pub struct InsightCache {
    snapshots: DashMap<UserId, Arc<InsightSnapshot>>,
}

impl InsightCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &UserId) -> Option<Arc<InsightSnapshot>> {
        self.snapshots.get(user_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Stores `snapshot` unless the cached one was built from newer history, or from the same
    /// history at a later instant.
    pub fn publish(&self, user_id: &UserId, snapshot: Arc<InsightSnapshot>) -> Arc<InsightSnapshot> {
        let mut entry = self.snapshots.entry(user_id.clone()).or_insert_with(|| Arc::clone(&snapshot));
        let newer = (snapshot.history_version, snapshot.computed_at)
            >= (entry.history_version, entry.computed_at);
        if newer {
            *entry = Arc::clone(&snapshot);
        }
        Arc::clone(entry.value())
    }

    pub fn remove(&self, user_id: &UserId) -> bool {
        self.snapshots.remove(user_id).is_some()
    }

    pub fn clear(&self) {
        self.snapshots.clear();
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// Everything a recompute needs, cheap to clone into a background task.
#[derive(Clone)]
pub struct InsightComputer {
    history: Arc<OrderHistoryStore>,
    cache: Arc<InsightCache>,
    settings: Arc<SettingsHandle>,
    generations: Arc<UserGenerations>,
    in_flight: Arc<DashMap<UserId, ()>>,
    landed: Arc<Notify>,
}

/// Clears the user's in-flight marker even if the recompute panics.
struct InFlight {
    in_flight: Arc<DashMap<UserId, ()>>,
    landed: Arc<Notify>,
    user_id: UserId,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.in_flight.remove(&self.user_id);
        self.landed.notify_waiters();
    }
}

impl InsightComputer {
    pub fn new(
        history: Arc<OrderHistoryStore>,
        cache: Arc<InsightCache>,
        settings: Arc<SettingsHandle>,
        generations: Arc<UserGenerations>,
    ) -> Self {
        Self {
            history,
            cache,
            settings,
            generations,
            in_flight: Arc::new(DashMap::new()),
            landed: Arc::new(Notify::new()),
        }
    }

    /// The cached snapshot when it matches what a recompute at `now` would produce.
    pub fn fresh_at(&self, user_id: &UserId, now: DateTime<Utc>) -> Option<Arc<InsightSnapshot>> {
        let version = self.history.version(user_id);
        self.cache.get(user_id).filter(|snapshot| snapshot.is_fresh_at(version, now))
    }

    pub fn stale(&self, user_id: &UserId) -> Option<Arc<InsightSnapshot>> {
        self.cache.get(user_id)
    }

    pub fn has_history(&self, user_id: &UserId) -> bool {
        !self.history.history(user_id).is_empty()
    }

    /// Recomputes inline and publishes. Returns the snapshot for `now` even when the cache keeps
    /// a later one.
    pub fn recompute(&self, user_id: &UserId, now: DateTime<Utc>) -> Arc<InsightSnapshot> {
        let observed = self.generations.current(user_id);
        let snapshot = self.compute(user_id, now);
        self.commit(user_id, observed, snapshot)
    }

    /// Builds a snapshot from the current history without publishing it.
    pub fn compute(&self, user_id: &UserId, now: DateTime<Utc>) -> Arc<InsightSnapshot> {
        let settings = self.settings.current();
        let history = self.history.history(user_id);

        let analyzer =
            UsualOrderAnalyzer::new(settings.usual.clone(), settings.reorder.outlier_multiplier);
        let usual = analyzer.analyze(&history, now);
        let fresh_through = analyzer.window_stable_through(history.records(), now);
        let cycles = ReorderIntelligence::new(settings.reorder.clone()).estimate_all(&history, now);

        let snapshot = Arc::new(InsightSnapshot {
            usual,
            cycles,
            computed_at: now,
            history_version: history.version(),
            fresh_through,
        });
        info!(
            event_name = "engine.insights.recomputed",
            user_id = %user_id,
            history_version = snapshot.history_version,
            usual_items = snapshot.usual.len(),
            cycles = snapshot.cycles.len(),
            "insight snapshot recomputed"
        );
        snapshot
    }

    /// Publishes `snapshot` unless the user was deleted after `observed` was read, in which case
    /// nothing is cached and an empty snapshot is returned.
    pub fn commit(
        &self,
        user_id: &UserId,
        observed: u64,
        snapshot: Arc<InsightSnapshot>,
    ) -> Arc<InsightSnapshot> {
        let published = self.generations.commit_if_current(user_id, observed, || {
            self.cache.publish(user_id, Arc::clone(&snapshot))
        });
        if published.is_some() {
            return snapshot;
        }
        debug!(
            event_name = "engine.insights.discarded",
            user_id = %user_id,
            "user was deleted during recompute, snapshot discarded"
        );
        Arc::new(InsightSnapshot::empty(snapshot.computed_at))
    }

    /// Starts a background recompute unless one is already running for the user.
    pub fn spawn_recompute(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Option<JoinHandle<Arc<InsightSnapshot>>> {
        if self.in_flight.insert(user_id.clone(), ()).is_some() {
            return None;
        }
        let guard = InFlight {
            in_flight: Arc::clone(&self.in_flight),
            landed: Arc::clone(&self.landed),
            user_id: user_id.clone(),
        };
        let computer = self.clone();
        let user = user_id.clone();
        Some(tokio::task::spawn_blocking(move || {
            let _guard = guard;
            computer.recompute(&user, now)
        }))
    }

    /// Waits until a snapshot fresh at `now` exists, starting a recompute when none is running.
    /// Callers bound this with a timeout; a spawned recompute outlives the wait.
    pub async fn await_fresh(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Arc<InsightSnapshot>, JoinError> {
        loop {
            let landed = self.landed.notified();
            tokio::pin!(landed);
            landed.as_mut().enable();

            if let Some(snapshot) = self.fresh_at(user_id, now) {
                return Ok(snapshot);
            }
            match self.spawn_recompute(user_id, now) {
                Some(task) => return task.await,
                None => landed.await,
            }
        }
    }

    pub fn users(&self) -> Vec<UserId> {
        self.history.users()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::{InsightCache, InsightComputer};
    use crate::domain::insight::InsightSnapshot;
    use crate::domain::purchase::PurchaseRecord;
    use crate::domain::UserId;
    use crate::generations::UserGenerations;
    use crate::history::OrderHistoryStore;
    use crate::settings::{EngineSettings, SettingsHandle};

    struct Fixture {
        computer: InsightComputer,
        history: Arc<OrderHistoryStore>,
        cache: Arc<InsightCache>,
        generations: Arc<UserGenerations>,
    }

    fn fixture() -> Fixture {
        let history = Arc::new(OrderHistoryStore::new());
        let cache = Arc::new(InsightCache::new());
        let generations = Arc::new(UserGenerations::new());
        let computer = InsightComputer::new(
            history.clone(),
            cache.clone(),
            Arc::new(SettingsHandle::new(EngineSettings::default())),
            generations.clone(),
        );
        Fixture { computer, history, cache, generations }
    }

    fn day(offset: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 8, 0, 0).single().expect("timestamp") + Duration::days(offset)
    }

    fn fortnightly(user: &str) -> Vec<PurchaseRecord> {
        (0..3)
            .map(|index| PurchaseRecord::new(user, "sku-1", 1, day(index * 14), format!("o{index}")))
            .collect()
    }

    #[test]
    fn snapshot_goes_stale_when_history_moves() {
        let fixture = fixture();
        let user = UserId::new("u1");

        let first = fixture.computer.recompute(&user, day(0));
        assert_eq!(first.history_version, 0);
        assert!(fixture.computer.fresh_at(&user, day(0)).is_some());

        fixture.history.record(vec![PurchaseRecord::new("u1", "sku-1", 1, day(-3), "o1")]);

        assert!(fixture.computer.fresh_at(&user, day(0)).is_none());
        assert!(fixture.computer.stale(&user).is_some());
        assert_eq!(fixture.computer.recompute(&user, day(0)).history_version, 1);
    }

    #[test]
    fn snapshot_goes_stale_once_purchases_age_out_of_the_window() {
        let fixture = fixture();
        let user = UserId::new("u1");
        fixture.history.record(fortnightly("u1"));

        let early = fixture.computer.recompute(&user, day(30));
        assert_eq!(early.usual.len(), 1);
        assert!(fixture.computer.fresh_at(&user, day(100)).is_some());
        assert!(fixture.computer.fresh_at(&user, day(400)).is_none());
        assert!(fixture.computer.fresh_at(&user, day(29)).is_none(), "earlier reads recompute");

        let late = fixture.computer.recompute(&user, day(400));
        assert!(late.usual.is_empty());
    }

    #[test]
    fn older_snapshot_never_replaces_newer_one() {
        let cache = InsightCache::new();
        let user = UserId::new("u1");
        let now = Utc::now();
        let newer = Arc::new(InsightSnapshot { history_version: 4, ..InsightSnapshot::empty(now) });
        let older = Arc::new(InsightSnapshot { history_version: 2, ..InsightSnapshot::empty(now) });

        cache.publish(&user, newer);
        let kept = cache.publish(&user, older);

        assert_eq!(kept.history_version, 4);
    }

    #[test]
    fn recompute_finishing_after_deletion_is_not_cached() {
        let fixture = fixture();
        let user = UserId::new("u1");
        fixture.history.record(fortnightly("u1"));

        let observed = fixture.generations.current(&user);
        let computed = fixture.computer.compute(&user, day(30));
        assert_eq!(computed.usual.len(), 1);

        fixture.generations.advance(&user);
        fixture.history.remove(&user);
        fixture.cache.remove(&user);
        let returned = fixture.computer.commit(&user, observed, computed);

        assert!(returned.usual.is_empty());
        assert!(fixture.cache.get(&user).is_none());
    }

    #[tokio::test]
    async fn only_one_background_recompute_runs_per_user() {
        let fixture = fixture();
        let user = UserId::new("u1");
        fixture.history.record(fortnightly("u1"));

        let first = fixture.computer.spawn_recompute(&user, day(30)).expect("first spawn");
        let second = fixture.computer.spawn_recompute(&user, day(30));
        assert!(second.is_none());

        first.await.expect("recompute task");
        let waited = fixture.computer.await_fresh(&user, day(30)).await.expect("fresh");
        assert_eq!(waited.usual.len(), 1);
        assert!(fixture.computer.spawn_recompute(&user, day(31)).is_some());
    }
}
