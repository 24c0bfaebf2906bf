//! Per-user feature switches with a read-through cache, plus user data deletion.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::flags::{FlagsPatch, PreferenceFlags};
use crate::domain::status::Assessed;
use crate::domain::UserId;
use crate::errors::ApplicationError;
use crate::generations::UserGenerations;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlagsRepositoryError {
    #[error("preference flags storage unavailable: {0}")]
    Unavailable(String),
    #[error("preference flags record is malformed: {0}")]
    Decode(String),
}

#[async_trait]
pub trait PreferenceFlagsRepository: Send + Sync {
    async fn find(&self, user_id: &UserId) -> Result<Option<PreferenceFlags>, FlagsRepositoryError>;
    async fn save(&self, flags: PreferenceFlags) -> Result<(), FlagsRepositoryError>;
    /// Returns whether a stored record existed.
    async fn delete(&self, user_id: &UserId) -> Result<bool, FlagsRepositoryError>;
}

#[derive(Clone, Default)]
pub struct InMemoryPreferenceFlagsRepository {
    flags: Arc<RwLock<HashMap<UserId, PreferenceFlags>>>,
}

#[async_trait]
impl PreferenceFlagsRepository for InMemoryPreferenceFlagsRepository {
    async fn find(&self, user_id: &UserId) -> Result<Option<PreferenceFlags>, FlagsRepositoryError> {
        Ok(self.flags.read().await.get(user_id).cloned())
    }

    async fn save(&self, flags: PreferenceFlags) -> Result<(), FlagsRepositoryError> {
        self.flags.write().await.insert(flags.user_id.clone(), flags);
        Ok(())
    }

    async fn delete(&self, user_id: &UserId) -> Result<bool, FlagsRepositoryError> {
        Ok(self.flags.write().await.remove(user_id).is_some())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("failed to purge `{store}` for user: {reason}")]
pub struct PurgeError {
    pub store: &'static str,
    pub reason: String,
}

/// Anything that keeps per-user state and must forget it on deletion.
#[async_trait]
pub trait UserDataPurger: Send + Sync {
    fn store_name(&self) -> &'static str;
    async fn purge_user(&self, user_id: &UserId) -> Result<(), PurgeError>;
}

pub struct PreferenceService {
    repository: Arc<dyn PreferenceFlagsRepository>,
    cache: DashMap<UserId, Arc<PreferenceFlags>>,
    generations: Arc<UserGenerations>,
}

impl PreferenceService {
    pub fn new(repository: Arc<dyn PreferenceFlagsRepository>) -> Self {
        Self { repository, cache: DashMap::new(), generations: Arc::new(UserGenerations::new()) }
    }

    /// Deletion generations shared with every component that writes per-user state late.
    pub fn generations(&self) -> Arc<UserGenerations> {
        Arc::clone(&self.generations)
    }

    /// Stored flags, or all-on defaults. A storage failure yields defaults marked degraded.
    pub async fn get_flags(&self, user_id: &UserId) -> Assessed<Arc<PreferenceFlags>> {
        if let Some(cached) = self.cache.get(user_id) {
            return Assessed::ok(Arc::clone(cached.value()));
        }

        let observed = self.generations.current(user_id);
        match self.repository.find(user_id).await {
            Ok(found) => {
                let flags = Arc::new(
                    found.unwrap_or_else(|| PreferenceFlags::defaults_for(user_id.clone())),
                );
                self.generations.commit_if_current(user_id, observed, || {
                    self.cache.insert(user_id.clone(), Arc::clone(&flags))
                });
                Assessed::ok(flags)
            }
            Err(error) => {
                warn!(
                    event_name = "engine.flags.fallback",
                    user_id = %user_id,
                    error = %error,
                    "preference flags unavailable, serving defaults"
                );
                Assessed::degraded(Arc::new(PreferenceFlags::defaults_for(user_id.clone())))
            }
        }
    }

    pub async fn set_flags(
        &self,
        user_id: &UserId,
        mut flags: PreferenceFlags,
    ) -> Result<Arc<PreferenceFlags>, ApplicationError> {
        flags.user_id = user_id.clone();
        flags.updated_at = Utc::now();
        let observed = self.generations.current(user_id);
        self.repository
            .save(flags.clone())
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;

        let flags = Arc::new(flags);
        self.generations.commit_if_current(user_id, observed, || {
            self.cache.insert(user_id.clone(), Arc::clone(&flags))
        });
        info!(event_name = "engine.flags.updated", user_id = %user_id, "preference flags saved");
        Ok(flags)
    }

    /// Applies a partial change on top of the current flags.
    pub async fn update_flags(
        &self,
        user_id: &UserId,
        patch: FlagsPatch,
    ) -> Result<Arc<PreferenceFlags>, ApplicationError> {
        let mut next = self
            .repository
            .find(user_id)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?
            .unwrap_or_else(|| PreferenceFlags::defaults_for(user_id.clone()));
        next.apply(patch);
        self.set_flags(user_id, next).await
    }

    /// Removes stored and cached flags, then runs every purger. The first failure is returned.
    /// Writes that read user data before this call started are fenced out.
    pub async fn delete_user(
        &self,
        user_id: &UserId,
        purgers: &[Arc<dyn UserDataPurger>],
    ) -> Result<(), ApplicationError> {
        self.generations.advance(user_id);
        self.repository
            .delete(user_id)
            .await
            .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
        self.cache.remove(user_id);

        for purger in purgers {
            purger.purge_user(user_id).await.map_err(|error| {
                warn!(
                    event_name = "engine.user.delete_failed",
                    user_id = %user_id,
                    store = purger.store_name(),
                    error = %error,
                    "user data purge failed"
                );
                ApplicationError::Persistence(error.to_string())
            })?;
        }

        info!(
            event_name = "engine.user.deleted",
            user_id = %user_id,
            stores = purgers.len(),
            "user data deleted"
        );
        Ok(())
    }

    pub fn invalidate(&self, user_id: &UserId) {
        self.cache.remove(user_id);
    }

    pub fn is_cached(&self, user_id: &UserId) -> bool {
        self.cache.contains_key(user_id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::{
        FlagsRepositoryError, InMemoryPreferenceFlagsRepository, PreferenceFlagsRepository,
        PreferenceService, PurgeError, UserDataPurger,
    };
    use crate::domain::flags::{FeatureFlag, FlagsPatch, PreferenceFlags};
    use crate::domain::status::AssessmentStatus;
    use crate::domain::UserId;
    use crate::errors::ApplicationError;

    struct UnavailableRepository;

    #[async_trait]
    impl PreferenceFlagsRepository for UnavailableRepository {
        async fn find(&self, _user_id: &UserId) -> Result<Option<PreferenceFlags>, FlagsRepositoryError> {
            Err(FlagsRepositoryError::Unavailable("connection refused".to_string()))
        }

        async fn save(&self, _flags: PreferenceFlags) -> Result<(), FlagsRepositoryError> {
            Err(FlagsRepositoryError::Unavailable("connection refused".to_string()))
        }

        async fn delete(&self, _user_id: &UserId) -> Result<bool, FlagsRepositoryError> {
            Err(FlagsRepositoryError::Unavailable("connection refused".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingPurger {
        called: AtomicBool,
        fail: bool,
    }

    #[async_trait]
    impl UserDataPurger for RecordingPurger {
        fn store_name(&self) -> &'static str {
            "recording"
        }

        async fn purge_user(&self, _user_id: &UserId) -> Result<(), PurgeError> {
            self.called.store(true, Ordering::SeqCst);
            if self.fail {
                return Err(PurgeError { store: "recording", reason: "disk full".to_string() });
            }
            Ok(())
        }
    }

    /// Holds every `find` until released, so a read can straddle a deletion.
    #[derive(Default)]
    struct GatedRepository {
        inner: InMemoryPreferenceFlagsRepository,
        gate: tokio::sync::Notify,
        entered: tokio::sync::Notify,
    }

    #[async_trait]
    impl PreferenceFlagsRepository for GatedRepository {
        async fn find(&self, user_id: &UserId) -> Result<Option<PreferenceFlags>, FlagsRepositoryError> {
            let found = self.inner.find(user_id).await;
            self.entered.notify_one();
            self.gate.notified().await;
            found
        }

        async fn save(&self, flags: PreferenceFlags) -> Result<(), FlagsRepositoryError> {
            self.inner.save(flags).await
        }

        async fn delete(&self, user_id: &UserId) -> Result<bool, FlagsRepositoryError> {
            self.inner.delete(user_id).await
        }
    }

    fn service() -> PreferenceService {
        PreferenceService::new(Arc::new(InMemoryPreferenceFlagsRepository::default()))
    }

    #[tokio::test]
    async fn unknown_user_gets_all_features_enabled() {
        let flags = service().get_flags(&UserId::new("u1")).await;

        assert_eq!(flags.status, AssessmentStatus::Ok);
        assert!(flags.value.smart_ranking_enabled);
        assert!(flags.value.dietary_filters_enabled);
    }

    #[tokio::test]
    async fn storage_failure_serves_degraded_defaults() {
        let service = PreferenceService::new(Arc::new(UnavailableRepository));
        let user = UserId::new("u1");

        let flags = service.get_flags(&user).await;

        assert!(flags.is_degraded());
        assert!(flags.value.usual_orders_enabled);
        assert!(!service.is_cached(&user), "fallback values must not be cached");
    }

    #[tokio::test]
    async fn set_flags_writes_through_to_cache() {
        let service = service();
        let user = UserId::new("u1");
        let mut flags = PreferenceFlags::defaults_for(user.clone());
        flags.smart_ranking_enabled = false;

        service.set_flags(&user, flags).await.expect("set flags");
        let read = service.get_flags(&user).await;

        assert!(!read.value.smart_ranking_enabled);
        assert!(service.is_cached(&user));
    }

    #[tokio::test]
    async fn update_flags_opts_out_of_a_single_feature() {
        let service = service();
        let user = UserId::new("u1");

        service
            .update_flags(&user, FlagsPatch::opt_out(FeatureFlag::ReorderReminders))
            .await
            .expect("update flags");
        let flags = service.get_flags(&user).await.value;

        assert!(!flags.reorder_reminders_enabled);
        assert!(flags.usual_orders_enabled);
    }

    #[tokio::test]
    async fn set_flags_surfaces_storage_failure() {
        let service = PreferenceService::new(Arc::new(UnavailableRepository));
        let user = UserId::new("u1");

        let result = service.set_flags(&user, PreferenceFlags::all_disabled(user.clone())).await;

        assert!(matches!(result, Err(ApplicationError::Persistence(_))));
    }

    #[tokio::test]
    async fn delete_user_clears_storage_cache_and_purgers() {
        let repository = Arc::new(InMemoryPreferenceFlagsRepository::default());
        let service = PreferenceService::new(repository.clone());
        let user = UserId::new("u1");
        service.set_flags(&user, PreferenceFlags::all_disabled(user.clone())).await.expect("set");

        let purger = Arc::new(RecordingPurger::default());
        let purgers: Vec<Arc<dyn UserDataPurger>> = vec![purger.clone()];
        service.delete_user(&user, &purgers).await.expect("delete");

        assert!(purger.called.load(Ordering::SeqCst));
        assert!(!service.is_cached(&user));
        assert_eq!(repository.find(&user).await.expect("find"), None);
        assert!(service.get_flags(&user).await.value.smart_ranking_enabled);
    }

    #[tokio::test]
    async fn delete_user_reports_purger_failure() {
        let service = service();
        let user = UserId::new("u1");
        let purgers: Vec<Arc<dyn UserDataPurger>> =
            vec![Arc::new(RecordingPurger { called: AtomicBool::new(false), fail: true })];

        let result = service.delete_user(&user, &purgers).await;

        assert!(matches!(result, Err(ApplicationError::Persistence(message)) if message.contains("disk full")));
    }

    #[tokio::test]
    async fn read_that_straddles_delete_does_not_refill_cache() {
        let repository = Arc::new(GatedRepository::default());
        let user = UserId::new("u1");
        repository.inner.save(PreferenceFlags::all_disabled(user.clone())).await.expect("seed");
        let service = Arc::new(PreferenceService::new(repository.clone()));

        let reader = {
            let service = Arc::clone(&service);
            let user = user.clone();
            tokio::spawn(async move { service.get_flags(&user).await })
        };
        repository.entered.notified().await;
        service.delete_user(&user, &[]).await.expect("delete");
        repository.gate.notify_one();
        reader.await.expect("reader task");

        assert!(!service.is_cached(&user), "deleted flags must not come back through the cache");
        assert_eq!(repository.inner.find(&user).await.expect("find"), None);
    }
}
