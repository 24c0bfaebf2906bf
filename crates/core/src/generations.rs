//! Per-user deletion generations.
//!
//! Work that reads user data and writes derived state later (background recomputes, history
//! refreshes, flag cache fills) captures the generation first and commits through
//! [`UserGenerations::commit_if_current`]. A deletion in between advances the generation, so the
//! late write is dropped instead of resurrecting purged data.

use dashmap::DashMap;

use crate::domain::UserId;

#[derive(Debug, Default)]
pub struct UserGenerations {
    generations: DashMap<UserId, u64>,
}

impl UserGenerations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self, user_id: &UserId) -> u64 {
        self.generations.get(user_id).map(|generation| *generation).unwrap_or(0)
    }

    /// Called at the start of a deletion, before any store is purged.
    pub fn advance(&self, user_id: &UserId) -> u64 {
        let mut generation = self.generations.entry(user_id.clone()).or_insert(0);
        *generation += 1;
        *generation
    }

    /// Runs `commit` while holding the user's generation slot, and only when no deletion started
    /// after `observed` was read. `commit` must not touch this map.
    pub fn commit_if_current<T>(
        &self,
        user_id: &UserId,
        observed: u64,
        commit: impl FnOnce() -> T,
    ) -> Option<T> {
        let generation = self.generations.entry(user_id.clone()).or_insert(0);
        if *generation == observed {
            Some(commit())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::UserGenerations;
    use crate::domain::UserId;

    #[test]
    fn commit_is_dropped_after_a_deletion_started() {
        let generations = UserGenerations::new();
        let user = UserId::new("u1");
        let observed = generations.current(&user);

        assert_eq!(generations.commit_if_current(&user, observed, || "written"), Some("written"));

        generations.advance(&user);
        assert_eq!(generations.commit_if_current(&user, observed, || "written"), None);
        assert_eq!(
            generations.commit_if_current(&user, generations.current(&user), || "fresh"),
            Some("fresh")
        );
    }

    #[test]
    fn generations_are_tracked_per_user() {
        let generations = UserGenerations::new();
        let deleted = UserId::new("u1");
        let other = UserId::new("u2");
        let observed = generations.current(&other);

        generations.advance(&deleted);

        assert_eq!(generations.current(&deleted), 1);
        assert!(generations.commit_if_current(&other, observed, || ()).is_some());
    }
}
