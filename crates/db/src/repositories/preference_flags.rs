use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;

use cadence_core::{FlagsRepositoryError, PreferenceFlags, PreferenceFlagsRepository, UserId};

use super::{decode_error, RepositoryError};
use crate::DbPool;

pub struct SqlPreferenceFlagsRepository {
    pool: DbPool,
}

impl SqlPreferenceFlagsRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find_row(&self, user_id: &UserId) -> Result<Option<PreferenceFlags>, RepositoryError> {
        let row = sqlx::query(
            "SELECT user_id, smart_ranking_enabled, usual_orders_enabled,
                    reorder_reminders_enabled, dietary_filters_enabled, analytics_enabled,
                    dietary_exclusions, updated_at
             FROM preference_flags
             WHERE user_id = ?",
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_flags).transpose()
    }

    async fn upsert(&self, flags: &PreferenceFlags) -> Result<(), RepositoryError> {
        let exclusions = serde_json::to_string(&flags.dietary_exclusions).map_err(decode_error)?;
        sqlx::query(
            "INSERT INTO preference_flags
                (user_id, smart_ranking_enabled, usual_orders_enabled, reorder_reminders_enabled,
                 dietary_filters_enabled, analytics_enabled, dietary_exclusions, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET
                smart_ranking_enabled = excluded.smart_ranking_enabled,
                usual_orders_enabled = excluded.usual_orders_enabled,
                reorder_reminders_enabled = excluded.reorder_reminders_enabled,
                dietary_filters_enabled = excluded.dietary_filters_enabled,
                analytics_enabled = excluded.analytics_enabled,
                dietary_exclusions = excluded.dietary_exclusions,
                updated_at = excluded.updated_at",
        )
        .bind(flags.user_id.as_str())
        .bind(flags.smart_ranking_enabled)
        .bind(flags.usual_orders_enabled)
        .bind(flags.reorder_reminders_enabled)
        .bind(flags.dietary_filters_enabled)
        .bind(flags.analytics_enabled)
        .bind(exclusions)
        .bind(flags.updated_at.to_rfc3339_opts(SecondsFormat::Millis, true))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_flags(row: &sqlx::sqlite::SqliteRow) -> Result<PreferenceFlags, RepositoryError> {
    let user_id: String = row.try_get("user_id").map_err(decode_error)?;
    let exclusions: String = row.try_get("dietary_exclusions").map_err(decode_error)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_error)?;

    Ok(PreferenceFlags {
        user_id: UserId(user_id),
        smart_ranking_enabled: row.try_get("smart_ranking_enabled").map_err(decode_error)?,
        usual_orders_enabled: row.try_get("usual_orders_enabled").map_err(decode_error)?,
        reorder_reminders_enabled: row.try_get("reorder_reminders_enabled").map_err(decode_error)?,
        dietary_filters_enabled: row.try_get("dietary_filters_enabled").map_err(decode_error)?,
        analytics_enabled: row.try_get("analytics_enabled").map_err(decode_error)?,
        dietary_exclusions: serde_json::from_str(&exclusions).map_err(decode_error)?,
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|timestamp| timestamp.with_timezone(&Utc))
            .map_err(decode_error)?,
    })
}

impl From<RepositoryError> for FlagsRepositoryError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(error) => Self::Unavailable(error.to_string()),
            other => Self::Decode(other.to_string()),
        }
    }
}

#[async_trait]
impl PreferenceFlagsRepository for SqlPreferenceFlagsRepository {
    async fn find(&self, user_id: &UserId) -> Result<Option<PreferenceFlags>, FlagsRepositoryError> {
        Ok(self.find_row(user_id).await?)
    }

    async fn save(&self, flags: PreferenceFlags) -> Result<(), FlagsRepositoryError> {
        Ok(self.upsert(&flags).await?)
    }

    async fn delete(&self, user_id: &UserId) -> Result<bool, FlagsRepositoryError> {
        let result = sqlx::query("DELETE FROM preference_flags WHERE user_id = ?")
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(RepositoryError::from)?;
        Ok(result.rows_affected() > 0)
    }
}
