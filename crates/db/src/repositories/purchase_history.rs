use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;

use cadence_core::flags::PurgeError;
use cadence_core::{
    HistorySourceError, PurchaseHistorySource, PurchaseRecord, UserDataPurger, UserId,
};

use super::{decode_error, RepositoryError};
use crate::DbPool;

/// Local mirror of the order store's purchase lines.
#[derive(Clone)]
pub struct SqlPurchaseHistoryRepository {
    pool: DbPool,
}

impl SqlPurchaseHistoryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Inserts records in one transaction. Lines already stored for the same
    /// `(user_id, order_id, sku)` are left alone. Returns the number of new rows.
    pub async fn insert_purchases(&self, records: &[PurchaseRecord]) -> Result<u64, RepositoryError> {
        for record in records {
            record.validate().map_err(|error| RepositoryError::InvalidRecord(error.to_string()))?;
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for record in records {
            let result = sqlx::query(
                "INSERT INTO purchase_records
                    (user_id, sku, quantity, order_timestamp, order_id, category)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(user_id, order_id, sku) DO NOTHING",
            )
            .bind(record.user_id.as_str())
            .bind(&record.sku)
            .bind(i64::from(record.quantity))
            .bind(encode_timestamp(record.order_timestamp))
            .bind(&record.order_id)
            .bind(&record.category)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    pub async fn purchases_for(&self, user_id: &UserId) -> Result<Vec<PurchaseRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT user_id, sku, quantity, order_timestamp, order_id, category
             FROM purchase_records
             WHERE user_id = ?
             ORDER BY order_timestamp ASC, order_id ASC, sku ASC",
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_purchase).collect()
    }

    pub async fn users(&self) -> Result<Vec<UserId>, RepositoryError> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT user_id FROM purchase_records ORDER BY user_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(ids.into_iter().map(UserId).collect())
    }

    pub async fn delete_user(&self, user_id: &UserId) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM purchase_records WHERE user_id = ?")
            .bind(user_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn encode_timestamp(timestamp: DateTime<Utc>) -> String {
    // Fixed width so that text ordering matches time ordering.
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn row_to_purchase(row: &sqlx::sqlite::SqliteRow) -> Result<PurchaseRecord, RepositoryError> {
    let user_id: String = row.try_get("user_id").map_err(decode_error)?;
    let sku: String = row.try_get("sku").map_err(decode_error)?;
    let quantity: i64 = row.try_get("quantity").map_err(decode_error)?;
    let order_timestamp: String = row.try_get("order_timestamp").map_err(decode_error)?;
    let order_id: String = row.try_get("order_id").map_err(decode_error)?;
    let category: Option<String> = row.try_get("category").map_err(decode_error)?;

    let quantity = u32::try_from(quantity)
        .map_err(|_| RepositoryError::Decode(format!("quantity {quantity} out of range")))?;
    let order_timestamp = DateTime::parse_from_rfc3339(&order_timestamp)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(decode_error)?;

    Ok(PurchaseRecord {
        user_id: UserId(user_id),
        sku,
        quantity,
        order_timestamp,
        order_id,
        category,
    })
}

#[async_trait]
impl PurchaseHistorySource for SqlPurchaseHistoryRepository {
    async fn fetch_purchases(&self, user_id: &UserId) -> Result<Vec<PurchaseRecord>, HistorySourceError> {
        self.purchases_for(user_id).await.map_err(|error| match error {
            RepositoryError::Database(error) => HistorySourceError::Unavailable(error.to_string()),
            other => HistorySourceError::Malformed(other.to_string()),
        })
    }
}

#[async_trait]
impl UserDataPurger for SqlPurchaseHistoryRepository {
    fn store_name(&self) -> &'static str {
        "purchase_records"
    }

    async fn purge_user(&self, user_id: &UserId) -> Result<(), PurgeError> {
        self.delete_user(user_id)
            .await
            .map(|_| ())
            .map_err(|error| PurgeError { store: self.store_name(), reason: error.to_string() })
    }
}
