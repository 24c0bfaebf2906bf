//! Purchase history held per user, plus the seam to the external order store.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::purchase::PurchaseRecord;
use crate::domain::UserId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HistorySourceError {
    #[error("order history source unavailable: {0}")]
    Unavailable(String),
    #[error("order history source returned malformed data: {0}")]
    Malformed(String),
}

/// Read-only access to the order system's purchase records.
#[async_trait]
pub trait PurchaseHistorySource: Send + Sync {
    async fn fetch_purchases(&self, user_id: &UserId) -> Result<Vec<PurchaseRecord>, HistorySourceError>;
}

#[derive(Clone, Default)]
pub struct InMemoryPurchaseHistorySource {
    records: Arc<RwLock<HashMap<UserId, Vec<PurchaseRecord>>>>,
}

impl InMemoryPurchaseHistorySource {
    pub async fn insert(&self, record: PurchaseRecord) {
        self.records.write().await.entry(record.user_id.clone()).or_default().push(record);
    }
}

#[async_trait]
impl PurchaseHistorySource for InMemoryPurchaseHistorySource {
    async fn fetch_purchases(&self, user_id: &UserId) -> Result<Vec<PurchaseRecord>, HistorySourceError> {
        Ok(self.records.read().await.get(user_id).cloned().unwrap_or_default())
    }
}

/// A user's purchases ordered by timestamp, unique per `(order_id, sku)`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OrderHistory {
    records: Vec<PurchaseRecord>,
    keys: HashSet<(String, String)>,
    version: u64,
}

impl OrderHistory {
    pub fn records(&self) -> &[PurchaseRecord] {
        &self.records
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn by_sku(&self) -> BTreeMap<&str, Vec<&PurchaseRecord>> {
        let mut grouped: BTreeMap<&str, Vec<&PurchaseRecord>> = BTreeMap::new();
        for record in &self.records {
            grouped.entry(record.sku.as_str()).or_default().push(record);
        }
        grouped
    }

    /// Returns a copy with the new records merged in. The version only moves when something was added.
    fn merged(&self, incoming: impl IntoIterator<Item = PurchaseRecord>) -> Option<Self> {
        let mut next = self.clone();
        let mut added = false;
        for record in incoming {
            let key = (record.order_id.clone(), record.sku.clone());
            if next.keys.insert(key) {
                next.records.push(record);
                added = true;
            }
        }
        if !added {
            return None;
        }
        next.records.sort_by(|left, right| {
            left.order_timestamp
                .cmp(&right.order_timestamp)
                .then_with(|| left.order_id.cmp(&right.order_id))
                .then_with(|| left.sku.cmp(&right.sku))
        });
        next.version += 1;
        Some(next)
    }
}

#[derive(Default)]
pub struct OrderHistoryStore {
    histories: DashMap<UserId, Arc<OrderHistory>>,
}

impl OrderHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges records into their users' histories; already-known `(order_id, sku)` pairs are ignored.
    pub fn record(&self, records: Vec<PurchaseRecord>) -> usize {
        let mut by_user: HashMap<UserId, Vec<PurchaseRecord>> = HashMap::new();
        for record in records {
            by_user.entry(record.user_id.clone()).or_default().push(record);
        }

        let mut changed_users = 0;
        for (user_id, incoming) in by_user {
            let mut entry = self.histories.entry(user_id).or_default();
            if let Some(next) = entry.merged(incoming) {
                *entry = Arc::new(next);
                changed_users += 1;
            }
        }
        changed_users
    }

    pub fn history(&self, user_id: &UserId) -> Arc<OrderHistory> {
        self.histories
            .get(user_id)
            .map(|entry| Arc::clone(entry.value()))
            .unwrap_or_default()
    }

    pub fn version(&self, user_id: &UserId) -> u64 {
        self.histories.get(user_id).map(|entry| entry.version()).unwrap_or(0)
    }

    pub fn users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.histories.iter().map(|entry| entry.key().clone()).collect();
        users.sort();
        users
    }

    pub fn remove(&self, user_id: &UserId) -> bool {
        self.histories.remove(user_id).is_some()
    }
}
