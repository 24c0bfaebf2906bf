use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::UserId;
use crate::errors::DomainError;

/// One line of a historical order, as supplied by the order store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub user_id: UserId,
    pub sku: String,
    pub quantity: u32,
    pub order_timestamp: DateTime<Utc>,
    pub order_id: String,
    #[serde(default)]
    pub category: Option<String>,
}

impl PurchaseRecord {
    pub fn new(
        user_id: impl Into<String>,
        sku: impl Into<String>,
        quantity: u32,
        order_timestamp: DateTime<Utc>,
        order_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: UserId(user_id.into()),
            sku: sku.into(),
            quantity,
            order_timestamp,
            order_id: order_id.into(),
            category: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.user_id.0.trim().is_empty() {
            return Err(DomainError::invalid("user_id", "must not be blank"));
        }
        if self.sku.trim().is_empty() {
            return Err(DomainError::invalid("sku", "must not be blank"));
        }
        if self.order_id.trim().is_empty() {
            return Err(DomainError::invalid("order_id", "must not be blank"));
        }
        if self.quantity == 0 {
            return Err(DomainError::invalid("quantity", "must be at least 1"));
        }
        Ok(())
    }
}
