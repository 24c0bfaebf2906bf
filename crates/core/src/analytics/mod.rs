mod dispatcher;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::event::{EventType, InteractionEvent, ProductRef};
use crate::domain::UserId;

pub use dispatcher::{AnalyticsDispatcher, DispatcherStats, EnqueueOutcome, RetryPolicy};

/// Outbound analytics record. The field set is the contract with the downstream pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub user_id: UserId,
    pub session_id: Option<String>,
    pub product_ref: ProductRef,
    pub interaction_strength: f64,
    pub raw_event_data: serde_json::Value,
}

impl AnalyticsEvent {
    pub fn from_interaction(event: &InteractionEvent, interaction_strength: f64) -> Self {
        Self {
            event_id: event.event_id.0.clone(),
            timestamp: event.timestamp,
            event_type: event.event_type,
            user_id: event.user_id.clone(),
            session_id: event.context.session_id.clone(),
            product_ref: event.product.clone(),
            interaction_strength,
            raw_event_data: event.context.raw_event_data.clone(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AnalyticsError {
    #[error("analytics transport failed: {0}")]
    Transport(String),
    #[error("analytics sink rejected event with status {status}")]
    Rejected { status: u16 },
}

#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn deliver(&self, event: &AnalyticsEvent) -> Result<(), AnalyticsError>;
}

#[derive(Clone, Default)]
pub struct InMemoryAnalyticsSink {
    events: Arc<Mutex<Vec<AnalyticsEvent>>>,
}

impl InMemoryAnalyticsSink {
    pub fn events(&self) -> Vec<AnalyticsEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl AnalyticsSink for InMemoryAnalyticsSink {
    async fn deliver(&self, event: &AnalyticsEvent) -> Result<(), AnalyticsError> {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
        Ok(())
    }
}

/// Used when analytics forwarding is disabled in configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpAnalyticsSink;

#[async_trait]
impl AnalyticsSink for NoOpAnalyticsSink {
    async fn deliver(&self, _event: &AnalyticsEvent) -> Result<(), AnalyticsError> {
        Ok(())
    }
}
