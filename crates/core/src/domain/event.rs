use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::UserId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Purchase,
    AddToBag,
    RemoveFromBag,
    Click,
    View,
    ScrollPast,
    SaveForLater,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::AddToBag => "add_to_bag",
            Self::RemoveFromBag => "remove_from_bag",
            Self::Click => "click",
            Self::View => "view",
            Self::ScrollPast => "scroll_past",
            Self::SaveForLater => "save_for_later",
        }
    }
}

/// Product the interaction refers to, as tagged by the caller.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRef {
    pub sku: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub attributes: Vec<String>,
}

impl ProductRef {
    pub fn new(sku: impl Into<String>) -> Self {
        Self { sku: sku.into(), ..Self::default() }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_brand(mut self, brand: impl Into<String>) -> Self {
        self.brand = Some(brand.into());
        self
    }

    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attributes.push(attribute.into());
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub raw_event_data: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub event_id: EventId,
    pub user_id: UserId,
    pub event_type: EventType,
    pub product: ProductRef,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: EventContext,
}

impl InteractionEvent {
    pub fn new(
        event_id: impl Into<String>,
        user_id: impl Into<String>,
        event_type: EventType,
        product: ProductRef,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: EventId(event_id.into()),
            user_id: UserId(user_id.into()),
            event_type,
            product,
            timestamp,
            context: EventContext::default(),
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.context.session_id = Some(session_id.into());
        self
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.event_id.0.trim().is_empty() {
            return Err(DomainError::invalid("event_id", "must not be blank"));
        }
        if self.user_id.0.trim().is_empty() {
            return Err(DomainError::invalid("user_id", "must not be blank"));
        }
        if self.product.sku.trim().is_empty() {
            return Err(DomainError::invalid("product.sku", "must not be blank"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{EventType, InteractionEvent, ProductRef};
    use crate::errors::DomainError;

    #[test]
    fn blank_sku_is_rejected_with_field_name() {
        let event =
            InteractionEvent::new("evt-1", "user-1", EventType::Click, ProductRef::new("  "), Utc::now());

        assert_eq!(
            event.validate(),
            Err(DomainError::invalid("product.sku", "must not be blank"))
        );
    }

    #[test]
    fn event_type_serializes_snake_case() {
        let encoded = serde_json::to_string(&EventType::RemoveFromBag).expect("serialize");
        assert_eq!(encoded, "\"remove_from_bag\"");
        assert_eq!(EventType::RemoveFromBag.as_str(), "remove_from_bag");
    }
}
