use thiserror::Error;

use crate::config::ConfigError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid input for `{field}`: {reason}")]
    InvalidInput { field: &'static str, reason: String },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

impl DomainError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput { field, reason: reason.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<ConfigError> for ApplicationError {
    fn from(error: ConfigError) -> Self {
        Self::Configuration(error.to_string())
    }
}

impl ApplicationError {
    /// Storage and collaborator failures may succeed on retry; bad input and bad config will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_) | Self::Integration(_))
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let (kind, message) = match self {
            Self::Domain(DomainError::InvalidInput { field, reason }) => {
                (InterfaceErrorKind::BadRequest, format!("{field}: {reason}"))
            }
            Self::Domain(DomainError::InvariantViolation(_)) => {
                (InterfaceErrorKind::BadRequest, "domain validation failed".to_owned())
            }
            Self::Persistence(message) | Self::Integration(message) => {
                (InterfaceErrorKind::ServiceUnavailable, message)
            }
            Self::Configuration(message) => (InterfaceErrorKind::Internal, message),
        };
        InterfaceError { kind, message, correlation_id: correlation_id.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterfaceErrorKind {
    BadRequest,
    ServiceUnavailable,
    Internal,
}

/// What a caller-facing surface reports. `message` is for logs; show `user_message()` to users.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{kind:?} [{correlation_id}]: {message}")]
pub struct InterfaceError {
    pub kind: InterfaceErrorKind,
    pub message: String,
    pub correlation_id: String,
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self.kind {
            InterfaceErrorKind::BadRequest => {
                "The request could not be processed. Check inputs and try again."
            }
            InterfaceErrorKind::ServiceUnavailable => {
                "Personalization is temporarily unavailable. Please retry shortly."
            }
            InterfaceErrorKind::Internal => "An unexpected internal error occurred.",
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::ConfigError;
    use crate::errors::{ApplicationError, DomainError, InterfaceErrorKind};

    #[test]
    fn invalid_event_maps_to_bad_request_naming_the_field() {
        let interface = ApplicationError::from(DomainError::invalid("event_id", "must not be blank"))
            .into_interface("req-1");

        assert_eq!(interface.kind, InterfaceErrorKind::BadRequest);
        assert_eq!(interface.correlation_id, "req-1");
        assert!(interface.message.contains("event_id"));
    }

    #[test]
    fn storage_outage_is_retryable_and_unavailable() {
        let error = ApplicationError::Persistence("flags table locked".to_owned());
        assert!(error.is_retryable());

        let interface = error.into_interface("req-2");
        assert_eq!(interface.kind, InterfaceErrorKind::ServiceUnavailable);
        assert!(!interface.user_message().contains("locked"));
    }

    #[test]
    fn bad_settings_map_to_internal_and_never_retry() {
        let error = ApplicationError::from(ConfigError::Validation("negative half-life".to_owned()));
        assert!(!error.is_retryable());
        assert_eq!(error.into_interface("req-3").kind, InterfaceErrorKind::Internal);
    }
}
