use thiserror::Error;

pub mod preference_flags;
pub mod purchase_history;

pub use preference_flags::SqlPreferenceFlagsRepository;
pub use purchase_history::SqlPurchaseHistoryRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

pub(crate) fn decode_error(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}
