pub mod analytics;
pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod flags;
pub mod generations;
pub mod history;
pub mod insights;
pub mod preferences;
pub mod ranking;
pub mod reorder;
pub mod settings;
pub mod signals;
pub mod usual;

pub use analytics::{
    AnalyticsDispatcher, AnalyticsError, AnalyticsEvent, AnalyticsSink, InMemoryAnalyticsSink,
    NoOpAnalyticsSink, RetryPolicy,
};
pub use domain::candidate::{AppliedFeature, ProductCandidate, RankedCandidate, RankingOutcome};
pub use domain::event::{EventType, InteractionEvent, ProductRef};
pub use domain::flags::{FeatureFlag, FlagsPatch, PreferenceFlags};
pub use domain::insight::{ReorderBundle, ReorderCycle, Urgency, UsualBasketItem};
pub use domain::profile::UserPreferenceProfile;
pub use domain::purchase::PurchaseRecord;
pub use domain::status::{Assessed, AssessmentStatus};
pub use domain::UserId;
pub use engine::{EngineDependencies, PersonalizationEngine};
pub use errors::{ApplicationError, DomainError, InterfaceError, InterfaceErrorKind};
pub use flags::{
    FlagsRepositoryError, InMemoryPreferenceFlagsRepository, PreferenceFlagsRepository,
    PreferenceService, UserDataPurger,
};
pub use generations::UserGenerations;
pub use history::{HistorySourceError, InMemoryPurchaseHistorySource, PurchaseHistorySource};
pub use ranking::UserSegment;
pub use settings::{EngineSettings, SettingsHandle};
