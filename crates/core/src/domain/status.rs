use serde::{Deserialize, Serialize};

/// How a read path produced its value: fully, from a fallback, or without enough data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentStatus {
    Ok,
    Degraded,
    InsufficientData,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Assessed<T> {
    pub value: T,
    pub status: AssessmentStatus,
}

impl<T> Assessed<T> {
    pub fn ok(value: T) -> Self {
        Self { value, status: AssessmentStatus::Ok }
    }

    pub fn degraded(value: T) -> Self {
        Self { value, status: AssessmentStatus::Degraded }
    }

    pub fn insufficient(value: T) -> Self {
        Self { value, status: AssessmentStatus::InsufficientData }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Assessed<U> {
        Assessed { value: f(self.value), status: self.status }
    }

    pub fn is_degraded(&self) -> bool {
        self.status == AssessmentStatus::Degraded
    }
}
