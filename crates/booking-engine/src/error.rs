//! Error types for booking-engine operations.

use thiserror::Error;

use crate::conflict::{ConflictReport, OccurrenceConflict};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid datetime: {0}")]
    InvalidDatetime(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid calendar config: {0}")]
    InvalidConfig(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    /// A snapshot or request references an entity that no longer exists.
    #[error("{entity} {id} no longer exists")]
    MissingReference { entity: &'static str, id: u64 },

    #[error("Domain rule violated: {0}")]
    DomainRule(String),

    #[error("Scheduling conflict: {0}")]
    Conflict(ConflictReport),

    #[error("Scheduling conflicts in {} occurrence(s)", .0.len())]
    SeriesConflicts(Vec<OccurrenceConflict>),

    #[error("Recurrence error: {0}")]
    Recurrence(String),

    #[error("Archive record {0} has already been restored")]
    AlreadyRestored(u64),

    #[error("Invalid RRULE: {0}")]
    InvalidRule(String),

    #[error("Store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
