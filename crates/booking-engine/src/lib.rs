//! # booking-engine
//!
//! Deterministic scheduling for cabinet-based services.
//!
//! Given a calendar (services, specialists with weekly hours, typed rooms) and
//! the current reservations, the engine finds bookable slots, detects
//! conflicts, expands recurrence rules into series, keeps series consistent
//! under edits, and archives deletions so they can be restored.
//!
//! ## Modules
//!
//! - [`availability`]: Slot search for a service on a date
//! - [`conflict`]: Per-placement conflict flags and series conflict checks
//! - [`recurrence`]: Rule → concrete occurrence list (pure, capped at 200)
//! - [`series`]: Series rebuild planning, compaction, and detaching
//! - [`booking`]: Create, update, reschedule, duplicate, and delete flows
//! - [`archive`]: Snapshot-before-delete archive, restore, and purge
//! - [`schedule`]: Room closures and specialist working hours
//! - [`audit`]: Per-reservation change history
//! - [`ical`]: RFC 5545 export of a series
//! - [`store`]: Storage traits and the in-memory store
//! - [`engine`]: [`BookingEngine`], the transactional operation surface
//! - [`calendar`], [`model`], [`temporal`]: Data model and time helpers
//! - [`error`]: Error types

pub mod archive;
pub mod audit;
pub mod availability;
pub mod booking;
pub mod calendar;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod ical;
pub mod model;
pub mod recurrence;
pub mod schedule;
pub mod series;
pub mod store;
pub mod temporal;

pub use archive::{
    ArchivedReservation, DeleteScope, RestoreOutcome, RestorePreview, SeriesRestoreOutcome,
    SNAPSHOT_SCHEMA_VERSION,
};
pub use audit::{AuditAction, AuditEntry, FieldChange};
pub use availability::{available_rooms, find_available_slots, Slot};
pub use booking::{
    CreateReservation, DeleteOutcome, MutationOutcome, ReservationChanges, UpdateReservation,
};
pub use calendar::{
    CalendarConfig, Room, ScheduleTemplate, ServiceDefinition, Settings, Specialist, WeeklyHours,
    WorkingHours,
};
pub use conflict::{
    check_conflicts, ConflictPolicy, ConflictQuery, ConflictReport, OccurrenceConflict,
};
pub use engine::BookingEngine;
pub use error::EngineError;
pub use ical::{rule_to_ical, series_to_ical};
pub use model::{
    ActionContext, Actor, ArchiveId, ClosureId, Guest, RecurrenceSeries, Reservation,
    ReservationDraft, ReservationId, ReservationStatus, RoomClosure, RoomId, SeriesId, ServiceId,
    SpecialistId, TemplateId,
};
pub use recurrence::{
    expand_series, generate_occurrences, Frequency, RecurrenceRule, Termination, MAX_OCCURRENCES,
};
pub use series::{EditScope, RecurrenceEdit};
pub use store::{InMemoryStore, ScheduleView, Store, StoreTx};
pub use temporal::TimeSpan;
