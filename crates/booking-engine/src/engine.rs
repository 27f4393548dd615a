//! [`BookingEngine`]: the operation surface over a [`Store`].
//!
//! Reads go through [`Store::read`]; every mutation is one
//! [`Store::transaction`], so a conflict check and the write it guards commit
//! or fail together.

use chrono::{DateTime, NaiveDate, Utc, Weekday};
use tracing::{debug, instrument};

use crate::archive::{
    self, ArchivedReservation, DeleteScope, RestoreOutcome, RestorePreview, SeriesRestoreOutcome,
};
use crate::audit::AuditEntry;
use crate::availability::{self, Slot};
use crate::booking::{self, CreateReservation, DeleteOutcome, MutationOutcome, UpdateReservation};
use crate::calendar::{Room, Settings, WorkingHours};
use crate::conflict::{self, ConflictQuery, ConflictReport};
use crate::error::EngineError;
use crate::ical;
use crate::model::{
    ActionContext, ArchiveId, ClosureId, RecurrenceSeries, Reservation, ReservationId, RoomClosure,
    RoomId, SeriesId, ServiceId, SpecialistId, TemplateId,
};
use crate::recurrence::{self, RecurrenceRule};
use crate::schedule;
use crate::store::Store;
use crate::temporal::TimeSpan;

pub struct BookingEngine<S> {
    store: S,
}

impl<S: Store> BookingEngine<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> Settings {
        self.store.read(|v| v.settings())
    }

    // ── Queries ────────────────────────────────────────────────────────────

    /// Bookable starts for a service on a local calendar date.
    #[instrument(skip(self))]
    pub fn find_available_slots(
        &self,
        date: NaiveDate,
        service_id: ServiceId,
    ) -> Result<Vec<Slot>, EngineError> {
        self.store
            .read(|v| availability::find_available_slots(v, date, service_id))
    }

    pub fn available_rooms(&self, service_id: ServiceId) -> Result<Vec<Room>, EngineError> {
        self.store.read(|v| availability::available_rooms(v, service_id))
    }

    #[instrument(skip(self))]
    pub fn check_conflicts(&self, query: &ConflictQuery) -> Result<ConflictReport, EngineError> {
        self.store.read(|v| conflict::check_conflicts(v, query))
    }

    /// Expand a rule from `anchor` in the deployment timezone, without writing.
    pub fn generate_occurrences(
        &self,
        rule: &RecurrenceRule,
        anchor: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, EngineError> {
        recurrence::expand_series(rule, anchor, self.settings().timezone)
    }

    pub fn reservation(&self, id: ReservationId) -> Option<Reservation> {
        self.store.read(|v| v.reservation(id))
    }

    pub fn series(&self, id: SeriesId) -> Option<RecurrenceSeries> {
        self.store.read(|v| v.series(id))
    }

    pub fn series_members(&self, id: SeriesId) -> Vec<Reservation> {
        self.store.read(|v| v.series_members(id))
    }

    pub fn audit_log(&self, id: ReservationId) -> Vec<AuditEntry> {
        self.store.read(|v| v.audit_log(id))
    }

    pub fn list_archives(&self, scope: Option<DeleteScope>) -> Vec<ArchivedReservation> {
        self.store.read(|v| archive::list_archives(v, scope))
    }

    pub fn preview_restore(&self, archive_id: ArchiveId) -> Result<RestorePreview, EngineError> {
        self.store.read(|v| archive::preview_restore(v, archive_id))
    }

    /// iCalendar recurrence block for a stored series.
    pub fn export_series(&self, id: SeriesId) -> Result<String, EngineError> {
        let (series, tz) = self.store.read(|v| (v.series(id), v.settings().timezone));
        let series = series.ok_or(EngineError::NotFound {
            entity: "series",
            id: id.0,
        })?;
        ical::series_to_ical(&series, tz)
    }

    // ── Reservations ───────────────────────────────────────────────────────

    #[instrument(skip(self, request, ctx), fields(actor = %ctx.actor, policy = ?request.policy))]
    pub fn create_reservation(
        &self,
        request: CreateReservation,
        ctx: &ActionContext,
    ) -> Result<MutationOutcome, EngineError> {
        self.store.transaction(|tx| booking::create(tx, request, ctx))
    }

    #[instrument(skip(self, request, ctx), fields(actor = %ctx.actor, scope = ?request.scope))]
    pub fn update_reservation(
        &self,
        id: ReservationId,
        request: UpdateReservation,
        ctx: &ActionContext,
    ) -> Result<MutationOutcome, EngineError> {
        self.store.transaction(|tx| booking::update(tx, id, request, ctx))
    }

    /// Move a reservation to a new start; conflicts are advisory.
    #[instrument(skip(self, ctx), fields(actor = %ctx.actor))]
    pub fn reschedule(
        &self,
        id: ReservationId,
        start: DateTime<Utc>,
        ctx: &ActionContext,
    ) -> Result<MutationOutcome, EngineError> {
        self.store.transaction(|tx| booking::reschedule(tx, id, start, ctx))
    }

    /// Copy a standalone reservation to a new start.
    #[instrument(skip(self, ctx), fields(actor = %ctx.actor))]
    pub fn duplicate(
        &self,
        id: ReservationId,
        start: DateTime<Utc>,
        ctx: &ActionContext,
    ) -> Result<MutationOutcome, EngineError> {
        self.store.transaction(|tx| booking::duplicate(tx, id, start, ctx))
    }

    #[instrument(skip(self, reason, ctx), fields(actor = %ctx.actor))]
    pub fn delete_reservation(
        &self,
        id: ReservationId,
        scope: DeleteScope,
        reason: Option<String>,
        ctx: &ActionContext,
    ) -> Result<DeleteOutcome, EngineError> {
        self.store
            .transaction(|tx| booking::delete(tx, id, scope, reason, ctx))
    }

    // ── Archive ────────────────────────────────────────────────────────────

    #[instrument(skip(self, ctx), fields(actor = %ctx.actor))]
    pub fn restore_reservation(
        &self,
        archive_id: ArchiveId,
        ctx: &ActionContext,
    ) -> Result<RestoreOutcome, EngineError> {
        self.store
            .transaction(|tx| archive::restore_reservation(tx, archive_id, ctx))
    }

    #[instrument(skip(self, ctx), fields(actor = %ctx.actor))]
    pub fn restore_series(
        &self,
        archive_id: ArchiveId,
        ctx: &ActionContext,
    ) -> Result<SeriesRestoreOutcome, EngineError> {
        self.store
            .transaction(|tx| archive::restore_series(tx, archive_id, ctx))
    }

    #[instrument(skip(self, ctx), fields(actor = %ctx.actor))]
    pub fn purge_archive(
        &self,
        archive_id: ArchiveId,
        ctx: &ActionContext,
    ) -> Result<(), EngineError> {
        let purged = self.store.transaction(|tx| archive::purge(tx, archive_id))?;
        debug!(
            archive = %archive_id,
            original = %purged.reservation.original_id,
            "archive record purged"
        );
        Ok(())
    }

    // ── Rooms and schedules ────────────────────────────────────────────────

    pub fn create_closure(
        &self,
        room_id: RoomId,
        span: TimeSpan,
        reason: impl Into<String>,
        ctx: &ActionContext,
    ) -> Result<ClosureId, EngineError> {
        let reason = reason.into();
        self.store
            .transaction(|tx| schedule::create_closure(tx, room_id, span, reason, ctx))
    }

    pub fn delete_closure(
        &self,
        id: ClosureId,
        ctx: &ActionContext,
    ) -> Result<RoomClosure, EngineError> {
        self.store.transaction(|tx| schedule::delete_closure(tx, id, ctx))
    }

    /// Set (`Some`) or clear (`None`) one weekday of a specialist's hours.
    pub fn set_working_hours(
        &self,
        specialist_id: SpecialistId,
        weekday: Weekday,
        hours: Option<WorkingHours>,
        ctx: &ActionContext,
    ) -> Result<(), EngineError> {
        self.store
            .transaction(|tx| schedule::set_working_hours(tx, specialist_id, weekday, hours, ctx))
    }

    pub fn copy_schedule(
        &self,
        source: SpecialistId,
        target: SpecialistId,
        ctx: &ActionContext,
    ) -> Result<usize, EngineError> {
        self.store
            .transaction(|tx| schedule::copy_schedule(tx, source, target, ctx))
    }

    pub fn apply_template(
        &self,
        template_id: TemplateId,
        specialist_id: SpecialistId,
        ctx: &ActionContext,
    ) -> Result<usize, EngineError> {
        self.store
            .transaction(|tx| schedule::apply_template(tx, template_id, specialist_id, ctx))
    }
}
