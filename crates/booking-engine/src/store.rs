//! Storage seam.
//!
//! The engine never holds data itself. It reads through [`ScheduleView`] and
//! writes through [`StoreTx`], always inside [`Store::transaction`], so the
//! conflict check and the write it guards see the same snapshot.
//!
//! [`InMemoryStore`] serializes transactions behind one lock and runs each
//! closure against a working copy that replaces the live state only when the
//! closure returns `Ok`. The audit trail is append-only, so it is moved into
//! the copy rather than cloned and cut back to its old length on rollback.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::archive::ArchivedReservation;
use crate::audit::AuditEntry;
use crate::calendar::{
    CalendarConfig, Room, ScheduleTemplate, ServiceDefinition, Settings, Specialist,
};
use crate::error::EngineError;
use crate::model::{
    ArchiveId, ClosureId, RecurrenceSeries, Reservation, ReservationId, RoomClosure, RoomId,
    SeriesId, ServiceId, SpecialistId, TemplateId,
};
use crate::temporal::TimeSpan;

/// Read access to calendar data and scheduling records.
pub trait ScheduleView {
    fn settings(&self) -> Settings;
    fn service(&self, id: ServiceId) -> Option<ServiceDefinition>;
    fn specialist(&self, id: SpecialistId) -> Option<Specialist>;
    /// All specialists, ordered by id.
    fn specialists(&self) -> Vec<Specialist>;
    fn room(&self, id: RoomId) -> Option<Room>;
    /// All rooms, ordered by id.
    fn rooms(&self) -> Vec<Room>;
    fn template(&self, id: TemplateId) -> Option<ScheduleTemplate>;

    fn reservation(&self, id: ReservationId) -> Option<Reservation>;
    /// Reservations of any status whose span overlaps `span`, ordered by start.
    fn reservations_overlapping(&self, span: &TimeSpan) -> Vec<Reservation>;

    fn series(&self, id: SeriesId) -> Option<RecurrenceSeries>;
    /// Members of a series ordered by start time.
    fn series_members(&self, id: SeriesId) -> Vec<Reservation>;

    fn closure(&self, id: ClosureId) -> Option<RoomClosure>;
    fn closures_overlapping(&self, room: RoomId, span: &TimeSpan) -> Vec<RoomClosure>;

    fn archive(&self, id: ArchiveId) -> Option<ArchivedReservation>;
    /// All archive records, ordered by id.
    fn archives(&self) -> Vec<ArchivedReservation>;

    fn audit_log(&self, reservation: ReservationId) -> Vec<AuditEntry>;
}

/// Writes available inside a transaction.
pub trait StoreTx: ScheduleView {
    fn next_reservation_id(&mut self) -> ReservationId;
    fn next_series_id(&mut self) -> SeriesId;
    fn next_archive_id(&mut self) -> ArchiveId;
    fn next_closure_id(&mut self) -> ClosureId;

    fn put_reservation(&mut self, reservation: Reservation) -> Result<(), EngineError>;
    fn remove_reservation(&mut self, id: ReservationId) -> Result<Reservation, EngineError>;

    fn put_series(&mut self, series: RecurrenceSeries) -> Result<(), EngineError>;
    fn remove_series(&mut self, id: SeriesId) -> Result<RecurrenceSeries, EngineError>;

    fn put_archive(&mut self, record: ArchivedReservation) -> Result<(), EngineError>;
    fn remove_archive(&mut self, id: ArchiveId) -> Result<ArchivedReservation, EngineError>;

    fn put_closure(&mut self, closure: RoomClosure) -> Result<(), EngineError>;
    fn remove_closure(&mut self, id: ClosureId) -> Result<RoomClosure, EngineError>;

    fn put_specialist(&mut self, specialist: Specialist) -> Result<(), EngineError>;

    fn append_audit(&mut self, entry: AuditEntry) -> Result<(), EngineError>;
}

/// A transactional backing store.
pub trait Store: Send + Sync {
    /// Run `f` against a consistent snapshot.
    fn read<T>(&self, f: impl FnOnce(&dyn ScheduleView) -> T) -> T;

    /// Run `f` atomically: every write lands on `Ok`, none on `Err`.
    fn transaction<T>(
        &self,
        f: impl FnOnce(&mut dyn StoreTx) -> Result<T, EngineError>,
    ) -> Result<T, EngineError>;
}

// ── In-memory implementation ────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct Counters {
    reservation: u64,
    series: u64,
    archive: u64,
    closure: u64,
}

/// Complete state of an [`InMemoryStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    settings: Settings,
    services: BTreeMap<ServiceId, ServiceDefinition>,
    specialists: BTreeMap<SpecialistId, Specialist>,
    rooms: BTreeMap<RoomId, Room>,
    templates: BTreeMap<TemplateId, ScheduleTemplate>,
    reservations: BTreeMap<ReservationId, Reservation>,
    series: BTreeMap<SeriesId, RecurrenceSeries>,
    closures: BTreeMap<ClosureId, RoomClosure>,
    archives: BTreeMap<ArchiveId, ArchivedReservation>,
    audit: Vec<AuditEntry>,
    counters: Counters,
}

impl MemoryState {
    fn from_config(config: CalendarConfig) -> Self {
        Self {
            settings: config.settings,
            services: config.services.into_iter().map(|s| (s.id, s)).collect(),
            specialists: config.specialists.into_iter().map(|s| (s.id, s)).collect(),
            rooms: config.rooms.into_iter().map(|r| (r.id, r)).collect(),
            templates: config.templates.into_iter().map(|t| (t.id, t)).collect(),
            ..Self::default()
        }
    }
}

fn missing(entity: &'static str, id: u64) -> EngineError {
    EngineError::NotFound { entity, id }
}

impl ScheduleView for MemoryState {
    fn settings(&self) -> Settings {
        self.settings.clone()
    }

    fn service(&self, id: ServiceId) -> Option<ServiceDefinition> {
        self.services.get(&id).cloned()
    }

    fn specialist(&self, id: SpecialistId) -> Option<Specialist> {
        self.specialists.get(&id).cloned()
    }

    fn specialists(&self) -> Vec<Specialist> {
        self.specialists.values().cloned().collect()
    }

    fn room(&self, id: RoomId) -> Option<Room> {
        self.rooms.get(&id).cloned()
    }

    fn rooms(&self) -> Vec<Room> {
        self.rooms.values().cloned().collect()
    }

    fn template(&self, id: TemplateId) -> Option<ScheduleTemplate> {
        self.templates.get(&id).cloned()
    }

    fn reservation(&self, id: ReservationId) -> Option<Reservation> {
        self.reservations.get(&id).cloned()
    }

    fn reservations_overlapping(&self, span: &TimeSpan) -> Vec<Reservation> {
        let mut found: Vec<Reservation> = self
            .reservations
            .values()
            .filter(|r| r.span().overlaps(span))
            .cloned()
            .collect();
        found.sort_by_key(|r| (r.start(), r.id));
        found
    }

    fn series(&self, id: SeriesId) -> Option<RecurrenceSeries> {
        self.series.get(&id).cloned()
    }

    fn series_members(&self, id: SeriesId) -> Vec<Reservation> {
        let mut members: Vec<Reservation> = self
            .reservations
            .values()
            .filter(|r| r.series_id == Some(id))
            .cloned()
            .collect();
        members.sort_by_key(|r| (r.start(), r.id));
        members
    }

    fn closure(&self, id: ClosureId) -> Option<RoomClosure> {
        self.closures.get(&id).cloned()
    }

    fn closures_overlapping(&self, room: RoomId, span: &TimeSpan) -> Vec<RoomClosure> {
        self.closures
            .values()
            .filter(|c| c.room_id == room && c.span.overlaps(span))
            .cloned()
            .collect()
    }

    fn archive(&self, id: ArchiveId) -> Option<ArchivedReservation> {
        self.archives.get(&id).cloned()
    }

    fn archives(&self) -> Vec<ArchivedReservation> {
        self.archives.values().cloned().collect()
    }

    fn audit_log(&self, reservation: ReservationId) -> Vec<AuditEntry> {
        self.audit
            .iter()
            .filter(|e| e.reservation_id == reservation)
            .cloned()
            .collect()
    }
}

impl StoreTx for MemoryState {
    fn next_reservation_id(&mut self) -> ReservationId {
        self.counters.reservation += 1;
        ReservationId(self.counters.reservation)
    }

    fn next_series_id(&mut self) -> SeriesId {
        self.counters.series += 1;
        SeriesId(self.counters.series)
    }

    fn next_archive_id(&mut self) -> ArchiveId {
        self.counters.archive += 1;
        ArchiveId(self.counters.archive)
    }

    fn next_closure_id(&mut self) -> ClosureId {
        self.counters.closure += 1;
        ClosureId(self.counters.closure)
    }

    fn put_reservation(&mut self, reservation: Reservation) -> Result<(), EngineError> {
        self.reservations.insert(reservation.id, reservation);
        Ok(())
    }

    fn remove_reservation(&mut self, id: ReservationId) -> Result<Reservation, EngineError> {
        self.reservations
            .remove(&id)
            .ok_or_else(|| missing("reservation", id.0))
    }

    fn put_series(&mut self, series: RecurrenceSeries) -> Result<(), EngineError> {
        // Restored series keep their original id; never hand it out again.
        self.counters.series = self.counters.series.max(series.id.0);
        self.series.insert(series.id, series);
        Ok(())
    }

    fn remove_series(&mut self, id: SeriesId) -> Result<RecurrenceSeries, EngineError> {
        self.series.remove(&id).ok_or_else(|| missing("series", id.0))
    }

    fn put_archive(&mut self, record: ArchivedReservation) -> Result<(), EngineError> {
        self.archives.insert(record.id, record);
        Ok(())
    }

    fn remove_archive(&mut self, id: ArchiveId) -> Result<ArchivedReservation, EngineError> {
        self.archives.remove(&id).ok_or_else(|| missing("archive record", id.0))
    }

    fn put_closure(&mut self, closure: RoomClosure) -> Result<(), EngineError> {
        self.closures.insert(closure.id, closure);
        Ok(())
    }

    fn remove_closure(&mut self, id: ClosureId) -> Result<RoomClosure, EngineError> {
        self.closures.remove(&id).ok_or_else(|| missing("closure", id.0))
    }

    fn put_specialist(&mut self, specialist: Specialist) -> Result<(), EngineError> {
        self.specialists.insert(specialist.id, specialist);
        Ok(())
    }

    fn append_audit(&mut self, entry: AuditEntry) -> Result<(), EngineError> {
        self.audit.push(entry);
        Ok(())
    }
}

/// Working copy for one transaction. Unless committed, dropping it hands the
/// audit trail back to the live state with uncommitted entries removed.
struct Working<'a> {
    live: &'a mut MemoryState,
    state: MemoryState,
    audit_len: usize,
    committed: bool,
}

impl<'a> Working<'a> {
    fn new(live: &'a mut MemoryState) -> Self {
        let audit = std::mem::take(&mut live.audit);
        let audit_len = audit.len();
        let mut state = live.clone();
        state.audit = audit;
        Self {
            live,
            state,
            audit_len,
            committed: false,
        }
    }

    fn commit(mut self) {
        std::mem::swap(&mut *self.live, &mut self.state);
        self.committed = true;
    }
}

impl Drop for Working<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let mut audit = std::mem::take(&mut self.state.audit);
            audit.truncate(self.audit_len);
            self.live.audit = audit;
        }
    }
}

/// A serializable, process-local [`Store`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    /// Seed a store from a validated calendar.
    pub fn new(config: CalendarConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            state: Mutex::new(MemoryState::from_config(config)),
        })
    }
}

impl Store for InMemoryStore {
    fn read<T>(&self, f: impl FnOnce(&dyn ScheduleView) -> T) -> T {
        let guard = self.state.lock();
        f(&*guard)
    }

    fn transaction<T>(
        &self,
        f: impl FnOnce(&mut dyn StoreTx) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let mut guard = self.state.lock();
        let mut working = Working::new(&mut guard);
        let out = f(&mut working.state)?;
        working.commit();
        Ok(out)
    }
}
