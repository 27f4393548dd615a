//! Soft-delete archive and restore.
//!
//! A deleted reservation is captured as a self-contained snapshot before the
//! live record is removed. Snapshots carry a schema version so restore can
//! reject records it cannot read. A restored record is marked once and stays
//! marked; restoring it again is an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::{self, AuditAction, AuditEntry};
use crate::calendar::{Room, ServiceDefinition, Specialist};
use crate::conflict::{check_conflicts, detect_occurrence_conflicts, ConflictQuery, ConflictReport};
use crate::error::EngineError;
use crate::model::{
    ActionContext, Actor, ArchiveId, Guest, RecurrenceSeries, Reservation, ReservationDraft,
    ReservationId, ReservationStatus, RoomId, SeriesId, ServiceId, SpecialistId,
};
use crate::recurrence::{expand_series, RecurrenceRule};
use crate::series::compact_series;
use crate::store::{ScheduleView, StoreTx};

/// Current snapshot layout.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Whether a record was deleted alone or as part of its whole series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteScope {
    Single,
    Series,
}

/// Every field needed to rebuild a reservation, by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationSnapshot {
    pub original_id: ReservationId,
    pub guest: Guest,
    pub service_id: ServiceId,
    pub specialist_id: SpecialistId,
    pub room_id: RoomId,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: ReservationStatus,
    pub series_id: Option<SeriesId>,
    pub sequence: u32,
    pub created_by: Option<Actor>,
}

impl From<&Reservation> for ReservationSnapshot {
    fn from(r: &Reservation) -> Self {
        Self {
            original_id: r.id,
            guest: r.guest.clone(),
            service_id: r.service_id,
            specialist_id: r.specialist_id,
            room_id: r.room_id,
            start: r.start(),
            end: r.end(),
            status: r.status,
            series_id: r.series_id,
            sequence: r.sequence,
            created_by: r.created_by.clone(),
        }
    }
}

impl ReservationSnapshot {
    fn draft(&self) -> ReservationDraft {
        ReservationDraft {
            guest: self.guest.clone(),
            service_id: self.service_id,
            specialist_id: self.specialist_id,
            room_id: self.room_id,
            start: self.start,
            status: self.status,
        }
    }

    fn conflict_query(&self) -> ConflictQuery {
        ConflictQuery::new(self.start, self.service_id, self.specialist_id, self.room_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesSnapshot {
    pub id: SeriesId,
    pub start: DateTime<Utc>,
    pub rule: RecurrenceRule,
    pub created_by: Option<Actor>,
}

impl From<&RecurrenceSeries> for SeriesSnapshot {
    fn from(s: &RecurrenceSeries) -> Self {
        Self {
            id: s.id,
            start: s.start,
            rule: s.rule.clone(),
            created_by: s.created_by.clone(),
        }
    }
}

impl From<&SeriesSnapshot> for RecurrenceSeries {
    fn from(s: &SeriesSnapshot) -> Self {
        Self {
            id: s.id,
            start: s.start,
            rule: s.rule.clone(),
            created_by: s.created_by.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreMark {
    pub by: Actor,
    pub at: DateTime<Utc>,
}

/// An archived reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedReservation {
    pub id: ArchiveId,
    pub schema_version: u32,
    pub reservation: ReservationSnapshot,
    pub series: Option<SeriesSnapshot>,
    pub scope: DeleteScope,
    pub deleted_by: Actor,
    pub deleted_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub restored: Option<RestoreMark>,
}

impl ArchivedReservation {
    pub fn is_restored(&self) -> bool {
        self.restored.is_some()
    }

    pub fn series_id(&self) -> Option<SeriesId> {
        self.series.as_ref().map(|s| s.id)
    }
}

/// Result of restoring one record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreOutcome {
    pub archive_id: ArchiveId,
    pub reservation_id: ReservationId,
    /// Conflicts found at restore time. Advisory: the restore went through.
    pub conflicts: ConflictReport,
}

/// A series member that could not be restored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestoreFailure {
    pub archive_id: ArchiveId,
    pub original_id: ReservationId,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesRestoreOutcome {
    pub series_id: SeriesId,
    pub restored: Vec<RestoreOutcome>,
    pub failures: Vec<RestoreFailure>,
}

/// What restoring a record would do, computed without writing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestorePreview {
    pub archive_id: ArchiveId,
    pub already_restored: bool,
    /// Referenced entities that no longer exist, e.g. `"room #3"`.
    pub missing_references: Vec<String>,
    pub conflicts: ConflictReport,
    /// Live series the record would rejoin, if it still exists.
    pub rejoins_series: Option<SeriesId>,
}

// ── Archiving ───────────────────────────────────────────────────────────────

/// Snapshot a live reservation into the archive and remove it.
pub(crate) fn archive_and_remove<T: StoreTx + ?Sized>(
    tx: &mut T,
    reservation_id: ReservationId,
    scope: DeleteScope,
    reason: Option<String>,
    ctx: &ActionContext,
) -> Result<ArchiveId, EngineError> {
    let reservation = tx.remove_reservation(reservation_id)?;
    let series = reservation
        .series_id
        .and_then(|id| tx.series(id))
        .map(|s| SeriesSnapshot::from(&s));
    let id = tx.next_archive_id();
    tx.put_archive(ArchivedReservation {
        id,
        schema_version: SNAPSHOT_SCHEMA_VERSION,
        reservation: ReservationSnapshot::from(&reservation),
        series,
        scope,
        deleted_by: ctx.actor.clone(),
        deleted_at: ctx.now,
        reason,
        restored: None,
    })?;
    Ok(id)
}

// ── Restoring ───────────────────────────────────────────────────────────────

fn load_unrestored<V: ScheduleView + ?Sized>(
    view: &V,
    archive_id: ArchiveId,
) -> Result<ArchivedReservation, EngineError> {
    let record = view.archive(archive_id).ok_or(EngineError::NotFound {
        entity: "archive record",
        id: archive_id.0,
    })?;
    if record.is_restored() {
        return Err(EngineError::AlreadyRestored(archive_id.0));
    }
    if record.schema_version > SNAPSHOT_SCHEMA_VERSION {
        return Err(EngineError::Validation(format!(
            "archive record {} has unsupported schema version {}",
            archive_id, record.schema_version
        )));
    }
    Ok(record)
}

/// Entities the snapshot references that are gone.
fn missing_references<V: ScheduleView + ?Sized>(
    view: &V,
    snapshot: &ReservationSnapshot,
) -> Vec<EngineError> {
    let mut missing = Vec::new();
    if view.service(snapshot.service_id).is_none() {
        missing.push(EngineError::MissingReference {
            entity: "service",
            id: snapshot.service_id.0,
        });
    }
    if view.specialist(snapshot.specialist_id).is_none() {
        missing.push(EngineError::MissingReference {
            entity: "specialist",
            id: snapshot.specialist_id.0,
        });
    }
    if view.room(snapshot.room_id).is_none() {
        missing.push(EngineError::MissingReference {
            entity: "room",
            id: snapshot.room_id.0,
        });
    }
    missing
}

fn resolve_snapshot<V: ScheduleView + ?Sized>(
    view: &V,
    snapshot: &ReservationSnapshot,
) -> Result<(ServiceDefinition, Specialist, Room), EngineError> {
    if let Some(err) = missing_references(view, snapshot).into_iter().next() {
        return Err(err);
    }
    crate::conflict::resolve(view, snapshot.service_id, snapshot.specialist_id, snapshot.room_id)
}

/// Restore one archived reservation.
///
/// Conflicts are reported but do not block. The record rejoins its series,
/// recreating the series from the snapshot when it no longer exists.
pub fn restore_reservation<T: StoreTx + ?Sized>(
    tx: &mut T,
    archive_id: ArchiveId,
    ctx: &ActionContext,
) -> Result<RestoreOutcome, EngineError> {
    let mut record = load_unrestored(tx, archive_id)?;
    let snapshot = record.reservation.clone();
    let (service, _, _) = resolve_snapshot(tx, &snapshot)?;

    let conflicts = check_conflicts(tx, &snapshot.conflict_query())?;
    if conflicts.any() {
        warn!(archive = %archive_id, %conflicts, "restoring into a conflicting slot");
    }

    let series_id = match &record.series {
        Some(series) => {
            if tx.series(series.id).is_none() {
                tx.put_series(RecurrenceSeries::from(series))?;
            }
            Some(series.id)
        }
        None => None,
    };

    let settings = tx.settings();
    let id = tx.next_reservation_id();
    let created_by = snapshot.created_by.clone().or_else(|| Some(ctx.actor.clone()));
    let mut reservation = Reservation::new(
        id,
        snapshot.draft(),
        service.duration_minutes,
        settings.buffer_minutes,
        created_by,
    );
    if let Some(series_id) = series_id {
        reservation.join_series(series_id, snapshot.sequence);
    }
    tx.put_reservation(reservation)?;
    if let Some(series_id) = series_id {
        compact_series(tx, series_id)?;
    }

    record.restored = Some(RestoreMark {
        by: ctx.actor.clone(),
        at: ctx.now,
    });
    tx.put_archive(record)?;

    audit::record(
        tx,
        AuditEntry::new(
            id,
            AuditAction::Restored,
            ctx,
            format!(
                "Restored from archive {} (was reservation {})",
                archive_id, snapshot.original_id
            ),
        ),
    )?;

    Ok(RestoreOutcome {
        archive_id,
        reservation_id: id,
        conflicts,
    })
}

/// Restore every unrestored record of the series `archive_id` belongs to.
///
/// The series is regenerated from its snapshot and every occurrence is
/// checked first; any conflict aborts the whole restore. After that, members
/// are restored one by one and individual failures are collected instead of
/// aborting.
pub fn restore_series<T: StoreTx + ?Sized>(
    tx: &mut T,
    archive_id: ArchiveId,
    ctx: &ActionContext,
) -> Result<SeriesRestoreOutcome, EngineError> {
    let record = load_unrestored(tx, archive_id)?;
    let series = record.series.clone().ok_or_else(|| {
        EngineError::Validation(format!("archive record {archive_id} is not part of a series"))
    })?;

    let mut pending: Vec<ArchivedReservation> = tx
        .archives()
        .into_iter()
        .filter(|a| a.series_id() == Some(series.id) && !a.is_restored())
        .collect();
    if pending.is_empty() {
        return Err(EngineError::AlreadyRestored(archive_id.0));
    }
    pending.sort_by_key(|a| (a.reservation.sequence, a.reservation.start, a.id));

    let template = &pending[0].reservation;
    resolve_snapshot(tx, template)?;
    let live: Vec<ReservationId> = tx.series_members(series.id).iter().map(|r| r.id).collect();
    let occurrences = expand_series(&series.rule, series.start, tx.settings().timezone)?;
    let conflicts =
        detect_occurrence_conflicts(tx, &occurrences, &template.conflict_query().excluding(live))?;
    if !conflicts.is_empty() {
        return Err(EngineError::SeriesConflicts(conflicts));
    }

    let mut restored = Vec::new();
    let mut failures = Vec::new();
    for member in pending {
        match restore_reservation(tx, member.id, ctx) {
            Ok(outcome) => restored.push(outcome),
            Err(err @ EngineError::Store(_)) => return Err(err),
            Err(err) => failures.push(RestoreFailure {
                archive_id: member.id,
                original_id: member.reservation.original_id,
                error: err.to_string(),
            }),
        }
    }

    info!(
        series = %series.id,
        restored = restored.len(),
        failed = failures.len(),
        "series restore finished"
    );
    Ok(SeriesRestoreOutcome {
        series_id: series.id,
        restored,
        failures,
    })
}

/// Report what [`restore_reservation`] would find, without writing.
pub fn preview_restore<V: ScheduleView + ?Sized>(
    view: &V,
    archive_id: ArchiveId,
) -> Result<RestorePreview, EngineError> {
    let record = view.archive(archive_id).ok_or(EngineError::NotFound {
        entity: "archive record",
        id: archive_id.0,
    })?;
    let missing = missing_references(view, &record.reservation);
    let conflicts = if missing.is_empty() {
        check_conflicts(view, &record.reservation.conflict_query())?
    } else {
        ConflictReport::default()
    };
    Ok(RestorePreview {
        archive_id,
        already_restored: record.is_restored(),
        missing_references: missing
            .iter()
            .filter_map(|e| match e {
                EngineError::MissingReference { entity, id } => Some(format!("{entity} #{id}")),
                _ => None,
            })
            .collect(),
        conflicts,
        rejoins_series: record.series_id().filter(|id| view.series(*id).is_some()),
    })
}

/// Archive records, newest first, optionally filtered by delete scope.
pub fn list_archives<V: ScheduleView + ?Sized>(
    view: &V,
    scope: Option<DeleteScope>,
) -> Vec<ArchivedReservation> {
    let mut records: Vec<ArchivedReservation> = view
        .archives()
        .into_iter()
        .filter(|a| scope.is_none_or(|s| a.scope == s))
        .collect();
    records.sort_by(|a, b| b.deleted_at.cmp(&a.deleted_at).then(b.id.cmp(&a.id)));
    records
}

/// Permanently drop an archive record. Restored records are kept as history.
pub fn purge<T: StoreTx + ?Sized>(
    tx: &mut T,
    archive_id: ArchiveId,
) -> Result<ArchivedReservation, EngineError> {
    let record = tx.archive(archive_id).ok_or(EngineError::NotFound {
        entity: "archive record",
        id: archive_id.0,
    })?;
    if record.is_restored() {
        return Err(EngineError::DomainRule(format!(
            "archive record {archive_id} was restored and cannot be purged"
        )));
    }
    tx.remove_archive(archive_id)
}
