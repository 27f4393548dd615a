//! Reservation mutations: create, update, reschedule, duplicate, delete.
//!
//! Each function runs inside one store transaction. Validation and domain
//! rules always block. Scheduling conflicts follow the request's
//! [`ConflictPolicy`].

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::archive::{archive_and_remove, DeleteScope};
use crate::audit::{self, field_changes, AuditAction, AuditEntry};
use crate::calendar::{Room, ServiceDefinition, Specialist};
use crate::conflict::{
    self, check_conflicts, detect_occurrence_conflicts, summarize_occurrence_conflicts,
    ConflictPolicy, ConflictQuery, OccurrenceConflict,
};
use crate::error::EngineError;
use crate::model::{
    ActionContext, ArchiveId, Guest, RecurrenceSeries, Reservation, ReservationDraft, ReservationId,
    ReservationStatus, RoomId, SeriesId, ServiceId, SpecialistId,
};
use crate::recurrence::{expand_series, RecurrenceRule};
use crate::series::{
    apply_rebuild, compact_series, detach_member, dissolve_series, plan_rebuild, EditScope,
    RecurrenceEdit,
};
use crate::store::{ScheduleView, StoreTx};
use crate::temporal::format_local;

/// A new reservation, optionally expanded into a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateReservation {
    pub draft: ReservationDraft,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRule>,
    #[serde(default)]
    pub policy: ConflictPolicy,
}

impl CreateReservation {
    /// Step-by-step booking: the chosen slot must be conflict-free.
    pub fn guided(draft: ReservationDraft) -> Self {
        Self {
            draft,
            recurrence: None,
            policy: ConflictPolicy::Block,
        }
    }

    /// Front-desk booking: conflicts are reported, not enforced.
    pub fn quick(draft: ReservationDraft) -> Self {
        Self {
            draft,
            recurrence: None,
            policy: ConflictPolicy::Warn,
        }
    }

    pub fn with_recurrence(mut self, rule: RecurrenceRule) -> Self {
        self.recurrence = Some(rule);
        self
    }
}

/// Fields to change; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReservationChanges {
    #[serde(default)]
    pub guest: Option<Guest>,
    #[serde(default)]
    pub service_id: Option<ServiceId>,
    #[serde(default)]
    pub specialist_id: Option<SpecialistId>,
    #[serde(default)]
    pub room_id: Option<RoomId>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<ReservationStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateReservation {
    pub changes: ReservationChanges,
    #[serde(default)]
    pub recurrence: RecurrenceEdit,
    #[serde(default)]
    pub scope: EditScope,
    #[serde(default)]
    pub policy: ConflictPolicy,
}

impl UpdateReservation {
    pub fn new(changes: ReservationChanges) -> Self {
        Self {
            changes,
            recurrence: RecurrenceEdit::Keep,
            scope: EditScope::Single,
            policy: ConflictPolicy::Warn,
        }
    }

    pub fn with_recurrence(mut self, recurrence: RecurrenceEdit) -> Self {
        self.recurrence = recurrence;
        self
    }

    pub fn with_scope(mut self, scope: EditScope) -> Self {
        self.scope = scope;
        self
    }
}

/// What a create/update/reschedule/duplicate did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MutationOutcome {
    /// The reservation the request was about.
    pub reservation_id: ReservationId,
    pub series_id: Option<SeriesId>,
    /// Every reservation written, in sequence order.
    pub reservation_ids: Vec<ReservationId>,
    pub message: String,
    /// Conflicts accepted under [`ConflictPolicy::Warn`].
    pub conflicts: Vec<OccurrenceConflict>,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeleteOutcome {
    pub archived: Vec<ArchiveId>,
    pub removed: Vec<ReservationId>,
    /// Set when the series went away with its members.
    pub series_removed: Option<SeriesId>,
}

// ── Shared checks ───────────────────────────────────────────────────────────

fn validate_guest(guest: &Guest) -> Result<(), EngineError> {
    if guest.name.trim().is_empty() {
        return Err(EngineError::Validation("guest name must not be empty".to_string()));
    }
    Ok(())
}

/// Resolve references and enforce the blocking domain rules.
fn resolve_for_booking<V: ScheduleView + ?Sized>(
    view: &V,
    service_id: ServiceId,
    specialist_id: SpecialistId,
    room_id: RoomId,
) -> Result<(ServiceDefinition, Specialist, Room), EngineError> {
    let (service, specialist, room) = conflict::resolve(view, service_id, specialist_id, room_id)?;
    if !specialist.can_perform(service.id) {
        return Err(EngineError::DomainRule(format!(
            "specialist {} does not perform service {}",
            specialist.full_name, service.name
        )));
    }
    if !service.accepts_room_type(&room) {
        return Err(EngineError::DomainRule(format!(
            "room {} ({}) is not suitable for service {}",
            room.name, room.room_type, service.name
        )));
    }
    Ok((service, specialist, room))
}

fn query_for(reservation: &Reservation) -> ConflictQuery {
    ConflictQuery::new(
        reservation.start(),
        reservation.service_id,
        reservation.specialist_id,
        reservation.room_id,
    )
}

/// Apply the policy to a single placement.
fn screen_single<V: ScheduleView + ?Sized>(
    view: &V,
    query: &ConflictQuery,
    policy: ConflictPolicy,
) -> Result<(Vec<OccurrenceConflict>, Option<String>), EngineError> {
    let report = check_conflicts(view, query)?;
    if report.is_clear() {
        return Ok((Vec::new(), None));
    }
    match policy {
        ConflictPolicy::Block => Err(EngineError::Conflict(report)),
        ConflictPolicy::Warn => Ok((
            vec![OccurrenceConflict {
                index: 1,
                start: query.start,
                report,
            }],
            Some(format!("Conflict: {report}")),
        )),
    }
}

/// Apply the policy to a set of occurrence conflicts.
fn screen_series(
    conflicts: &[OccurrenceConflict],
    policy: ConflictPolicy,
    tz: Tz,
) -> Result<Option<String>, EngineError> {
    if conflicts.is_empty() {
        return Ok(None);
    }
    match policy {
        ConflictPolicy::Block => Err(EngineError::SeriesConflicts(conflicts.to_vec())),
        ConflictPolicy::Warn => Ok(summarize_occurrence_conflicts(conflicts, tz)),
    }
}

fn not_found(id: ReservationId) -> EngineError {
    EngineError::NotFound {
        entity: "reservation",
        id: id.0,
    }
}

// ── Create ──────────────────────────────────────────────────────────────────

pub(crate) fn create<T: StoreTx + ?Sized>(
    tx: &mut T,
    request: CreateReservation,
    ctx: &ActionContext,
) -> Result<MutationOutcome, EngineError> {
    let CreateReservation {
        draft,
        recurrence,
        policy,
    } = request;
    validate_guest(&draft.guest)?;
    let (service, _, _) =
        resolve_for_booking(tx, draft.service_id, draft.specialist_id, draft.room_id)?;
    let settings = tx.settings();
    let tz = settings.timezone;
    let query = ConflictQuery::new(
        draft.start,
        draft.service_id,
        draft.specialist_id,
        draft.room_id,
    );

    let Some(rule) = recurrence else {
        let (conflicts, warning) = screen_single(tx, &query, policy)?;
        let id = tx.next_reservation_id();
        let reservation = Reservation::new(
            id,
            draft,
            service.duration_minutes,
            settings.buffer_minutes,
            Some(ctx.actor.clone()),
        );
        let message = format!(
            "Reservation for {} at {}",
            reservation.guest.name,
            format_local(tz, reservation.start())
        );
        tx.put_reservation(reservation)?;
        audit::record(tx, AuditEntry::new(id, AuditAction::Created, ctx, message.clone()))?;
        return Ok(MutationOutcome {
            reservation_id: id,
            series_id: None,
            reservation_ids: vec![id],
            message,
            conflicts,
            warning,
        });
    };

    let occurrences = expand_series(&rule, draft.start, tz)?;
    let conflicts = detect_occurrence_conflicts(tx, &occurrences, &query)?;
    let warning = screen_series(&conflicts, policy, tz)?;

    let series_id = tx.next_series_id();
    tx.put_series(RecurrenceSeries {
        id: series_id,
        start: draft.start,
        rule,
        created_by: Some(ctx.actor.clone()),
    })?;

    let total = occurrences.len();
    let mut ids = Vec::with_capacity(total);
    for (position, start) in occurrences.into_iter().enumerate() {
        let id = tx.next_reservation_id();
        let mut reservation = Reservation::new(
            id,
            ReservationDraft {
                start,
                ..draft.clone()
            },
            service.duration_minutes,
            settings.buffer_minutes,
            Some(ctx.actor.clone()),
        );
        let sequence = position as u32 + 1;
        reservation.join_series(series_id, sequence);
        tx.put_reservation(reservation)?;
        audit::record(
            tx,
            AuditEntry::new(
                id,
                AuditAction::SeriesCreated,
                ctx,
                format!("Occurrence {sequence} of {total} in series {series_id}"),
            ),
        )?;
        ids.push(id);
    }

    Ok(MutationOutcome {
        reservation_id: ids[0],
        series_id: Some(series_id),
        reservation_ids: ids,
        message: format!("Series {series_id} created with {total} reservation(s)"),
        conflicts,
        warning,
    })
}

// ── Update ──────────────────────────────────────────────────────────────────

pub(crate) fn update<T: StoreTx + ?Sized>(
    tx: &mut T,
    id: ReservationId,
    request: UpdateReservation,
    ctx: &ActionContext,
) -> Result<MutationOutcome, EngineError> {
    let original = tx.reservation(id).ok_or_else(|| not_found(id))?;
    let UpdateReservation {
        changes,
        recurrence,
        scope,
        policy,
    } = request;

    let mut edited = original.clone();
    if let Some(guest) = changes.guest {
        edited.guest = guest;
    }
    if let Some(service_id) = changes.service_id {
        edited.service_id = service_id;
    }
    if let Some(specialist_id) = changes.specialist_id {
        edited.specialist_id = specialist_id;
    }
    if let Some(room_id) = changes.room_id {
        edited.room_id = room_id;
    }
    if let Some(status) = changes.status {
        edited.status = status;
    }
    validate_guest(&edited.guest)?;
    let (service, _, _) =
        resolve_for_booking(tx, edited.service_id, edited.specialist_id, edited.room_id)?;
    let settings = tx.settings();
    edited.retime(
        changes.start.unwrap_or(original.start()),
        service.duration_minutes,
        settings.buffer_minutes,
    );

    match (recurrence, scope, original.series_id) {
        (RecurrenceEdit::Set(rule), EditScope::Series, _)
        | (RecurrenceEdit::Set(rule), _, None) => {
            rebuild(tx, &original, edited, rule, service.duration_minutes, policy, ctx)
        }
        (RecurrenceEdit::Set(_), EditScope::Single, Some(series_id)) => Err(EngineError::Validation(
            format!("changing the rule of series {series_id} requires series scope"),
        )),
        (RecurrenceEdit::Keep, EditScope::Series, Some(series_id)) => {
            let rule = tx
                .series(series_id)
                .ok_or(EngineError::NotFound {
                    entity: "series",
                    id: series_id.0,
                })?
                .rule;
            rebuild(tx, &original, edited, rule, service.duration_minutes, policy, ctx)
        }
        (RecurrenceEdit::Disable, EditScope::Series, Some(_)) => {
            let removed = dissolve_series(tx, &mut edited, original.start(), ctx)?;
            for removed_id in &removed {
                audit::record(
                    tx,
                    AuditEntry::new(
                        *removed_id,
                        AuditAction::Deleted,
                        ctx,
                        "Removed when recurrence was disabled",
                    ),
                )?;
            }
            let message = format!(
                "Recurrence disabled; {} later reservation(s) removed",
                removed.len()
            );
            save_single(tx, &original, edited, policy, AuditAction::SeriesUpdated, message, ctx)
        }
        (RecurrenceEdit::Disable, EditScope::Single, Some(_)) => {
            detach_member(tx, &mut edited)?;
            save_single(
                tx,
                &original,
                edited,
                policy,
                AuditAction::Updated,
                "Reservation detached from its series".to_string(),
                ctx,
            )
        }
        _ => save_single(
            tx,
            &original,
            edited,
            policy,
            AuditAction::Updated,
            "Reservation updated".to_string(),
            ctx,
        ),
    }
}

fn save_single<T: StoreTx + ?Sized>(
    tx: &mut T,
    original: &Reservation,
    edited: Reservation,
    policy: ConflictPolicy,
    action: AuditAction,
    message: String,
    ctx: &ActionContext,
) -> Result<MutationOutcome, EngineError> {
    let (conflicts, warning) =
        screen_single(tx, &query_for(&edited).excluding([edited.id]), policy)?;
    let changes = field_changes(original, &edited);
    let outcome = MutationOutcome {
        reservation_id: edited.id,
        series_id: edited.series_id,
        reservation_ids: vec![edited.id],
        message: message.clone(),
        conflicts,
        warning,
    };
    let id = edited.id;
    tx.put_reservation(edited)?;
    audit::record(tx, AuditEntry::new(id, action, ctx, message).with_changes(changes))?;
    Ok(outcome)
}

fn rebuild<T: StoreTx + ?Sized>(
    tx: &mut T,
    original: &Reservation,
    edited: Reservation,
    rule: RecurrenceRule,
    duration_minutes: u32,
    policy: ConflictPolicy,
    ctx: &ActionContext,
) -> Result<MutationOutcome, EngineError> {
    let tz = tx.settings().timezone;
    let plan = plan_rebuild(tx, &edited, original.start(), rule, original.series_id)?;
    let warning = screen_series(&plan.conflicts, policy, tz)?;
    let conflicts = plan.conflicts.clone();
    let replaced = plan.replaced.clone();
    let created = plan.series_id.is_none();

    let ids = apply_rebuild(tx, plan, edited, duration_minutes, ctx)?;
    let saved = tx.reservation(original.id).ok_or_else(|| not_found(original.id))?;
    let series_id = saved.series_id;
    let label = series_id.map(|s| s.to_string()).unwrap_or_default();

    for replaced_id in replaced {
        audit::record(
            tx,
            AuditEntry::new(
                replaced_id,
                AuditAction::Deleted,
                ctx,
                format!("Replaced by edit of series {label}"),
            ),
        )?;
    }
    let action = if created {
        AuditAction::SeriesCreated
    } else {
        AuditAction::SeriesUpdated
    };
    audit::record(
        tx,
        AuditEntry::new(original.id, action, ctx, format!("Occurrence 1 of series {label}"))
            .with_changes(field_changes(original, &saved)),
    )?;
    for (position, member) in ids.iter().enumerate().skip(1) {
        audit::record(
            tx,
            AuditEntry::new(
                *member,
                AuditAction::SeriesCreated,
                ctx,
                format!("Occurrence {} of series {label}", position + 1),
            ),
        )?;
    }

    Ok(MutationOutcome {
        reservation_id: original.id,
        series_id,
        message: format!(
            "Series {label} {} with {} reservation(s)",
            if created { "created" } else { "rebuilt" },
            ids.len()
        ),
        reservation_ids: ids,
        conflicts,
        warning,
    })
}

// ── Reschedule / duplicate ──────────────────────────────────────────────────

pub(crate) fn reschedule<T: StoreTx + ?Sized>(
    tx: &mut T,
    id: ReservationId,
    start: DateTime<Utc>,
    ctx: &ActionContext,
) -> Result<MutationOutcome, EngineError> {
    let original = tx.reservation(id).ok_or_else(|| not_found(id))?;
    let service = tx.service(original.service_id).ok_or(EngineError::MissingReference {
        entity: "service",
        id: original.service_id.0,
    })?;
    let settings = tx.settings();
    let mut moved = original.clone();
    moved.retime(start, service.duration_minutes, settings.buffer_minutes);
    let message = format!(
        "Moved from {} to {}",
        format_local(settings.timezone, original.start()),
        format_local(settings.timezone, start)
    );
    save_single(
        tx,
        &original,
        moved,
        ConflictPolicy::Warn,
        AuditAction::TimeChanged,
        message,
        ctx,
    )
}

pub(crate) fn duplicate<T: StoreTx + ?Sized>(
    tx: &mut T,
    id: ReservationId,
    start: DateTime<Utc>,
    ctx: &ActionContext,
) -> Result<MutationOutcome, EngineError> {
    let source = tx.reservation(id).ok_or_else(|| not_found(id))?;
    if let Some(series_id) = source.series_id {
        return Err(EngineError::DomainRule(format!(
            "reservation {id} belongs to series {series_id} and cannot be duplicated"
        )));
    }
    let (service, _, _) =
        resolve_for_booking(tx, source.service_id, source.specialist_id, source.room_id)?;
    let settings = tx.settings();
    let query = ConflictQuery::new(start, source.service_id, source.specialist_id, source.room_id);
    let (conflicts, warning) = screen_single(tx, &query, ConflictPolicy::Warn)?;

    let new_id = tx.next_reservation_id();
    let copy = Reservation::new(
        new_id,
        source.to_draft(start),
        service.duration_minutes,
        settings.buffer_minutes,
        Some(ctx.actor.clone()),
    );
    let message = format!(
        "Duplicated {} to {} at {}",
        id,
        new_id,
        format_local(settings.timezone, start)
    );
    tx.put_reservation(copy)?;
    audit::record(
        tx,
        AuditEntry::new(new_id, AuditAction::Duplicated, ctx, format!("Copy of {id}")),
    )?;
    audit::record(tx, AuditEntry::new(id, AuditAction::Duplicated, ctx, message.clone()))?;

    Ok(MutationOutcome {
        reservation_id: new_id,
        series_id: None,
        reservation_ids: vec![new_id],
        message,
        conflicts,
        warning,
    })
}

// ── Delete ──────────────────────────────────────────────────────────────────

pub(crate) fn delete<T: StoreTx + ?Sized>(
    tx: &mut T,
    id: ReservationId,
    scope: DeleteScope,
    reason: Option<String>,
    ctx: &ActionContext,
) -> Result<DeleteOutcome, EngineError> {
    let reservation = tx.reservation(id).ok_or_else(|| not_found(id))?;

    if let (DeleteScope::Series, Some(series_id)) = (scope, reservation.series_id) {
        let members = tx.series_members(series_id);
        let mut archived = Vec::with_capacity(members.len());
        let mut removed = Vec::with_capacity(members.len());
        for member in members {
            audit::record(
                tx,
                AuditEntry::new(
                    member.id,
                    AuditAction::Deleted,
                    ctx,
                    format!("Deleted with series {series_id}"),
                ),
            )?;
            archived.push(archive_and_remove(
                tx,
                member.id,
                DeleteScope::Series,
                reason.clone(),
                ctx,
            )?);
            removed.push(member.id);
        }
        tx.remove_series(series_id)?;
        return Ok(DeleteOutcome {
            archived,
            removed,
            series_removed: Some(series_id),
        });
    }

    audit::record(tx, AuditEntry::new(id, AuditAction::Deleted, ctx, "Reservation deleted"))?;
    let archive_id = archive_and_remove(tx, id, DeleteScope::Single, reason, ctx)?;
    let series_removed = match reservation.series_id {
        Some(series_id) => compact_series(tx, series_id)?.then_some(series_id),
        None => None,
    };
    Ok(DeleteOutcome {
        archived: vec![archive_id],
        removed: vec![id],
        series_removed,
    })
}
