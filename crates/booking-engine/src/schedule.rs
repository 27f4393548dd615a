//! Room closures and specialist working-hour management.

use chrono::Weekday;
use tracing::info;

use crate::calendar::{Specialist, WorkingHours};
use crate::conflict::ConflictReport;
use crate::error::EngineError;
use crate::model::{ActionContext, ClosureId, RoomClosure, RoomId, SpecialistId, TemplateId};
use crate::store::StoreTx;
use crate::temporal::TimeSpan;

fn load_specialist<T: StoreTx + ?Sized>(
    tx: &T,
    id: SpecialistId,
) -> Result<Specialist, EngineError> {
    tx.specialist(id).ok_or(EngineError::NotFound {
        entity: "specialist",
        id: id.0,
    })
}

/// Close a room for `span`. Refused while a blocking reservation occupies it.
pub(crate) fn create_closure<T: StoreTx + ?Sized>(
    tx: &mut T,
    room_id: RoomId,
    span: TimeSpan,
    reason: String,
    ctx: &ActionContext,
) -> Result<ClosureId, EngineError> {
    let span = TimeSpan::new(span.start, span.end)?;
    if tx.room(room_id).is_none() {
        return Err(EngineError::NotFound {
            entity: "room",
            id: room_id.0,
        });
    }
    let occupied = tx
        .reservations_overlapping(&span)
        .into_iter()
        .any(|r| r.room_id == room_id && r.status.blocks_resources());
    if occupied {
        return Err(EngineError::Conflict(ConflictReport {
            room_busy: true,
            ..ConflictReport::default()
        }));
    }

    let id = tx.next_closure_id();
    tx.put_closure(RoomClosure {
        id,
        room_id,
        span,
        reason,
        created_by: Some(ctx.actor.clone()),
    })?;
    info!(closure = %id, room = %room_id, actor = %ctx.actor, "room closed");
    Ok(id)
}

pub(crate) fn delete_closure<T: StoreTx + ?Sized>(
    tx: &mut T,
    id: ClosureId,
    ctx: &ActionContext,
) -> Result<RoomClosure, EngineError> {
    let closure = tx.remove_closure(id)?;
    info!(closure = %id, room = %closure.room_id, actor = %ctx.actor, "room closure removed");
    Ok(closure)
}

/// Set or clear one weekday of a specialist's hours.
pub(crate) fn set_working_hours<T: StoreTx + ?Sized>(
    tx: &mut T,
    specialist_id: SpecialistId,
    weekday: Weekday,
    hours: Option<WorkingHours>,
    ctx: &ActionContext,
) -> Result<(), EngineError> {
    let mut specialist = load_specialist(tx, specialist_id)?;
    match hours {
        Some(h) => specialist.hours.set(weekday, WorkingHours::new(h.start, h.end)?),
        None => specialist.hours.clear(weekday),
    }
    tx.put_specialist(specialist)?;
    info!(specialist = %specialist_id, ?weekday, actor = %ctx.actor, "working hours changed");
    Ok(())
}

/// Copy every weekday `source` works onto `target`. Days the source does not
/// work are left untouched on the target. Returns the number of days written.
pub(crate) fn copy_schedule<T: StoreTx + ?Sized>(
    tx: &mut T,
    source: SpecialistId,
    target: SpecialistId,
    ctx: &ActionContext,
) -> Result<usize, EngineError> {
    if source == target {
        return Err(EngineError::Validation(
            "cannot copy a schedule onto the same specialist".to_string(),
        ));
    }
    let from = load_specialist(tx, source)?;
    let mut to = load_specialist(tx, target)?;
    let mut written = 0;
    for (day, hours) in from.hours.iter() {
        to.hours.set(day, hours);
        written += 1;
    }
    tx.put_specialist(to)?;
    info!(%source, %target, days = written, actor = %ctx.actor, "schedule copied");
    Ok(written)
}

/// Stamp a template's days onto a specialist, upserting per weekday.
pub(crate) fn apply_template<T: StoreTx + ?Sized>(
    tx: &mut T,
    template_id: TemplateId,
    specialist_id: SpecialistId,
    ctx: &ActionContext,
) -> Result<usize, EngineError> {
    let template = tx.template(template_id).ok_or(EngineError::NotFound {
        entity: "template",
        id: template_id.0,
    })?;
    let mut specialist = load_specialist(tx, specialist_id)?;
    let mut written = 0;
    for (day, hours) in template.days.iter() {
        specialist.hours.set(day, hours);
        written += 1;
    }
    tx.put_specialist(specialist)?;
    info!(
        template = %template_id,
        specialist = %specialist_id,
        days = written,
        actor = %ctx.actor,
        "template applied"
    );
    Ok(written)
}
