//! Slot search: every (start, specialist) on a date where a service fits,
//! together with the rooms that can host it.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calendar::Room;
use crate::error::EngineError;
use crate::model::{RoomId, ServiceId, SpecialistId};
use crate::store::ScheduleView;
use crate::temporal::{local_day, localize, TimeSpan};

/// A bookable start for one specialist and the rooms free at that time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: DateTime<Utc>,
    pub specialist_id: SpecialistId,
    /// Never empty; ordered by id.
    pub room_ids: Vec<RoomId>,
}

/// Enumerate valid slots for `service_id` on the local calendar date `date`.
///
/// Starts walk each specialist's working range on the configured grid step.
/// A start is kept when the whole reserved span (duration plus buffer) lies
/// inside the range, the specialist has no blocking overlap, and at least one
/// active compatible room is free and not closed. The result is sorted by
/// start, then specialist id.
///
/// # Errors
///
/// [`EngineError::NotFound`] for an unknown service.
pub fn find_available_slots<V: ScheduleView + ?Sized>(
    view: &V,
    date: NaiveDate,
    service_id: ServiceId,
) -> Result<Vec<Slot>, EngineError> {
    let service = view.service(service_id).ok_or(EngineError::NotFound {
        entity: "service",
        id: service_id.0,
    })?;
    let settings = view.settings();
    let tz = settings.timezone;
    let step = Duration::minutes(i64::from(settings.slot_step_minutes.max(1)));
    let total = Duration::minutes(i64::from(service.duration_minutes + settings.buffer_minutes));

    let rooms: Vec<Room> = view.rooms().into_iter().filter(|r| service.can_use(r)).collect();
    if rooms.is_empty() {
        debug!(service = %service_id, "no compatible rooms");
        return Ok(Vec::new());
    }

    let day = local_day(tz, date)?;
    let blocking: Vec<_> = view
        .reservations_overlapping(&day)
        .into_iter()
        .filter(|r| r.status.blocks_resources())
        .collect();
    let closures: BTreeMap<RoomId, Vec<TimeSpan>> = rooms
        .iter()
        .map(|r| {
            let spans = view
                .closures_overlapping(r.id, &day)
                .into_iter()
                .map(|c| c.span)
                .collect();
            (r.id, spans)
        })
        .collect();

    let mut merged: BTreeMap<(DateTime<Utc>, SpecialistId), BTreeSet<RoomId>> = BTreeMap::new();

    for specialist in view.specialists() {
        if !specialist.can_perform(service_id) {
            continue;
        }
        let Some(hours) = specialist.hours.on(date.weekday()) else {
            continue;
        };
        let range_end = date.and_time(hours.end);
        let mut point = date.and_time(hours.start);

        while point + total <= range_end {
            let start = localize(tz, point)?;
            let span = TimeSpan::reserved(start, service.duration_minutes, settings.buffer_minutes);
            point += step;

            let specialist_busy = blocking
                .iter()
                .any(|r| r.specialist_id == specialist.id && r.span().overlaps(&span));
            if specialist_busy {
                continue;
            }

            let free: Vec<RoomId> = rooms
                .iter()
                .filter(|room| {
                    let occupied = blocking
                        .iter()
                        .any(|r| r.room_id == room.id && r.span().overlaps(&span));
                    let closed = closures
                        .get(&room.id)
                        .is_some_and(|spans| spans.iter().any(|c| c.overlaps(&span)));
                    !occupied && !closed
                })
                .map(|room| room.id)
                .collect();
            if free.is_empty() {
                continue;
            }
            merged.entry((start, specialist.id)).or_default().extend(free);
        }
    }

    let slots: Vec<Slot> = merged
        .into_iter()
        .map(|((start, specialist_id), rooms)| Slot {
            start,
            specialist_id,
            room_ids: rooms.into_iter().collect(),
        })
        .collect();
    debug!(service = %service_id, %date, count = slots.len(), "slot search finished");
    Ok(slots)
}

/// Active rooms whose type the service accepts, ordered by id.
pub fn available_rooms<V: ScheduleView + ?Sized>(
    view: &V,
    service_id: ServiceId,
) -> Result<Vec<Room>, EngineError> {
    let service = view.service(service_id).ok_or(EngineError::NotFound {
        entity: "service",
        id: service_id.0,
    })?;
    Ok(view.rooms().into_iter().filter(|r| service.can_use(r)).collect())
}
