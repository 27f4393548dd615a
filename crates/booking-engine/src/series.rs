//! Series bookkeeping: sequence compaction, detaching a member, and rebuilding
//! a series around an edited reservation.
//!
//! A rebuild is computed first as a [`SeriesPlan`] against a read-only view,
//! then committed in one batch by [`apply_rebuild`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::archive::{archive_and_remove, DeleteScope};
use crate::conflict::{detect_occurrence_conflicts, ConflictQuery, OccurrenceConflict};
use crate::error::EngineError;
use crate::model::{ActionContext, RecurrenceSeries, Reservation, ReservationId, SeriesId};
use crate::recurrence::{expand_series, RecurrenceRule};
use crate::store::{ScheduleView, StoreTx};

const REPLACED_REASON: &str = "replaced by series edit";
const DISABLED_REASON: &str = "recurrence disabled for series";

/// What an update does to recurrence.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceEdit {
    /// Leave the rule as it is.
    #[default]
    Keep,
    /// Turn recurrence off for the edited reservation (or the whole series).
    Disable,
    /// Apply this rule, creating a series if needed.
    Set(RecurrenceRule),
}

/// Whether an update touches only the edited reservation or its series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditScope {
    #[default]
    Single,
    Series,
}

/// Renumber a series' members `1..N` by start time.
///
/// Returns `true` when the series had no members left and was deleted.
pub(crate) fn compact_series<T: StoreTx + ?Sized>(
    tx: &mut T,
    series_id: SeriesId,
) -> Result<bool, EngineError> {
    let members = tx.series_members(series_id);
    if members.is_empty() {
        if tx.series(series_id).is_some() {
            tx.remove_series(series_id)?;
        }
        debug!(series = %series_id, "empty series removed");
        return Ok(true);
    }
    for (position, mut member) in members.into_iter().enumerate() {
        let sequence = position as u32 + 1;
        if member.sequence != sequence {
            member.sequence = sequence;
            tx.put_reservation(member)?;
        }
    }
    Ok(false)
}

/// Detach `reservation` from its series and compact what remains.
///
/// The caller writes `reservation` afterwards. Returns the former series id.
pub(crate) fn detach_member<T: StoreTx + ?Sized>(
    tx: &mut T,
    reservation: &mut Reservation,
) -> Result<Option<SeriesId>, EngineError> {
    let Some(series_id) = reservation.series_id else {
        return Ok(None);
    };
    reservation.detach();
    tx.put_reservation(reservation.clone())?;
    compact_series(tx, series_id)?;
    Ok(Some(series_id))
}

/// A series rebuild computed ahead of any write.
#[derive(Debug, Clone)]
pub struct SeriesPlan {
    /// Existing series to replace; a new one is allocated when `None`.
    pub series_id: Option<SeriesId>,
    pub anchor: DateTime<Utc>,
    pub rule: RecurrenceRule,
    pub occurrences: Vec<DateTime<Utc>>,
    /// Members at or after the original start; deleted on apply.
    pub replaced: Vec<ReservationId>,
    /// Members strictly before the original start; become standalone.
    pub detached: Vec<ReservationId>,
    pub conflicts: Vec<OccurrenceConflict>,
}

/// Plan a rebuild of the series around `edited`, whose fields already carry
/// the requested changes and whose start is the new anchor.
///
/// # Errors
///
/// [`EngineError::Recurrence`] when the rule yields no occurrences.
pub fn plan_rebuild<V: ScheduleView + ?Sized>(
    view: &V,
    edited: &Reservation,
    original_start: DateTime<Utc>,
    rule: RecurrenceRule,
    existing: Option<SeriesId>,
) -> Result<SeriesPlan, EngineError> {
    let tz = view.settings().timezone;
    let occurrences = expand_series(&rule, edited.start(), tz)?;

    let (replaced, detached) = split_members(view, existing, edited.id, original_start);

    let query = ConflictQuery::new(
        edited.start(),
        edited.service_id,
        edited.specialist_id,
        edited.room_id,
    )
    .excluding(replaced.iter().copied().chain([edited.id]));
    let conflicts = detect_occurrence_conflicts(view, &occurrences, &query)?;

    Ok(SeriesPlan {
        series_id: existing,
        anchor: edited.start(),
        rule,
        occurrences,
        replaced,
        detached,
        conflicts,
    })
}

/// Members other than `edited` split into (at-or-after, strictly-before) the
/// original start.
fn split_members<V: ScheduleView + ?Sized>(
    view: &V,
    series: Option<SeriesId>,
    edited: ReservationId,
    original_start: DateTime<Utc>,
) -> (Vec<ReservationId>, Vec<ReservationId>) {
    let Some(series) = series else {
        return (Vec::new(), Vec::new());
    };
    let (later, earlier): (Vec<Reservation>, Vec<Reservation>) = view
        .series_members(series)
        .into_iter()
        .filter(|m| m.id != edited)
        .partition(|m| m.start() >= original_start);
    (
        later.iter().map(|m| m.id).collect(),
        earlier.iter().map(|m| m.id).collect(),
    )
}

/// Commit a plan. `edited` becomes member 1 at the first occurrence; the
/// remaining occurrences are created as new members. Returns every member id
/// in sequence order.
pub(crate) fn apply_rebuild<T: StoreTx + ?Sized>(
    tx: &mut T,
    plan: SeriesPlan,
    mut edited: Reservation,
    duration_minutes: u32,
    ctx: &ActionContext,
) -> Result<Vec<ReservationId>, EngineError> {
    let buffer = tx.settings().buffer_minutes;
    let series_id = match plan.series_id {
        Some(id) => id,
        None => tx.next_series_id(),
    };
    let created_by = tx
        .series(series_id)
        .and_then(|s| s.created_by)
        .or_else(|| Some(ctx.actor.clone()));

    // Archive before the series is overwritten so snapshots keep the old rule.
    for id in plan.replaced {
        archive_and_remove(tx, id, DeleteScope::Series, Some(REPLACED_REASON.to_string()), ctx)?;
    }
    for id in plan.detached {
        if let Some(mut member) = tx.reservation(id) {
            member.detach();
            tx.put_reservation(member)?;
        }
    }
    tx.put_series(RecurrenceSeries {
        id: series_id,
        start: plan.anchor,
        rule: plan.rule,
        created_by,
    })?;

    let mut occurrences = plan.occurrences.into_iter();
    let first = occurrences.next().ok_or_else(|| {
        EngineError::Recurrence("series rebuild has no occurrences".to_string())
    })?;
    edited.retime(first, duration_minutes, buffer);
    edited.join_series(series_id, 1);
    let mut ids = vec![edited.id];
    let template = edited.clone();
    tx.put_reservation(edited)?;

    for (offset, start) in occurrences.enumerate() {
        let id = tx.next_reservation_id();
        let mut member = Reservation::new(
            id,
            template.to_draft(start),
            duration_minutes,
            buffer,
            Some(ctx.actor.clone()),
        );
        member.join_series(series_id, offset as u32 + 2);
        tx.put_reservation(member)?;
        ids.push(id);
    }
    debug!(series = %series_id, members = ids.len(), "series rebuilt");
    Ok(ids)
}

/// Turn recurrence off for a whole series from `edited` onwards: later members
/// are archived and removed, earlier ones detached, the series deleted.
/// `edited` is detached; the caller writes it.
pub(crate) fn dissolve_series<T: StoreTx + ?Sized>(
    tx: &mut T,
    edited: &mut Reservation,
    original_start: DateTime<Utc>,
    ctx: &ActionContext,
) -> Result<Vec<ReservationId>, EngineError> {
    let Some(series_id) = edited.series_id else {
        return Ok(Vec::new());
    };
    let (later, earlier) = split_members(tx, Some(series_id), edited.id, original_start);
    for id in earlier {
        if let Some(mut member) = tx.reservation(id) {
            member.detach();
            tx.put_reservation(member)?;
        }
    }
    for id in &later {
        archive_and_remove(tx, *id, DeleteScope::Series, Some(DISABLED_REASON.to_string()), ctx)?;
    }
    edited.detach();
    tx.remove_series(series_id)?;
    Ok(later)
}
