//! Conflict detection for a single candidate placement and for expanded series.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Datelike, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::calendar::{Room, ServiceDefinition, Specialist};
use crate::error::EngineError;
use crate::model::{ReservationId, RoomId, ServiceId, SpecialistId};
use crate::store::ScheduleView;
use crate::temporal::{format_local, to_local, TimeSpan};

/// How many conflicting occurrences a warning spells out before "and more".
const WARNING_PREVIEW: usize = 3;

/// Independent conflict flags for one placement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    /// Another blocking reservation overlaps on the same specialist.
    pub specialist_busy: bool,
    /// Another blocking reservation overlaps in the same room.
    pub room_busy: bool,
    /// The span falls outside the specialist's working hours for that weekday.
    pub specialist_not_available: bool,
    /// The room is inactive or closed during the span.
    pub room_not_available: bool,
}

impl ConflictReport {
    pub fn is_clear(&self) -> bool {
        !self.any()
    }

    pub fn any(&self) -> bool {
        self.specialist_busy
            || self.room_busy
            || self.specialist_not_available
            || self.room_not_available
    }

    /// Short labels of the raised flags, in a fixed order.
    pub fn reasons(&self) -> Vec<&'static str> {
        [
            (self.specialist_busy, "specialist busy"),
            (self.room_busy, "room busy"),
            (self.specialist_not_available, "specialist not working"),
            (self.room_not_available, "room not available"),
        ]
        .into_iter()
        .filter_map(|(raised, label)| raised.then_some(label))
        .collect()
    }
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clear() {
            return f.write_str("no conflicts");
        }
        f.write_str(&self.reasons().join(", "))
    }
}

/// A conflicting occurrence of an expanded series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OccurrenceConflict {
    /// 1-based position in the expansion.
    pub index: usize,
    pub start: DateTime<Utc>,
    pub report: ConflictReport,
}

/// What a caller asks the detector about.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictQuery {
    pub start: DateTime<Utc>,
    pub service_id: ServiceId,
    pub specialist_id: SpecialistId,
    pub room_id: RoomId,
    /// Reservations to ignore, e.g. the one being edited.
    pub exclude: BTreeSet<ReservationId>,
}

impl ConflictQuery {
    pub fn new(
        start: DateTime<Utc>,
        service_id: ServiceId,
        specialist_id: SpecialistId,
        room_id: RoomId,
    ) -> Self {
        Self {
            start,
            service_id,
            specialist_id,
            room_id,
            exclude: BTreeSet::new(),
        }
    }

    pub fn excluding(mut self, ids: impl IntoIterator<Item = ReservationId>) -> Self {
        self.exclude.extend(ids);
        self
    }

    fn at(&self, start: DateTime<Utc>) -> Self {
        Self { start, ..self.clone() }
    }
}

/// Whether a detected conflict stops the operation or rides along as a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    Block,
    #[default]
    Warn,
}

/// Resolved inputs for a placement check.
pub(crate) struct Placement<'a> {
    pub service: &'a ServiceDefinition,
    pub specialist: &'a Specialist,
    pub room: &'a Room,
}

impl<'a> Placement<'a> {
    /// Evaluate one start time against the view.
    pub(crate) fn evaluate<V: ScheduleView + ?Sized>(
        &self,
        view: &V,
        start: DateTime<Utc>,
        exclude: &BTreeSet<ReservationId>,
    ) -> ConflictReport {
        let settings = view.settings();
        let span =
            TimeSpan::reserved(start, self.service.duration_minutes, settings.buffer_minutes);

        let mut report = ConflictReport {
            specialist_not_available: !within_hours(
                self.specialist,
                settings.timezone,
                start,
                self.service.duration_minutes + settings.buffer_minutes,
            ),
            room_not_available: !self.room.active
                || !view.closures_overlapping(self.room.id, &span).is_empty(),
            ..ConflictReport::default()
        };

        for other in view.reservations_overlapping(&span) {
            if !other.status.blocks_resources() || exclude.contains(&other.id) {
                continue;
            }
            report.specialist_busy |= other.specialist_id == self.specialist.id;
            report.room_busy |= other.room_id == self.room.id;
        }
        report
    }
}

/// Whether `[start, start + minutes)` fits inside the specialist's hours for
/// the local weekday of `start`. Both ends are read on the wall clock, so a
/// DST change inside the interval moves the end with it.
fn within_hours(specialist: &Specialist, tz: Tz, start: DateTime<Utc>, minutes: u32) -> bool {
    let local_start = to_local(tz, start);
    let Some(hours) = specialist.hours.on(local_start.weekday()) else {
        return false;
    };
    let local_end = to_local(tz, start + Duration::minutes(i64::from(minutes)));
    local_start.time() >= hours.start && local_end <= local_start.date().and_time(hours.end)
}

/// Look up the service, specialist, and room a query names.
pub(crate) fn resolve<V: ScheduleView + ?Sized>(
    view: &V,
    service_id: ServiceId,
    specialist_id: SpecialistId,
    room_id: RoomId,
) -> Result<(ServiceDefinition, Specialist, Room), EngineError> {
    let service = view.service(service_id).ok_or(EngineError::NotFound {
        entity: "service",
        id: service_id.0,
    })?;
    let specialist = view.specialist(specialist_id).ok_or(EngineError::NotFound {
        entity: "specialist",
        id: specialist_id.0,
    })?;
    let room = view.room(room_id).ok_or(EngineError::NotFound {
        entity: "room",
        id: room_id.0,
    })?;
    Ok((service, specialist, room))
}

/// Report every way the candidate placement collides with the current schedule.
///
/// # Errors
///
/// [`EngineError::NotFound`] if the service, specialist, or room is unknown.
pub fn check_conflicts<V: ScheduleView + ?Sized>(
    view: &V,
    query: &ConflictQuery,
) -> Result<ConflictReport, EngineError> {
    let (service, specialist, room) =
        resolve(view, query.service_id, query.specialist_id, query.room_id)?;
    let placement = Placement {
        service: &service,
        specialist: &specialist,
        room: &room,
    };
    Ok(placement.evaluate(view, query.start, &query.exclude))
}

/// Check each occurrence of an expansion with the resources of `template`.
/// Only conflicting occurrences are returned.
pub fn detect_occurrence_conflicts<V: ScheduleView + ?Sized>(
    view: &V,
    occurrences: &[DateTime<Utc>],
    template: &ConflictQuery,
) -> Result<Vec<OccurrenceConflict>, EngineError> {
    let mut conflicts = Vec::new();
    for (i, start) in occurrences.iter().enumerate() {
        let report = check_conflicts(view, &template.at(*start))?;
        if report.any() {
            conflicts.push(OccurrenceConflict {
                index: i + 1,
                start: *start,
                report,
            });
        }
    }
    Ok(conflicts)
}

/// Human warning for occurrence conflicts: the first few dates, then "and more".
pub fn summarize_occurrence_conflicts(conflicts: &[OccurrenceConflict], tz: Tz) -> Option<String> {
    if conflicts.is_empty() {
        return None;
    }
    let mut listed: Vec<String> = conflicts
        .iter()
        .take(WARNING_PREVIEW)
        .map(|c| format!("{} ({})", format_local(tz, c.start), c.report))
        .collect();
    if conflicts.len() > WARNING_PREVIEW {
        listed.push("and more".to_string());
    }
    Some(format!(
        "Conflicts in {} occurrence(s): {}",
        conflicts.len(),
        listed.join("; ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{CalendarConfig, WorkingHours};
    use crate::model::{
        ClosureId, Guest, Reservation, ReservationDraft, ReservationStatus, RoomClosure,
    };
    use crate::store::{InMemoryStore, Store, StoreTx};
    use chrono::{NaiveTime, TimeZone, Weekday};

    const CALENDAR: &str = r#"{
        "settings": { "timezone": "UTC", "buffer_minutes": 15 },
        "services": [
            { "id": 1, "name": "Massage", "duration_minutes": 60, "required_room_types": ["massage"] }
        ],
        "specialists": [
            { "id": 1, "full_name": "Mira", "services": [1],
              "hours": [ { "weekday": "Mon", "start": "09:00:00", "end": "18:00:00" } ] },
            { "id": 2, "full_name": "Oleg", "services": [1],
              "hours": [ { "weekday": "Mon", "start": "09:00:00", "end": "18:00:00" } ] }
        ],
        "rooms": [
            { "id": 1, "name": "Blue", "room_type": "massage" },
            { "id": 2, "name": "Green", "room_type": "massage" }
        ]
    }"#;

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 16, h, m, 0).unwrap()
    }

    fn store() -> InMemoryStore {
        InMemoryStore::new(CalendarConfig::from_json_str(CALENDAR).unwrap()).unwrap()
    }

    fn book(
        store: &InMemoryStore,
        specialist: u64,
        room: u64,
        start: DateTime<Utc>,
        status: ReservationStatus,
    ) -> ReservationId {
        store
            .transaction(|tx| {
                let id = tx.next_reservation_id();
                let draft = ReservationDraft {
                    guest: Guest::new("Ada"),
                    service_id: ServiceId(1),
                    specialist_id: SpecialistId(specialist),
                    room_id: RoomId(room),
                    start,
                    status,
                };
                tx.put_reservation(Reservation::new(id, draft, 60, 15, None))?;
                Ok(id)
            })
            .unwrap()
    }

    fn query(specialist: u64, room: u64, start: DateTime<Utc>) -> ConflictQuery {
        ConflictQuery::new(start, ServiceId(1), SpecialistId(specialist), RoomId(room))
    }

    #[test]
    fn test_clear_when_schedule_empty() {
        let store = store();
        let report = store.read(|v| check_conflicts(v, &query(1, 1, utc(10, 0)))).unwrap();
        assert!(report.is_clear());
    }

    #[test]
    fn test_specialist_busy_but_room_free() {
        let store = store();
        book(&store, 1, 1, utc(10, 0), ReservationStatus::Confirmed);
        let report = store.read(|v| check_conflicts(v, &query(1, 2, utc(10, 30)))).unwrap();
        assert!(report.specialist_busy);
        assert!(!report.room_busy);
        assert!(!report.specialist_not_available);
        assert!(!report.room_not_available);
    }

    #[test]
    fn test_room_busy_for_other_specialist() {
        let store = store();
        book(&store, 1, 1, utc(10, 0), ReservationStatus::Paid);
        let report = store.read(|v| check_conflicts(v, &query(2, 1, utc(10, 30)))).unwrap();
        assert!(report.room_busy);
        assert!(!report.specialist_busy);
    }

    #[test]
    fn test_buffer_extends_the_blocked_span() {
        let store = store();
        book(&store, 1, 1, utc(10, 0), ReservationStatus::Confirmed);
        // Existing span is [10:00, 11:15).
        let touching = store.read(|v| check_conflicts(v, &query(1, 1, utc(11, 15)))).unwrap();
        let inside_buffer = store.read(|v| check_conflicts(v, &query(1, 1, utc(11, 0)))).unwrap();
        assert!(touching.is_clear());
        assert!(inside_buffer.specialist_busy && inside_buffer.room_busy);
    }

    #[test]
    fn test_non_blocking_statuses_are_ignored() {
        let store = store();
        book(&store, 1, 1, utc(10, 0), ReservationStatus::Canceled);
        book(&store, 1, 1, utc(10, 0), ReservationStatus::Unconfirmed);
        let report = store.read(|v| check_conflicts(v, &query(1, 1, utc(10, 0)))).unwrap();
        assert!(report.is_clear());
    }

    #[test]
    fn test_excluded_reservation_does_not_conflict_with_itself() {
        let store = store();
        let id = book(&store, 1, 1, utc(10, 0), ReservationStatus::Confirmed);
        let q = query(1, 1, utc(10, 30)).excluding([id]);
        assert!(store.read(|v| check_conflicts(v, &q)).unwrap().is_clear());
    }

    #[test]
    fn test_outside_working_hours() {
        let store = store();
        // 17:00 + 75 min ends after 18:00.
        let late = store.read(|v| check_conflicts(v, &query(1, 1, utc(17, 0)))).unwrap();
        assert!(late.specialist_not_available);
        // 2026-03-17 is a Tuesday with no hours.
        let tuesday = Utc.with_ymd_and_hms(2026, 3, 17, 10, 0, 0).unwrap();
        let off = store.read(|v| check_conflicts(v, &query(1, 1, tuesday))).unwrap();
        assert!(off.specialist_not_available);
    }

    #[test]
    fn test_closure_marks_room_not_available() {
        let store = store();
        store
            .transaction(|tx| {
                tx.put_closure(RoomClosure {
                    id: ClosureId(1),
                    room_id: RoomId(1),
                    span: TimeSpan::new(utc(12, 0), utc(13, 0)).unwrap(),
                    reason: "repairs".to_string(),
                    created_by: None,
                })
            })
            .unwrap();
        let report = store.read(|v| check_conflicts(v, &query(1, 1, utc(11, 30)))).unwrap();
        assert!(report.room_not_available);
        assert!(!report.room_busy);
    }

    #[test]
    fn test_unknown_room_is_not_found() {
        let store = store();
        let err = store.read(|v| check_conflicts(v, &query(1, 99, utc(10, 0)))).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { entity: "room", id: 99 }));
    }

    #[test]
    fn test_occurrence_conflicts_are_indexed_from_one() {
        let store = store();
        book(&store, 1, 1, utc(12, 0), ReservationStatus::Confirmed);
        let occurrences = [utc(9, 0), utc(12, 0), utc(14, 0)];
        let conflicts = store
            .read(|v| detect_occurrence_conflicts(v, &occurrences, &query(1, 1, utc(9, 0))))
            .unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].index, 2);
        assert_eq!(conflicts[0].start, utc(12, 0));
    }

    #[test]
    fn test_summary_lists_three_then_and_more() {
        let report = ConflictReport {
            room_busy: true,
            ..ConflictReport::default()
        };
        let conflicts: Vec<OccurrenceConflict> = (0..5)
            .map(|i| OccurrenceConflict {
                index: i + 1,
                start: utc(9 + i as u32, 0),
                report,
            })
            .collect();
        let text = summarize_occurrence_conflicts(&conflicts, Tz::UTC).unwrap();
        assert!(text.starts_with("Conflicts in 5 occurrence(s)"), "got: {text}");
        assert!(text.contains("16.03.2026 11:00 (room busy)"));
        assert!(!text.contains("12:00"));
        assert!(text.ends_with("and more"));
        assert!(summarize_occurrence_conflicts(&[], Tz::UTC).is_none());
    }

    #[test]
    fn test_report_display_joins_reasons() {
        let report = ConflictReport {
            specialist_busy: true,
            room_not_available: true,
            ..ConflictReport::default()
        };
        assert_eq!(report.to_string(), "specialist busy, room not available");
        assert_eq!(ConflictReport::default().to_string(), "no conflicts");
    }

    #[test]
    fn test_within_hours_accepts_exact_fit() {
        let mut specialist = store().read(|v| v.specialist(SpecialistId(1))).unwrap();
        specialist.hours.set(
            Weekday::Mon,
            WorkingHours::new(
                NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(10, 15, 0).unwrap(),
            )
            .unwrap(),
        );
        assert!(within_hours(&specialist, Tz::UTC, utc(9, 0), 75));
        assert!(!within_hours(&specialist, Tz::UTC, utc(9, 15), 75));
    }

    #[test]
    fn test_within_hours_reads_end_across_spring_forward() {
        let tz = chrono_tz::Europe::Berlin;
        let mut specialist = store().read(|v| v.specialist(SpecialistId(1))).unwrap();
        specialist.hours.set(
            Weekday::Sun,
            WorkingHours::new(
                NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(3, 30, 0).unwrap(),
            )
            .unwrap(),
        );
        // 01:30 CET on 2026-03-29; clocks jump from 02:00 to 03:00.
        let start = Utc.with_ymd_and_hms(2026, 3, 29, 0, 30, 0).unwrap();
        // Ends 03:30 CEST: an exact fit.
        assert!(within_hours(&specialist, tz, start, 60));
        // Ends 03:45 CEST, past closing, though only 75 minutes elapse.
        assert!(!within_hours(&specialist, tz, start, 75));
    }
}
