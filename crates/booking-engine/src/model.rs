//! Mutable scheduling records: reservations, series, closures, and the
//! identifiers that tie them together.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::recurrence::RecurrenceRule;
use crate::temporal::{derive_end, TimeSpan};

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "#{}", self.0)
            }
        }
    };
}

entity_id!(ServiceId);
entity_id!(SpecialistId);
entity_id!(RoomId);
entity_id!(TemplateId);
entity_id!(ReservationId);
entity_id!(SeriesId);
entity_id!(ClosureId);
entity_id!(
    /// Identifier of an [`ArchivedReservation`](crate::archive::ArchivedReservation).
    ArchiveId
);

/// The authenticated identity performing an action. Supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(pub String);

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who is acting and when. Passed explicitly into every mutation.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub actor: Actor,
    pub now: DateTime<Utc>,
}

impl ActionContext {
    pub fn new(actor: Actor, now: DateTime<Utc>) -> Self {
        Self { actor, now }
    }
}

/// Reservation lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Unconfirmed,
    #[default]
    Confirmed,
    Paid,
    Completed,
    Canceled,
}

impl ReservationStatus {
    /// Whether a reservation in this status occupies its specialist and room.
    pub fn blocks_resources(self) -> bool {
        matches!(self, Self::Confirmed | Self::Paid | Self::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unconfirmed => "unconfirmed",
            Self::Confirmed => "confirmed",
            Self::Paid => "paid",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        }
    }
}

/// Who the appointment is for.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Guest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_number: Option<String>,
}

impl Guest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            room_number: None,
        }
    }
}

/// The caller-controlled fields of a reservation, before an id and end time exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationDraft {
    pub guest: Guest,
    pub service_id: ServiceId,
    pub specialist_id: SpecialistId,
    pub room_id: RoomId,
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub status: ReservationStatus,
}

/// A booked appointment.
///
/// `end` is private: it is always `start + service duration + buffer` and only
/// changes through [`Reservation::retime`]. Serialize-only; a reservation is
/// rebuilt from a [`ReservationDraft`] so the end is derived again.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub guest: Guest,
    pub service_id: ServiceId,
    pub specialist_id: SpecialistId,
    pub room_id: RoomId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    pub status: ReservationStatus,
    pub series_id: Option<SeriesId>,
    /// 1-based position in the series; 1 for standalone reservations.
    pub sequence: u32,
    pub created_by: Option<Actor>,
}

impl Reservation {
    pub fn new(
        id: ReservationId,
        draft: ReservationDraft,
        duration_minutes: u32,
        buffer_minutes: u32,
        created_by: Option<Actor>,
    ) -> Self {
        Self {
            id,
            guest: draft.guest,
            service_id: draft.service_id,
            specialist_id: draft.specialist_id,
            room_id: draft.room_id,
            start: draft.start,
            end: derive_end(draft.start, duration_minutes, buffer_minutes),
            status: draft.status,
            series_id: None,
            sequence: 1,
            created_by,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn span(&self) -> TimeSpan {
        TimeSpan {
            start: self.start,
            end: self.end,
        }
    }

    /// Move the reservation and recompute its end.
    pub fn retime(&mut self, start: DateTime<Utc>, duration_minutes: u32, buffer_minutes: u32) {
        self.start = start;
        self.end = derive_end(start, duration_minutes, buffer_minutes);
    }

    /// Attach to a series at the given position.
    pub fn join_series(&mut self, series_id: SeriesId, sequence: u32) {
        self.series_id = Some(series_id);
        self.sequence = sequence;
    }

    /// Become standalone.
    pub fn detach(&mut self) {
        self.series_id = None;
        self.sequence = 1;
    }

    /// The draft that would recreate this reservation at another time.
    pub fn to_draft(&self, start: DateTime<Utc>) -> ReservationDraft {
        ReservationDraft {
            guest: self.guest.clone(),
            service_id: self.service_id,
            specialist_id: self.specialist_id,
            room_id: self.room_id,
            start,
            status: self.status,
        }
    }
}

/// A recurrence rule plus the anchor it was expanded from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceSeries {
    pub id: SeriesId,
    pub start: DateTime<Utc>,
    pub rule: RecurrenceRule,
    pub created_by: Option<Actor>,
}

/// A declared unavailability window for a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomClosure {
    pub id: ClosureId,
    pub room_id: RoomId,
    pub span: TimeSpan,
    #[serde(default)]
    pub reason: String,
    pub created_by: Option<Actor>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn draft() -> ReservationDraft {
        ReservationDraft {
            guest: Guest::new("Ada"),
            service_id: ServiceId(1),
            specialist_id: SpecialistId(1),
            room_id: RoomId(1),
            start: Utc.with_ymd_and_hms(2026, 3, 16, 9, 0, 0).unwrap(),
            status: ReservationStatus::Confirmed,
        }
    }

    #[test]
    fn test_new_reservation_derives_end() {
        let r = Reservation::new(ReservationId(1), draft(), 60, 15, None);
        assert_eq!(r.end(), Utc.with_ymd_and_hms(2026, 3, 16, 10, 15, 0).unwrap());
        assert_eq!(r.sequence, 1);
        assert!(r.series_id.is_none());
    }

    #[test]
    fn test_retime_recomputes_end() {
        let mut r = Reservation::new(ReservationId(1), draft(), 60, 15, None);
        r.retime(Utc.with_ymd_and_hms(2026, 3, 16, 14, 0, 0).unwrap(), 90, 15);
        assert_eq!(r.end(), Utc.with_ymd_and_hms(2026, 3, 16, 15, 45, 0).unwrap());
    }

    #[test]
    fn test_serialized_reservation_carries_derived_end() {
        let r = Reservation::new(ReservationId(1), draft(), 45, 10, None);
        let value = serde_json::to_value(&r).unwrap();
        assert_eq!(value["start"], "2026-03-16T09:00:00Z");
        assert_eq!(value["end"], "2026-03-16T09:55:00Z");
    }

    #[test]
    fn test_status_blocking_classes() {
        assert!(ReservationStatus::Confirmed.blocks_resources());
        assert!(ReservationStatus::Paid.blocks_resources());
        assert!(ReservationStatus::Completed.blocks_resources());
        assert!(!ReservationStatus::Canceled.blocks_resources());
        assert!(!ReservationStatus::Unconfirmed.blocks_resources());
    }

    #[test]
    fn test_detach_resets_sequence() {
        let mut r = Reservation::new(ReservationId(1), draft(), 60, 15, None);
        r.join_series(SeriesId(4), 3);
        r.detach();
        assert_eq!((r.series_id, r.sequence), (None, 1));
    }
}
