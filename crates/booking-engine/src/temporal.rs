//! Time primitives shared by every scheduling component.
//!
//! Instants are stored as `DateTime<Utc>`. Working hours, recurrence anchors,
//! and user input are wall-clock values in the deployment timezone. All
//! functions take explicit inputs (no system clock access). The caller
//! provides "now" when it is needed.
//!
//! # Local time policy
//!
//! A wall-clock value that does not exist (spring-forward gap) is shifted
//! forward to the first valid minute after the gap. An ambiguous value
//! (fall-back overlap) resolves to the earlier instant.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Formats accepted for wall-clock datetime input, most specific first.
const LOCAL_INPUT_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Longest DST gap we are willing to walk across, in minutes.
const MAX_GAP_MINUTES: i64 = 180;

// ── TimeSpan ────────────────────────────────────────────────────────────────

/// A half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSpan {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeSpan {
    /// Build a span, rejecting empty or inverted intervals.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, EngineError> {
        if end <= start {
            return Err(EngineError::Validation(format!(
                "end {} must be after start {}",
                end.to_rfc3339(),
                start.to_rfc3339()
            )));
        }
        Ok(Self { start, end })
    }

    /// The span a booking reserves: service duration plus the global buffer.
    pub fn reserved(start: DateTime<Utc>, duration_minutes: u32, buffer_minutes: u32) -> Self {
        Self {
            start,
            end: derive_end(start, duration_minutes, buffer_minutes),
        }
    }

    /// Half-open overlap: `[s1, e1)` and `[s2, e2)` intersect iff `s1 < e2 && s2 < e1`.
    pub fn overlaps(&self, other: &TimeSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// End of a reservation: `start + duration + buffer`.
///
/// This is the only place an end time is computed. Every write path calls it,
/// so an end time is never set independently of its inputs.
pub fn derive_end(
    start: DateTime<Utc>,
    duration_minutes: u32,
    buffer_minutes: u32,
) -> DateTime<Utc> {
    start + Duration::minutes(i64::from(duration_minutes) + i64::from(buffer_minutes))
}

// ── Parsing ─────────────────────────────────────────────────────────────────

/// Parse an RFC 3339 datetime string into `DateTime<Utc>`.
pub fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>, EngineError> {
    DateTime::parse_from_rfc3339(s.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::InvalidDatetime(format!("'{}': {}", s, e)))
}

/// Parse a wall-clock datetime such as `2026-03-16T09:30` or `2026-03-16 09:30:00`.
pub fn parse_local_datetime(s: &str) -> Result<NaiveDateTime, EngineError> {
    let trimmed = s.trim();
    LOCAL_INPUT_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| EngineError::InvalidDatetime(format!("'{}': unrecognized format", s)))
}

/// Parse a user-supplied start time: RFC 3339 passes through, anything else is
/// read as wall-clock time in `tz`.
pub fn parse_start_time(s: &str, tz: Tz) -> Result<DateTime<Utc>, EngineError> {
    match parse_rfc3339(s) {
        Ok(dt) => Ok(dt),
        Err(_) => localize(tz, parse_local_datetime(s)?),
    }
}

/// Parse an ISO 8601 date (`YYYY-MM-DD`).
pub fn parse_date(s: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| EngineError::InvalidDatetime(format!("'{}': {}", s, e)))
}

/// Parse an IANA timezone string into `Tz`.
pub fn parse_timezone(s: &str) -> Result<Tz, EngineError> {
    s.parse::<Tz>()
        .map_err(|_| EngineError::InvalidTimezone(format!("'{}'", s)))
}

// ── Local ↔ UTC ─────────────────────────────────────────────────────────────

/// Resolve a wall-clock value in `tz` to an instant (see the module-level policy).
pub fn localize(tz: Tz, naive: NaiveDateTime) -> Result<DateTime<Utc>, EngineError> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => (1..=MAX_GAP_MINUTES)
            .find_map(|m| {
                tz.from_local_datetime(&(naive + Duration::minutes(m)))
                    .earliest()
            })
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| {
                EngineError::InvalidDatetime(format!("'{}' does not exist in {}", naive, tz.name()))
            }),
    }
}

/// Wall-clock value of an instant in `tz`.
pub fn to_local(tz: Tz, instant: DateTime<Utc>) -> NaiveDateTime {
    instant.with_timezone(&tz).naive_local()
}

/// The `[00:00, next 00:00)` window of a local calendar date.
pub fn local_day(tz: Tz, date: NaiveDate) -> Result<TimeSpan, EngineError> {
    let start = localize(tz, date.and_time(chrono::NaiveTime::MIN))?;
    let next = date
        .succ_opt()
        .ok_or_else(|| EngineError::InvalidDatetime(format!("no day after {}", date)))?;
    let end = localize(tz, next.and_time(chrono::NaiveTime::MIN))?;
    TimeSpan::new(start, end)
}

/// Short human form used in warning messages, e.g. `16.03.2026 09:30`.
pub fn format_local(tz: Tz, instant: DateTime<Utc>) -> String {
    instant.with_timezone(&tz).format("%d.%m.%Y %H:%M").to_string()
}
