//! RFC 5545 export of a series' recurrence.
//!
//! The output is the recurrence block of a `VEVENT`: `DTSTART`, one `RRULE`
//! bounded by `UNTIL`, and `EXDATE` for skipped dates. Month days past the
//! 28th are written as `BYMONTHDAY=28,..,d;BYSETPOS=-1`, which picks the
//! anchor day or the month's last day, matching the clamping in
//! [`generate_occurrences`](crate::recurrence::generate_occurrences).
//!
//! Every export is parsed back with `rrule` and must expand to the same number
//! of instances as the engine's own expansion.

use chrono::{DateTime, Datelike, NaiveDateTime, Utc, Weekday};
use chrono_tz::Tz;
use rrule::RRuleSet;

use crate::error::EngineError;
use crate::model::RecurrenceSeries;
use crate::recurrence::{expand_series, Frequency, RecurrenceRule, MAX_OCCURRENCES};
use crate::temporal::to_local;

const LOCAL_FORMAT: &str = "%Y%m%dT%H%M%S";
const UTC_FORMAT: &str = "%Y%m%dT%H%M%SZ";

fn weekday_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

/// `28,29,..,day` for a month day past 28.
fn clamp_days(day: u32) -> String {
    (28..=day).map(|d| d.to_string()).collect::<Vec<_>>().join(",")
}

fn rrule_line(rule: &RecurrenceRule, anchor: NaiveDateTime, last: DateTime<Utc>) -> String {
    let mut parts = vec![
        format!(
            "FREQ={}",
            match rule.frequency {
                Frequency::Daily => "DAILY",
                Frequency::Weekly => "WEEKLY",
                Frequency::Monthly => "MONTHLY",
                Frequency::Yearly => "YEARLY",
            }
        ),
        format!("INTERVAL={}", rule.interval),
    ];
    let day = anchor.day();
    match rule.frequency {
        Frequency::Weekly if !rule.weekdays.is_empty() => {
            let mut days = rule.weekdays.clone();
            days.sort_by_key(|d| d.num_days_from_monday());
            days.dedup();
            let codes: Vec<&str> = days.into_iter().map(weekday_code).collect();
            parts.push(format!("BYDAY={}", codes.join(",")));
            parts.push("WKST=MO".to_string());
        }
        Frequency::Monthly if day > 28 => {
            parts.push(format!("BYMONTHDAY={}", clamp_days(day)));
            parts.push("BYSETPOS=-1".to_string());
        }
        Frequency::Yearly if anchor.month() == 2 && day == 29 => {
            parts.push("BYMONTH=2".to_string());
            parts.push("BYMONTHDAY=28,29".to_string());
            parts.push("BYSETPOS=-1".to_string());
        }
        _ => {}
    }
    parts.push(format!("UNTIL={}", last.format(UTC_FORMAT)));
    format!("RRULE:{}", parts.join(";"))
}

/// Render a series as iCalendar recurrence properties.
///
/// `DTSTART` is the first generated occurrence rather than the stored anchor,
/// so it always satisfies the rule.
///
/// # Errors
///
/// Any expansion error, or [`EngineError::InvalidRule`] if the text does not
/// parse or expands differently.
pub fn series_to_ical(series: &RecurrenceSeries, tz: Tz) -> Result<String, EngineError> {
    rule_to_ical(&series.rule, series.start, tz)
}

/// Render a rule anchored at `anchor`. See [`series_to_ical`].
pub fn rule_to_ical(
    rule: &RecurrenceRule,
    anchor: DateTime<Utc>,
    tz: Tz,
) -> Result<String, EngineError> {
    let occurrences = expand_series(rule, anchor, tz)?;
    let (Some(first), Some(last)) = (occurrences.first(), occurrences.last()) else {
        return Err(EngineError::Recurrence("nothing to export".to_string()));
    };
    let local_anchor = to_local(tz, anchor);
    let local_first = to_local(tz, *first);

    let mut lines = vec![
        format!("DTSTART;TZID={}:{}", tz.name(), local_first.format(LOCAL_FORMAT)),
        rrule_line(rule, local_anchor, *last),
    ];
    let skipped: Vec<String> = rule
        .excluded_dates
        .iter()
        .filter(|d| **d > local_first.date() && **d < to_local(tz, *last).date())
        .map(|d| d.and_time(local_anchor.time()).format(LOCAL_FORMAT).to_string())
        .collect();
    if !skipped.is_empty() {
        lines.push(format!("EXDATE;TZID={}:{}", tz.name(), skipped.join(",")));
    }
    let text = lines.join("\n");

    let set: RRuleSet = text
        .parse()
        .map_err(|e: rrule::RRuleError| EngineError::InvalidRule(e.to_string()))?;
    let expanded = set.all(MAX_OCCURRENCES as u16 + 1).dates.len();
    if expanded != occurrences.len() {
        return Err(EngineError::InvalidRule(format!(
            "exported rule expands to {expanded} instance(s), expected {}",
            occurrences.len()
        )));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::Termination;
    use chrono::{NaiveDate, TimeZone};

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_daily_export() {
        let rule = RecurrenceRule::new(Frequency::Daily, 1, Termination::Count(5));
        let text = rule_to_ical(&rule, utc(2026, 3, 16, 9), Tz::UTC).unwrap();
        assert!(text.starts_with("DTSTART;TZID=UTC:20260316T090000\n"), "got: {text}");
        assert!(text.contains("RRULE:FREQ=DAILY;INTERVAL=1;UNTIL=20260320T090000Z"));
        assert!(!text.contains("EXDATE"));
    }

    #[test]
    fn test_weekly_subset_export() {
        let rule = RecurrenceRule::new(Frequency::Weekly, 1, Termination::Count(4))
            .with_weekdays([Weekday::Wed, Weekday::Mon]);
        let text = rule_to_ical(&rule, utc(2026, 3, 16, 9), Tz::UTC).unwrap();
        assert!(text.contains("BYDAY=MO,WE;WKST=MO"), "got: {text}");
        assert!(text.contains("UNTIL=20260325T090000Z"));
    }

    #[test]
    fn test_month_end_export_uses_setpos() {
        let rule = RecurrenceRule::new(Frequency::Monthly, 1, Termination::Count(3));
        let text = rule_to_ical(&rule, utc(2026, 1, 31, 10), Tz::UTC).unwrap();
        assert!(text.contains("BYMONTHDAY=28,29,30,31;BYSETPOS=-1"), "got: {text}");
        assert!(text.contains("UNTIL=20260331T100000Z"));
    }

    #[test]
    fn test_excluded_dates_become_exdate() {
        let rule = RecurrenceRule::new(Frequency::Daily, 1, Termination::Count(4))
            .excluding([NaiveDate::from_ymd_opt(2026, 3, 17).unwrap()]);
        let text = rule_to_ical(&rule, utc(2026, 3, 16, 9), Tz::UTC).unwrap();
        assert!(text.contains("EXDATE;TZID=UTC:20260317T090000"), "got: {text}");
        assert!(text.contains("UNTIL=20260320T090000Z"));
    }

    #[test]
    fn test_zoned_export_keeps_local_wall_clock() {
        let tz: Tz = "Europe/Berlin".parse().unwrap();
        let rule = RecurrenceRule::new(Frequency::Weekly, 1, Termination::Count(3));
        // 09:00 Berlin on 2026-03-16 is 08:00 UTC.
        let text = rule_to_ical(&rule, utc(2026, 3, 16, 8), tz).unwrap();
        assert!(text.starts_with("DTSTART;TZID=Europe/Berlin:20260316T090000"), "got: {text}");
        // Third occurrence is after the spring change: 09:00 CEST is 07:00 UTC.
        assert!(text.contains("UNTIL=20260330T070000Z"));
    }
}
