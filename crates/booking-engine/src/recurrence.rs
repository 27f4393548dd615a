//! Recurrence rule expansion.
//!
//! Expansion is a pure function of the rule and a wall-clock anchor: no store
//! reads, no clock. That lets a series edit be previewed and conflict-checked
//! before anything is written.
//!
//! # Semantics
//!
//! - `daily`: every `interval` days.
//! - `weekly`: without weekdays, every `interval` weeks on the anchor's
//!   weekday. With weekdays, every selected day inside each week window
//!   (Monday-first), skipping days before the anchor in the first window;
//!   the window then advances by `interval` weeks.
//! - `monthly`: `anchor + k·interval` months, day-of-month clamped to the
//!   target month (Jan 31 → Feb 28/29 → Mar 31). Offsets are always taken
//!   from the anchor, so clamping never drifts.
//! - `yearly`: `anchor + k·interval` years; Feb 29 falls back to Feb 28.
//! - Excluded dates drop candidates without consuming the count.
//! - Output never exceeds [`MAX_OCCURRENCES`].

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::temporal::localize;

/// Hard upper bound on generated occurrences.
pub const MAX_OCCURRENCES: usize = 200;

/// Smallest allowed occurrence count.
pub const MIN_OCCURRENCE_COUNT: u32 = 2;

/// How far past the anchor an end date may reach.
const MAX_UNTIL_MONTHS: u32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

/// When a series stops. Exactly one form is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Stop after this many occurrences.
    Count(u32),
    /// Stop after this date (inclusive).
    Until(NaiveDate),
}

/// A repeat rule, independent of any anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    #[serde(default = "default_interval")]
    pub interval: u32,
    pub termination: Termination,
    /// Only meaningful for [`Frequency::Weekly`].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub weekdays: Vec<Weekday>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub excluded_dates: BTreeSet<NaiveDate>,
}

fn default_interval() -> u32 {
    1
}

impl RecurrenceRule {
    pub fn new(frequency: Frequency, interval: u32, termination: Termination) -> Self {
        Self {
            frequency,
            interval,
            termination,
            weekdays: Vec::new(),
            excluded_dates: BTreeSet::new(),
        }
    }

    pub fn with_weekdays(mut self, weekdays: impl IntoIterator<Item = Weekday>) -> Self {
        self.weekdays = weekdays.into_iter().collect();
        self
    }

    pub fn excluding(mut self, dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.excluded_dates.extend(dates);
        self
    }

    /// Check the rule's own limits relative to an anchor date.
    pub fn validate(&self, anchor: NaiveDate) -> Result<(), EngineError> {
        if self.interval == 0 {
            return Err(EngineError::Validation("interval must be at least 1".to_string()));
        }
        match self.termination {
            Termination::Count(n) if n < MIN_OCCURRENCE_COUNT => Err(EngineError::Validation(
                format!("occurrence count must be at least {MIN_OCCURRENCE_COUNT}, got {n}"),
            )),
            Termination::Until(until) => {
                let limit = anchor
                    .checked_add_months(Months::new(MAX_UNTIL_MONTHS))
                    .unwrap_or(NaiveDate::MAX);
                if until > limit {
                    Err(EngineError::Validation(format!(
                        "end date {until} is more than one year after {anchor}"
                    )))
                } else {
                    Ok(())
                }
            }
            Termination::Count(_) => Ok(()),
        }
    }

    /// Selected weekdays, Monday-first and deduplicated.
    fn week_days(&self, anchor: NaiveDate) -> Vec<Weekday> {
        let mut days: Vec<Weekday> = if self.weekdays.is_empty() {
            vec![anchor.weekday()]
        } else {
            self.weekdays.clone()
        };
        days.sort_by_key(|d| d.num_days_from_monday());
        days.dedup();
        days
    }

    /// Candidate dates of period `k`, ascending. `None` once dates run out of range.
    fn period_dates(
        &self,
        anchor: NaiveDate,
        k: u64,
        week_days: &[Weekday],
    ) -> Option<Vec<NaiveDate>> {
        let step = k.checked_mul(u64::from(self.interval))?;
        match self.frequency {
            Frequency::Daily => {
                let days = i64::try_from(step).ok()?;
                Some(vec![anchor.checked_add_signed(Duration::try_days(days)?)?])
            }
            Frequency::Weekly => {
                let offset = i64::from(anchor.weekday().num_days_from_monday());
                let week_start = anchor.checked_sub_signed(Duration::days(offset))?;
                let weeks = i64::try_from(step).ok()?;
                let window = week_start.checked_add_signed(Duration::try_weeks(weeks)?)?;
                Some(
                    week_days
                        .iter()
                        .filter_map(|wd| {
                            let offset = i64::from(wd.num_days_from_monday());
                            window.checked_add_signed(Duration::days(offset))
                        })
                        .filter(|d| *d >= anchor)
                        .collect(),
                )
            }
            Frequency::Monthly => {
                let months = u32::try_from(step).ok()?;
                Some(vec![anchor.checked_add_months(Months::new(months))?])
            }
            Frequency::Yearly => {
                let months = u32::try_from(step.checked_mul(12)?).ok()?;
                Some(vec![anchor.checked_add_months(Months::new(months))?])
            }
        }
    }
}

/// Expand a rule into wall-clock start times sharing the anchor's time-of-day.
///
/// # Errors
///
/// [`EngineError::Validation`] if the rule breaks its limits, and
/// [`EngineError::Recurrence`] if it yields no occurrences at all.
pub fn generate_occurrences(
    rule: &RecurrenceRule,
    anchor: NaiveDateTime,
) -> Result<Vec<NaiveDateTime>, EngineError> {
    let anchor_date = anchor.date();
    rule.validate(anchor_date)?;

    let limit = match rule.termination {
        Termination::Count(n) => (n as usize).min(MAX_OCCURRENCES),
        Termination::Until(_) => MAX_OCCURRENCES,
    };
    let until = match rule.termination {
        Termination::Until(date) => Some(date),
        Termination::Count(_) => None,
    };
    let week_days = rule.week_days(anchor_date);

    // Every period after the first yields at least one candidate, and each
    // excluded date can swallow at most one, so this bounds the walk.
    let max_periods = (limit + rule.excluded_dates.len() + 1) as u64;

    let mut out = Vec::with_capacity(limit);
    'periods: for k in 0..=max_periods {
        let Some(dates) = rule.period_dates(anchor_date, k, &week_days) else {
            break;
        };
        for date in dates {
            if until.is_some_and(|u| date > u) {
                break 'periods;
            }
            if rule.excluded_dates.contains(&date) {
                continue;
            }
            out.push(date.and_time(anchor.time()));
            if out.len() == limit {
                break 'periods;
            }
        }
    }

    if out.is_empty() {
        return Err(EngineError::Recurrence(format!(
            "rule produced no occurrences from {anchor}"
        )));
    }
    Ok(out)
}

/// Expand a rule anchored at an instant, resolving each occurrence in `tz`.
pub fn expand_series(
    rule: &RecurrenceRule,
    anchor: DateTime<Utc>,
    tz: Tz,
) -> Result<Vec<DateTime<Utc>>, EngineError> {
    let local_anchor = anchor.with_timezone(&tz).naive_local();
    generate_occurrences(rule, local_anchor)?
        .into_iter()
        .map(|naive| localize(tz, naive))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_time(NaiveTime::from_hms_opt(10, 30, 0).unwrap())
    }

    fn dates(out: &[NaiveDateTime]) -> Vec<NaiveDate> {
        out.iter().map(|dt| dt.date()).collect()
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_daily_interval() {
        let rule = RecurrenceRule::new(Frequency::Daily, 2, Termination::Count(3));
        let out = generate_occurrences(&rule, at(2026, 3, 16)).unwrap();
        assert_eq!(dates(&out), vec![ymd(2026, 3, 16), ymd(2026, 3, 18), ymd(2026, 3, 20)]);
    }

    #[test]
    fn test_weekly_defaults_to_anchor_weekday() {
        let rule = RecurrenceRule::new(Frequency::Weekly, 2, Termination::Count(3));
        let out = generate_occurrences(&rule, at(2026, 3, 18)).unwrap();
        assert_eq!(dates(&out), vec![ymd(2026, 3, 18), ymd(2026, 4, 1), ymd(2026, 4, 15)]);
    }

    #[test]
    fn test_weekly_mon_wed_from_monday() {
        // 2026-03-16 is a Monday.
        let rule = RecurrenceRule::new(Frequency::Weekly, 1, Termination::Count(4))
            .with_weekdays([Weekday::Wed, Weekday::Mon]);
        let out = generate_occurrences(&rule, at(2026, 3, 16)).unwrap();
        assert_eq!(
            dates(&out),
            vec![ymd(2026, 3, 16), ymd(2026, 3, 18), ymd(2026, 3, 23), ymd(2026, 3, 25)]
        );
    }

    #[test]
    fn test_weekly_subset_clips_first_week() {
        // Anchor Wednesday: Monday of the first week is skipped.
        let rule = RecurrenceRule::new(Frequency::Weekly, 1, Termination::Count(3))
            .with_weekdays([Weekday::Mon, Weekday::Wed]);
        let out = generate_occurrences(&rule, at(2026, 3, 18)).unwrap();
        assert_eq!(dates(&out), vec![ymd(2026, 3, 18), ymd(2026, 3, 23), ymd(2026, 3, 25)]);
    }

    #[test]
    fn test_monthly_clamps_to_month_end() {
        let rule = RecurrenceRule::new(Frequency::Monthly, 1, Termination::Count(3));
        let out = generate_occurrences(&rule, at(2026, 1, 31)).unwrap();
        assert_eq!(dates(&out), vec![ymd(2026, 1, 31), ymd(2026, 2, 28), ymd(2026, 3, 31)]);

        let leap = generate_occurrences(&rule, at(2028, 1, 31)).unwrap();
        assert_eq!(leap[1].date(), ymd(2028, 2, 29));
    }

    #[test]
    fn test_yearly_leap_day_falls_back() {
        let rule = RecurrenceRule::new(Frequency::Yearly, 1, Termination::Count(5));
        let out = generate_occurrences(&rule, at(2028, 2, 29)).unwrap();
        assert_eq!(
            dates(&out),
            vec![
                ymd(2028, 2, 29),
                ymd(2029, 2, 28),
                ymd(2030, 2, 28),
                ymd(2031, 2, 28),
                ymd(2032, 2, 29)
            ]
        );
    }

    #[test]
    fn test_excluded_dates_do_not_consume_count() {
        let rule = RecurrenceRule::new(Frequency::Daily, 1, Termination::Count(3))
            .excluding([ymd(2026, 3, 17)]);
        let out = generate_occurrences(&rule, at(2026, 3, 16)).unwrap();
        assert_eq!(dates(&out), vec![ymd(2026, 3, 16), ymd(2026, 3, 18), ymd(2026, 3, 19)]);
    }

    #[test]
    fn test_until_is_inclusive() {
        let rule = RecurrenceRule::new(Frequency::Daily, 1, Termination::Until(ymd(2026, 3, 19)));
        let out = generate_occurrences(&rule, at(2026, 3, 16)).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out.last().unwrap().date(), ymd(2026, 3, 19));
    }

    #[test]
    fn test_count_capped_at_max() {
        let rule = RecurrenceRule::new(Frequency::Daily, 1, Termination::Count(500));
        let out = generate_occurrences(&rule, at(2026, 3, 16)).unwrap();
        assert_eq!(out.len(), MAX_OCCURRENCES);
    }

    #[test]
    fn test_until_more_than_a_year_out_rejected() {
        let rule = RecurrenceRule::new(Frequency::Weekly, 1, Termination::Until(ymd(2027, 3, 17)));
        let err = generate_occurrences(&rule, at(2026, 3, 16)).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "got: {err}");
    }

    #[test]
    fn test_count_below_two_rejected() {
        let rule = RecurrenceRule::new(Frequency::Daily, 1, Termination::Count(1));
        assert!(matches!(
            generate_occurrences(&rule, at(2026, 3, 16)),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let rule = RecurrenceRule::new(Frequency::Daily, 0, Termination::Count(2));
        assert!(generate_occurrences(&rule, at(2026, 3, 16)).is_err());
    }

    #[test]
    fn test_empty_expansion_is_recurrence_error() {
        let rule = RecurrenceRule::new(Frequency::Daily, 1, Termination::Until(ymd(2026, 3, 16)))
            .excluding([ymd(2026, 3, 16)]);
        let err = generate_occurrences(&rule, at(2026, 3, 16)).unwrap_err();
        assert!(matches!(err, EngineError::Recurrence(_)), "got: {err}");
    }

    #[test]
    fn test_time_of_day_preserved() {
        let rule = RecurrenceRule::new(Frequency::Monthly, 3, Termination::Count(4));
        let anchor = at(2026, 5, 31);
        let out = generate_occurrences(&rule, anchor).unwrap();
        assert!(out.iter().all(|dt| dt.time() == anchor.time()));
    }

    #[test]
    fn test_expand_series_keeps_wall_clock_across_dst() {
        let tz: Tz = "Europe/Berlin".parse().unwrap();
        // 09:00 CET on Friday 2026-03-27; Berlin switches to CEST on the 29th.
        let anchor = localize(tz, at(2026, 3, 27).date().and_hms_opt(9, 0, 0).unwrap()).unwrap();
        let rule = RecurrenceRule::new(Frequency::Daily, 1, Termination::Count(4));
        let out = expand_series(&rule, anchor, tz).unwrap();
        let local: Vec<NaiveTime> = out
            .iter()
            .map(|dt| dt.with_timezone(&tz).time())
            .collect();
        assert!(local.iter().all(|t| *t == NaiveTime::from_hms_opt(9, 0, 0).unwrap()));
        assert_eq!(out[3] - out[0], Duration::hours(71));
    }
}
