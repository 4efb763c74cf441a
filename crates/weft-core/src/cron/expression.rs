//! Cron expression parsing and occurrence search.
//!
//! Schedules are normalized to 6-field cron and handed to `croner`, which
//! provides the field semantics (optional seconds, names, `L`/`#`/`W`, the
//! Vixie day-of-month/day-of-week OR rule) and timezone-aware search. This
//! layer adds the presets and a search horizon of `SEARCH_YEARS` calendar
//! years, so an expression that can never match (e.g. 30 February) yields
//! `None` instead of scanning to the end of time.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, TimeZone};
use croner::Cron;

use super::CronError;
use super::normalize::normalize_schedule;

/// Calendar years searched before giving up on an occurrence.
pub const SEARCH_YEARS: i32 = 5;

/// A parsed cron expression.
///
/// Accepts 5-field (`minute hour day-of-month month day-of-week`) and 6-field
/// (seconds first) expressions plus the presets understood by
/// [`normalize_schedule`].
#[derive(Clone)]
pub struct CronExpression {
    source: String,
    normalized: String,
    cron: Cron,
}

impl CronExpression {
    /// Parse a cron expression, preset or human-readable schedule.
    pub fn parse(input: &str) -> Result<Self, CronError> {
        let normalized = normalize_schedule(input)?;
        let cron = normalized
            .parse::<Cron>()
            .map_err(|e| CronError::Invalid {
                expression: input.trim().to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            source: input.trim().to_string(),
            normalized,
            cron,
        })
    }

    /// The expression as written by the caller.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The 6-field form handed to the parser.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    /// Whether the expression matches `instant` (to the second) in its own timezone.
    pub fn matches<Tz: TimeZone>(&self, instant: &DateTime<Tz>) -> bool {
        self.cron.is_time_matching(instant).unwrap_or(false)
    }

    /// The first occurrence strictly after `after`, in `after`'s timezone.
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let limit = after.year() + SEARCH_YEARS;
        self.cron
            .find_next_occurrence(after, false)
            .ok()
            .filter(|next| next.year() <= limit)
    }

    /// The latest occurrence at or before `at`, in `at`'s timezone.
    pub fn prev_at_or_before<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let limit = at.year() - SEARCH_YEARS;
        self.cron
            .find_previous_occurrence(at, true)
            .ok()
            .filter(|prev| prev.year() >= limit && prev <= at)
    }

    /// Up to `count` consecutive occurrences strictly after `after`.
    pub fn upcoming<Tz: TimeZone>(&self, after: &DateTime<Tz>, count: usize) -> Vec<DateTime<Tz>> {
        let mut out = Vec::with_capacity(count);
        let mut cursor = after.clone();
        while out.len() < count {
            match self.next_after(&cursor) {
                Some(next) => {
                    cursor = next.clone();
                    out.push(next);
                }
                None => break,
            }
        }
        out
    }

    /// Milliseconds from `now` until the next occurrence.
    pub fn millis_until_next<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<i64> {
        let next = self.next_after(now)?;
        Some(next.signed_duration_since(now.clone()).num_milliseconds())
    }
}

impl PartialEq for CronExpression {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for CronExpression {}

impl fmt::Debug for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CronExpression")
            .field("source", &self.source)
            .field("normalized", &self.normalized)
            .finish()
    }
}

impl FromStr for CronExpression {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Timelike, Utc};
    use chrono_tz::America::New_York;
    use chrono_tz::Tz;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn ny(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Tz> {
        New_York.with_ymd_and_hms(y, mo, d, h, mi, s).earliest().unwrap()
    }

    #[test]
    fn weekday_schedule_skips_weekend() {
        let expr = CronExpression::parse("0 9 * * MON-FRI").unwrap();
        // 2026-10-16 is a Friday.
        let next = expr.next_after(&ny(2026, 10, 16, 10, 0, 0)).unwrap();
        assert_eq!(next, ny(2026, 10, 19, 9, 0, 0));
    }

    #[test]
    fn next_is_strictly_after_reference() {
        let expr = CronExpression::parse("0 9 * * MON-FRI").unwrap();
        let next = expr.next_after(&ny(2026, 10, 14, 9, 0, 0)).unwrap();
        assert_eq!(next, ny(2026, 10, 15, 9, 0, 0));
    }

    #[test]
    fn prev_includes_reference_instant() {
        let expr = CronExpression::parse("0 9 * * MON-FRI").unwrap();
        let at = ny(2026, 10, 14, 9, 0, 0);
        assert_eq!(expr.prev_at_or_before(&at).unwrap(), at);

        // Monday 08:00 -> previous Friday 09:00.
        let prev = expr.prev_at_or_before(&ny(2026, 10, 19, 8, 0, 0)).unwrap();
        assert_eq!(prev, ny(2026, 10, 16, 9, 0, 0));
    }

    #[test]
    fn six_field_expression_uses_seconds() {
        let expr = CronExpression::parse("*/15 * * * * *").unwrap();
        let next = expr.next_after(&utc("2026-01-01T00:00:07Z")).unwrap();
        assert_eq!(next, utc("2026-01-01T00:00:15Z"));
        let next = expr.next_after(&utc("2026-01-01T00:00:45Z")).unwrap();
        assert_eq!(next, utc("2026-01-01T00:01:00Z"));
    }

    #[test]
    fn carries_across_year_boundary() {
        let expr = CronExpression::parse("30 23 31 12 *").unwrap();
        let next = expr.next_after(&utc("2026-12-31T23:30:00Z")).unwrap();
        assert_eq!(next, utc("2027-12-31T23:30:00Z"));
    }

    #[test]
    fn leap_day_waits_for_leap_year() {
        let expr = CronExpression::parse("0 0 29 2 *").unwrap();
        let next = expr.next_after(&utc("2026-03-01T00:00:00Z")).unwrap();
        assert_eq!(next, utc("2028-02-29T00:00:00Z"));
    }

    #[test]
    fn impossible_date_yields_none() {
        let expr = CronExpression::parse("0 0 30 2 *").unwrap();
        assert!(expr.next_after(&utc("2026-01-01T00:00:00Z")).is_none());
        assert!(expr.prev_at_or_before(&utc("2026-01-01T00:00:00Z")).is_none());
        assert!(expr.upcoming(&utc("2026-01-01T00:00:00Z"), 3).is_empty());
        assert_eq!(expr.millis_until_next(&utc("2026-01-01T00:00:00Z")), None);
    }

    #[test]
    fn day_fields_use_or_when_both_restricted() {
        // The 13th of the month, or any Friday.
        let expr = CronExpression::parse("0 0 13 * FRI").unwrap();
        // 2026-10-13 is a Tuesday, 2026-10-16 a Friday.
        let first = expr.next_after(&utc("2026-10-12T00:00:00Z")).unwrap();
        assert_eq!(first, utc("2026-10-13T00:00:00Z"));
        let second = expr.next_after(&first).unwrap();
        assert_eq!(second, utc("2026-10-16T00:00:00Z"));
    }

    #[test]
    fn day_fields_use_and_when_one_is_star() {
        let expr = CronExpression::parse("0 0 * * FRI").unwrap();
        let next = expr.next_after(&utc("2026-10-12T00:00:00Z")).unwrap();
        assert_eq!(next, utc("2026-10-16T00:00:00Z"));
    }

    #[test]
    fn sunday_as_seven_and_zero() {
        let a = CronExpression::parse("0 0 * * 7").unwrap();
        let b = CronExpression::parse("0 0 * * SUN").unwrap();
        let from = utc("2026-10-14T00:00:00Z");
        assert_eq!(a.next_after(&from), b.next_after(&from));
        assert_eq!(a.next_after(&from).unwrap(), utc("2026-10-18T00:00:00Z"));
    }

    #[test]
    fn dst_transitions_keep_occurrences_ordered() {
        // 2026-03-08 02:30 does not exist in New York.
        let gap = CronExpression::parse("30 2 * * *").unwrap();
        let reference = ny(2026, 3, 7, 12, 0, 0);
        let next = gap.next_after(&reference).unwrap();
        assert!(next > reference);
        assert!(next <= ny(2026, 3, 9, 2, 30, 0));

        // 2026-11-01 01:30 occurs twice in New York.
        let overlap = CronExpression::parse("30 1 * * *").unwrap();
        let first = overlap.next_after(&ny(2026, 10, 31, 12, 0, 0)).unwrap();
        let repeated = New_York.with_ymd_and_hms(2026, 11, 1, 1, 30, 0);
        assert!(first >= repeated.earliest().unwrap());
        assert!(first <= repeated.latest().unwrap());
        let second = overlap.next_after(&first).unwrap();
        assert!(second > first);
        assert!(second <= ny(2026, 11, 2, 1, 30, 0));
    }

    #[test]
    fn matches_checks_every_field() {
        let expr = CronExpression::parse("0 9 * * MON-FRI").unwrap();
        assert!(expr.matches(&ny(2026, 10, 16, 9, 0, 0)));
        assert!(!expr.matches(&ny(2026, 10, 16, 9, 0, 1)));
        assert!(!expr.matches(&ny(2026, 10, 17, 9, 0, 0)));
    }

    #[test]
    fn upcoming_and_millis_until_next() {
        let expr = CronExpression::parse("@hourly").unwrap();
        let from = utc("2026-01-01T10:15:00Z");
        let next = expr.upcoming(&from, 3);
        assert_eq!(
            next,
            vec![
                utc("2026-01-01T11:00:00Z"),
                utc("2026-01-01T12:00:00Z"),
                utc("2026-01-01T13:00:00Z"),
            ]
        );
        assert_eq!(expr.millis_until_next(&from), Some(45 * 60 * 1000));
    }

    #[test]
    fn lists_ranges_and_steps() {
        let expr = CronExpression::parse("0 5,10-12,40-59/10 * * * *").unwrap();
        let from = utc("2026-01-01T00:00:00Z");
        let minutes: Vec<u32> = expr
            .upcoming(&from, 7)
            .iter()
            .map(|t| t.minute())
            .collect();
        assert_eq!(minutes, vec![5, 10, 11, 12, 40, 50, 5]);
    }

    #[test]
    fn month_names() {
        let expr = CronExpression::parse("0 0 1 JAN,JUL *").unwrap();
        let next = expr.next_after(&utc("2026-02-01T00:00:00Z")).unwrap();
        assert_eq!(next, utc("2026-07-01T00:00:00Z"));
    }

    #[test]
    fn rejects_malformed_fields() {
        for bad in [
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * * 13 *",
            "* * * * 8",
            "a * * * *",
            "* * * FOO *",
        ] {
            let err = CronExpression::parse(bad).unwrap_err();
            assert!(
                matches!(&err, CronError::Invalid { expression, .. } if expression == bad),
                "expected parser error for '{bad}', got {err:?}"
            );
        }
    }

    #[test]
    fn shape_errors_come_from_normalization() {
        assert_eq!(CronExpression::parse(""), Err(CronError::Empty));
        assert_eq!(CronExpression::parse("* * *"), Err(CronError::FieldCount(3)));
    }

    #[test]
    fn display_and_normalized_forms() {
        let expr: CronExpression = "@daily".parse().unwrap();
        assert_eq!(expr.to_string(), "@daily");
        assert_eq!(expr.normalized(), "0 0 0 * * *");
        assert_eq!(expr, CronExpression::parse("0 0 * * *").unwrap());
    }
}
