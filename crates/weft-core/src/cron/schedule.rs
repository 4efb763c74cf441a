//! A cron expression bound to an IANA timezone.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use super::{CronError, CronExpression};

/// Cron expression plus the timezone its fields are evaluated in.
///
/// All inputs and outputs are UTC instants; conversion to local time happens
/// internally so DST transitions are handled by the expression search.
#[derive(Debug, Clone, PartialEq)]
pub struct CronSchedule {
    expression: CronExpression,
    timezone: Tz,
}

impl CronSchedule {
    /// Parse `expression` and resolve `timezone` (IANA name, e.g. "Europe/Berlin").
    pub fn new(expression: &str, timezone: &str) -> Result<Self, CronError> {
        Ok(Self {
            expression: CronExpression::parse(expression)?,
            timezone: parse_timezone(timezone)?,
        })
    }

    /// Schedule evaluated in UTC.
    pub fn utc(expression: &str) -> Result<Self, CronError> {
        Ok(Self {
            expression: CronExpression::parse(expression)?,
            timezone: Tz::UTC,
        })
    }

    pub fn expression(&self) -> &CronExpression {
        &self.expression
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expression
            .next_after(&after.with_timezone(&self.timezone))
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn prev_at_or_before(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expression
            .prev_at_or_before(&at.with_timezone(&self.timezone))
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn matches(&self, instant: DateTime<Utc>) -> bool {
        self.expression.matches(&instant.with_timezone(&self.timezone))
    }

    pub fn millis_until_next(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expression
            .millis_until_next(&now.with_timezone(&self.timezone))
    }

    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.expression
            .upcoming(&after.with_timezone(&self.timezone), count)
            .into_iter()
            .map(|t| t.with_timezone(&Utc))
            .collect()
    }
}

/// Resolve an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz, CronError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| CronError::UnknownTimezone(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn evaluates_in_local_time() {
        let schedule = CronSchedule::new("0 9 * * *", "Europe/Berlin").unwrap();
        // Berlin is UTC+2 in October before the switch.
        let next = schedule.next_after(utc("2026-10-19T06:00:00Z")).unwrap();
        assert_eq!(next, utc("2026-10-19T07:00:00Z"));
        assert!(schedule.matches(next));
    }

    #[test]
    fn utc_schedule_and_prev() {
        let schedule = CronSchedule::utc("@daily").unwrap();
        let prev = schedule.prev_at_or_before(utc("2026-10-19T12:00:00Z")).unwrap();
        assert_eq!(prev, utc("2026-10-19T00:00:00Z"));
        assert_eq!(schedule.upcoming(prev, 2).len(), 2);
        assert_eq!(
            schedule.millis_until_next(utc("2026-10-19T23:59:59Z")),
            Some(1000)
        );
    }

    #[test]
    fn unknown_timezone_rejected() {
        let err = CronSchedule::new("@daily", "Mars/Olympus").unwrap_err();
        assert_eq!(err, CronError::UnknownTimezone("Mars/Olympus".to_string()));
    }

    #[test]
    fn malformed_expression_rejected_before_timezone() {
        assert!(matches!(
            CronSchedule::new("* * *", "UTC"),
            Err(CronError::FieldCount(3))
        ));
    }
}
