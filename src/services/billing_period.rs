//! Billing-period date arithmetic.
//!
//! Billing weeks are calendar weeks in the practice's local timezone. All
//! the functions here are pure so the weekly job, the manual trigger and
//! the tests agree on exactly which days a period covers.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Utc, Weekday,
};
use chrono_tz::Tz;
use serde::Serialize;

/// One billing week. Both ends are inclusive local dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BillingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BillingPeriod {
    /// The week that contains `date`, starting on `week_start`.
    pub fn week_containing(date: NaiveDate, week_start: Weekday) -> Self {
        let offset = days_after(date.weekday(), week_start);
        let start = date - Duration::days(offset);
        Self {
            start,
            end: start + Duration::days(6),
        }
    }

    /// The most recent complete week as seen from `now` in `tz`.
    pub fn previous_week(now: DateTime<Utc>, tz: Tz, week_start: Weekday) -> Self {
        let today = now.with_timezone(&tz).date_naive();
        let current = Self::week_containing(today, week_start);
        Self::week_containing(current.start - Duration::days(1), week_start)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Days from the last `week_start` up to `day` (0..=6).
fn days_after(day: Weekday, week_start: Weekday) -> i64 {
    let day = day.num_days_from_monday() as i64;
    let start = week_start.num_days_from_monday() as i64;
    (day - start).rem_euclid(7)
}

/// Resolve a wall-clock time in `tz` to an instant.
///
/// Ambiguous times (clocks falling back) take the earlier instant. Times
/// inside a spring-forward gap move to the first valid minute after it.
pub fn local_to_utc(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            for minutes in 1..=24 * 60 {
                let shifted = naive + Duration::minutes(minutes);
                if let Some(dt) = tz.from_local_datetime(&shifted).earliest() {
                    return dt.with_timezone(&Utc);
                }
            }
            Utc.from_utc_datetime(&naive)
        }
    }
}

/// Next instant strictly after `now` that falls on `weekday` at `hour:00` local time.
pub fn next_run_after(now: DateTime<Utc>, tz: Tz, weekday: Weekday, hour: u32) -> DateTime<Utc> {
    let today = now.with_timezone(&tz).date_naive();
    let at = NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN);

    for offset in 0..=7 {
        let date = today + Duration::days(offset);
        if date.weekday() != weekday {
            continue;
        }
        let candidate = local_to_utc(date.and_time(at), tz);
        if candidate > now {
            return candidate;
        }
    }
    now + Duration::weeks(1)
}

/// Billable units for a session using the eight-minute rule: a trailing
/// partial unit counts once it reaches half a unit.
pub fn billable_units(minutes: i64, unit_minutes: u32) -> i32 {
    if minutes <= 0 || unit_minutes == 0 {
        return 0;
    }
    let unit = unit_minutes as i64;
    let full = minutes / unit;
    let remainder = minutes % unit;
    let units = if remainder * 2 >= unit { full + 1 } else { full };
    i32::try_from(units).unwrap_or(i32::MAX)
}

/// Parse "monday", "Mon", "SUN", ...
pub fn parse_weekday(value: &str) -> Option<Weekday> {
    value.trim().parse::<Weekday>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn week_containing_midweek_date() {
        let period = BillingPeriod::week_containing(date(2025, 3, 5), Weekday::Sun);
        assert_eq!(period.start, date(2025, 3, 2));
        assert_eq!(period.end, date(2025, 3, 8));
    }

    #[test]
    fn week_containing_its_own_start_day() {
        let period = BillingPeriod::week_containing(date(2025, 3, 3), Weekday::Mon);
        assert_eq!(period.start, date(2025, 3, 3));
        assert_eq!(period.end, date(2025, 3, 9));
        assert!(period.contains(date(2025, 3, 9)));
        assert!(!period.contains(date(2025, 3, 10)));
    }

    #[test]
    fn previous_week_uses_practice_local_date() {
        // Saturday evening in New York, already Sunday in UTC.
        let now = utc(2025, 3, 9, 2, 0);

        let local = BillingPeriod::previous_week(now, New_York, Weekday::Sun);
        assert_eq!(local.start, date(2025, 2, 23));
        assert_eq!(local.end, date(2025, 3, 1));

        let in_utc = BillingPeriod::previous_week(now, chrono_tz::UTC, Weekday::Sun);
        assert_eq!(in_utc.start, date(2025, 3, 2));
    }

    #[test]
    fn weekly_run_keeps_local_hour_across_dst() {
        // US clocks spring forward on 2025-03-09; 06:00 local moves from 11:00 to 10:00 UTC.
        let before = utc(2025, 3, 3, 11, 0);
        assert_eq!(
            next_run_after(before, New_York, Weekday::Mon, 6),
            utc(2025, 3, 10, 10, 0)
        );
    }

    #[test]
    fn gap_time_moves_past_the_gap() {
        let naive = date(2025, 3, 9).and_hms_opt(2, 30, 0).unwrap();
        assert_eq!(local_to_utc(naive, New_York), utc(2025, 3, 9, 7, 0));
    }

    #[test]
    fn ambiguous_time_takes_earliest() {
        // 01:30 happens twice on 2025-11-02; the first is still EDT (UTC-4).
        let naive = date(2025, 11, 2).and_hms_opt(1, 30, 0).unwrap();
        assert_eq!(local_to_utc(naive, New_York), utc(2025, 11, 2, 5, 30));
    }

    #[test]
    fn next_run_is_strictly_after_now() {
        // Monday 06:00 EDT is 10:00 UTC.
        let at_run = utc(2025, 3, 10, 10, 0);
        assert_eq!(
            next_run_after(at_run, New_York, Weekday::Mon, 6),
            utc(2025, 3, 17, 10, 0)
        );

        let just_before = utc(2025, 3, 10, 9, 59);
        assert_eq!(
            next_run_after(just_before, New_York, Weekday::Mon, 6),
            utc(2025, 3, 10, 10, 0)
        );
    }

    #[test]
    fn units_follow_eight_minute_rule() {
        assert_eq!(billable_units(0, 15), 0);
        assert_eq!(billable_units(7, 15), 0);
        assert_eq!(billable_units(8, 15), 1);
        assert_eq!(billable_units(60, 15), 4);
        assert_eq!(billable_units(67, 15), 4);
        assert_eq!(billable_units(68, 15), 5);
        assert_eq!(billable_units(-30, 15), 0);
    }

    #[test]
    fn weekday_names_parse() {
        assert_eq!(parse_weekday("monday"), Some(Weekday::Mon));
        assert_eq!(parse_weekday(" Sun "), Some(Weekday::Sun));
        assert_eq!(parse_weekday("someday"), None);
    }
}
