//! Next-send computation for mail task schedules.
//!
//! Pure functions of the schedule and an injected "now"; all times are naive
//! local wall-clock times.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::tasks::{Recurrence, Schedule};

/// Time of day used when a schedule has none (08:00).
pub fn default_time() -> NaiveTime {
    NaiveTime::from_hms_opt(8, 0, 0).unwrap_or(NaiveTime::MIN)
}

/// Weekday used when a weekly schedule has none (Monday).
pub const DEFAULT_WEEKDAY: i32 = 1;

/// Minutes added for schedule types nobody declared.
pub const FALLBACK_MINUTES: i64 = 5;

/// Next-send stored for one-shot tasks ("never again").
pub fn never() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(9999, 12, 31)
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .unwrap_or(NaiveDateTime::MAX)
}

/// Compute the next send time for `schedule`, evaluated at `now`.
pub fn next_send(schedule: &Schedule, now: NaiveDateTime) -> NaiveDateTime {
    let at = schedule.time.unwrap_or_else(default_time);
    match schedule.kind {
        Recurrence::Once => never(),
        Recurrence::EveryMinutes => {
            let minutes = schedule.every_minutes.unwrap_or(1).max(1);
            now + Duration::minutes(i64::from(minutes))
        }
        Recurrence::Daily => next_daily(now, at),
        Recurrence::Weekly => next_weekly(now, schedule.weekday.unwrap_or(DEFAULT_WEEKDAY), at),
        Recurrence::Monthly => {
            let day = schedule.date.map(|d| d.day()).unwrap_or_else(|| now.day());
            next_monthly(now, day, at)
        }
        Recurrence::Unrecognized => now + Duration::minutes(FALLBACK_MINUTES),
    }
}

/// Today at `at`, or tomorrow if that moment is not in the future.
fn next_daily(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let candidate = now.date().and_time(at);
    if candidate <= now {
        candidate + Duration::days(1)
    } else {
        candidate
    }
}

/// Next `weekday` (0 = Sunday) at `at`; today counts if `at` is still ahead.
fn next_weekly(now: NaiveDateTime, weekday: i32, at: NaiveTime) -> NaiveDateTime {
    let today = i64::from(now.weekday().num_days_from_sunday());
    let offset = (i64::from(weekday) - today).rem_euclid(7);
    let candidate = (now.date() + Duration::days(offset)).and_time(at);
    if candidate <= now {
        candidate + Duration::days(7)
    } else {
        candidate
    }
}

/// `day` of this month (clamped to its length) at `at`; once that has passed,
/// `day` of next month, clamped to the length of next month.
fn next_monthly(now: NaiveDateTime, day: u32, at: NaiveTime) -> NaiveDateTime {
    let (year, month) = (now.year(), now.month());
    let candidate = clamped_date(year, month, day).and_time(at);
    if candidate > now {
        return candidate;
    }
    let (year, month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    clamped_date(year, month, day).and_time(at)
}

fn clamped_date(year: i32, month: u32, day: u32) -> NaiveDate {
    let day = day.clamp(1, days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MAX)
}

/// Number of days in `month` of `year`.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}
