//! Time arithmetic and spoken-style formatting.
//!
//! Pure functions: every operation takes `now` explicitly so the rules can be
//! exercised against fixed instants in any [`TimeZone`]. The scheduler calls
//! them with [`chrono::Local`].

use crate::timers::types::{
    ClockTime, DayRef, ExpiryBreakdown, Meridiem, TimeSpec, TimerKind, TimerRecord, TimerSnapshot,
};
use chrono::{DateTime, Datelike, Days, Duration, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use std::fmt::Display;

/// Unqualified times before this hour are assumed to mean the afternoon.
const EARLIEST_UNQUALIFIED_HOUR: u32 = 6;

/// Resolve a spec to the absolute instant it refers to.
///
/// Returns `None` for clock times with out-of-range fields and for instants
/// beyond the representable date range.
pub fn resolve_expiry<Tz: TimeZone>(spec: &TimeSpec, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    match spec {
        TimeSpec::Interval(interval) => Duration::try_seconds(interval.total_seconds())
            .and_then(|delta| now.clone().checked_add_signed(delta)),
        TimeSpec::ClockTime(clock) => resolve_clock_time(clock, now),
    }
}

fn resolve_clock_time<Tz: TimeZone>(clock: &ClockTime, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let explicit = clock.meridiem.is_explicit();
    let hour = match clock.meridiem {
        Meridiem::Pm if clock.hour < 12 => clock.hour + 12,
        Meridiem::Am if clock.hour == 12 => 0,
        _ => clock.hour,
    };
    let time = NaiveTime::from_hms_opt(hour, clock.minute, clock.second)?;
    let date = now
        .date_naive()
        .checked_add_days(Days::new(day_offset(clock.day, now.weekday())))?;
    let mut candidate = local_datetime(&now.timezone(), date.and_time(time))?;

    // Explicit am/pm means "that time on a later day"; otherwise try the
    // other half of the day first.
    let step = if explicit {
        Duration::hours(24)
    } else {
        Duration::hours(12)
    };
    while candidate < *now {
        candidate = candidate.checked_add_signed(step)?;
    }

    if !explicit && candidate.hour() < EARLIEST_UNQUALIFIED_HOUR {
        candidate = candidate.checked_add_signed(Duration::hours(12))?;
    }
    Some(candidate)
}

/// Days from today to the symbolic day.
///
/// A weekday that is today or earlier in the week rolls into next week;
/// `next <weekday>` adds a full week on top of that.
#[must_use]
pub fn day_offset(day: DayRef, today: chrono::Weekday) -> u64 {
    match day {
        DayRef::Unspecified | DayRef::Today => 0,
        DayRef::Tomorrow => 1,
        DayRef::Weekday { day, next } => {
            let target = u64::from(day.num_days_from_monday());
            let current = u64::from(today.num_days_from_monday());
            let forward = if target > current {
                target - current
            } else {
                target + 7 - current
            };
            if next { forward + 7 } else { forward }
        }
    }
}

/// Map a local wall-clock time to an instant.
///
/// Ambiguous times (DST fall-back) take the earliest instant; times inside a
/// DST gap move forward one hour.
fn local_datetime<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
}

/// Convert unix seconds into the timezone of `now`.
pub fn at_timestamp<Tz: TimeZone>(now: &DateTime<Tz>, ts: i64) -> DateTime<Tz> {
    now.timezone()
        .timestamp_opt(ts, 0)
        .single()
        .unwrap_or_else(|| now.clone())
}

fn pluralize(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("{count} {unit}")
    } else {
        format!("{count} {unit}s")
    }
}

/// Spoken-style duration, e.g. `"1 hour, 5 minutes and 3 seconds"`.
#[must_use]
pub fn humanize_duration(total_secs: i64) -> String {
    let secs = total_secs.max(0);
    let units = [
        (secs / 86_400, "day"),
        ((secs % 86_400) / 3600, "hour"),
        ((secs % 3600) / 60, "minute"),
        (secs % 60, "second"),
    ];
    let parts: Vec<String> = units
        .iter()
        .filter(|(count, _)| *count > 0)
        .map(|(count, unit)| pluralize(*count, unit))
        .collect();

    match parts.split_last() {
        None => "0 seconds".to_owned(),
        Some((last, [])) => last.clone(),
        Some((last, rest)) => format!("{} and {last}", rest.join(", ")),
    }
}

/// `Today`, `Tomorrow`, the weekday name within a week, else `"<Month> <d>"`.
pub fn day_label<Tz: TimeZone>(target: &DateTime<Tz>, now: &DateTime<Tz>) -> String
where
    Tz::Offset: Display,
{
    let days = (target.date_naive() - now.date_naive()).num_days();
    match days {
        0 => "Today".to_owned(),
        1 => "Tomorrow".to_owned(),
        2..=6 => target.format("%A").to_string(),
        _ => target.format("%B %-d").to_string(),
    }
}

/// Time of day, omitting seconds when they are zero.
pub fn time_label<Tz: TimeZone>(target: &DateTime<Tz>, use_24h: bool) -> String
where
    Tz::Offset: Display,
{
    let pattern = match (use_24h, target.second() == 0) {
        (true, true) => "%H:%M",
        (true, false) => "%H:%M:%S",
        (false, true) => "%-I:%M %p",
        (false, false) => "%-I:%M:%S %p",
    };
    target.format(pattern).to_string()
}

/// `"<day> at <time>"`, e.g. `"Tomorrow at 7:30 AM"`.
pub fn humanize_clock<Tz: TimeZone>(target: &DateTime<Tz>, now: &DateTime<Tz>, use_24h: bool) -> String
where
    Tz::Offset: Display,
{
    format!("{} at {}", day_label(target, now), time_label(target, use_24h))
}

/// Remaining-time breakdown for a record.
pub fn expiry_breakdown<Tz: TimeZone>(
    record: &TimerRecord,
    now: &DateTime<Tz>,
    use_24h: bool,
) -> ExpiryBreakdown
where
    Tz::Offset: Display,
{
    let remaining = record.remaining_secs(now.timestamp()).max(0);
    let target = at_timestamp(now, record.expiry);
    let day_label = day_label(&target, now);
    let time_label = time_label(&target, use_24h);
    let text = match record.timer_kind {
        TimerKind::Interval => humanize_duration(remaining),
        TimerKind::ClockTime => format!("{day_label} at {time_label}"),
    };

    ExpiryBreakdown {
        seconds_remaining: remaining,
        days: remaining / 86_400,
        hours: (remaining % 86_400) / 3600,
        minutes: (remaining % 3600) / 60,
        seconds: remaining % 60,
        day_label,
        time_label,
        text,
    }
}

/// Denormalised snapshot of a record as seen at `now`.
pub fn snapshot<Tz: TimeZone>(record: &TimerRecord, now: &DateTime<Tz>, use_24h: bool) -> TimerSnapshot
where
    Tz::Offset: Display,
{
    let rfc3339 = |ts: i64| at_timestamp(now, ts).to_rfc3339();
    TimerSnapshot {
        timer_id: record.id.clone(),
        owner: record.owner.clone(),
        timer_class: record.timer_class,
        timer_kind: record.timer_kind,
        name: record.name.clone(),
        expiry: rfc3339(record.expiry),
        original_expiry: rfc3339(record.original_expiry),
        pre_expiry_warning: record.pre_expiry_warning,
        expiry_breakdown: expiry_breakdown(record, now, use_24h),
        created_at: rfc3339(record.created_at),
        updated_at: rfc3339(record.updated_at),
        status: record.status,
        extra: record.extra.clone(),
    }
}
