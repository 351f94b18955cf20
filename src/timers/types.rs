//! Timer data model.
//!
//! Defines the structured [`TimeSpec`] produced by the parser, the persisted
//! [`TimerRecord`], and the denormalised [`TimerSnapshot`] handed to event
//! consumers and callers of `list`.

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A relative duration added to "now".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Interval {
    pub days: u32,
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
}

impl Interval {
    /// Total length of the interval in seconds.
    #[must_use]
    pub fn total_seconds(&self) -> i64 {
        i64::from(self.days) * 86_400
            + i64::from(self.hours) * 3600
            + i64::from(self.minutes) * 60
            + i64::from(self.seconds)
    }

    /// Shorthand for an interval of whole minutes.
    #[must_use]
    pub fn minutes(minutes: u32) -> Self {
        Self {
            minutes,
            ..Self::default()
        }
    }

    /// Shorthand for an interval of whole seconds.
    #[must_use]
    pub fn seconds(seconds: u32) -> Self {
        Self {
            seconds,
            ..Self::default()
        }
    }
}

/// Half of the day a clock time refers to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Meridiem {
    /// Not stated; arithmetic picks the nearest sensible half.
    #[default]
    #[serde(rename = "")]
    Unspecified,
    #[serde(rename = "am")]
    Am,
    #[serde(rename = "pm")]
    Pm,
}

impl Meridiem {
    /// `true` when the speaker said am/pm (or an equivalent word).
    #[must_use]
    pub fn is_explicit(self) -> bool {
        self != Self::Unspecified
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "",
            Self::Am => "am",
            Self::Pm => "pm",
        }
    }

    /// Parse `am`/`pm` (case-insensitive); anything else is unspecified.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "am" => Self::Am,
            "pm" => Self::Pm,
            _ => Self::Unspecified,
        }
    }
}

/// Symbolic day a clock time refers to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum DayRef {
    /// No day given; resolves like `Today`.
    #[default]
    Unspecified,
    Today,
    Tomorrow,
    /// A named weekday; `next` forces an extra full week.
    Weekday { day: Weekday, next: bool },
}

impl DayRef {
    /// Parse a day keyword such as `"tomorrow"` or `"next friday"`.
    ///
    /// Returns `None` for text that is not a day keyword.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        match raw.as_str() {
            "" => return Some(Self::Unspecified),
            "today" => return Some(Self::Today),
            "tomorrow" => return Some(Self::Tomorrow),
            _ => {}
        }
        let (next, name) = match raw.strip_prefix("next ") {
            Some(rest) => (true, rest.trim()),
            None => (false, raw.as_str()),
        };
        let day = Weekday::from_str(name).ok()?;
        Some(Self::Weekday { day, next })
    }
}

impl fmt::Display for DayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unspecified => Ok(()),
            Self::Today => f.write_str("today"),
            Self::Tomorrow => f.write_str("tomorrow"),
            Self::Weekday { day, next } => {
                if *next {
                    f.write_str("next ")?;
                }
                f.write_str(weekday_name(*day))
            }
        }
    }
}

impl From<DayRef> for String {
    fn from(day: DayRef) -> Self {
        day.to_string()
    }
}

impl From<String> for DayRef {
    fn from(raw: String) -> Self {
        Self::parse(&raw).unwrap_or_default()
    }
}

/// Lowercase English weekday name.
#[must_use]
pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// An absolute target time of day plus an optional symbolic day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockTime {
    pub day: DayRef,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub meridiem: Meridiem,
}

/// Structured time specification produced by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimeSpec {
    Interval(Interval),
    ClockTime(ClockTime),
}

impl TimeSpec {
    /// Which record kind this spec produces.
    #[must_use]
    pub fn kind(&self) -> TimerKind {
        match self {
            Self::Interval(_) => TimerKind::Interval,
            Self::ClockTime(_) => TimerKind::ClockTime,
        }
    }
}

/// Category of a timer; selects the event-name family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerClass {
    Alarm,
    Reminder,
    #[default]
    Timer,
    Command,
}

impl TimerClass {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alarm => "alarm",
            Self::Reminder => "reminder",
            Self::Timer => "timer",
            Self::Command => "command",
        }
    }

    /// Event name prefix for this class.
    #[must_use]
    pub fn event_prefix(self) -> &'static str {
        match self {
            Self::Command => "va_timer_command_",
            _ => "va_timer_",
        }
    }
}

impl fmt::Display for TimerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimerClass {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "alarm" => Ok(Self::Alarm),
            "reminder" => Ok(Self::Reminder),
            "timer" => Ok(Self::Timer),
            "command" => Ok(Self::Command),
            other => Err(format!("unknown timer class: {other}")),
        }
    }
}

/// Which [`TimeSpec`] variant produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    Interval,
    ClockTime,
}

/// Lifecycle status of a timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerStatus {
    #[default]
    Inactive,
    Running,
    Snoozed,
    Expired,
}

/// Lifecycle events emitted by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerEventKind {
    Started,
    Warning,
    Snoozed,
    Expired,
}

impl TimerEventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Warning => "warning",
            Self::Snoozed => "snoozed",
            Self::Expired => "expired",
        }
    }

    /// Full event name for a timer of `class`, e.g. `va_timer_expired`.
    #[must_use]
    pub fn event_name(self, class: TimerClass) -> String {
        format!("{}{}", class.event_prefix(), self.as_str())
    }
}

/// The persisted, authoritative timer entity.
///
/// Timestamps are unix seconds. `revision` is an in-memory freshness
/// fingerprint; it is never serialised and is ignored by equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerRecord {
    /// Map key in the store; not repeated inside the persisted value.
    #[serde(skip)]
    pub id: String,
    pub owner: String,
    pub timer_class: TimerClass,
    pub timer_kind: TimerKind,
    #[serde(default)]
    pub name: Option<String>,
    pub original_expiry: i64,
    pub expiry: i64,
    #[serde(default)]
    pub pre_expiry_warning: u64,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub status: TimerStatus,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
    #[serde(skip)]
    pub(crate) revision: u64,
}

impl TimerRecord {
    /// Seconds until expiry relative to `now_ts` (negative when overdue).
    #[must_use]
    pub fn remaining_secs(&self, now_ts: i64) -> i64 {
        self.expiry - now_ts
    }

    /// The spec this record was created from, if it was stored in `extra`.
    #[must_use]
    pub fn spec(&self) -> Option<TimeSpec> {
        self.extra
            .get("spec")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// `true` when `name` matches case-insensitively.
    #[must_use]
    pub fn name_matches(&self, name: &str) -> bool {
        self.name
            .as_deref()
            .is_some_and(|n| n.trim().eq_ignore_ascii_case(name.trim()))
    }
}

impl PartialEq for TimerRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.owner == other.owner
            && self.timer_class == other.timer_class
            && self.timer_kind == other.timer_kind
            && self.name == other.name
            && self.original_expiry == other.original_expiry
            && self.expiry == other.expiry
            && self.pre_expiry_warning == other.pre_expiry_warning
            && self.created_at == other.created_at
            && self.updated_at == other.updated_at
            && self.status == other.status
            && self.extra == other.extra
    }
}

/// Remaining-time breakdown attached to every snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryBreakdown {
    pub seconds_remaining: i64,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
    /// `Today`, `Tomorrow`, a weekday name, or a month-day string.
    pub day_label: String,
    /// Expiry time of day, 12- or 24-hour per configuration.
    pub time_label: String,
    /// Spoken-style text: a duration for intervals, "<day> at <time>" otherwise.
    pub text: String,
}

/// Denormalised view of a record; the payload of every timer event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    pub timer_id: String,
    pub owner: String,
    pub timer_class: TimerClass,
    pub timer_kind: TimerKind,
    pub name: Option<String>,
    /// RFC 3339 local time.
    pub expiry: String,
    /// RFC 3339 local time.
    pub original_expiry: String,
    pub pre_expiry_warning: u64,
    pub expiry_breakdown: ExpiryBreakdown,
    pub created_at: String,
    pub updated_at: String,
    pub status: TimerStatus,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn interval_total_seconds() {
        let interval = Interval {
            days: 1,
            hours: 2,
            minutes: 3,
            seconds: 4,
        };
        assert_eq!(interval.total_seconds(), 86_400 + 7200 + 180 + 4);
    }

    #[test]
    fn day_ref_parses_keywords() {
        assert_eq!(DayRef::parse(""), Some(DayRef::Unspecified));
        assert_eq!(DayRef::parse("Tomorrow"), Some(DayRef::Tomorrow));
        assert_eq!(
            DayRef::parse("next friday"),
            Some(DayRef::Weekday {
                day: Weekday::Fri,
                next: true
            })
        );
        assert_eq!(DayRef::parse("someday"), None);
    }

    #[test]
    fn day_ref_serialises_as_plain_string() {
        let day = DayRef::Weekday {
            day: Weekday::Mon,
            next: true,
        };
        let json = serde_json::to_string(&day).unwrap();
        assert_eq!(json, "\"next monday\"");
        let restored: DayRef = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, day);
    }

    #[test]
    fn time_spec_is_internally_tagged() {
        let spec = TimeSpec::Interval(Interval::minutes(5));
        let json = serde_json::to_value(spec).unwrap();
        assert_eq!(json["type"], "interval");
        assert_eq!(json["minutes"], 5);

        let clock = TimeSpec::ClockTime(ClockTime {
            hour: 3,
            minute: 15,
            meridiem: Meridiem::Pm,
            ..ClockTime::default()
        });
        let json = serde_json::to_value(clock).unwrap();
        assert_eq!(json["type"], "clock_time");
        assert_eq!(json["meridiem"], "pm");
        assert_eq!(json["day"], "");
    }

    #[test]
    fn event_names_follow_class_family() {
        assert_eq!(
            TimerEventKind::Started.event_name(TimerClass::Timer),
            "va_timer_started"
        );
        assert_eq!(
            TimerEventKind::Expired.event_name(TimerClass::Command),
            "va_timer_command_expired"
        );
        assert_eq!(
            TimerEventKind::Warning.event_name(TimerClass::Alarm),
            "va_timer_warning"
        );
    }

    #[test]
    fn timer_class_from_str() {
        assert_eq!("Alarm".parse::<TimerClass>().unwrap(), TimerClass::Alarm);
        assert!("stopwatch".parse::<TimerClass>().is_err());
    }
}
