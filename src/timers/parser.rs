//! Natural-language time expression parser.
//!
//! Turns spoken phrases such as `"quarter past 3 pm"`, `"an hour and a half"`
//! or `"tomorrow at 7"` into a [`TimeSpec`].
//!
//! # Pipeline
//!
//! 1. Normalise: lowercase, strip punctuation and leading filler, apply the
//!    phrase table, convert number words to digits.
//! 2. Classify as interval or clock time, and as "super" when fractional or
//!    relative vocabulary (quarter, half, noon, tonight, past/to...) appears.
//! 3. Try the ordered grammar table for that category. Super grammars come
//!    first; base grammars are skipped for super sentences. First full match
//!    wins.
//!
//! A sentence no grammar accepts yields `None`; that is an expected outcome,
//! not an error.

use crate::timers::types::{ClockTime, DayRef, Interval, Meridiem, TimeSpec};
use regex::{Captures, Regex};
use std::sync::OnceLock;
use tracing::{debug, error};

const DAY: &str = r"(?:next )?(?:monday|tuesday|wednesday|thursday|friday|saturday|sunday)|today|tomorrow";
const FRACTION: &str = r"quarter|half|1/4|1/2|3/4";
const PERIOD: &str = r"morning|afternoon|evening|tonight|night";
const HOUR_UNIT: &str = r"(?:hours?|hrs?)";
const MINUTE_UNIT: &str = r"(?:minutes?|mins?)";

/// Leading words that carry no time information.
const FILLERS: &[&str] = &["in ", "for ", "at ", "after "];

/// Fixed phrase rewrites, applied in order on word boundaries.
const PHRASES: &[(&str, &str)] = &[
    ("three quarters", "3/4"),
    ("three quarter", "3/4"),
    ("a quarter", "quarter"),
    ("a half", "half"),
    ("half an hour", "half hour"),
    ("an hour", "1 hour"),
    ("a day", "1 day"),
    ("a minute", "1 minute"),
    ("a second", "1 second"),
];

/// Minutes (or seconds) denoted by a fraction token.
fn fraction_value(token: &str) -> Option<u32> {
    match token {
        "quarter" | "1/4" => Some(15),
        "half" | "1/2" => Some(30),
        "3/4" => Some(45),
        _ => None,
    }
}

/// Named hours, expressed on the 24-hour clock with their meridiem.
fn special_hour(token: &str) -> Option<(u32, Meridiem)> {
    match token {
        "midnight" => Some((0, Meridiem::Am)),
        "noon" | "midday" => Some((12, Meridiem::Pm)),
        _ => None,
    }
}

fn meridiem_word(token: &str) -> Option<Meridiem> {
    match token {
        "am" | "morning" => Some(Meridiem::Am),
        "pm" | "afternoon" | "evening" | "tonight" | "night" => Some(Meridiem::Pm),
        _ => None,
    }
}

/// The `TimeSpec` field a capture group fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Days,
    Hours,
    Minutes,
    Seconds,
    Day,
    Hour,
    Minute,
    Second,
    Meridiem,
    /// `past` or `to`.
    Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Interval,
    ClockTime,
}

/// One entry of the grammar table: a whole-sentence pattern plus the fields
/// its capture groups map onto, in group order.
struct Grammar {
    name: &'static str,
    pattern: Regex,
    fields: &'static [Field],
}

impl Grammar {
    fn try_match(&self, category: Category, sentence: &str) -> Option<TimeSpec> {
        let caps = self.pattern.captures(sentence)?;
        let spec = match category {
            Category::Interval => extract_interval(self.fields, &caps),
            Category::ClockTime => extract_clock_time(self.fields, &caps, sentence),
        };
        if spec.is_some() {
            debug!(grammar = self.name, "time sentence matched");
        }
        spec
    }
}

struct GrammarTable {
    interval_super: Vec<Grammar>,
    interval_base: Vec<Grammar>,
    clock_super: Vec<Grammar>,
    clock_base: Vec<Grammar>,
    unit_words: Option<Regex>,
    clock_phrase: Option<Regex>,
    super_words: Option<Regex>,
    day_word: Option<Regex>,
    decimal_time: Option<Regex>,
}

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            error!("invalid time grammar pattern {pattern:?}: {e}");
            None
        }
    }
}

fn grammars(entries: Vec<(&'static str, String, &'static [Field])>) -> Vec<Grammar> {
    entries
        .into_iter()
        .filter_map(|(name, pattern, fields)| {
            compile(&pattern).map(|pattern| Grammar {
                name,
                pattern,
                fields,
            })
        })
        .collect()
}

fn table() -> &'static GrammarTable {
    static TABLE: OnceLock<GrammarTable> = OnceLock::new();
    TABLE.get_or_init(build_table)
}

fn build_table() -> GrammarTable {
    use Field::*;

    let trailing_day = format!(r"(?: (?:on )?(?:{DAY}))?");

    let interval_super = grammars(vec![
        (
            "fraction_of_hour",
            format!(r"^({FRACTION})(?: of)?(?: an?| 1)? {HOUR_UNIT}$"),
            &[Minutes],
        ),
        (
            "fraction_of_minute",
            format!(r"^({FRACTION})(?: of)?(?: an?| 1)? {MINUTE_UNIT}$"),
            &[Seconds],
        ),
        (
            "hours_and_fraction",
            format!(r"^(\d+) {HOUR_UNIT} and ({FRACTION})(?: of)?(?: an?| 1)?(?: {HOUR_UNIT})?$"),
            &[Hours, Minutes],
        ),
        (
            "number_and_fraction_hours",
            format!(r"^(\d+) and ({FRACTION}) {HOUR_UNIT}$"),
            &[Hours, Minutes],
        ),
        (
            "minutes_and_fraction",
            format!(r"^(\d+) {MINUTE_UNIT} and ({FRACTION})(?: of)?(?: an?| 1)?(?: {MINUTE_UNIT})?$"),
            &[Minutes, Seconds],
        ),
        (
            "number_and_fraction_minutes",
            format!(r"^(\d+) and ({FRACTION}) {MINUTE_UNIT}$"),
            &[Minutes, Seconds],
        ),
    ]);

    let sep = r"\s*,?\s*(?:and\s+)?";
    let interval_base = grammars(vec![(
        "duration",
        format!(
            r"^(?:(\d+)\s*days?)?(?:{sep}(\d+)\s*{HOUR_UNIT})?(?:{sep}(\d+)\s*{MINUTE_UNIT})?(?:{sep}(\d+)\s*(?:seconds?|secs?))?$"
        ),
        &[Days, Hours, Minutes, Seconds],
    )]);

    let clock_super = grammars(vec![
        (
            "past_to",
            format!(
                r"^(?:({DAY}) )?(?:at )?(\d{{1,2}}|{FRACTION})(?: {MINUTE_UNIT})? (past|to) (\d{{1,2}}|midnight|noon|midday)(?: (am|pm))?(?: (?:in the |at |this )?({PERIOD}))?{trailing_day}$"
            ),
            &[Day, Minute, Direction, Hour, Meridiem, Meridiem],
        ),
        (
            "special_hour",
            format!(r"^(?:({DAY}) )?(?:at )?(midnight|noon|midday){trailing_day}$"),
            &[Day, Hour],
        ),
        (
            "time_then_period",
            format!(
                r"^(?:({DAY}) )?(?:at )?(\d{{1,2}})(?:[: ](\d{{2}}))?(?: o'?clock)? (?:in the |at |this )?({PERIOD}){trailing_day}$"
            ),
            &[Day, Hour, Minute, Meridiem],
        ),
        (
            "period_then_time",
            format!(
                r"^(?:({DAY}) )?(?:this )?({PERIOD}) (?:at )?(\d{{1,2}})(?:[: ](\d{{2}}))?(?: o'?clock)?$"
            ),
            &[Day, Meridiem, Hour, Minute],
        ),
    ]);

    let clock_base = grammars(vec![(
        "clock",
        format!(
            r"^(?:({DAY}) )?(?:at )?(\d{{1,2}})(?:[: ](\d{{2}}))?(?::(\d{{2}}))?(?: ?(am|pm))?(?: o'?clock)?{trailing_day}$"
        ),
        &[Day, Hour, Minute, Second, Meridiem],
    )]);

    GrammarTable {
        interval_super,
        interval_base,
        clock_super,
        clock_base,
        unit_words: compile(r"\b(?:days?|hours?|hrs?|minutes?|mins?|seconds?|secs?)\b"),
        clock_phrase: compile(&format!(r"\d+ {MINUTE_UNIT} (?:past|to) ")),
        super_words: compile(
            r"\b(?:quarter|half|midnight|noon|midday|morning|afternoon|evening|tonight|past|to)\b|\b[13]/[24]\b",
        ),
        day_word: compile(&format!(r"\b({DAY})\b")),
        decimal_time: compile(r"(\d)\.(\d)"),
    }
}

fn matches(re: Option<&Regex>, text: &str) -> bool {
    re.is_some_and(|re| re.is_match(text))
}

/// Parse a spoken time expression.
///
/// Returns the normalised sentence together with the parsed spec, or `None`
/// when no grammar accepts the sentence.
#[must_use]
pub fn parse(sentence: &str) -> (String, Option<TimeSpec>) {
    let table = table();
    let normalized = normalize(sentence);

    let is_interval = matches(table.unit_words.as_ref(), &normalized)
        && !matches(table.clock_phrase.as_ref(), &normalized);
    let is_super = matches(table.super_words.as_ref(), &normalized);

    let (category, super_grammars, base_grammars) = if is_interval {
        (Category::Interval, &table.interval_super, &table.interval_base)
    } else {
        (Category::ClockTime, &table.clock_super, &table.clock_base)
    };

    let candidates = super_grammars
        .iter()
        .filter(|_| is_super)
        .chain(base_grammars.iter().filter(|_| !is_super));

    for grammar in candidates {
        if let Some(spec) = grammar.try_match(category, &normalized) {
            return (normalized, Some(spec));
        }
    }

    debug!(sentence = %normalized, "no time grammar matched");
    (normalized, None)
}

/// Normalise a sentence for grammar matching.
#[must_use]
pub fn normalize(sentence: &str) -> String {
    let mut text = sentence.to_lowercase();
    for (from, to) in [("a.m.", "am"), ("p.m.", "pm"), ("a.m", "am"), ("p.m", "pm")] {
        text = text.replace(from, to);
    }
    if let Some(re) = table().decimal_time.as_ref() {
        text = re.replace_all(&text, "$1:$2").into_owned();
    }

    let text: String = text
        .chars()
        .map(|c| match c {
            ',' | '.' | '!' | '?' | ';' | '"' | '-' => ' ',
            other => other,
        })
        .collect();

    let mut padded = format!(" {} ", text.split_whitespace().collect::<Vec<_>>().join(" "));
    for (from, to) in PHRASES {
        padded = padded.replace(&format!(" {from} "), &format!(" {to} "));
    }

    let mut text = words_to_digits(&padded);
    loop {
        let stripped = FILLERS
            .iter()
            .find_map(|filler| text.strip_prefix(filler).map(str::to_owned));
        match stripped {
            Some(rest) => text = rest,
            None => break,
        }
    }
    text
}

fn unit_value(word: &str) -> Option<u32> {
    let value = match word {
        "zero" => 0,
        "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        "thirteen" => 13,
        "fourteen" => 14,
        "fifteen" => 15,
        "sixteen" => 16,
        "seventeen" => 17,
        "eighteen" => 18,
        "nineteen" => 19,
        _ => return None,
    };
    Some(value)
}

fn tens_value(word: &str) -> Option<u32> {
    let value = match word {
        "twenty" => 20,
        "thirty" => 30,
        "forty" => 40,
        "fifty" => 50,
        "sixty" => 60,
        "seventy" => 70,
        "eighty" => 80,
        "ninety" => 90,
        _ => return None,
    };
    Some(value)
}

/// Replace spelled-out numbers with digits (`"twenty five"` → `"25"`,
/// `"three oh five"` → `"3 05"`).
fn words_to_digits(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut out: Vec<String> = Vec::with_capacity(words.len());
    let mut i = 0;

    while let Some(word) = words.get(i) {
        let next_unit = words
            .get(i + 1)
            .and_then(|w| unit_value(w))
            .filter(|u| (1..=9).contains(u));

        if let Some(tens) = tens_value(word) {
            match next_unit {
                Some(unit) => {
                    out.push((tens + unit).to_string());
                    i += 2;
                }
                None => {
                    out.push(tens.to_string());
                    i += 1;
                }
            }
            continue;
        }

        if *word == "oh"
            && let Some(unit) = next_unit
            && !out.is_empty()
        {
            out.push(format!("0{unit}"));
            i += 2;
            continue;
        }

        match unit_value(word) {
            Some(value) => out.push(value.to_string()),
            None => out.push((*word).to_owned()),
        }
        i += 1;
    }

    out.join(" ")
}

/// Numeric value of a captured token: digits or a fraction word.
fn token_number(token: &str) -> Option<u32> {
    token.parse().ok().or_else(|| fraction_value(token))
}

fn extract_interval(fields: &[Field], caps: &Captures<'_>) -> Option<TimeSpec> {
    let mut interval = Interval::default();
    let mut matched_any = false;

    for (index, field) in fields.iter().enumerate() {
        let Some(token) = caps.get(index + 1).map(|m| m.as_str()) else {
            continue;
        };
        let value = token_number(token)?;
        matched_any = true;
        match field {
            Field::Days => interval.days = value,
            Field::Hours => interval.hours = value,
            Field::Minutes => interval.minutes = value,
            Field::Seconds => interval.seconds = value,
            _ => {}
        }
    }

    matched_any.then_some(TimeSpec::Interval(interval))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Past,
    To,
}

fn extract_clock_time(fields: &[Field], caps: &Captures<'_>, sentence: &str) -> Option<TimeSpec> {
    let mut clock = ClockTime::default();
    let mut direction = None;
    let mut special = false;

    for (index, field) in fields.iter().enumerate() {
        let Some(token) = caps.get(index + 1).map(|m| m.as_str()) else {
            continue;
        };
        match field {
            Field::Day => clock.day = DayRef::parse(token)?,
            Field::Hour => match special_hour(token) {
                Some((hour, meridiem)) => {
                    clock.hour = hour;
                    clock.meridiem = meridiem;
                    special = true;
                }
                None => clock.hour = token.parse().ok()?,
            },
            Field::Minute => clock.minute = token_number(token)?,
            Field::Second => clock.second = token.parse().ok()?,
            Field::Meridiem => {
                if !special {
                    clock.meridiem = meridiem_word(token)?;
                }
            }
            Field::Direction => {
                direction = Some(if token == "to" {
                    Direction::To
                } else {
                    Direction::Past
                });
            }
            _ => {}
        }
    }

    if direction == Some(Direction::To) {
        if clock.minute == 0 || clock.minute >= 60 {
            return None;
        }
        clock.minute = 60 - clock.minute;
        if special {
            let hour = (clock.hour + 23) % 24;
            clock.hour = hour;
            clock.meridiem = if hour < 12 { Meridiem::Am } else { Meridiem::Pm };
        } else {
            clock.hour = if clock.hour == 0 { 23 } else { clock.hour - 1 };
            // "quarter to 12 pm" is 11:45 am.
            if clock.hour == 11 {
                clock.meridiem = match clock.meridiem {
                    Meridiem::Am => Meridiem::Pm,
                    Meridiem::Pm => Meridiem::Am,
                    Meridiem::Unspecified => Meridiem::Unspecified,
                };
            }
        }
    }

    if clock.hour > 23 || clock.minute > 59 || clock.second > 59 {
        return None;
    }

    if clock.day == DayRef::Unspecified
        && let Some(day) = table()
            .day_word
            .as_ref()
            .and_then(|re| re.captures(sentence))
            .and_then(|c| c.get(1))
            .and_then(|m| DayRef::parse(m.as_str()))
    {
        clock.day = day;
    }

    Some(TimeSpec::ClockTime(clock))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::Weekday;

    fn interval_of(sentence: &str) -> Interval {
        match parse(sentence).1 {
            Some(TimeSpec::Interval(interval)) => interval,
            other => panic!("{sentence:?} parsed as {other:?}"),
        }
    }

    fn clock_of(sentence: &str) -> ClockTime {
        match parse(sentence).1 {
            Some(TimeSpec::ClockTime(clock)) => clock,
            other => panic!("{sentence:?} parsed as {other:?}"),
        }
    }

    #[test]
    fn plain_minutes() {
        assert_eq!(interval_of("5 minutes"), Interval::minutes(5));
        assert_eq!(interval_of("in five minutes"), Interval::minutes(5));
    }

    #[test]
    fn compound_interval() {
        let interval = interval_of("1 day, 2 hours and 30 minutes");
        assert_eq!(interval.days, 1);
        assert_eq!(interval.hours, 2);
        assert_eq!(interval.minutes, 30);
        assert_eq!(interval.seconds, 0);

        let interval = interval_of("twenty-five minutes and ten seconds");
        assert_eq!(interval.minutes, 25);
        assert_eq!(interval.seconds, 10);
    }

    #[test]
    fn synonyms_for_quarter_hour_agree() {
        let phrases = [
            "quarter of an hour",
            "a quarter of an hour",
            "15 minutes",
            "fifteen minutes",
            "1/4 of an hour",
        ];
        for phrase in phrases {
            assert_eq!(interval_of(phrase).total_seconds(), 900, "{phrase}");
        }
    }

    #[test]
    fn half_and_three_quarter_hours() {
        assert_eq!(interval_of("half an hour").total_seconds(), 1800);
        assert_eq!(interval_of("three quarters of an hour").total_seconds(), 2700);
        assert_eq!(interval_of("an hour and a half").total_seconds(), 5400);
        assert_eq!(interval_of("2 and a half hours").total_seconds(), 9000);
        assert_eq!(interval_of("half a minute").total_seconds(), 30);
        assert_eq!(interval_of("a minute and a half").total_seconds(), 90);
        assert_eq!(interval_of("two minutes and three quarters").total_seconds(), 165);
        assert_eq!(interval_of("3 and a half minutes").total_seconds(), 210);
    }

    #[test]
    fn phrase_table_handles_articles() {
        assert_eq!(interval_of("a day").days, 1);
        assert_eq!(interval_of("an hour").hours, 1);
    }

    #[test]
    fn quarter_past_three_pm() {
        let clock = clock_of("quarter past 3 pm");
        assert_eq!(clock.hour, 3);
        assert_eq!(clock.minute, 15);
        assert_eq!(clock.meridiem, Meridiem::Pm);
        assert_eq!(clock.day, DayRef::Unspecified);
    }

    #[test]
    fn minutes_to_the_hour() {
        let clock = clock_of("twenty to four");
        assert_eq!((clock.hour, clock.minute), (3, 40));

        let clock = clock_of("10 minutes to 6 pm");
        assert_eq!((clock.hour, clock.minute, clock.meridiem), (5, 50, Meridiem::Pm));

        let clock = clock_of("quarter to noon");
        assert_eq!((clock.hour, clock.minute, clock.meridiem), (11, 45, Meridiem::Am));

        let clock = clock_of("quarter to midnight");
        assert_eq!((clock.hour, clock.minute, clock.meridiem), (23, 45, Meridiem::Pm));
    }

    #[test]
    fn special_hours_and_periods() {
        let clock = clock_of("midnight");
        assert_eq!((clock.hour, clock.meridiem), (0, Meridiem::Am));

        let clock = clock_of("half past midnight");
        assert_eq!((clock.hour, clock.minute), (0, 30));

        let clock = clock_of("noon tomorrow");
        assert_eq!((clock.hour, clock.meridiem), (12, Meridiem::Pm));
        assert_eq!(clock.day, DayRef::Tomorrow);

        let clock = clock_of("7 tonight");
        assert_eq!((clock.hour, clock.meridiem), (7, Meridiem::Pm));

        let clock = clock_of("tomorrow morning at 6 30");
        assert_eq!((clock.hour, clock.minute, clock.meridiem), (6, 30, Meridiem::Am));
        assert_eq!(clock.day, DayRef::Tomorrow);
    }

    #[test]
    fn base_clock_forms() {
        let clock = clock_of("7:30 pm");
        assert_eq!((clock.hour, clock.minute, clock.meridiem), (7, 30, Meridiem::Pm));

        let clock = clock_of("at 7am");
        assert_eq!((clock.hour, clock.meridiem), (7, Meridiem::Am));

        let clock = clock_of("three thirty p.m.");
        assert_eq!((clock.hour, clock.minute, clock.meridiem), (3, 30, Meridiem::Pm));

        let clock = clock_of("three oh five");
        assert_eq!((clock.hour, clock.minute), (3, 5));

        let clock = clock_of("6:45:30");
        assert_eq!((clock.hour, clock.minute, clock.second), (6, 45, 30));
    }

    #[test]
    fn day_is_captured_or_backfilled() {
        let clock = clock_of("next friday at 9");
        assert_eq!(
            clock.day,
            DayRef::Weekday {
                day: Weekday::Fri,
                next: true
            }
        );

        let clock = clock_of("7 am on monday");
        assert_eq!(
            clock.day,
            DayRef::Weekday {
                day: Weekday::Mon,
                next: false
            }
        );
        assert_eq!(clock.hour, 7);
    }

    #[test]
    fn unparseable_sentences_yield_none() {
        let (normalized, spec) = parse("Whenever you feel like it!");
        assert_eq!(normalized, "whenever you feel like it");
        assert!(spec.is_none());
        assert!(parse("").1.is_none());
        assert!(parse("25:00").1.is_none());
        assert!(parse("tomorrow").1.is_none());
    }

    #[test]
    fn normalize_converts_numbers_and_fillers() {
        assert_eq!(normalize("In Twenty-Five Minutes."), "25 minutes");
        assert_eq!(normalize("for an hour"), "1 hour");
        assert_eq!(normalize("6.30 pm"), "6:30 pm");
    }
}
