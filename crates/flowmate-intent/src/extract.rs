//! Parameter extraction: turn a user message into the seed context.
//!
//! Sources are merged in a fixed order, later sources overwriting earlier
//! keys:
//!
//! 1. calendar anchors for the current day (`today`, `week_start`, `week_end`),
//! 2. the template's default parameters,
//! 3. email addresses (`email`, `emails`, `email_list`),
//! 4. date phrases (`date`, `dates`, `date_phrase`, and `start_date` /
//!    `end_date` for week phrases),
//! 5. free-text search terms (`query`, `topic`).
//!
//! Values the message does not contain are left absent; the engine decides
//! at step time whether a step can run without them.

use std::sync::LazyLock;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use regex::{Captures, Regex};
use serde_json::{Value, json};

use crate::template::{Context, WorkflowTemplate};

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(?:\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}")
        .expect("email pattern is valid")
});

static ISO_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("iso date pattern is valid")
});

static US_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").expect("us date pattern is valid")
});

static MONTH_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sept?(?:ember)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?\s+(\d{1,2})(?:st|nd|rd|th)?\b(?:,?\s*(\d{4})\b)?",
    )
    .expect("month date pattern is valid")
});

static RELATIVE_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(today|tomorrow|yesterday)\b").expect("relative day pattern is valid")
});

static WEEKDAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:(next|this|on)\s+)?(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b",
    )
    .expect("weekday pattern is valid")
});

static IN_DAYS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bin\s+(\d{1,3})\s+days?\b").expect("in-days pattern is valid")
});

static WEEK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(this|next|last)\s+week\b").expect("week pattern is valid")
});

static QUOTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""([^"]+)"|“([^”]+)”"#).expect("quoted pattern is valid")
});

static TOPIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:about|regarding)\s+([^.?!;\n]+)").expect("topic pattern is valid")
});

/// A date phrase recognised in a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateMention {
    /// The phrase as written.
    pub phrase: String,
    /// Byte offset of the phrase in the message.
    pub start: usize,
    /// The resolved day (first day for week phrases).
    pub date: NaiveDate,
    /// Inclusive Monday..Sunday range for week phrases.
    pub range: Option<(NaiveDate, NaiveDate)>,
}

/// Build the seed context for `template` from `message`.
///
/// Relative dates are resolved against `today`.
pub fn extract_parameters(template: &WorkflowTemplate, message: &str, today: NaiveDate) -> Context {
    let mut context = Context::new();

    let (week_start, week_end) = week_bounds(today);
    context.insert("today".into(), json!(iso(today)));
    context.insert("week_start".into(), json!(iso(week_start)));
    context.insert("week_end".into(), json!(iso(week_end)));

    for (key, value) in &template.defaults {
        context.insert(key.clone(), value.clone());
    }

    let emails = find_emails(message);
    if let Some(first) = emails.first() {
        context.insert("email".into(), json!(first));
        context.insert("email_list".into(), json!(emails.join(", ")));
        context.insert("emails".into(), json!(emails));
    }

    let dates = find_dates(message, today);
    if let Some(first) = dates.first() {
        context.insert("date".into(), json!(iso(first.date)));
        context.insert("date_phrase".into(), json!(first.phrase));
        let mut all: Vec<String> = Vec::with_capacity(dates.len());
        for mention in &dates {
            let day = iso(mention.date);
            if !all.contains(&day) {
                all.push(day);
            }
        }
        context.insert("dates".into(), json!(all));
    }
    if let Some((start, end)) = dates.iter().find_map(|d| d.range) {
        context.insert("start_date".into(), json!(iso(start)));
        context.insert("end_date".into(), json!(iso(end)));
        context.insert("week_start".into(), json!(iso(start)));
        context.insert("week_end".into(), json!(iso(end)));
    }

    let quoted = find_query(message);
    let topic = find_topic(message, &dates);
    if let Some(query) = quoted.clone().or_else(|| topic.clone()) {
        context.insert("query".into(), Value::String(query));
    }
    if let Some(topic) = topic {
        context.insert("topic".into(), Value::String(topic));
    }

    context
}

/// Email addresses in order of appearance, without duplicates.
pub fn find_emails(message: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for m in EMAIL.find_iter(message) {
        let email = m.as_str().to_string();
        if !found.iter().any(|e| e.eq_ignore_ascii_case(&email)) {
            found.push(email);
        }
    }
    found
}

/// Date phrases in order of appearance.  Phrases naming an impossible day
/// (e.g. `2026-02-30`) are dropped.
pub fn find_dates(message: &str, today: NaiveDate) -> Vec<DateMention> {
    let mut found = Vec::new();
    let mut push =
        |caps: &Captures<'_>, date: Option<NaiveDate>, range: Option<(NaiveDate, NaiveDate)>| {
            if let (Some(m), Some(date)) = (caps.get(0), date) {
                found.push(DateMention {
                    phrase: m.as_str().to_string(),
                    start: m.start(),
                    date,
                    range,
                });
            }
        };

    for caps in ISO_DATE.captures_iter(message) {
        let date = ymd(&caps[1], &caps[2], &caps[3]);
        push(&caps, date, None);
    }
    for caps in US_DATE.captures_iter(message) {
        let date = ymd(&caps[3], &caps[1], &caps[2]);
        push(&caps, date, None);
    }
    for caps in MONTH_DATE.captures_iter(message) {
        let month = month_number(&caps[1]);
        let day: Option<u32> = caps[2].parse().ok();
        let date = match (month, day, caps.get(3)) {
            (Some(m), Some(d), Some(year)) => year
                .as_str()
                .parse()
                .ok()
                .and_then(|y| NaiveDate::from_ymd_opt(y, m, d)),
            // Without a year, the next occurrence on or after today.
            (Some(m), Some(d), None) => NaiveDate::from_ymd_opt(today.year(), m, d)
                .filter(|date| *date >= today)
                .or_else(|| NaiveDate::from_ymd_opt(today.year() + 1, m, d)),
            _ => None,
        };
        push(&caps, date, None);
    }
    for caps in RELATIVE_DAY.captures_iter(message) {
        let offset = match caps[1].to_ascii_lowercase().as_str() {
            "tomorrow" => 1,
            "yesterday" => -1,
            _ => 0,
        };
        push(&caps, Some(today + Duration::days(offset)), None);
    }
    for caps in WEEKDAY.captures_iter(message) {
        let strictly_after = caps
            .get(1)
            .is_some_and(|p| p.as_str().eq_ignore_ascii_case("next"));
        let date = weekday_from_name(&caps[2]).map(|wd| upcoming(today, wd, strictly_after));
        push(&caps, date, None);
    }
    for caps in IN_DAYS.captures_iter(message) {
        let date = caps[1]
            .parse::<i64>()
            .ok()
            .map(|n| today + Duration::days(n));
        push(&caps, date, None);
    }
    for caps in WEEK.captures_iter(message) {
        let (start, end) = week_bounds(today);
        let shift = match caps[1].to_ascii_lowercase().as_str() {
            "next" => 7,
            "last" => -7,
            _ => 0,
        };
        let range = (start + Duration::days(shift), end + Duration::days(shift));
        push(&caps, Some(range.0), Some(range));
    }

    found.sort_by_key(|d| d.start);
    found
}

/// The first quoted span, used as a search query.
pub fn find_query(message: &str) -> Option<String> {
    let caps = QUOTED.captures(message)?;
    let text = caps.get(1).or_else(|| caps.get(2))?.as_str().trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// The subject following "about" or "regarding", cut before any date phrase
/// and stripped of a leading article.
pub fn find_topic(message: &str, dates: &[DateMention]) -> Option<String> {
    let caps = TOPIC.captures(message)?;
    let span = caps.get(1)?;
    let end = dates
        .iter()
        .map(|d| d.start)
        .filter(|&s| s > span.start() && s < span.end())
        .min()
        .unwrap_or(span.end());

    let mut text = message[span.start()..end]
        .trim()
        .trim_end_matches(|c: char| c == ',' || c == ':')
        .trim();
    for article in ["the ", "a ", "an "] {
        let head = text.get(..article.len()).unwrap_or_default();
        if text.len() > article.len() && head.eq_ignore_ascii_case(article) {
            text = text[article.len()..].trim_start();
            break;
        }
    }
    (!text.is_empty()).then(|| text.to_string())
}

/// Monday and Sunday of the week containing `day`.
pub fn week_bounds(day: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = day - Duration::days(i64::from(day.weekday().num_days_from_monday()));
    (monday, monday + Duration::days(6))
}

/// The next `target` weekday on or after `today` (strictly after when
/// `strictly_after` is set).
fn upcoming(today: NaiveDate, target: Weekday, strictly_after: bool) -> NaiveDate {
    let ahead = (7 + target.num_days_from_monday() - today.weekday().num_days_from_monday()) % 7;
    let ahead = if ahead == 0 && strictly_after {
        7
    } else {
        ahead
    };
    today + Duration::days(i64::from(ahead))
}

fn iso(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

fn month_number(name: &str) -> Option<u32> {
    let prefix = name.get(..3)?.to_ascii_lowercase();
    let n = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(n)
}

fn weekday_from_name(name: &str) -> Option<Weekday> {
    let wd = match name.to_ascii_lowercase().as_str() {
        "monday" => Weekday::Mon,
        "tuesday" => Weekday::Tue,
        "wednesday" => Weekday::Wed,
        "thursday" => Weekday::Thu,
        "friday" => Weekday::Fri,
        "saturday" => Weekday::Sat,
        "sunday" => Weekday::Sun,
        _ => return None,
    };
    Some(wd)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
