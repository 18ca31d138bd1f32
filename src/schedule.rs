//! Decides whether a course meets on a given date.

use chrono::{Datelike, NaiveDate, NaiveTime};
use serde_json::Value;

/// The `days` field of a course as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaysDescriptor {
    Text(String),
    List(Vec<String>),
    Missing,
}

impl DaysDescriptor {
    pub fn from_value(v: Option<&Value>) -> Self {
        match v {
            Some(Value::String(s)) if !s.trim().is_empty() => Self::Text(s.clone()),
            Some(Value::Array(items)) => Self::List(
                items
                    .iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s.clone()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect(),
            ),
            Some(Value::Number(n)) => Self::Text(n.to_string()),
            _ => Self::Missing,
        }
    }

    /// Human-readable form used in attendance records and sync payloads.
    pub fn label(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::List(items) => items.join(", "),
            Self::Missing => String::new(),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.trim().is_empty(),
            Self::List(items) => items.iter().all(|s| s.trim().is_empty()),
            Self::Missing => true,
        }
    }
}

/// Aliases per ISO weekday, Monday first.
const WEEKDAY_ALIASES: [&[&str]; 7] = [
    &["mon", "monday", "du", "dushanba", "d"],
    &["tue", "tuesday", "se", "seshanba", "s"],
    &["wed", "wednesday", "chor", "chorshanba", "ch", "cho"],
    &["thu", "thursday", "pay", "payshanba", "p", "pa"],
    &["fri", "friday", "jum", "juma", "j", "ju"],
    &["sat", "saturday", "shan", "shanba", "sh", "sha"],
    &["sun", "sunday", "yak", "yakshanba", "y", "ya"],
];

const EVERY_DAY: [&str; 4] = ["har kuni", "daily", "every day", "everyday"];

/// Odd days (Mon/Wed/Fri) and even days (Tue/Thu/Sat).
fn pattern_days(token: &str) -> Option<&'static [u32]> {
    match token {
        "dchj" => Some(&[0, 2, 4]),
        "spsh" => Some(&[1, 3, 5]),
        _ => None,
    }
}

/// Monday = 0 .. Sunday = 6.
pub fn weekday_index(date: NaiveDate) -> u32 {
    date.weekday().num_days_from_monday()
}

fn mentions_every_day(s: &str) -> bool {
    let lower = s.to_lowercase();
    EVERY_DAY.iter().any(|p| lower.contains(p))
}

fn token_matches(token: &str, weekday: u32) -> bool {
    let token = token.trim().to_lowercase();
    if token.is_empty() {
        return false;
    }
    if let Some(days) = pattern_days(&token) {
        return days.contains(&weekday);
    }
    WEEKDAY_ALIASES[weekday as usize].contains(&token.as_str())
}

fn tokens(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| c == ',' || c == '/' || c == '-' || c.is_whitespace())
        .filter(|t| !t.is_empty())
}

pub fn is_lesson_scheduled_on(days: &DaysDescriptor, date: NaiveDate) -> bool {
    if days.is_empty() {
        return false;
    }
    let weekday = weekday_index(date);
    match days {
        DaysDescriptor::Text(s) => {
            mentions_every_day(s) || tokens(s).any(|t| token_matches(t, weekday))
        }
        DaysDescriptor::List(items) => items
            .iter()
            .any(|item| mentions_every_day(item) || token_matches(item, weekday)),
        DaysDescriptor::Missing => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: Option<NaiveTime>,
}

fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    let (h, m) = s.split_once(':')?;
    let h: u32 = h.trim().parse().ok()?;
    let m: u32 = m.trim().get(..2)?.parse().ok()?;
    NaiveTime::from_hms_opt(h, m, 0)
}

/// `"14:00"` or `"14:00 - 15:30"`. `None` when the start is unreadable.
pub fn parse_time_range(s: &str) -> Option<TimeRange> {
    let mut parts = s.splitn(2, '-');
    let start = parse_hhmm(parts.next()?)?;
    let end = parts.next().and_then(parse_hhmm);
    Some(TimeRange { start, end })
}
