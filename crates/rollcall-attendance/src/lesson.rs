//! Lesson suggestion from the externally supplied schedule

use chrono::NaiveTime;
use rollcall_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// A candidate lesson as supplied by the schedule lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub subject: String,
    /// Clock time, "HH:MM"
    pub time_start: String,
    /// Clock time, "HH:MM"
    pub time_end: String,
    /// Lesson type abbreviation, e.g. "Lec"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_abbr: Option<String>,
}

impl Lesson {
    pub fn new(subject: impl Into<String>, start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            time_start: start.into(),
            time_end: end.into(),
            type_abbr: None,
        }
    }

    /// Whether `now` falls within [start, end]. Unparseable times never match.
    pub fn contains(&self, now: NaiveTime) -> bool {
        match (parse_clock(&self.time_start), parse_clock(&self.time_end)) {
            (Some(start), Some(end)) => start <= now && now <= end,
            _ => false,
        }
    }
}

fn parse_clock(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}

/// Pick the lesson running at `now`, falling back to the first candidate
pub fn suggest(candidates: &[Lesson], now: NaiveTime) -> Result<&Lesson> {
    candidates
        .iter()
        .find(|lesson| lesson.contains(now))
        .or_else(|| candidates.first())
        .ok_or(Error::NoLessonScheduled)
}

/// Resolve the teacher's explicit choice, or suggest one
pub fn select(candidates: &[Lesson], selected: Option<usize>, now: NaiveTime) -> Result<&Lesson> {
    if candidates.is_empty() {
        return Err(Error::NoLessonScheduled);
    }
    match selected {
        Some(index) => candidates
            .get(index)
            .ok_or_else(|| Error::validation(format!("no lesson at index {index}"))),
        None => suggest(candidates, now),
    }
}
