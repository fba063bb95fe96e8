//! Traffic-light classification of due dates.
//!
//! Every client and the server classify with the same rules, so the
//! reference day is always passed in explicitly.

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

/// Calendar date format used for every date field on the wire.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Status of a record relative to its due date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Overdue,
    DueSoon,
    OnTime,
}

/// Parse the calendar part of a date string.
///
/// Only the leading `YYYY-MM-DD` is read, so a full timestamp still yields
/// the wall-clock day it was written with and is never shifted through UTC.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, DATE_FORMAT).ok()
}

/// Today's date in local wall-clock terms.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Classify a due date against a reference day.
///
/// An empty or unreadable due date means there is no deadline.
pub fn classify(due_date: &str, today: NaiveDate) -> Status {
    let Some(due) = parse_date(due_date) else {
        return Status::OnTime;
    };

    match (due - today).num_days() {
        d if d < 0 => Status::Overdue,
        0 | 1 => Status::DueSoon,
        _ => Status::OnTime,
    }
}
