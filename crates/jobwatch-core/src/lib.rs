//! Core domain model and snapshot diffing for jobwatch.

use std::collections::BTreeSet;

use chrono::NaiveDate;

pub const CRATE_NAME: &str = "jobwatch-core";

/// Storage format for observation dates; lexicographic order matches calendar order.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// All positions observed for one source on one date.
pub type Snapshot = BTreeSet<String>;

/// One scraped position recorded for a source on a run date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub source: String,
    pub position: String,
    pub date: NaiveDate,
}

impl Observation {
    pub fn new(source: impl Into<String>, position: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            source: source.into(),
            position: position.into(),
            date,
        }
    }
}

/// Positions present in `current` but absent from `previous`, deduplicated.
///
/// Titles are compared as exact strings. An empty `previous` (cold start)
/// yields every scraped title.
pub fn new_positions(current: &[String], previous: &Snapshot) -> Snapshot {
    current
        .iter()
        .filter(|position| !previous.contains(position.as_str()))
        .cloned()
        .collect()
}

/// True when a source has no prior snapshot to diff against.
pub fn is_cold_start(previous: &Snapshot) -> bool {
    previous.is_empty()
}

/// Deduplicated set of a raw scrape, i.e. what the store returns after persisting it.
pub fn snapshot_of(current: &[String]) -> Snapshot {
    current.iter().cloned().collect()
}

pub fn new_position_message(source: &str, position: &str) -> String {
    format!("New position at {source}! {position}")
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FORMAT).ok()
}
