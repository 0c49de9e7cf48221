//! Overlap-safe day counting over date windows.
//!
//! Every visit is clipped to the window first. Clipped spans of the same
//! country are then merged into their union with a sorted sweep, so duplicate,
//! overlapping, nested and back-to-back records never count a day twice.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ComplianceError;
use crate::models::{inclusive_days, shift_days, DateInterval, VisitRecord};

/// A closed, fully resolved day range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DaySpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DaySpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn days(&self) -> i64 {
        inclusive_days(self.start, self.end)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// `[as_of - window_days + 1, as_of]`.
pub fn window_bounds(
    as_of: NaiveDate,
    window_days: i64,
) -> Result<(NaiveDate, NaiveDate), ComplianceError> {
    if window_days <= 0 {
        return Err(ComplianceError::InvalidWindow { days: window_days });
    }
    Ok((shift_days(as_of, -(window_days - 1)), as_of))
}

/// Days present in the `window_days`-long window ending on `as_of`.
///
/// Non-positive windows count nothing. Visits starting after `as_of` are
/// ignored and open visits end on `as_of`.
pub fn days_in_window(visits: &[VisitRecord], as_of: NaiveDate, window_days: i64) -> i64 {
    match window_bounds(as_of, window_days) {
        Ok((start, end)) => days_in_range(visits, start, end, as_of),
        Err(_) => 0,
    }
}

/// Days present in `[range_start, range_end]`, never counting past `as_of`.
pub fn days_in_range(
    visits: &[VisitRecord],
    range_start: NaiveDate,
    range_end: NaiveDate,
    as_of: NaiveDate,
) -> i64 {
    let range_end = range_end.min(as_of);
    if range_start > range_end {
        return 0;
    }

    let mut by_country: BTreeMap<&str, Vec<DaySpan>> = BTreeMap::new();
    for visit in visits {
        if let Some(span) = clip(&visit.interval, range_start, range_end, as_of) {
            by_country
                .entry(visit.country_code.as_str())
                .or_default()
                .push(span);
        }
    }

    by_country
        .into_values()
        .map(|spans| union_days(merge_spans(spans).as_slice()))
        .sum()
}

/// Clips an interval to a range. `None` when nothing of it falls inside.
pub fn clip(
    interval: &DateInterval,
    range_start: NaiveDate,
    range_end: NaiveDate,
    as_of: NaiveDate,
) -> Option<DaySpan> {
    let start = interval.start.max(range_start);
    let end = interval.resolved_end(as_of).min(range_end);
    (start <= end).then(|| DaySpan::new(start, end))
}

/// Merges overlapping and adjacent spans into disjoint spans sorted by start.
pub fn merge_spans(mut spans: Vec<DaySpan>) -> Vec<DaySpan> {
    spans.sort();

    let mut merged: Vec<DaySpan> = Vec::with_capacity(spans.len());
    for span in spans {
        if let Some(last) = merged.last_mut() {
            if span.start <= shift_days(last.end, 1) {
                last.end = last.end.max(span.end);
                continue;
            }
        }
        merged.push(span);
    }
    merged
}

pub fn union_days(merged: &[DaySpan]) -> i64 {
    merged.iter().map(DaySpan::days).sum()
}

/// Continuous presence spans up to `as_of` across all given visits, country ignored.
pub fn presence_spans(visits: &[VisitRecord], as_of: NaiveDate) -> Vec<DaySpan> {
    let spans = visits
        .iter()
        .filter_map(|visit| clip(&visit.interval, visit.interval.start, as_of, as_of))
        .collect::<Vec<_>>();
    merge_spans(spans)
}
