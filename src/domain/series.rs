//! Ordered time-series container with timestamp lookup.

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;

use super::bar::Observation;

/// Observations in strictly ascending, unique timestamp order.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries<T> {
    rows: Vec<T>,
}

impl<T> Default for TimeSeries<T> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<T: Observation> TimeSeries<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorts by timestamp and keeps the last row given for any duplicated timestamp.
    pub fn from_unsorted(rows: Vec<T>) -> Self {
        let by_ts: BTreeMap<NaiveDateTime, T> =
            rows.into_iter().map(|r| (r.timestamp(), r)).collect();
        Self {
            rows: by_ts.into_values().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.rows
    }

    pub fn into_vec(self) -> Vec<T> {
        self.rows
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.rows.get(index)
    }

    pub fn first(&self) -> Option<&T> {
        self.rows.first()
    }

    pub fn last(&self) -> Option<&T> {
        self.rows.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.rows.iter()
    }

    pub fn timestamps(&self) -> impl Iterator<Item = NaiveDateTime> + '_ {
        self.rows.iter().map(|r| r.timestamp())
    }

    /// First and last calendar dates covered.
    pub fn date_bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((
            self.rows.first()?.timestamp().date(),
            self.rows.last()?.timestamp().date(),
        ))
    }

    pub fn index_of(&self, timestamp: NaiveDateTime) -> Option<usize> {
        self.rows
            .binary_search_by(|r| r.timestamp().cmp(&timestamp))
            .ok()
    }

    /// Index of the last row stamped at or before `timestamp`.
    pub fn position_at_or_before(&self, timestamp: NaiveDateTime) -> Option<usize> {
        let upper = self.rows.partition_point(|r| r.timestamp() <= timestamp);
        upper.checked_sub(1)
    }

    /// Rows whose calendar date lies in `[start, end]`.
    pub fn slice_dates(&self, start: NaiveDate, end: NaiveDate) -> &[T] {
        let lo = self.rows.partition_point(|r| r.timestamp().date() < start);
        let hi = self.rows.partition_point(|r| r.timestamp().date() <= end);
        if lo >= hi { &[] } else { &self.rows[lo..hi] }
    }

    pub fn filter_dates(&self, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            rows: self.slice_dates(start, end).to_vec(),
        }
    }

    /// Union with `newer`; on a timestamp collision the row from `newer` wins.
    pub fn merge(self, newer: impl IntoIterator<Item = T>) -> Self {
        let mut by_ts: BTreeMap<NaiveDateTime, T> =
            self.rows.into_iter().map(|r| (r.timestamp(), r)).collect();
        for row in newer {
            by_ts.insert(row.timestamp(), row);
        }
        Self {
            rows: by_ts.into_values().collect(),
        }
    }

    /// Appends `row` if it is strictly after the current last row.
    pub fn push(&mut self, row: T) -> Result<(), (NaiveDateTime, NaiveDateTime)> {
        if let Some(last) = self.rows.last() {
            if row.timestamp() <= last.timestamp() {
                return Err((row.timestamp(), last.timestamp()));
            }
        }
        self.rows.push(row);
        Ok(())
    }

    /// Drops the `n` oldest rows.
    pub fn drop_front(&mut self, n: usize) {
        let n = n.min(self.rows.len());
        self.rows.drain(..n);
    }

    /// Keeps only the `n` most recent rows.
    pub fn keep_last(&mut self, n: usize) {
        let excess = self.rows.len().saturating_sub(n);
        self.drop_front(excess);
    }

    pub(crate) fn replace_rows(&mut self, rows: Vec<T>) {
        self.rows = rows;
    }
}

impl<T: Observation> FromIterator<T> for TimeSeries<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_unsorted(iter.into_iter().collect())
    }
}

impl<'a, T> IntoIterator for &'a TimeSeries<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
