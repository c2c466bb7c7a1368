//! Exchange trading calendar.
//!
//! Membership is answered from the loaded day list inside the span it covers
//! and from the Monday-to-Friday rule everywhere else, so a calendar that
//! failed to load still gives usable answers.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};

use super::clock::Clock;
use crate::ports::calendar_port::{CalendarCache, CalendarSource};

/// How far ahead [`TradingCalendar::next_trading_day`] searches.
pub const NEXT_DAY_SEARCH_LIMIT: i64 = 10;

/// Calendar as written to the local cache file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedCalendar {
    pub trading_days: Vec<NaiveDate>,
    pub last_update: NaiveDateTime,
}

/// When a cached calendar must be refreshed or abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarPolicy {
    /// Refresh when the cache was written at least this many days ago.
    pub refresh_days: i64,
    /// Refresh when the last listed day is more than this many days behind today.
    /// A cache this stale is not used at all.
    pub stale_after_days: i64,
}

impl Default for CalendarPolicy {
    fn default() -> Self {
        Self {
            refresh_days: 1,
            stale_after_days: 365,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradingCalendar {
    days: Vec<NaiveDate>,
    last_update: Option<NaiveDateTime>,
}

pub fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

impl TradingCalendar {
    /// Calendar with no day list: every Monday to Friday trades.
    pub fn weekday_rule() -> Self {
        Self::default()
    }

    pub fn from_days(days: impl IntoIterator<Item = NaiveDate>) -> Self {
        let mut days: Vec<NaiveDate> = days.into_iter().collect();
        days.sort_unstable();
        days.dedup();
        Self {
            days,
            last_update: None,
        }
    }

    /// Loads from the cache, refreshing from `source` when the cache is missing,
    /// old or stale. Never fails: every problem is logged and degrades toward
    /// the weekday rule.
    pub fn load(
        source: Option<&dyn CalendarSource>,
        cache: Option<&dyn CalendarCache>,
        clock: &dyn Clock,
        policy: &CalendarPolicy,
    ) -> Self {
        let now = clock.now();
        let today = now.date();

        let cached = match cache.map(|c| c.load()) {
            Some(Ok(Some(c))) if !c.trading_days.is_empty() => Some(c),
            Some(Ok(_)) | None => None,
            Some(Err(e)) => {
                log::warn!("trading calendar cache unreadable: {e}");
                None
            }
        };

        let within_tolerance = |c: &CachedCalendar| {
            c.trading_days
                .iter()
                .max()
                .is_some_and(|last| (today - *last).num_days() <= policy.stale_after_days)
        };

        if let Some(c) = &cached {
            let age_days = (now - c.last_update).num_days();
            if age_days < policy.refresh_days && within_tolerance(c) {
                log::debug!(
                    "trading calendar loaded from cache ({} days)",
                    c.trading_days.len()
                );
                return Self::from_cached(c.clone());
            }
        }

        if let Some(source) = source {
            match source.trading_days() {
                Ok(days) if !days.is_empty() => {
                    let mut calendar = Self::from_days(days);
                    calendar.last_update = Some(now);
                    log::info!(
                        "trading calendar refreshed ({} days, {} to {})",
                        calendar.days.len(),
                        calendar.days[0],
                        calendar.days[calendar.days.len() - 1]
                    );
                    if let Some(cache) = cache {
                        let snapshot = CachedCalendar {
                            trading_days: calendar.days.clone(),
                            last_update: now,
                        };
                        if let Err(e) = cache.save(&snapshot) {
                            log::warn!("failed to write trading calendar cache: {e}");
                        }
                    }
                    return calendar;
                }
                Ok(_) => log::warn!("trading calendar source returned no days"),
                Err(e) => log::warn!("trading calendar refresh failed: {e}"),
            }
        }

        match cached {
            Some(c) if within_tolerance(&c) => {
                log::info!("using cached trading calendar written {}", c.last_update);
                Self::from_cached(c)
            }
            _ => {
                log::warn!("no usable trading calendar; falling back to Monday-Friday rule");
                Self::weekday_rule()
            }
        }
    }

    fn from_cached(cached: CachedCalendar) -> Self {
        let mut calendar = Self::from_days(cached.trading_days);
        calendar.last_update = Some(cached.last_update);
        calendar
    }

    pub fn days(&self) -> &[NaiveDate] {
        &self.days
    }

    pub fn last_update(&self) -> Option<NaiveDateTime> {
        self.last_update
    }

    /// First and last listed days, if a list is loaded.
    pub fn coverage(&self) -> Option<(NaiveDate, NaiveDate)> {
        Some((*self.days.first()?, *self.days.last()?))
    }

    fn covers(&self, date: NaiveDate) -> bool {
        self.coverage()
            .is_some_and(|(first, last)| first <= date && date <= last)
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        if self.covers(date) {
            self.days.binary_search(&date).is_ok()
        } else {
            is_weekday(date)
        }
    }

    /// Trading days in `[start, end]`, ascending.
    pub fn trading_days_between(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        if start > end {
            return Vec::new();
        }
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| self.is_trading_day(*d))
            .collect()
    }

    /// First and last trading day within `[start, end]`.
    pub fn trading_range(&self, start: NaiveDate, end: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        if start > end {
            return None;
        }
        let first = start
            .iter_days()
            .take_while(|d| *d <= end)
            .find(|d| self.is_trading_day(*d))?;
        let last = std::iter::successors(Some(end), |d| d.pred_opt())
            .take_while(|d| *d >= first)
            .find(|d| self.is_trading_day(*d))?;
        Some((first, last))
    }

    /// Nearest trading day strictly before `date`.
    pub fn previous_trading_day(&self, date: NaiveDate) -> NaiveDate {
        let prior = date - Duration::days(1);
        if self.covers(prior) {
            let idx = self.days.partition_point(|d| *d < date);
            if let Some(day) = idx.checked_sub(1).map(|i| self.days[i]) {
                return day;
            }
        }
        let mut day = prior;
        while !is_weekday(day) {
            day -= Duration::days(1);
        }
        day
    }

    /// Nearest trading day strictly after `date`, searching a bounded window.
    pub fn next_trading_day(&self, date: NaiveDate) -> Option<NaiveDate> {
        (1..=NEXT_DAY_SEARCH_LIMIT)
            .map(|n| date + Duration::days(n))
            .find(|d| self.is_trading_day(*d))
    }
}
