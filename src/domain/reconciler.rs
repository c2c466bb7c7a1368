//! Cache-first bar retrieval with remote gap filling.
//!
//! A request is answered from the local store when the store already holds
//! every trading day in the range. Otherwise only the missing trading days are
//! fetched, grouped into runs, merged over the cached rows (fetched rows win)
//! and written back under the store's write lock. Remote failures are logged
//! and degrade to whatever data is available; only configuration problems
//! surface as errors.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, TimeDelta};

use super::bar::{Bar, Record, Tick};
use super::calendar::TradingCalendar;
use super::clock::{Clock, SystemClock};
use super::error::FutquantError;
use super::instrument::InstrumentKey;
use super::series::TimeSeries;
use super::store_lock::StoreLockRegistry;
use crate::ports::quote_port::{Credentials, QuoteRequest, QuoteService};
use crate::ports::store_port::SeriesStore;

/// Interior missing days separated by at most this many calendar days are
/// fetched in one request.
pub const MAX_RUN_GAP_DAYS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerOptions {
    pub retry: RetryPolicy,
    /// Write fetched rows back to the store.
    pub persist: bool,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            persist: true,
        }
    }
}

/// Where a run of missing days sits relative to the cached span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Leading,
    Interior,
    Trailing,
}

/// Contiguous-enough missing trading days fetched with one remote request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingRun {
    pub kind: RunKind,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub days: usize,
}

/// What one reconciliation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    /// Served from the store without remote calls.
    pub fast_path: bool,
    /// Rows were found in the store before any fetching.
    pub cache_hit: bool,
    pub runs: Vec<MissingRun>,
    /// Remote attempts, retries included.
    pub remote_calls: usize,
    pub rows_fetched: usize,
    /// Runs for which no rows could be obtained.
    pub failed_runs: usize,
    pub persisted: bool,
}

/// Groups missing trading days by their position relative to the cached span
/// `[cache_start, cache_end]`. Leading and trailing days each form a single
/// run; interior days are split wherever consecutive ones are more than
/// [`MAX_RUN_GAP_DAYS`] calendar days apart.
pub fn missing_runs(
    missing: &[NaiveDate],
    cache_start: NaiveDate,
    cache_end: NaiveDate,
) -> Vec<MissingRun> {
    let mut leading = Vec::new();
    let mut interior = Vec::new();
    let mut trailing = Vec::new();
    for &day in missing {
        if day < cache_start {
            leading.push(day);
        } else if day > cache_end {
            trailing.push(day);
        } else {
            interior.push(day);
        }
    }

    let run = |kind: RunKind, days: &[NaiveDate]| MissingRun {
        kind,
        start: days[0],
        end: days[days.len() - 1],
        days: days.len(),
    };

    let mut runs = Vec::new();
    if !leading.is_empty() {
        runs.push(run(RunKind::Leading, &leading));
    }
    let mut group_start = 0;
    for i in 1..=interior.len() {
        let split = i == interior.len()
            || (interior[i] - interior[i - 1]).num_days() > MAX_RUN_GAP_DAYS;
        if split && i > group_start {
            runs.push(run(RunKind::Interior, &interior[group_start..i]));
            group_start = i;
        }
    }
    if !trailing.is_empty() {
        runs.push(run(RunKind::Trailing, &trailing));
    }
    runs
}

pub struct CacheReconciler<S, Q> {
    store: Arc<S>,
    quotes: Arc<Q>,
    calendar: Arc<TradingCalendar>,
    clock: Arc<dyn Clock>,
    locks: Arc<StoreLockRegistry>,
    options: ReconcilerOptions,
}

impl<S: SeriesStore, Q: QuoteService> CacheReconciler<S, Q> {
    /// Reconciler with its own lock registry covering `store`.
    pub fn new(store: Arc<S>, quotes: Arc<Q>, calendar: Arc<TradingCalendar>) -> Self {
        let locks = Arc::new(StoreLockRegistry::new([store.location()]));
        Self {
            store,
            quotes,
            calendar,
            clock: Arc::new(SystemClock),
            locks,
            options: ReconcilerOptions::default(),
        }
    }

    /// Shares a registry with other reconcilers writing the same stores.
    pub fn with_locks(mut self, locks: Arc<StoreLockRegistry>) -> Result<Self, FutquantError> {
        if !locks.contains(self.store.location()) {
            return Err(FutquantError::ConfigInvalid {
                section: "cache".into(),
                key: "db_file".into(),
                reason: format!(
                    "store {} has no entry in the lock registry",
                    self.store.location().display()
                ),
            });
        }
        self.locks = locks;
        Ok(self)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_options(mut self, options: ReconcilerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    /// Bars for `key` whose date lies in `[start, end]`.
    pub fn fetch(
        &self,
        key: &InstrumentKey,
        start: NaiveDate,
        end: NaiveDate,
        credentials: &Credentials,
    ) -> Result<TimeSeries<Bar>, FutquantError> {
        self.fetch_with_report(key, start, end, credentials)
            .map(|(series, _)| series)
    }

    pub fn fetch_with_report(
        &self,
        key: &InstrumentKey,
        start: NaiveDate,
        end: NaiveDate,
        credentials: &Credentials,
    ) -> Result<(TimeSeries<Bar>, FetchReport), FutquantError> {
        if !credentials.is_complete() {
            return Err(FutquantError::MissingCredentials);
        }
        if key.period().is_tick() {
            return Err(FutquantError::InvalidPeriod {
                value: format!("{} (ticks are local only)", key.period()),
            });
        }

        let mut report = FetchReport::default();
        let today = self.clock.today();
        let end = if end > today {
            log::info!("{key}: end {end} is in the future, clamping to {today}");
            today
        } else {
            end
        };
        let Some((start, end)) = self.calendar.trading_range(start, end) else {
            log::info!("{key}: no trading days in requested range");
            return Ok((TimeSeries::new(), report));
        };

        let Some(cached) = self.read_cached(key) else {
            log::info!("{key}: no usable cache, fetching {start} to {end}");
            let rows = self.fetch_run(key, start, end, credentials, &mut report);
            if rows.is_empty() {
                report.failed_runs += 1;
                return Ok((TimeSeries::new(), report));
            }
            let merged = self.write_back(key, rows, &mut report);
            return Ok((merged.filter_dates(start, end), report));
        };
        report.cache_hit = true;

        let Some((cache_start, cache_end)) = cached.date_bounds() else {
            return Ok((TimeSeries::new(), report));
        };
        let held: BTreeSet<NaiveDate> = cached.iter().map(|b| b.date()).collect();
        let missing: Vec<NaiveDate> = self
            .calendar
            .trading_days_between(start, end)
            .into_iter()
            .filter(|d| !held.contains(d))
            .collect();

        if missing.is_empty() && cache_start <= start && cache_end >= end {
            log::debug!("{key}: served {start} to {end} from cache");
            report.fast_path = true;
            return Ok((cached.filter_dates(start, end), report));
        }

        report.runs = missing_runs(&missing, cache_start, cache_end);
        log::info!(
            "{key}: {} missing trading days in {} runs",
            missing.len(),
            report.runs.len()
        );
        let mut fetched = Vec::new();
        for run in report.runs.clone() {
            let rows = self.fetch_run(key, run.start, run.end, credentials, &mut report);
            if rows.is_empty() {
                report.failed_runs += 1;
                log::warn!("{key}: no data for {:?} run {} to {}", run.kind, run.start, run.end);
            }
            fetched.extend(rows);
        }

        if fetched.is_empty() {
            return Ok((cached.filter_dates(start, end), report));
        }
        let merged = self.write_back_over(key, cached, fetched, &mut report);
        Ok((merged.filter_dates(start, end), report))
    }

    /// Ticks recorded locally for `symbol` in `[start, end]`. Never fetched remotely.
    pub fn load_ticks(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> TimeSeries<Tick> {
        let key = InstrumentKey::tick(symbol);
        match self.store.read_all::<Tick>(&key) {
            Ok(rows) => TimeSeries::from_unsorted(rows).filter_dates(start, end),
            Err(e) => {
                log::warn!("{key}: failed to read ticks: {e}");
                TimeSeries::new()
            }
        }
    }

    /// The `lookback` most recent stored rows for `key` (all of them for 0),
    /// used to warm up a live stream.
    pub fn preload<R: Record>(&self, key: &InstrumentKey, lookback: usize) -> TimeSeries<R> {
        let rows = if lookback == 0 {
            self.store.read_all::<R>(key)
        } else {
            self.store.read_latest::<R>(key, lookback)
        };
        match rows {
            Ok(rows) => {
                log::info!("{key}: preloaded {} rows", rows.len());
                TimeSeries::from_unsorted(rows)
            }
            Err(e) => {
                log::warn!("{key}: preload failed: {e}");
                TimeSeries::new()
            }
        }
    }

    /// Appends live rows not yet stored. Returns how many were added.
    pub fn record_live<R: Record>(&self, key: &InstrumentKey, rows: &[R]) -> Result<usize, FutquantError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let _guard = self.locks.lock(self.store.location());
        self.store.append_new(key, rows)
    }

    fn read_cached(&self, key: &InstrumentKey) -> Option<TimeSeries<Bar>> {
        match self.store.exists(key) {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                log::warn!("{key}: store unavailable: {e}");
                return None;
            }
        }
        match self.store.read_all::<Bar>(key) {
            Ok(rows) if rows.is_empty() => None,
            Ok(rows) => Some(TimeSeries::from_unsorted(rows)),
            Err(e) => {
                log::warn!("{key}: cache unreadable, treating as miss: {e}");
                None
            }
        }
    }

    /// One remote request for the trading days in `[start, end]`, retried on
    /// transient failures. Returns only rows dated inside the range.
    fn fetch_run(
        &self,
        key: &InstrumentKey,
        start: NaiveDate,
        end: NaiveDate,
        credentials: &Credentials,
        report: &mut FetchReport,
    ) -> Vec<Bar> {
        let Some((start, end)) = self.calendar.trading_range(start, end) else {
            return Vec::new();
        };
        // The service returns nothing for a one-day window.
        let (request_start, request_end) = if start == end {
            let next = self.calendar.next_trading_day(end).unwrap_or(end);
            (start - TimeDelta::days(1), next)
        } else {
            (start, end)
        };
        let request = QuoteRequest {
            symbol: key.symbol().to_string(),
            start: request_start,
            end: request_end.min(self.clock.today()),
            period: key.period(),
            adjustment: key.adjustment(),
            credentials: credentials.clone(),
        };

        let attempts = self.options.retry.max_attempts.max(1);
        for attempt in 1..=attempts {
            report.remote_calls += 1;
            match self.quotes.request(&request) {
                Ok(rows) => {
                    let rows: Vec<Bar> = rows
                        .into_iter()
                        .filter(|b| b.date() >= start && b.date() <= end)
                        .collect();
                    log::info!("{key}: fetched {} rows for {start} to {end}", rows.len());
                    report.rows_fetched += rows.len();
                    return rows;
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    log::warn!(
                        "{key}: attempt {attempt}/{attempts} failed: {e}; retrying in {:?}",
                        self.options.retry.backoff
                    );
                    std::thread::sleep(self.options.retry.backoff);
                }
                Err(e) => {
                    log::error!("{key}: giving up on {start} to {end} after attempt {attempt}: {e}");
                    return Vec::new();
                }
            }
        }
        Vec::new()
    }

    fn write_back(&self, key: &InstrumentKey, rows: Vec<Bar>, report: &mut FetchReport) -> TimeSeries<Bar> {
        self.write_back_over(key, TimeSeries::new(), rows, report)
    }

    /// Merges `fetched` over the stored rows and rewrites the table. The store
    /// is re-read under the lock so rows written concurrently are kept.
    fn write_back_over(
        &self,
        key: &InstrumentKey,
        cached: TimeSeries<Bar>,
        fetched: Vec<Bar>,
        report: &mut FetchReport,
    ) -> TimeSeries<Bar> {
        if !self.options.persist {
            return cached.merge(fetched);
        }
        let _guard = self.locks.lock(self.store.location());
        let base = match self.store.read_all::<Bar>(key) {
            Ok(rows) => TimeSeries::from_unsorted(rows),
            Err(e) => {
                log::warn!("{key}: re-read before write failed, overwriting: {e}");
                cached
            }
        };
        let merged = base.merge(fetched);
        match self.store.replace_all(key, merged.as_slice()) {
            Ok(()) => {
                report.persisted = true;
                log::info!("{key}: stored {} rows", merged.len());
            }
            Err(e) => log::warn!("{key}: failed to persist merged rows: {e}"),
        }
        merged
    }
}
