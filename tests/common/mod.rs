#![allow(dead_code)]

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use futquant::adapters::sqlite_adapter::SqliteStore;
use futquant::domain::bar::Bar;
use futquant::domain::calendar::{is_weekday, TradingCalendar};
use futquant::domain::clock::FixedClock;
use futquant::domain::error::RemoteError;
use futquant::domain::instrument::{Adjustment, InstrumentKey, Period};
use futquant::domain::reconciler::{CacheReconciler, ReconcilerOptions, RetryPolicy};
use futquant::ports::quote_port::{Credentials, QuoteRequest, QuoteService};
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Quote service answering with one daily bar per weekday in the request,
/// after first replaying any queued failures. Every request is recorded.
pub struct MockQuoteService {
    pub requests: Mutex<Vec<QuoteRequest>>,
    failures: Mutex<VecDeque<RemoteError>>,
    holidays: BTreeSet<NaiveDate>,
    price_offset: f64,
}

impl MockQuoteService {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            failures: Mutex::new(VecDeque::new()),
            holidays: BTreeSet::new(),
            price_offset: 0.0,
        }
    }

    pub fn with_failures(self, failures: Vec<RemoteError>) -> Self {
        *self.failures.lock().unwrap() = failures.into();
        self
    }

    /// Weekdays the service has no data for.
    pub fn with_holidays(mut self, days: &[NaiveDate]) -> Self {
        self.holidays.extend(days.iter().copied());
        self
    }

    /// Shifts every served price, to tell refetched rows from cached ones.
    pub fn with_price_offset(mut self, offset: f64) -> Self {
        self.price_offset = offset;
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requested_ranges(&self) -> Vec<(NaiveDate, NaiveDate)> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| (r.start, r.end))
            .collect()
    }
}

impl QuoteService for MockQuoteService {
    fn request(&self, request: &QuoteRequest) -> Result<Vec<Bar>, RemoteError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(request
            .start
            .iter_days()
            .take_while(|d| *d <= request.end)
            .filter(|d| is_weekday(*d) && !self.holidays.contains(d))
            .map(|d| bar_on(d, price_for(d) + self.price_offset))
            .collect())
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(day: NaiveDate, hour: u32, minute: u32) -> NaiveDateTime {
    day.and_hms_opt(hour, minute, 0).unwrap()
}

/// Deterministic close for a day, distinct per day.
pub fn price_for(day: NaiveDate) -> f64 {
    3000.0 + day.ordinal() as f64
}

pub fn bar_on(day: NaiveDate, close: f64) -> Bar {
    Bar {
        timestamp: day.and_time(NaiveTime::MIN),
        open: close - 1.0,
        high: close + 2.0,
        low: close - 2.0,
        close,
        volume: 100.0,
        amount: close * 100.0,
        open_interest: 5000.0,
    }
}

pub fn bar_at(timestamp: NaiveDateTime, open: f64, close: f64) -> Bar {
    Bar {
        timestamp,
        open,
        high: open.max(close) + 1.0,
        low: open.min(close) - 1.0,
        close,
        volume: 10.0,
        amount: close * 10.0,
        open_interest: 100.0,
    }
}

pub fn daily_key(symbol: &str) -> InstrumentKey {
    InstrumentKey::new(symbol, Period::Day, Adjustment::Raw)
}

pub fn credentials() -> Credentials {
    Credentials::new("alice", "secret")
}

pub fn fast_options() -> ReconcilerOptions {
    ReconcilerOptions {
        retry: RetryPolicy {
            max_attempts: 3,
            backoff: Duration::ZERO,
        },
        persist: true,
    }
}

/// Reconciler over `store` with a weekday calendar and the clock fixed on `today`.
pub fn reconciler_with(
    store: Arc<SqliteStore>,
    quotes: Arc<MockQuoteService>,
    today: NaiveDate,
) -> CacheReconciler<SqliteStore, MockQuoteService> {
    CacheReconciler::new(store, quotes, Arc::new(TradingCalendar::weekday_rule()))
        .with_clock(Arc::new(FixedClock::on(today)))
        .with_options(fast_options())
}

pub fn memory_reconciler(
    quotes: Arc<MockQuoteService>,
) -> CacheReconciler<SqliteStore, MockQuoteService> {
    let store = Arc::new(SqliteStore::in_memory().unwrap());
    reconciler_with(store, quotes, date(2024, 6, 28))
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
