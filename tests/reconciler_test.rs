//! Cache reconciliation against a mock quote service and real SQLite stores.

mod common;

use common::*;
use futquant::adapters::sqlite_adapter::SqliteStore;
use futquant::domain::bar::{Bar, Tick};
use futquant::domain::calendar::is_weekday;
use futquant::domain::error::{FutquantError, RemoteError};
use futquant::domain::instrument::InstrumentKey;
use futquant::domain::reconciler::{ReconcilerOptions, RunKind};
use futquant::domain::store_lock::StoreLockRegistry;
use futquant::ports::quote_port::Credentials;
use futquant::ports::store_port::SeriesStore;
use std::sync::Arc;

fn dates(series: &[Bar]) -> Vec<chrono::NaiveDate> {
    series.iter().map(|b| b.date()).collect()
}

fn seed(store: &SqliteStore, key: &InstrumentKey, days: &[chrono::NaiveDate], close: f64) {
    let rows: Vec<Bar> = days.iter().map(|d| bar_on(*d, close)).collect();
    store.replace_all(key, &rows).unwrap();
}

mod range_handling {
    use super::*;

    #[test]
    fn weekend_only_range_is_empty_without_remote_calls() {
        let quotes = Arc::new(MockQuoteService::new());
        let reconciler = memory_reconciler(quotes.clone());
        let series = reconciler
            .fetch(&daily_key("rb888"), date(2024, 1, 6), date(2024, 1, 7), &credentials())
            .unwrap();
        assert!(series.is_empty());
        assert_eq!(quotes.call_count(), 0);
    }

    #[test]
    fn inverted_range_is_empty() {
        let quotes = Arc::new(MockQuoteService::new());
        let reconciler = memory_reconciler(quotes.clone());
        let series = reconciler
            .fetch(&daily_key("rb888"), date(2024, 1, 12), date(2024, 1, 8), &credentials())
            .unwrap();
        assert!(series.is_empty());
        assert_eq!(quotes.call_count(), 0);
    }

    #[test]
    fn future_end_is_clamped_to_today() {
        init_logging();
        let quotes = Arc::new(MockQuoteService::new());
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let reconciler = reconciler_with(store, quotes.clone(), date(2024, 1, 10));
        let series = reconciler
            .fetch(&daily_key("rb888"), date(2024, 1, 8), date(2024, 1, 31), &credentials())
            .unwrap();
        assert_eq!(dates(series.as_slice()), vec![date(2024, 1, 8), date(2024, 1, 9), date(2024, 1, 10)]);
        assert_eq!(quotes.requested_ranges(), vec![(date(2024, 1, 8), date(2024, 1, 10))]);
    }

    #[test]
    fn range_is_snapped_to_trading_days() {
        let quotes = Arc::new(MockQuoteService::new());
        let reconciler = memory_reconciler(quotes.clone());
        reconciler
            .fetch(&daily_key("rb888"), date(2024, 1, 6), date(2024, 1, 14), &credentials())
            .unwrap();
        assert_eq!(quotes.requested_ranges(), vec![(date(2024, 1, 8), date(2024, 1, 12))]);
    }
}

mod cache_behaviour {
    use super::*;

    #[test]
    fn second_fetch_is_served_from_cache() {
        let quotes = Arc::new(MockQuoteService::new());
        let reconciler = memory_reconciler(quotes.clone());
        let key = daily_key("rb888");

        let (first, report) = reconciler
            .fetch_with_report(&key, date(2024, 1, 8), date(2024, 1, 19), &credentials())
            .unwrap();
        assert_eq!(first.len(), 10);
        assert!(!report.cache_hit);
        assert!(report.persisted);
        assert_eq!(quotes.call_count(), 1);

        let (second, report) = reconciler
            .fetch_with_report(&key, date(2024, 1, 8), date(2024, 1, 19), &credentials())
            .unwrap();
        assert!(report.fast_path);
        assert_eq!(report.remote_calls, 0);
        assert_eq!(quotes.call_count(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn sub_range_of_cache_needs_no_remote_call() {
        let quotes = Arc::new(MockQuoteService::new());
        let reconciler = memory_reconciler(quotes.clone());
        let key = daily_key("rb888");
        reconciler
            .fetch(&key, date(2024, 1, 8), date(2024, 1, 19), &credentials())
            .unwrap();
        let series = reconciler
            .fetch(&key, date(2024, 1, 10), date(2024, 1, 16), &credentials())
            .unwrap();
        assert_eq!(series.len(), 5);
        assert_eq!(series.first().unwrap().date(), date(2024, 1, 10));
        assert_eq!(quotes.call_count(), 1);
    }

    #[test]
    fn interior_gap_is_fetched_as_one_widened_run() {
        let quotes = Arc::new(MockQuoteService::new());
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let key = daily_key("rb888");
        seed(
            &store,
            &key,
            &[date(2024, 1, 8), date(2024, 1, 9), date(2024, 1, 11), date(2024, 1, 12)],
            1.0,
        );
        let reconciler = reconciler_with(store.clone(), quotes.clone(), date(2024, 6, 28));

        let (series, report) = reconciler
            .fetch_with_report(&key, date(2024, 1, 8), date(2024, 1, 12), &credentials())
            .unwrap();

        assert_eq!(report.runs.len(), 1);
        assert_eq!(report.runs[0].kind, RunKind::Interior);
        assert_eq!(report.runs[0].days, 1);
        // One missing day is requested with a neighbour on each side.
        assert_eq!(quotes.requested_ranges(), vec![(date(2024, 1, 9), date(2024, 1, 11))]);

        let expected: Vec<_> = (8..=12).map(|d| date(2024, 1, d)).collect();
        assert_eq!(dates(series.as_slice()), expected);
        assert_eq!(series.get(2).unwrap().close, price_for(date(2024, 1, 10)));
        // Neighbours returned by the widened request do not replace cached rows.
        assert_eq!(series.get(1).unwrap().close, 1.0);
        assert_eq!(series.get(3).unwrap().close, 1.0);

        let stored: Vec<Bar> = store.read_all(&key).unwrap();
        assert_eq!(dates(&stored), expected);
        assert!(stored.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn leading_and_trailing_runs_are_fetched_separately() {
        let quotes = Arc::new(MockQuoteService::new());
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let key = daily_key("rb888");
        seed(
            &store,
            &key,
            &[date(2024, 1, 10), date(2024, 1, 11), date(2024, 1, 12)],
            1.0,
        );
        let reconciler = reconciler_with(store, quotes.clone(), date(2024, 6, 28));

        let (series, report) = reconciler
            .fetch_with_report(&key, date(2024, 1, 8), date(2024, 1, 16), &credentials())
            .unwrap();

        let kinds: Vec<RunKind> = report.runs.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![RunKind::Leading, RunKind::Trailing]);
        assert_eq!(
            quotes.requested_ranges(),
            vec![
                (date(2024, 1, 8), date(2024, 1, 9)),
                (date(2024, 1, 15), date(2024, 1, 16)),
            ]
        );
        assert_eq!(series.len(), 7);
        assert_eq!(report.rows_fetched, 4);
    }

    #[test]
    fn distant_interior_gaps_become_separate_runs() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let key = daily_key("rb888");
        let held: Vec<_> = (2..=31)
            .map(|d| date(2024, 1, d))
            .filter(|d| is_weekday(*d) && *d != date(2024, 1, 9) && *d != date(2024, 1, 23))
            .collect();
        seed(&store, &key, &held, 1.0);
        let quotes = Arc::new(MockQuoteService::new());
        let reconciler = reconciler_with(store, quotes.clone(), date(2024, 6, 28));

        let (series, report) = reconciler
            .fetch_with_report(&key, date(2024, 1, 2), date(2024, 1, 31), &credentials())
            .unwrap();
        assert_eq!(report.runs.len(), 2);
        assert_eq!(
            quotes.requested_ranges(),
            vec![
                (date(2024, 1, 8), date(2024, 1, 10)),
                (date(2024, 1, 22), date(2024, 1, 24)),
            ]
        );
        assert_eq!(series.len(), 22);
        assert_eq!(series.get(5).unwrap().close, price_for(date(2024, 1, 9)));
    }

    #[test]
    fn unreadable_cache_is_refetched_in_full() {
        init_logging();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cache.db");
        let key = daily_key("rb888");
        {
            let conn = rusqlite::Connection::open(&path).unwrap();
            conn.execute_batch(&format!(
                "CREATE TABLE \"{t}\" (datetime TEXT PRIMARY KEY, open REAL, high REAL, low REAL, close REAL);
                 INSERT INTO \"{t}\" VALUES ('yesterday-ish', 1, 1, 1, 1);",
                t = key.table_name()
            ))
            .unwrap();
        }
        let store = Arc::new(SqliteStore::open(&path, 2).unwrap());
        assert!(matches!(
            store.read_all::<Bar>(&key),
            Err(FutquantError::CacheCorrupt { .. })
        ));

        let quotes = Arc::new(MockQuoteService::new());
        let reconciler = reconciler_with(store.clone(), quotes.clone(), date(2024, 6, 28));
        let series = reconciler
            .fetch(&key, date(2024, 1, 8), date(2024, 1, 12), &credentials())
            .unwrap();

        assert_eq!(series.len(), 5);
        assert_eq!(quotes.requested_ranges(), vec![(date(2024, 1, 8), date(2024, 1, 12))]);
        let stored: Vec<Bar> = store.read_all(&key).unwrap();
        assert_eq!(stored.len(), 5);
    }

    #[test]
    fn persist_off_leaves_store_untouched() {
        let quotes = Arc::new(MockQuoteService::new());
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let reconciler = reconciler_with(store.clone(), quotes, date(2024, 6, 28)).with_options(
            ReconcilerOptions {
                persist: false,
                ..fast_options()
            },
        );
        let key = daily_key("rb888");
        let series = reconciler
            .fetch(&key, date(2024, 1, 8), date(2024, 1, 12), &credentials())
            .unwrap();
        assert_eq!(series.len(), 5);
        assert!(!store.exists(&key).unwrap());
    }
}

mod remote_failures {
    use super::*;

    #[test]
    fn transient_errors_are_retried() {
        init_logging();
        let quotes = Arc::new(MockQuoteService::new().with_failures(vec![
            RemoteError::Server {
                reason: "busy".into(),
            },
            RemoteError::Network {
                reason: "reset".into(),
            },
        ]));
        let reconciler = memory_reconciler(quotes.clone());
        let (series, report) = reconciler
            .fetch_with_report(&daily_key("rb888"), date(2024, 1, 8), date(2024, 1, 12), &credentials())
            .unwrap();
        assert_eq!(series.len(), 5);
        assert_eq!(quotes.call_count(), 3);
        assert_eq!(report.remote_calls, 3);
        assert_eq!(report.failed_runs, 0);
    }

    #[test]
    fn auth_errors_are_not_retried() {
        let quotes = Arc::new(MockQuoteService::new().with_failures(vec![RemoteError::AuthMissing]));
        let reconciler = memory_reconciler(quotes.clone());
        let (series, report) = reconciler
            .fetch_with_report(&daily_key("rb888"), date(2024, 1, 8), date(2024, 1, 12), &credentials())
            .unwrap();
        assert!(series.is_empty());
        assert_eq!(quotes.call_count(), 1);
        assert_eq!(report.failed_runs, 1);
    }

    #[test]
    fn exhausted_retries_degrade_to_cached_rows() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let key = daily_key("rb888");
        seed(
            &store,
            &key,
            &[date(2024, 1, 8), date(2024, 1, 9), date(2024, 1, 10)],
            1.0,
        );
        let timeout = RemoteError::Timeout { secs: 300 };
        let quotes = Arc::new(MockQuoteService::new().with_failures(vec![
            timeout.clone(),
            timeout.clone(),
            timeout,
        ]));
        let reconciler = reconciler_with(store, quotes.clone(), date(2024, 6, 28));

        let (series, report) = reconciler
            .fetch_with_report(&key, date(2024, 1, 8), date(2024, 1, 12), &credentials())
            .unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(quotes.call_count(), 3);
        assert_eq!(report.failed_runs, 1);
        assert!(!report.persisted);
    }

    #[test]
    fn missing_credentials_are_fatal() {
        let quotes = Arc::new(MockQuoteService::new());
        let reconciler = memory_reconciler(quotes.clone());
        let result = reconciler.fetch(
            &daily_key("rb888"),
            date(2024, 1, 8),
            date(2024, 1, 12),
            &Credentials::new("alice", ""),
        );
        assert!(matches!(result, Err(FutquantError::MissingCredentials)));
        assert_eq!(quotes.call_count(), 0);
    }

    #[test]
    fn ticks_cannot_be_fetched_remotely() {
        let quotes = Arc::new(MockQuoteService::new());
        let reconciler = memory_reconciler(quotes.clone());
        let result = reconciler.fetch(
            &InstrumentKey::tick("rb2405"),
            date(2024, 1, 8),
            date(2024, 1, 12),
            &credentials(),
        );
        match result {
            Err(e @ FutquantError::InvalidPeriod { .. }) => assert!(e.is_configuration()),
            other => panic!("expected InvalidPeriod, got {other:?}"),
        }
        assert_eq!(quotes.call_count(), 0);
    }
}

mod local_series {
    use super::*;

    fn tick(day: chrono::NaiveDate, hour: u32, price: f64) -> Tick {
        Tick {
            timestamp: at(day, hour, 0),
            last_price: price,
            volume: 1.0,
            open_interest: 10.0,
            bid_price: price - 1.0,
            bid_volume: 3.0,
            ask_price: price + 1.0,
            ask_volume: 4.0,
        }
    }

    #[test]
    fn record_live_is_idempotent_and_preload_returns_newest() {
        let reconciler = memory_reconciler(Arc::new(MockQuoteService::new()));
        let key = daily_key("rb888");
        let rows: Vec<Bar> = (8..=12).map(|d| bar_on(date(2024, 1, d), d as f64)).collect();

        assert_eq!(reconciler.record_live(&key, &rows).unwrap(), 5);
        assert_eq!(reconciler.record_live(&key, &rows).unwrap(), 0);
        assert_eq!(reconciler.record_live::<Bar>(&key, &[]).unwrap(), 0);

        let recent = reconciler.preload::<Bar>(&key, 2);
        let closes: Vec<f64> = recent.iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![11.0, 12.0]);
        assert_eq!(reconciler.preload::<Bar>(&key, 0).len(), 5);
        assert!(reconciler.preload::<Bar>(&daily_key("missing"), 3).is_empty());
    }

    #[test]
    fn ticks_load_from_store_by_date() {
        let reconciler = memory_reconciler(Arc::new(MockQuoteService::new()));
        let key = InstrumentKey::tick("rb2405");
        let ticks = vec![
            tick(date(2024, 1, 8), 9, 3500.0),
            tick(date(2024, 1, 9), 9, 3501.0),
            tick(date(2024, 1, 9), 14, 3502.0),
            tick(date(2024, 1, 10), 9, 3503.0),
        ];
        reconciler.record_live(&key, &ticks).unwrap();

        let loaded = reconciler.load_ticks("rb2405", date(2024, 1, 9), date(2024, 1, 9));
        let prices: Vec<f64> = loaded.iter().map(|t| t.last_price).collect();
        assert_eq!(prices, vec![3501.0, 3502.0]);
        assert!(reconciler.load_ticks("ag2406", date(2024, 1, 1), date(2024, 1, 31)).is_empty());
    }
}

mod concurrency {
    use super::*;
    use std::thread;

    #[test]
    fn writers_sharing_a_registry_keep_every_row() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("shared.db"), 4).unwrap());
        let registry = Arc::new(StoreLockRegistry::new([store.location()]));
        let quotes = Arc::new(MockQuoteService::new());
        let key = daily_key("rb888");

        let mondays = [date(2024, 1, 8), date(2024, 1, 15), date(2024, 1, 22), date(2024, 1, 29)];
        let handles: Vec<_> = mondays
            .iter()
            .map(|&monday| {
                let reconciler = reconciler_with(store.clone(), quotes.clone(), date(2024, 6, 28))
                    .with_locks(registry.clone())
                    .unwrap();
                let key = key.clone();
                thread::spawn(move || {
                    reconciler
                        .fetch(&key, monday, monday + chrono::Days::new(4), &credentials())
                        .unwrap()
                        .len()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 5);
        }

        let stored: Vec<Bar> = store.read_all(&key).unwrap();
        assert_eq!(stored.len(), 20);
    }

    #[test]
    fn registry_must_cover_the_store() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let other = Arc::new(StoreLockRegistry::new([std::path::Path::new("/tmp/elsewhere.db")]));
        let result = reconciler_with(store, Arc::new(MockQuoteService::new()), date(2024, 6, 28))
            .with_locks(other);
        assert!(matches!(result, Err(FutquantError::ConfigInvalid { .. })));
    }
}
