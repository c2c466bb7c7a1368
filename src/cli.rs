//! CLI definition and dispatch.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use crate::adapters::calendar_file_adapter::JsonCalendarCache;
use crate::adapters::csv_adapter::{self, CsvCalendarSource};
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::http_quote_adapter::HttpQuoteAdapter;
use crate::adapters::sqlite_adapter::SqliteStore;
use crate::domain::bar::{Bar, Record, Tick};
use crate::domain::calendar::TradingCalendar;
use crate::domain::clock::SystemClock;
use crate::domain::error::FutquantError;
use crate::domain::instrument::{Adjustment, InstrumentKey, Period};
use crate::domain::reconciler::CacheReconciler;
use crate::domain::series::TimeSeries;
use crate::domain::settings::Settings;
use crate::domain::store_lock::StoreLockRegistry;
use crate::ports::calendar_port::CalendarSource;
use crate::ports::store_port::SeriesStore;

#[derive(Parser, Debug)]
#[command(name = "futquant", about = "Futures bar cache, trading calendar and backtest data")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch bars through the local cache, filling gaps from the quote service
    Fetch {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        symbol: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        /// Bar period: 1M, 5M, 1H, D, 1W, 1Y
        #[arg(short, long, default_value = "D")]
        period: Period,
        /// 0/raw or 1/hfq
        #[arg(short, long, default_value = "raw")]
        adjust: Adjustment,
        /// Write the series to this CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the cached range of one series
    Info {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        symbol: String,
        #[arg(short, long, default_value = "D")]
        period: Period,
        #[arg(short, long, default_value = "raw")]
        adjust: Adjustment,
    },
    /// Trading-day status of a date
    Calendar {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        date: NaiveDate,
    },
    /// List cached tables
    Tables {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Append rows from a CSV file to the cache
    Import {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        symbol: String,
        #[arg(short, long, default_value = "D")]
        period: Period,
        #[arg(short, long, default_value = "raw")]
        adjust: Adjustment,
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Write a cached series to a CSV file
    Export {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        symbol: String,
        #[arg(short, long, default_value = "D")]
        period: Period,
        #[arg(short, long, default_value = "raw")]
        adjust: Adjustment,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        #[arg(short, long)]
        output: PathBuf,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Fetch {
            config,
            symbol,
            start,
            end,
            period,
            adjust,
            output,
        } => run_fetch(
            &config,
            &instrument_key(&symbol, period, adjust),
            start,
            end,
            output.as_deref(),
        ),
        Command::Info {
            config,
            symbol,
            period,
            adjust,
        } => run_info(&config, &instrument_key(&symbol, period, adjust)),
        Command::Calendar { config, date } => run_calendar(&config, date),
        Command::Tables { config } => run_tables(&config),
        Command::Import {
            config,
            symbol,
            period,
            adjust,
            file,
        } => run_import(&config, &instrument_key(&symbol, period, adjust), &file),
        Command::Export {
            config,
            symbol,
            period,
            adjust,
            start,
            end,
            output,
        } => run_export(&config, &instrument_key(&symbol, period, adjust), start, end, &output),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn instrument_key(symbol: &str, period: Period, adjustment: Adjustment) -> InstrumentKey {
    if period.is_tick() {
        InstrumentKey::tick(symbol)
    } else {
        InstrumentKey::new(symbol, period, adjustment)
    }
}

/// Settings from an INI file with `FUTQUANT_*` environment overrides applied.
pub fn load_settings(path: &Path) -> Result<Settings, FutquantError> {
    let adapter = FileConfigAdapter::from_file(path)?.with_env();
    Settings::from_config(&adapter)
}

pub fn load_calendar(settings: &Settings) -> TradingCalendar {
    let cache = JsonCalendarCache::new(&settings.calendar.cache_file);
    let source = settings
        .calendar
        .source_file
        .as_ref()
        .map(CsvCalendarSource::new);
    TradingCalendar::load(
        source.as_ref().map(|s| s as &dyn CalendarSource),
        Some(&cache),
        &SystemClock,
        &settings.calendar.policy,
    )
}

pub fn build_reconciler(
    settings: &Settings,
) -> Result<CacheReconciler<SqliteStore, HttpQuoteAdapter>, FutquantError> {
    let store = Arc::new(SqliteStore::from_settings(&settings.cache)?);
    let quotes = Arc::new(HttpQuoteAdapter::from_settings(&settings.quote_service)?);
    let calendar = Arc::new(load_calendar(settings));
    Ok(CacheReconciler::new(store, quotes, calendar).with_options(settings.reconciler_options()))
}

fn run_fetch(
    config_path: &Path,
    key: &InstrumentKey,
    start: NaiveDate,
    end: NaiveDate,
    output: Option<&Path>,
) -> Result<(), FutquantError> {
    let settings = load_settings(config_path)?;
    let reconciler = build_reconciler(&settings)?;
    let (series, report) = reconciler.fetch_with_report(
        key,
        start,
        end,
        &settings.quote_service.credentials,
    )?;

    match (series.first(), series.last()) {
        (Some(first), Some(last)) => println!(
            "{key}: {} bars, {} to {}",
            series.len(),
            first.timestamp,
            last.timestamp
        ),
        _ => println!("{key}: no bars in {start} to {end}"),
    }
    if report.fast_path {
        println!("  served from cache");
    } else {
        println!(
            "  remote calls: {}, runs: {}, rows fetched: {}, failed runs: {}",
            report.remote_calls,
            report.runs.len(),
            report.rows_fetched,
            report.failed_runs
        );
    }

    if let Some(path) = output {
        csv_adapter::write_records(path, series.as_slice())?;
        println!("  written to {}", path.display());
    }
    Ok(())
}

fn run_info(config_path: &Path, key: &InstrumentKey) -> Result<(), FutquantError> {
    let settings = load_settings(config_path)?;
    let store = SqliteStore::from_settings(&settings.cache)?;
    match store.data_range(key)? {
        Some((first, last, count)) => {
            println!("{key} ({})", key.table_name());
            println!("  rows:  {count}");
            println!("  first: {first}");
            println!("  last:  {last}");
        }
        None => println!("{key}: not cached"),
    }
    Ok(())
}

fn run_calendar(config_path: &Path, date: NaiveDate) -> Result<(), FutquantError> {
    let settings = load_settings(config_path)?;
    let calendar = load_calendar(&settings);
    let status = if calendar.is_trading_day(date) {
        "trading day"
    } else {
        "not a trading day"
    };
    println!("{date}: {status}");
    println!("  previous trading day: {}", calendar.previous_trading_day(date));
    match calendar.next_trading_day(date) {
        Some(next) => println!("  next trading day:     {next}"),
        None => println!("  next trading day:     none within search window"),
    }
    match calendar.coverage() {
        Some((first, last)) => println!(
            "  calendar: {} days, {first} to {last}",
            calendar.days().len()
        ),
        None => println!("  calendar: Monday-Friday rule"),
    }
    Ok(())
}

fn run_tables(config_path: &Path) -> Result<(), FutquantError> {
    let settings = load_settings(config_path)?;
    let store = SqliteStore::from_settings(&settings.cache)?;
    let tables = store.list_tables()?;
    if tables.is_empty() {
        println!("no cached tables in {}", settings.cache.db_path().display());
    }
    for table in tables {
        println!("{table}");
    }
    Ok(())
}

fn run_import(config_path: &Path, key: &InstrumentKey, file: &Path) -> Result<(), FutquantError> {
    let settings = load_settings(config_path)?;
    let store = SqliteStore::from_settings(&settings.cache)?;
    let locks = StoreLockRegistry::new([store.location()]);
    let (read, added) = if key.period().is_tick() {
        import_rows::<Tick>(&store, &locks, key, file)?
    } else {
        import_rows::<Bar>(&store, &locks, key, file)?
    };
    println!("{key}: {added} of {read} rows added");
    Ok(())
}

/// Rows read from `file` and rows newly appended to the store. The append
/// runs under the store's write lock in `locks`.
pub fn import_rows<R: Record>(
    store: &impl SeriesStore,
    locks: &StoreLockRegistry,
    key: &InstrumentKey,
    file: &Path,
) -> Result<(usize, usize), FutquantError> {
    let rows = TimeSeries::from_unsorted(csv_adapter::read_records::<R>(file)?);
    let Some(_guard) = locks.lock(store.location()) else {
        return Err(FutquantError::ConfigInvalid {
            section: "cache".into(),
            key: "db_file".into(),
            reason: format!(
                "store {} has no entry in the lock registry",
                store.location().display()
            ),
        });
    };
    let added = store.append_new(key, rows.as_slice())?;
    log::info!("{key}: imported {added} new rows from {}", file.display());
    Ok((rows.len(), added))
}

fn run_export(
    config_path: &Path,
    key: &InstrumentKey,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    output: &Path,
) -> Result<(), FutquantError> {
    let settings = load_settings(config_path)?;
    let store = SqliteStore::from_settings(&settings.cache)?;
    let written = if key.period().is_tick() {
        export_rows::<Tick>(&store, key, start, end, output)?
    } else {
        export_rows::<Bar>(&store, key, start, end, output)?
    };
    println!("{key}: {written} rows written to {}", output.display());
    Ok(())
}

/// Writes the stored rows dated within the optional bounds. Returns the row count.
pub fn export_rows<R: Record>(
    store: &impl SeriesStore,
    key: &InstrumentKey,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    output: &Path,
) -> Result<usize, FutquantError> {
    let series = TimeSeries::from_unsorted(store.read_all::<R>(key)?);
    let series = match series.date_bounds() {
        Some((first, last)) => series.filter_dates(start.unwrap_or(first), end.unwrap_or(last)),
        None => series,
    };
    csv_adapter::write_records(output, series.as_slice())?;
    Ok(series.len())
}
