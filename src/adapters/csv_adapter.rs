//! CSV files: trading-calendar source, record import and export.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::domain::bar::Record;
use crate::domain::error::FutquantError;
use crate::ports::calendar_port::CalendarSource;

const DATE_HEADERS: [&str; 4] = ["trade_date", "date", "datetime", "cal_date"];

fn data_err(path: &Path, reason: impl Into<String>) -> FutquantError {
    FutquantError::DataFile {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y/%m/%d"))
        .ok()
        .or_else(|| parse_datetime(s).map(|dt| dt.date()))
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y/%m/%d %H:%M:%S%.f"]
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
}

fn open_reader(path: &Path) -> Result<csv::Reader<fs::File>, FutquantError> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| data_err(path, e.to_string()))
}

/// Trading days listed one per row in a CSV file. The date column is found by
/// header name, falling back to the first column.
pub struct CsvCalendarSource {
    path: PathBuf,
}

impl CsvCalendarSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CalendarSource for CsvCalendarSource {
    fn trading_days(&self) -> Result<Vec<NaiveDate>, FutquantError> {
        let mut rdr = open_reader(&self.path)?;
        let headers = rdr
            .headers()
            .map_err(|e| data_err(&self.path, e.to_string()))?
            .clone();
        let column = headers
            .iter()
            .position(|h| DATE_HEADERS.contains(&h.to_lowercase().as_str()))
            .unwrap_or(0);

        let mut days = Vec::new();
        for (line, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| data_err(&self.path, e.to_string()))?;
            let raw = record.get(column).unwrap_or_default();
            let day = parse_date(raw)
                .ok_or_else(|| data_err(&self.path, format!("row {}: invalid date '{raw}'", line + 2)))?;
            days.push(day);
        }
        days.sort_unstable();
        days.dedup();
        Ok(days)
    }
}

/// Reads records from a CSV file with a header row. Columns are matched to
/// [`Record::COLUMNS`] by name, ignoring case; absent or empty cells read as NaN.
pub fn read_records<R: Record>(path: &Path) -> Result<Vec<R>, FutquantError> {
    let mut rdr = open_reader(path)?;
    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| data_err(path, e.to_string()))?
        .iter()
        .map(|h| h.to_lowercase())
        .collect();
    let ts_column = headers
        .iter()
        .position(|h| DATE_HEADERS.contains(&h.as_str()))
        .ok_or_else(|| data_err(path, "no datetime or date column"))?;
    let indices: Vec<Option<usize>> = R::COLUMNS
        .iter()
        .map(|c| headers.iter().position(|h| h == c))
        .collect();

    let mut rows = Vec::new();
    for (line, result) in rdr.records().enumerate() {
        let record = result.map_err(|e| data_err(path, e.to_string()))?;
        let raw = record.get(ts_column).unwrap_or_default();
        let timestamp = parse_datetime(raw)
            .or_else(|| parse_date(raw).map(|d| d.and_time(NaiveTime::MIN)))
            .ok_or_else(|| data_err(path, format!("row {}: invalid timestamp '{raw}'", line + 2)))?;

        let mut values = Vec::with_capacity(indices.len());
        for (column, index) in R::COLUMNS.iter().zip(&indices) {
            let cell = index.and_then(|i| record.get(i)).unwrap_or_default();
            let value = if cell.is_empty() {
                f64::NAN
            } else {
                cell.parse::<f64>().map_err(|e| {
                    data_err(path, format!("row {}: invalid {column} '{cell}': {e}", line + 2))
                })?
            };
            values.push(value);
        }
        rows.push(R::from_values(timestamp, &values));
    }
    Ok(rows)
}

/// Writes records with a `datetime` column followed by [`Record::COLUMNS`].
pub fn write_records<R: Record>(path: &Path, rows: &[R]) -> Result<(), FutquantError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut wtr = csv::Writer::from_path(path).map_err(|e| data_err(path, e.to_string()))?;
    let header: Vec<&str> = std::iter::once("datetime")
        .chain(R::COLUMNS.iter().copied())
        .collect();
    wtr.write_record(&header)
        .map_err(|e| data_err(path, e.to_string()))?;
    for row in rows {
        let mut record = vec![row.timestamp().format("%Y-%m-%d %H:%M:%S%.f").to_string()];
        record.extend(row.values().iter().map(|v| {
            if v.is_finite() {
                v.to_string()
            } else {
                String::new()
            }
        }));
        wtr.write_record(&record)
            .map_err(|e| data_err(path, e.to_string()))?;
    }
    wtr.flush()?;
    Ok(())
}
