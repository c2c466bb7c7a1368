//! Local series store port.

use std::path::Path;

use chrono::NaiveDateTime;

use crate::domain::bar::Record;
use crate::domain::error::FutquantError;
use crate::domain::instrument::InstrumentKey;

/// Durable per-key tables of [`Record`] rows, ordered by timestamp.
pub trait SeriesStore: Send + Sync {
    /// Canonical location of the backing file; the key for cross-thread write locks.
    fn location(&self) -> &Path;

    fn exists(&self, key: &InstrumentKey) -> Result<bool, FutquantError>;

    /// All rows ascending. A missing table reads as empty.
    fn read_all<R: Record>(&self, key: &InstrumentKey) -> Result<Vec<R>, FutquantError>;

    /// The `n` most recent rows, ascending.
    fn read_latest<R: Record>(
        &self,
        key: &InstrumentKey,
        n: usize,
    ) -> Result<Vec<R>, FutquantError>;

    /// Atomically replaces the table contents with `rows`.
    fn replace_all<R: Record>(&self, key: &InstrumentKey, rows: &[R]) -> Result<(), FutquantError>;

    /// Inserts rows whose timestamp is not yet stored. Returns how many were added.
    fn append_new<R: Record>(&self, key: &InstrumentKey, rows: &[R])
    -> Result<usize, FutquantError>;

    /// Adds numeric columns absent from an existing table. Returns how many were added.
    fn add_missing_columns(
        &self,
        key: &InstrumentKey,
        columns: &[&str],
    ) -> Result<usize, FutquantError>;

    /// First timestamp, last timestamp and row count, if the table holds any rows.
    fn data_range(
        &self,
        key: &InstrumentKey,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, FutquantError>;

    fn list_tables(&self) -> Result<Vec<String>, FutquantError>;
}
