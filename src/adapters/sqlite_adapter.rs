//! SQLite series store.
//!
//! One table per instrument key, named by [`InstrumentKey::table_name`]:
//! a `datetime` TEXT primary key followed by one REAL column per record
//! column. Connections run in WAL mode so readers never block on a writer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveDateTime;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};

use crate::domain::bar::Record;
use crate::domain::error::FutquantError;
use crate::domain::instrument::InstrumentKey;
use crate::domain::settings::CacheSettings;
use crate::domain::store_lock::{MEMORY_LOCATION, canonical_location};
use crate::ports::store_port::SeriesStore;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const TIMESTAMP_COLUMN: &str = "datetime";

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
    location: PathBuf,
}

fn db_err(e: r2d2::Error) -> FutquantError {
    FutquantError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> FutquantError {
    FutquantError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn quoted(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
}

fn init_connection(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool, FutquantError> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )
        .map_err(query_err)?;
    Ok(count > 0)
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, FutquantError> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", quoted(table)))
        .map_err(query_err)?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(query_err)?;
    let mut columns = Vec::new();
    for row in rows {
        columns.push(row.map_err(query_err)?);
    }
    Ok(columns)
}

fn create_table<R: Record>(conn: &Connection, table: &str) -> Result<(), FutquantError> {
    let columns: Vec<String> = R::COLUMNS
        .iter()
        .map(|c| format!("{} REAL", quoted(c)))
        .collect();
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} ({} TEXT PRIMARY KEY, {})",
        quoted(table),
        TIMESTAMP_COLUMN,
        columns.join(", ")
    ))
    .map_err(query_err)
}

fn add_columns(conn: &Connection, table: &str, wanted: &[&str]) -> Result<usize, FutquantError> {
    let existing = table_columns(conn, table)?;
    let mut added = 0;
    for column in wanted {
        if existing.iter().any(|c| c.eq_ignore_ascii_case(column)) {
            continue;
        }
        conn.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} REAL",
            quoted(table),
            quoted(column)
        ))
        .map_err(query_err)?;
        log::info!("added column {column} to {table}");
        added += 1;
    }
    Ok(added)
}

fn insert_sql<R: Record>(table: &str, verb: &str) -> String {
    let names: Vec<String> = std::iter::once(TIMESTAMP_COLUMN)
        .chain(R::COLUMNS.iter().copied())
        .map(quoted)
        .collect();
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
    format!(
        "{verb} INTO {} ({}) VALUES ({})",
        quoted(table),
        names.join(", "),
        placeholders.join(", ")
    )
}

fn row_values<R: Record>(row: &R) -> Vec<Value> {
    std::iter::once(Value::Text(format_timestamp(row.timestamp())))
        .chain(row.values().into_iter().map(|v| {
            if v.is_finite() {
                Value::Real(v)
            } else {
                Value::Null
            }
        }))
        .collect()
}

/// Runs `sql` and maps each result row onto `R` by column name. Columns the
/// table lacks, and NULLs, read as NaN.
fn read_rows<R: Record, P: rusqlite::Params>(
    conn: &Connection,
    table: &str,
    sql: &str,
    params: P,
) -> Result<Vec<R>, FutquantError> {
    let corrupt = |reason: String| FutquantError::CacheCorrupt {
        table: table.to_string(),
        reason,
    };
    let mut stmt = conn.prepare(sql).map_err(|e| corrupt(e.to_string()))?;
    let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();
    let ts_index = names
        .iter()
        .position(|n| n == TIMESTAMP_COLUMN)
        .ok_or_else(|| corrupt("no datetime column".into()))?;
    let indices: Vec<Option<usize>> = R::COLUMNS
        .iter()
        .map(|c| names.iter().position(|n| n.eq_ignore_ascii_case(c)))
        .collect();

    let mut rows = stmt.query(params).map_err(|e| corrupt(e.to_string()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(|e| corrupt(e.to_string()))? {
        let raw: String = row.get(ts_index).map_err(|e| corrupt(e.to_string()))?;
        let timestamp =
            parse_timestamp(&raw).ok_or_else(|| corrupt(format!("bad timestamp '{raw}'")))?;
        let mut values = Vec::with_capacity(indices.len());
        for index in &indices {
            let value = match index {
                Some(i) => row
                    .get::<_, Option<f64>>(*i)
                    .map_err(|e| corrupt(e.to_string()))?
                    .unwrap_or(f64::NAN),
                None => f64::NAN,
            };
            values.push(value);
        }
        out.push(R::from_values(timestamp, &values));
    }
    Ok(out)
}

impl SqliteStore {
    /// Opens (creating if needed) the database file at `path`.
    pub fn open(path: impl AsRef<Path>, pool_size: u32) -> Result<Self, FutquantError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let manager = SqliteConnectionManager::file(path).with_init(init_connection);
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(db_err)?;
        Ok(Self {
            pool,
            location: canonical_location(path),
        })
    }

    pub fn from_settings(cache: &CacheSettings) -> Result<Self, FutquantError> {
        Self::open(cache.db_path(), cache.pool_size)
    }

    pub fn in_memory() -> Result<Self, FutquantError> {
        let manager = SqliteConnectionManager::memory().with_init(init_connection);
        let pool = Pool::builder().max_size(1).build(manager).map_err(db_err)?;
        Ok(Self {
            pool,
            location: PathBuf::from(MEMORY_LOCATION),
        })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, FutquantError> {
        self.pool.get().map_err(db_err)
    }
}

impl SeriesStore for SqliteStore {
    fn location(&self) -> &Path {
        &self.location
    }

    fn exists(&self, key: &InstrumentKey) -> Result<bool, FutquantError> {
        let conn = self.conn()?;
        table_exists(&conn, &key.table_name())
    }

    fn read_all<R: Record>(&self, key: &InstrumentKey) -> Result<Vec<R>, FutquantError> {
        let table = key.table_name();
        let conn = self.conn()?;
        if !table_exists(&conn, &table)? {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT * FROM {} ORDER BY {TIMESTAMP_COLUMN} ASC",
            quoted(&table)
        );
        read_rows(&conn, &table, &sql, [])
    }

    fn read_latest<R: Record>(
        &self,
        key: &InstrumentKey,
        n: usize,
    ) -> Result<Vec<R>, FutquantError> {
        let table = key.table_name();
        let conn = self.conn()?;
        if n == 0 || !table_exists(&conn, &table)? {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT * FROM (SELECT * FROM {} ORDER BY {TIMESTAMP_COLUMN} DESC LIMIT ?1) \
             ORDER BY {TIMESTAMP_COLUMN} ASC",
            quoted(&table)
        );
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        read_rows(&conn, &table, &sql, params![limit])
    }

    fn replace_all<R: Record>(&self, key: &InstrumentKey, rows: &[R]) -> Result<(), FutquantError> {
        let table = key.table_name();
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", quoted(&table)))
            .map_err(query_err)?;
        create_table::<R>(&tx, &table)?;
        {
            let mut stmt = tx
                .prepare(&insert_sql::<R>(&table, "INSERT OR REPLACE"))
                .map_err(query_err)?;
            for row in rows {
                stmt.execute(params_from_iter(row_values(row)))
                    .map_err(query_err)?;
            }
        }
        tx.commit().map_err(query_err)?;
        log::debug!("replaced {table} with {} rows", rows.len());
        Ok(())
    }

    fn append_new<R: Record>(
        &self,
        key: &InstrumentKey,
        rows: &[R],
    ) -> Result<usize, FutquantError> {
        let table = key.table_name();
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        create_table::<R>(&tx, &table)?;
        add_columns(&tx, &table, R::COLUMNS)?;
        let mut added = 0;
        {
            let mut stmt = tx
                .prepare(&insert_sql::<R>(&table, "INSERT OR IGNORE"))
                .map_err(query_err)?;
            for row in rows {
                added += stmt
                    .execute(params_from_iter(row_values(row)))
                    .map_err(query_err)?;
            }
        }
        tx.commit().map_err(query_err)?;
        log::debug!("appended {added} of {} rows to {table}", rows.len());
        Ok(added)
    }

    fn add_missing_columns(
        &self,
        key: &InstrumentKey,
        columns: &[&str],
    ) -> Result<usize, FutquantError> {
        let table = key.table_name();
        let conn = self.conn()?;
        if !table_exists(&conn, &table)? {
            return Ok(0);
        }
        add_columns(&conn, &table, columns)
    }

    fn data_range(
        &self,
        key: &InstrumentKey,
    ) -> Result<Option<(NaiveDateTime, NaiveDateTime, usize)>, FutquantError> {
        let table = key.table_name();
        let conn = self.conn()?;
        if !table_exists(&conn, &table)? {
            return Ok(None);
        }
        let result: (Option<String>, Option<String>, i64) = conn
            .query_row(
                &format!(
                    "SELECT MIN({TIMESTAMP_COLUMN}), MAX({TIMESTAMP_COLUMN}), COUNT(*) FROM {}",
                    quoted(&table)
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(query_err)?;

        match result {
            (Some(min), Some(max), count) if count > 0 => {
                let parse = |s: &str| {
                    parse_timestamp(s).ok_or_else(|| FutquantError::CacheCorrupt {
                        table: table.clone(),
                        reason: format!("bad timestamp '{s}'"),
                    })
                };
                Ok(Some((parse(&min)?, parse(&max)?, count as usize)))
            }
            _ => Ok(None),
        }
    }

    fn list_tables(&self) -> Result<Vec<String>, FutquantError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(query_err)?;
        let mut tables = Vec::new();
        for row in rows {
            tables.push(row.map_err(query_err)?);
        }
        Ok(tables)
    }
}
