//! Bar and tick observations.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A time-stamped observation that an [`InstrumentStream`](super::stream::InstrumentStream)
/// can price orders against.
pub trait Observation: Clone {
    fn timestamp(&self) -> NaiveDateTime;
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;

    /// Best bid, when the observation carries an order book.
    fn best_bid(&self) -> Option<f64> {
        None
    }

    /// Best ask, when the observation carries an order book.
    fn best_ask(&self) -> Option<f64> {
        None
    }

    /// Copy of this observation re-stamped at `timestamp` (forward/backward fill).
    fn with_timestamp(&self, timestamp: NaiveDateTime) -> Self;

    /// Placeholder with non-finite prices for an axis slot with no data.
    fn void_at(timestamp: NaiveDateTime) -> Self;
}

/// Fixed-schema row as persisted in the local store: a timestamp plus named
/// numeric columns. Column order in [`Record::values`] follows [`Record::COLUMNS`].
pub trait Record: Observation {
    const COLUMNS: &'static [&'static str];

    fn values(&self) -> Vec<f64>;

    /// Builds a row from values aligned to `COLUMNS`; absent values read as NaN.
    fn from_values(timestamp: NaiveDateTime, values: &[f64]) -> Self;
}

fn value_at(values: &[f64], i: usize) -> f64 {
    values.get(i).copied().unwrap_or(f64::NAN)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub amount: f64,
    pub open_interest: f64,
}

impl Bar {
    pub fn date(&self) -> chrono::NaiveDate {
        self.timestamp.date()
    }
}

impl Observation for Bar {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
    fn open(&self) -> f64 {
        self.open
    }
    fn high(&self) -> f64 {
        self.high
    }
    fn low(&self) -> f64 {
        self.low
    }
    fn close(&self) -> f64 {
        self.close
    }

    fn with_timestamp(&self, timestamp: NaiveDateTime) -> Self {
        Bar {
            timestamp,
            ..self.clone()
        }
    }

    fn void_at(timestamp: NaiveDateTime) -> Self {
        Bar {
            timestamp,
            open: f64::NAN,
            high: f64::NAN,
            low: f64::NAN,
            close: f64::NAN,
            volume: 0.0,
            amount: 0.0,
            open_interest: f64::NAN,
        }
    }
}

/// Level-1 market snapshot as produced by the exchange gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp: NaiveDateTime,
    pub last_price: f64,
    pub volume: f64,
    pub open_interest: f64,
    pub bid_price: f64,
    pub bid_volume: f64,
    pub ask_price: f64,
    pub ask_volume: f64,
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

impl Observation for Tick {
    fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }
    fn open(&self) -> f64 {
        self.last_price
    }
    fn high(&self) -> f64 {
        self.last_price
    }
    fn low(&self) -> f64 {
        self.last_price
    }
    fn close(&self) -> f64 {
        self.last_price
    }

    fn best_bid(&self) -> Option<f64> {
        finite(self.bid_price).filter(|p| *p > 0.0)
    }

    fn best_ask(&self) -> Option<f64> {
        finite(self.ask_price).filter(|p| *p > 0.0)
    }

    fn with_timestamp(&self, timestamp: NaiveDateTime) -> Self {
        Tick {
            timestamp,
            ..self.clone()
        }
    }

    fn void_at(timestamp: NaiveDateTime) -> Self {
        Tick {
            timestamp,
            last_price: f64::NAN,
            volume: 0.0,
            open_interest: f64::NAN,
            bid_price: f64::NAN,
            bid_volume: 0.0,
            ask_price: f64::NAN,
            ask_volume: 0.0,
        }
    }
}

impl Record for Bar {
    const COLUMNS: &'static [&'static str] =
        &["open", "high", "low", "close", "volume", "amount", "openint"];

    fn values(&self) -> Vec<f64> {
        vec![
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
            self.amount,
            self.open_interest,
        ]
    }

    fn from_values(timestamp: NaiveDateTime, values: &[f64]) -> Self {
        Bar {
            timestamp,
            open: value_at(values, 0),
            high: value_at(values, 1),
            low: value_at(values, 2),
            close: value_at(values, 3),
            volume: value_at(values, 4),
            amount: value_at(values, 5),
            open_interest: value_at(values, 6),
        }
    }
}

impl Record for Tick {
    const COLUMNS: &'static [&'static str] = &[
        "last_price",
        "volume",
        "open_interest",
        "bid_price1",
        "bid_volume1",
        "ask_price1",
        "ask_volume1",
    ];

    fn values(&self) -> Vec<f64> {
        vec![
            self.last_price,
            self.volume,
            self.open_interest,
            self.bid_price,
            self.bid_volume,
            self.ask_price,
            self.ask_volume,
        ]
    }

    fn from_values(timestamp: NaiveDateTime, values: &[f64]) -> Self {
        Tick {
            timestamp,
            last_price: value_at(values, 0),
            volume: value_at(values, 1),
            open_interest: value_at(values, 2),
            bid_price: value_at(values, 3),
            bid_volume: value_at(values, 4),
            ask_price: value_at(values, 5),
            ask_volume: value_at(values, 6),
        }
    }
}
