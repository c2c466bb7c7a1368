//! HTTP quote-service adapter.
//!
//! One GET per request with credentials, symbol, date range, period code and
//! adjustment code as query parameters. The service answers with a JSON array
//! of bar records stamped in UTC at bar close; rows are converted to
//! exchange-local time (UTC+8) and, for intraday periods, re-stamped at bar open.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;

use crate::domain::bar::Bar;
use crate::domain::error::{FutquantError, RemoteError};
use crate::domain::instrument::Period;
use crate::domain::settings::QuoteServiceSettings;
use crate::ports::quote_port::{QuoteRequest, QuoteService};

/// Exchange-local offset: China Standard Time, no daylight saving.
const EXCHANGE_OFFSET_SECS: i32 = 8 * 3600;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Millis(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct WireBar {
    datetime: WireTimestamp,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: Option<f64>,
    #[serde(default)]
    amount: Option<f64>,
    #[serde(default)]
    openint: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: Option<String>,
}

pub struct HttpQuoteAdapter {
    client: reqwest::blocking::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpQuoteAdapter {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, FutquantError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e: reqwest::Error| FutquantError::ConfigInvalid {
                section: "quote_service".into(),
                key: "url".into(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            timeout,
        })
    }

    pub fn from_settings(settings: &QuoteServiceSettings) -> Result<Self, FutquantError> {
        let url = settings
            .url
            .clone()
            .ok_or_else(|| FutquantError::ConfigMissing {
                section: "quote_service".into(),
                key: "url".into(),
            })?;
        Self::new(url, settings.timeout)
    }

    fn classify(&self, e: reqwest::Error) -> RemoteError {
        if e.is_timeout() {
            RemoteError::Timeout {
                secs: self.timeout.as_secs(),
            }
        } else {
            RemoteError::Network {
                reason: e.to_string(),
            }
        }
    }
}

impl QuoteService for HttpQuoteAdapter {
    fn request(&self, request: &QuoteRequest) -> Result<Vec<Bar>, RemoteError> {
        let start = request.start.format("%Y-%m-%d").to_string();
        let end = request.end.format("%Y-%m-%d").to_string();
        let period = request.period.code();
        log::debug!(
            "GET {} symbol={} {start}..{end} period={period}",
            self.base_url,
            request.symbol
        );

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("username", request.credentials.username.as_str()),
                ("password", request.credentials.password.as_str()),
                ("symbol", request.symbol.as_str()),
                ("start_date", start.as_str()),
                ("end_date", end.as_str()),
                ("kline_period", period.as_str()),
                ("adjust_type", request.adjustment.code()),
            ])
            .send()
            .map_err(|e| self.classify(e))?;

        let status = response.status().as_u16();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/json"));
        let body = response.text().map_err(|e| self.classify(e))?;

        match status {
            200 if is_json => parse_bars(&body, request.period),
            200 => Err(RemoteError::MalformedResponse {
                reason: "response is not JSON".into(),
            }),
            401 => Err(RemoteError::AuthMissing),
            402 => Err(RemoteError::AccountInvalid),
            405 => Err(RemoteError::AccountExpired),
            406 => Err(RemoteError::BadPassword),
            500 => Err(RemoteError::Server {
                reason: error_message(&body),
            }),
            other => Err(RemoteError::Status {
                status: other,
                reason: error_message(&body),
            }),
        }
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<WireError>(body)
        .ok()
        .and_then(|e| e.error)
        .unwrap_or_else(|| "unknown error".to_string())
}

/// Wire timestamp as a UTC instant. Text without an offset is taken as UTC.
fn parse_utc(ts: &WireTimestamp) -> Option<DateTime<Utc>> {
    match ts {
        WireTimestamp::Millis(ms) => DateTime::from_timestamp_millis(*ms),
        WireTimestamp::Text(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
                .iter()
                .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
                .or_else(|| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .map(|d| d.and_time(chrono::NaiveTime::MIN))
                })
                .map(|naive| naive.and_utc())
        }
    }
}

/// Decodes a JSON bar array into exchange-local, open-stamped bars.
pub fn parse_bars(body: &str, period: Period) -> Result<Vec<Bar>, RemoteError> {
    let wire: Vec<WireBar> =
        serde_json::from_str(body).map_err(|e| RemoteError::MalformedResponse {
            reason: e.to_string(),
        })?;
    let offset = FixedOffset::east_opt(EXCHANGE_OFFSET_SECS).ok_or_else(|| {
        RemoteError::MalformedResponse {
            reason: "invalid exchange offset".into(),
        }
    })?;
    let shift = period.intraday_length().unwrap_or(TimeDelta::zero());

    let mut bars = Vec::with_capacity(wire.len());
    for row in wire {
        let Some(utc) = parse_utc(&row.datetime) else {
            log::warn!("skipping bar with unparseable timestamp {:?}", row.datetime);
            continue;
        };
        bars.push(Bar {
            timestamp: utc.with_timezone(&offset).naive_local() - shift,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume.unwrap_or(0.0),
            amount: row.amount.unwrap_or(f64::NAN),
            open_interest: row.openint.unwrap_or(f64::NAN),
        });
    }
    Ok(bars)
}
