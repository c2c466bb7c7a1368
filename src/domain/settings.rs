//! Typed, validated settings read from the INI configuration.
//!
//! ```ini
//! [quote_service]
//! url = http://quotes.example:8086/ftdata
//! username = alice
//! password = secret
//! timeout_secs = 300
//!
//! [cache]
//! dir = data_cache
//! db_file = backtest_data.db
//! persist = true
//! pool_size = 4
//!
//! [retry]
//! max_attempts = 3
//! backoff_secs = 2
//!
//! [calendar]
//! cache_file = data_cache/trading_calendar.json
//! source_file = calendar.csv
//! refresh_days = 1
//! stale_after_days = 365
//! ```

use std::path::PathBuf;
use std::time::Duration;

use super::calendar::CalendarPolicy;
use super::error::FutquantError;
use super::reconciler::{ReconcilerOptions, RetryPolicy};
use crate::ports::config_port::ConfigPort;
use crate::ports::quote_port::Credentials;

#[derive(Debug, Clone, PartialEq)]
pub struct QuoteServiceSettings {
    pub url: Option<String>,
    pub credentials: Credentials,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    pub dir: PathBuf,
    pub db_file: String,
    pub persist: bool,
    pub pool_size: u32,
}

impl CacheSettings {
    pub fn db_path(&self) -> PathBuf {
        self.dir.join(&self.db_file)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalendarSettings {
    pub cache_file: PathBuf,
    pub source_file: Option<PathBuf>,
    pub policy: CalendarPolicy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub quote_service: QuoteServiceSettings,
    pub cache: CacheSettings,
    pub retry: RetryPolicy,
    pub calendar: CalendarSettings,
}

impl Settings {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, FutquantError> {
        let quote_service = QuoteServiceSettings {
            url: non_empty(config.get_string("quote_service", "url")),
            credentials: Credentials::new(
                config
                    .get_string("quote_service", "username")
                    .unwrap_or_default()
                    .trim(),
                config
                    .get_string("quote_service", "password")
                    .unwrap_or_default(),
            ),
            timeout: Duration::from_secs(positive(config, "quote_service", "timeout_secs", 300)?),
        };

        let dir = non_empty(config.get_string("cache", "dir")).unwrap_or_else(|| "data_cache".into());
        let cache = CacheSettings {
            dir: PathBuf::from(dir),
            db_file: non_empty(config.get_string("cache", "db_file"))
                .unwrap_or_else(|| "backtest_data.db".into()),
            persist: flag(config, "cache", "persist", true)?,
            pool_size: u32::try_from(positive(config, "cache", "pool_size", 4)?).map_err(|_| {
                FutquantError::ConfigInvalid {
                    section: "cache".into(),
                    key: "pool_size".into(),
                    reason: "pool_size is too large".into(),
                }
            })?,
        };

        let retry = RetryPolicy {
            max_attempts: u32::try_from(positive(config, "retry", "max_attempts", 3)?).map_err(
                |_| FutquantError::ConfigInvalid {
                    section: "retry".into(),
                    key: "max_attempts".into(),
                    reason: "max_attempts is too large".into(),
                },
            )?,
            backoff: Duration::from_secs(non_negative(config, "retry", "backoff_secs", 2)?),
        };

        let calendar = CalendarSettings {
            cache_file: non_empty(config.get_string("calendar", "cache_file"))
                .map(PathBuf::from)
                .unwrap_or_else(|| cache.dir.join("trading_calendar.json")),
            source_file: non_empty(config.get_string("calendar", "source_file")).map(PathBuf::from),
            policy: CalendarPolicy {
                refresh_days: non_negative(config, "calendar", "refresh_days", 1)? as i64,
                stale_after_days: non_negative(config, "calendar", "stale_after_days", 365)? as i64,
            },
        };

        Ok(Self {
            quote_service,
            cache,
            retry,
            calendar,
        })
    }

    pub fn reconciler_options(&self) -> ReconcilerOptions {
        ReconcilerOptions {
            retry: self.retry,
            persist: self.cache.persist,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn invalid(section: &str, key: &str, reason: String) -> FutquantError {
    FutquantError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason,
    }
}

/// Integer value, `default` when absent. A present value that does not parse
/// is rejected rather than defaulted.
fn integer(config: &dyn ConfigPort, section: &str, key: &str, default: i64) -> Result<i64, FutquantError> {
    match non_empty(config.get_string(section, key)) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| invalid(section, key, format!("'{raw}' is not an integer"))),
    }
}

fn positive(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
) -> Result<u64, FutquantError> {
    let value = integer(config, section, key, default)?;
    if value <= 0 {
        return Err(invalid(section, key, format!("{key} must be positive")));
    }
    Ok(value as u64)
}

fn non_negative(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: i64,
) -> Result<u64, FutquantError> {
    let value = integer(config, section, key, default)?;
    if value < 0 {
        return Err(invalid(section, key, format!("{key} must be non-negative")));
    }
    Ok(value as u64)
}

fn flag(config: &dyn ConfigPort, section: &str, key: &str, default: bool) -> Result<bool, FutquantError> {
    let Some(raw) = non_empty(config.get_string(section, key)) else {
        return Ok(default);
    };
    match raw.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(invalid(section, key, format!("'{raw}' is not a boolean"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapConfig(HashMap<(String, String), String>);

    impl MapConfig {
        fn new(entries: &[(&str, &str, &str)]) -> Self {
            Self(
                entries
                    .iter()
                    .map(|(s, k, v)| ((s.to_string(), k.to_string()), v.to_string()))
                    .collect(),
            )
        }
    }

    impl ConfigPort for MapConfig {
        fn get_string(&self, section: &str, key: &str) -> Option<String> {
            self.0.get(&(section.to_string(), key.to_string())).cloned()
        }
        fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
            self.get_string(section, key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }
        fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
            self.get_string(section, key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }
        fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
            self.get_string(section, key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }
    }

    #[test]
    fn defaults_apply_to_empty_config() {
        let settings = Settings::from_config(&MapConfig::new(&[])).unwrap();
        assert_eq!(settings.quote_service.url, None);
        assert!(!settings.quote_service.credentials.is_complete());
        assert_eq!(settings.quote_service.timeout, Duration::from_secs(300));
        assert_eq!(settings.cache.db_path(), PathBuf::from("data_cache/backtest_data.db"));
        assert!(settings.cache.persist);
        assert_eq!(settings.retry, RetryPolicy::default());
        assert_eq!(
            settings.calendar.cache_file,
            PathBuf::from("data_cache/trading_calendar.json")
        );
        assert_eq!(settings.calendar.policy, CalendarPolicy::default());
    }

    #[test]
    fn explicit_values_are_read() {
        let config = MapConfig::new(&[
            ("quote_service", "url", "http://localhost:8086/ftdata"),
            ("quote_service", "username", " alice "),
            ("quote_service", "password", "pw"),
            ("cache", "dir", "/tmp/q"),
            ("cache", "persist", "false"),
            ("retry", "max_attempts", "5"),
            ("retry", "backoff_secs", "0"),
        ]);
        let settings = Settings::from_config(&config).unwrap();
        assert_eq!(settings.quote_service.credentials, Credentials::new("alice", "pw"));
        assert_eq!(settings.cache.db_path(), PathBuf::from("/tmp/q/backtest_data.db"));
        let options = settings.reconciler_options();
        assert!(!options.persist);
        assert_eq!(options.retry.max_attempts, 5);
        assert_eq!(options.retry.backoff, Duration::ZERO);
    }

    #[test]
    fn rejects_non_positive_values() {
        let config = MapConfig::new(&[("retry", "max_attempts", "0")]);
        match Settings::from_config(&config) {
            Err(FutquantError::ConfigInvalid { section, key, .. }) => {
                assert_eq!(section, "retry");
                assert_eq!(key, "max_attempts");
            }
            other => panic!("expected ConfigInvalid, got {other:?}"),
        }
        let config = MapConfig::new(&[("quote_service", "timeout_secs", "-1")]);
        assert!(Settings::from_config(&config).is_err());
    }

    #[test]
    fn rejects_unparseable_numbers() {
        for (section, key) in [
            ("retry", "max_attempts"),
            ("retry", "backoff_secs"),
            ("cache", "pool_size"),
            ("calendar", "refresh_days"),
        ] {
            let config = MapConfig::new(&[(section, key, "three")]);
            match Settings::from_config(&config) {
                Err(FutquantError::ConfigInvalid { section: s, key: k, .. }) => {
                    assert_eq!((s.as_str(), k.as_str()), (section, key));
                }
                other => panic!("expected ConfigInvalid for [{section}] {key}, got {other:?}"),
            }
        }
    }

    #[test]
    fn rejects_unparseable_flags() {
        let config = MapConfig::new(&[("cache", "persist", "maybe")]);
        match Settings::from_config(&config) {
            Err(FutquantError::ConfigInvalid { section, key, .. }) => {
                assert_eq!(section, "cache");
                assert_eq!(key, "persist");
            }
            other => panic!("expected ConfigInvalid, got {other:?}"),
        }
        let config = MapConfig::new(&[("cache", "persist", "No")]);
        assert!(!Settings::from_config(&config).unwrap().cache.persist);
    }
}
