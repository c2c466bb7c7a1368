//! JSON file cache for the trading calendar.

use std::fs;
use std::path::PathBuf;

use crate::domain::calendar::CachedCalendar;
use crate::domain::error::FutquantError;
use crate::ports::calendar_port::CalendarCache;

pub struct JsonCalendarCache {
    path: PathBuf,
}

impl JsonCalendarCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn data_err(&self, reason: String) -> FutquantError {
        FutquantError::DataFile {
            path: self.path.display().to_string(),
            reason,
        }
    }
}

impl CalendarCache for JsonCalendarCache {
    fn load(&self) -> Result<Option<CachedCalendar>, FutquantError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path)?;
        let cached: CachedCalendar =
            serde_json::from_str(&content).map_err(|e| self.data_err(e.to_string()))?;
        Ok(Some(cached))
    }

    /// Writes through a temporary file and renames it into place.
    fn save(&self, calendar: &CachedCalendar) -> Result<(), FutquantError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let json =
            serde_json::to_string_pretty(calendar).map_err(|e| self.data_err(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_as_none() {
        let dir = TempDir::new().unwrap();
        let cache = JsonCalendarCache::new(dir.path().join("calendar.json"));
        assert!(cache.load().unwrap().is_none());
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let cache = JsonCalendarCache::new(dir.path().join("sub").join("calendar.json"));
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let calendar = CachedCalendar {
            trading_days: vec![day],
            last_update: day.and_hms_opt(18, 0, 0).unwrap(),
        };
        cache.save(&calendar).unwrap();
        assert_eq!(cache.load().unwrap(), Some(calendar));
    }

    #[test]
    fn garbage_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calendar.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            JsonCalendarCache::new(path).load(),
            Err(FutquantError::DataFile { .. })
        ));
    }
}
