//! Trading-calendar source and cache ports.

use chrono::NaiveDate;

use crate::domain::calendar::CachedCalendar;
use crate::domain::error::FutquantError;

/// Authoritative list of exchange trading days.
pub trait CalendarSource {
    fn trading_days(&self) -> Result<Vec<NaiveDate>, FutquantError>;
}

/// Persisted copy of the last successfully loaded calendar.
pub trait CalendarCache {
    fn load(&self) -> Result<Option<CachedCalendar>, FutquantError>;
    fn save(&self, calendar: &CachedCalendar) -> Result<(), FutquantError>;
}
