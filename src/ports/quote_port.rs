//! Remote quote service port.

use std::fmt;

use chrono::NaiveDate;

use crate::domain::bar::Bar;
use crate::domain::error::RemoteError;
use crate::domain::instrument::{Adjustment, Period};

/// Account used to authenticate against the quote service.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// One bar request for an inclusive calendar-date range.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRequest {
    pub symbol: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub period: Period,
    pub adjustment: Adjustment,
    pub credentials: Credentials,
}

pub trait QuoteService: Send + Sync {
    /// Bars for the request, stamped in exchange-local time at bar open.
    /// Rows outside `[start, end]` may be returned and are filtered by the caller.
    fn request(&self, request: &QuoteRequest) -> Result<Vec<Bar>, RemoteError>;
}
