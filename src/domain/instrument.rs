//! Instrument identity: symbol, bar period and price adjustment.

use std::fmt;
use std::str::FromStr;

use super::error::FutquantError;

/// Suffixes the quote service uses for continuous (rolled) contracts.
pub const CONTINUOUS_SUFFIXES: [&str; 3] = ["888", "777", "000"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Period {
    Minute(u32),
    Hour(u32),
    Day,
    Week,
    Month,
    Tick,
}

impl Period {
    /// Wire code understood by the quote service.
    pub fn code(&self) -> String {
        match self {
            Period::Minute(n) => format!("{n}M"),
            Period::Hour(n) => format!("{n}H"),
            Period::Day => "1D".to_string(),
            Period::Week => "1W".to_string(),
            Period::Month => "1Y".to_string(),
            Period::Tick => "tick".to_string(),
        }
    }

    /// Bar length for intraday periods; `None` for daily and longer.
    pub fn intraday_length(&self) -> Option<chrono::Duration> {
        match self {
            Period::Minute(n) => Some(chrono::Duration::minutes(i64::from(*n))),
            Period::Hour(n) => Some(chrono::Duration::hours(i64::from(*n))),
            _ => None,
        }
    }

    pub fn is_tick(&self) -> bool {
        matches!(self, Period::Tick)
    }
}

impl FromStr for Period {
    type Err = FutquantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FutquantError::InvalidPeriod {
            value: s.to_string(),
        };
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("tick") {
            return Ok(Period::Tick);
        }
        if trimmed.eq_ignore_ascii_case("d") {
            return Ok(Period::Day);
        }
        let unit = trimmed.chars().last().ok_or_else(invalid)?;
        let count_str = &trimmed[..trimmed.len() - unit.len_utf8()];
        let count: u32 = if count_str.is_empty() {
            1
        } else {
            count_str.parse().map_err(|_| invalid())?
        };
        if count == 0 {
            return Err(invalid());
        }
        match unit {
            'M' | 'm' => Ok(Period::Minute(count)),
            'H' | 'h' => Ok(Period::Hour(count)),
            'D' | 'd' if count == 1 => Ok(Period::Day),
            'W' | 'w' if count == 1 => Ok(Period::Week),
            'Y' | 'y' if count == 1 => Ok(Period::Month),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

/// Price adjustment of a continuous-contract series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Adjustment {
    #[default]
    Raw,
    /// Back-adjusted across contract rollovers ("hfq").
    BackAdjusted,
}

impl Adjustment {
    pub fn code(&self) -> &'static str {
        match self {
            Adjustment::Raw => "0",
            Adjustment::BackAdjusted => "1",
        }
    }

    pub fn table_suffix(&self) -> &'static str {
        match self {
            Adjustment::Raw => "raw",
            Adjustment::BackAdjusted => "hfq",
        }
    }
}

impl FromStr for Adjustment {
    type Err = FutquantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "0" | "raw" => Ok(Adjustment::Raw),
            "1" | "hfq" => Ok(Adjustment::BackAdjusted),
            _ => Err(FutquantError::InvalidAdjustment {
                value: s.to_string(),
            }),
        }
    }
}

/// Identity of one stored series. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstrumentKey {
    symbol: String,
    period: Period,
    adjustment: Adjustment,
}

impl InstrumentKey {
    pub fn new(symbol: impl Into<String>, period: Period, adjustment: Adjustment) -> Self {
        Self {
            symbol: symbol.into(),
            period,
            adjustment,
        }
    }

    pub fn tick(symbol: impl Into<String>) -> Self {
        Self::new(symbol, Period::Tick, Adjustment::Raw)
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn period(&self) -> Period {
        self.period
    }

    pub fn adjustment(&self) -> Adjustment {
        self.adjustment
    }

    /// Table holding this series: `{symbol}_{period}_{hfq|raw}`, or
    /// `{symbol}_tick` since ticks carry no adjustment.
    pub fn table_name(&self) -> String {
        if self.period.is_tick() {
            format!("{}_tick", self.symbol)
        } else {
            format!(
                "{}_{}_{}",
                self.symbol,
                self.period.code(),
                self.adjustment.table_suffix()
            )
        }
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table_name())
    }
}

/// Leading alphabetic product code, lowercased: `rb2601` -> `rb`.
pub fn product_code(symbol: &str) -> String {
    let code: String = symbol
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    if code.is_empty() {
        symbol.to_lowercase()
    } else {
        code.to_lowercase()
    }
}

pub fn is_continuous(symbol: &str) -> bool {
    CONTINUOUS_SUFFIXES.iter().any(|s| symbol.ends_with(s))
}

/// Main continuous symbol for a dated contract: `IF2503` -> `if888`.
pub fn continuous_symbol(symbol: &str) -> String {
    if is_continuous(symbol) {
        symbol.to_lowercase()
    } else {
        format!("{}888", product_code(symbol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_periods() {
        assert_eq!("1M".parse::<Period>().unwrap(), Period::Minute(1));
        assert_eq!("15m".parse::<Period>().unwrap(), Period::Minute(15));
        assert_eq!("1H".parse::<Period>().unwrap(), Period::Hour(1));
        assert_eq!("1h".parse::<Period>().unwrap(), Period::Hour(1));
        assert_eq!("D".parse::<Period>().unwrap(), Period::Day);
        assert_eq!("1D".parse::<Period>().unwrap(), Period::Day);
        assert_eq!("1W".parse::<Period>().unwrap(), Period::Week);
        assert_eq!("1Y".parse::<Period>().unwrap(), Period::Month);
        assert_eq!("TICK".parse::<Period>().unwrap(), Period::Tick);
    }

    #[test]
    fn rejects_unknown_periods() {
        for bad in ["", "0M", "3D", "7X", "M5", "abc"] {
            match bad.parse::<Period>() {
                Err(FutquantError::InvalidPeriod { value }) => assert_eq!(value, bad),
                other => panic!("expected InvalidPeriod for {bad:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn period_code_roundtrips() {
        for p in [Period::Minute(5), Period::Hour(1), Period::Day, Period::Week, Period::Month] {
            assert_eq!(p.code().parse::<Period>().unwrap(), p);
        }
    }

    #[test]
    fn adjustment_parsing() {
        assert_eq!("0".parse::<Adjustment>().unwrap(), Adjustment::Raw);
        assert_eq!("HFQ".parse::<Adjustment>().unwrap(), Adjustment::BackAdjusted);
        assert!("2".parse::<Adjustment>().is_err());
    }

    #[test]
    fn table_names() {
        let key = InstrumentKey::new("rb888", Period::Day, Adjustment::BackAdjusted);
        assert_eq!(key.table_name(), "rb888_1D_hfq");
        let key = InstrumentKey::new("au888", Period::Minute(5), Adjustment::Raw);
        assert_eq!(key.table_name(), "au888_5M_raw");
        assert_eq!(InstrumentKey::tick("rb2601").table_name(), "rb2601_tick");
    }

    #[test]
    fn contract_mapping() {
        assert_eq!(product_code("rb2601"), "rb");
        assert_eq!(product_code("IF2503"), "if");
        assert!(is_continuous("rb888"));
        assert!(is_continuous("au000"));
        assert!(!is_continuous("rb2601"));
        assert_eq!(continuous_symbol("IF2503"), "if888");
        assert_eq!(continuous_symbol("rb777"), "rb777");
    }
}
