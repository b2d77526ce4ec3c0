use crate::error::MonthParseError;
use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime};
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Token contract address (or any stable asset identifier).
pub type AssetId = String;

// ── Month window ──────────────────────────────────────────────────────────────

/// A calendar month, stored as its first day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey(NaiveDate);

impl MonthKey {
    pub fn from_date(day: NaiveDate) -> Self {
        Self(day - Duration::days(i64::from(day.day0())))
    }

    pub fn first_day(&self) -> NaiveDate {
        self.0
    }

    /// First day of the following month (saturates at the calendar's end).
    pub fn next(&self) -> MonthKey {
        Self(self.0.checked_add_months(Months::new(1)).unwrap_or(NaiveDate::MAX))
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        Self::from_date(day) == *self
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.0.year(), self.0.month())
    }
}

impl FromStr for MonthKey {
    type Err = MonthParseError;

    /// "2024-03" or "2024-03-17" (truncated to the month).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .or_else(|_| NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d"))
            .map(Self::from_date)
            .map_err(|_| MonthParseError(s.to_string()))
    }
}

impl Serialize for MonthKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Inclusive range of months to (re)build; open ends mean "no bound".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonthRange {
    pub from: Option<MonthKey>,
    pub to: Option<MonthKey>,
}

impl MonthRange {
    pub fn new(from: Option<MonthKey>, to: Option<MonthKey>) -> Self {
        Self { from, to }
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn single(month: MonthKey) -> Self {
        Self::new(Some(month), Some(month))
    }

    pub fn contains(&self, month: MonthKey) -> bool {
        self.from.is_none_or(|f| month >= f) && self.to.is_none_or(|t| month <= t)
    }

    /// Half-open day bounds `[lo, hi)` matching the range.
    pub fn date_bounds(&self) -> (Option<NaiveDate>, Option<NaiveDate>) {
        (
            self.from.map(|m| m.first_day()),
            self.to.map(|m| m.next().first_day()),
        )
    }
}

// ── Raw OHLC ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct OhlcRow {
    pub asset: AssetId,
    pub ts: NaiveDateTime,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: f64,
}

/// CSV row before parsing. Columns are resolved by header name.
#[derive(Debug, Clone, Default)]
pub struct RawOhlcRow {
    pub asset: Option<String>,
    pub ts: Option<String>,
    pub open: Option<String>,
    pub high: Option<String>,
    pub low: Option<String>,
    pub close: Option<String>,
}

// ── Derived tables ────────────────────────────────────────────────────────────

/// One row of `ohlc_daily`. `log_return` is None on an asset's first day or
/// when the previous close was not positive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyReturn {
    pub asset: AssetId,
    pub day: NaiveDate,
    pub close: f64,
    pub log_return: Option<f64>,
}

/// One unordered pair per month, `asset_i < asset_j` under the configured order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationEdge {
    pub month: MonthKey,
    pub asset_i: AssetId,
    pub asset_j: AssetId,
    pub corr: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkMetrics {
    pub month: MonthKey,
    pub n_assets: usize,
    pub n_edges: usize,
    pub density: f64,
    pub avg_degree: f64,
    pub max_degree: usize,
    pub avg_clustering: f64,
    pub lcc_size: usize,
}

impl NetworkMetrics {
    /// Record emitted for a month without any active asset.
    pub fn empty(month: MonthKey) -> Self {
        Self {
            month,
            n_assets: 0,
            n_edges: 0,
            density: 0.0,
            avg_degree: 0.0,
            max_degree: 0,
            avg_clustering: 0.0,
            lcc_size: 0,
        }
    }
}
