//! Price data sources

pub mod alphavantage;

pub use alphavantage::{AlphaVantageClient, Quote};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::EngineError;
use crate::types::Bar;

/// Bar interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    #[default]
    Daily,
    /// Intraday bars of the given number of minutes
    Minutes(u32),
}

const INTRADAY_MINUTES: [u32; 5] = [1, 5, 15, 30, 60];

impl FromStr for Interval {
    type Err = EngineError;

    /// Accepts `1d`/`daily` and minute intervals like `5m`, `15min`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if matches!(s.as_str(), "1d" | "d" | "daily" | "1day") {
            return Ok(Interval::Daily);
        }

        let digits = s
            .strip_suffix("min")
            .or_else(|| s.strip_suffix('m'))
            .ok_or_else(|| EngineError::InvalidInput(format!("unsupported interval '{}'", s)))?;
        let minutes: u32 = digits
            .parse()
            .map_err(|_| EngineError::InvalidInput(format!("unsupported interval '{}'", s)))?;

        if INTRADAY_MINUTES.contains(&minutes) {
            Ok(Interval::Minutes(minutes))
        } else {
            Err(EngineError::InvalidInput(format!(
                "intraday interval must be one of {:?} minutes, got {}",
                INTRADAY_MINUTES, minutes
            )))
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interval::Daily => write!(f, "1d"),
            Interval::Minutes(m) => write!(f, "{}min", m),
        }
    }
}

/// What to fetch. Dates are calendar dates, both ends inclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchRequest {
    pub symbol: String,
    #[serde(default)]
    pub interval: Interval,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl FetchRequest {
    pub fn daily(symbol: &str, start_date: Option<NaiveDate>, end_date: Option<NaiveDate>) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            interval: Interval::Daily,
            start_date,
            end_date,
        }
    }
}

/// Supplies bars sorted ascending by timestamp
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_bars(&self, request: &FetchRequest) -> Result<Vec<Bar>>;
}

/// Sort ascending and keep bars whose date lies in `[start, end]`.
pub fn sort_and_filter(
    mut bars: Vec<Bar>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Vec<Bar> {
    bars.sort_by_key(|b| b.timestamp);
    bars.retain(|b| {
        let date = b.timestamp.date();
        start.map_or(true, |s| date >= s) && end.map_or(true, |e| date <= e)
    });
    bars
}

/// Bars loaded up front, e.g. from a JSON export
pub struct InMemorySource {
    bars: Vec<Bar>,
}

impl InMemorySource {
    pub fn new(bars: Vec<Bar>) -> Self {
        Self { bars }
    }

    /// Read a JSON array of bars
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let bars: Vec<Bar> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse bars from {}", path.display()))?;
        Ok(Self::new(bars))
    }
}

#[async_trait]
impl PriceSource for InMemorySource {
    async fn fetch_bars(&self, request: &FetchRequest) -> Result<Vec<Bar>> {
        let bars = sort_and_filter(self.bars.clone(), request.start_date, request.end_date);
        if bars.is_empty() {
            return Err(EngineError::NoData {
                symbol: request.symbol.clone(),
            }
            .into());
        }
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn bar(date: &str, close: f64) -> Bar {
        let ts = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        Bar::from_close(ts, close)
    }

    #[test]
    fn test_interval_parsing() {
        assert_eq!("1d".parse::<Interval>().unwrap(), Interval::Daily);
        assert_eq!("daily".parse::<Interval>().unwrap(), Interval::Daily);
        assert_eq!("5m".parse::<Interval>().unwrap(), Interval::Minutes(5));
        assert_eq!("15min".parse::<Interval>().unwrap(), Interval::Minutes(15));
        assert!("7m".parse::<Interval>().is_err());
        assert!("1w".parse::<Interval>().is_err());
        assert_eq!(Interval::Minutes(30).to_string(), "30min");
    }

    #[test]
    fn test_sort_and_filter_is_inclusive() {
        let bars = vec![
            bar("2024-01-05", 5.0),
            bar("2024-01-02", 2.0),
            bar("2024-01-04", 4.0),
            bar("2024-01-03", 3.0),
        ];
        let start = NaiveDate::from_ymd_opt(2024, 1, 3);
        let end = NaiveDate::from_ymd_opt(2024, 1, 4);
        let out = sort_and_filter(bars, start, end);

        let closes: Vec<f64> = out.iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![3.0, 4.0]);
    }

    #[test]
    fn test_intraday_bars_match_by_date() {
        let ts = NaiveDateTime::parse_from_str("2024-01-04 15:30:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let out = sort_and_filter(
            vec![Bar::from_close(ts, 1.0)],
            NaiveDate::from_ymd_opt(2024, 1, 4),
            NaiveDate::from_ymd_opt(2024, 1, 4),
        );
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_source() {
        let source = InMemorySource::new(vec![bar("2024-02-02", 2.0), bar("2024-02-01", 1.0)]);
        let request = FetchRequest::daily("spy", None, None);
        assert_eq!(request.symbol, "SPY");

        let bars = source.fetch_bars(&request).await.unwrap();
        assert_eq!(bars[0].close, 1.0);
        assert_eq!(bars[1].close, 2.0);

        let empty = FetchRequest::daily("SPY", NaiveDate::from_ymd_opt(2025, 1, 1), None);
        let err = source.fetch_bars(&empty).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::NoData { .. })
        ));
    }
}
