//! Alpha Vantage market data client

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{sort_and_filter, FetchRequest, Interval, PriceSource};
use crate::error::EngineError;
use crate::types::Bar;

const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co";
const API_KEY_VAR: &str = "ALPHA_VANTAGE_API_KEY";
const BASE_URL_VAR: &str = "ALPHA_VANTAGE_BASE_URL";

/// Alpha Vantage time-series and quote client
#[derive(Clone)]
pub struct AlphaVantageClient {
    client: Client,
    base_url: String,
    api_key: String,
}

/// Latest traded price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
}

#[derive(Debug, Deserialize)]
struct GlobalQuote {
    #[serde(rename = "01. symbol")]
    symbol: String,
    #[serde(rename = "05. price")]
    price: String,
}

impl AlphaVantageClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
        })
    }

    /// Build from `ALPHA_VANTAGE_API_KEY` and the optional `ALPHA_VANTAGE_BASE_URL`
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(API_KEY_VAR)
            .with_context(|| format!("{} is not set", API_KEY_VAR))?;
        let client = Self::new(api_key)?;
        Ok(match std::env::var(BASE_URL_VAR) {
            Ok(url) => client.with_base_url(url),
            Err(_) => client,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn query(&self, params: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}/query", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(params)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Provider(format!("Alpha Vantage error {}: {}", status, body)).into());
        }

        Ok(response.json().await?)
    }

    /// Fetch the full daily-adjusted or intraday series for a symbol
    pub async fn get_time_series(&self, symbol: &str, interval: Interval) -> Result<Vec<Bar>> {
        let mut params = vec![
            ("function", function_name(interval).to_string()),
            ("symbol", symbol.to_uppercase()),
            ("outputsize", "full".to_string()),
        ];
        if let Interval::Minutes(m) = interval {
            params.push(("interval", format!("{}min", m)));
        }

        debug!(symbol, interval = %interval, "Fetching time series from Alpha Vantage");

        let body = self.query(&params).await?;
        let bars = parse_time_series(&body, interval)?;

        debug!(count = bars.len(), "Fetched bars");
        Ok(bars)
    }

    /// Get the latest price for a symbol
    pub async fn get_quote(&self, symbol: &str) -> Result<Quote> {
        let params = [
            ("function", "GLOBAL_QUOTE".to_string()),
            ("symbol", symbol.to_uppercase()),
        ];
        let body = self.query(&params).await?;
        parse_quote(&body, symbol)
    }
}

#[async_trait]
impl PriceSource for AlphaVantageClient {
    async fn fetch_bars(&self, request: &FetchRequest) -> Result<Vec<Bar>> {
        let bars = self.get_time_series(&request.symbol, request.interval).await?;
        let bars = sort_and_filter(bars, request.start_date, request.end_date);

        if bars.is_empty() {
            return Err(EngineError::NoData {
                symbol: request.symbol.clone(),
            }
            .into());
        }

        info!(symbol = %request.symbol, bars = bars.len(), "Price series ready");
        Ok(bars)
    }
}

fn function_name(interval: Interval) -> &'static str {
    match interval {
        Interval::Daily => "TIME_SERIES_DAILY_ADJUSTED",
        Interval::Minutes(_) => "TIME_SERIES_INTRADAY",
    }
}

fn series_key(interval: Interval) -> String {
    match interval {
        Interval::Daily => "Time Series (Daily)".to_string(),
        Interval::Minutes(m) => format!("Time Series ({}min)", m),
    }
}

/// Message Alpha Vantage sends instead of data (bad symbol, rate limit, ...)
fn provider_message(body: &Value) -> Option<&str> {
    ["Error Message", "Note", "Information"]
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_str))
}

/// Turn a time-series response into bars sorted ascending.
///
/// Rows with unparseable fields are skipped.
pub fn parse_time_series(body: &Value, interval: Interval) -> Result<Vec<Bar>> {
    let key = series_key(interval);
    let Some(series) = body.get(&key).and_then(Value::as_object) else {
        let message = provider_message(body)
            .unwrap_or("Invalid data fetched. Please check your inputs.");
        return Err(EngineError::Provider(message.to_string()).into());
    };

    let mut skipped = 0usize;
    let mut bars: Vec<Bar> = series
        .iter()
        .filter_map(|(stamp, row)| {
            let bar = parse_row(stamp, row);
            if bar.is_none() {
                skipped += 1;
            }
            bar
        })
        .collect();

    if skipped > 0 {
        warn!(skipped, "Skipped malformed rows in time series");
    }

    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}

fn parse_row(stamp: &str, row: &Value) -> Option<Bar> {
    let field = |name: &str| -> Option<f64> { row.get(name)?.as_str()?.parse().ok() };

    let timestamp = parse_timestamp(stamp)?;
    let close = field("4. close")?;
    if !close.is_finite() || close <= 0.0 {
        return None;
    }

    // Daily-adjusted rows carry volume at 6, intraday rows at 5
    let volume = row
        .get("6. volume")
        .or_else(|| row.get("5. volume"))
        .and_then(Value::as_str)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    Some(Bar {
        timestamp,
        open: field("1. open")?,
        high: field("2. high")?,
        low: field("3. low")?,
        close,
        adjusted_close: field("5. adjusted close"),
        volume,
    })
}

fn parse_timestamp(stamp: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(stamp, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(stamp, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn parse_quote(body: &Value, symbol: &str) -> Result<Quote> {
    let quote: Option<GlobalQuote> = body
        .get("Global Quote")
        .and_then(|q| serde_json::from_value(q.clone()).ok());

    let Some(quote) = quote else {
        if let Some(message) = provider_message(body) {
            return Err(EngineError::Provider(message.to_string()).into());
        }
        return Err(EngineError::NoData {
            symbol: symbol.to_uppercase(),
        }
        .into());
    };

    let price: f64 = quote
        .price
        .parse()
        .with_context(|| format!("Invalid price '{}' for {}", quote.price, quote.symbol))?;

    Ok(Quote {
        symbol: quote.symbol,
        price,
    })
}
