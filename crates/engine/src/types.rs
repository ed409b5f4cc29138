//! Types for the RSI backtesting engine

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::indicators::RsiSmoothing;

/// A single price bar (OHLCV plus adjusted close)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Split/dividend adjusted close, when the provider supplies one
    pub adjusted_close: Option<f64>,
    pub volume: u64,
}

impl Bar {
    /// Bar with every price field set to `close`. Used where only closes are known.
    pub fn from_close(timestamp: NaiveDateTime, close: f64) -> Self {
        Self {
            timestamp,
            open: close,
            high: close,
            low: close,
            close,
            adjusted_close: None,
            volume: 0,
        }
    }
}

/// RSI value for one bar. `None` while the lookback window is still filling.
pub type RsiValue = Option<f64>;

/// A bar annotated with its RSI value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsiPoint {
    pub timestamp: NaiveDateTime,
    pub close: f64,
    pub rsi: RsiValue,
}

/// Simulator position state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Position {
    #[default]
    Flat,
    Long,
}

/// One buy/sell round trip. Open while `exit_price` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry_time: NaiveDateTime,
    pub entry_price: f64,
    pub exit_time: Option<NaiveDateTime>,
    pub exit_price: Option<f64>,
}

impl Trade {
    pub fn open(entry_time: NaiveDateTime, entry_price: f64) -> Self {
        Self {
            entry_time,
            entry_price,
            exit_time: None,
            exit_price: None,
        }
    }

    pub fn close(&mut self, exit_time: NaiveDateTime, exit_price: f64) {
        self.exit_time = Some(exit_time);
        self.exit_price = Some(exit_price);
    }

    pub fn is_open(&self) -> bool {
        self.exit_price.is_none()
    }

    /// Percentage return of a closed trade
    pub fn return_pct(&self) -> Option<f64> {
        self.exit_price
            .map(|exit| (exit - self.entry_price) / self.entry_price * 100.0)
    }

    pub fn is_winner(&self) -> bool {
        self.exit_price.is_some_and(|exit| exit > self.entry_price)
    }
}

/// Strategy parameters for a single backtest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyParams {
    /// RSI lookback window (default: 14)
    pub window: usize,
    /// Go long when RSI drops below this level (default: 30)
    pub entry_threshold: f64,
    /// Exit when RSI rises above this level (default: 70)
    pub exit_threshold: f64,
    #[serde(default)]
    pub smoothing: RsiSmoothing,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            window: 14,
            entry_threshold: 30.0,
            exit_threshold: 70.0,
            smoothing: RsiSmoothing::Simple,
        }
    }
}

/// Output of the strategy simulator. Every series is index-aligned to the input bars.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyResult {
    /// RSI per bar; the first bar never has one
    pub rsi: Vec<RsiValue>,
    pub strategy_returns: Vec<f64>,
    pub cumulative_strategy_returns: Vec<f64>,
    pub cumulative_buy_hold_returns: Vec<f64>,
    pub trades: Vec<Trade>,
}

impl StrategyResult {
    /// Final compounded strategy return, 0 for an empty series
    pub fn final_strategy_return(&self) -> f64 {
        self.cumulative_strategy_returns
            .last()
            .copied()
            .unwrap_or(0.0)
    }

    pub fn final_buy_hold_return(&self) -> f64 {
        self.cumulative_buy_hold_returns
            .last()
            .copied()
            .unwrap_or(0.0)
    }

    /// Zip the per-bar RSI series back onto the bars it was computed from
    pub fn rsi_points(&self, bars: &[Bar]) -> Vec<RsiPoint> {
        bars.iter()
            .zip(self.rsi.iter())
            .map(|(bar, rsi)| RsiPoint {
                timestamp: bar.timestamp,
                close: bar.close,
                rsi: *rsi,
            })
            .collect()
    }
}

/// Aggregate trade statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_trades: u32,
    pub winning_trades: u32,
    /// Percentage of winning trades, 2 decimal places
    pub win_probability: Decimal,
    /// Sum of per-trade percentage returns, 2 decimal places
    pub total_return: Decimal,
}

/// Curve-level metrics derived from a `StrategyResult`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub final_strategy_return: f64,
    pub final_buy_hold_return: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: Decimal,
}

/// Full output of `BacktestEngine::run`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub params: StrategyParams,
    pub result: StrategyResult,
    pub statistics: Statistics,
    pub summary: PerformanceSummary,
}

/// Best parameter combination found by the grid search.
///
/// When nothing could be evaluated every parameter is `None` and
/// `best_return` is negative infinity; check `is_found` before use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub window: Option<usize>,
    pub entry_threshold: Option<f64>,
    pub exit_threshold: Option<f64>,
    /// Fractional cumulative return, not a percentage
    pub best_return: f64,
}

impl OptimizationResult {
    pub fn not_found() -> Self {
        Self {
            window: None,
            entry_threshold: None,
            exit_threshold: None,
            best_return: f64::NEG_INFINITY,
        }
    }

    pub fn is_found(&self) -> bool {
        self.window.is_some()
    }

    /// Parameters of the winning combination, if any
    pub fn params(&self) -> Option<StrategyParams> {
        Some(StrategyParams {
            window: self.window?,
            entry_threshold: self.entry_threshold?,
            exit_threshold: self.exit_threshold?,
            smoothing: RsiSmoothing::Simple,
        })
    }
}

impl Default for OptimizationResult {
    fn default() -> Self {
        Self::not_found()
    }
}
