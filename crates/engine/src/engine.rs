//! Bar-by-bar RSI mean-reversion simulator

use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::indicators::calculate_rsi_with;
use crate::types::*;

/// Long-only simulator driven by RSI entry/exit thresholds
pub struct BacktestEngine;

impl BacktestEngine {
    /// Compute RSI for `params.window`, simulate, and reduce the ledger.
    pub fn run(bars: &[Bar], params: &StrategyParams) -> EngineResult<BacktestReport> {
        let rsi = calculate_rsi_with(bars, params.window, params.smoothing)?;
        let result = Self::simulate(bars, &rsi, params.entry_threshold, params.exit_threshold)?;
        let statistics = Statistics::from_trades(&result.trades);
        let summary = PerformanceSummary::from_result(&result);

        debug!(
            window = params.window,
            entry = params.entry_threshold,
            exit = params.exit_threshold,
            trades = statistics.total_trades,
            win_probability = %statistics.win_probability,
            total_return = %statistics.total_return,
            "Backtest complete"
        );

        Ok(BacktestReport {
            params: params.clone(),
            result,
            statistics,
            summary,
        })
    }

    /// Walk the bars applying the entry/exit rule.
    ///
    /// `rsi` is the output of `calculate_rsi` for these bars: one value per
    /// delta, entry `j` belonging to bar `j + 1`. The position held going into
    /// a bar earns that bar's return; a signal on a bar fills at its close.
    pub fn simulate(
        bars: &[Bar],
        rsi: &[RsiValue],
        entry_threshold: f64,
        exit_threshold: f64,
    ) -> EngineResult<StrategyResult> {
        validate_threshold("entry", entry_threshold)?;
        validate_threshold("exit", exit_threshold)?;

        let expected = bars.len().saturating_sub(1);
        if rsi.len() != expected {
            return Err(EngineError::InvalidInput(format!(
                "RSI series has {} values, expected {} for {} bars",
                rsi.len(),
                expected,
                bars.len()
            )));
        }

        let n = bars.len();
        let mut position = Position::Flat;
        let mut trades: Vec<Trade> = Vec::new();

        let mut per_bar_rsi: Vec<RsiValue> = Vec::with_capacity(n);
        let mut strategy_returns = Vec::with_capacity(n);
        let mut cumulative_strategy_returns = Vec::with_capacity(n);
        let mut cumulative_buy_hold_returns = Vec::with_capacity(n);

        let mut cumulative_strategy = 0.0;
        let mut cumulative_buy_hold = 0.0;

        for (i, bar) in bars.iter().enumerate() {
            let daily_return = if i == 0 {
                0.0
            } else {
                let prev = bars[i - 1].close;
                (bar.close - prev) / prev
            };

            let strategy_return = match position {
                Position::Long => daily_return,
                Position::Flat => 0.0,
            };

            cumulative_strategy = (1.0 + cumulative_strategy) * (1.0 + strategy_return) - 1.0;
            cumulative_buy_hold = (1.0 + cumulative_buy_hold) * (1.0 + daily_return) - 1.0;

            strategy_returns.push(strategy_return);
            cumulative_strategy_returns.push(cumulative_strategy);
            cumulative_buy_hold_returns.push(cumulative_buy_hold);

            let bar_rsi = if i == 0 { None } else { rsi[i - 1] };
            per_bar_rsi.push(bar_rsi);

            let Some(value) = bar_rsi else {
                continue;
            };

            match position {
                Position::Flat if value < entry_threshold => {
                    position = Position::Long;
                    trades.push(Trade::open(bar.timestamp, bar.close));
                    debug!(price = bar.close, rsi = value, time = %bar.timestamp, "Opened LONG position");
                }
                Position::Long if value > exit_threshold => {
                    position = Position::Flat;
                    if let Some(trade) = trades.last_mut() {
                        trade.close(bar.timestamp, bar.close);
                        debug!(
                            entry = trade.entry_price,
                            exit = bar.close,
                            rsi = value,
                            "Closed position"
                        );
                    }
                }
                _ => {}
            }
        }

        // Close any remaining open position at last bar
        if position == Position::Long {
            if let (Some(trade), Some(last)) = (trades.last_mut(), bars.last()) {
                trade.close(last.timestamp, last.close);
                debug!(entry = trade.entry_price, exit = last.close, "Force-closed position at series end");
            }
        }

        Ok(StrategyResult {
            rsi: per_bar_rsi,
            strategy_returns,
            cumulative_strategy_returns,
            cumulative_buy_hold_returns,
            trades,
        })
    }
}

fn validate_threshold(name: &str, value: f64) -> EngineResult<()> {
    if value.is_finite() && (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(EngineError::InvalidInput(format!(
            "{} threshold {} must lie in [0, 100]",
            name, value
        )))
    }
}
