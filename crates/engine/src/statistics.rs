//! Trade-ledger statistics and curve metrics

use rust_decimal::{Decimal, RoundingStrategy};

use crate::types::{PerformanceSummary, Statistics, StrategyResult, Trade};

impl Statistics {
    /// Reduce a trade ledger. Never fails; an empty ledger is all zeros.
    ///
    /// Open trades count towards `total_trades` but add nothing to
    /// `total_return`. Both percentages are rounded only at the end.
    pub fn from_trades(trades: &[Trade]) -> Self {
        let total_trades = trades.len() as u32;
        let winning_trades = trades.iter().filter(|t| t.is_winner()).count() as u32;

        let win_probability = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64 * 100.0
        } else {
            0.0
        };

        let total_return: f64 = trades.iter().filter_map(Trade::return_pct).sum();

        Self {
            total_trades,
            winning_trades,
            win_probability: round_2dp(win_probability),
            total_return: round_2dp(total_return),
        }
    }

    pub fn losing_trades(&self) -> u32 {
        self.total_trades - self.winning_trades
    }
}

impl PerformanceSummary {
    pub fn from_result(result: &StrategyResult) -> Self {
        Self {
            final_strategy_return: result.final_strategy_return(),
            final_buy_hold_return: result.final_buy_hold_return(),
            max_drawdown_pct: max_drawdown_pct(&result.cumulative_strategy_returns),
            sharpe_ratio: calculate_sharpe(&result.trades),
        }
    }
}

/// Round half away from zero to two places, keeping the trailing zeros.
///
/// Rounds the exact binary value of `value`, so `1.005` (stored just below
/// the midpoint) becomes `1.00`.
fn round_2dp(value: f64) -> Decimal {
    let mut d = Decimal::from_f64_retain(value)
        .unwrap_or_default()
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    d.rescale(2);
    d
}

/// Largest peak-to-trough fall of the compounded equity curve, in percent
fn max_drawdown_pct(cumulative_returns: &[f64]) -> f64 {
    let mut peak = 1.0_f64;
    let mut max_dd = 0.0_f64;

    for &c in cumulative_returns {
        let equity = 1.0 + c;
        if equity > peak {
            peak = equity;
        }
        if peak > 0.0 {
            let dd = (peak - equity) / peak * 100.0;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }

    max_dd
}

/// Mean over sample standard deviation of per-trade percentage returns
fn calculate_sharpe(trades: &[Trade]) -> Decimal {
    let returns: Vec<f64> = trades.iter().filter_map(Trade::return_pct).collect();
    if returns.len() < 2 {
        return Decimal::ZERO;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();

    if std_dev < 1e-10 {
        return Decimal::ZERO;
    }

    round_2dp(mean / std_dev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use rust_decimal_macros::dec;

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn closed(entry: f64, exit: f64) -> Trade {
        let mut t = Trade::open(ts(1), entry);
        t.close(ts(2), exit);
        t
    }

    #[test]
    fn test_empty_ledger() {
        let stats = Statistics::from_trades(&[]);
        assert_eq!(stats.total_trades, 0);
        assert_eq!(stats.winning_trades, 0);
        assert_eq!(stats.win_probability, Decimal::ZERO);
        assert_eq!(stats.total_return, Decimal::ZERO);
    }

    #[test]
    fn test_mixed_ledger() {
        let trades = vec![closed(100.0, 110.0), closed(50.0, 45.0), closed(20.0, 21.0)];
        let stats = Statistics::from_trades(&trades);

        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.winning_trades, 2);
        assert_eq!(stats.losing_trades(), 1);
        assert_eq!(stats.win_probability, dec!(66.67));
        // 10 - 10 + 5
        assert_eq!(stats.total_return, dec!(5.00));
    }

    #[test]
    fn test_break_even_is_not_a_win() {
        let stats = Statistics::from_trades(&[closed(10.0, 10.0)]);
        assert_eq!(stats.winning_trades, 0);
        assert_eq!(stats.win_probability, dec!(0));
    }

    #[test]
    fn test_open_trade_counts_but_adds_no_return() {
        let trades = vec![closed(100.0, 103.0), Trade::open(ts(3), 90.0)];
        let stats = Statistics::from_trades(&trades);
        assert_eq!(stats.total_trades, 2);
        assert_eq!(stats.winning_trades, 1);
        assert_eq!(stats.win_probability, dec!(50.00));
        assert_eq!(stats.total_return, dec!(3.00));
    }

    #[test]
    fn test_rounding_keeps_two_places() {
        assert_eq!(round_2dp(1.0 / 3.0 * 100.0).to_string(), "33.33");
        assert_eq!(round_2dp(100.0).to_string(), "100.00");
        assert_eq!(round_2dp(-2.0 / 3.0).to_string(), "-0.67");
    }

    #[test]
    fn test_rounding_uses_stored_binary_value() {
        assert_eq!(round_2dp(1.005), dec!(1.00));
        assert_eq!(round_2dp(-2.675), dec!(-2.67));
        assert_eq!(round_2dp(0.125), dec!(0.13));
        assert_eq!(round_2dp(f64::NAN), dec!(0.00));
    }

    #[test]
    fn test_max_drawdown() {
        // equity: 1.0 -> 1.2 -> 0.9 -> 1.1
        let dd = max_drawdown_pct(&[0.0, 0.2, -0.1, 0.1]);
        assert!((dd - 25.0).abs() < 1e-9);
        assert_eq!(max_drawdown_pct(&[]), 0.0);
    }

    #[test]
    fn test_sharpe_needs_two_trades() {
        assert_eq!(calculate_sharpe(&[closed(1.0, 2.0)]), Decimal::ZERO);
        assert_eq!(
            calculate_sharpe(&[closed(1.0, 2.0), closed(1.0, 2.0)]),
            Decimal::ZERO
        );

        // returns 10% and 30%: mean 20, sample std ~14.142
        let sharpe = calculate_sharpe(&[closed(100.0, 110.0), closed(100.0, 130.0)]);
        assert_eq!(sharpe, dec!(1.41));
    }
}
